// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Connect: join the local machine to the cluster network.
//!
//! Creates (or reuses) a connect shadow, serves a local SOCKS5 proxy whose
//! connections exit from the shadow, and applies the selected DNS strategy.

use crate::constants::LOCALHOST;
use crate::context::Context;
use crate::dns::DnsEngine;
use crate::session::{abort_start, Session};
use crate::shadow::{connect_envs, connect_labels, connect_shadow_name, ShadowManager};
use anyhow::{Context as _, Result};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Start a connect session.
///
/// # Errors
///
/// Fails when the shadow cannot be created or the DNS strategy cannot be applied.
/// Anything created before the failure is removed again.
pub async fn connect(ctx: &Context) -> Result<Session> {
    let options = &ctx.options.connect;
    let shared = options.shared_shadow;

    let name = connect_shadow_name(shared);
    let local_domains = ctx.resolver.local_domains();
    let envs = connect_envs(local_domains.as_deref(), &options.dns_mode, ctx.options.debug);
    let identity = ShadowManager::new(ctx)
        .get_or_create_shadow(&name, &connect_labels(), &BTreeMap::new(), &envs, shared)
        .await
        .with_context(|| format!("Failed to prepare shadow {name}"))?;

    let mut session = Session::new(ctx);
    let ssh_address = identity.ssh_address();
    let pod_ip = identity.pod_ip.clone();
    let credential = Arc::new(identity.credential());
    session.track_shadow(identity);

    let socks_address: SocketAddr = match format!("{LOCALHOST}:{}", options.socks_port).parse() {
        Ok(address) => address,
        Err(e) => return abort_start(session, e.into()).await,
    };
    let channel = ctx.channel.clone();
    let shutdown = session.shutdown_signal();
    session.spawn_tunnel(async move {
        channel
            .start_socks5_proxy(&credential, &ssh_address, &socks_address.to_string(), shutdown)
            .await
            .context("SOCKS5 proxy stopped")
    });

    let dns = DnsEngine::new(ctx)
        .setup(&options.dns_mode, &pod_ip, Some(socks_address))
        .await;
    match dns {
        Ok(dns) => session.set_dns(dns),
        Err(e) => {
            return abort_start(
                session,
                e.context(format!("Failed to apply DNS mode {}", options.dns_mode)),
            )
            .await
        }
    }

    info!(
        socks5 = %socks_address,
        dns_mode = %options.dns_mode,
        shadow = %name,
        "Connected, set ALL_PROXY=socks5://{socks_address} for cluster access"
    );
    Ok(session)
}

#[cfg(test)]
#[path = "connect_tests.rs"]
mod connect_tests;
