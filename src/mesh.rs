// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Mesh exchange.
//!
//! Manual mesh runs a shadow next to an existing deployment, carrying the deployment's
//! selector labels plus a `version` label, so a service-mesh routing rule can send a
//! subset of the deployment's traffic to it. Each exposed remote port on the shadow is
//! forwarded back to a local port through the secured channel.

use crate::constants::{
    ENV_LOG_LEVEL, LOCALHOST, LOCAL_PORT_PROBE_TIMEOUT_MILLIS, MESH_NAME_INFIX,
};
use crate::context::Context;
use crate::errors::ConfigError;
use crate::labels::{
    COMPONENT_MESH, CONTROL_BY, KT_COMPONENT, KT_NAME, KT_VERSION, KUBERNETES_TOOLKIT,
};
use crate::session::Session;
use crate::shadow::{random_suffix, ShadowManager};
use anyhow::{Context as _, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// How the shadow joins the deployment's traffic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MeshMethod {
    /// Shadow created here, routing rules updated by the operator
    #[default]
    Manual,
    /// Routing handled elsewhere; nothing to do
    Auto,
}

impl FromStr for MeshMethod {
    type Err = ConfigError;

    fn from_str(method: &str) -> Result<Self, Self::Err> {
        match method {
            "manual" => Ok(MeshMethod::Manual),
            "auto" => Ok(MeshMethod::Auto),
            _ => Err(ConfigError::InvalidMeshMethod {
                method: method.to_string(),
            }),
        }
    }
}

impl fmt::Display for MeshMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshMethod::Manual => write!(f, "manual"),
            MeshMethod::Auto => write!(f, "auto"),
        }
    }
}

/// A local port exposed on a shadow port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExposePort {
    pub local: u16,
    pub remote: u16,
}

impl FromStr for ExposePort {
    type Err = ConfigError;

    /// Parse `port` or `local:remote`.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidPortSpec {
            spec: spec.to_string(),
        };
        let parse = |port: &str| port.trim().parse::<u16>().ok().filter(|p| *p != 0);

        match spec.split_once(':') {
            Some((local, remote)) => Ok(Self {
                local: parse(local).ok_or_else(invalid)?,
                remote: parse(remote).ok_or_else(invalid)?,
            }),
            None => {
                let port = parse(spec).ok_or_else(invalid)?;
                Ok(Self {
                    local: port,
                    remote: port,
                })
            }
        }
    }
}

/// Parse a comma-separated expose list. Empty items are skipped.
///
/// # Errors
///
/// Returns the first invalid item.
pub fn parse_expose_list(list: &str) -> Result<Vec<ExposePort>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse)
        .collect()
}

/// The caller's version, or a random one.
#[must_use]
pub fn mesh_version(requested: Option<&str>) -> String {
    match requested.map(str::trim).filter(|v| !v.is_empty()) {
        Some(version) => version.to_string(),
        None => random_suffix(),
    }
}

/// `<deployment>-kt-<version>`
#[must_use]
pub fn mesh_shadow_name(deployment: &str, version: &str) -> String {
    format!("{deployment}-{MESH_NAME_INFIX}-{version}")
}

/// Labels for a mesh shadow: provenance markers overlaid by the deployment's
/// selector labels, so the shadow is selected by the deployment's Service.
#[must_use]
pub fn mesh_labels(
    shadow_name: &str,
    version: &str,
    selector: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (CONTROL_BY.to_string(), KUBERNETES_TOOLKIT.to_string()),
        (KT_COMPONENT.to_string(), COMPONENT_MESH.to_string()),
        (KT_NAME.to_string(), shadow_name.to_string()),
        (KT_VERSION.to_string(), version.to_string()),
    ]);
    labels.extend(selector.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

/// Fail unless something accepts connections on `127.0.0.1:<port>`.
///
/// # Errors
///
/// Returns [`ConfigError::NoLocalApplication`] when the connection is refused or
/// does not complete in time.
pub async fn ensure_local_listener(port: u16) -> Result<(), ConfigError> {
    let probe = TcpStream::connect((LOCALHOST, port));
    match tokio::time::timeout(Duration::from_millis(LOCAL_PORT_PROBE_TIMEOUT_MILLIS), probe).await
    {
        Ok(Ok(_)) => Ok(()),
        _ => Err(ConfigError::NoLocalApplication { port }),
    }
}

/// Expose local ports as a version of `deployment`.
///
/// # Errors
///
/// Fails on invalid options, when a local port has no listener, when the deployment
/// does not exist, or when the shadow cannot be created.
pub async fn mesh(ctx: &Context, deployment: Option<&str>) -> Result<Session> {
    let options = &ctx.options.mesh;
    if options.method == MeshMethod::Auto {
        info!("Auto mesh selected, nothing to do");
        return Ok(Session::new(ctx));
    }

    let deployment = deployment
        .filter(|d| !d.is_empty())
        .ok_or(ConfigError::MissingDeployment)?;
    if options.expose.is_empty() {
        return Err(ConfigError::MissingExposePorts.into());
    }
    for port in &options.expose {
        ensure_local_listener(port.local).await?;
    }

    let namespace = &ctx.options.namespace;
    let target = ctx
        .cluster
        .get_deployment(deployment, namespace)
        .await
        .with_context(|| format!("Failed to read deployment {deployment}"))?;
    let selector = target
        .spec
        .and_then(|spec| spec.selector.match_labels)
        .unwrap_or_default();

    let version = mesh_version(options.version.as_deref());
    let name = mesh_shadow_name(deployment, &version);
    let labels = mesh_labels(&name, &version, &selector);
    let envs = BTreeMap::from([(
        ENV_LOG_LEVEL.to_string(),
        if ctx.options.debug { "debug" } else { "info" }.to_string(),
    )]);
    debug!(name = %name, labels = ?labels, "Mesh shadow labels");

    let identity = ShadowManager::new(ctx)
        .get_or_create_shadow(&name, &labels, &BTreeMap::new(), &envs, false)
        .await
        .with_context(|| format!("Failed to create mesh shadow {name}"))?;

    let mut session = Session::new(ctx);
    let ssh_address = identity.ssh_address();
    let credential = Arc::new(identity.credential());
    session.track_shadow(identity);

    for port in &options.expose {
        let channel = ctx.channel.clone();
        let credential = credential.clone();
        let ssh_address = ssh_address.clone();
        let remote = format!("0.0.0.0:{}", port.remote);
        let local = format!("{LOCALHOST}:{}", port.local);
        let shutdown = session.shutdown_signal();
        session.spawn_tunnel(async move {
            channel
                .forward_remote_to_local(&credential, &ssh_address, &remote, &local, shutdown)
                .await
                .with_context(|| format!("Forward from {remote} to {local} failed"))
        });
    }

    info!(
        deployment = %deployment,
        shadow = %name,
        version = %version,
        "Mesh ready, route traffic with label {KT_VERSION}={version}"
    );
    Ok(session)
}

#[cfg(test)]
#[path = "mesh_tests.rs"]
mod mesh_tests;
