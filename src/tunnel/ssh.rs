// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! SSH implementation of [`Channel`].
//!
//! One SSH connection is opened per tunnel. The SOCKS5 proxy opens a `direct-tcpip`
//! channel per accepted client; remote-to-local forwarding registers a
//! `tcpip-forward` listener and dials the local endpoint for every forwarded channel.
//! The connection is checked periodically so a dropped shadow surfaces as
//! [`TransportError::ConnectionClosed`].

use super::socks5::{self, Reply};
use super::{accept_retrying, shutdown_requested, splice, split_endpoint, Channel, Credential};
use crate::constants::TUNNEL_HEALTH_CHECK_INTERVAL_SECS;
use crate::errors::TransportError;
use async_trait::async_trait;
use russh::client::{self, Handle, Msg, Session};
use russh::Disconnect;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Keepalive interval for the SSH transport.
const KEEPALIVE_INTERVAL_SECS: u64 = 15;

/// Tunnels over SSH using `russh`.
#[derive(Clone)]
pub struct SshChannel {
    config: Arc<client::Config>,
}

impl Default for SshChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SshChannel {
    #[must_use]
    pub fn new() -> Self {
        let config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(KEEPALIVE_INTERVAL_SECS)),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
        }
    }

    async fn connect(
        &self,
        credential: &Credential,
        ssh_address: &str,
        handler: ShadowHandler,
    ) -> Result<Handle<ShadowHandler>, TransportError> {
        let connect_failed = |reason: String| TransportError::ConnectFailed {
            address: ssh_address.to_string(),
            reason,
        };

        let mut handle = client::connect(self.config.clone(), ssh_address, handler)
            .await
            .map_err(|e| connect_failed(e.to_string()))?;

        let authenticated = match &credential.private_key_path {
            Some(path) => {
                let key = russh_keys::load_secret_key(path, None).map_err(|e| {
                    TransportError::InvalidKey {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                handle
                    .authenticate_publickey(&credential.username, Arc::new(key))
                    .await
            }
            None => {
                handle
                    .authenticate_password(&credential.username, credential.password())
                    .await
            }
        }
        .map_err(|e| connect_failed(e.to_string()))?;

        if !authenticated {
            return Err(TransportError::AuthRejected {
                address: ssh_address.to_string(),
                user: credential.username.clone(),
            });
        }

        debug!(address = %ssh_address, user = %credential.username, "SSH session established");
        Ok(handle)
    }
}

async fn disconnect(handle: &Handle<ShadowHandler>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "session closed", "en")
        .await
    {
        debug!(error = %e, "SSH disconnect failed");
    }
}

/// Serve one SOCKS5 client by opening a `direct-tcpip` channel to its target.
async fn proxy_socks_client(
    handle: Arc<Handle<ShadowHandler>>,
    mut stream: TcpStream,
) -> Result<(), TransportError> {
    let target = socks5::accept(&mut stream).await?;
    let channel = match handle
        .channel_open_direct_tcpip(target.host(), u32::from(target.port()), "127.0.0.1", 0)
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            socks5::send_reply(&mut stream, Reply::HostUnreachable).await?;
            return Err(TransportError::ChannelFailed {
                target: target.to_string(),
                reason: e.to_string(),
            });
        }
    };
    socks5::send_reply(&mut stream, Reply::Succeeded).await?;
    debug!(target = %target, "SOCKS5 connection opened");
    splice(stream, channel.into_stream()).await
}

#[async_trait]
impl Channel for SshChannel {
    async fn start_socks5_proxy(
        &self,
        credential: &Credential,
        ssh_address: &str,
        socks5_address: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let handle = self
            .connect(credential, ssh_address, ShadowHandler::default())
            .await?;
        let listener =
            TcpListener::bind(socks5_address)
                .await
                .map_err(|source| TransportError::ListenFailed {
                    address: socks5_address.to_string(),
                    source,
                })?;
        info!(socks5 = %socks5_address, via = %ssh_address, "SOCKS5 proxy listening");

        let handle = Arc::new(handle);
        let mut health = tokio::time::interval(Duration::from_secs(
            TUNNEL_HEALTH_CHECK_INTERVAL_SECS,
        ));

        let outcome = loop {
            tokio::select! {
                (stream, peer) = accept_retrying(|| listener.accept(), socks5_address) => {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = proxy_socks_client(handle, stream).await {
                            debug!(peer = %peer, error = %e, "SOCKS5 connection failed");
                        }
                    });
                }
                _ = health.tick() => {
                    if handle.is_closed() {
                        break Err(TransportError::ConnectionClosed {
                            address: ssh_address.to_string(),
                        });
                    }
                }
                () = shutdown_requested(&mut shutdown) => break Ok(()),
            }
        };

        disconnect(&handle).await;
        outcome
    }

    async fn forward_remote_to_local(
        &self,
        credential: &Credential,
        ssh_address: &str,
        remote_endpoint: &str,
        local_endpoint: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        let (remote_host, remote_port) = split_endpoint(remote_endpoint)?;
        split_endpoint(local_endpoint)?;

        let handler = ShadowHandler {
            forward_target: Some(local_endpoint.to_string()),
        };
        let mut handle = self.connect(credential, ssh_address, handler).await?;
        handle
            .tcpip_forward(remote_host.clone(), u32::from(remote_port))
            .await
            .map_err(|e| TransportError::ChannelFailed {
                target: remote_endpoint.to_string(),
                reason: e.to_string(),
            })?;
        info!(remote = %remote_endpoint, local = %local_endpoint, "Remote forward established");

        let mut health = tokio::time::interval(Duration::from_secs(
            TUNNEL_HEALTH_CHECK_INTERVAL_SECS,
        ));
        let outcome = loop {
            tokio::select! {
                _ = health.tick() => {
                    if handle.is_closed() {
                        break Err(TransportError::ConnectionClosed {
                            address: ssh_address.to_string(),
                        });
                    }
                }
                () = shutdown_requested(&mut shutdown) => break Ok(()),
            }
        };

        if outcome.is_ok() {
            if let Err(e) = handle
                .cancel_tcpip_forward(remote_host, u32::from(remote_port))
                .await
            {
                debug!(error = %e, "Failed to cancel remote forward");
            }
        }
        disconnect(&handle).await;
        outcome
    }
}

/// Client-side SSH event handler.
#[derive(Default)]
struct ShadowHandler {
    /// Local endpoint receiving forwarded connections
    forward_target: Option<String>,
}

#[async_trait]
impl client::Handler for ShadowHandler {
    type Error = russh::Error;

    // Shadows are created per session with a fresh host key.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: russh::Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(target) = self.forward_target.clone() else {
            return Ok(());
        };
        debug!(
            listener = %format!("{connected_address}:{connected_port}"),
            origin = %format!("{originator_address}:{originator_port}"),
            local = %target,
            "Forwarded connection received"
        );

        tokio::spawn(async move {
            match TcpStream::connect(&target).await {
                Ok(local) => {
                    if let Err(e) = splice(local, channel.into_stream()).await {
                        debug!(local = %target, error = %e, "Forwarded connection failed");
                    }
                }
                Err(e) => warn!(local = %target, error = %e, "Local endpoint unreachable"),
            }
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "ssh_tests.rs"]
mod ssh_tests;
