// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Secured channel to a shadow workload.
//!
//! The [`Channel`] trait offers the two tunnel shapes kubetunnel needs:
//!
//! - a local SOCKS5 proxy whose connections exit from inside the cluster
//! - a remote listener in the shadow whose connections are delivered to a local endpoint
//!
//! Both calls run until the connection drops, an error occurs, or the shutdown signal
//! is raised. [`SshChannel`] implements them over SSH.

pub mod socks5;
pub mod ssh;

pub use ssh::SshChannel;

use crate::constants::ACCEPT_ERROR_BACKOFF_MILLIS;
use crate::errors::TransportError;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Principal and secret used to authenticate the secured connection.
///
/// The password never appears in `Debug` output and is zeroed on drop.
#[derive(Clone)]
pub struct Credential {
    /// Remote user name
    pub username: String,
    password: String,
    /// Private key file, preferred over the password when present
    pub private_key_path: Option<PathBuf>,
}

impl Credential {
    /// Authenticate with a private key file.
    #[must_use]
    pub fn with_private_key(username: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            username: username.into(),
            password: String::new(),
            private_key_path: Some(path.into()),
        }
    }

    /// Authenticate with a password.
    #[must_use]
    pub fn with_password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            private_key_path: None,
        }
    }

    /// The password, empty for key-based credentials.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("private_key_path", &self.private_key_path)
            .finish()
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.password).into_bytes();
        bytes.fill(0);
    }
}

/// Tunnel operations over an authenticated connection to a shadow.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Serve SOCKS5 on `socks5_address`, carrying each connection over the
    /// connection to `ssh_address`.
    ///
    /// Returns `Ok(())` when `shutdown` is raised; any connection failure or loss
    /// is returned as an error.
    async fn start_socks5_proxy(
        &self,
        credential: &Credential,
        ssh_address: &str,
        socks5_address: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError>;

    /// Ask the remote side to listen on `remote_endpoint` and deliver each accepted
    /// connection to `local_endpoint`.
    async fn forward_remote_to_local(
        &self,
        credential: &Credential,
        ssh_address: &str,
        remote_endpoint: &str,
        local_endpoint: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError>;
}

/// Split `host:port` into its parts. IPv6 hosts must be bracketed.
///
/// # Errors
///
/// Returns [`TransportError::InvalidEndpoint`] when the port is missing or invalid.
pub fn split_endpoint(endpoint: &str) -> Result<(String, u16), TransportError> {
    let invalid = || TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
    };
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Copy bytes both ways until either side closes. Resets and broken pipes count
/// as a normal end of stream.
pub(crate) async fn splice<A, B>(mut a: A, mut b: B) -> Result<(), TransportError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    match tokio::io::copy_bidirectional(&mut a, &mut b).await {
        Ok((sent, received)) => {
            debug!(sent, received, "Proxied stream closed");
            Ok(())
        }
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) =>
        {
            Ok(())
        }
        Err(e) => Err(TransportError::Io(e)),
    }
}

/// Run `accept` until it succeeds, pausing after every failure.
///
/// Accept errors (descriptor exhaustion, aborted handshakes) never end a listener.
pub(crate) async fn accept_retrying<F, Fut, T>(mut accept: F, listener: &str) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(e) => {
                warn!(listener = %listener, error = %e, "Failed to accept connection, retrying");
                tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MILLIS)).await;
            }
        }
    }
}

/// Resolve once the shutdown signal is raised or its sender is dropped.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
