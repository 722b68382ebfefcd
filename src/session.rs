// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Session lifecycle.
//!
//! A [`Session`] owns everything an invocation creates: shadow identities, the DNS
//! strategy and the background tunnel tasks. [`Session::cleanup`] releases all of it,
//! in reverse order of creation, and always runs to completion.

use crate::constants::CLEANUP_TASK_TIMEOUT_SECS;
use crate::context::Context;
use crate::dns::DnsSession;
use crate::shadow::{ShadowIdentity, ShadowManager};
use anyhow::{anyhow, Result};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Resources owned by one invocation.
pub struct Session {
    ctx: Context,
    shadows: Vec<ShadowIdentity>,
    dns: Option<DnsSession>,
    shutdown: watch::Sender<bool>,
    tunnels: Vec<JoinHandle<Result<()>>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("shadows", &self.shadows)
            .field("dns", &self.dns.is_some())
            .field("tunnels", &self.tunnels.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            ctx: ctx.clone(),
            shadows: Vec::new(),
            dns: None,
            shutdown,
            tunnels: Vec::new(),
        }
    }

    /// Receiver raised when the session shuts down.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Record a shadow to remove on cleanup (shared shadows are kept).
    pub fn track_shadow(&mut self, identity: ShadowIdentity) {
        self.shadows.push(identity);
    }

    #[must_use]
    pub fn shadows(&self) -> &[ShadowIdentity] {
        &self.shadows
    }

    /// Attach the DNS strategy to stop on cleanup.
    pub fn set_dns(&mut self, dns: DnsSession) {
        self.dns = Some(dns);
    }

    /// Run a tunnel in the background. The session ends when any tunnel ends.
    pub fn spawn_tunnel<F>(&mut self, tunnel: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tunnels.push(tokio::spawn(tunnel));
    }

    /// Wait for ctrl-c, SIGTERM or for a tunnel to end.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed tunnel.
    pub async fn wait(&mut self) -> Result<()> {
        self.wait_until(termination_signal()).await
    }

    /// Wait for `interrupt` to resolve or for a tunnel to end.
    ///
    /// # Errors
    ///
    /// Returns the error of a failed tunnel.
    pub async fn wait_until(&mut self, interrupt: impl Future<Output = ()>) -> Result<()> {
        if self.tunnels.is_empty() {
            interrupt.await;
            info!("Interrupted, cleaning up");
            return Ok(());
        }

        tokio::select! {
            () = interrupt => {
                info!("Interrupted, cleaning up");
                Ok(())
            }
            (finished, index, _) = futures::future::select_all(self.tunnels.iter_mut()) => {
                self.tunnels.remove(index);
                match finished {
                    Ok(Ok(())) => {
                        info!("Tunnel closed, cleaning up");
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e.context("Tunnel failed")),
                    Err(e) => Err(anyhow!(e).context("Tunnel task aborted")),
                }
            }
        }
    }

    /// Stop tunnels and DNS, restore the resolver and remove non-shared shadows.
    ///
    /// Every step runs even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure after all steps have been attempted.
    pub async fn cleanup(mut self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let mut first_error: Option<anyhow::Error> = None;

        for tunnel in self.tunnels.drain(..) {
            let abort = tunnel.abort_handle();
            match tokio::time::timeout(Duration::from_secs(CLEANUP_TASK_TIMEOUT_SECS), tunnel).await
            {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => debug!(error = %e, "Tunnel ended with error during shutdown"),
                Ok(Err(e)) => debug!(error = %e, "Tunnel task aborted"),
                Err(_) => {
                    warn!("Tunnel did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        if let Some(dns) = self.dns.take() {
            if let Err(e) = dns.stop().await {
                warn!(error = %e, "Failed to stop DNS");
                first_error = first_error.or(Some(e));
            }
        }

        let manager = ShadowManager::new(&self.ctx);
        for identity in self.shadows.drain(..).rev() {
            if let Err(e) = manager.remove_shadow(&identity).await {
                warn!(name = %identity.name, error = %e, "Failed to remove shadow");
                let e = anyhow!(e).context(format!("Failed to remove shadow {}", identity.name));
                first_error = first_error.or(Some(e));
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Session cleaned up");
                Ok(())
            }
        }
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn termination_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                () = ctrl_c() => {}
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to listen for SIGTERM");
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn termination_signal() {
    ctrl_c().await;
}

/// Run `cleanup` after a failed start, returning the original error.
pub(crate) async fn abort_start<T>(session: Session, error: anyhow::Error) -> Result<T> {
    if let Err(cleanup_error) = session.cleanup().await {
        warn!(error = %cleanup_error, "Cleanup after failed start also failed");
    }
    Err(error)
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
