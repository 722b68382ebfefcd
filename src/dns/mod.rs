// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! DNS synchronization engine.
//!
//! Makes cluster Service names resolvable on the local machine using one of three
//! strategies, selected by [`DnsMode`]:
//!
//! - `hosts[:ns1,ns2]` writes a one-shot hosts-file block
//! - `pod-dns` points the local resolver at the shadow pod
//! - `local-dns` runs a local resolver over a host table kept live by watches
//!
//! The host table and the headless pod set are only written here, under an `RwLock`.
//! Watch handlers rebuild the table from scratch; a failed rebuild is logged and the
//! previous table stays in place.

pub mod hosts;
pub mod resolver;
pub mod server;

use crate::cluster::{ClusterApi, WatchEvent};
use crate::constants::{
    ALTERNATIVE_DNS_PORT, DNS_PORT, DNS_WATCH_SETTLE_SECS, HEADLESS_POD_REBUILD_DELAY_SECS,
    LOCALHOST,
};
use crate::context::Context;
use crate::errors::{ClusterError, ConfigError};
use crate::tunnel::shutdown_requested;
use anyhow::{Context as _, Result};
use futures::StreamExt;
use hosts::{build_host_table, HeadlessPodSet, HostTable};
use k8s_openapi::api::core::v1::{Pod, Service};
use resolver::ResolverOverride;
use server::{LocalDnsServer, Upstreams};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// DNS synchronization strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DnsMode {
    /// One-shot hosts file dump for the current namespace plus `extra`
    Hosts {
        /// Additional namespaces to include
        extra: Vec<String>,
    },
    /// Resolve through the shadow pod's resolver
    PodDns,
    /// Resolve through a local resolver kept in sync by watches
    LocalDns,
}

impl Default for DnsMode {
    fn default() -> Self {
        DnsMode::Hosts { extra: Vec::new() }
    }
}

impl FromStr for DnsMode {
    type Err = ConfigError;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "pod-dns" => Ok(DnsMode::PodDns),
            "local-dns" => Ok(DnsMode::LocalDns),
            "hosts" => Ok(DnsMode::default()),
            _ => match mode.strip_prefix("hosts:") {
                Some(list) => Ok(DnsMode::Hosts {
                    extra: list
                        .split(',')
                        .map(str::trim)
                        .filter(|ns| !ns.is_empty())
                        .map(str::to_string)
                        .collect(),
                }),
                None => Err(ConfigError::InvalidDnsMode {
                    mode: mode.to_string(),
                }),
            },
        }
    }
}

impl fmt::Display for DnsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsMode::Hosts { extra } if extra.is_empty() => write!(f, "hosts"),
            DnsMode::Hosts { extra } => write!(f, "hosts:{}", extra.join(",")),
            DnsMode::PodDns => write!(f, "pod-dns"),
            DnsMode::LocalDns => write!(f, "local-dns"),
        }
    }
}

/// Port of the local resolver: 53 where the platform resolver can be pointed at a
/// port-less address, the alternate port elsewhere.
#[must_use]
pub fn local_dns_port() -> u16 {
    if cfg!(windows) {
        DNS_PORT
    } else {
        ALTERNATIVE_DNS_PORT
    }
}

/// Live DNS data owned by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DnsState {
    pub hosts: HostTable,
    pub headless_pods: HeadlessPodSet,
}

/// Whether a Service event should rebuild the table.
///
/// Replayed events and anything inside the `settle` window after the watch started
/// are ignored; deletions leave the table untouched until the next rebuild.
#[must_use]
pub fn service_event_triggers_rebuild(
    event: &WatchEvent<Service>,
    since_start: Duration,
    settle: Duration,
) -> bool {
    matches!(event, WatchEvent::Applied(_)) && since_start > settle
}

/// Whether a pod event should rebuild the table.
#[must_use]
pub fn pod_event_triggers_rebuild(event: &WatchEvent<Pod>, headless_pods: &[String]) -> bool {
    match event {
        WatchEvent::Applied(pod) => pod
            .metadata
            .name
            .as_ref()
            .is_some_and(|name| headless_pods.contains(name)),
        WatchEvent::Initial(_) | WatchEvent::Deleted(_) => false,
    }
}

/// Handle to a running DNS strategy.
pub struct DnsSession {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    resolver: Arc<dyn ResolverOverride>,
}

impl DnsSession {
    /// Stop background tasks and undo resolver changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver configuration cannot be restored.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "DNS task ended abnormally");
            }
        }
        self.resolver
            .restore()
            .context("Failed to restore local resolver configuration")
    }
}

/// Owner of the host table and the DNS strategies.
#[derive(Clone)]
pub struct DnsEngine {
    cluster: Arc<dyn ClusterApi>,
    resolver: Arc<dyn ResolverOverride>,
    namespace: String,
    cluster_domain: String,
    state: Arc<RwLock<DnsState>>,
    settle: Duration,
    pod_rebuild_delay: Duration,
}

impl DnsEngine {
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self {
            cluster: ctx.cluster.clone(),
            resolver: ctx.resolver.clone(),
            namespace: ctx.options.namespace.clone(),
            cluster_domain: ctx.options.connect.cluster_domain.clone(),
            state: Arc::new(RwLock::new(DnsState::default())),
            settle: Duration::from_secs(DNS_WATCH_SETTLE_SECS),
            pod_rebuild_delay: Duration::from_secs(HEADLESS_POD_REBUILD_DELAY_SECS),
        }
    }

    /// Override the watch settling window and the headless pod rebuild delay.
    #[must_use]
    pub fn with_watch_timing(mut self, settle: Duration, pod_rebuild_delay: Duration) -> Self {
        self.settle = settle;
        self.pod_rebuild_delay = pod_rebuild_delay;
        self
    }

    /// Address for `name` in the current table.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .hosts
            .get(name)
            .cloned()
    }

    /// Copy of the current table and headless pod set.
    #[must_use]
    pub fn snapshot(&self) -> DnsState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-derive the table for the current namespace plus `extra_namespaces`.
    ///
    /// # Errors
    ///
    /// Returns the cluster error; the previous table is kept.
    pub async fn rebuild(&self, extra_namespaces: &[String]) -> Result<(), ClusterError> {
        let (hosts, headless_pods) = build_host_table(
            self.cluster.as_ref(),
            &self.namespace,
            extra_namespaces,
            &self.cluster_domain,
        )
        .await?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = DnsState {
            hosts,
            headless_pods,
        };
        Ok(())
    }

    /// Apply `mode` for a session whose shadow runs at `shadow_pod_ip`.
    ///
    /// `socks_proxy` is the session's local SOCKS5 proxy; `local-dns` reaches the
    /// shadow's resolver through it.
    ///
    /// # Errors
    ///
    /// Fails if the initial table cannot be built, the local resolver cannot be bound,
    /// or the resolver override cannot be applied.
    pub async fn setup(
        &self,
        mode: &DnsMode,
        shadow_pod_ip: &str,
        socks_proxy: Option<SocketAddr>,
    ) -> Result<DnsSession> {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut session = DnsSession {
            shutdown,
            tasks: Vec::new(),
            resolver: self.resolver.clone(),
        };

        match mode {
            DnsMode::Hosts { extra } => {
                self.rebuild(extra)
                    .await
                    .context("Failed to build host table")?;
                let hosts = self.snapshot().hosts;
                self.resolver
                    .dump_hosts(&hosts)
                    .context("Failed to write hosts file")?;
                info!(entries = hosts.len(), "Dumped cluster services to hosts file");
            }
            DnsMode::PodDns => {
                self.resolver
                    .set_name_server(shadow_pod_ip)
                    .context("Failed to set name server")?;
                info!(name_server = %shadow_pod_ip, "Resolving through shadow pod");
            }
            DnsMode::LocalDns => {
                session.tasks = self
                    .setup_local_dns(shadow_pod_ip, socks_proxy, shutdown_rx)
                    .await?;
            }
        }

        Ok(session)
    }

    async fn setup_local_dns(
        &self,
        shadow_pod_ip: &str,
        socks_proxy: Option<SocketAddr>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<JoinHandle<()>>> {
        self.rebuild(&[])
            .await
            .context("Failed to build host table")?;

        let shadow_ip: IpAddr = shadow_pod_ip
            .parse()
            .with_context(|| format!("Invalid shadow pod IP '{shadow_pod_ip}'"))?;
        let upstreams = Upstreams {
            cluster_domain: self.cluster_domain.clone(),
            cluster_resolver: SocketAddr::new(shadow_ip, DNS_PORT),
            socks_proxy,
            system: self
                .resolver
                .upstream_name_server()
                .and_then(|upstream| upstream.parse().ok()),
        };
        debug!(upstreams = ?upstreams, "Local DNS upstreams");

        let port = local_dns_port();
        let bind: SocketAddr = format!("{LOCALHOST}:{port}").parse()?;
        let server = LocalDnsServer::bind(bind, self.state.clone(), upstreams)
            .await
            .with_context(|| format!("Failed to bind local DNS resolver on {bind}"))?;

        self.resolver
            .set_name_server(&bind.to_string())
            .context("Failed to point the system resolver at the local resolver")?;

        let tasks = vec![
            tokio::spawn(server.run(shutdown.clone())),
            tokio::spawn(self.clone().watch_services(shutdown.clone())),
            tokio::spawn(self.clone().watch_pods(shutdown)),
        ];
        info!(address = %bind, "Resolving through local DNS resolver");
        Ok(tasks)
    }

    /// Rebuild after a watch event, keeping the old table on failure.
    async fn refresh(&self, reason: &str) {
        match self.rebuild(&[]).await {
            Ok(()) => debug!(reason = %reason, "Rebuilt host table"),
            Err(e) => warn!(reason = %reason, error = %e, "Failed to rebuild host table, keeping previous one"),
        }
    }

    pub(crate) async fn watch_services(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.cluster.watch_services(&self.namespace);
        let started = Instant::now();
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => {
                        if service_event_triggers_rebuild(&event, started.elapsed(), self.settle) {
                            let name = event.object().metadata.name.clone().unwrap_or_default();
                            self.refresh(&format!("service {name} changed")).await;
                        }
                    }
                    None => break,
                },
                () = shutdown_requested(&mut shutdown) => break,
            }
        }
        debug!("Service watch stopped");
    }

    pub(crate) async fn watch_pods(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.cluster.watch_pods(&self.namespace);
        let delay = self.pod_rebuild_delay;
        loop {
            tokio::select! {
                event = events.next() => match event {
                    Some(event) => {
                        let headless_pods = self.snapshot().headless_pods;
                        if pod_event_triggers_rebuild(&event, &headless_pods) {
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                () = shutdown_requested(&mut shutdown) => break,
                            }
                            let name = event.object().metadata.name.clone().unwrap_or_default();
                            self.refresh(&format!("headless pod {name} changed")).await;
                        }
                    }
                    None => break,
                },
                () = shutdown_requested(&mut shutdown) => break,
            }
        }
        debug!("Pod watch stopped");
    }
}
