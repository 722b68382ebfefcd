// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Explicit session context.
//!
//! Every operation receives a [`Context`] carrying the user options and the
//! collaborators it may use. Nothing is read from process-wide state.

use crate::cluster::{ClusterApi, KubeCluster};
use crate::constants::{
    DEFAULT_CLUSTER_DOMAIN, DEFAULT_SHADOW_IMAGE, DEFAULT_SOCKS_PORT, LOCAL_KEY_DIR,
};
use crate::dns::resolver::{ResolverOverride, SystemResolver};
use crate::dns::DnsMode;
use crate::forward::{KubePortForwarder, PortForwarder};
use crate::mesh::{ExposePort, MeshMethod};
use crate::tunnel::{Channel, SshChannel};
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;

/// Options for `connect`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectOptions {
    /// DNS synchronization strategy
    pub dns_mode: DnsMode,
    /// Cluster DNS domain, usually `cluster.local`
    pub cluster_domain: String,
    /// Reuse one shadow across sessions
    pub shared_shadow: bool,
    /// Local SOCKS5 port
    pub socks_port: u16,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            dns_mode: DnsMode::default(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            shared_shadow: false,
            socks_port: DEFAULT_SOCKS_PORT,
        }
    }
}

/// Options for `mesh`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshOptions {
    /// Local/remote port pairs to expose through the shadow
    pub expose: Vec<ExposePort>,
    /// Caller-chosen mesh version
    pub version: Option<String>,
    /// Mesh method
    pub method: MeshMethod,
}

/// User options for one invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Target namespace
    pub namespace: String,
    /// Verbose logging, also forwarded to shadows
    pub debug: bool,
    /// Shadow container image
    pub image: String,
    /// Directory for shadow private keys
    pub key_dir: PathBuf,
    pub connect: ConnectOptions,
    pub mesh: MeshOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            debug: false,
            image: DEFAULT_SHADOW_IMAGE.to_string(),
            key_dir: default_key_dir(),
            connect: ConnectOptions::default(),
            mesh: MeshOptions::default(),
        }
    }
}

/// `~/.kt-tunnel/pk`, falling back to the working directory when no home is set.
#[must_use]
pub fn default_key_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(LOCAL_KEY_DIR)
}

/// Options and collaborators shared by all operations of a session.
#[derive(Clone)]
pub struct Context {
    /// Cluster API access
    pub cluster: Arc<dyn ClusterApi>,
    /// Secured tunnel to shadows
    pub channel: Arc<dyn Channel>,
    /// Local resolver configuration
    pub resolver: Arc<dyn ResolverOverride>,
    /// Pod port-forward primitive
    pub forwarder: Arc<dyn PortForwarder>,
    /// User options
    pub options: Arc<Options>,
}

impl Context {
    /// Production context over an authenticated client.
    #[must_use]
    pub fn new(client: Client, options: Options) -> Self {
        Self {
            cluster: Arc::new(KubeCluster::new(client.clone())),
            channel: Arc::new(SshChannel::new()),
            resolver: Arc::new(SystemResolver::new(&options.connect.cluster_domain)),
            forwarder: Arc::new(KubePortForwarder::new(client)),
            options: Arc::new(options),
        }
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
