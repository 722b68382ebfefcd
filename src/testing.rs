// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Test doubles for the non-cluster collaborators.

use crate::cluster::mock::MockCluster;
use crate::context::{Context, Options};
use crate::dns::hosts::HostTable;
use crate::dns::resolver::ResolverOverride;
use crate::errors::TransportError;
use crate::forward::{PortForwarder, PortMapping};
use crate::tunnel::{shutdown_requested, Channel, Credential};
use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

/// Records resolver changes instead of touching system files.
#[derive(Default)]
pub struct FakeResolver {
    pub dumps: Mutex<Vec<HostTable>>,
    pub name_servers: Mutex<Vec<String>>,
    pub restored: Mutex<usize>,
    pub domains: Option<String>,
    pub upstream: Option<String>,
}

impl ResolverOverride for FakeResolver {
    fn dump_hosts(&self, hosts: &HostTable) -> io::Result<()> {
        self.dumps.lock().unwrap().push(hosts.clone());
        Ok(())
    }

    fn set_name_server(&self, address: &str) -> io::Result<()> {
        self.name_servers.lock().unwrap().push(address.to_string());
        Ok(())
    }

    fn local_domains(&self) -> Option<String> {
        self.domains.clone()
    }

    fn upstream_name_server(&self) -> Option<String> {
        self.upstream.clone()
    }

    fn restore(&self) -> io::Result<()> {
        *self.restored.lock().unwrap() += 1;
        Ok(())
    }
}

/// Channel that records requests and idles until shutdown.
#[derive(Default)]
pub struct FakeChannel {
    pub socks: Mutex<Vec<(String, String)>>,
    pub forwards: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Channel for FakeChannel {
    async fn start_socks5_proxy(
        &self,
        _credential: &Credential,
        ssh_address: &str,
        socks5_address: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        self.socks
            .lock()
            .unwrap()
            .push((ssh_address.to_string(), socks5_address.to_string()));
        shutdown_requested(&mut shutdown).await;
        Ok(())
    }

    async fn forward_remote_to_local(
        &self,
        _credential: &Credential,
        ssh_address: &str,
        remote_endpoint: &str,
        local_endpoint: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), TransportError> {
        self.forwards.lock().unwrap().push((
            ssh_address.to_string(),
            remote_endpoint.to_string(),
            local_endpoint.to_string(),
        ));
        shutdown_requested(&mut shutdown).await;
        Ok(())
    }
}

/// Forwarder that records mappings and idles until shutdown.
#[derive(Default)]
pub struct FakeForwarder {
    pub mappings: Mutex<Vec<PortMapping>>,
}

#[async_trait]
impl PortForwarder for FakeForwarder {
    async fn forward(
        &self,
        mapping: &PortMapping,
        _namespace: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        self.mappings.lock().unwrap().push(mapping.clone());
        shutdown_requested(&mut shutdown).await;
        Ok(())
    }
}

/// Collaborators behind a test [`Context`], kept for assertions.
pub struct Fakes {
    pub cluster: Arc<MockCluster>,
    pub channel: Arc<FakeChannel>,
    pub resolver: Arc<FakeResolver>,
    pub forwarder: Arc<FakeForwarder>,
}

/// Build a context over fakes, writing keys to `key_dir`.
pub fn test_context(mut options: Options, key_dir: &std::path::Path) -> (Context, Fakes) {
    test_context_with_resolver(&mut options, key_dir, FakeResolver::default())
}

pub fn test_context_with_resolver(
    options: &mut Options,
    key_dir: &std::path::Path,
    resolver: FakeResolver,
) -> (Context, Fakes) {
    options.key_dir = key_dir.to_path_buf();
    let fakes = Fakes {
        cluster: Arc::new(MockCluster::new()),
        channel: Arc::new(FakeChannel::default()),
        resolver: Arc::new(resolver),
        forwarder: Arc::new(FakeForwarder::default()),
    };
    let ctx = Context {
        cluster: fakes.cluster.clone(),
        channel: fakes.channel.clone(),
        resolver: fakes.resolver.clone(),
        forwarder: fakes.forwarder.clone(),
        options: Arc::new(options.clone()),
    };
    (ctx, fakes)
}
