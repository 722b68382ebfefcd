// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service port redirect.
//!
//! A Service port is resolved once to a concrete pod and container port, then a
//! local listener forwards every accepted connection to that pod through the API
//! server's port-forward subresource.

use crate::cluster::{is_pod_ready, ClusterApi};
use crate::constants::LOCALHOST;
use crate::context::Context;
use crate::errors::{ClusterError, ConfigError};
use crate::session::Session;
use crate::tunnel::{accept_retrying, shutdown_requested};
use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Api, Client};
use std::fmt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A local port bound to one container port of one pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortMapping {
    pub local_port: u16,
    pub pod_name: String,
    pub pod_port: u16,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{LOCALHOST}:{} -> pod/{}:{}",
            self.local_port, self.pod_name, self.pod_port
        )
    }
}

/// What `forward` was asked to reach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ForwardTarget {
    /// A Service in the current namespace
    Service(String),
    /// A host name or IP address
    Address(String),
}

impl ForwardTarget {
    /// Bare DNS labels are Services; anything with a dot or colon is an address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRedirectTarget`] for an empty target.
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ConfigError::MissingRedirectTarget);
        }
        if target.contains(['.', ':']) {
            Ok(ForwardTarget::Address(target.to_string()))
        } else {
            Ok(ForwardTarget::Service(target.to_string()))
        }
    }
}

/// Forwards a local port to a pod port.
#[async_trait]
pub trait PortForwarder: Send + Sync {
    /// Serve `mapping` until `shutdown` is raised.
    async fn forward(
        &self,
        mapping: &PortMapping,
        namespace: &str,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()>;
}

/// [`PortForwarder`] over the pod port-forward subresource.
#[derive(Clone)]
pub struct KubePortForwarder {
    client: Client,
}

impl KubePortForwarder {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PortForwarder for KubePortForwarder {
    async fn forward(
        &self,
        mapping: &PortMapping,
        namespace: &str,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let address = format!("{LOCALHOST}:{}", mapping.local_port);
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to listen on {address}"))?;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        info!(mapping = %mapping, "Port forward listening");

        loop {
            tokio::select! {
                (stream, peer) = accept_retrying(|| listener.accept(), &address) => {
                    debug!(peer = %peer, mapping = %mapping, "Accepted forwarded connection");
                    let pods = pods.clone();
                    let mapping = mapping.clone();
                    tokio::spawn(async move {
                        if let Err(e) = forward_connection(&pods, &mapping, stream).await {
                            warn!(mapping = %mapping, error = %e, "Forwarded connection failed");
                        }
                    });
                }
                () = shutdown_requested(&mut shutdown) => break,
            }
        }
        debug!(mapping = %mapping, "Port forward stopped");
        Ok(())
    }
}

/// Carry one local connection over its own port-forward session.
async fn forward_connection(
    pods: &Api<Pod>,
    mapping: &PortMapping,
    mut stream: TcpStream,
) -> Result<()> {
    let mut forwarder = pods
        .portforward(&mapping.pod_name, &[mapping.pod_port])
        .await
        .with_context(|| format!("Failed to open port forward to pod {}", mapping.pod_name))?;
    let mut upstream = forwarder
        .take_stream(mapping.pod_port)
        .ok_or_else(|| anyhow!("Port forward returned no stream for port {}", mapping.pod_port))?;

    let copied = tokio::io::copy_bidirectional(&mut stream, &mut upstream).await;
    drop(upstream);
    if let Err(e) = forwarder.join().await {
        debug!(error = %e, "Port forward session ended with error");
    }
    copied.context("Forwarded stream failed")?;
    Ok(())
}

/// Resolve Service port `remote_port` to a concrete pod and container port.
///
/// Numeric target ports are used as is, named ones are looked up in the first ready
/// backing pod's container ports, and a missing target port means the Service port.
///
/// # Errors
///
/// Distinguishes a port the Service does not declare, a Service without ready pods
/// and a named port no container declares.
pub async fn resolve_service_port(
    cluster: &dyn ClusterApi,
    namespace: &str,
    service_name: &str,
    local_port: u16,
    remote_port: u16,
) -> Result<PortMapping, ClusterError> {
    let service = cluster.get_service(service_name, namespace).await?;
    let spec = service.spec.unwrap_or_default();

    let declared = spec
        .ports
        .unwrap_or_default()
        .into_iter()
        .find(|port| port.port == i32::from(remote_port))
        .ok_or_else(|| ClusterError::PortNotAvailable {
            port: remote_port,
            service: service_name.to_string(),
        })?;

    let no_pod = || ClusterError::NoPodAvailable {
        service: service_name.to_string(),
    };
    let selector = spec.selector.unwrap_or_default();
    if selector.is_empty() {
        return Err(no_pod());
    }
    let pods = cluster.list_pods_by_label(&selector, namespace).await?;
    let pod = pods.into_iter().find(is_pod_ready).ok_or_else(no_pod)?;
    let pod_name = pod.metadata.name.clone().unwrap_or_default();

    let not_fit = || ClusterError::PortNotFit {
        port: remote_port,
        service: service_name.to_string(),
    };
    let pod_port = match declared.target_port {
        Some(IntOrString::Int(port)) => port,
        Some(IntOrString::String(name)) => pod
            .spec
            .iter()
            .flat_map(|spec| spec.containers.iter())
            .flat_map(|container| container.ports.iter().flatten())
            .find(|port| port.name.as_deref() == Some(name.as_str()))
            .map(|port| port.container_port)
            .ok_or_else(not_fit)?,
        None => declared.port,
    };
    let pod_port = u16::try_from(pod_port).map_err(|_| not_fit())?;

    Ok(PortMapping {
        local_port,
        pod_name,
        pod_port,
    })
}

/// Forward `localhost:<local_port>` to Service port `remote_port`.
///
/// # Errors
///
/// Fails when the Service port cannot be resolved to a pod port.
pub async fn redirect_service(
    ctx: &Context,
    service: &str,
    local_port: u16,
    remote_port: u16,
) -> Result<Session> {
    let namespace = ctx.options.namespace.clone();
    let mapping = resolve_service_port(
        ctx.cluster.as_ref(),
        &namespace,
        service,
        local_port,
        remote_port,
    )
    .await
    .with_context(|| format!("Failed to resolve port {remote_port} of service {service}"))?;
    info!(service = %service, mapping = %mapping, "Redirecting service port");

    let mut session = Session::new(ctx);
    let forwarder = ctx.forwarder.clone();
    let shutdown = session.shutdown_signal();
    session.spawn_tunnel(async move { forwarder.forward(&mapping, &namespace, shutdown).await });
    Ok(session)
}

/// Redirecting to an arbitrary address is not supported.
///
/// # Errors
///
/// Always returns [`ConfigError::AddressRedirectNotImplemented`].
pub fn redirect_address(address: &str) -> Result<Session, ConfigError> {
    Err(ConfigError::AddressRedirectNotImplemented {
        address: address.to_string(),
    })
}

/// Dispatch `forward` to the Service or address redirect.
///
/// # Errors
///
/// Fails on a missing target, an address target, or an unresolvable Service port.
pub async fn forward(
    ctx: &Context,
    target: Option<&str>,
    local_port: u16,
    remote_port: u16,
) -> Result<Session> {
    match ForwardTarget::parse(target.unwrap_or_default())? {
        ForwardTarget::Service(service) => {
            redirect_service(ctx, &service, local_port, remote_port).await
        }
        ForwardTarget::Address(address) => Ok(redirect_address(&address)?),
    }
}

#[cfg(test)]
#[path = "forward_tests.rs"]
mod forward_tests;
