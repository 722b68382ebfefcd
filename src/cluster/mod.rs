// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster API collaborator.
//!
//! Every component talks to Kubernetes through the [`ClusterApi`] trait rather than a
//! raw `kube::Client`. The production implementation is [`KubeCluster`]; unit tests
//! use an in-memory implementation so DNS, shadow and redirect logic can be exercised
//! without a cluster.
//!
//! # Watches
//!
//! [`ClusterApi::watch_services`] and [`ClusterApi::watch_pods`] return a boxed stream of
//! [`WatchEvent`]s. Events replayed while the watch is established are delivered as
//! [`WatchEvent::Initial`] so consumers can ignore the synthetic "add" burst.

pub mod kube_cluster;
pub mod pagination;

#[cfg(test)]
pub(crate) mod mock;

pub use kube_cluster::KubeCluster;

use crate::errors::ClusterError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use std::collections::BTreeMap;

/// A change notification from a namespace-scoped watch.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<K> {
    /// Object replayed while the watch was being established
    Initial(K),
    /// Object added or modified after the watch was established
    Applied(K),
    /// Object removed
    Deleted(K),
}

impl<K> WatchEvent<K> {
    /// The object carried by this event.
    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Initial(obj) | WatchEvent::Applied(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }
}

/// Boxed stream of watch events, owned by the consuming task.
pub type WatchStream<K> = BoxStream<'static, WatchEvent<K>>;

/// Namespace-scoped cluster operations consumed by kubetunnel.
///
/// Implementations never manage cluster credentials; they receive an already
/// authenticated client.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a Service by name.
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Service, ClusterError>;

    /// List every Service in a namespace.
    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError>;

    /// List pods whose labels contain every entry of `selector`.
    async fn list_pods_by_label(
        &self,
        selector: &BTreeMap<String, String>,
        namespace: &str,
    ) -> Result<Vec<Pod>, ClusterError>;

    /// Fetch a pod by name, `None` when it does not exist.
    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Option<Pod>, ClusterError>;

    /// Create a pod. An existing pod with the same name yields an "already exists" error.
    async fn create_pod(&self, pod: &Pod, namespace: &str) -> Result<Pod, ClusterError>;

    /// Delete a pod. Deleting a missing pod succeeds.
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), ClusterError>;

    /// Fetch a `ConfigMap` by name, `None` when it does not exist.
    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, ClusterError>;

    /// Create a `ConfigMap`. An existing one yields an "already exists" error.
    async fn create_config_map(
        &self,
        config_map: &ConfigMap,
        namespace: &str,
    ) -> Result<ConfigMap, ClusterError>;

    /// Delete a `ConfigMap`. Deleting a missing one succeeds.
    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), ClusterError>;

    /// Fetch a Deployment by name.
    async fn get_deployment(&self, name: &str, namespace: &str)
        -> Result<Deployment, ClusterError>;

    /// Watch Services in a namespace.
    fn watch_services(&self, namespace: &str) -> WatchStream<Service>;

    /// Watch pods in a namespace.
    fn watch_pods(&self, namespace: &str) -> WatchStream<Pod>;
}

/// Render a label map as a Kubernetes label selector string (`k1=v1,k2=v2`).
#[must_use]
pub fn label_selector(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether every entry of `subset` is present with the same value in `labels`.
#[must_use]
pub fn labels_match(subset: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    subset.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// The pod IP, if one has been assigned.
#[must_use]
pub fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()
        .and_then(|status| status.pod_ip.as_deref())
        .filter(|ip| !ip.is_empty())
}

/// Whether the pod is running and reports the `Ready` condition.
#[must_use]
pub fn is_pod_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };

    if status.phase.as_deref() != Some("Running") {
        return false;
    }

    status.conditions.as_ref().is_some_and(|conditions| {
        conditions
            .iter()
            .any(|condition| condition.type_ == "Ready" && condition.status == "True")
    })
}
