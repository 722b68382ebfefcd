// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Host table derivation.
//!
//! Every Service with a resolvable IP contributes these names:
//!
//! | Name                                  | Namespaces          |
//! |---------------------------------------|---------------------|
//! | `<svc>`                               | current only        |
//! | `<svc>.<ns>`                          | all                 |
//! | `<svc>.<ns>.svc.<cluster-domain>`     | all                 |
//!
//! A Service resolves to its `ClusterIP`. Headless Services resolve to the IP of the
//! first selector-matched pod that has one; the pod name is recorded so pod changes
//! can trigger a rebuild.

use crate::cluster::{pod_ip, ClusterApi};
use crate::constants::HEADLESS_CLUSTER_IP;
use crate::errors::ClusterError;
use k8s_openapi::api::core::v1::Service;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Host name to IPv4 address, ordered for deterministic output.
pub type HostTable = BTreeMap<String, String>;

/// Names of pods backing headless Services in the current namespace.
pub type HeadlessPodSet = Vec<String>;

/// Whether the Service has no usable cluster IP.
#[must_use]
pub fn is_headless(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        .is_none_or(|ip| ip.is_empty() || ip == HEADLESS_CLUSTER_IP)
}

/// Insert the name variants of one Service.
pub fn add_service_entries(
    table: &mut HostTable,
    service_name: &str,
    namespace: &str,
    is_current_namespace: bool,
    cluster_domain: &str,
    ip: &str,
) {
    if is_current_namespace {
        table.insert(service_name.to_string(), ip.to_string());
    }
    table.insert(format!("{service_name}.{namespace}"), ip.to_string());
    table.insert(
        format!("{service_name}.{namespace}.svc.{cluster_domain}"),
        ip.to_string(),
    );
}

/// Resolve a headless Service to the IP of its first backing pod that has one.
///
/// Services without a selector are not backed by pods and resolve to nothing.
async fn resolve_headless(
    cluster: &dyn ClusterApi,
    service: &Service,
    namespace: &str,
) -> Result<Option<(String, String)>, ClusterError> {
    let Some(selector) = service
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .filter(|selector| !selector.is_empty())
    else {
        return Ok(None);
    };

    let pods = cluster.list_pods_by_label(selector, namespace).await?;
    Ok(pods.iter().find_map(|pod| {
        pod_ip(pod).map(|ip| (pod.metadata.name.clone().unwrap_or_default(), ip.to_string()))
    }))
}

/// Build the host table for `current_namespace` plus `extra_namespaces`.
///
/// Extra namespaces equal to the current one are ignored.
///
/// # Errors
///
/// Returns the first Service listing error; no partial table is produced. A headless
/// Service whose pods cannot be listed is skipped.
pub async fn build_host_table(
    cluster: &dyn ClusterApi,
    current_namespace: &str,
    extra_namespaces: &[String],
    cluster_domain: &str,
) -> Result<(HostTable, HeadlessPodSet), ClusterError> {
    let mut table = HostTable::new();
    let mut headless_pods = HeadlessPodSet::new();

    let mut namespaces = vec![current_namespace];
    for extra in extra_namespaces {
        if extra != current_namespace && !namespaces.contains(&extra.as_str()) {
            namespaces.push(extra.as_str());
        }
    }

    for namespace in namespaces {
        let is_current = namespace == current_namespace;
        for service in cluster.list_services(namespace).await? {
            let Some(name) = service.metadata.name.as_deref() else {
                continue;
            };

            let ip = if is_headless(&service) {
                match resolve_headless(cluster, &service, namespace).await {
                    Ok(Some((pod_name, ip))) => {
                        if is_current && !headless_pods.contains(&pod_name) {
                            headless_pods.push(pod_name);
                        }
                        ip
                    }
                    Ok(None) => {
                        debug!(service = %name, namespace = %namespace, "Headless service has no pod with an IP, skipping");
                        continue;
                    }
                    Err(e) => {
                        warn!(service = %name, namespace = %namespace, error = %e, "Failed to list pods of headless service, skipping");
                        continue;
                    }
                }
            } else {
                service
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.cluster_ip.clone())
                    .unwrap_or_default()
            };

            add_service_entries(&mut table, name, namespace, is_current, cluster_domain, &ip);
        }
    }

    debug!(entries = table.len(), headless_pods = headless_pods.len(), "Built host table");
    Ok((table, headless_pods))
}

#[cfg(test)]
#[path = "hosts_tests.rs"]
mod hosts_tests;
