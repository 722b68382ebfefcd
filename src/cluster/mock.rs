// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory [`ClusterApi`] used by unit tests.

use super::{labels_match, ClusterApi, WatchEvent, WatchStream};
use crate::errors::ClusterError;
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, ContainerPort, Pod, PodCondition, PodSpec, PodStatus, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    services: Vec<Service>,
    pods: Vec<Pod>,
    config_maps: Vec<ConfigMap>,
    deployments: Vec<Deployment>,
    service_watchers: Vec<UnboundedSender<WatchEvent<Service>>>,
    pod_watchers: Vec<UnboundedSender<WatchEvent<Pod>>>,
    next_ip: u8,
    created_pods: usize,
    deleted_pods: Vec<String>,
    deleted_config_maps: Vec<String>,
    list_service_calls: usize,
    fail_list_services: bool,
    fail_pod_selector: Option<(String, String)>,
    never_ready: bool,
}

/// Test double recording every mutation.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<State>,
}

fn namespace_of(meta: &ObjectMeta) -> &str {
    meta.namespace.as_deref().unwrap_or("default")
}

fn name_of(meta: &ObjectMeta) -> &str {
    meta.name.as_deref().unwrap_or_default()
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_service(&self, service: Service) {
        self.state().services.push(service);
    }

    pub fn add_pod(&self, pod: Pod) {
        self.state().pods.push(pod);
    }

    pub fn add_deployment(&self, deployment: Deployment) {
        self.state().deployments.push(deployment);
    }

    pub fn add_config_map(&self, config_map: ConfigMap) {
        self.state().config_maps.push(config_map);
    }

    /// Pods created through the API stay pending forever.
    pub fn set_never_ready(&self) {
        self.state().never_ready = true;
    }

    /// Make Service listing fail until cleared.
    pub fn set_fail_list_services(&self, fail: bool) {
        self.state().fail_list_services = fail;
    }

    /// Make pod listing fail for selectors carrying `key=value`.
    pub fn set_fail_list_pods(&self, key: &str, value: &str) {
        self.state().fail_pod_selector = Some((key.to_string(), value.to_string()));
    }

    pub fn created_pods(&self) -> usize {
        self.state().created_pods
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.state().deleted_pods.clone()
    }

    pub fn deleted_config_maps(&self) -> Vec<String> {
        self.state().deleted_config_maps.clone()
    }

    pub fn list_service_calls(&self) -> usize {
        self.state().list_service_calls
    }

    pub fn pod_names(&self) -> Vec<String> {
        self.state()
            .pods
            .iter()
            .map(|p| name_of(&p.metadata).to_string())
            .collect()
    }

    pub fn config_map(&self, name: &str) -> Option<ConfigMap> {
        self.state()
            .config_maps
            .iter()
            .find(|c| name_of(&c.metadata) == name)
            .cloned()
    }

    pub fn emit_service(&self, event: WatchEvent<Service>) {
        self.state()
            .service_watchers
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    pub fn emit_pod(&self, event: WatchEvent<Pod>) {
        self.state()
            .pod_watchers
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }

    pub fn service_watchers(&self) -> usize {
        self.state().service_watchers.len()
    }

    pub fn pod_watchers(&self) -> usize {
        self.state().pod_watchers.len()
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Service, ClusterError> {
        self.state()
            .services
            .iter()
            .find(|s| name_of(&s.metadata) == name && namespace_of(&s.metadata) == namespace)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Service".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        let mut state = self.state();
        state.list_service_calls += 1;
        if state.fail_list_services {
            return Err(ClusterError::Io(std::io::Error::other("list services failed")));
        }
        Ok(state
            .services
            .iter()
            .filter(|s| namespace_of(&s.metadata) == namespace)
            .cloned()
            .collect())
    }

    async fn list_pods_by_label(
        &self,
        selector: &BTreeMap<String, String>,
        namespace: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        let state = self.state();
        if let Some((key, value)) = &state.fail_pod_selector {
            if selector.get(key) == Some(value) {
                return Err(ClusterError::Io(std::io::Error::other("list pods failed")));
            }
        }
        Ok(state
            .pods
            .iter()
            .filter(|p| namespace_of(&p.metadata) == namespace)
            .filter(|p| labels_match(selector, p.metadata.labels.as_ref().unwrap_or(&BTreeMap::new())))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Option<Pod>, ClusterError> {
        Ok(self
            .state()
            .pods
            .iter()
            .find(|p| name_of(&p.metadata) == name && namespace_of(&p.metadata) == namespace)
            .cloned())
    }

    async fn create_pod(&self, pod: &Pod, namespace: &str) -> Result<Pod, ClusterError> {
        let mut state = self.state();
        let name = name_of(&pod.metadata).to_string();
        if state
            .pods
            .iter()
            .any(|p| name_of(&p.metadata) == name && namespace_of(&p.metadata) == namespace)
        {
            return Err(ClusterError::AlreadyExists {
                kind: "Pod".to_string(),
                name,
                namespace: namespace.to_string(),
            });
        }

        state.next_ip += 1;
        let mut created = pod.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.status = if state.never_ready {
            Some(PodStatus {
                phase: Some("Pending".to_string()),
                ..Default::default()
            })
        } else {
            Some(ready_status(&format!("10.244.0.{}", state.next_ip)))
        };
        state.created_pods += 1;
        state.pods.push(created.clone());
        Ok(created)
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        state
            .pods
            .retain(|p| !(name_of(&p.metadata) == name && namespace_of(&p.metadata) == namespace));
        state.deleted_pods.push(name.to_string());
        Ok(())
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, ClusterError> {
        Ok(self
            .state()
            .config_maps
            .iter()
            .find(|c| name_of(&c.metadata) == name && namespace_of(&c.metadata) == namespace)
            .cloned())
    }

    async fn create_config_map(
        &self,
        config_map: &ConfigMap,
        namespace: &str,
    ) -> Result<ConfigMap, ClusterError> {
        let mut state = self.state();
        let name = name_of(&config_map.metadata).to_string();
        if state
            .config_maps
            .iter()
            .any(|c| name_of(&c.metadata) == name && namespace_of(&c.metadata) == namespace)
        {
            return Err(ClusterError::AlreadyExists {
                kind: "ConfigMap".to_string(),
                name,
                namespace: namespace.to_string(),
            });
        }
        let mut created = config_map.clone();
        created.metadata.namespace = Some(namespace.to_string());
        state.config_maps.push(created.clone());
        Ok(created)
    }

    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        let mut state = self.state();
        state
            .config_maps
            .retain(|c| !(name_of(&c.metadata) == name && namespace_of(&c.metadata) == namespace));
        state.deleted_config_maps.push(name.to_string());
        Ok(())
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, ClusterError> {
        self.state()
            .deployments
            .iter()
            .find(|d| name_of(&d.metadata) == name && namespace_of(&d.metadata) == namespace)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Deployment".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    fn watch_services(&self, _namespace: &str) -> WatchStream<Service> {
        let (tx, rx) = unbounded();
        self.state().service_watchers.push(tx);
        rx.boxed()
    }

    fn watch_pods(&self, _namespace: &str) -> WatchStream<Pod> {
        let (tx, rx) = unbounded();
        self.state().pod_watchers.push(tx);
        rx.boxed()
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn ready_status(ip: &str) -> PodStatus {
    PodStatus {
        phase: Some("Running".to_string()),
        pod_ip: Some(ip.to_string()),
        conditions: Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// A Service with a cluster IP (`"None"` for headless), selector and ports.
pub fn service(
    name: &str,
    namespace: &str,
    cluster_ip: Option<&str>,
    selector: &[(&str, &str)],
    ports: &[(i32, IntOrString)],
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            cluster_ip: cluster_ip.map(str::to_string),
            selector: if selector.is_empty() {
                None
            } else {
                Some(labels(selector))
            },
            ports: Some(
                ports
                    .iter()
                    .map(|(port, target)| ServicePort {
                        port: *port,
                        target_port: Some(target.clone()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A ready pod with labels, an optional IP and named container ports.
pub fn pod(
    name: &str,
    namespace: &str,
    pod_labels: &[(&str, &str)],
    ip: Option<&str>,
    container_ports: &[(&str, i32)],
) -> Pod {
    let mut status = ready_status(ip.unwrap_or_default());
    if ip.is_none() {
        status.pod_ip = None;
    }
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels(pod_labels)),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "app".to_string(),
                ports: Some(
                    container_ports
                        .iter()
                        .map(|(port_name, port)| ContainerPort {
                            name: Some((*port_name).to_string()),
                            container_port: *port,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(status),
    }
}

/// A Deployment with the given pod selector labels.
pub fn deployment(name: &str, namespace: &str, selector: &[(&str, &str)]) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels(selector)),
                ..Default::default()
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
