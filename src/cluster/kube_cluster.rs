// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`ClusterApi`] implementation backed by a `kube::Client`.

use super::pagination::{label_list_params, list_all_paginated};
use super::{label_selector, ClusterApi, WatchEvent, WatchStream};
use crate::errors::ClusterError;
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use kube::api::{DeleteParams, PostParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Cluster access through the Kubernetes API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an authenticated client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a create failure, turning HTTP 409 into [`ClusterError::AlreadyExists`].
fn create_error(error: kube::Error, kind: &str, name: &str, namespace: &str) -> ClusterError {
    match error {
        kube::Error::Api(ae) if ae.code == crate::constants::HTTP_CONFLICT => {
            ClusterError::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            }
        }
        other => ClusterError::Api(other),
    }
}

/// Map a delete result, treating HTTP 404 as success.
fn tolerate_missing<T>(result: Result<T, kube::Error>) -> Result<(), ClusterError> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == crate::constants::HTTP_NOT_FOUND => Ok(()),
        Err(e) => Err(ClusterError::Api(e)),
    }
}

fn watch_events<K>(api: Api<K>) -> WatchStream<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .filter_map(|event| async move {
            match event {
                Ok(Event::InitApply(obj)) => Some(WatchEvent::Initial(obj)),
                Ok(Event::Apply(obj)) => Some(WatchEvent::Applied(obj)),
                Ok(Event::Delete(obj)) => Some(WatchEvent::Deleted(obj)),
                Ok(Event::Init | Event::InitDone) => None,
                Err(e) => {
                    warn!(error = %e, "Watch stream error, retrying with backoff");
                    None
                }
            }
        })
        .boxed()
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_service(&self, name: &str, namespace: &str) -> Result<Service, ClusterError> {
        let api: Api<Service> = self.api(namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Service".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        let api: Api<Service> = self.api(namespace);
        Ok(list_all_paginated(&api, label_list_params("")).await?)
    }

    async fn list_pods_by_label(
        &self,
        selector: &BTreeMap<String, String>,
        namespace: &str,
    ) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = self.api(namespace);
        let selector = label_selector(selector);
        debug!(namespace = %namespace, selector = %selector, "Listing pods by label");
        Ok(list_all_paginated(&api, label_list_params(&selector)).await?)
    }

    async fn get_pod(&self, name: &str, namespace: &str) -> Result<Option<Pod>, ClusterError> {
        let api: Api<Pod> = self.api(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_pod(&self, pod: &Pod, namespace: &str) -> Result<Pod, ClusterError> {
        let api: Api<Pod> = self.api(namespace);
        let name = pod.metadata.name.clone().unwrap_or_default();
        api.create(&PostParams::default(), pod)
            .await
            .map_err(|e| create_error(e, "Pod", &name, namespace))
    }

    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        let api: Api<Pod> = self.api(namespace);
        tolerate_missing(api.delete(name, &DeleteParams::default()).await)
    }

    async fn get_config_map(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<ConfigMap>, ClusterError> {
        let api: Api<ConfigMap> = self.api(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(
        &self,
        config_map: &ConfigMap,
        namespace: &str,
    ) -> Result<ConfigMap, ClusterError> {
        let api: Api<ConfigMap> = self.api(namespace);
        let name = config_map.metadata.name.clone().unwrap_or_default();
        api.create(&PostParams::default(), config_map)
            .await
            .map_err(|e| create_error(e, "ConfigMap", &name, namespace))
    }

    async fn delete_config_map(&self, name: &str, namespace: &str) -> Result<(), ClusterError> {
        let api: Api<ConfigMap> = self.api(namespace);
        tolerate_missing(api.delete(name, &DeleteParams::default()).await)
    }

    async fn get_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, ClusterError> {
        let api: Api<Deployment> = self.api(namespace);
        api.get_opt(name)
            .await?
            .ok_or_else(|| ClusterError::NotFound {
                kind: "Deployment".to_string(),
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    fn watch_services(&self, namespace: &str) -> WatchStream<Service> {
        watch_events(self.api::<Service>(namespace))
    }

    fn watch_pods(&self, namespace: &str) -> WatchStream<Pod> {
        watch_events(self.api::<Pod>(namespace))
    }
}

#[cfg(test)]
#[path = "kube_cluster_tests.rs"]
mod kube_cluster_tests;
