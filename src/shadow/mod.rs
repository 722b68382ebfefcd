// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shadow workload management.
//!
//! A shadow is an ephemeral pod that terminates the secured tunnel inside the cluster.
//! [`ShadowManager::get_or_create_shadow`] is idempotent per name: an existing pod with
//! matching labels is reused, otherwise the SSH `ConfigMap` and pod are created. Both
//! creates treat "already exists" as success so concurrent sessions requesting the same
//! shared shadow converge on a single pod.
//!
//! The private key is always read back from the `ConfigMap` after creation, which makes
//! the `ConfigMap` the single source of truth when two sessions race.

pub mod keys;
pub mod resources;

use crate::cluster::{is_pod_ready, labels_match, pod_ip, ClusterApi};
use crate::constants::{
    ENV_DNS_PROTOCOL, ENV_LOCAL_DOMAINS, ENV_LOG_LEVEL, RANDOM_SUFFIX_LEN,
    SHADOW_NAME_PREFIX, SHADOW_READY_POLL_INTERVAL_MILLIS, SHADOW_READY_TIMEOUT_SECS,
    SHARED_SHADOW_SUFFIX, SSH_PORT, SSH_PRIVATE_KEY_KEY, SSH_USER,
};
use crate::context::Context;
use crate::dns::DnsMode;
use crate::errors::ClusterError;
use crate::labels::{CONTROL_BY, KT_ROLE, KUBERNETES_TOOLKIT, ROLE_CONNECT_SHADOW};
use crate::tunnel::Credential;
use k8s_openapi::api::core::v1::Pod;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything a session needs to reach and later remove a shadow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShadowIdentity {
    /// Shadow pod name
    pub name: String,
    /// Namespace of the pod
    pub namespace: String,
    /// Pod IP at the time the shadow became ready
    pub pod_ip: String,
    /// Path of the local private key file
    pub private_key_path: PathBuf,
    /// `ConfigMap` holding the SSH key pair
    pub config_map_name: String,
    /// Shared shadows outlive the session
    pub shared: bool,
}

impl ShadowIdentity {
    /// `ip:port` of the shadow's SSH server.
    #[must_use]
    pub fn ssh_address(&self) -> String {
        format!("{}:{SSH_PORT}", self.pod_ip)
    }

    /// Credential for the shadow's SSH server.
    #[must_use]
    pub fn credential(&self) -> Credential {
        Credential::with_private_key(SSH_USER, self.private_key_path.clone())
    }
}

/// Lowercase alphanumeric suffix of [`RANDOM_SUFFIX_LEN`] characters.
#[must_use]
pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Name of the connect shadow: deterministic when shared, random otherwise.
#[must_use]
pub fn connect_shadow_name(shared: bool) -> String {
    if shared {
        format!("{SHADOW_NAME_PREFIX}-{SHARED_SHADOW_SUFFIX}")
    } else {
        format!("{SHADOW_NAME_PREFIX}-{}", random_suffix())
    }
}

/// Labels carried by every connect shadow.
#[must_use]
pub fn connect_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        (CONTROL_BY.to_string(), KUBERNETES_TOOLKIT.to_string()),
        (KT_ROLE.to_string(), ROLE_CONNECT_SHADOW.to_string()),
    ])
}

/// Environment passed to a connect shadow.
#[must_use]
pub fn connect_envs(
    local_domains: Option<&str>,
    dns_mode: &DnsMode,
    debug: bool,
) -> BTreeMap<String, String> {
    let mut envs = BTreeMap::new();
    if let Some(domains) = local_domains.filter(|d| !d.is_empty()) {
        envs.insert(ENV_LOCAL_DOMAINS.to_string(), domains.to_string());
    }
    let protocol = if matches!(dns_mode, DnsMode::LocalDns) {
        "tcp"
    } else {
        "udp"
    };
    envs.insert(ENV_DNS_PROTOCOL.to_string(), protocol.to_string());
    let level = if debug { "debug" } else { "info" };
    envs.insert(ENV_LOG_LEVEL.to_string(), level.to_string());
    envs
}

/// Creates, reuses and removes shadow workloads in one namespace.
pub struct ShadowManager {
    cluster: Arc<dyn ClusterApi>,
    namespace: String,
    image: String,
    key_dir: PathBuf,
    ready_timeout: Duration,
    poll_interval: Duration,
}

impl ShadowManager {
    #[must_use]
    pub fn new(ctx: &Context) -> Self {
        Self {
            cluster: ctx.cluster.clone(),
            namespace: ctx.options.namespace.clone(),
            image: ctx.options.image.clone(),
            key_dir: ctx.options.key_dir.clone(),
            ready_timeout: Duration::from_secs(SHADOW_READY_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(SHADOW_READY_POLL_INTERVAL_MILLIS),
        }
    }

    /// Override the readiness wait.
    #[must_use]
    pub fn with_ready_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.ready_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Return a ready shadow named `name`, creating it if needed.
    ///
    /// A non-shared shadow created by this call is deleted again when it never becomes
    /// usable.
    ///
    /// # Errors
    ///
    /// Fails when a same-named pod carries foreign labels, when creation fails for any
    /// reason other than "already exists", or when the pod is not ready in time.
    pub async fn get_or_create_shadow(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
        envs: &BTreeMap<String, String>,
        shared: bool,
    ) -> Result<ShadowIdentity, ClusterError> {
        let created = match self.cluster.get_pod(name, &self.namespace).await? {
            Some(existing) => {
                let existing_labels = existing.metadata.labels.clone().unwrap_or_default();
                if !labels_match(labels, &existing_labels) {
                    return Err(ClusterError::ShadowUnusable {
                        name: name.to_string(),
                        reason: "a pod with this name exists but was not created as a shadow"
                            .to_string(),
                    });
                }
                info!(name = %name, namespace = %self.namespace, "Reusing existing shadow pod");
                false
            }
            None => true,
        };

        let prepared = async {
            if created {
                self.create_shadow(name, labels, annotations, envs).await?;
            }
            self.prepare_identity(name, shared).await
        }
        .await;

        match prepared {
            Err(e) if created && !shared => {
                self.discard_shadow(name).await;
                Err(e)
            }
            other => other,
        }
    }

    async fn prepare_identity(
        &self,
        name: &str,
        shared: bool,
    ) -> Result<ShadowIdentity, ClusterError> {
        let pod = self.wait_until_ready(name).await?;
        let pod_ip = pod_ip(&pod)
            .ok_or_else(|| ClusterError::ShadowUnusable {
                name: name.to_string(),
                reason: "pod is ready but has no IP".to_string(),
            })?
            .to_string();

        let config_map_name = resources::ssh_config_map_name(name);
        let private_key = self.read_private_key(name, &config_map_name).await?;
        let private_key_path = keys::write_private_key(&self.key_dir, name, &private_key)?;

        info!(name = %name, pod_ip = %pod_ip, shared, "Shadow pod ready");
        Ok(ShadowIdentity {
            name: name.to_string(),
            namespace: self.namespace.clone(),
            pod_ip,
            private_key_path,
            config_map_name,
            shared,
        })
    }

    /// Best-effort removal of a shadow that failed to start.
    async fn discard_shadow(&self, name: &str) {
        warn!(name = %name, namespace = %self.namespace, "Shadow failed to start, removing it");
        if let Err(e) = self.cluster.delete_pod(name, &self.namespace).await {
            warn!(name = %name, error = %e, "Failed to delete shadow pod");
        }
        let config_map_name = resources::ssh_config_map_name(name);
        if let Err(e) = self
            .cluster
            .delete_config_map(&config_map_name, &self.namespace)
            .await
        {
            warn!(name = %config_map_name, error = %e, "Failed to delete SSH ConfigMap");
        }
    }

    async fn create_shadow(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
        envs: &BTreeMap<String, String>,
    ) -> Result<(), ClusterError> {
        let key_pair = keys::generate_key_pair(name)?;
        let config_map = resources::build_ssh_config_map(
            name,
            &self.namespace,
            labels,
            &key_pair.public_key,
            &key_pair.private_key,
        );
        match self
            .cluster
            .create_config_map(&config_map, &self.namespace)
            .await
        {
            Err(e) if e.is_already_exists() => {
                debug!(name = %name, "SSH ConfigMap already exists, reusing it");
            }
            other => {
                other?;
            }
        }

        let pod =
            resources::build_shadow_pod(name, &self.namespace, &self.image, labels, annotations, envs);
        match self.cluster.create_pod(&pod, &self.namespace).await {
            Err(e) if e.is_already_exists() => {
                debug!(name = %name, "Shadow pod already exists, waiting for it");
            }
            other => {
                other?;
                info!(name = %name, namespace = %self.namespace, "Created shadow pod");
            }
        }
        Ok(())
    }

    async fn read_private_key(
        &self,
        name: &str,
        config_map_name: &str,
    ) -> Result<String, ClusterError> {
        self.cluster
            .get_config_map(config_map_name, &self.namespace)
            .await?
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(SSH_PRIVATE_KEY_KEY))
            .ok_or_else(|| ClusterError::ShadowUnusable {
                name: name.to_string(),
                reason: format!("ConfigMap '{config_map_name}' holds no private key"),
            })
    }

    async fn wait_until_ready(&self, name: &str) -> Result<Pod, ClusterError> {
        tokio::time::timeout(self.ready_timeout, self.poll_until_ready(name))
            .await
            .map_err(|_| ClusterError::ShadowNotReady {
                name: name.to_string(),
                timeout_secs: self.ready_timeout.as_secs(),
            })?
    }

    async fn poll_until_ready(&self, name: &str) -> Result<Pod, ClusterError> {
        loop {
            if let Some(pod) = self.cluster.get_pod(name, &self.namespace).await? {
                if is_pod_ready(&pod) {
                    return Ok(pod);
                }
            }
            debug!(name = %name, "Waiting for shadow pod to become ready");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Delete the shadow pod, its `ConfigMap` and the local key file.
    ///
    /// Shared shadows are left untouched. Missing objects count as removed.
    ///
    /// # Errors
    ///
    /// Returns the first cluster error; the local key file is removed regardless.
    pub async fn remove_shadow(&self, identity: &ShadowIdentity) -> Result<(), ClusterError> {
        if identity.shared {
            info!(name = %identity.name, "Keeping shared shadow pod");
            return Ok(());
        }

        if let Err(e) = keys::remove_private_key(&identity.private_key_path) {
            warn!(path = %identity.private_key_path.display(), error = %e, "Failed to remove private key");
        }

        self.cluster
            .delete_pod(&identity.name, &identity.namespace)
            .await?;
        self.cluster
            .delete_config_map(&identity.config_map_name, &identity.namespace)
            .await?;
        info!(name = %identity.name, namespace = %identity.namespace, "Removed shadow pod");
        Ok(())
    }
}
