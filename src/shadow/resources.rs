// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes resource builders for shadow workloads.
//!
//! A shadow consists of a single-container pod running sshd (and, for connect
//! sessions, an embedded resolver) plus a `ConfigMap` carrying the SSH key pair.
//! The public key is mounted as `authorized_keys`; the private key stays in the
//! `ConfigMap` so a later session can reuse a shared shadow.

use crate::constants::{
    DNS_PORT, SHADOW_CONTAINER_NAME, SSH_AUTHORIZED_KEYS_KEY, SSH_CONFIG_MAP_SUFFIX,
    SSH_MOUNT_PATH, SSH_PORT, SSH_PRIVATE_KEY_KEY,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, KeyToPath, Pod, PodSpec,
    Probe, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use tracing::debug;

/// Name of the SSH volume inside the shadow pod
const SSH_VOLUME_NAME: &str = "ssh-public-key";

/// Name of the `ConfigMap` holding a shadow's key pair.
#[must_use]
pub fn ssh_config_map_name(shadow_name: &str) -> String {
    format!("{shadow_name}-{SSH_CONFIG_MAP_SUFFIX}")
}

/// Build the `ConfigMap` carrying the shadow's SSH key pair.
#[must_use]
pub fn build_ssh_config_map(
    shadow_name: &str,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    public_key: &str,
    private_key: &str,
) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(SSH_AUTHORIZED_KEYS_KEY.to_string(), public_key.to_string());
    data.insert(SSH_PRIVATE_KEY_KEY.to_string(), private_key.to_string());

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(ssh_config_map_name(shadow_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Build the shadow pod.
///
/// Environment variables are emitted in key order so repeated builds are identical.
#[must_use]
pub fn build_shadow_pod(
    shadow_name: &str,
    namespace: &str,
    image: &str,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    envs: &BTreeMap<String, String>,
) -> Pod {
    debug!(name = %shadow_name, namespace = %namespace, image = %image, "Building shadow pod");

    let env = envs
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect::<Vec<_>>();

    let container = Container {
        name: SHADOW_CONTAINER_NAME.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: if env.is_empty() { None } else { Some(env) },
        ports: Some(vec![
            ContainerPort {
                name: Some("ssh".to_string()),
                container_port: i32::from(SSH_PORT),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("dns-tcp".to_string()),
                container_port: i32::from(DNS_PORT),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("dns-udp".to_string()),
                container_port: i32::from(DNS_PORT),
                protocol: Some("UDP".to_string()),
                ..Default::default()
            },
        ]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(i32::from(SSH_PORT)),
                ..Default::default()
            }),
            initial_delay_seconds: Some(1),
            period_seconds: Some(2),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: SSH_VOLUME_NAME.to_string(),
            mount_path: SSH_MOUNT_PATH.to_string(),
            sub_path: Some(SSH_AUTHORIZED_KEYS_KEY.to_string()),
            ..Default::default()
        }]),
        ..Default::default()
    };

    Pod {
        metadata: ObjectMeta {
            name: Some(shadow_name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels.clone()),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations.clone())
            },
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            restart_policy: Some("Always".to_string()),
            volumes: Some(vec![Volume {
                name: SSH_VOLUME_NAME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: ssh_config_map_name(shadow_name),
                    items: Some(vec![KeyToPath {
                        key: SSH_AUTHORIZED_KEYS_KEY.to_string(),
                        path: SSH_AUTHORIZED_KEYS_KEY.to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod resources_tests;
