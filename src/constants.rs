// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for kubetunnel.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Shadow Workload Constants
// ============================================================================

/// Name prefix for connect shadow pods
pub const SHADOW_NAME_PREFIX: &str = "kt-tunnel-shadow";

/// Fixed suffix used when the shadow is shared across sessions
pub const SHARED_SHADOW_SUFFIX: &str = "daemon";

/// Infix between a deployment name and the mesh version (`<deployment>-kt-<version>`)
pub const MESH_NAME_INFIX: &str = "kt";

/// Length of the random suffix for exclusive shadow names and mesh versions
pub const RANDOM_SUFFIX_LEN: usize = 5;

/// Default shadow container image (runs sshd plus an embedded resolver)
pub const DEFAULT_SHADOW_IMAGE: &str = "kt-tunnel/shadow:stable";

/// Name of the shadow container inside the pod
pub const SHADOW_CONTAINER_NAME: &str = "shadow";

/// Suffix appended to the shadow name for its SSH `ConfigMap`
pub const SSH_CONFIG_MAP_SUFFIX: &str = "ssh";

/// `ConfigMap` key holding the authorized public key
pub const SSH_AUTHORIZED_KEYS_KEY: &str = "authorized";

/// `ConfigMap` key holding the private key so shared sessions can reuse it
pub const SSH_PRIVATE_KEY_KEY: &str = "privateKey";

/// Mount path of the SSH `ConfigMap` inside the shadow container
pub const SSH_MOUNT_PATH: &str = "/root/.ssh/authorized_keys";

/// SSH user inside the shadow container
pub const SSH_USER: &str = "root";

/// SSH port exposed by the shadow container
pub const SSH_PORT: u16 = 22;

/// Maximum time to wait for a shadow pod to become ready
pub const SHADOW_READY_TIMEOUT_SECS: u64 = 60;

/// Interval between shadow readiness polls
pub const SHADOW_READY_POLL_INTERVAL_MILLIS: u64 = 1000;

/// Directory under the home directory where private keys are written
pub const LOCAL_KEY_DIR: &str = ".kt-tunnel/pk";

// ============================================================================
// Shadow Environment Contract
// ============================================================================

/// Environment variable carrying the local search domains
pub const ENV_LOCAL_DOMAINS: &str = "KT_LOCAL_DOMAINS";

/// Environment variable selecting the DNS transport protocol (`tcp` or `udp`)
pub const ENV_DNS_PROTOCOL: &str = "KT_DNS_PROTOCOL";

/// Environment variable selecting the shadow log level (`debug` or `info`)
pub const ENV_LOG_LEVEL: &str = "KT_LOG_LEVEL";

// ============================================================================
// DNS Constants
// ============================================================================

/// Standard DNS port
pub const DNS_PORT: u16 = 53;

/// Alternate port for the local resolver where a platform resolver owns port 53
pub const ALTERNATIVE_DNS_PORT: u16 = 10053;

/// Default Kubernetes cluster domain
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// `ClusterIP` sentinel value for headless Services
pub const HEADLESS_CLUSTER_IP: &str = "None";

/// Settling window after a Service watch starts, during which events are ignored
pub const DNS_WATCH_SETTLE_SECS: u64 = 3;

/// Delay before rebuilding after a headless-backing pod changes
pub const HEADLESS_POD_REBUILD_DELAY_SECS: u64 = 5;

/// TTL for answers served by the local resolver
pub const LOCAL_DNS_TTL_SECS: u32 = 5;

/// Timeout for forwarded DNS queries
pub const DNS_FORWARD_TIMEOUT_SECS: u64 = 3;

/// Maximum size of a UDP DNS message
pub const DNS_UDP_BUFFER_SIZE: usize = 4096;

/// Loopback address the local resolver binds to
pub const LOCALHOST: &str = "127.0.0.1";

// ============================================================================
// Tunnel Constants
// ============================================================================

/// Default local SOCKS5 listen port
pub const DEFAULT_SOCKS_PORT: u16 = 2223;

/// How often the proxy loop checks whether the SSH connection is still alive
pub const TUNNEL_HEALTH_CHECK_INTERVAL_SECS: u64 = 2;

/// Pause after a failed `accept` before trying again
pub const ACCEPT_ERROR_BACKOFF_MILLIS: u64 = 100;

/// Timeout when probing whether a local application listens on a port
pub const LOCAL_PORT_PROBE_TIMEOUT_MILLIS: u64 = 500;

/// How long cleanup waits for a background task to stop before aborting it
pub const CLEANUP_TASK_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Kubernetes API Constants
// ============================================================================

/// Page size for Kubernetes list operations
pub const KUBE_LIST_PAGE_SIZE: u32 = 100;

/// HTTP status returned by the API server for an existing object
pub const HTTP_CONFLICT: u16 = 409;

/// HTTP status returned by the API server for a missing object
pub const HTTP_NOT_FOUND: u16 = 404;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
