// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for kubetunnel.
//!
//! Errors are split along the lines of who has to act on them:
//! - [`ConfigError`] - bad user input, surfaced before anything is created
//! - [`ClusterError`] - cluster topology does not match the request
//! - [`TransportError`] - the secured tunnel failed or was closed
//!
//! Watch-handler failures are not represented here; they are logged and swallowed
//! by the DNS engine.

use thiserror::Error;

/// Invalid configuration supplied on the command line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// DNS mode string did not match any known strategy
    #[error("invalid dns mode: '{mode}', supported modes are local-dns, pod-dns, hosts")]
    InvalidDnsMode {
        /// The rejected mode string
        mode: String,
    },

    /// Mesh method string did not match any known method
    #[error("invalid mesh method '{method}', supported methods are manual, auto")]
    InvalidMeshMethod {
        /// The rejected method string
        method: String,
    },

    /// Mesh invoked without any port to expose
    #[error("--expose is required")]
    MissingExposePorts,

    /// Mesh invoked without a deployment name
    #[error("name of deployment to mesh is required")]
    MissingDeployment,

    /// Port or port pair could not be parsed
    #[error("invalid port specification '{spec}', expected <port> or <local>:<remote>")]
    InvalidPortSpec {
        /// The rejected specification
        spec: String,
    },

    /// Redirect invoked without a target
    #[error("a service name or address to forward is required")]
    MissingRedirectTarget,

    /// Nothing listens locally on a port that should be exposed
    #[error("no application is running on port {port}")]
    NoLocalApplication {
        /// The local port that was probed
        port: u16,
    },

    /// Redirecting to an arbitrary address is not supported
    #[error("redirecting to an arbitrary address ('{address}') is not implemented")]
    AddressRedirectNotImplemented {
        /// The requested address
        address: String,
    },
}

/// Cluster state does not allow the requested operation.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// A named resource does not exist
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        /// Resource kind (e.g. `Service`)
        kind: String,
        /// Resource name
        name: String,
        /// Namespace searched
        namespace: String,
    },

    /// The object already exists (HTTP 409)
    #[error("{kind} '{name}' already exists in namespace '{namespace}'")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Namespace of the object
        namespace: String,
    },

    /// Service does not declare the requested port
    #[error("port {port} not available for service {service}")]
    PortNotAvailable {
        /// Requested Service port
        port: u16,
        /// Service name
        service: String,
    },

    /// Service has no backing pod
    #[error("no pod available for service {service}")]
    NoPodAvailable {
        /// Service name
        service: String,
    },

    /// Named target port did not match any container port on the selected pod
    #[error("port {port} not fit for any pod of service {service}")]
    PortNotFit {
        /// Requested Service port
        port: u16,
        /// Service name
        service: String,
    },

    /// Shadow pod did not become ready within the bounded wait
    #[error("shadow pod '{name}' not ready after {timeout_secs}s")]
    ShadowNotReady {
        /// Shadow pod name
        name: String,
        /// Timeout that elapsed
        timeout_secs: u64,
    },

    /// Shadow pod became ready without an IP or lost its SSH material
    #[error("shadow pod '{name}' is unusable: {reason}")]
    ShadowUnusable {
        /// Shadow pod name
        name: String,
        /// Explanation
        reason: String,
    },

    /// Underlying Kubernetes API failure
    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),

    /// Local filesystem failure while provisioning keys
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the secured tunnel.
#[derive(Error, Debug)]
pub enum TransportError {
    /// TCP/SSH connection could not be established
    #[error("failed to connect to {address}: {reason}")]
    ConnectFailed {
        /// Remote SSH address
        address: String,
        /// Reason reported by the transport
        reason: String,
    },

    /// Remote side rejected the credential
    #[error("authentication rejected by {address} for user '{user}'")]
    AuthRejected {
        /// Remote SSH address
        address: String,
        /// Principal that was rejected
        user: String,
    },

    /// Private key could not be loaded
    #[error("failed to load private key '{path}': {reason}")]
    InvalidKey {
        /// Key path
        path: String,
        /// Reason
        reason: String,
    },

    /// Opening a channel or requesting a remote listener failed
    #[error("channel request to {target} failed: {reason}")]
    ChannelFailed {
        /// Requested target or listener
        target: String,
        /// Reason
        reason: String,
    },

    /// Secured connection dropped while the tunnel was running
    #[error("connection to {address} closed")]
    ConnectionClosed {
        /// Remote SSH address
        address: String,
    },

    /// Local listener could not be bound
    #[error("failed to listen on {address}: {source}")]
    ListenFailed {
        /// Local listen address
        address: String,
        /// I/O source
        #[source]
        source: std::io::Error,
    },

    /// Malformed endpoint string
    #[error("invalid endpoint '{endpoint}', expected <host>:<port>")]
    InvalidEndpoint {
        /// Rejected endpoint
        endpoint: String,
    },

    /// SOCKS5 client spoke something other than SOCKS5
    #[error("socks5 protocol error: {0}")]
    Socks(String),

    /// Generic I/O failure on a proxied stream
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClusterError {
    /// Whether this error reports an object that already exists.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            ClusterError::AlreadyExists { .. } => true,
            ClusterError::Api(kube::Error::Api(ae)) => {
                ae.code == crate::constants::HTTP_CONFLICT
            }
            _ => false,
        }
    }

    /// Whether this error reports a missing object.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound { .. } => true,
            ClusterError::Api(kube::Error::Api(ae)) => {
                ae.code == crate::constants::HTTP_NOT_FOUND
            }
            _ => false,
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
