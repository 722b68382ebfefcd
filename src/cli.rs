// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Command-line interface.
//!
//! The parsed [`Cli`] is converted once into immutable [`Options`]; nothing else in
//! the crate reads the command line.

use crate::constants::{DEFAULT_CLUSTER_DOMAIN, DEFAULT_SHADOW_IMAGE, DEFAULT_SOCKS_PORT};
use crate::context::{default_key_dir, ConnectOptions, MeshOptions, Options};
use crate::dns::DnsMode;
use crate::errors::ConfigError;
use crate::mesh::{parse_expose_list, MeshMethod};
use clap::{Parser, Subcommand};

/// Join a local workstation to a Kubernetes cluster network.
#[derive(Parser, Debug)]
#[command(name = "kubetunnel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Target namespace (defaults to the kubeconfig namespace).
    #[arg(short = 'n', long = "namespace", global = true)]
    pub namespace: Option<String>,

    /// Verbose logging, also enabled inside shadow pods.
    #[arg(long = "debug", global = true)]
    pub debug: bool,

    /// Shadow container image.
    #[arg(long = "image", global = true, default_value = DEFAULT_SHADOW_IMAGE)]
    pub image: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Reach cluster services from this machine through a SOCKS5 proxy.
    Connect {
        /// DNS strategy: hosts, hosts:<ns1,ns2>, pod-dns or local-dns.
        #[arg(long = "dns-mode", default_value = "hosts")]
        dns_mode: String,

        /// Cluster DNS domain.
        #[arg(long = "cluster-domain", default_value = DEFAULT_CLUSTER_DOMAIN)]
        cluster_domain: String,

        /// Reuse one shadow pod across sessions and keep it on exit.
        #[arg(long = "shared-shadow")]
        shared_shadow: bool,

        /// Local SOCKS5 port.
        #[arg(long = "socks-port", default_value_t = DEFAULT_SOCKS_PORT)]
        socks_port: u16,
    },

    /// Expose local ports as a routable version of a deployment.
    Mesh {
        /// Deployment to join.
        deployment: Option<String>,

        /// Ports to expose, `port` or `local:remote`, comma separated.
        #[arg(long = "expose", value_name = "PORTS")]
        expose: Option<String>,

        /// Version label value (random when omitted).
        #[arg(long = "version-mark", value_name = "VERSION")]
        version_mark: Option<String>,

        /// Mesh method: manual or auto.
        #[arg(long = "method", default_value = "manual")]
        method: String,
    },

    /// Forward a local port to a Service port.
    Forward {
        /// Service name, or an address.
        target: Option<String>,

        /// Local port to listen on.
        #[arg(long = "local-port")]
        local_port: u16,

        /// Service port to reach (defaults to the local port).
        #[arg(long = "remote-port")]
        remote_port: Option<u16>,
    },
}

impl Cli {
    /// Build [`Options`], falling back to `default_namespace` when none was given.
    ///
    /// # Errors
    ///
    /// Returns the first invalid DNS mode, mesh method or expose list.
    pub fn to_options(&self, default_namespace: &str) -> Result<Options, ConfigError> {
        let mut options = Options {
            namespace: self
                .namespace
                .clone()
                .unwrap_or_else(|| default_namespace.to_string()),
            debug: self.debug,
            image: self.image.clone(),
            key_dir: default_key_dir(),
            connect: ConnectOptions::default(),
            mesh: MeshOptions::default(),
        };

        match &self.command {
            Command::Connect {
                dns_mode,
                cluster_domain,
                shared_shadow,
                socks_port,
            } => {
                options.connect = ConnectOptions {
                    dns_mode: dns_mode.parse::<DnsMode>()?,
                    cluster_domain: cluster_domain.clone(),
                    shared_shadow: *shared_shadow,
                    socks_port: *socks_port,
                };
            }
            Command::Mesh {
                expose,
                version_mark,
                method,
                ..
            } => {
                options.mesh = MeshOptions {
                    expose: parse_expose_list(expose.as_deref().unwrap_or_default())?,
                    version: version_mark.clone(),
                    method: method.parse::<MeshMethod>()?,
                };
            }
            Command::Forward { .. } => {}
        }

        Ok(options)
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod cli_tests;
