// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # kubetunnel - cluster network access for a local workstation
//!
//! kubetunnel makes a local machine behave as if it were inside a Kubernetes cluster
//! network, and lets cluster traffic reach a process running locally. Everything runs
//! through short-lived "shadow" pods that terminate an SSH tunnel inside the cluster.
//!
//! ## Modules
//!
//! - [`tunnel`] - SSH channel to a shadow: SOCKS5 proxy and remote-to-local forwarding
//! - [`shadow`] - create, reuse and remove shadow pods and their key material
//! - [`dns`] - hosts-file, pod-dns and local-dns name resolution strategies
//! - [`connect`], [`mesh`], [`forward`] - the three user-facing operations
//! - [`session`] - lifecycle and cleanup of everything an operation created
//! - [`cluster`] - the Kubernetes API surface used by all of the above
//!
//! ## Example
//!
//! ```rust,no_run
//! use kubetunnel::context::{Context, Options};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let client = kube::Client::try_default().await?;
//! let ctx = Context::new(client, Options::default());
//! let mut session = kubetunnel::connect::connect(&ctx).await?;
//! session.wait().await?;
//! session.cleanup().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod cluster;
pub mod connect;
pub mod constants;
pub mod context;
pub mod dns;
pub mod errors;
pub mod forward;
pub mod labels;
pub mod mesh;
pub mod session;
pub mod shadow;
pub mod tunnel;

#[cfg(test)]
pub(crate) mod testing;
