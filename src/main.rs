// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use clap::Parser;
use kube::Client;
use kubetunnel::{
    cli::{Cli, Command},
    connect::connect,
    constants::TOKIO_WORKER_THREADS,
    context::Context,
    forward::forward,
    mesh::mesh,
};
use tracing::{debug, error, info};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("kubetunnel")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

/// Initialize logging.
///
/// Respects `RUST_LOG` if set, otherwise defaults to `info` (`debug` with `--debug`).
/// `RUST_LOG_FORMAT=json` switches to JSON output.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(cli: Cli) -> Result<()> {
    init_logging(cli.debug);
    debug!("Logging initialized with file and line number tracking");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default()
        .await
        .context("Failed to initialize Kubernetes client")?;
    let options = cli.to_options(client.default_namespace())?;
    info!(namespace = %options.namespace, "Kubernetes client initialized");

    let ctx = Context::new(client, options);
    let started = match &cli.command {
        Command::Connect { .. } => connect(&ctx).await,
        Command::Mesh { deployment, .. } => mesh(&ctx, deployment.as_deref()).await,
        Command::Forward {
            target,
            local_port,
            remote_port,
        } => {
            forward(
                &ctx,
                target.as_deref(),
                *local_port,
                remote_port.unwrap_or(*local_port),
            )
            .await
        }
    };
    let mut session = match started {
        Ok(session) => session,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Failed to start");
            return Err(e);
        }
    };

    let waited = session.wait().await;
    let cleaned = session.cleanup().await;
    if let Err(e) = &waited {
        error!(error = %format!("{e:#}"), "Session ended with error");
    }
    waited?;
    cleaned
}
