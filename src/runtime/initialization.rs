//! # Initialization
//!
//! Process setup before the control loop starts: rustls crypto provider,
//! tracing, metrics registration, the probe server and the Kubernetes client.

use crate::config::ControllerConfig;
use crate::observability;
use crate::server::{start_server, ServerState};
use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Everything the watch loop needs to run the controller
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    pub server_state: Arc<ServerState>,
    /// Cancelled on shutdown; stops the controller and the probe server
    pub shutdown: CancellationToken,
    pub server_handle: JoinHandle<()>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // must happen before any TLS connection is opened
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|existing| {
            anyhow!(
                "Failed to install rustls crypto provider, one with {} cipher suites is already installed",
                existing.cipher_suites.len()
            )
        })?;

    observability::init_tracing(config.log_format)?;

    info!("Starting Astro controller");
    info!(
        workers = config.worker_count,
        namespace = config.watch_namespace.as_deref().unwrap_or("<all>"),
        finalizer = %config.finalizer,
        "configuration loaded"
    );

    observability::metrics::register_metrics().context("Failed to register metrics")?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });
    let shutdown = CancellationToken::new();

    let server_handle = {
        let state = Arc::clone(&server_state);
        let shutdown = shutdown.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    Ok(InitializationResult {
        client,
        config,
        server_state,
        shutdown,
        server_handle,
    })
}
