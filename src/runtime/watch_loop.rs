//! # Watch Loop
//!
//! Runs the `Astro` controller against the cluster until a shutdown signal
//! arrives, then drains the workers and stops the probe server.

use super::initialization::InitializationResult;
use super::policy::AstroPolicy;
use crate::controller::Controller;
use crate::crd::Astro;
use crate::store::k8s::KubeBackend;
use anyhow::{Context, Result};
use kube::api::Api;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{error, info};

pub async fn run_watch_loop(init: InitializationResult) -> Result<()> {
    let InitializationResult {
        client,
        config,
        server_state,
        shutdown,
        server_handle,
    } = init;

    let api: Api<Astro> = match &config.watch_namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let (store, source) = KubeBackend::new(client, api, watcher::Config::default());

    let workers = config.worker_count;
    let controller = Controller::new(
        config,
        Arc::new(store),
        Arc::new(source),
        Arc::new(AstroPolicy),
    )
    .with_readiness(Arc::clone(&server_state.is_ready));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal, initiating graceful shutdown..."),
                Err(e) => error!("Failed to listen for shutdown signal: {}", e),
            }
            shutdown.cancel();
        });
    }

    let result = controller
        .run(workers, shutdown.clone())
        .await
        .context("Controller stopped with an error");

    // stop the probe server whether the controller failed or drained cleanly
    shutdown.cancel();
    if let Err(e) = server_handle.await {
        error!("HTTP server task failed: {}", e);
    }

    result
}
