//! # Astro Controller
//!
//! Watches `Astro` resources and manages their finalizer lifecycle.
//!
//! ## Usage
//!
//! ```bash
//! astro-controller --workers 4 --namespace default
//! ```
//!
//! Every flag can also be set through the environment; see
//! [`astro_controller::config::ControllerConfig`] for the full list.

use anyhow::Result;
use astro_controller::config::{ControllerConfig, LogFormat};
use astro_controller::runtime::{initialize, run_watch_loop};
use clap::Parser;

/// Astro resource controller
#[derive(Debug, Parser)]
#[command(name = "astro-controller", version, about)]
struct Args {
    /// Number of concurrent reconcile workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Only watch this namespace (defaults to all namespaces)
    #[arg(short, long)]
    namespace: Option<String>,

    /// Port for /metrics, /healthz and /readyz
    #[arg(long)]
    metrics_port: Option<u16>,

    /// Log output format (text or json)
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Args {
    fn apply(self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(workers) = self.workers {
            config.worker_count = workers;
        }
        if let Some(namespace) = self.namespace {
            config.watch_namespace = Some(namespace);
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().apply(ControllerConfig::from_env());
    let init = initialize(config).await?;
    run_watch_loop(init).await
}
