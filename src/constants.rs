//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Finalizer owned by this controller
pub const ASTRO_FINALIZER: &str = "astros.astertower.kasterism.io";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default number of concurrent reconcile workers
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default time to wait for the initial cache sync before giving up (seconds)
pub const DEFAULT_CACHE_SYNC_TIMEOUT_SECS: u64 = 60;

/// Default interval between cache sync checks (milliseconds)
pub const DEFAULT_CACHE_SYNC_POLL_INTERVAL_MS: u64 = 100;

/// Default per-key backoff base delay (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;

/// Default per-key backoff ceiling (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 1000;

/// Default overall requeue rate (events per second)
pub const DEFAULT_RATE_LIMIT_QPS: f64 = 10.0;

/// Default overall requeue burst size
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 100;

/// Name of the work queue, used in logs
pub const QUEUE_NAME: &str = "astro";
