//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use crate::constants::{
    ASTRO_FINALIZER, DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_SECS,
    DEFAULT_CACHE_SYNC_POLL_INTERVAL_MS, DEFAULT_CACHE_SYNC_TIMEOUT_SECS, DEFAULT_METRICS_PORT,
    DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_QPS, DEFAULT_WORKER_COUNT,
};
use std::str::FromStr;
use std::time::Duration;

/// Per-key backoff progression used for rate-limited requeues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffStrategy {
    /// base, 2*base, 4*base, ... capped at the maximum
    #[default]
    Exponential,
    /// base, base, 2*base, 3*base, 5*base, ... capped at the maximum
    Fibonacci,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(Self::Exponential),
            "fibonacci" => Ok(Self::Fibonacci),
            other => Err(format!("unknown backoff strategy: {other}")),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Number of concurrent reconcile workers
    pub worker_count: usize,
    /// How long to wait for the initial cache sync (seconds)
    pub cache_sync_timeout_secs: u64,
    /// Interval between cache sync checks (milliseconds)
    pub cache_sync_poll_interval_ms: u64,
    /// First per-key retry delay (milliseconds)
    pub backoff_base_ms: u64,
    /// Ceiling for per-key retry delay (seconds)
    pub backoff_max_secs: u64,
    /// Per-key backoff progression
    pub backoff_strategy: BackoffStrategy,
    /// Overall requeue rate across all keys
    pub rate_limit_qps: f64,
    /// Overall requeue burst size
    pub rate_limit_burst: u32,
    /// Finalizer owned by this controller
    pub finalizer: String,
    /// Namespace to watch; `None` watches all namespaces
    pub watch_namespace: Option<String>,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            cache_sync_timeout_secs: DEFAULT_CACHE_SYNC_TIMEOUT_SECS,
            cache_sync_poll_interval_ms: DEFAULT_CACHE_SYNC_POLL_INTERVAL_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            backoff_strategy: BackoffStrategy::default(),
            rate_limit_qps: DEFAULT_RATE_LIMIT_QPS,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            finalizer: ASTRO_FINALIZER.to_string(),
            watch_namespace: None,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: LogFormat::default(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    ///
    /// Unparseable values fall back to their defaults, as does a rate limit
    /// that is not a positive finite number.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            worker_count: parse_or(&lookup, "WORKER_COUNT", defaults.worker_count),
            cache_sync_timeout_secs: parse_or(
                &lookup,
                "CACHE_SYNC_TIMEOUT_SECS",
                defaults.cache_sync_timeout_secs,
            ),
            cache_sync_poll_interval_ms: parse_or(
                &lookup,
                "CACHE_SYNC_POLL_INTERVAL_MS",
                defaults.cache_sync_poll_interval_ms,
            ),
            backoff_base_ms: parse_or(&lookup, "BACKOFF_BASE_MS", defaults.backoff_base_ms),
            backoff_max_secs: parse_or(&lookup, "BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            backoff_strategy: parse_or(&lookup, "BACKOFF_STRATEGY", defaults.backoff_strategy),
            rate_limit_qps: Some(parse_or(&lookup, "RATE_LIMIT_QPS", defaults.rate_limit_qps))
                .filter(|qps| qps.is_finite() && *qps > 0.0)
                .unwrap_or(defaults.rate_limit_qps),
            rate_limit_burst: parse_or(&lookup, "RATE_LIMIT_BURST", defaults.rate_limit_burst),
            finalizer: lookup("FINALIZER_NAME")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.finalizer),
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.trim().is_empty()),
            metrics_port: parse_or(&lookup, "METRICS_PORT", defaults.metrics_port),
            log_format: parse_or(&lookup, "LOG_FORMAT", defaults.log_format),
        }
    }

    /// Get cache sync timeout duration
    pub fn cache_sync_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_sync_timeout_secs)
    }

    /// Get cache sync poll interval duration
    pub fn cache_sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cache_sync_poll_interval_ms.max(1))
    }

    /// Get per-key backoff base duration, never below one millisecond
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms.max(1))
    }

    /// Get per-key backoff ceiling duration
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

/// Read a variable and parse it, or return the default
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = ControllerConfig::from_lookup(|_| None);
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(config.finalizer, ASTRO_FINALIZER);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.watch_namespace.is_none());
        assert_eq!(config.backoff_base(), Duration::from_millis(5));
        assert_eq!(config.backoff_max(), Duration::from_secs(1000));
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("WORKER_COUNT", "8"),
            ("BACKOFF_STRATEGY", "Fibonacci"),
            ("FINALIZER_NAME", "example.com/cleanup"),
            ("WATCH_NAMESPACE", "team-a"),
            ("LOG_FORMAT", "json"),
            ("RATE_LIMIT_QPS", "2.5"),
        ]));
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Fibonacci);
        assert_eq!(config.finalizer, "example.com/cleanup");
        assert_eq!(config.watch_namespace.as_deref(), Some("team-a"));
        assert_eq!(config.log_format, LogFormat::Json);
        assert!((config.rate_limit_qps - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("WORKER_COUNT", "many"),
            ("BACKOFF_STRATEGY", "linear"),
            ("FINALIZER_NAME", "  "),
            ("METRICS_PORT", "99999"),
        ]));
        assert_eq!(config.worker_count, DEFAULT_WORKER_COUNT);
        assert_eq!(config.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(config.finalizer, ASTRO_FINALIZER);
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
    }

    #[test]
    fn test_poll_interval_is_never_zero() {
        let config = ControllerConfig::from_lookup(lookup_from(&[(
            "CACHE_SYNC_POLL_INTERVAL_MS",
            "0",
        )]));
        assert_eq!(config.cache_sync_poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_non_positive_rate_limit_falls_back_to_default() {
        for qps in ["0", "-1", "NaN", "inf"] {
            let config = ControllerConfig::from_lookup(lookup_from(&[("RATE_LIMIT_QPS", qps)]));
            assert!(
                (config.rate_limit_qps - DEFAULT_RATE_LIMIT_QPS).abs() < f64::EPSILON,
                "RATE_LIMIT_QPS={qps} was accepted"
            );
        }
    }

    #[test]
    fn test_backoff_base_is_never_zero() {
        let config = ControllerConfig::from_lookup(lookup_from(&[("BACKOFF_BASE_MS", "0")]));
        assert_eq!(config.backoff_base(), Duration::from_millis(1));
    }
}
