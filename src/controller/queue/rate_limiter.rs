//! # Rate Limiters
//!
//! Decide how long a key waits before it is re-admitted to the queue after a
//! rate-limited add. Per-item limiters track consecutive failures per key and
//! grow the delay; `forget` resets a key after a successful reconcile.
//!
//! ## Usage
//!
//! ```rust
//! use astro_controller::controller::queue::rate_limiter::{
//!     ItemExponentialRateLimiter, RateLimiter,
//! };
//! use std::time::Duration;
//!
//! let limiter = ItemExponentialRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1));
//! assert_eq!(limiter.when("ns/a"), Duration::from_millis(5));
//! assert_eq!(limiter.when("ns/a"), Duration::from_millis(10));
//! limiter.forget("ns/a");
//! assert_eq!(limiter.when("ns/a"), Duration::from_millis(5));
//! ```

use crate::config::{BackoffStrategy, ControllerConfig};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub trait RateLimiter: Debug + Send + Sync {
    /// Delay before the key may be processed again; records a failure
    fn when(&self, key: &str) -> Duration;
    /// Clear failure history for the key
    fn forget(&self, key: &str);
    /// Number of recorded failures for the key
    fn num_requeues(&self, key: &str) -> u32;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-key exponential backoff: `base * 2^failures`, capped at `max`
#[derive(Debug)]
pub struct ItemExponentialRateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ItemExponentialRateLimiter {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ItemExponentialRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.to_string()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);

        // 2^exp overflows u32 quickly; anything past 31 doublings is the ceiling anyway
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |d| d.min(self.max))
    }

    fn forget(&self, key: &str) {
        lock(&self.failures).remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

/// Fibonacci backoff calculator
///
/// Generates backoff durations following the Fibonacci sequence in units of
/// `min`: min, min, 2·min, 3·min, 5·min, ... capped at `max`. Grows more
/// slowly than exponential backoff.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min: Duration,
    prev: Duration,
    current: Duration,
    max: Duration,
}

impl FibonacciBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            prev: Duration::ZERO,
            current: min.min(max),
            max,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        let next = self.prev.saturating_add(self.current);
        self.prev = self.current;
        self.current = next.min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev = Duration::ZERO;
        self.current = self.min.min(self.max);
    }
}

/// Per-key Fibonacci backoff
#[derive(Debug)]
pub struct ItemFibonacciRateLimiter {
    min: Duration,
    max: Duration,
    states: Mutex<HashMap<String, (FibonacciBackoff, u32)>>,
}

impl ItemFibonacciRateLimiter {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            states: Mutex::new(HashMap::new()),
        }
    }
}

impl RateLimiter for ItemFibonacciRateLimiter {
    fn when(&self, key: &str) -> Duration {
        let mut states = lock(&self.states);
        let (backoff, count) = states
            .entry(key.to_string())
            .or_insert_with(|| (FibonacciBackoff::new(self.min, self.max), 0));
        *count = count.saturating_add(1);
        backoff.next_backoff()
    }

    fn forget(&self, key: &str) {
        lock(&self.states).remove(key);
    }

    fn num_requeues(&self, key: &str) -> u32 {
        lock(&self.states).get(key).map_or(0, |(_, count)| *count)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by all keys
///
/// Each call reserves one token; when the bucket is empty the returned delay
/// is the time until the reserved token refills.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: if qps > 0.0 { qps } else { f64::MIN_POSITIVE },
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &str) -> Duration {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(-bucket.tokens / self.qps).unwrap_or(Duration::MAX)
        }
    }

    fn forget(&self, _key: &str) {}

    fn num_requeues(&self, _key: &str) -> u32 {
        0
    }
}

/// Combines limiters, returning the longest delay of any of them
#[derive(Debug)]
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &str) -> Duration {
        self.limiters
            .iter()
            .map(|l| l.when(key))
            .max()
            .unwrap_or(Duration::ZERO)
    }

    fn forget(&self, key: &str) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &str) -> u32 {
        self.limiters
            .iter()
            .map(|l| l.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-key backoff from the config combined with an overall token bucket
#[must_use]
pub fn default_controller_rate_limiter(config: &ControllerConfig) -> Box<dyn RateLimiter> {
    let per_item: Box<dyn RateLimiter> = match config.backoff_strategy {
        BackoffStrategy::Exponential => Box::new(ItemExponentialRateLimiter::new(
            config.backoff_base(),
            config.backoff_max(),
        )),
        BackoffStrategy::Fibonacci => Box::new(ItemFibonacciRateLimiter::new(
            config.backoff_base(),
            config.backoff_max(),
        )),
    };
    Box::new(MaxOfRateLimiter::new(vec![
        per_item,
        Box::new(BucketRateLimiter::new(
            config.rate_limit_qps,
            config.rate_limit_burst,
        )),
    ]))
}
