//! # Key Queue
//!
//! A deduplicating, rate-limited work queue of object keys.
//!
//! - A key that is already pending is not queued twice.
//! - A key handed out by [`KeyQueue::get`] is "processing" until
//!   [`KeyQueue::done`] is called. Adds during that window mark the key dirty
//!   and it is re-queued by `done`, so at most one attempt per key is ever in
//!   flight and no update is lost.
//! - [`KeyQueue::add_rate_limited`] delays the add by whatever the configured
//!   [`RateLimiter`] says; [`KeyQueue::forget`] resets that history.
//!
//! The queue is cheap to clone; all clones share the same state.

pub mod rate_limiter;

use crate::observability::metrics;
use rate_limiter::RateLimiter;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Ceiling for delayed adds, matching how far ahead tokio parks an unbounded sleep
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Default)]
struct QueueState {
    /// Keys ready to be handed out, in order
    queue: VecDeque<String>,
    /// Keys that need processing (queued or re-added while processing)
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    /// Earliest pending delayed add per key
    waiting: HashMap<String, Instant>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter>,
}

#[derive(Clone)]
pub struct KeyQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for KeyQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyQueue")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl KeyQueue {
    pub fn new(name: impl Into<String>, rate_limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                rate_limiter,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a key, collapsing duplicates
    pub fn add(&self, key: &str) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            trace!(queue = %self.inner.name, key, "key is processing, will requeue on done");
            return;
        }
        state.queue.push_back(key.to_string());
        metrics::set_queue_depth(state.queue.len());
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key
    ///
    /// Returns `None` once the queue is shutting down. The returned key is
    /// marked as processing until [`KeyQueue::done`] is called.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // register before checking state so a concurrent add or shutdown is not missed
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    metrics::set_queue_depth(state.queue.len());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Mark processing of a key as finished
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.to_string());
            metrics::set_queue_depth(state.queue.len());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Clear backoff history for a key
    pub fn forget(&self, key: &str) {
        self.inner.rate_limiter.forget(key);
    }

    /// Failures recorded for a key since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Enqueue a key after the rate limiter's delay for it
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.inner.rate_limiter.when(key);
        debug!(queue = %self.inner.name, key, delay_ms = delay.as_millis(), "rate-limited add");
        self.add_after(key, delay);
    }

    /// Enqueue a key once `delay` has elapsed
    ///
    /// Pending delayed adds for the same key collapse to the earliest one.
    /// Delays beyond thirty years are clamped so the deadline never overflows.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let now = Instant::now();
        let ready_at = now
            .checked_add(delay.min(FAR_FUTURE))
            .unwrap_or(now + FAR_FUTURE);
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            if state.waiting.get(key).is_some_and(|at| *at <= ready_at) {
                return;
            }
            state.waiting.insert(key.to_string(), ready_at);
        }

        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(ready_at).await;
            let fire = {
                let mut state = queue.state();
                // superseded by an earlier delayed add, or cleared by shutdown
                if state.waiting.get(&key) == Some(&ready_at) {
                    state.waiting.remove(&key);
                    true
                } else {
                    false
                }
            };
            if fire {
                queue.add(&key);
            }
        });
    }

    /// Number of keys ready to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting work and wake every waiting `get`
    pub fn shut_down(&self) {
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
            state.waiting.clear();
        }
        debug!(queue = %self.inner.name, "queue shutting down");
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}
