//! # Worker Pool
//!
//! Workers pull keys from the queue and hand them to the reconciler.
//!
//! Each key is marked done exactly once, even if reconciliation panics, so the
//! queue never wedges a key in the processing state. Successful outcomes
//! clear the key's backoff history; failures and panics requeue it with
//! backoff.

use super::object::ManagedObject;
use super::queue::KeyQueue;
use super::reconciler::Reconciler;
use crate::observability::metrics;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Calls `done` for its key when dropped
struct InFlight<'a> {
    queue: &'a KeyQueue,
    key: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.queue.done(self.key);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

pub struct WorkerPool<K: ManagedObject> {
    queue: KeyQueue,
    reconciler: Arc<Reconciler<K>>,
}

impl<K: ManagedObject> Clone for WorkerPool<K> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            reconciler: Arc::clone(&self.reconciler),
        }
    }
}

impl<K: ManagedObject> std::fmt::Debug for WorkerPool<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedObject> WorkerPool<K> {
    pub fn new(queue: KeyQueue, reconciler: Arc<Reconciler<K>>) -> Self {
        Self { queue, reconciler }
    }

    /// Launch `count` workers
    ///
    /// Workers stop pulling new keys once `shutdown` fires or the queue shuts
    /// down; a key already being reconciled is finished first.
    pub fn spawn(&self, count: usize, shutdown: CancellationToken) -> JoinSet<()> {
        let mut workers = JoinSet::new();
        for id in 0..count {
            let pool = self.clone();
            let shutdown = shutdown.clone();
            workers.spawn(async move { pool.run_worker(id, shutdown).await });
        }
        workers
    }

    async fn run_worker(self, id: usize, shutdown: CancellationToken) {
        debug!(worker = id, "worker started");
        loop {
            let key = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                key = self.queue.get() => key,
            };
            let Some(key) = key else {
                break;
            };
            self.process(&key).await;
        }
        debug!(worker = id, "worker stopped");
    }

    async fn process(&self, key: &str) {
        let _in_flight = InFlight {
            queue: &self.queue,
            key,
        };

        let start = Instant::now();
        let result = AssertUnwindSafe(self.reconciler.sync(key))
            .catch_unwind()
            .await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match result {
            Ok(Ok(outcome)) => {
                debug!(key, %outcome, "reconciled");
                metrics::increment_reconciliations(outcome.as_str());
                self.queue.forget(key);
            }
            Ok(Err(e)) => {
                metrics::increment_reconciliation_errors();
                if e.is_conflict() {
                    debug!(key, error = %e, "write conflict, retrying");
                } else {
                    warn!(key, error = %e, "reconciliation failed, retrying");
                }
                self.requeue(key);
            }
            Err(payload) => {
                metrics::increment_worker_panics();
                error!(key, panic = panic_message(payload.as_ref()), "reconciliation panicked, retrying");
                self.requeue(key);
            }
        }
    }

    fn requeue(&self, key: &str) {
        metrics::increment_requeues();
        self.queue.add_rate_limited(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::key::ObjectKey;
    use crate::controller::queue::rate_limiter::ItemExponentialRateLimiter;
    use crate::controller::reconciler::ReconcilePolicy;
    use crate::crd::{Astro, AstroSpec};
    use crate::store::memory::InMemoryStore;
    use crate::store::ObjectStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    const TOKEN: &str = "test.finalizer";

    #[derive(Default)]
    struct PanicOnce {
        panicked: AtomicBool,
        updates: AtomicUsize,
    }

    #[async_trait]
    impl ReconcilePolicy<Astro> for PanicOnce {
        async fn on_create(&self, _obj: &Astro) -> anyhow::Result<()> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("boom");
            }
            Ok(())
        }

        async fn on_update(&self, _obj: &Astro) -> anyhow::Result<()> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn queue() -> KeyQueue {
        KeyQueue::new(
            "worker-test",
            Box::new(ItemExponentialRateLimiter::new(
                Duration::from_millis(5),
                Duration::from_millis(50),
            )),
        )
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_is_contained_and_retried() {
        let store = Arc::new(InMemoryStore::new());
        store.create({
            let mut a = Astro::new("a", AstroSpec::default());
            a.metadata.namespace = Some("ns".to_string());
            a
        })
        .unwrap();
        let policy = Arc::new(PanicOnce::default());
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store) as Arc<dyn ObjectStore<Astro>>,
            Arc::clone(&policy) as Arc<dyn ReconcilePolicy<Astro>>,
            TOKEN,
        ));
        let queue = queue();
        let pool = WorkerPool::new(queue.clone(), reconciler);
        let shutdown = CancellationToken::new();
        let mut workers = pool.spawn(1, shutdown.clone());

        queue.add("ns/a");
        for _ in 0..100 {
            if policy.updates.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(policy.panicked.load(Ordering::SeqCst));
        assert_eq!(policy.updates.load(Ordering::SeqCst), 1);
        assert_eq!(queue.num_requeues("ns/a"), 0);
        let stored = store.current(&ObjectKey::namespaced("ns", "a")).unwrap();
        assert!(stored.has_finalizer(TOKEN));

        shutdown.cancel();
        while let Some(joined) = workers.join_next().await {
            joined.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_exit_when_queue_shuts_down() {
        let store: Arc<InMemoryStore<Astro>> = Arc::new(InMemoryStore::new());
        let reconciler = Arc::new(Reconciler::new(
            store as Arc<dyn ObjectStore<Astro>>,
            Arc::new(crate::controller::reconciler::NoopPolicy) as Arc<dyn ReconcilePolicy<Astro>>,
            TOKEN,
        ));
        let queue = queue();
        let pool = WorkerPool::new(queue.clone(), reconciler);
        let mut workers = pool.spawn(3, CancellationToken::new());

        queue.shut_down();
        let mut exited = 0;
        while let Some(joined) = workers.join_next().await {
            joined.unwrap();
            exited += 1;
        }
        assert_eq!(exited, 3);
    }
}
