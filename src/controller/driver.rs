//! # Controller Driver
//!
//! Wires the event source, queue, reconciler and workers together and owns
//! the run lifecycle:
//!
//! 1. Subscribe to the event source and start pumping events into the queue;
//!    a source that refuses the subscription aborts startup
//! 2. Wait for the initial listing to sync (bounded by a timeout)
//! 3. Start the workers and report ready
//! 4. On shutdown, report not ready, stop the queue, and wait for workers to
//!    finish their current keys

use super::events::EventHandler;
use super::object::ManagedObject;
use super::queue::rate_limiter::default_controller_rate_limiter;
use super::queue::KeyQueue;
use super::reconciler::{ReconcilePolicy, Reconciler};
use super::worker::WorkerPool;
use crate::config::ControllerConfig;
use crate::constants::QUEUE_NAME;
use crate::store::{EventSource, ObjectStore, StoreError};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("at least one worker is required")]
    NoWorkers,

    #[error("timed out after {timeout:?} waiting for caches to sync")]
    CacheSyncTimeout { timeout: Duration },

    #[error("cancelled while waiting for caches to sync")]
    Cancelled,

    #[error("failed to subscribe to the event source: {0}")]
    Subscribe(#[source] StoreError),
}

pub struct Controller<K: ManagedObject> {
    config: ControllerConfig,
    queue: KeyQueue,
    source: Arc<dyn EventSource<K>>,
    handler: EventHandler,
    workers: WorkerPool<K>,
    readiness: Option<Arc<AtomicBool>>,
}

impl<K: ManagedObject> fmt::Debug for Controller<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedObject> Controller<K> {
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ObjectStore<K>>,
        source: Arc<dyn EventSource<K>>,
        policy: Arc<dyn ReconcilePolicy<K>>,
    ) -> Self {
        let queue = KeyQueue::new(QUEUE_NAME, default_controller_rate_limiter(&config));
        let reconciler = Arc::new(Reconciler::new(store, policy, config.finalizer.clone()));
        let handler = EventHandler::new(queue.clone());
        let workers = WorkerPool::new(queue.clone(), reconciler);
        Self {
            config,
            queue,
            source,
            handler,
            workers,
            readiness: None,
        }
    }

    /// Flag set while workers are running, for readiness probes
    pub fn with_readiness(mut self, flag: Arc<AtomicBool>) -> Self {
        self.readiness = Some(flag);
        self
    }

    pub fn queue(&self) -> &KeyQueue {
        &self.queue
    }

    fn set_ready(&self, ready: bool) {
        if let Some(flag) = &self.readiness {
            flag.store(ready, Ordering::Relaxed);
        }
    }

    /// Run until `shutdown` fires
    pub async fn run(
        &self,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Result<(), ControllerError> {
        if workers == 0 {
            return Err(ControllerError::NoWorkers);
        }

        info!(queue = %self.queue.name(), "starting controller");
        let events = match self.source.watch() {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "controller startup aborted");
                self.queue.shut_down();
                return Err(ControllerError::Subscribe(e));
            }
        };
        let pump_stop = CancellationToken::new();
        let pump = {
            let handler = self.handler.clone();
            let stop = pump_stop.clone();
            tokio::spawn(async move { handler.run(events, stop).await })
        };

        info!("waiting for informer caches to sync");
        if let Err(e) = self.wait_for_cache_sync(&shutdown).await {
            warn!(error = %e, "controller startup aborted");
            self.queue.shut_down();
            pump_stop.cancel();
            if let Err(join_err) = pump.await {
                error!(error = %join_err, "event pump task failed");
            }
            return Err(e);
        }

        info!(workers, "caches synced, starting workers");
        let mut running = self.workers.spawn(workers, shutdown.clone());
        self.set_ready(true);

        shutdown.cancelled().await;
        info!("shutting down workers");
        self.set_ready(false);
        self.queue.shut_down();
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "worker task failed");
            }
        }

        pump_stop.cancel();
        if let Err(e) = pump.await {
            error!(error = %e, "event pump task failed");
        }
        info!("controller stopped");
        Ok(())
    }

    async fn wait_for_cache_sync(&self, shutdown: &CancellationToken) -> Result<(), ControllerError> {
        let timeout = self.config.cache_sync_timeout();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval(self.config.cache_sync_poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.source.has_synced() {
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(ControllerError::Cancelled),
                _ = &mut deadline => return Err(ControllerError::CacheSyncTimeout { timeout }),
                _ = poll.tick() => {}
            }
        }
    }
}
