//! # Event Handler
//!
//! Turns watch notifications into queue keys. It never reads the object store;
//! the reconciler fetches fresh state when it processes the key.

use super::object::ManagedObject;
use super::queue::KeyQueue;
use crate::store::WatchEvent;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone)]
pub struct EventHandler {
    queue: KeyQueue,
}

impl EventHandler {
    pub fn new(queue: KeyQueue) -> Self {
        Self { queue }
    }

    fn enqueue<K: ManagedObject>(&self, obj: &K) {
        match obj.object_key() {
            Ok(key) => self.queue.add_rate_limited(&key.to_string()),
            Err(e) => error!(error = %e, "dropping event for object without a usable key"),
        }
    }

    pub fn handle<K: ManagedObject>(&self, event: WatchEvent<K>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Deleted(obj) => self.enqueue(obj.as_ref()),
            WatchEvent::Updated { old, new } => {
                if old.version() == new.version() {
                    // periodic resync, nothing changed
                    trace!(version = ?new.version(), "skipping update with unchanged version");
                    return;
                }
                self.enqueue(new.as_ref());
            }
            WatchEvent::DeletedFinalStateUnknown { key } => self.queue.add_rate_limited(&key),
        }
    }

    /// Pump a watch stream into the queue until it ends or `shutdown` fires
    pub async fn run<K: ManagedObject>(
        &self,
        mut events: BoxStream<'static, WatchEvent<K>>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("event pump stopping");
                    break;
                }
                next = events.next() => match next {
                    Some(event) => self.handle(event),
                    None => {
                        info!("watch stream ended");
                        break;
                    }
                },
            }
        }
    }
}
