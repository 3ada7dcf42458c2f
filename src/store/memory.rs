//! # In-Memory Store
//!
//! A process-local object store that behaves like a tiny API server:
//!
//! - every write bumps a monotonically increasing `resourceVersion`;
//! - updates with a stale version fail with a conflict;
//! - deletion only sets the deletion timestamp while finalizers remain, and
//!   the object is purged once an update leaves the finalizer set empty.
//!
//! It implements both [`ObjectStore`] and [`EventSource`], so a controller can
//! be driven end to end without a cluster.

use super::{EventSource, ObjectStore, StoreError, WatchEvent};
use crate::controller::key::ObjectKey;
use crate::controller::object::ManagedObject;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::warn;

const EVENT_BUFFER: usize = 1024;

struct MemoryState<K> {
    objects: BTreeMap<ObjectKey, K>,
    next_version: u64,
}

impl<K> MemoryState<K> {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

pub struct InMemoryStore<K: ManagedObject> {
    state: Mutex<MemoryState<K>>,
    events: broadcast::Sender<WatchEvent<K>>,
    synced: Arc<AtomicBool>,
}

impl<K: ManagedObject> fmt::Debug for InMemoryStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("objects", &self.len())
            .field("synced", &self.synced.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<K: ManagedObject> Default for InMemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ManagedObject> InMemoryStore<K> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            state: Mutex::new(MemoryState {
                objects: BTreeMap::new(),
                next_version: 0,
            }),
            events,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WatchEvent<K>) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Create a new object, assigning its first version
    pub fn create(&self, object: K) -> Result<K, StoreError> {
        let key = object
            .object_key()
            .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
        let mut state = self.state();
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut stored = object;
        stored.meta_mut().resource_version = Some(state.bump_version());
        state.objects.insert(key, stored.clone());
        self.emit(WatchEvent::Added(Arc::new(stored.clone())));
        Ok(stored)
    }

    /// Request deletion of an object
    ///
    /// Objects without finalizers are purged immediately; otherwise the
    /// deletion timestamp is set and the object lingers until its finalizers
    /// are cleared. Repeated requests are no-ops.
    pub fn request_deletion(&self, key: &ObjectKey) -> Result<(), StoreError> {
        let mut state = self.state();
        let current = state
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if current.is_deleting() {
            return Ok(());
        }

        let mut deleting = current.clone();
        deleting.meta_mut().deletion_timestamp = Some(now()?);
        deleting.meta_mut().resource_version = Some(state.bump_version());

        if deleting.finalizer_set().is_empty() {
            state.objects.remove(key);
            self.emit(WatchEvent::Deleted(Arc::new(deleting)));
        } else {
            state.objects.insert(key.clone(), deleting.clone());
            self.emit(WatchEvent::Updated {
                old: Arc::new(current),
                new: Arc::new(deleting),
            });
        }
        Ok(())
    }

    /// Current stored copy of an object
    pub fn current(&self, key: &ObjectKey) -> Option<K> {
        self.state().objects.get(key).cloned()
    }

    /// Re-announce every object with an unchanged version, like a periodic
    /// informer resync
    pub fn resync(&self) {
        let state = self.state();
        for object in state.objects.values() {
            let object = Arc::new(object.clone());
            self.emit(WatchEvent::Updated {
                old: Arc::clone(&object),
                new: object,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn now() -> Result<Time, StoreError> {
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(stamp))
        .map_err(|e| StoreError::Backend(format!("invalid deletion timestamp: {e}")))
}

#[async_trait]
impl<K: ManagedObject> ObjectStore<K> for InMemoryStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        Ok(self.current(key))
    }

    async fn update(&self, object: &K) -> Result<K, StoreError> {
        let key = object
            .object_key()
            .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
        let mut state = self.state();
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if object.version() != current.version() {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                message: format!(
                    "version {} is stale, current is {}",
                    object.version().unwrap_or("<none>"),
                    current.version().unwrap_or("<none>")
                ),
            });
        }

        let mut updated = object.clone();
        // deletion can only be requested, never undone through an update
        updated.meta_mut().deletion_timestamp = current.meta().deletion_timestamp.clone();
        updated.meta_mut().resource_version = Some(state.bump_version());

        if updated.is_deleting() && updated.finalizer_set().is_empty() {
            state.objects.remove(&key);
            self.emit(WatchEvent::Deleted(Arc::new(updated.clone())));
        } else {
            state.objects.insert(key, updated.clone());
            self.emit(WatchEvent::Updated {
                old: Arc::new(current),
                new: Arc::new(updated.clone()),
            });
        }
        Ok(updated)
    }
}

impl<K: ManagedObject> EventSource<K> for InMemoryStore<K> {
    fn watch(&self) -> Result<BoxStream<'static, WatchEvent<K>>, StoreError> {
        // snapshot and subscribe under one lock so no write falls between them
        let (initial, receiver) = {
            let state = self.state();
            let initial: Vec<_> = state
                .objects
                .values()
                .map(|o| WatchEvent::Added(Arc::new(o.clone())))
                .collect();
            (initial, self.events.subscribe())
        };

        let synced = Arc::clone(&self.synced);
        let marker = stream::once(async move {
            synced.store(true, Ordering::SeqCst);
            None
        });

        let live = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((Some(event), receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "in-memory watch lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(stream::iter(initial.into_iter().map(Some))
            .chain(marker)
            .chain(live)
            .filter_map(futures::future::ready)
            .boxed())
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Astro, AstroSpec};

    fn astro(ns: &str, name: &str) -> Astro {
        let mut a = Astro::new(name, AstroSpec::default());
        a.metadata.namespace = Some(ns.to_string());
        a
    }

    #[tokio::test]
    async fn test_versions_increase_on_every_write() {
        let store = InMemoryStore::new();
        let created = store.create(astro("ns", "a")).unwrap();
        assert_eq!(created.version(), Some("1"));

        let updated = store.update(&created).await.unwrap();
        assert_eq!(updated.version(), Some("2"));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = InMemoryStore::new();
        let created = store.create(astro("ns", "a")).unwrap();
        store.update(&created).await.unwrap();

        let err = store.update(&created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_of_missing_object_is_not_found() {
        let store: InMemoryStore<Astro> = InMemoryStore::new();
        let mut ghost = astro("ns", "ghost");
        ghost.metadata.resource_version = Some("1".to_string());
        assert!(store.update(&ghost).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_deletion_waits_for_finalizers() {
        let store = InMemoryStore::new();
        let mut obj = astro("ns", "a");
        obj.metadata.finalizers = Some(vec!["guard".to_string()]);
        store.create(obj).unwrap();
        let key = ObjectKey::namespaced("ns", "a");

        store.request_deletion(&key).unwrap();
        let deleting = store.current(&key).unwrap();
        assert!(deleting.is_deleting());

        // clearing an unrelated field keeps it around
        let kept = store.update(&deleting).await.unwrap();
        assert!(kept.is_deleting());
        assert_eq!(store.len(), 1);

        let mut released = kept;
        released.metadata.finalizers = None;
        store.update(&released).await.unwrap();
        assert!(store.current(&key).is_none());
    }

    #[tokio::test]
    async fn test_deletion_without_finalizers_purges() {
        let store = InMemoryStore::new();
        store.create(astro("ns", "a")).unwrap();
        store
            .request_deletion(&ObjectKey::namespaced("ns", "a"))
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_update_cannot_clear_deletion_timestamp() {
        let store = InMemoryStore::new();
        let mut obj = astro("ns", "a");
        obj.metadata.finalizers = Some(vec!["guard".to_string()]);
        store.create(obj).unwrap();
        let key = ObjectKey::namespaced("ns", "a");
        store.request_deletion(&key).unwrap();

        let mut undo = store.current(&key).unwrap();
        undo.metadata.deletion_timestamp = None;
        let stored = store.update(&undo).await.unwrap();
        assert!(stored.is_deleting());
    }

    #[tokio::test]
    async fn test_watch_lists_then_syncs_then_follows() {
        let store = InMemoryStore::new();
        store.create(astro("ns", "a")).unwrap();
        assert!(!store.has_synced());

        let mut events = store.watch().unwrap();
        assert!(matches!(events.next().await, Some(WatchEvent::Added(_))));

        store.create(astro("ns", "b")).unwrap();
        let next = events.next().await;
        assert!(store.has_synced());
        match next {
            Some(WatchEvent::Added(obj)) => assert_eq!(obj.metadata.name.as_deref(), Some("b")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resync_reports_identical_versions() {
        let store = InMemoryStore::new();
        store.create(astro("ns", "a")).unwrap();
        let mut events = store.watch().unwrap();
        events.next().await;

        store.resync();
        match events.next().await {
            Some(WatchEvent::Updated { old, new }) => assert_eq!(old.version(), new.version()),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
