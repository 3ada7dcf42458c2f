//! # Kubernetes Backend
//!
//! Object store and event source backed by the Kubernetes API server.
//!
//! A single reflector cache is shared by both halves: the event source owns
//! the reflector writer and feeds it from a `kube_runtime::watcher` stream,
//! while the store serves reads from the cache and sends writes straight to
//! the API server with `replace`, which the server rejects with 409 when the
//! `resourceVersion` is stale.

use super::{EventSource, ObjectStore, StoreError, WatchEvent};
use crate::controller::key::ObjectKey;
use crate::controller::object::ManagedObject;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use kube::api::{Api, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use kube_runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Resources the Kubernetes backend can manage
pub trait KubeObject:
    ManagedObject + Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned
{
}

impl<K> KubeObject for K where
    K: ManagedObject + Resource<Scope = NamespaceResourceScope> + Serialize + DeserializeOwned
{
}

/// Construction entry point for the Kubernetes store and event source
#[derive(Debug)]
pub struct KubeBackend;

impl KubeBackend {
    /// Build a store and event source sharing one reflector cache
    ///
    /// `api` decides the watch scope (`Api::all` or `Api::namespaced`).
    pub fn new<K: KubeObject>(
        client: Client,
        api: Api<K>,
        config: watcher::Config,
    ) -> (KubeStore<K>, KubeEventSource<K>) {
        let (reader, writer) = reflector::store();
        let store = KubeStore {
            client,
            cache: reader.clone(),
        };
        let source = KubeEventSource {
            api,
            config,
            cache: reader,
            writer: Mutex::new(Some(writer)),
            synced: Arc::new(AtomicBool::new(false)),
        };
        (store, source)
    }
}

pub struct KubeStore<K: KubeObject> {
    client: Client,
    cache: Store<K>,
}

impl<K: KubeObject> fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeStore")
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

fn object_ref<K: KubeObject>(key: &ObjectKey) -> ObjectRef<K> {
    let reference = ObjectRef::new(&key.name);
    match key.namespace() {
        Some(ns) => reference.within(ns),
        None => reference,
    }
}

fn map_kube_error(key: &ObjectKey, error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound(key.to_string()),
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict {
            key: key.to_string(),
            message: api_err.message,
        },
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl<K: KubeObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        Ok(self
            .cache
            .get(&object_ref(key))
            .map(|obj| obj.as_ref().clone()))
    }

    async fn update(&self, object: &K) -> Result<K, StoreError> {
        let key = object
            .object_key()
            .map_err(|e| StoreError::InvalidObject(e.to_string()))?;
        let Some(namespace) = key.namespace() else {
            return Err(StoreError::InvalidObject(format!(
                "{key} has no namespace but the resource is namespaced"
            )));
        };
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        debug!(key = %key, version = ?object.version(), "replacing object");
        api.replace(&key.name, &PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error(&key, e))
    }
}

/// Watch source over a reflector cache
///
/// The reflector writer can only be driven by one watcher, so the source
/// accepts a single subscriber; later calls to `watch` fail with
/// [`StoreError::AlreadyWatched`].
pub struct KubeEventSource<K: KubeObject> {
    api: Api<K>,
    config: watcher::Config,
    cache: Store<K>,
    writer: Mutex<Option<Writer<K>>>,
    synced: Arc<AtomicBool>,
}

impl<K: KubeObject> fmt::Debug for KubeEventSource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeEventSource")
            .field("synced", &self.synced.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Keys returned by the watcher's current re-list
#[derive(Debug, Default)]
struct Relist {
    seen: Option<HashSet<String>>,
}

impl Relist {
    fn start(&mut self) {
        self.seen = Some(HashSet::new());
    }

    fn observe(&mut self, key: String) {
        if let Some(seen) = &mut self.seen {
            seen.insert(key);
        }
    }

    /// Keys cached before the re-list that it did not return
    fn finish(&mut self, cached: impl IntoIterator<Item = String>) -> Vec<String> {
        let Some(seen) = self.seen.take() else {
            return Vec::new();
        };
        let mut vanished: Vec<String> = cached.into_iter().filter(|k| !seen.contains(k)).collect();
        vanished.sort();
        vanished
    }
}

/// Applies watcher events to the cache and translates them
///
/// Applies are compared against the cached copy from before the event so
/// updates carry both the old and the new object. Objects that were cached
/// but missing from a re-list were deleted while the watch was down and
/// come out as [`WatchEvent::DeletedFinalStateUnknown`].
struct Translator<K: KubeObject> {
    cache: Store<K>,
    writer: Writer<K>,
    relist: Relist,
    synced: Arc<AtomicBool>,
}

impl<K: KubeObject> Translator<K> {
    fn translate(&mut self, event: watcher::Event<K>) -> Vec<WatchEvent<K>> {
        let mut translated = Vec::new();
        match &event {
            watcher::Event::Init => self.relist.start(),
            watcher::Event::InitApply(obj) => {
                if let Ok(key) = obj.object_key() {
                    self.relist.observe(key.to_string());
                }
            }
            watcher::Event::InitDone => {
                // the writer swaps in the re-listed objects on InitDone
                let cached = self
                    .cache
                    .state()
                    .into_iter()
                    .filter_map(|obj| obj.object_key().ok())
                    .map(|key| key.to_string());
                for key in self.relist.finish(cached) {
                    debug!(key = %key, "object vanished during re-list");
                    translated.push(WatchEvent::DeletedFinalStateUnknown { key });
                }
            }
            watcher::Event::Apply(_) | watcher::Event::Delete(_) => {}
        }

        let previous = match &event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                self.cache.get(&ObjectRef::from_obj(obj))
            }
            _ => None,
        };
        self.writer.apply_watcher_event(&event);

        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                let new = Arc::new(obj);
                translated.push(match previous {
                    Some(old) => WatchEvent::Updated { old, new },
                    None => WatchEvent::Added(new),
                });
            }
            watcher::Event::Delete(obj) => translated.push(WatchEvent::Deleted(Arc::new(obj))),
            watcher::Event::Init => {}
            watcher::Event::InitDone => {
                if !self.synced.swap(true, Ordering::SeqCst) {
                    info!("initial list complete, cache synced");
                }
            }
        }
        translated
    }
}

impl<K: KubeObject> EventSource<K> for KubeEventSource<K> {
    fn watch(&self) -> Result<BoxStream<'static, WatchEvent<K>>, StoreError> {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(StoreError::AlreadyWatched)?;

        let mut translator = Translator {
            cache: self.cache.clone(),
            writer,
            relist: Relist::default(),
            synced: Arc::clone(&self.synced),
        };
        Ok(watcher(self.api.clone(), self.config.clone())
            .default_backoff()
            .flat_map(move |result| {
                let translated = match result {
                    Ok(event) => translator.translate(event),
                    Err(e) => {
                        warn!(error = %e, "watch stream error, retrying with backoff");
                        Vec::new()
                    }
                };
                stream::iter(translated)
            })
            .boxed())
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}
