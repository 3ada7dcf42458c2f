//! # Object Store and Event Source
//!
//! The engine never talks to the API server directly. It reads and writes
//! objects through [`ObjectStore`] and learns about changes through
//! [`EventSource`].
//!
//! Reads may be served from a cache and be slightly stale. Writes use
//! optimistic concurrency: an update carrying an outdated version token
//! fails with [`StoreError::Conflict`] and the caller is expected to re-read
//! on its next attempt.
//!
//! ## Backends
//!
//! - [`memory::InMemoryStore`] - process-local store used by tests and demos
//! - [`k8s::KubeBackend`] - Kubernetes API server with a reflector cache

pub mod k8s;
pub mod memory;

use crate::controller::key::ObjectKey;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(String),

    #[error("conflict writing {key}: {message}")]
    Conflict { key: String, message: String },

    #[error("object {0} already exists")]
    AlreadyExists(String),

    #[error("event source already has a subscriber")]
    AlreadyWatched,

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Change notification from a watch
#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
    /// A delete whose final object state was missed; only the key is known
    ///
    /// The Kubernetes source emits this for objects that vanished while its
    /// watch was being re-established.
    DeletedFinalStateUnknown { key: String },
}

#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    /// Point read of current state; `Ok(None)` when the object does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    /// Optimistic-concurrency write returning the stored object
    async fn update(&self, object: &K) -> Result<K, StoreError>;
}

pub trait EventSource<K>: Send + Sync {
    /// Subscribe to change notifications
    ///
    /// The stream starts with the current contents of the source, delivered as
    /// `Added` events, and then follows live changes. Sources that can only
    /// feed one subscriber return [`StoreError::AlreadyWatched`] on later calls.
    fn watch(&self) -> Result<BoxStream<'static, WatchEvent<K>>, StoreError>;

    /// True once the initial listing has been delivered
    fn has_synced(&self) -> bool;
}
