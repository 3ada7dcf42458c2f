//! # Reconciler
//!
//! Brings one object to its desired finalizer state.
//!
//! ## Reconciliation Flow
//!
//! 1. Parse the queue key (malformed keys are logged and dropped)
//! 2. Read the object from the store (missing objects are a no-op)
//! 3. Classify it:
//!    - **Deleting**: run cleanup, then release our finalizer
//!    - **Established**: the finalizer is present, run the update hook
//!    - **Pending**: add the finalizer, then run the create hook
//!
//! Once the finalizer is stored the object is Established, so a create hook
//! that fails is followed up by the update hook on retry.
//!
//! Every handler is idempotent, so the same key can be synced any number of
//! times. Errors are returned to the worker, which decides about retries;
//! nothing here retries internally.

mod policy;

pub use policy::{NoopPolicy, ReconcilePolicy};

use super::key::ObjectKey;
use super::object::ManagedObject;
use crate::store::{ObjectStore, StoreError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};

/// Lifecycle stage of an object with respect to our finalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Deletion requested; takes priority over everything else
    Deleting,
    /// Finalizer present
    Established,
    /// Finalizer not yet added
    Pending,
}

impl ObjectState {
    pub fn classify<K: ManagedObject>(obj: &K, finalizer: &str) -> Self {
        if obj.is_deleting() {
            Self::Deleting
        } else if obj.has_finalizer(finalizer) {
            Self::Established
        } else {
            Self::Pending
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Finalized,
    /// Object no longer exists
    NotFound,
    /// Key could not be parsed; never retried
    InvalidKey,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Finalized => "finalized",
            Self::NotFound => "not_found",
            Self::InvalidKey => "invalid_key",
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retryable reconcile failure
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to read {key}: {source}")]
    Read { key: String, source: StoreError },

    #[error("failed to write {key}: {source}")]
    Write { key: String, source: StoreError },

    #[error("policy failed for {key}: {source:#}")]
    Policy {
        key: String,
        source: anyhow::Error,
    },
}

impl ReconcileError {
    /// Optimistic-concurrency conflict on write
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Write { source, .. } if source.is_conflict())
    }
}

fn display_key<K: ManagedObject>(obj: &K) -> String {
    obj.object_key()
        .map(|k| k.to_string())
        .unwrap_or_else(|_| "<unnamed>".to_string())
}

pub struct Reconciler<K: ManagedObject> {
    store: Arc<dyn ObjectStore<K>>,
    policy: Arc<dyn ReconcilePolicy<K>>,
    finalizer: String,
}

impl<K: ManagedObject> fmt::Debug for Reconciler<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("finalizer", &self.finalizer)
            .finish_non_exhaustive()
    }
}

impl<K: ManagedObject> Reconciler<K> {
    pub fn new(
        store: Arc<dyn ObjectStore<K>>,
        policy: Arc<dyn ReconcilePolicy<K>>,
        finalizer: impl Into<String>,
    ) -> Self {
        Self {
            store,
            policy,
            finalizer: finalizer.into(),
        }
    }

    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    /// Reconcile the object behind a queue key
    pub async fn sync(&self, key: &str) -> Result<SyncOutcome, ReconcileError> {
        let span = info_span!("controller.sync", key = %key);
        self.sync_inner(key).instrument(span).await
    }

    async fn sync_inner(&self, key: &str) -> Result<SyncOutcome, ReconcileError> {
        let parsed: ObjectKey = match key.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(error = %e, "invalid resource key, dropping");
                return Ok(SyncOutcome::InvalidKey);
            }
        };

        let obj = match self.store.get(&parsed).await {
            Ok(Some(obj)) => obj,
            Ok(None) => {
                debug!("object no longer exists");
                return Ok(SyncOutcome::NotFound);
            }
            Err(e) if e.is_not_found() => {
                debug!("object no longer exists");
                return Ok(SyncOutcome::NotFound);
            }
            Err(source) => {
                return Err(ReconcileError::Read {
                    key: key.to_string(),
                    source,
                })
            }
        };

        match ObjectState::classify(&obj, &self.finalizer) {
            ObjectState::Deleting => self.handle_delete(obj).await,
            ObjectState::Established => self.handle_update(obj).await,
            ObjectState::Pending => self.handle_create(obj).await,
        }
    }

    /// Write `obj`; `Ok(None)` when the object was purged in the meantime
    async fn persist(&self, obj: &K) -> Result<Option<K>, ReconcileError> {
        match self.store.update(obj).await {
            Ok(stored) => Ok(Some(stored)),
            Err(e) if e.is_not_found() => {
                debug!(key = %display_key(obj), "object purged before write");
                Ok(None)
            }
            Err(source) => Err(ReconcileError::Write {
                key: display_key(obj),
                source,
            }),
        }
    }

    fn policy_error(obj: &K, source: anyhow::Error) -> ReconcileError {
        ReconcileError::Policy {
            key: display_key(obj),
            source,
        }
    }

    /// Attach the finalizer, then run the create hook
    pub async fn handle_create(&self, obj: K) -> Result<SyncOutcome, ReconcileError> {
        let mut finalizers = obj.finalizer_set();
        let persisted = if finalizers.insert(&self.finalizer) {
            let mut obj = obj;
            obj.set_finalizer_set(finalizers);
            match self.persist(&obj).await? {
                Some(stored) => {
                    info!(key = %display_key(&stored), finalizer = %self.finalizer, "finalizer added");
                    stored
                }
                None => return Ok(SyncOutcome::NotFound),
            }
        } else {
            obj
        };

        self.policy
            .on_create(&persisted)
            .await
            .map_err(|e| Self::policy_error(&persisted, e))?;
        Ok(SyncOutcome::Created)
    }

    pub async fn handle_update(&self, obj: K) -> Result<SyncOutcome, ReconcileError> {
        self.policy
            .on_update(&obj)
            .await
            .map_err(|e| Self::policy_error(&obj, e))?;
        Ok(SyncOutcome::Updated)
    }

    /// Run cleanup, then release the finalizer
    pub async fn handle_delete(&self, obj: K) -> Result<SyncOutcome, ReconcileError> {
        self.policy
            .on_delete(&obj)
            .await
            .map_err(|e| Self::policy_error(&obj, e))?;

        let mut finalizers = obj.finalizer_set();
        if !finalizers.remove(&self.finalizer) {
            return Ok(SyncOutcome::Finalized);
        }
        let mut obj = obj;
        obj.set_finalizer_set(finalizers);
        match self.persist(&obj).await? {
            Some(_) => {
                info!(key = %display_key(&obj), finalizer = %self.finalizer, "finalizer removed");
                Ok(SyncOutcome::Finalized)
            }
            None => Ok(SyncOutcome::NotFound),
        }
    }
}
