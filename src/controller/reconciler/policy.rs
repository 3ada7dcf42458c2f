//! # Reconcile Policy
//!
//! Hooks the reconciler calls at each lifecycle stage. The finalizer
//! bookkeeping is handled by the reconciler itself; a policy only adds the
//! domain work.

use crate::controller::object::ManagedObject;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ReconcilePolicy<K: ManagedObject>: Send + Sync {
    /// Called once the finalizer has been persisted on a new object
    ///
    /// An error here is retried, but the retry sees the finalizer and goes
    /// through [`ReconcilePolicy::on_update`] instead. This hook is not
    /// called again for the same object.
    async fn on_create(&self, _obj: &K) -> Result<()> {
        Ok(())
    }

    /// Called for objects that already carry the finalizer
    ///
    /// Also the retry path for a failed `on_create`, so it must converge any
    /// creation work that may not have completed.
    async fn on_update(&self, _obj: &K) -> Result<()> {
        Ok(())
    }

    /// Cleanup before the finalizer is released
    ///
    /// Returning an error keeps the finalizer in place and the key is retried.
    async fn on_delete(&self, _obj: &K) -> Result<()> {
        Ok(())
    }
}

/// Policy that only manages the finalizer
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPolicy;

#[async_trait]
impl<K: ManagedObject> ReconcilePolicy<K> for NoopPolicy {}
