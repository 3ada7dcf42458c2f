//! # Controller
//!
//! Generic finalizer-managing control loop.
//!
//! - `key`: `namespace/name` queue keys
//! - `finalizer`: finalizer set manipulation
//! - `object`: metadata accessors for managed resources
//! - `queue`: deduplicating, rate-limited key queue
//! - `events`: watch event to queue key translation
//! - `reconciler`: per-key reconciliation and lifecycle hooks
//! - `worker`: worker tasks pulling from the queue
//! - `driver`: startup, cache sync and shutdown

pub mod driver;
pub mod events;
pub mod finalizer;
pub mod key;
pub mod object;
pub mod queue;
pub mod reconciler;
pub mod worker;

pub use driver::{Controller, ControllerError};
pub use events::EventHandler;
pub use key::{KeyError, ObjectKey};
pub use object::ManagedObject;
pub use queue::KeyQueue;
pub use reconciler::{
    NoopPolicy, ObjectState, ReconcileError, ReconcilePolicy, Reconciler, SyncOutcome,
};
pub use worker::WorkerPool;
