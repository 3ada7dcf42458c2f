//! # Astro Controller
//!
//! A Kubernetes controller for `Astro` resources built on a small,
//! finalizer-gated reconciliation engine.
//!
//! ## Overview
//!
//! 1. **Watch** - an [`store::EventSource`] reports adds, updates and deletes
//! 2. **Queue** - events become `namespace/name` keys in a deduplicating,
//!    rate-limited [`controller::KeyQueue`]
//! 3. **Reconcile** - workers sync each key: new objects get the controller's
//!    finalizer, deleting objects have it released after cleanup
//!
//! The engine is generic over the resource type and the store, so it runs
//! against the Kubernetes API ([`store::k8s`]) or fully in memory
//! ([`store::memory`]).

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod store;
