//! Common test utilities for controller integration tests
//!
//! Provides object builders, a fast-retry configuration, and test doubles for
//! the store, the event source and the reconcile policy.

#![allow(dead_code)]

use anyhow::Result;
use astro_controller::config::ControllerConfig;
use astro_controller::controller::{ManagedObject, ObjectKey, ReconcilePolicy};
use astro_controller::crd::{Astro, AstroSpec, AstroStar};
use astro_controller::store::memory::InMemoryStore;
use astro_controller::store::{EventSource, ObjectStore, StoreError, WatchEvent};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FINALIZER: &str = "astros.astertower.kasterism.io";

pub fn astro(ns: &str, name: &str) -> Astro {
    let mut astro = Astro::new(
        name,
        AstroSpec {
            stars: vec![AstroStar {
                name: "web".to_string(),
                image: "nginx:1.27".to_string(),
                ..AstroStar::default()
            }],
        },
    );
    astro.metadata.namespace = Some(ns.to_string());
    astro
}

/// Configuration with short timeouts and near-immediate retries
pub fn fast_config() -> ControllerConfig {
    ControllerConfig {
        cache_sync_timeout_secs: 1,
        cache_sync_poll_interval_ms: 5,
        backoff_base_ms: 1,
        backoff_max_secs: 1,
        rate_limit_qps: 10_000.0,
        rate_limit_burst: 10_000,
        ..ControllerConfig::default()
    }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// Store wrapper whose first `failures` writes fail with a backend error
pub struct FlakyStore {
    inner: Arc<InMemoryStore<Astro>>,
    failures: AtomicUsize,
    pub write_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore<Astro>>, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
            write_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ObjectStore<Astro> for FlakyStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Astro>, StoreError> {
        self.inner.get(key).await
    }

    async fn update(&self, object: &Astro) -> Result<Astro, StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Backend("injected write failure".to_string()));
        }
        self.inner.update(object).await
    }
}

/// Event source that never finishes its initial listing
pub struct NeverSyncedSource;

impl EventSource<Astro> for NeverSyncedSource {
    fn watch(&self) -> Result<BoxStream<'static, WatchEvent<Astro>>, StoreError> {
        Ok(stream::pending().boxed())
    }

    fn has_synced(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hook {
    Create(String),
    Update(String),
    Delete(String),
}

/// Policy that records every hook call and detects concurrent calls per key
#[derive(Default)]
pub struct RecordingPolicy {
    calls: Mutex<Vec<Hook>>,
    active: Mutex<HashSet<String>>,
    pub overlaps: AtomicUsize,
    /// Time spent inside each hook, to widen race windows
    pub hold: Duration,
}

impl RecordingPolicy {
    pub fn holding(hold: Duration) -> Self {
        Self {
            hold,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Hook> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Hook) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|h| matches(h)).count()
    }

    async fn record(&self, hook: Hook, key: String) {
        if !self.active.lock().unwrap().insert(key.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }
        self.calls.lock().unwrap().push(hook);
        self.active.lock().unwrap().remove(&key);
    }
}

fn key_of(obj: &Astro) -> String {
    obj.object_key().unwrap().to_string()
}

#[async_trait]
impl ReconcilePolicy<Astro> for RecordingPolicy {
    async fn on_create(&self, obj: &Astro) -> Result<()> {
        let key = key_of(obj);
        self.record(Hook::Create(key.clone()), key).await;
        Ok(())
    }

    async fn on_update(&self, obj: &Astro) -> Result<()> {
        let key = key_of(obj);
        self.record(Hook::Update(key.clone()), key).await;
        Ok(())
    }

    async fn on_delete(&self, obj: &Astro) -> Result<()> {
        let key = key_of(obj);
        self.record(Hook::Delete(key.clone()), key).await;
        Ok(())
    }
}
