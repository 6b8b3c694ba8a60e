//! Cluster-wide atomic counter wrapper.

use crate::engine::EngineCounter;
use crate::{Bridge, Error};
use std::sync::Arc;

/// Async view of a named cluster-wide atomic integer.
///
/// Each operation is one round trip to the engine, dispatched through the
/// [`Bridge`] - there is no batching. Atomicity is the engine's, applied
/// cluster-wide.
pub struct Counter {
    inner: Arc<dyn EngineCounter>,
    bridge: Bridge,
}

impl Counter {
    pub(crate) fn new(inner: Arc<dyn EngineCounter>, bridge: Bridge) -> Self {
        Self { inner, bridge }
    }

    pub async fn get(&self) -> Result<i64, Error> {
        let counter = self.inner.clone();
        self.bridge.dispatch(move || counter.get()).await
    }

    pub async fn increment_and_get(&self) -> Result<i64, Error> {
        self.add_and_get(1).await
    }

    pub async fn get_and_increment(&self) -> Result<i64, Error> {
        self.get_and_add(1).await
    }

    pub async fn decrement_and_get(&self) -> Result<i64, Error> {
        self.add_and_get(-1).await
    }

    pub async fn add_and_get(&self, delta: i64) -> Result<i64, Error> {
        let counter = self.inner.clone();
        self.bridge.dispatch(move || counter.add_and_get(delta)).await
    }

    pub async fn get_and_add(&self, delta: i64) -> Result<i64, Error> {
        let counter = self.inner.clone();
        self.bridge.dispatch(move || counter.get_and_add(delta)).await
    }

    /// Set the counter to `new` only if it currently holds `expected`.
    /// Returns whether the swap happened.
    pub async fn compare_and_set(&self, expected: i64, new: i64) -> Result<bool, Error> {
        let counter = self.inner.clone();
        self.bridge
            .dispatch(move || counter.compare_and_set(expected, new))
            .await
    }
}
