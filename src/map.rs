//! Typed wrappers over the engine's distributed maps.
//!
//! The engine stores raw bytes; keys and values are encoded with serde_json
//! at this layer. Wrappers are created fresh on every lookup-by-name and hold
//! nothing beyond the engine structure and a [`Bridge`] handle; callers may
//! cache them externally.

use crate::engine::{EngineMap, EngineMultiMap};
use crate::{Bridge, Error};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Async view of a named distributed map.
///
/// Every operation is dispatched through the [`Bridge`]; the calling task
/// never blocks on the engine.
pub struct AsyncMap<K, V> {
    inner: Arc<dyn EngineMap>,
    bridge: Bridge,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> AsyncMap<K, V>
where
    K: Serialize + DeserializeOwned + Send + 'static,
    V: Serialize + DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(inner: Arc<dyn EngineMap>, bridge: Bridge) -> Self {
        Self {
            inner,
            bridge,
            _marker: PhantomData,
        }
    }

    pub async fn get(&self, key: &K) -> Result<Option<V>, Error> {
        let key = encode(key)?;
        let map = self.inner.clone();
        let raw = self.bridge.dispatch(move || map.get(&key)).await?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    /// Insert a key/value pair, returning the previous value if any.
    pub async fn put(&self, key: &K, value: &V) -> Result<Option<V>, Error> {
        let key = encode(key)?;
        let value = encode(value)?;
        let map = self.inner.clone();
        let raw = self.bridge.dispatch(move || map.put(key, value)).await?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    /// Remove a key, returning the previous value if any.
    pub async fn remove(&self, key: &K) -> Result<Option<V>, Error> {
        let key = encode(key)?;
        let map = self.inner.clone();
        let raw = self.bridge.dispatch(move || map.remove(&key)).await?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    pub async fn clear(&self) -> Result<(), Error> {
        let map = self.inner.clone();
        self.bridge.dispatch(move || map.clear()).await
    }

    pub async fn size(&self) -> Result<usize, Error> {
        let map = self.inner.clone();
        self.bridge.dispatch(move || map.len()).await
    }
}

/// Async view of a named distributed multimap (one key, many values).
pub struct AsyncMultiMap<K, V> {
    inner: Arc<dyn EngineMultiMap>,
    bridge: Bridge,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> AsyncMultiMap<K, V>
where
    K: Serialize + DeserializeOwned + Send + 'static,
    V: Serialize + DeserializeOwned + Send + 'static,
{
    pub(crate) fn new(inner: Arc<dyn EngineMultiMap>, bridge: Bridge) -> Self {
        Self {
            inner,
            bridge,
            _marker: PhantomData,
        }
    }

    pub async fn put(&self, key: &K, value: &V) -> Result<(), Error> {
        let key = encode(key)?;
        let value = encode(value)?;
        let map = self.inner.clone();
        self.bridge.dispatch(move || map.put(key, value)).await
    }

    pub async fn values(&self, key: &K) -> Result<Vec<V>, Error> {
        let key = encode(key)?;
        let map = self.inner.clone();
        let raw = self.bridge.dispatch(move || map.values(&key)).await?;
        raw.iter().map(|bytes| decode(bytes)).collect()
    }

    /// Remove one value under one key. Returns whether it was present.
    pub async fn remove(&self, key: &K, value: &V) -> Result<bool, Error> {
        let key = encode(key)?;
        let value = encode(value)?;
        let map = self.inner.clone();
        self.bridge.dispatch(move || map.remove(&key, &value)).await
    }

    /// Remove the value from every key's bag. Used to purge a departed
    /// node's entries wherever they appear.
    pub async fn remove_value(&self, value: &V) -> Result<(), Error> {
        let value = encode(value)?;
        let map = self.inner.clone();
        self.bridge.dispatch(move || map.remove_value(&value)).await
    }
}

/// Direct, blocking view of a named distributed map, for callers that accept
/// blocking access.
///
/// Calls go straight to the engine on the current thread; do not use from an
/// async context - use [`AsyncMap`] there instead.
pub struct SyncMap<K, V> {
    inner: Arc<dyn EngineMap>,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> SyncMap<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    pub(crate) fn new(inner: Arc<dyn EngineMap>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn get(&self, key: &K) -> Result<Option<V>, Error> {
        let key = encode(key)?;
        let raw = self.inner.get(&key).map_err(Error::Engine)?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn put(&self, key: &K, value: &V) -> Result<Option<V>, Error> {
        let key = encode(key)?;
        let value = encode(value)?;
        let raw = self.inner.put(key, value).map_err(Error::Engine)?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>, Error> {
        let key = encode(key)?;
        let raw = self.inner.remove(&key).map_err(Error::Engine)?;
        raw.map(|bytes| decode(&bytes)).transpose()
    }

    pub fn size(&self) -> Result<usize, Error> {
        self.inner.len().map_err(Error::Engine)
    }
}
