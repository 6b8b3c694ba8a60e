//! In-process clustering engine.
//!
//! `LocalCluster` is a process-local hub; every [`LocalEngine`] spawned from
//! it shares one set of named structures and sees the others' membership
//! changes. It backs the crate's own test suite and works as a single-process
//! stand-in where no external engine is deployed.

use crate::config::ClusterConfig;
use crate::engine::{
    ClientListener, ClusterEngine, EngineCounter, EngineError, EngineFactory, EngineMap,
    EngineMultiMap, EngineSemaphore, ListenerId, MembershipListener, NodeId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Default)]
struct NodeEntry {
    /// Client-mode nodes register listeners but are not members.
    is_member: bool,
    membership_listeners: HashMap<String, Arc<dyn MembershipListener>>,
    client_listeners: HashMap<String, Arc<dyn ClientListener>>,
}

#[derive(Default)]
struct Hub {
    nodes: Mutex<HashMap<NodeId, NodeEntry>>,
    maps: Mutex<HashMap<String, Arc<LocalMap>>>,
    multi_maps: Mutex<HashMap<String, Arc<LocalMultiMap>>>,
    counters: Mutex<HashMap<String, Arc<LocalCounter>>>,
    semaphores: Mutex<HashMap<String, Arc<LocalSemaphore>>>,
}

impl Hub {
    /// Snapshot the membership listeners of every node except `skip`, so
    /// callbacks run without the nodes lock held (listeners may call back
    /// into the engine).
    fn membership_listeners_except(&self, skip: &str) -> Vec<Arc<dyn MembershipListener>> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .iter()
            .filter(|(id, _)| id.as_str() != skip)
            .flat_map(|(_, entry)| entry.membership_listeners.values().cloned())
            .collect()
    }

    fn client_listeners(&self) -> Vec<Arc<dyn ClientListener>> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .values()
            .flat_map(|entry| entry.client_listeners.values().cloned())
            .collect()
    }
}

/// A process-local cluster: spawns engines sharing one membership view and
/// one set of named structures.
#[derive(Default)]
pub struct LocalCluster {
    hub: Arc<Hub>,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a full member instance. Existing members observe a
    /// member-added event.
    pub fn start_member(&self) -> Arc<LocalEngine> {
        self.start(true)
    }

    /// Start a client-mode instance: it can use structures and observe
    /// membership, but is not itself a member and dispatches no
    /// client-session events.
    pub fn start_client(&self) -> Arc<LocalEngine> {
        self.start(false)
    }

    fn start(&self, is_member: bool) -> Arc<LocalEngine> {
        let node_id = Uuid::new_v4().to_string();
        {
            let mut nodes = self.hub.nodes.lock().unwrap();
            nodes.insert(
                node_id.clone(),
                NodeEntry {
                    is_member,
                    ..NodeEntry::default()
                },
            );
        }
        if is_member {
            for listener in self.hub.membership_listeners_except(&node_id) {
                listener.member_added(&node_id);
            }
        }
        tracing::debug!(%node_id, is_member, "Started local engine");

        Arc::new(LocalEngine {
            hub: self.hub.clone(),
            node_id,
            is_member,
            running: AtomicBool::new(true),
            shutdown_failures: AtomicU32::new(0),
        })
    }

    /// Identities of current members, as the hub sees them.
    pub fn members(&self) -> Vec<NodeId> {
        let nodes = self.hub.nodes.lock().unwrap();
        nodes
            .iter()
            .filter(|(_, entry)| entry.is_member)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Simulate a client session opening; member instances that registered
    /// client listeners observe it.
    pub fn connect_client(&self, client_id: &str) {
        for listener in self.hub.client_listeners() {
            listener.client_connected(client_id);
        }
    }

    /// Simulate a client session closing.
    pub fn disconnect_client(&self, client_id: &str) {
        for listener in self.hub.client_listeners() {
            listener.client_disconnected(client_id);
        }
    }
}

impl EngineFactory for LocalCluster {
    fn create(
        &self,
        config: Option<ClusterConfig>,
    ) -> Result<Arc<dyn ClusterEngine>, EngineError> {
        if let Some(name) = config.as_ref().and_then(|c| c.cluster_name.as_deref()) {
            tracing::debug!(cluster_name = name, "Creating local engine");
        }
        Ok(self.start_member())
    }
}

/// One node of a [`LocalCluster`].
pub struct LocalEngine {
    hub: Arc<Hub>,
    node_id: NodeId,
    is_member: bool,
    running: AtomicBool,
    shutdown_failures: AtomicU32,
}

impl LocalEngine {
    /// Make the next `count` shutdown calls fail transiently, leaving the
    /// instance running. Models engines that reject shutdown while internal
    /// services are still tearing down.
    pub fn inject_shutdown_failures(&self, count: u32) {
        self.shutdown_failures.store(count, Ordering::SeqCst);
    }

    fn check_running(&self) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::new("local engine is not running"))
        }
    }

    fn with_entry<T>(
        &self,
        f: impl FnOnce(&mut NodeEntry) -> T,
    ) -> Result<T, EngineError> {
        let mut nodes = self.hub.nodes.lock().unwrap();
        nodes
            .get_mut(&self.node_id)
            .map(f)
            .ok_or_else(|| EngineError::new("local engine is not registered"))
    }
}

impl ClusterEngine for LocalEngine {
    fn local_node_id(&self) -> NodeId {
        self.node_id.clone()
    }

    fn members(&self) -> Vec<NodeId> {
        let nodes = self.hub.nodes.lock().unwrap();
        nodes
            .iter()
            .filter(|(_, entry)| entry.is_member)
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn add_membership_listener(
        &self,
        listener: Arc<dyn MembershipListener>,
    ) -> Result<ListenerId, EngineError> {
        self.check_running()?;
        let id = Uuid::new_v4().to_string();
        self.with_entry(|entry| {
            entry.membership_listeners.insert(id.clone(), listener);
        })?;
        Ok(ListenerId::new(id))
    }

    fn remove_membership_listener(&self, id: &ListenerId) -> Result<bool, EngineError> {
        self.with_entry(|entry| entry.membership_listeners.remove(id.as_str()).is_some())
    }

    fn supports_client_events(&self) -> bool {
        self.is_member
    }

    fn add_client_listener(
        &self,
        listener: Arc<dyn ClientListener>,
    ) -> Result<ListenerId, EngineError> {
        self.check_running()?;
        if !self.is_member {
            return Err(EngineError::new(
                "client-mode engine has no client-session service",
            ));
        }
        let id = Uuid::new_v4().to_string();
        self.with_entry(|entry| {
            entry.client_listeners.insert(id.clone(), listener);
        })?;
        Ok(ListenerId::new(id))
    }

    fn remove_client_listener(&self, id: &ListenerId) -> Result<bool, EngineError> {
        self.with_entry(|entry| entry.client_listeners.remove(id.as_str()).is_some())
    }

    fn map(&self, name: &str) -> Result<Arc<dyn EngineMap>, EngineError> {
        self.check_running()?;
        let mut maps = self.hub.maps.lock().unwrap();
        let map = maps.entry(name.to_string()).or_default().clone();
        Ok(map)
    }

    fn multi_map(&self, name: &str) -> Result<Arc<dyn EngineMultiMap>, EngineError> {
        self.check_running()?;
        let mut maps = self.hub.multi_maps.lock().unwrap();
        let map = maps.entry(name.to_string()).or_default().clone();
        Ok(map)
    }

    fn counter(&self, name: &str) -> Result<Arc<dyn EngineCounter>, EngineError> {
        self.check_running()?;
        let mut counters = self.hub.counters.lock().unwrap();
        let counter = counters.entry(name.to_string()).or_default().clone();
        Ok(counter)
    }

    fn semaphore(&self, name: &str) -> Result<Arc<dyn EngineSemaphore>, EngineError> {
        self.check_running()?;
        let mut semaphores = self.hub.semaphores.lock().unwrap();
        let semaphore = semaphores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalSemaphore::new(1)))
            .clone();
        Ok(semaphore)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        let pending = self.shutdown_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.shutdown_failures.store(pending - 1, Ordering::SeqCst);
            return Err(EngineError::new("shutdown rejected, try again"));
        }
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        {
            let mut nodes = self.hub.nodes.lock().unwrap();
            nodes.remove(&self.node_id);
        }
        if self.is_member {
            for listener in self.hub.membership_listeners_except(&self.node_id) {
                listener.member_removed(&self.node_id);
            }
        }
        tracing::debug!(node_id = %self.node_id, "Local engine shut down");
        Ok(())
    }
}

#[derive(Default)]
struct LocalMap {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl EngineMap for LocalMap {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.entries.lock().unwrap().insert(key, value))
    }

    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.entries.lock().unwrap().remove(key))
    }

    fn clear(&self) -> Result<(), EngineError> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }

    fn len(&self) -> Result<usize, EngineError> {
        Ok(self.entries.lock().unwrap().len())
    }
}

#[derive(Default)]
struct LocalMultiMap {
    entries: Mutex<HashMap<Vec<u8>, Vec<Vec<u8>>>>,
}

impl EngineMultiMap for LocalMultiMap {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EngineError> {
        let mut entries = self.entries.lock().unwrap();
        let bag = entries.entry(key).or_default();
        // Set semantics per key, matching the engine contract.
        if !bag.contains(&value) {
            bag.push(value);
        }
        Ok(())
    }

    fn values(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, EngineError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn remove(&self, key: &[u8], value: &[u8]) -> Result<bool, EngineError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(bag) = entries.get_mut(key) else {
            return Ok(false);
        };
        let Some(pos) = bag.iter().position(|v| v == value) else {
            return Ok(false);
        };
        bag.remove(pos);
        if bag.is_empty() {
            entries.remove(key);
        }
        Ok(true)
    }

    fn remove_value(&self, value: &[u8]) -> Result<(), EngineError> {
        let mut entries = self.entries.lock().unwrap();
        entries.retain(|_, bag| {
            bag.retain(|v| v != value);
            !bag.is_empty()
        });
        Ok(())
    }
}

#[derive(Default)]
struct LocalCounter {
    value: AtomicI64,
}

impl EngineCounter for LocalCounter {
    fn get(&self) -> Result<i64, EngineError> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    fn add_and_get(&self, delta: i64) -> Result<i64, EngineError> {
        Ok(self.value.fetch_add(delta, Ordering::SeqCst) + delta)
    }

    fn get_and_add(&self, delta: i64) -> Result<i64, EngineError> {
        Ok(self.value.fetch_add(delta, Ordering::SeqCst))
    }

    fn compare_and_set(&self, expected: i64, new: i64) -> Result<bool, EngineError> {
        Ok(self
            .value
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }
}

struct LocalSemaphore {
    permits: Mutex<u32>,
    available: Condvar,
}

impl LocalSemaphore {
    fn new(permits: u32) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }
}

impl EngineSemaphore for LocalSemaphore {
    fn try_acquire(&self, timeout: Duration) -> Result<bool, EngineError> {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock().unwrap();
        loop {
            if *permits > 0 {
                *permits -= 1;
                return Ok(true);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let (guard, result) = self.available.wait_timeout(permits, remaining).unwrap();
            permits = guard;
            if result.timed_out() && *permits == 0 {
                return Ok(false);
            }
        }
    }

    fn release(&self) -> Result<(), EngineError> {
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.available.notify_one();
        Ok(())
    }
}
