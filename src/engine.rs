//! The narrow interface consumed from the external clustering engine.
//!
//! Every trait here is blocking by nature - implementations may perform
//! network round trips. The rest of the crate only ever calls them through
//! the [`Bridge`](crate::Bridge), never on the caller's async context.

use crate::config::ClusterConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Unique identity of a cluster member or connected client.
pub type NodeId = String;

/// Failure reported by the clustering engine.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Opaque token returned when subscribing a listener; required for precise
/// unsubscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerId(String);

impl ListenerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Callback surface the engine invokes on membership changes.
///
/// Delivered on engine-owned threads; implementations must be prepared for
/// delivery concurrent with any adapter state transition.
pub trait MembershipListener: Send + Sync {
    fn member_added(&self, node_id: &str);
    fn member_removed(&self, node_id: &str);
}

/// Callback surface the engine invokes on client session changes.
///
/// Only available on instances where
/// [`ClusterEngine::supports_client_events`] is true.
pub trait ClientListener: Send + Sync {
    fn client_connected(&self, node_id: &str);
    fn client_disconnected(&self, node_id: &str);
}

/// A running clustered instance.
pub trait ClusterEngine: Send + Sync {
    /// Identity of the local member (or client) within the cluster.
    fn local_node_id(&self) -> NodeId;

    /// Identities of all current cluster members.
    fn members(&self) -> Vec<NodeId>;

    fn add_membership_listener(
        &self,
        listener: Arc<dyn MembershipListener>,
    ) -> Result<ListenerId, EngineError>;

    /// Returns `Ok(false)` when no listener with that id was registered.
    fn remove_membership_listener(&self, id: &ListenerId) -> Result<bool, EngineError>;

    /// Whether this instance dispatches client-session events. Client-mode
    /// instances (no voting membership) do not.
    fn supports_client_events(&self) -> bool;

    fn add_client_listener(
        &self,
        listener: Arc<dyn ClientListener>,
    ) -> Result<ListenerId, EngineError>;

    fn remove_client_listener(&self, id: &ListenerId) -> Result<bool, EngineError>;

    /// Resolve the named distributed map, creating it on first use.
    fn map(&self, name: &str) -> Result<Arc<dyn EngineMap>, EngineError>;

    fn multi_map(&self, name: &str) -> Result<Arc<dyn EngineMultiMap>, EngineError>;

    fn counter(&self, name: &str) -> Result<Arc<dyn EngineCounter>, EngineError>;

    /// Resolve the named counting-permit primitive. Named semaphores start
    /// with exactly one permit, so they act as cluster-wide mutexes.
    fn semaphore(&self, name: &str) -> Result<Arc<dyn EngineSemaphore>, EngineError>;

    fn is_running(&self) -> bool;

    /// Request shutdown. May fail transiently while the engine is tearing
    /// down internal services; callers retry while [`is_running`] holds.
    ///
    /// [`is_running`]: ClusterEngine::is_running
    fn shutdown(&self) -> Result<(), EngineError>;
}

/// A distributed map keyed and valued in raw bytes; typed access is layered
/// on top by [`AsyncMap`](crate::AsyncMap).
pub trait EngineMap: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    /// Insert, returning the previous value if any.
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<Option<Vec<u8>>, EngineError>;

    /// Remove, returning the previous value if any.
    fn remove(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    fn clear(&self) -> Result<(), EngineError>;

    fn len(&self) -> Result<usize, EngineError>;
}

/// A distributed multimap: each key maps to a bag of values.
pub trait EngineMultiMap: Send + Sync {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), EngineError>;

    fn values(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, EngineError>;

    /// Remove one value under one key; `Ok(false)` when it was not present.
    fn remove(&self, key: &[u8], value: &[u8]) -> Result<bool, EngineError>;

    /// Remove the value from every key's bag.
    fn remove_value(&self, value: &[u8]) -> Result<(), EngineError>;
}

/// A cluster-wide atomic integer.
pub trait EngineCounter: Send + Sync {
    fn get(&self) -> Result<i64, EngineError>;
    fn add_and_get(&self, delta: i64) -> Result<i64, EngineError>;
    fn get_and_add(&self, delta: i64) -> Result<i64, EngineError>;
    fn compare_and_set(&self, expected: i64, new: i64) -> Result<bool, EngineError>;
}

/// A cluster-wide counting-permit primitive.
pub trait EngineSemaphore: Send + Sync {
    /// Try to take one permit, waiting at most `timeout`. Returns whether a
    /// permit was acquired. The calling thread may block for the full bound.
    fn try_acquire(&self, timeout: Duration) -> Result<bool, EngineError>;

    fn release(&self) -> Result<(), EngineError>;
}

/// Creates owned engine instances for the lifecycle manager.
pub trait EngineFactory: Send + Sync {
    /// Locate external configuration; `None` means "use engine defaults" and
    /// is not an error.
    fn load_config(&self) -> Option<ClusterConfig> {
        ClusterConfig::from_env()
    }

    fn create(&self, config: Option<ClusterConfig>)
        -> Result<Arc<dyn ClusterEngine>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_id_roundtrip() {
        let id = ListenerId::new("abc-123");
        assert_eq!(id.as_str(), "abc-123");
        assert_eq!(id.to_string(), "abc-123");
        assert_eq!(id, ListenerId::new("abc-123"));
    }

    #[test]
    fn test_engine_error_display() {
        let e = EngineError::new("partition migration in progress");
        assert_eq!(e.to_string(), "partition migration in progress");
    }
}
