//! Cluster lifecycle manager.
//!
//! Owns the `Inactive -> Joining -> Active -> Leaving -> Inactive` state
//! machine over one engine instance, wires the membership relay, and hands
//! out the distributed-primitive wrappers. All engine-facing work crosses
//! the [`Bridge`]; join and leave serialize on a single async mutex so they
//! can never interleave or double-initialize.

use crate::config::ClusterConfig;
use crate::counter::Counter;
use crate::engine::{ClusterEngine, EngineFactory, ListenerId, NodeId};
use crate::lock::DistributedLock;
use crate::map::{AsyncMap, AsyncMultiMap, SyncMap};
use crate::relay::{MembershipRelay, NodeListener, RelayState};
use crate::{Bridge, Error};
use arc_swap::ArcSwapOption;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Locks are backed by engine semaphores under this prefix, keeping them out
/// of the application's semaphore namespace.
const LOCK_SEMAPHORE_PREFIX: &str = "__cluster.";

/// Well-known semaphore serializing shutdown across members.
const SHUTDOWN_LOCK_NAME: &str = "cluster.shutdownlock";
const SHUTDOWN_LOCK_WAIT: Duration = Duration::from_secs(30);

/// Shutdown can be rejected transiently while the engine tears down internal
/// services; it is retried with backoff up to this many attempts, then
/// surfaced as [`Error::ShutdownStalled`].
const SHUTDOWN_MAX_ATTEMPTS: u32 = 6;
const SHUTDOWN_BACKOFF_BASE_MS: u64 = 50;

/// Who tears the engine instance down at leave, fixed at construction.
enum Instance {
    /// Created by this manager at join and shut down at leave.
    Owned {
        factory: Arc<dyn EngineFactory>,
        config: Option<ClusterConfig>,
    },
    /// Supplied externally; never shut down by this manager.
    Borrowed(Arc<dyn ClusterEngine>),
}

/// Engine handle plus identity, present exactly while joined.
struct Attachment {
    engine: Arc<dyn ClusterEngine>,
    node_id: NodeId,
}

/// Listener registrations held between join and leave. Only touched under
/// the transition mutex.
#[derive(Default)]
struct Registrations {
    membership: Option<ListenerId>,
    client: Option<ListenerId>,
}

/// Bridges an async runtime to an external clustering engine.
///
/// Cheap to share behind an `Arc`; every caller-facing operation is
/// non-blocking.
///
/// # Example
///
/// ```rust,ignore
/// use cluster_bridge::{ClusterManager, local::LocalCluster};
/// use std::sync::Arc;
///
/// let cluster = Arc::new(LocalCluster::new());
/// let manager = ClusterManager::new(cluster);
/// manager.join().await?;
///
/// let counter = manager.counter("deployments").await?;
/// counter.increment_and_get().await?;
///
/// manager.leave().await?;
/// ```
pub struct ClusterManager {
    instance: Instance,
    bridge: Bridge,
    relay_state: Arc<RelayState>,
    attachment: ArcSwapOption<Attachment>,
    transition: Mutex<Registrations>,
}

impl ClusterManager {
    /// Manager for an owned instance: the engine is created at join (with
    /// configuration from the factory's loader) and shut down at leave.
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self::build(Instance::Owned {
            factory,
            config: None,
        })
    }

    /// Manager for an owned instance with explicit configuration, bypassing
    /// the factory's loader.
    pub fn with_config(factory: Arc<dyn EngineFactory>, config: ClusterConfig) -> Self {
        Self::build(Instance::Owned {
            factory,
            config: Some(config),
        })
    }

    /// Manager over an externally supplied instance. The instance is never
    /// shut down by this manager; leave only detaches from it.
    pub fn from_engine(engine: Arc<dyn ClusterEngine>) -> Self {
        Self::build(Instance::Borrowed(engine))
    }

    fn build(instance: Instance) -> Self {
        Self {
            instance,
            bridge: Bridge::new(),
            relay_state: RelayState::new(),
            attachment: ArcSwapOption::empty(),
            transition: Mutex::new(Registrations::default()),
        }
    }

    /// Join the cluster.
    ///
    /// A no-op when already active; concurrent calls serialize, so at most
    /// one engine instance is ever created. The active flag flips only after
    /// every step succeeded - on failure nothing is retained and the manager
    /// stays inactive. Membership events arriving before activation are
    /// dropped, not buffered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] when instance creation or listener
    /// subscription fails.
    pub async fn join(&self) -> Result<(), Error> {
        let mut regs = self.transition.lock().await;
        if self.relay_state.is_active() {
            tracing::debug!("Join requested while already active; ignoring");
            return Ok(());
        }
        if self.attachment.load_full().is_some() {
            // A failed leave left the engine attached; it must finish
            // tearing down before a new instance can be created.
            return Err(Error::LeaveIncomplete);
        }

        let relay_state = self.relay_state.clone();
        let outcome = match &self.instance {
            Instance::Owned { factory, config } => {
                let factory = factory.clone();
                let config = config.clone();
                self.bridge
                    .dispatch(move || {
                        let config = match config {
                            Some(c) => Some(c),
                            None => {
                                let loaded = factory.load_config();
                                if loaded.is_none() {
                                    tracing::warn!(
                                        "No cluster configuration found; \
                                         using engine defaults"
                                    );
                                }
                                loaded
                            }
                        };
                        let engine = factory.create(config)?;
                        match attach(&engine, relay_state) {
                            Ok(att) => Ok(att),
                            Err(e) => {
                                // Owned instance must not outlive a failed join.
                                if let Err(shutdown_err) = engine.shutdown() {
                                    tracing::warn!(
                                        "Failed to shut down engine after failed join: {}",
                                        shutdown_err
                                    );
                                }
                                Err(e)
                            }
                        }
                    })
                    .await?
            }
            Instance::Borrowed(engine) => {
                let engine = engine.clone();
                self.bridge
                    .dispatch(move || attach(&engine, relay_state))
                    .await?
            }
        };

        let (engine, node_id, membership, client) = outcome;
        tracing::info!(%node_id, "Joined cluster");

        regs.membership = Some(membership);
        regs.client = client;
        self.attachment.store(Some(Arc::new(Attachment { engine, node_id })));
        self.relay_state.set_active(true);
        Ok(())
    }

    /// Leave the cluster.
    ///
    /// A no-op success when detached. The active flag clears before any
    /// teardown work, so in-flight membership events stop being forwarded
    /// immediately - `is_active()` is false even if teardown then fails.
    /// On teardown failure the engine stays attached and reachable through
    /// `engine()`, and calling `leave()` again retries the teardown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShutdownStalled`] when an owned engine still reports
    /// itself running after the bounded retries, or [`Error::Engine`] when
    /// unsubscription fails.
    pub async fn leave(&self) -> Result<(), Error> {
        let mut regs = self.transition.lock().await;
        // Attachment presence, not the active flag, decides whether there
        // is anything to tear down: a failed leave leaves the manager
        // inactive but still attached.
        let Some(attachment) = self.attachment.load_full() else {
            return Ok(());
        };
        self.relay_state.set_active(false);

        let membership = regs.membership.take();
        let client = regs.client.take();
        let owned = matches!(self.instance, Instance::Owned { .. });
        let engine = attachment.engine.clone();
        let node_id = attachment.node_id.clone();

        let result: Result<(), Error> = self
            .bridge
            .dispatch(move || Ok(detach(&engine, membership, client, owned)))
            .await?;
        result?;

        self.attachment.store(None);
        tracing::info!(%node_id, "Left cluster");
        Ok(())
    }

    /// Pre-shutdown hook: best-effort acquisition of the well-known shutdown
    /// lock, letting a coordinating process serialize shutdown across
    /// members.
    ///
    /// Only meaningful when active and owning the instance. Acquisition
    /// failure or timeout is swallowed; the permit is released by the engine
    /// when the instance goes down, not here.
    pub async fn before_leave(&self) {
        if !self.relay_state.is_active() {
            return;
        }
        if !matches!(self.instance, Instance::Owned { .. }) {
            return;
        }
        let Some(attachment) = self.attachment.load_full() else {
            return;
        };
        let engine = attachment.engine.clone();
        if !engine.is_running() {
            return;
        }

        let result = self
            .bridge
            .dispatch(move || {
                let semaphore = engine.semaphore(SHUTDOWN_LOCK_NAME)?;
                semaphore.try_acquire(SHUTDOWN_LOCK_WAIT)
            })
            .await;
        match result {
            Ok(true) => tracing::debug!("Acquired shutdown lock"),
            Ok(false) => tracing::debug!("Timed out waiting for shutdown lock"),
            Err(e) => tracing::debug!("Could not acquire shutdown lock: {}", e),
        }
    }

    pub fn is_active(&self) -> bool {
        self.relay_state.is_active()
    }

    /// Identity of the local node, available while joined.
    pub fn node_id(&self) -> Option<NodeId> {
        self.attachment.load_full().map(|a| a.node_id.clone())
    }

    /// Identities of all current cluster members.
    ///
    /// Queries the engine directly on the calling thread, like the engine's
    /// own member list. May perform engine-side work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotJoined`] before `join()`.
    pub fn nodes(&self) -> Result<Vec<NodeId>, Error> {
        Ok(self.attached()?.members())
    }

    /// Register the node listener, replacing any previous one. Membership
    /// and client-session changes are forwarded to it while active.
    pub fn set_node_listener(&self, listener: impl NodeListener + 'static) {
        self.relay_state.set_listener(Box::new(listener));
    }

    /// The engine instance currently attached, if joined. Exposed for
    /// callers that need engine-specific configuration access.
    pub fn engine(&self) -> Option<Arc<dyn ClusterEngine>> {
        self.attachment.load_full().map(|a| a.engine.clone())
    }

    /// Resolve the named distributed map as a non-blocking typed wrapper.
    ///
    /// A fresh wrapper is handed back on every call; callers may cache it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotJoined`] before `join()`; resolution failures
    /// surface through the Bridge as [`Error::Engine`].
    pub async fn async_map<K, V>(&self, name: &str) -> Result<AsyncMap<K, V>, Error>
    where
        K: Serialize + DeserializeOwned + Send + 'static,
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        let engine = self.attached()?;
        let name = name.to_string();
        let inner = self.bridge.dispatch(move || engine.map(&name)).await?;
        Ok(AsyncMap::new(inner, self.bridge))
    }

    /// Resolve the named distributed multimap as a non-blocking typed
    /// wrapper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotJoined`] before `join()`; resolution failures
    /// surface through the Bridge as [`Error::Engine`].
    pub async fn async_multi_map<K, V>(&self, name: &str) -> Result<AsyncMultiMap<K, V>, Error>
    where
        K: Serialize + DeserializeOwned + Send + 'static,
        V: Serialize + DeserializeOwned + Send + 'static,
    {
        let engine = self.attached()?;
        let name = name.to_string();
        let inner = self.bridge.dispatch(move || engine.multi_map(&name)).await?;
        Ok(AsyncMultiMap::new(inner, self.bridge))
    }

    /// Direct blocking view of the named distributed map, for callers that
    /// accept blocking access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotJoined`] before `join()`.
    pub fn sync_map<K, V>(&self, name: &str) -> Result<SyncMap<K, V>, Error>
    where
        K: Serialize + DeserializeOwned,
        V: Serialize + DeserializeOwned,
    {
        let engine = self.attached()?;
        Ok(SyncMap::new(engine.map(name)?))
    }

    /// Acquire the named cluster-wide lock, waiting at most `timeout`.
    ///
    /// The wait happens on the blocking pool; the calling task stays
    /// suspended, never blocked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] carrying the lock name when the bound
    /// expires before a permit frees up.
    pub async fn lock_with_timeout(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<DistributedLock, Error> {
        let engine = self.attached()?;
        let semaphore_name = format!("{}{}", LOCK_SEMAPHORE_PREFIX, name);
        let (semaphore, acquired) = self
            .bridge
            .dispatch(move || {
                let semaphore = engine.semaphore(&semaphore_name)?;
                let acquired = semaphore.try_acquire(timeout)?;
                Ok((semaphore, acquired))
            })
            .await?;

        if acquired {
            Ok(DistributedLock::new(semaphore, self.bridge, name.to_string()))
        } else {
            Err(Error::LockTimeout(name.to_string()))
        }
    }

    /// Resolve the named cluster-wide atomic counter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotJoined`] before `join()`; resolution failures
    /// surface through the Bridge as [`Error::Engine`].
    pub async fn counter(&self, name: &str) -> Result<Counter, Error> {
        let engine = self.attached()?;
        let name = name.to_string();
        let inner = self.bridge.dispatch(move || engine.counter(&name)).await?;
        Ok(Counter::new(inner, self.bridge))
    }

    fn attached(&self) -> Result<Arc<dyn ClusterEngine>, Error> {
        self.attachment
            .load_full()
            .map(|a| a.engine.clone())
            .ok_or(Error::NotJoined)
    }
}

type JoinOutcome = (
    Arc<dyn ClusterEngine>,
    NodeId,
    ListenerId,
    Option<ListenerId>,
);

/// Record identity and subscribe the relay. Runs on the blocking pool.
fn attach(
    engine: &Arc<dyn ClusterEngine>,
    relay_state: Arc<RelayState>,
) -> Result<JoinOutcome, crate::engine::EngineError> {
    let node_id = engine.local_node_id();
    let relay = Arc::new(MembershipRelay::new(relay_state));

    let membership = engine.add_membership_listener(relay.clone())?;
    // Client instances have no client-session service; the capability query
    // decides up front instead of trying and catching the failure.
    let client = if engine.supports_client_events() {
        match engine.add_client_listener(relay) {
            Ok(id) => Some(id),
            Err(e) => {
                if let Err(remove_err) = engine.remove_membership_listener(&membership) {
                    tracing::warn!(
                        "Failed to roll back membership listener: {}",
                        remove_err
                    );
                }
                return Err(e);
            }
        }
    } else {
        None
    };

    Ok((engine.clone(), node_id, membership, client))
}

/// Unsubscribe listeners and, for owned instances, shut the engine down.
/// Runs on the blocking pool.
fn detach(
    engine: &Arc<dyn ClusterEngine>,
    membership: Option<ListenerId>,
    client: Option<ListenerId>,
    owned: bool,
) -> Result<(), Error> {
    if let Some(id) = membership {
        match engine.remove_membership_listener(&id) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("No membership listener was registered"),
            Err(e) => return Err(Error::Engine(e)),
        }
    }
    if let Some(id) = client {
        match engine.remove_client_listener(&id) {
            Ok(true) => {}
            Ok(false) => tracing::warn!("No client listener was registered"),
            Err(e) => return Err(Error::Engine(e)),
        }
    }

    if owned {
        shutdown_with_retry(engine)?;
    }
    Ok(())
}

/// Retry shutdown while the engine still reports itself running.
///
/// The engine's shutdown call can be rejected transiently, so rejections are
/// only logged; the loop is bounded by attempt count with exponential
/// backoff, and exhaustion is a hard failure rather than the unbounded wait
/// this replaced.
fn shutdown_with_retry(engine: &Arc<dyn ClusterEngine>) -> Result<(), Error> {
    let mut attempt: u32 = 0;
    while engine.is_running() {
        if attempt >= SHUTDOWN_MAX_ATTEMPTS {
            return Err(Error::ShutdownStalled(attempt));
        }
        if let Err(e) = engine.shutdown() {
            tracing::debug!(attempt, "Engine shutdown rejected: {}", e);
        }
        if engine.is_running() {
            let backoff_ms = SHUTDOWN_BACKOFF_BASE_MS * 2u64.pow(attempt.min(4));
            std::thread::sleep(Duration::from_millis(backoff_ms));
        }
        attempt += 1;
    }
    Ok(())
}
