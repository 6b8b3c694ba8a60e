//! Async bridge between a tokio runtime and an external clustering engine.
//!
//! The engine (membership, distributed maps, counters, semaphores) is an
//! external collaborator reached through the narrow traits in [`engine`];
//! everything it provides is blocking by nature. This crate adds the parts
//! that make it usable from a non-blocking runtime:
//!
//! - [`ClusterManager`] - lifecycle state machine that creates or attaches
//!   an engine instance exactly once, joins and leaves the cluster, and
//!   hands out primitive wrappers
//! - a blocking-to-async [`Bridge`] running every engine call on the
//!   blocking pool and delivering results as futures
//! - a membership relay forwarding engine events to a single registered
//!   [`NodeListener`], gated by the manager's active state
//! - typed wrappers over the named distributed primitives:
//!   [`AsyncMap`], [`AsyncMultiMap`], [`Counter`], [`DistributedLock`]
//!
//! # Example
//!
//! ```rust,ignore
//! use cluster_bridge::{ClusterManager, local::LocalCluster};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cluster_bridge::Error> {
//!     let manager = ClusterManager::new(Arc::new(LocalCluster::new()));
//!     manager.join().await?;
//!
//!     let lock = manager
//!         .lock_with_timeout("migrations", Duration::from_secs(10))
//!         .await?;
//!     // ... exclusive work ...
//!     lock.release();
//!
//!     manager.leave().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Ownership
//!
//! A manager either *owns* its engine instance (created at join from an
//! [`engine::EngineFactory`], shut down at leave) or *borrows* one supplied
//! via [`ClusterManager::from_engine`], which it never shuts down.

mod bridge;
mod config;
mod counter;
pub mod engine;
mod error;
pub mod local;
mod lock;
mod manager;
mod map;
mod relay;

pub use bridge::Bridge;
pub use config::{ClusterConfig, CONFIG_ENV_VAR};
pub use counter::Counter;
pub use error::Error;
pub use lock::DistributedLock;
pub use manager::ClusterManager;
pub use map::{AsyncMap, AsyncMultiMap, SyncMap};
pub use relay::NodeListener;
