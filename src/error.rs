use crate::engine::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Unexpected failure reported by the clustering engine.
    #[error("cluster engine error: {0}")]
    Engine(#[from] EngineError),

    /// Lock acquisition exceeded the caller-specified bound.
    #[error("timed out waiting to get lock {0}")]
    LockTimeout(String),

    /// The engine instance still reported itself running after the bounded
    /// number of shutdown attempts.
    #[error("engine still running after {0} shutdown attempts")]
    ShutdownStalled(u32),

    /// A failed leave left the engine attached; joining again requires the
    /// teardown to be retried first.
    #[error("previous leave did not complete; retry leave()")]
    LeaveIncomplete,

    /// A Bridge-dispatched operation panicked or was cancelled before
    /// delivering a result.
    #[error("blocking task failed: {0}")]
    Task(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A primitive was requested before `join()` attached an engine instance.
    #[error("cluster manager is not joined")]
    NotJoined,
}
