//! Blocking-to-async execution bridge.
//!
//! Engine calls are synchronous by nature (network round trips, semaphore
//! waits) and must never run on the caller's async context. The bridge runs
//! them on tokio's blocking pool and delivers the outcome through the
//! returned future. One pool slot is consumed per dispatch; backpressure is
//! the pool's own.

use crate::engine::EngineError;
use crate::Error;

/// Runs blocking engine operations off the async context.
///
/// Copyable so every primitive wrapper can hold its own handle by explicit
/// composition.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bridge {
    _priv: (),
}

impl Bridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `op` on the blocking pool and return its outcome.
    ///
    /// A panic inside `op` is captured and delivered as [`Error::Task`]; it
    /// never escapes into the pool's own error handling.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Engine`] when `op` itself fails and [`Error::Task`]
    /// when it panics or the runtime is shutting down.
    pub async fn dispatch<T, F>(&self, op: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    {
        match tokio::task::spawn_blocking(op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(Error::Engine(e)),
            Err(join) if join.is_panic() => {
                Err(Error::Task(format!("operation panicked: {}", join)))
            }
            Err(join) => Err(Error::Task(join.to_string())),
        }
    }

    /// Run `op` on the blocking pool without awaiting its outcome.
    ///
    /// Failures and panics are logged, not surfaced. Used where the caller's
    /// contract is fire-and-forget (lock release): completion of this call
    /// does not mean the operation has taken effect yet.
    pub fn dispatch_detached<F>(&self, what: &'static str, op: F)
    where
        F: FnOnce() -> Result<(), EngineError> + Send + 'static,
    {
        let handle = tokio::task::spawn_blocking(move || {
            if let Err(e) = op() {
                tracing::warn!(what, "Detached engine operation failed: {}", e);
            }
        });
        // Supervise so a panicking op does not vanish silently.
        let _supervisor = tokio::spawn(async move {
            if let Err(join) = handle.await {
                if join.is_panic() {
                    tracing::warn!(what, "Detached engine operation panicked: {}", join);
                }
            }
        });
    }
}
