//! Membership event relay.
//!
//! Subscribed to the engine's membership and client-session events at join
//! and forwards them to the single registered [`NodeListener`]. Events may
//! arrive on engine-owned threads concurrently with join/leave transitions;
//! the active flag gates forwarding and a short exclusion section keeps
//! dispatch and flag flips serialized, so once a deactivation returns no
//! further callback can land. Events delivered before activation or after
//! deactivation are dropped (no buffering or replay).

use crate::engine::{ClientListener, MembershipListener};
use arc_swap::ArcSwapOption;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Receives node arrival/departure notifications from the cluster manager.
///
/// At most one listener is registered at a time; registering a new one
/// replaces the previous. Callbacks run on engine-owned threads and must not
/// block; a panicking listener is contained and logged, never propagated
/// into the engine's dispatch machinery.
pub trait NodeListener: Send + Sync {
    fn node_added(&self, node_id: &str);
    fn node_left(&self, node_id: &str);
}

impl<T: NodeListener + ?Sized> NodeListener for Arc<T> {
    fn node_added(&self, node_id: &str) {
        (**self).node_added(node_id);
    }

    fn node_left(&self, node_id: &str) {
        (**self).node_left(node_id);
    }
}

/// Shared state between the lifecycle manager and the relay: the active flag
/// gating event forwarding and the registered listener.
pub(crate) struct RelayState {
    active: AtomicBool,
    // Serializes flag flips with in-flight dispatch: set_active(false) does
    // not return while a callback is running, and no callback starts after
    // it returns. Never held around engine or primitive operations.
    transition: Mutex<()>,
    // Boxed because arc-swap slots need thin pointers.
    listener: ArcSwapOption<Box<dyn NodeListener>>,
}

impl RelayState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(false),
            transition: Mutex::new(()),
            listener: ArcSwapOption::empty(),
        })
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn set_active(&self, active: bool) {
        let _guard = self.transition.lock().unwrap();
        self.active.store(active, Ordering::Release);
    }

    /// Replace the registered listener; the previous one is discarded.
    pub(crate) fn set_listener(&self, listener: Box<dyn NodeListener>) {
        self.listener.store(Some(Arc::new(listener)));
    }

    fn notify(&self, node_id: &str, added: bool) {
        let _guard = self.transition.lock().unwrap();
        if !self.is_active() {
            return;
        }
        let Some(listener) = self.listener.load_full() else {
            return;
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if added {
                listener.node_added(node_id);
            } else {
                listener.node_left(node_id);
            }
        }));
        if outcome.is_err() {
            let event = if added { "node_added" } else { "node_left" };
            tracing::error!(node_id, event, "Node listener panicked");
        }
    }

    pub(crate) fn notify_added(&self, node_id: &str) {
        self.notify(node_id, true);
    }

    pub(crate) fn notify_left(&self, node_id: &str) {
        self.notify(node_id, false);
    }
}

/// The callback object handed to the engine at join. Members and clients
/// share one vocabulary: both surface as node arrivals and departures.
pub(crate) struct MembershipRelay {
    state: Arc<RelayState>,
}

impl MembershipRelay {
    pub(crate) fn new(state: Arc<RelayState>) -> Self {
        Self { state }
    }
}

impl MembershipListener for MembershipRelay {
    fn member_added(&self, node_id: &str) {
        self.state.notify_added(node_id);
    }

    fn member_removed(&self, node_id: &str) {
        self.state.notify_left(node_id);
    }
}

impl ClientListener for MembershipRelay {
    fn client_connected(&self, node_id: &str) {
        self.state.notify_added(node_id);
    }

    fn client_disconnected(&self, node_id: &str) {
        self.state.notify_left(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingListener {
        added: Mutex<Vec<String>>,
        left: Mutex<Vec<String>>,
    }

    impl NodeListener for RecordingListener {
        fn node_added(&self, node_id: &str) {
            self.added.lock().unwrap().push(node_id.to_string());
        }

        fn node_left(&self, node_id: &str) {
            self.left.lock().unwrap().push(node_id.to_string());
        }
    }

    #[test]
    fn test_events_dropped_while_inactive() {
        let state = RelayState::new();
        let listener = Arc::new(RecordingListener::default());
        state.set_listener(Box::new(listener.clone()));

        state.notify_added("node-1");
        state.notify_left("node-1");

        assert!(listener.added.lock().unwrap().is_empty());
        assert!(listener.left.lock().unwrap().is_empty());
    }

    #[test]
    fn test_events_forwarded_while_active() {
        let state = RelayState::new();
        let listener = Arc::new(RecordingListener::default());
        state.set_listener(Box::new(listener.clone()));
        state.set_active(true);

        let relay = MembershipRelay::new(state.clone());
        relay.member_added("node-1");
        relay.client_connected("client-1");
        relay.member_removed("node-1");

        assert_eq!(*listener.added.lock().unwrap(), vec!["node-1", "client-1"]);
        assert_eq!(*listener.left.lock().unwrap(), vec!["node-1"]);
    }

    #[test]
    fn test_replacing_listener_discards_previous() {
        let state = RelayState::new();
        state.set_active(true);

        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());
        state.set_listener(Box::new(first.clone()));
        state.set_listener(Box::new(second.clone()));

        state.notify_added("node-2");

        assert!(first.added.lock().unwrap().is_empty());
        assert_eq!(*second.added.lock().unwrap(), vec!["node-2"]);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        struct PanickyOnLeft {
            added: Mutex<Vec<String>>,
        }

        impl NodeListener for PanickyOnLeft {
            fn node_added(&self, node_id: &str) {
                self.added.lock().unwrap().push(node_id.to_string());
            }

            fn node_left(&self, _node_id: &str) {
                panic!("listener bug");
            }
        }

        let state = RelayState::new();
        state.set_active(true);
        let listener = Arc::new(PanickyOnLeft {
            added: Mutex::new(Vec::new()),
        });
        state.set_listener(Box::new(listener.clone()));

        state.notify_left("node-3");
        // A later event still reaches the same listener.
        state.notify_added("node-4");

        assert_eq!(*listener.added.lock().unwrap(), vec!["node-4"]);
    }

    #[test]
    fn test_deactivation_waits_for_in_flight_dispatch() {
        use std::sync::mpsc;
        use std::time::Duration;

        struct GatedListener {
            entered: mpsc::Sender<()>,
            release: Mutex<mpsc::Receiver<()>>,
            added: Mutex<Vec<String>>,
        }

        impl NodeListener for GatedListener {
            fn node_added(&self, node_id: &str) {
                self.added.lock().unwrap().push(node_id.to_string());
                self.entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }

            fn node_left(&self, _node_id: &str) {}
        }

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let listener = Arc::new(GatedListener {
            entered: entered_tx,
            release: Mutex::new(release_rx),
            added: Mutex::new(Vec::new()),
        });

        let state = RelayState::new();
        state.set_listener(Box::new(listener.clone()));
        state.set_active(true);

        let dispatch_state = state.clone();
        let dispatch = std::thread::spawn(move || {
            dispatch_state.notify_added("node-8");
        });
        entered_rx.recv().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let deactivate_state = state.clone();
        let deactivate = std::thread::spawn(move || {
            deactivate_state.set_active(false);
            done_tx.send(()).unwrap();
        });

        // Deactivation must not complete while the callback is running.
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        release_tx.send(()).unwrap();
        done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("deactivation finishes once the callback returns");
        dispatch.join().unwrap();
        deactivate.join().unwrap();

        // Once deactivation has returned, later events are dropped.
        state.notify_added("node-9");
        assert_eq!(*listener.added.lock().unwrap(), vec!["node-8"]);
    }

    #[test]
    fn test_no_listener_registered_is_quiet() {
        let state = RelayState::new();
        state.set_active(true);
        state.notify_added("node-5");
        state.notify_left("node-5");
    }
}
