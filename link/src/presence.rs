//! Network presence gate.
//!
//! Derives `online = network_reachable && page_visible` from raw platform
//! signals and lets the reconnect loop wait for that derived state. The
//! platform binding sits behind [`PresenceSource`] so hosts without presence
//! signals (servers, CLIs, tests) can pin the state or drive it by hand.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
mod browser;

#[cfg(all(feature = "wasm", target_arch = "wasm32"))]
pub use browser::BrowserPresence;

/// Raw presence signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceState {
    pub network_reachable: bool,
    pub page_visible: bool,
}

impl PresenceState {
    /// Both signals pinned to `online`.
    pub fn fixed(online: bool) -> Self {
        Self {
            network_reachable: online,
            page_visible: online,
        }
    }

    pub fn online(&self) -> bool {
        self.network_reachable && self.page_visible
    }
}

struct GateInner {
    state: PresenceState,
    waiters: Vec<(bool, oneshot::Sender<()>)>,
    disposed: bool,
}

struct GateShared {
    inner: Mutex<GateInner>,
}

impl GateShared {
    fn lock(&self) -> MutexGuard<'_, GateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Where platform signals are delivered. Cheap to clone.
#[derive(Clone)]
pub struct PresenceSink {
    shared: Arc<GateShared>,
}

impl fmt::Debug for PresenceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceSink").finish_non_exhaustive()
    }
}

impl PresenceSink {
    /// Connectivity changed.
    pub fn set_network_reachable(&self, reachable: bool) {
        self.update(|state| state.network_reachable = reachable);
    }

    /// Page/app visibility changed.
    pub fn set_page_visible(&self, visible: bool) {
        self.update(|state| state.page_visible = visible);
    }

    /// Set both signals at once.
    pub fn set_online(&self, online: bool) {
        self.update(|state| *state = PresenceState::fixed(online));
    }

    fn update(&self, apply: impl FnOnce(&mut PresenceState)) {
        let ready = {
            let mut inner = self.shared.lock();
            if inner.disposed {
                return;
            }
            let before = inner.state.online();
            apply(&mut inner.state);
            let after = inner.state.online();

            inner.waiters.retain(|(_, tx)| !tx.is_closed());
            if before == after {
                return;
            }
            log::debug!("[relay-link] Presence changed: online={}", after);

            let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.waiters)
                .into_iter()
                .partition(|(target, _)| *target == after);
            inner.waiters = pending;
            ready
        };
        for (_, tx) in ready {
            let _ = tx.send(());
        }
    }
}

/// Platform binding for presence signals.
pub trait PresenceSource: Send {
    /// Start delivering signals to `sink`, seeding the current state first.
    ///
    /// Returns `false` when the host has no presence signals at all; the
    /// gate then pins its state to the configured headless default.
    fn attach(&mut self, sink: PresenceSink) -> bool;

    /// Stop delivering signals.
    fn detach(&mut self) {}
}

/// Source for hosts without presence signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPresence;

impl PresenceSource for HeadlessPresence {
    fn attach(&mut self, _sink: PresenceSink) -> bool {
        false
    }
}

enum Wait {
    Ready,
    Pending(oneshot::Receiver<()>),
    Never,
}

/// Derived online/visible state with one-shot waits.
pub struct NetworkPresenceGate {
    shared: Arc<GateShared>,
    source: Mutex<Option<Box<dyn PresenceSource>>>,
}

impl fmt::Debug for NetworkPresenceGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("NetworkPresenceGate")
            .field("state", &inner.state)
            .field("waiters", &inner.waiters.len())
            .field("disposed", &inner.disposed)
            .finish()
    }
}

impl NetworkPresenceGate {
    /// Gate fed by `source`. If the source reports no platform signals the
    /// state stays pinned to `headless_online`.
    pub fn new(source: impl PresenceSource + 'static, headless_online: bool) -> Self {
        let gate = Self::with_state(PresenceState::fixed(headless_online));
        let mut source: Box<dyn PresenceSource> = Box::new(source);
        if source.attach(gate.sink()) {
            *gate.lock_source() = Some(source);
        } else {
            log::debug!(
                "[relay-link] No platform presence signals; presence pinned to online={}",
                headless_online
            );
        }
        gate
    }

    /// Gate for hosts without presence signals.
    pub fn headless(online: bool) -> Self {
        Self::new(HeadlessPresence, online)
    }

    /// Stub gate that is always open.
    pub fn always_online() -> Self {
        Self::headless(true)
    }

    /// Gate driven by hand through the returned sink.
    pub fn manual(initial_online: bool) -> (Self, PresenceSink) {
        let gate = Self::with_state(PresenceState::fixed(initial_online));
        let sink = gate.sink();
        (gate, sink)
    }

    fn with_state(state: PresenceState) -> Self {
        Self {
            shared: Arc::new(GateShared {
                inner: Mutex::new(GateInner {
                    state,
                    waiters: Vec::new(),
                    disposed: false,
                }),
            }),
            source: Mutex::new(None),
        }
    }

    fn sink(&self) -> PresenceSink {
        PresenceSink {
            shared: self.shared.clone(),
        }
    }

    fn lock_source(&self) -> MutexGuard<'_, Option<Box<dyn PresenceSource>>> {
        self.source.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn online(&self) -> bool {
        self.shared.lock().state.online()
    }

    pub fn state(&self) -> PresenceState {
        self.shared.lock().state
    }

    /// Resolves once `online() == target`: immediately if it already holds,
    /// otherwise on the first transition to `target`. One-shot.
    ///
    /// Never resolves once the gate is disposed; callers race it against
    /// their own cancellation.
    pub fn wait_for(&self, target: bool) -> impl Future<Output = ()> + Send + 'static {
        let wait = {
            let mut inner = self.shared.lock();
            if inner.disposed {
                Wait::Never
            } else if inner.state.online() == target {
                Wait::Ready
            } else {
                // Drop waits abandoned by their callers.
                inner.waiters.retain(|(_, tx)| !tx.is_closed());
                let (tx, rx) = oneshot::channel();
                inner.waiters.push((target, tx));
                Wait::Pending(rx)
            }
        };

        async move {
            match wait {
                Wait::Ready => {},
                Wait::Pending(rx) => {
                    if rx.await.is_err() {
                        std::future::pending::<()>().await;
                    }
                },
                Wait::Never => std::future::pending::<()>().await,
            }
        }
    }

    /// Detach the platform binding. Outstanding and future waits stay
    /// pending forever and signals are ignored. Idempotent.
    pub fn dispose(&self) {
        {
            let mut inner = self.shared.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.waiters.clear();
        }
        if let Some(mut source) = self.lock_source().take() {
            source.detach();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }
}

impl Drop for NetworkPresenceGate {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FakeSource {
        sink: Arc<Mutex<Option<PresenceSink>>>,
        detached: Arc<AtomicBool>,
    }

    impl PresenceSource for FakeSource {
        fn attach(&mut self, sink: PresenceSink) -> bool {
            sink.set_network_reachable(true);
            sink.set_page_visible(false);
            *self.sink.lock().unwrap() = Some(sink);
            true
        }

        fn detach(&mut self) {
            self.detached.store(true, Ordering::SeqCst);
        }
    }

    async fn resolves(fut: impl Future<Output = ()>) -> bool {
        tokio::time::timeout(Duration::from_millis(50), fut).await.is_ok()
    }

    #[test]
    fn test_online_is_derived_from_both_signals() {
        let (gate, sink) = NetworkPresenceGate::manual(true);
        assert!(gate.online());
        sink.set_page_visible(false);
        assert!(!gate.online());
        sink.set_network_reachable(false);
        sink.set_page_visible(true);
        assert!(!gate.online());
        sink.set_network_reachable(true);
        assert!(gate.online());
    }

    #[tokio::test]
    async fn test_wait_for_resolves_immediately_when_matching() {
        let (gate, _sink) = NetworkPresenceGate::manual(true);
        assert!(resolves(gate.wait_for(true)).await);
    }

    #[tokio::test]
    async fn test_wait_for_resolves_on_transition() {
        let (gate, sink) = NetworkPresenceGate::manual(false);
        let wait = tokio::spawn(gate.wait_for(true));
        tokio::task::yield_now().await;
        assert!(!wait.is_finished());

        sink.set_online(true);
        tokio::time::timeout(Duration::from_millis(100), wait)
            .await
            .expect("wait should resolve after going online")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_is_not_resolved_by_other_transition() {
        let (gate, sink) = NetworkPresenceGate::manual(true);
        let wait_online = gate.wait_for(true);
        let wait_offline = gate.wait_for(false);

        sink.set_page_visible(false);
        assert!(resolves(wait_online).await, "already online when registered");
        assert!(resolves(wait_offline).await);

        let wait_offline_again = gate.wait_for(false);
        sink.set_network_reachable(false);
        assert!(resolves(wait_offline_again).await, "state already offline");
    }

    #[tokio::test]
    async fn test_brief_blip_still_resolves_waiter() {
        let (gate, sink) = NetworkPresenceGate::manual(true);
        let wait_offline = gate.wait_for(false);
        sink.set_online(false);
        sink.set_online(true);
        assert!(resolves(wait_offline).await, "one-shot waiters latch the transition");
    }

    #[test]
    fn test_abandoned_waits_do_not_accumulate_without_signals() {
        let gate = NetworkPresenceGate::always_online();
        for _ in 0..1000 {
            drop(gate.wait_for(false));
        }
        assert_eq!(gate.shared.lock().waiters.len(), 1);

        let (gate, _sink) = NetworkPresenceGate::manual(false);
        let live = gate.wait_for(true);
        for _ in 0..1000 {
            drop(gate.wait_for(true));
        }
        assert_eq!(gate.shared.lock().waiters.len(), 2, "the live wait is kept");
        drop(live);
    }

    #[tokio::test]
    async fn test_dispose_leaves_waits_pending() {
        let (gate, sink) = NetworkPresenceGate::manual(false);
        let wait = gate.wait_for(true);
        gate.dispose();
        sink.set_online(true);
        assert!(!resolves(wait).await);
        assert!(!resolves(gate.wait_for(false)).await);
        assert!(gate.is_disposed());
    }

    #[test]
    fn test_headless_defaults() {
        assert!(!NetworkPresenceGate::headless(false).online());
        assert!(NetworkPresenceGate::always_online().online());
    }

    #[test]
    fn test_source_seeds_state_and_detaches_on_dispose() {
        let sink_slot = Arc::new(Mutex::new(None));
        let detached = Arc::new(AtomicBool::new(false));
        let gate = NetworkPresenceGate::new(
            FakeSource {
                sink: sink_slot.clone(),
                detached: detached.clone(),
            },
            true,
        );
        assert_eq!(
            gate.state(),
            PresenceState {
                network_reachable: true,
                page_visible: false
            }
        );

        let sink = sink_slot.lock().unwrap().clone().unwrap();
        sink.set_page_visible(true);
        assert!(gate.online());

        drop(gate);
        assert!(detached.load(Ordering::SeqCst), "dropping the gate detaches the source");
    }
}
