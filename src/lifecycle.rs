//! Two-phase interceptor installation and memory-pressure degradation.
//!
//! Phase 1 is cheap and synchronous at injection: passive performance
//! observers only. Phase 2 wraps console/network/stream constructors and
//! hooks exceptions and interactions. With deferral on, phase 2 waits for
//! the page-load notification plus a settle delay, backstopped by an
//! absolute fallback timer; the terminal-state guard makes whichever
//! fires second a no-op.

use std::sync::Arc;
use std::time::Duration;

use pagelens_core_types::now_ms;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::host::InstallHooks;

/// Delay after the load event before the heavy hooks go in.
pub const SETTLE_DELAY_MS: u64 = 100;
/// Absolute ceiling for waiting on a load event that may never fire.
pub const LOAD_FALLBACK_MS: u64 = 10_000;

pub const SOFT_FOOTPRINT_BYTES: u64 = 20 * 1024 * 1024;
pub const HARD_FOOTPRINT_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Uninstalled,
    Phase1,
    Phase2,
}

/// Ring capacities currently in force, plus the body-capture switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferCaps {
    pub stream_events: usize,
    pub network_bodies: usize,
    pub console_entries: usize,
    pub interactions: usize,
    pub capture_bodies: bool,
}

impl Default for BufferCaps {
    fn default() -> Self {
        Self {
            stream_events: 1_000,
            network_bodies: 100,
            console_entries: 500,
            interactions: 300,
            capture_bodies: true,
        }
    }
}

impl BufferCaps {
    /// Shrinks the current capacities for the measured footprint: halved
    /// at the soft threshold, quartered with body capture off at the hard
    /// one. A call never grows anything.
    pub fn degraded(self, footprint_bytes: u64) -> BufferCaps {
        if footprint_bytes >= HARD_FOOTPRINT_BYTES {
            BufferCaps {
                stream_events: (self.stream_events / 4).max(1),
                network_bodies: (self.network_bodies / 4).max(1),
                console_entries: (self.console_entries / 4).max(1),
                interactions: (self.interactions / 4).max(1),
                capture_bodies: false,
            }
        } else if footprint_bytes >= SOFT_FOOTPRINT_BYTES {
            BufferCaps {
                stream_events: (self.stream_events / 2).max(1),
                network_bodies: (self.network_bodies / 2).max(1),
                console_entries: (self.console_entries / 2).max(1),
                interactions: (self.interactions / 2).max(1),
                capture_bodies: self.capture_bodies,
            }
        } else {
            self
        }
    }
}

struct LifecycleState {
    phase: Phase,
    injected_at_ms: Option<u64>,
    installed_at_ms: Option<u64>,
    deferred: bool,
    settle_armed: bool,
    fallback: Option<JoinHandle<()>>,
    settle: Option<JoinHandle<()>>,
}

pub struct LifecycleController {
    hooks: Arc<dyn InstallHooks>,
    state: Mutex<LifecycleState>,
    cancel: CancellationToken,
}

impl LifecycleController {
    pub fn new(hooks: Arc<dyn InstallHooks>) -> Self {
        Self {
            hooks,
            state: Mutex::new(LifecycleState {
                phase: Phase::Uninstalled,
                injected_at_ms: None,
                installed_at_ms: None,
                deferred: false,
                settle_armed: false,
                fallback: None,
                settle: None,
            }),
            cancel: CancellationToken::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn injected_at_ms(&self) -> Option<u64> {
        self.state.lock().injected_at_ms
    }

    pub fn installed_at_ms(&self) -> Option<u64> {
        self.state.lock().installed_at_ms
    }

    /// Runs at injection. With deferral off, the heavy hooks go in right
    /// here; with it on, the fallback timer is armed on the current
    /// runtime.
    pub fn install_phase1(self: &Arc<Self>, defer: bool) -> Phase {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Uninstalled {
                return state.phase;
            }
            state.phase = Phase::Phase1;
            state.injected_at_ms = Some(now_ms());
            state.deferred = defer;
        }
        self.hooks.install_performance_observers();
        info!(target: "pagelens", deferred = defer, "phase 1 installed");
        if defer {
            self.arm_fallback();
        } else {
            self.install_phase2();
        }
        self.phase()
    }

    /// Feeds the deferral schedule; outside a deferred phase 1 this is a
    /// no-op.
    pub fn notify_page_loaded(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Phase1 || !state.deferred || state.settle_armed {
                return;
            }
            state.settle_armed = true;
        }
        let controller = Arc::clone(self);
        let token = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(Duration::from_millis(SETTLE_DELAY_MS)) => {
                    controller.install_phase2();
                }
            }
        });
        self.state.lock().settle = Some(handle);
    }

    /// Terminal transition. Re-entry returns immediately and keeps the
    /// first installation timestamp.
    pub fn install_phase2(&self) -> Phase {
        {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Phase2 => return Phase::Phase2,
                Phase::Uninstalled => return Phase::Uninstalled,
                Phase::Phase1 => {
                    state.phase = Phase::Phase2;
                    state.installed_at_ms = Some(now_ms());
                }
            }
        }
        self.hooks.install_console_hook();
        self.hooks.install_network_hook();
        self.hooks.install_stream_hook();
        self.hooks.install_error_hooks();
        self.hooks.install_interaction_hooks();
        info!(target: "pagelens", "phase 2 installed");
        Phase::Phase2
    }

    /// Cancels any armed timers. Installed hooks stay installed; only the
    /// pending schedule dies.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        if let Some(task) = state.fallback.take() {
            task.abort();
        }
        if let Some(task) = state.settle.take() {
            task.abort();
        }
    }

    fn arm_fallback(self: &Arc<Self>) {
        let controller = Arc::clone(self);
        let token = self.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = sleep(Duration::from_millis(LOAD_FALLBACK_MS)) => {
                    debug!(target: "pagelens", "load event never arrived, forcing heavy install");
                    controller.install_phase2();
                }
            }
        });
        self.state.lock().fallback = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct RecordingHooks {
        performance: AtomicUsize,
        console: AtomicUsize,
        network: AtomicUsize,
        stream: AtomicUsize,
        errors: AtomicUsize,
        interactions: AtomicUsize,
    }

    impl RecordingHooks {
        fn heavy_installs(&self) -> usize {
            self.console.load(Ordering::SeqCst)
                + self.network.load(Ordering::SeqCst)
                + self.stream.load(Ordering::SeqCst)
                + self.errors.load(Ordering::SeqCst)
                + self.interactions.load(Ordering::SeqCst)
        }
    }

    impl InstallHooks for RecordingHooks {
        fn install_performance_observers(&self) {
            self.performance.fetch_add(1, Ordering::SeqCst);
        }
        fn install_console_hook(&self) {
            self.console.fetch_add(1, Ordering::SeqCst);
        }
        fn install_network_hook(&self) {
            self.network.fetch_add(1, Ordering::SeqCst);
        }
        fn install_stream_hook(&self) {
            self.stream.fetch_add(1, Ordering::SeqCst);
        }
        fn install_error_hooks(&self) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
        fn install_interaction_hooks(&self) {
            self.interactions.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller() -> (Arc<LifecycleController>, Arc<RecordingHooks>) {
        let hooks = Arc::new(RecordingHooks::default());
        (
            Arc::new(LifecycleController::new(hooks.clone())),
            hooks,
        )
    }

    #[tokio::test]
    async fn immediate_install_runs_both_phases_inline() {
        let (lifecycle, hooks) = controller();
        assert_eq!(lifecycle.install_phase1(false), Phase::Phase2);
        assert_eq!(hooks.performance.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.heavy_installs(), 5);

        // Re-running phase 1 is a no-op past the first transition.
        assert_eq!(lifecycle.install_phase1(false), Phase::Phase2);
        assert_eq!(hooks.heavy_installs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_install_waits_for_load_plus_settle() {
        let (lifecycle, hooks) = controller();
        assert_eq!(lifecycle.install_phase1(true), Phase::Phase1);
        assert_eq!(hooks.heavy_installs(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        lifecycle.notify_page_loaded();
        assert_eq!(lifecycle.phase(), Phase::Phase1);

        tokio::time::sleep(Duration::from_millis(SETTLE_DELAY_MS + 1)).await;
        assert_eq!(lifecycle.phase(), Phase::Phase2);
        assert_eq!(hooks.heavy_installs(), 5);

        // The fallback timer is now the loser and must change nothing.
        tokio::time::sleep(Duration::from_millis(LOAD_FALLBACK_MS)).await;
        assert_eq!(hooks.heavy_installs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_covers_pages_that_never_fire_load() {
        let (lifecycle, hooks) = controller();
        lifecycle.install_phase1(true);

        tokio::time::sleep(Duration::from_millis(LOAD_FALLBACK_MS + 1)).await;
        assert_eq!(lifecycle.phase(), Phase::Phase2);
        assert_eq!(hooks.heavy_installs(), 5);

        // A late load event hits the terminal guard.
        lifecycle.notify_page_loaded();
        tokio::time::sleep(Duration::from_millis(SETTLE_DELAY_MS + 1)).await;
        assert_eq!(hooks.heavy_installs(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_schedule() {
        let (lifecycle, hooks) = controller();
        lifecycle.install_phase1(true);
        lifecycle.shutdown();

        tokio::time::sleep(Duration::from_millis(LOAD_FALLBACK_MS + 1)).await;
        assert_eq!(lifecycle.phase(), Phase::Phase1);
        assert_eq!(hooks.heavy_installs(), 0);
    }

    #[tokio::test]
    async fn reentry_preserves_the_install_timestamp() {
        let (lifecycle, _hooks) = controller();
        lifecycle.install_phase1(false);
        let first = lifecycle.installed_at_ms();
        assert!(first.is_some());
        lifecycle.install_phase2();
        assert_eq!(lifecycle.installed_at_ms(), first);
    }

    #[test]
    fn governor_holds_below_the_soft_threshold() {
        let caps = BufferCaps::default();
        assert_eq!(caps.degraded(SOFT_FOOTPRINT_BYTES - 1), caps);
    }

    #[test]
    fn governor_halves_at_soft_and_quarters_at_hard() {
        let caps = BufferCaps::default();

        let soft = caps.degraded(SOFT_FOOTPRINT_BYTES);
        assert_eq!(soft.stream_events, 500);
        assert_eq!(soft.network_bodies, 50);
        assert_eq!(soft.console_entries, 250);
        assert_eq!(soft.interactions, 150);
        assert!(soft.capture_bodies);

        let hard = caps.degraded(HARD_FOOTPRINT_BYTES);
        assert_eq!(hard.stream_events, 250);
        assert_eq!(hard.network_bodies, 25);
        assert!(!hard.capture_bodies);
    }

    #[test]
    fn governor_compounds_but_never_restores() {
        let caps = BufferCaps::default();
        let once = caps.degraded(SOFT_FOOTPRINT_BYTES);
        let twice = once.degraded(SOFT_FOOTPRINT_BYTES);
        assert_eq!(twice.stream_events, 250);

        // Pressure easing leaves the shrunken caps alone.
        assert_eq!(twice.degraded(0), twice);

        let floor = BufferCaps {
            stream_events: 1,
            network_bodies: 1,
            console_entries: 1,
            interactions: 1,
            capture_bodies: true,
        };
        assert_eq!(floor.degraded(HARD_FOOTPRINT_BYTES).stream_events, 1);
    }
}
