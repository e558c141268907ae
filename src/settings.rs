//! Pushed-in settings surface.
//!
//! The relay pushes option patches at us; we never poll. Only a fixed set
//! of option names is recognized, and anything unknown or wrongly typed is
//! skipped without an error so a newer popup build cannot wedge an older
//! page-side engine.

use std::sync::Arc;

use pagelens_core_types::CaptureMode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub mode: CaptureMode,
    pub capture_network_bodies: bool,
    /// State-snapshot enrichment is opt-in.
    pub enable_state_snapshot: bool,
    pub enable_scrub: bool,
    pub defer_heavy_install: bool,
    pub server_target: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: CaptureMode::default(),
            capture_network_bodies: true,
            enable_state_snapshot: false,
            enable_scrub: true,
            defer_heavy_install: false,
            server_target: None,
        }
    }
}

struct State {
    current: Settings,
    revision: u64,
}

/// Current-snapshot holder with a broadcast feed for collaborators that
/// want to react to changes rather than re-read on every event.
pub struct SettingsHandle {
    state: Mutex<State>,
    feed: watch::Sender<Arc<Settings>>,
}

impl SettingsHandle {
    pub fn new(initial: Settings) -> Self {
        let (feed, _rx) = watch::channel(Arc::new(initial.clone()));
        Self {
            state: Mutex::new(State {
                current: initial,
                revision: 0,
            }),
            feed,
        }
    }

    pub fn current(&self) -> Arc<Settings> {
        self.feed.borrow().clone()
    }

    /// Bumps only when a patch actually changed something.
    pub fn revision(&self) -> u64 {
        self.state.lock().revision
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Settings>> {
        self.feed.subscribe()
    }

    /// Applies the recognized subset of `patch`; reports whether anything
    /// changed. Rejected entries are logged at debug and otherwise
    /// invisible.
    pub fn apply_patch(&self, patch: &serde_json::Map<String, Value>) -> bool {
        let mut state = self.state.lock();
        let mut next = state.current.clone();
        let mut changed = false;
        for (name, value) in patch {
            changed |= apply_option(&mut next, name, value);
        }
        if !changed {
            return false;
        }
        state.revision += 1;
        state.current = next.clone();
        drop(state);
        let _ = self.feed.send(Arc::new(next));
        true
    }
}

impl Default for SettingsHandle {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

fn apply_option(settings: &mut Settings, name: &str, value: &Value) -> bool {
    match name {
        "mode" => match value.as_str().and_then(CaptureMode::parse) {
            Some(mode) if mode != settings.mode => {
                settings.mode = mode;
                true
            }
            Some(_) => false,
            None => reject(name, value),
        },
        "captureNetworkBodies" => set_flag(&mut settings.capture_network_bodies, name, value),
        "enableStateSnapshot" => set_flag(&mut settings.enable_state_snapshot, name, value),
        "enableScrub" => set_flag(&mut settings.enable_scrub, name, value),
        "deferHeavyInstall" => set_flag(&mut settings.defer_heavy_install, name, value),
        "serverTarget" => match value.as_str() {
            Some(target) => {
                let next = Some(target.to_string());
                if settings.server_target != next {
                    settings.server_target = next;
                    true
                } else {
                    false
                }
            }
            None => reject(name, value),
        },
        _ => {
            debug!(target: "pagelens", option = name, "ignoring unrecognized setting");
            false
        }
    }
}

fn set_flag(target: &mut bool, name: &str, value: &Value) -> bool {
    match value.as_bool() {
        Some(flag) if flag != *target => {
            *target = flag;
            true
        }
        Some(_) => false,
        None => reject(name, value),
    }
}

fn reject(name: &str, value: &Value) -> bool {
    debug!(target: "pagelens", option = name, %value, "ignoring wrongly-typed setting");
    false
}
