//! Per-connection state: rolling rate measurement, adaptive sampling and
//! JSON-schema inference. One tracker exists per logical connection, created
//! on open and discarded on close; trackers never coordinate with each other.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use pagelens_core_types::{CaptureMode, ConnectionId, Direction, now_ms};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::TrackerConfig;
use crate::format::{preview, StreamPayload};

#[derive(Debug, Default)]
struct DirectionStats {
    count: u64,
    bytes: u64,
    last_preview: Option<String>,
    last_at: Option<Instant>,
}

/// Cumulative per-direction totals as exposed on the status surface.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DirectionSummary {
    pub count: u64,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_age_ms: Option<u64>,
}

/// Live-connection snapshot served by the status surface.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectionStatus {
    pub id: ConnectionId,
    pub url: String,
    pub errored: bool,
    pub rate: f64,
    pub consistent: bool,
    pub schema_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_keys: Option<Vec<String>>,
    pub variant_count: usize,
    pub inbound: DirectionSummary,
    pub outbound: DirectionSummary,
}

/// Totals retained after a connection goes away.
#[derive(Clone, Debug, Serialize)]
pub struct ClosedConnection {
    pub id: ConnectionId,
    pub url: String,
    pub inbound: DirectionSummary,
    pub outbound: DirectionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub closed_at: u64,
}

pub struct ConnectionTracker {
    id: ConnectionId,
    url: String,
    opened_at: Instant,
    inbound: DirectionStats,
    outbound: DirectionStats,
    window: VecDeque<Instant>,
    bootstrap: Vec<String>,
    variants: HashMap<String, u64>,
    consistent: bool,
    schema_detected: bool,
    sample_counter: u64,
    errored: bool,
    config: TrackerConfig,
}

impl ConnectionTracker {
    pub fn new(id: ConnectionId, url: impl Into<String>, config: TrackerConfig) -> Self {
        Self {
            id,
            url: url.into(),
            opened_at: Instant::now(),
            inbound: DirectionStats::default(),
            outbound: DirectionStats::default(),
            window: VecDeque::new(),
            bootstrap: Vec::new(),
            variants: HashMap::new(),
            consistent: true,
            schema_detected: false,
            sample_counter: 0,
            errored: false,
            config,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn mark_errored(&mut self) {
        self.errored = true;
    }

    /// Counts, previews and timestamps one frame, feeds the rolling rate
    /// window, and runs schema inference on inbound textual JSON objects.
    pub fn record_message(&mut self, direction: Direction, payload: &StreamPayload) {
        let now = Instant::now();
        let size = payload.size();
        let snippet = preview(payload, self.config.preview_limit, &self.config);

        let stats = self.direction_mut(direction);
        stats.count += 1;
        stats.bytes = stats.bytes.saturating_add(size);
        stats.last_preview = Some(snippet);
        stats.last_at = Some(now);

        self.window.push_back(now);
        self.prune_window(now);

        if direction == Direction::Inbound {
            if let Some(text) = payload.as_text() {
                self.observe_schema(text);
            }
        }
    }

    /// The sampling decision for one frame. Every call increments the
    /// counter; the bootstrap of a connection is always fully visible, and
    /// past it the stream is thinned toward the mode's target rate.
    pub fn should_sample(&mut self, direction: Direction, mode: CaptureMode) -> bool {
        self.sample_counter += 1;

        let Some(target) = mode.target_rate() else {
            return true;
        };
        if self.direction(direction).count <= self.config.bootstrap_samples as u64 {
            return true;
        }

        let rate = self.measured_rate();
        if rate <= target {
            return true;
        }
        let every = (rate / target).round().max(1.0) as u64;
        self.sample_counter % every == 0
    }

    /// True once schema is detected and the candidate's sorted key-list was
    /// never seen during bootstrap. Used to force-forward structurally novel
    /// frames that sampling would otherwise drop.
    pub fn is_schema_change(&self, payload: &StreamPayload) -> bool {
        if !self.schema_detected {
            return false;
        }
        let Some(text) = payload.as_text() else {
            return false;
        };
        match sorted_key_list(text) {
            Some(keys) => !self.bootstrap.contains(&keys),
            None => false,
        }
    }

    /// Events in the rolling window over the fixed window length.
    pub fn measured_rate(&mut self) -> f64 {
        let now = Instant::now();
        self.prune_window(now);
        self.window.len() as f64 / self.config.window_secs()
    }

    pub fn schema_detected(&self) -> bool {
        self.schema_detected
    }

    pub fn consistent(&self) -> bool {
        self.consistent
    }

    /// Baseline key set, available once the bootstrap completes.
    pub fn detected_keys(&self) -> Option<Vec<String>> {
        if !self.schema_detected {
            return None;
        }
        self.bootstrap
            .first()
            .map(|list| list.split(',').map(str::to_string).collect())
    }

    pub fn status(&mut self) -> ConnectionStatus {
        let rate = self.measured_rate();
        let now = Instant::now();
        ConnectionStatus {
            id: self.id.clone(),
            url: self.url.clone(),
            errored: self.errored,
            rate,
            consistent: self.consistent,
            schema_detected: self.schema_detected,
            detected_keys: self.detected_keys(),
            variant_count: self.variants.len(),
            inbound: summarize(&self.inbound, Some(now)),
            outbound: summarize(&self.outbound, Some(now)),
        }
    }

    pub fn closed_summary(&self, code: Option<u16>, reason: Option<String>) -> ClosedConnection {
        ClosedConnection {
            id: self.id.clone(),
            url: self.url.clone(),
            inbound: summarize(&self.inbound, None),
            outbound: summarize(&self.outbound, None),
            code,
            reason,
            closed_at: now_ms(),
        }
    }

    fn direction(&self, direction: Direction) -> &DirectionStats {
        match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        }
    }

    fn direction_mut(&mut self, direction: Direction) -> &mut DirectionStats {
        match direction {
            Direction::Inbound => &mut self.inbound,
            Direction::Outbound => &mut self.outbound,
        }
    }

    fn prune_window(&mut self, now: Instant) {
        let horizon = Duration::from_millis(self.config.window_ms);
        while let Some(front) = self.window.front() {
            if now.duration_since(*front) > horizon {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// Bootstrap collects the first key-lists and freezes at the sample cap;
    /// afterwards distinct shapes feed the variant map, which admits no new
    /// entries once full but keeps counting known ones.
    fn observe_schema(&mut self, text: &str) {
        let Some(keys) = sorted_key_list(text) else {
            return;
        };
        if !self.schema_detected {
            self.bootstrap.push(keys);
            if self.bootstrap.len() >= 2 {
                self.consistent = self.bootstrap.iter().all(|list| list == &self.bootstrap[0]);
            }
            if self.bootstrap.len() >= self.config.bootstrap_samples {
                self.schema_detected = true;
            }
            return;
        }
        let keys = match self.variants.get_mut(&keys) {
            Some(count) => {
                *count += 1;
                return;
            }
            None => keys,
        };
        if self.variants.len() < self.config.max_variants {
            self.variants.insert(keys, 1);
        }
    }
}

fn summarize(stats: &DirectionStats, now: Option<Instant>) -> DirectionSummary {
    DirectionSummary {
        count: stats.count,
        bytes: stats.bytes,
        last_preview: stats.last_preview.clone(),
        last_age_ms: match (now, stats.last_at) {
            (Some(now), Some(at)) => Some(now.duration_since(at).as_millis() as u64),
            _ => None,
        },
    }
}

/// Sorted, comma-joined top-level keys of a JSON object; `None` for arrays,
/// scalars and unparsable text.
fn sorted_key_list(text: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let map = value.as_object()?;
    let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
    keys.sort_unstable();
    Some(keys.join(","))
}
