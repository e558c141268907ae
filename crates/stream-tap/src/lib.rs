//! PageLens stream tap.
//!
//! Keyed registry of per-connection trackers for WebSocket-style message
//! streams. Each tracker owns the adaptive sampling decisions, rolling rate
//! measurement and schema inference for its stream alone; the registry adds
//! bounded live/closed bookkeeping and the status surface the engine serves.

pub mod config;
pub mod format;
pub mod tracker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use pagelens_core_types::{BoundedRing, CaptureMode, ConnectionId, Direction};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub use crate::config::TrackerConfig;
pub use crate::format::{format_payload, preview, truncate_text, StreamPayload};
pub use crate::tracker::{
    ClosedConnection, ConnectionStatus, ConnectionTracker, DirectionSummary,
};

/// Errors emitted by the tap surface.
#[derive(Clone, Debug, Error)]
pub enum TapError {
    #[error("unknown connection")]
    UnknownConnection,
    #[error("internal error: {0}")]
    Internal(String),
}

/// A frame that survived the sampling decision, shaped for the outbound
/// relay.
#[derive(Clone, Debug, Serialize)]
pub struct MessageRecord {
    pub id: ConnectionId,
    pub url: String,
    pub direction: Direction,
    pub data: String,
    pub size: u64,
    pub truncated: bool,
    /// Set when a thinned-out frame was force-forwarded because its shape
    /// was never seen during bootstrap.
    pub schema_change: bool,
}

/// Aggregate view over live and recently closed connections.
#[derive(Clone, Debug, Serialize)]
pub struct TapStatus {
    pub active: Vec<ConnectionStatus>,
    pub closed: Vec<ClosedConnection>,
    pub total_opened: u64,
    pub total_messages: u64,
}

struct Slot {
    /// Open order, used for oldest-first eviction and stable status output.
    seq: u64,
    tracker: Arc<Mutex<ConnectionTracker>>,
}

/// Registry of live trackers plus a bounded closed-connection history.
pub struct StreamTap {
    config: TrackerConfig,
    live: DashMap<ConnectionId, Slot>,
    closed: Mutex<BoundedRing<ClosedConnection>>,
    next_seq: AtomicU64,
    total_opened: AtomicU64,
    total_messages: AtomicU64,
}

impl StreamTap {
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        Self {
            closed: Mutex::new(BoundedRing::new(config.max_closed)),
            live: DashMap::new(),
            next_seq: AtomicU64::new(0),
            total_opened: AtomicU64::new(0),
            total_messages: AtomicU64::new(0),
            config,
        }
    }

    /// Starts tracking a connection. At capacity the oldest-opened tracker
    /// is retired into the closed history to make room.
    pub fn open(&self, id: ConnectionId, url: impl Into<String>) {
        self.total_opened.fetch_add(1, Ordering::Relaxed);
        if self.live.len() >= self.config.max_active {
            let oldest = self
                .live
                .iter()
                .min_by_key(|entry| entry.value().seq)
                .map(|entry| entry.key().clone());
            if let Some(old_id) = oldest {
                if let Some((_, slot)) = self.live.remove(&old_id) {
                    let record = slot
                        .tracker
                        .lock()
                        .closed_summary(None, Some("evicted".to_string()));
                    self.closed.lock().push(record);
                    debug!(target: "stream_tap", id = %old_id, "evicted oldest connection");
                }
            }
        }
        let tracker = ConnectionTracker::new(id.clone(), url, self.config.clone());
        self.live.insert(
            id,
            Slot {
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                tracker: Arc::new(Mutex::new(tracker)),
            },
        );
    }

    /// Records one frame and applies the sampling decision. `Ok(None)` means
    /// the frame was recorded but thinned out of the forwarded stream.
    pub fn message(
        &self,
        id: &ConnectionId,
        direction: Direction,
        payload: &StreamPayload,
        mode: CaptureMode,
    ) -> Result<Option<MessageRecord>, TapError> {
        let tracker = self
            .live
            .get(id)
            .ok_or(TapError::UnknownConnection)?
            .tracker
            .clone();
        self.total_messages.fetch_add(1, Ordering::Relaxed);

        let mut guard = tracker.lock();
        guard.record_message(direction, payload);
        let sampled = guard.should_sample(direction, mode);
        let schema_change = if sampled {
            false
        } else {
            guard.is_schema_change(payload)
        };
        if !sampled && !schema_change {
            return Ok(None);
        }
        let url = guard.url().to_string();
        drop(guard);

        let (data, truncated) =
            truncate_text(&format_payload(payload, &self.config), self.config.max_text_payload);
        Ok(Some(MessageRecord {
            id: id.clone(),
            url,
            direction,
            data,
            size: payload.size(),
            truncated,
            schema_change,
        }))
    }

    /// Stops tracking and retires the totals into the closed history.
    pub fn close(
        &self,
        id: &ConnectionId,
        code: Option<u16>,
        reason: Option<String>,
    ) -> Result<ClosedConnection, TapError> {
        let (_, slot) = self.live.remove(id).ok_or(TapError::UnknownConnection)?;
        let record = slot.tracker.lock().closed_summary(code, reason);
        self.closed.lock().push(record.clone());
        Ok(record)
    }

    /// Flags the connection and reports its URL for the error envelope.
    pub fn mark_error(&self, id: &ConnectionId) -> Result<String, TapError> {
        let tracker = self
            .live
            .get(id)
            .ok_or(TapError::UnknownConnection)?
            .tracker
            .clone();
        let mut guard = tracker.lock();
        guard.mark_errored();
        Ok(guard.url().to_string())
    }

    pub fn active_count(&self) -> usize {
        self.live.len()
    }

    pub fn status(&self) -> TapStatus {
        let mut active: Vec<(u64, ConnectionStatus)> = self
            .live
            .iter()
            .map(|entry| (entry.value().seq, entry.value().tracker.lock().status()))
            .collect();
        active.sort_by_key(|(seq, _)| *seq);
        TapStatus {
            active: active.into_iter().map(|(_, status)| status).collect(),
            closed: self.closed.lock().snapshot(),
            total_opened: self.total_opened.load(Ordering::Relaxed),
            total_messages: self.total_messages.load(Ordering::Relaxed),
        }
    }

    /// Drops every tracker and the closed history; the monotonic totals
    /// survive.
    pub fn reset(&self) {
        self.live.clear();
        self.closed.lock().clear();
    }
}

impl Default for StreamTap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(payload: &str) -> StreamPayload {
        StreamPayload::Text(payload.to_string())
    }

    #[test]
    fn open_message_close_round_trip() {
        let tap = StreamTap::new();
        let id = ConnectionId::from("ws-1");
        tap.open(id.clone(), "wss://feed.example/live");

        let record = tap
            .message(&id, Direction::Inbound, &text("{\"a\":1}"), CaptureMode::Medium)
            .unwrap()
            .expect("bootstrap frame forwarded");
        assert_eq!(record.url, "wss://feed.example/live");
        assert_eq!(record.data, "{\"a\":1}");
        assert!(!record.truncated);
        assert!(!record.schema_change);

        let closed = tap.close(&id, Some(1000), None).unwrap();
        assert_eq!(closed.inbound.count, 1);
        assert_eq!(tap.active_count(), 0);

        let status = tap.status();
        assert_eq!(status.total_opened, 1);
        assert_eq!(status.total_messages, 1);
        assert_eq!(status.closed.len(), 1);
    }

    #[test]
    fn unknown_connection_is_an_error() {
        let tap = StreamTap::new();
        let id = ConnectionId::from("nope");
        assert!(matches!(
            tap.message(&id, Direction::Inbound, &text("x"), CaptureMode::All),
            Err(TapError::UnknownConnection)
        ));
        assert!(tap.close(&id, None, None).is_err());
        assert!(tap.mark_error(&id).is_err());
    }

    #[test]
    fn capacity_evicts_oldest_into_closed_history() {
        let config = TrackerConfig {
            max_active: 2,
            max_closed: 2,
            ..TrackerConfig::default()
        };
        let tap = StreamTap::with_config(config);
        tap.open(ConnectionId::from("first"), "wss://a");
        tap.open(ConnectionId::from("second"), "wss://b");
        tap.open(ConnectionId::from("third"), "wss://c");

        assert_eq!(tap.active_count(), 2);
        let status = tap.status();
        assert!(status.active.iter().all(|conn| conn.id.0 != "first"));
        assert_eq!(status.closed.len(), 1);
        assert_eq!(status.closed[0].id.0, "first");
        assert_eq!(status.closed[0].reason.as_deref(), Some("evicted"));
        assert_eq!(status.total_opened, 3);
    }

    #[test]
    fn closed_history_is_bounded() {
        let config = TrackerConfig {
            max_closed: 2,
            ..TrackerConfig::default()
        };
        let tap = StreamTap::with_config(config);
        for n in 0..5 {
            let id = ConnectionId::from(format!("c{n}"));
            tap.open(id.clone(), "wss://x");
            tap.close(&id, Some(1000), None).unwrap();
        }
        let status = tap.status();
        assert_eq!(status.closed.len(), 2);
        assert_eq!(status.closed[0].id.0, "c3");
        assert_eq!(status.closed[1].id.0, "c4");
        assert_eq!(status.total_opened, 5);
    }

    #[test]
    fn errored_connections_show_on_status() {
        let tap = StreamTap::new();
        let id = ConnectionId::from("ws-err");
        tap.open(id.clone(), "wss://feed");
        tap.mark_error(&id).unwrap();
        let status = tap.status();
        assert!(status.active[0].errored);
    }

    #[test]
    fn reset_clears_state_but_keeps_totals() {
        let tap = StreamTap::new();
        let id = ConnectionId::from("ws-1");
        tap.open(id.clone(), "wss://feed");
        tap.message(&id, Direction::Inbound, &text("{}"), CaptureMode::All)
            .unwrap();
        tap.reset();

        assert_eq!(tap.active_count(), 0);
        let status = tap.status();
        assert!(status.active.is_empty());
        assert!(status.closed.is_empty());
        assert_eq!(status.total_opened, 1);
        assert_eq!(status.total_messages, 1);
    }

    #[test]
    fn long_text_frames_are_truncated_and_flagged() {
        let tap = StreamTap::new();
        let id = ConnectionId::from("ws-big");
        tap.open(id.clone(), "wss://feed");
        let record = tap
            .message(
                &id,
                Direction::Outbound,
                &text(&"z".repeat(9000)),
                CaptureMode::All,
            )
            .unwrap()
            .expect("all mode forwards everything");
        assert_eq!(record.data.len(), 4096);
        assert!(record.truncated);
        assert_eq!(record.size, 9000);
    }
}
