//! Shared primitives for the PageLens capture engine.
//!
//! Everything here is deliberately small: identifiers, the outbound envelope
//! shape, the capture-mode tiers and a bounded ring buffer that several
//! crates reuse. Component-specific state lives in the component crates.

use std::collections::VecDeque;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Shared error type for cross-crate plumbing that has no richer enum of
/// its own.
#[derive(Debug, Error, Clone)]
pub enum LensError {
    #[error("{message}")]
    Message { message: String },
}

impl LensError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

/// Identifier of one bidirectional message stream. Page-side interceptors
/// assign these; the engine treats them as opaque.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation identifier for one command round-trip on the relay port.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of a stream frame relative to the page.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => f.write_str("inbound"),
            Direction::Outbound => f.write_str("outbound"),
        }
    }
}

/// Configured visibility tier for high-volume message streams.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    Low,
    #[default]
    Medium,
    High,
    /// Unthrottled: every frame is forwarded.
    All,
}

impl CaptureMode {
    /// Target messages-per-second for the tier; `None` means unthrottled.
    pub fn target_rate(self) -> Option<f64> {
        match self {
            CaptureMode::Low => Some(2.0),
            CaptureMode::Medium => Some(5.0),
            CaptureMode::High => Some(10.0),
            CaptureMode::All => None,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "low" => Some(CaptureMode::Low),
            "medium" => Some(CaptureMode::Medium),
            "high" => Some(CaptureMode::High),
            "all" => Some(CaptureMode::All),
            _ => None,
        }
    }
}

/// Category of an outbound envelope.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Console,
    Network,
    Stream,
    Error,
    Interaction,
    Performance,
    Lifecycle,
}

/// Structured record handed to the outbound relay.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub payload: serde_json::Value,
    /// Unix milliseconds at emission time.
    pub ts: u64,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            ts: now_ms(),
        }
    }
}

/// Milliseconds since the unix epoch; zero if the clock is unusable.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

/// Fixed-capacity FIFO: pushing onto a full ring evicts the oldest entry.
#[derive(Debug)]
pub struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T> BoundedRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
        }
    }

    pub fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shrink the capacity in place, evicting oldest entries as needed.
    /// Growing is also allowed; existing entries are kept either way.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.data.len() > self.capacity {
            self.data.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }
}

impl<T: Clone> BoundedRing<T> {
    /// Oldest-first copy of the current contents.
    pub fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}
