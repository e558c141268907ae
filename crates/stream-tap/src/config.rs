//! Configuration for the stream tap and its per-connection trackers.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Rolling rate-measurement window.
    pub window_ms: u64,
    /// Messages used to establish a stream's baseline schema.
    pub bootstrap_samples: usize,
    /// Distinct key-set shapes admitted after detection.
    pub max_variants: usize,
    /// Characters kept in last-message previews.
    pub preview_limit: usize,
    /// Bytes kept of any textual payload before the truncation flag fires.
    pub max_text_payload: usize,
    /// Binary payloads below this many bytes get a full hex dump.
    pub hex_dump_limit: usize,
    /// Live connections tracked at once; the oldest is evicted beyond this.
    pub max_active: usize,
    /// Closed-connection summaries retained.
    pub max_closed: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_ms: 5_000,
            bootstrap_samples: 5,
            max_variants: 50,
            preview_limit: 200,
            max_text_payload: 4_096,
            hex_dump_limit: 256,
            max_active: 50,
            max_closed: 20,
        }
    }
}

impl TrackerConfig {
    pub fn window_secs(&self) -> f64 {
        (self.window_ms.max(1) as f64) / 1000.0
    }
}
