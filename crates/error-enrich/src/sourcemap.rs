//! Inline source-map recovery and the bounded per-script cache.
//!
//! Only maps that embed their original source content are usable here; a
//! map without `sourcesContent` is discarded rather than cached, so a later
//! lookup can retry against a fresher build.

use std::collections::{HashMap, VecDeque};

use base64::{engine::general_purpose::STANDARD as Base64, Engine as _};
use serde::Deserialize;
use tracing::debug;

/// A parsed source map reduced to what snippet extraction needs.
#[derive(Clone, Debug)]
pub struct SourceMapRecord {
    pub sources: Vec<String>,
    pub sources_content: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawSourceMap {
    #[serde(default)]
    sources: Vec<String>,
    #[serde(default, rename = "sourcesContent")]
    sources_content: Option<Vec<String>>,
}

const INLINE_MARKER: &str = "sourceMappingURL=";
const BASE64_MARKER: &str = ";base64,";

/// Pulls an inline, base64-embedded source map out of a script body.
/// External map URLs and maps without original content yield `None`.
pub fn parse_inline_source_map(script_body: &str) -> Option<SourceMapRecord> {
    let start = script_body.rfind(INLINE_MARKER)? + INLINE_MARKER.len();
    let url = script_body[start..]
        .lines()
        .next()
        .unwrap_or("")
        .trim();
    if !url.starts_with("data:") {
        return None;
    }
    let payload = &url[url.find(BASE64_MARKER)? + BASE64_MARKER.len()..];
    let decoded = match Base64.decode(payload) {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(target: "error_enrich", %err, "inline source map is not valid base64");
            return None;
        }
    };
    let raw: RawSourceMap = serde_json::from_slice(&decoded).ok()?;
    let sources_content = raw.sources_content.filter(|content| !content.is_empty())?;
    Some(SourceMapRecord {
        sources: raw.sources,
        sources_content,
    })
}

/// Script-URL-keyed map store, capacity-bounded with oldest-insertion
/// eviction. Re-inserting an existing key refreshes its recency; reads do
/// not.
pub struct SourceMapCache {
    capacity: usize,
    entries: HashMap<String, SourceMapRecord>,
    order: VecDeque<String>,
}

impl SourceMapCache {
    pub const DEFAULT_CAPACITY: usize = 20;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, url: &str) -> Option<&SourceMapRecord> {
        self.entries.get(url)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains_key(url)
    }

    pub fn insert(&mut self, url: impl Into<String>, record: SourceMapRecord) {
        let url = url.into();
        if self.entries.contains_key(&url) {
            self.order.retain(|existing| existing != &url);
        } else if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
        self.order.push_back(url.clone());
        self.entries.insert(url, record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

impl Default for SourceMapCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
