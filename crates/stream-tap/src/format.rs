//! Payload shaping shared by every stream frame that leaves the tap.
//!
//! Text passes through untouched and is bounded by a separate truncation
//! step. Binary frames render as hex: a full dump while small, only a
//! byte count plus a four-byte magic preview once large. Opaque blobs
//! render as a byte count alone.

use crate::config::TrackerConfig;

const MAGIC_PREVIEW_BYTES: usize = 4;

/// One stream frame as the page-side interceptor hands it over.
#[derive(Clone, Debug)]
pub enum StreamPayload {
    Text(String),
    Binary(Vec<u8>),
    /// Blob-like payloads expose a size but no readable contents.
    Blob { size: u64 },
}

impl StreamPayload {
    pub fn size(&self) -> u64 {
        match self {
            StreamPayload::Text(text) => text.len() as u64,
            StreamPayload::Binary(bytes) => bytes.len() as u64,
            StreamPayload::Blob { size } => *size,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StreamPayload::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

pub fn format_payload(payload: &StreamPayload, config: &TrackerConfig) -> String {
    match payload {
        StreamPayload::Text(text) => text.clone(),
        StreamPayload::Binary(bytes) => {
            if bytes.len() < config.hex_dump_limit {
                format!("[{} bytes] {}", bytes.len(), hex::encode(bytes))
            } else {
                let magic = &bytes[..MAGIC_PREVIEW_BYTES.min(bytes.len())];
                format!("[{} bytes] magic: {}", bytes.len(), hex::encode(magic))
            }
        }
        StreamPayload::Blob { size } => format!("[blob {size} bytes]"),
    }
}

/// Caps textual payloads at `max_bytes` on a char boundary; the flag reports
/// whether anything was dropped.
pub fn truncate_text(text: &str, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text.to_string(), false);
    }
    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    (text[..cut].to_string(), true)
}

/// First `limit` characters of the formatted payload, for last-seen previews.
pub fn preview(payload: &StreamPayload, limit: usize, config: &TrackerConfig) -> String {
    let formatted = format_payload(payload, config);
    if formatted.chars().count() <= limit {
        formatted
    } else {
        formatted.chars().take(limit).collect()
    }
}
