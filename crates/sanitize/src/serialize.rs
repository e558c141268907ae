//! Bounded, cycle-safe conversion of page values into plain JSON.
//!
//! Every capture path funnels page data through here before it leaves the
//! page. The traversal never throws and never loops: cycles collapse to a
//! marker, depth and fan-out are capped, sensitive keys are replaced (not
//! dropped) so downstream consumers always see a stable shape, and a property
//! whose handle cannot be read degrades to a marker without aborting its
//! siblings.

use std::collections::HashSet;

use serde_json::{json, Map, Value as Json};

use crate::redact::is_sensitive_name;
use crate::value::PageValue;

pub const REDACTED_MARKER: &str = "[REDACTED]";
pub const CIRCULAR_MARKER: &str = "[Circular]";
pub const DEPTH_MARKER: &str = "[MaxDepth]";
pub const UNSERIALIZABLE_MARKER: &str = "[Unserializable]";
const TRUNCATION_SUFFIX: &str = "…[truncated]";

#[derive(Clone, Debug)]
pub struct SerializeLimits {
    /// Maximum characters kept from any one string value.
    pub max_string: usize,
    /// Traversal depth past which containers collapse to a marker.
    pub max_depth: usize,
    /// Leading elements kept per array.
    pub max_array: usize,
    /// Leading entries kept per object.
    pub max_keys: usize,
}

impl Default for SerializeLimits {
    fn default() -> Self {
        Self {
            max_string: 10_240,
            max_depth: 10,
            max_array: 100,
            max_keys: 50,
        }
    }
}

pub fn serialize(value: &PageValue) -> Json {
    serialize_with(value, &SerializeLimits::default())
}

pub fn serialize_with(value: &PageValue, limits: &SerializeLimits) -> Json {
    let mut visited = HashSet::new();
    walk(value, 0, &mut visited, limits)
}

fn walk(
    value: &PageValue,
    depth: usize,
    visited: &mut HashSet<usize>,
    limits: &SerializeLimits,
) -> Json {
    if depth > limits.max_depth {
        return Json::String(DEPTH_MARKER.to_string());
    }

    match value {
        PageValue::Null => Json::Null,
        PageValue::Bool(flag) => Json::Bool(*flag),
        PageValue::Num(num) => serde_json::Number::from_f64(*num)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        PageValue::Str(text) => Json::String(clip_string(text, limits.max_string)),
        PageValue::Function { name } => {
            let shown = if name.is_empty() { "anonymous" } else { name };
            Json::String(format!("[Function: {shown}]"))
        }
        PageValue::Error {
            name,
            message,
            stack,
        } => json!({
            "name": name,
            "message": message,
            "stack": stack,
        }),
        PageValue::Array(items) => {
            let id = handle_addr(items);
            if !visited.insert(id) {
                return Json::String(CIRCULAR_MARKER.to_string());
            }
            let slice = match items.try_lock() {
                Some(guard) => guard.iter().take(limits.max_array).cloned().collect::<Vec<_>>(),
                None => return Json::String(UNSERIALIZABLE_MARKER.to_string()),
            };
            Json::Array(
                slice
                    .iter()
                    .map(|item| walk(item, depth + 1, visited, limits))
                    .collect(),
            )
        }
        PageValue::Object(entries) => {
            let id = handle_addr(entries);
            if !visited.insert(id) {
                return Json::String(CIRCULAR_MARKER.to_string());
            }
            let slice = match entries.try_lock() {
                Some(guard) => {
                    if guard.iter().any(|(key, _)| key == "nodeType") {
                        return Json::String(dom_summary(&guard));
                    }
                    guard.iter().take(limits.max_keys).cloned().collect::<Vec<_>>()
                }
                None => return Json::String(UNSERIALIZABLE_MARKER.to_string()),
            };
            let mut map = Map::new();
            for (key, val) in &slice {
                if is_sensitive_name(key) {
                    map.insert(key.clone(), Json::String(REDACTED_MARKER.to_string()));
                    continue;
                }
                map.insert(key.clone(), walk(val, depth + 1, visited, limits));
            }
            Json::Object(map)
        }
    }
}

fn handle_addr<T>(handle: &std::sync::Arc<T>) -> usize {
    std::sync::Arc::as_ptr(handle) as usize
}

/// DOM-like objects (anything carrying a `nodeType` entry) reduce to a
/// `<tag#id.class>` summary instead of a full traversal.
fn dom_summary(entries: &[(String, PageValue)]) -> String {
    let field = |name: &str| {
        entries
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, val)| val.as_str())
    };
    let tag = field("tagName")
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "node".to_string());
    let mut summary = format!("<{tag}");
    if let Some(id) = field("id").filter(|id| !id.is_empty()) {
        summary.push('#');
        summary.push_str(id);
    }
    if let Some(classes) = field("className") {
        for class in classes.split_whitespace() {
            summary.push('.');
            summary.push_str(class);
        }
    }
    summary.push('>');
    summary
}

fn clip_string(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max_chars).collect();
    clipped.push_str(TRUNCATION_SUFFIX);
    clipped
}
