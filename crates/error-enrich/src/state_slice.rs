//! Global-store state classification and the bounded "relevant slice".

use std::collections::BTreeMap;

use pagelens_sanitize::PageValue;

use crate::model::{StateSnapshot, ValueKind};

/// Entries kept in the relevant slice.
pub const MAX_SLICE_ENTRIES: usize = 10;
/// Character cap for string values in the slice.
pub const SLICE_TEXT_CHARS: usize = 200;

const STATE_SOURCE: &str = "store";
const CONDITION_HINTS: [&str; 5] = ["error", "loading", "status", "failed", "pending"];
const MIN_MESSAGE_WORD: usize = 4;

/// Classifies a store's top-level keys and selects nested sub-keys that
/// look related to the error. Sub-keys qualify when their own name hints
/// at an error/loading condition, or when the parent key overlaps a
/// significant word of the error message. Any read failure yields `None`.
pub fn snapshot_state(state: &PageValue, error_message: &str) -> Option<StateSnapshot> {
    let top_keys = state.entry_keys()?;
    let words = significant_words(error_message);

    let mut keys = BTreeMap::new();
    let mut relevant_slice = BTreeMap::new();
    for key in &top_keys {
        let value = state.entry(key)?;
        keys.insert(
            key.clone(),
            ValueKind {
                kind: coarse_type(&value).to_string(),
            },
        );

        let Some(children) = value.entry_keys() else {
            continue;
        };
        let parent_matches = overlaps_message(key, &words);
        for child in children {
            if relevant_slice.len() >= MAX_SLICE_ENTRIES {
                break;
            }
            if parent_matches || hints_condition(&child) {
                let child_value = value.entry(&child)?;
                relevant_slice.insert(format!("{key}.{child}"), slice_value(&child_value));
            }
        }
    }

    Some(StateSnapshot {
        source: STATE_SOURCE.to_string(),
        keys,
        relevant_slice,
    })
}

fn coarse_type(value: &PageValue) -> &'static str {
    match value {
        PageValue::Null => "null",
        PageValue::Bool(_) => "boolean",
        PageValue::Num(_) => "number",
        PageValue::Str(_) => "string",
        PageValue::Array(_) => "array",
        PageValue::Object(_) | PageValue::Function { .. } | PageValue::Error { .. } => "object",
    }
}

fn slice_value(value: &PageValue) -> serde_json::Value {
    match value {
        PageValue::Null => serde_json::Value::Null,
        PageValue::Bool(flag) => serde_json::Value::from(*flag),
        PageValue::Num(num) => serde_json::Number::from_f64(*num)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        PageValue::Str(text) => {
            serde_json::Value::from(text.chars().take(SLICE_TEXT_CHARS).collect::<String>())
        }
        PageValue::Array(_) => serde_json::Value::from("[array]"),
        PageValue::Object(_) | PageValue::Error { .. } => serde_json::Value::from("[object]"),
        PageValue::Function { .. } => serde_json::Value::from("[function]"),
    }
}

fn hints_condition(child: &str) -> bool {
    let lowered = child.to_lowercase();
    CONDITION_HINTS.iter().any(|hint| lowered.contains(hint))
}

fn overlaps_message(parent: &str, words: &[String]) -> bool {
    let lowered = parent.to_lowercase();
    words
        .iter()
        .any(|word| lowered.contains(word.as_str()) || word.contains(&lowered))
}

fn significant_words(message: &str) -> Vec<String> {
    message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= MIN_MESSAGE_WORD)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(entries: Vec<(&str, PageValue)>) -> PageValue {
        PageValue::object(
            entries
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        )
    }

    #[test]
    fn classifies_top_level_keys_by_coarse_type() {
        let state = store(vec![
            ("user", PageValue::object(vec![])),
            ("items", PageValue::array(vec![])),
            ("count", 3i64.into()),
            ("title", PageValue::text("home")),
            ("ready", true.into()),
            ("nothing", PageValue::Null),
        ]);
        let snapshot = snapshot_state(&state, "boom").expect("snapshot");
        assert_eq!(snapshot.source, "store");
        let kind = |key: &str| snapshot.keys.get(key).map(|k| k.kind.as_str());
        assert_eq!(kind("user"), Some("object"));
        assert_eq!(kind("items"), Some("array"));
        assert_eq!(kind("count"), Some("number"));
        assert_eq!(kind("title"), Some("string"));
        assert_eq!(kind("ready"), Some("boolean"));
        assert_eq!(kind("nothing"), Some("null"));
    }

    #[test]
    fn condition_sub_keys_enter_the_slice() {
        let state = store(vec![
            (
                "cart",
                PageValue::object(vec![
                    ("loading".into(), true.into()),
                    ("items".into(), PageValue::array(vec![])),
                ]),
            ),
            (
                "user",
                PageValue::object(vec![("name".into(), PageValue::text("ada"))]),
            ),
        ]);
        let snapshot =
            snapshot_state(&state, "Cannot read properties of undefined").expect("snapshot");
        assert_eq!(snapshot.relevant_slice.len(), 1);
        assert_eq!(
            snapshot.relevant_slice.get("cart.loading"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn message_words_pull_in_whole_parent_slices() {
        let state = store(vec![(
            "checkout",
            PageValue::object(vec![
                ("step".into(), 2i64.into()),
                ("coupon".into(), PageValue::text("FREE")),
            ]),
        )]);
        let snapshot = snapshot_state(&state, "checkout failed for order 42").expect("snapshot");
        assert_eq!(
            snapshot.relevant_slice.get("checkout.step"),
            Some(&serde_json::json!(2.0))
        );
        assert_eq!(
            snapshot.relevant_slice.get("checkout.coupon"),
            Some(&serde_json::json!("FREE"))
        );
    }

    #[test]
    fn slice_never_exceeds_ten_entries() {
        let children: Vec<(String, PageValue)> = (0..15)
            .map(|n| (format!("field{n:02}"), PageValue::Num(n as f64)))
            .collect();
        let state = store(vec![("orders", PageValue::object(children))]);
        let snapshot = snapshot_state(&state, "orders went sideways").expect("snapshot");
        assert_eq!(snapshot.relevant_slice.len(), MAX_SLICE_ENTRIES);
    }

    #[test]
    fn slice_strings_and_containers_are_bounded() {
        let state = store(vec![(
            "session",
            PageValue::object(vec![
                ("error".into(), PageValue::text("x".repeat(500))),
                ("errorDetail".into(), PageValue::object(vec![])),
                ("errorHistory".into(), PageValue::array(vec![])),
            ]),
        )]);
        let snapshot = snapshot_state(&state, "boom").expect("snapshot");
        let text = snapshot
            .relevant_slice
            .get("session.error")
            .and_then(|v| v.as_str())
            .expect("string entry");
        assert_eq!(text.chars().count(), SLICE_TEXT_CHARS);
        assert_eq!(
            snapshot.relevant_slice.get("session.errorDetail"),
            Some(&serde_json::json!("[object]"))
        );
        assert_eq!(
            snapshot.relevant_slice.get("session.errorHistory"),
            Some(&serde_json::json!("[array]"))
        );
    }

    #[test]
    fn unreadable_state_yields_nothing() {
        assert!(snapshot_state(&PageValue::text("not a store"), "boom").is_none());
        assert!(snapshot_state(&PageValue::Null, "boom").is_none());

        let state = store(vec![("a", 1i64.into())]);
        let PageValue::Object(entries) = &state else {
            panic!("expected object");
        };
        let _held = entries.lock();
        assert!(snapshot_state(&state, "boom").is_none());
    }
}
