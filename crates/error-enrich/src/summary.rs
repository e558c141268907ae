//! One-sentence digest assembly from whichever stages produced anything.

use crate::model::{ComponentAncestryEntry, ErrorRecord, StackFrame, StateSnapshot};

const UNKNOWN_ERROR: &str = "Unknown error";

/// The guaranteed-present floor: just the message, never empty.
pub fn fallback(record: &ErrorRecord) -> String {
    if record.message.trim().is_empty() {
        UNKNOWN_ERROR.to_string()
    } else {
        record.message.clone()
    }
}

/// Appends location, component path and relevant state keys to the
/// message, each only when its stage delivered.
pub fn compose(
    record: &ErrorRecord,
    top_frame: Option<&StackFrame>,
    ancestry: &[ComponentAncestryEntry],
    snapshot: Option<&StateSnapshot>,
) -> String {
    let mut summary = fallback(record);
    if let Some((file, line)) = location(record, top_frame) {
        summary.push_str(&format!(" at {file}:{line}"));
    }
    if !ancestry.is_empty() {
        let path = ancestry
            .iter()
            .map(|entry| entry.name.as_str())
            .collect::<Vec<_>>()
            .join(" > ");
        summary.push_str(&format!(" in {path}"));
    }
    if let Some(snapshot) = snapshot {
        if !snapshot.relevant_slice.is_empty() {
            let keys = snapshot
                .relevant_slice
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            summary.push_str(&format!(" (state: {keys})"));
        }
    }
    summary
}

fn location(record: &ErrorRecord, top_frame: Option<&StackFrame>) -> Option<(String, u32)> {
    if let Some(frame) = top_frame {
        return Some((frame.filename.clone(), frame.lineno));
    }
    match (&record.filename, record.lineno) {
        (Some(file), Some(line)) => Some((file.clone(), line)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::ValueKind;

    fn entry(name: &str) -> ComponentAncestryEntry {
        ComponentAncestryEntry {
            name: name.to_string(),
            prop_keys: Vec::new(),
            has_state: None,
            state_keys: None,
        }
    }

    #[test]
    fn full_context_reads_as_one_sentence() {
        let record = ErrorRecord::new("TypeError: x is not a function");
        let frame = StackFrame {
            function_name: Some("handleSubmit".into()),
            filename: "http://x/main.js".into(),
            lineno: 42,
            colno: 15,
        };
        let ancestry = vec![entry("App"), entry("Cart")];
        let mut slice = BTreeMap::new();
        slice.insert("cart.loading".to_string(), serde_json::json!(true));
        let snapshot = StateSnapshot {
            source: "store".into(),
            keys: BTreeMap::from([("cart".to_string(), ValueKind { kind: "object".into() })]),
            relevant_slice: slice,
        };

        let summary = compose(&record, Some(&frame), &ancestry, Some(&snapshot));
        assert_eq!(
            summary,
            "TypeError: x is not a function at http://x/main.js:42 in App > Cart (state: cart.loading)"
        );
    }

    #[test]
    fn bare_record_is_just_the_message() {
        let record = ErrorRecord::new("boom");
        assert_eq!(compose(&record, None, &[], None), "boom");
    }

    #[test]
    fn empty_message_still_yields_a_sentence() {
        let record = ErrorRecord::new("  ");
        assert_eq!(compose(&record, None, &[], None), "Unknown error");
        assert_eq!(fallback(&record), "Unknown error");
    }

    #[test]
    fn record_location_backstops_missing_frames() {
        let mut record = ErrorRecord::new("boom");
        record.filename = Some("http://x/app.js".into());
        record.lineno = Some(7);
        assert_eq!(compose(&record, None, &[], None), "boom at http://x/app.js:7");
    }

    #[test]
    fn empty_slice_keeps_state_out_of_the_summary() {
        let record = ErrorRecord::new("boom");
        let snapshot = StateSnapshot {
            source: "store".into(),
            keys: BTreeMap::new(),
            relevant_slice: BTreeMap::new(),
        };
        assert_eq!(compose(&record, None, &[], Some(&snapshot)), "boom");
    }
}
