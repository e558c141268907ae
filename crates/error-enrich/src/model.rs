//! Data model for raw and enriched error records.
//!
//! Field names serialize in the camelCase shape the diagnostic relay
//! expects; the enrichment payload rides under `_aiContext` with a tag list
//! under `_enrichments` naming which optional context made it in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A raw, unenriched exception as the page hooks hand it over. Immutable
/// once created.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// The record plus its AI context; created once per error, never mutated
/// afterward.
#[derive(Clone, Debug, Serialize)]
pub struct EnrichedErrorRecord {
    #[serde(flatten)]
    pub record: ErrorRecord,
    #[serde(rename = "_aiContext")]
    pub ai_context: AiContext,
    #[serde(rename = "_enrichments")]
    pub enrichments: Vec<String>,
}

/// `summary` is the only field guaranteed present.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiContext {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_snippets: Option<Vec<SourceSnippet>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_ancestry: Option<Vec<ComponentAncestryEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_snapshot: Option<StateSnapshot>,
}

/// One parsed stack frame; anonymous files never make it this far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub function_name: Option<String>,
    pub filename: String,
    pub lineno: u32,
    pub colno: u32,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// One line of original source context; exactly one line per snippet
/// carries the error flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SnippetLine {
    pub line: u32,
    pub text: String,
    #[serde(rename = "isError", skip_serializing_if = "is_false")]
    pub is_error: bool,
}

/// Context lines recovered around one frame's original source location.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnippet {
    pub file: String,
    pub error_line: u32,
    pub lines: Vec<SnippetLine>,
}

/// One named component on the path from the root to the error site,
/// root-first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentAncestryEntry {
    pub name: String,
    pub prop_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_keys: Option<Vec<String>>,
}

/// Coarse classification of one top-level store key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValueKind {
    #[serde(rename = "type")]
    pub kind: String,
}

/// A bounded look into the page's global state container.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub source: String,
    pub keys: BTreeMap<String, ValueKind>,
    pub relevant_slice: BTreeMap<String, serde_json::Value>,
}
