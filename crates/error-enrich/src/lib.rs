//! Error-enrichment pipeline for in-page diagnostics.
//!
//! Takes a raw exception record and, inside a hard time budget, attaches
//! AI-consumable context recovered from the page: parsed stack frames,
//! original-source snippets via inline source maps, UI-component
//! ancestry, and an opt-in slice of global store state. Every stage
//! degrades on failure; the one guarantee is a non-empty summary.

pub mod component;
pub mod errors;
pub mod host;
pub mod model;
pub mod pipeline;
pub mod snippet;
pub mod sourcemap;
pub mod stack;
pub mod state_slice;
pub mod summary;

pub use component::{component_ancestry, detect_component, DetectedComponent, Framework};
pub use errors::{EnrichError, EnrichResult};
pub use host::HostPage;
pub use model::{
    AiContext, ComponentAncestryEntry, EnrichedErrorRecord, ErrorRecord, SnippetLine,
    SourceSnippet, StackFrame, StateSnapshot, ValueKind,
};
pub use pipeline::{EnrichOptions, Enricher};
pub use snippet::extract_snippet;
pub use sourcemap::{parse_inline_source_map, SourceMapCache, SourceMapRecord};
pub use stack::parse_stack;
pub use state_slice::snapshot_state;
