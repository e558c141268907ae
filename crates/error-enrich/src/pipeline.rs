//! The time-boxed enrichment pipeline.
//!
//! `enrich` races the full stage sequence against the budget clock; when
//! the budget wins, only the message-derived summary ships. Stages fail
//! independently: a dead source map or an unreadable store shrinks the
//! output, it never aborts the stages after it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::component;
use crate::host::HostPage;
use crate::model::{AiContext, EnrichedErrorRecord, ErrorRecord, SourceSnippet, StackFrame};
use crate::snippet;
use crate::sourcemap::{self, SourceMapCache};
use crate::stack;
use crate::state_slice;
use crate::summary;

#[derive(Clone, Debug)]
pub struct EnrichOptions {
    /// Wall-clock ceiling for one enrichment run.
    pub budget_ms: u64,
    /// Running JSON-size ceiling across all attached snippets.
    pub snippet_budget_bytes: usize,
    /// Snippets attached per error at most.
    pub snippet_frames: usize,
    /// Scripts the source-map cache remembers.
    pub map_cache_capacity: usize,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            budget_ms: 3_000,
            snippet_budget_bytes: 10_240,
            snippet_frames: 3,
            map_cache_capacity: SourceMapCache::DEFAULT_CAPACITY,
        }
    }
}

pub struct Enricher {
    host: Arc<dyn HostPage>,
    cache: Mutex<SourceMapCache>,
    options: EnrichOptions,
}

impl Enricher {
    pub fn new(host: Arc<dyn HostPage>) -> Self {
        Self::with_options(host, EnrichOptions::default())
    }

    pub fn with_options(host: Arc<dyn HostPage>, options: EnrichOptions) -> Self {
        Self {
            host,
            cache: Mutex::new(SourceMapCache::new(options.map_cache_capacity)),
            options,
        }
    }

    /// Attaches whatever context the stages can recover within budget.
    /// Never fails; on overrun the raw record plus a summary is the whole
    /// result, and the abandoned run's cache writes stay valid for the
    /// next error.
    pub async fn enrich(&self, record: ErrorRecord, include_state: bool) -> EnrichedErrorRecord {
        let budget = Duration::from_millis(self.options.budget_ms);
        match tokio::time::timeout(budget, self.run_stages(&record, include_state)).await {
            Ok(context) => finish(record, context),
            Err(_) => {
                warn!(
                    target: "error_enrich",
                    budget_ms = self.options.budget_ms,
                    "enrichment ran over budget, keeping summary only"
                );
                let summary = summary::fallback(&record);
                finish(
                    record,
                    AiContext {
                        summary,
                        ..AiContext::default()
                    },
                )
            }
        }
    }

    async fn run_stages(&self, record: &ErrorRecord, include_state: bool) -> AiContext {
        let frames = record
            .stack
            .as_deref()
            .map(stack::parse_stack)
            .unwrap_or_default();

        if let Some(top) = frames.first() {
            self.resolve_map(&top.filename).await;
        }
        let snippets = self.collect_snippets(&frames);

        let ancestry = match self.host.active_element().await {
            Some(element) => component::detect_component(&element)
                .map(|detected| component::component_ancestry(&detected))
                .unwrap_or_default(),
            None => Vec::new(),
        };

        let snapshot = if include_state {
            self.capture_state(&record.message).await
        } else {
            None
        };

        let summary = summary::compose(record, frames.first(), &ancestry, snapshot.as_ref());
        AiContext {
            summary,
            source_snippets: (!snippets.is_empty()).then_some(snippets),
            component_ancestry: (!ancestry.is_empty()).then_some(ancestry),
            state_snapshot: snapshot,
        }
    }

    /// Fills the cache for one script URL. Unusable maps are dropped, not
    /// cached, so a later error against the same URL retries.
    async fn resolve_map(&self, url: &str) {
        if self.cache.lock().contains(url) {
            return;
        }
        let body = match self.host.script_source(url).await {
            Ok(body) => body,
            Err(err) => {
                debug!(target: "error_enrich", %url, %err, "script fetch failed");
                return;
            }
        };
        match sourcemap::parse_inline_source_map(&body) {
            Some(map) => self.cache.lock().insert(url, map),
            None => debug!(target: "error_enrich", %url, "no usable inline source map"),
        }
    }

    fn collect_snippets(&self, frames: &[StackFrame]) -> Vec<SourceSnippet> {
        let mut snippets = Vec::new();
        let mut spent = 0usize;
        let cache = self.cache.lock();
        for frame in frames {
            if snippets.len() >= self.options.snippet_frames {
                break;
            }
            let Some(map) = cache.get(&frame.filename) else {
                continue;
            };
            let Some(content) = map.sources_content.first() else {
                continue;
            };
            let file = map
                .sources
                .first()
                .cloned()
                .unwrap_or_else(|| frame.filename.clone());
            let Some(snippet) = snippet::extract_snippet(&file, content, frame.lineno) else {
                continue;
            };
            let cost = serde_json::to_string(&snippet)
                .map(|json| json.len())
                .unwrap_or(usize::MAX);
            if spent.saturating_add(cost) > self.options.snippet_budget_bytes {
                debug!(target: "error_enrich", spent, "snippet budget reached, stopping extraction");
                break;
            }
            spent += cost;
            snippets.push(snippet);
        }
        snippets
    }

    /// Drops every cached source map; the next error re-resolves.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    async fn capture_state(&self, message: &str) -> Option<crate::model::StateSnapshot> {
        match self.host.store_state().await {
            Ok(Some(state)) => state_slice::snapshot_state(&state, message),
            Ok(None) => None,
            Err(err) => {
                debug!(target: "error_enrich", %err, "store read failed");
                None
            }
        }
    }
}

/// Seals the record with its context and the tag list naming which
/// optional enrichments actually attached.
fn finish(record: ErrorRecord, context: AiContext) -> EnrichedErrorRecord {
    let mut enrichments = Vec::new();
    if context.source_snippets.is_some() {
        enrichments.push("sourceSnippets".to_string());
    }
    if context.component_ancestry.is_some() {
        enrichments.push("componentAncestry".to_string());
    }
    if context.state_snapshot.is_some() {
        enrichments.push("stateSnapshot".to_string());
    }
    EnrichedErrorRecord {
        record,
        ai_context: context,
        enrichments,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pagelens_sanitize::PageValue;

    use super::*;
    use crate::errors::{EnrichError, EnrichResult};
    use crate::sourcemap::SourceMapRecord;

    struct BareHost;

    #[async_trait]
    impl HostPage for BareHost {
        async fn script_source(&self, url: &str) -> EnrichResult<String> {
            Err(EnrichError::ScriptFetch(url.to_string()))
        }

        async fn active_element(&self) -> Option<PageValue> {
            None
        }

        async fn store_state(&self) -> EnrichResult<Option<PageValue>> {
            Ok(None)
        }
    }

    fn frame(filename: &str, lineno: u32) -> StackFrame {
        StackFrame {
            function_name: Some("f".into()),
            filename: filename.into(),
            lineno,
            colno: 1,
        }
    }

    #[test]
    fn tags_name_only_attached_enrichments() {
        let bare = finish(ErrorRecord::new("boom"), AiContext {
            summary: "boom".into(),
            ..AiContext::default()
        });
        assert!(bare.enrichments.is_empty());

        let tagged = finish(ErrorRecord::new("boom"), AiContext {
            summary: "boom".into(),
            source_snippets: Some(Vec::new()),
            component_ancestry: Some(Vec::new()),
            state_snapshot: None,
        });
        assert_eq!(tagged.enrichments, vec!["sourceSnippets", "componentAncestry"]);
    }

    #[test]
    fn snippet_budget_stops_before_overflow() {
        let enricher = Enricher::with_options(
            Arc::new(BareHost),
            EnrichOptions {
                snippet_budget_bytes: 700,
                ..EnrichOptions::default()
            },
        );
        let source = (1..=40)
            .map(|n| format!("const value{n} = {n};"))
            .collect::<Vec<_>>()
            .join("\n");
        enricher.cache.lock().insert(
            "http://x/bundle.js",
            SourceMapRecord {
                sources: vec!["src/app.ts".into()],
                sources_content: vec![source],
            },
        );

        let frames = vec![
            frame("http://x/bundle.js", 10),
            frame("http://x/bundle.js", 20),
            frame("http://x/bundle.js", 30),
        ];
        let snippets = enricher.collect_snippets(&frames);
        assert!(!snippets.is_empty());
        assert!(snippets.len() < 3, "budget must stop extraction early");
        let spent: usize = snippets
            .iter()
            .map(|s| serde_json::to_string(s).map(|j| j.len()).unwrap_or(0))
            .sum();
        assert!(spent <= 700);
        // The kept snippets are intact, not trimmed to fit.
        assert_eq!(snippets[0].lines.len(), 11);
    }

    #[tokio::test]
    async fn unknown_scripts_produce_summary_only() {
        let enricher = Enricher::new(Arc::new(BareHost));
        let record = ErrorRecord {
            stack: Some("    at f (http://x/gone.js:3:1)".into()),
            ..ErrorRecord::new("boom")
        };
        let enriched = enricher.enrich(record, true).await;
        assert_eq!(enriched.ai_context.summary, "boom at http://x/gone.js:3");
        assert!(enriched.ai_context.source_snippets.is_none());
        assert!(enriched.ai_context.state_snapshot.is_none());
        assert!(enriched.enrichments.is_empty());
    }
}
