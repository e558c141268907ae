//! Page-side capabilities the pipeline borrows from whoever embeds it.

use async_trait::async_trait;
use pagelens_sanitize::PageValue;

use crate::errors::EnrichResult;

/// What the enrichment stages may ask the hosting page for. Every method
/// is allowed to fail or come back empty; stages degrade instead of
/// propagating.
#[async_trait]
pub trait HostPage: Send + Sync {
    /// Full text of a script the page loaded, keyed by its URL.
    async fn script_source(&self, url: &str) -> EnrichResult<String>;

    /// The element that had focus (or was last interacted with) when the
    /// error fired.
    async fn active_element(&self) -> Option<PageValue>;

    /// Top-level value of a well-known global state container, when one
    /// exists and exposes a read method. `Ok(None)` means no container.
    async fn store_state(&self) -> EnrichResult<Option<PageValue>>;
}
