use thiserror::Error;

/// Failure shapes a host can report back to the pipeline. Stages treat
/// every one of them as a degrade signal, never as fatal.
#[derive(Debug, Error, Clone)]
pub enum EnrichError {
    #[error("script fetch failed: {0}")]
    ScriptFetch(String),
    #[error("store read failed: {0}")]
    StoreRead(String),
}

pub type EnrichResult<T> = Result<T, EnrichError>;
