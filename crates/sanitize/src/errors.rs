use thiserror::Error;

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("invalid scrub pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

pub type SanitizeResult<T> = Result<T, SanitizeError>;
