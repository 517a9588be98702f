use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("invalid pattern for {kind}: {source}")]
    InvalidPattern {
        kind: String,
        #[source]
        source: regex::Error,
    },
}
