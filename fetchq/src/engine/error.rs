use thiserror::Error;

/// Errors produced by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),

    #[error("no resolver registered for service '{0}'")]
    NoResolver(String),

    #[error("conversion failed: {message}")]
    Conversion {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("canceled")]
    Canceled,
}
