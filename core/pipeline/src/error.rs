use thiserror::Error;

/// Untrusted model output failed to parse into the expected shape.
///
/// Always recovered locally: the caller renders the attached raw text
/// instead of the typed payload. Never escalated past a parse boundary.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct ParseError {
    pub reason: String,
    /// The original raw text, kept for display.
    pub raw: String,
}

impl ParseError {
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

/// Failure calling the model provider. Surfaced as the run's `error` state;
/// never retried automatically.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("rate limit exceeded, try again later")]
    RateLimited,
    #[error("api credits exhausted")]
    QuotaExhausted,
    #[error("model gateway error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to reach model gateway: {0}")]
    Network(#[from] reqwest::Error),
    #[error("model gateway returned no completion")]
    EmptyResponse,
}

/// Persistence backend failure, with a human-readable message.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self(err.to_string())
    }
}

/// Umbrella for the failures a single analysis run can end in. Parse errors
/// are absent on purpose: the raw text is persisted before parsing, so a
/// parse failure is a display concern, not a run failure.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("model invocation failed: {0}")]
    Model(#[from] ModelError),
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
}
