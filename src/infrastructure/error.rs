use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("State unavailable: {0}")]
    StateUnavailable(String),
    #[error("remote api error: http {status}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Network(String),
}

/// Failures of a playlist import. `InvalidInput`, `MissingCredential` and
/// `LocalStore` are returned to callers; the transport variants end up on the
/// playlist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImportError {
    #[error("invalid playlist input: {0}")]
    InvalidInput(String),
    #[error("no YouTube API key configured")]
    MissingCredential,
    #[error("local playlist store unavailable: {0}")]
    LocalStore(String),
    #[error("fetch failed with http {status} after {pages_fetched} page(s), {videos_fetched} video(s)")]
    FetchFailed {
        status: u16,
        pages_fetched: usize,
        videos_fetched: usize,
    },
    #[error("network error after {pages_fetched} page(s), {videos_fetched} video(s): {message}")]
    NetworkError {
        message: String,
        pages_fetched: usize,
        videos_fetched: usize,
    },
}

impl ImportError {
    pub fn from_infra(error: InfraError, pages_fetched: usize, videos_fetched: usize) -> Self {
        match error {
            InfraError::Http { status, .. } => ImportError::FetchFailed {
                status,
                pages_fetched,
                videos_fetched,
            },
            other => ImportError::NetworkError {
                message: other.to_string(),
                pages_fetched,
                videos_fetched,
            },
        }
    }
}
