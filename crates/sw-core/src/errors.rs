/// Core error type for streamwatch.
///
/// Adapter crates should map their specific errors into this type so the
/// reconciler can treat failures uniformly (benign skip vs logged failure).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("external error: {0}")]
    External(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("signature rejected: {0}")]
    Signature(String),
}

impl Error {
    /// Missing community, member, channel or record. Never escalated.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
