//! Error types for the backing store

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Resource not found: {kind}/{id}")]
    NotFound { kind: String, id: String },

    #[error("Precondition failed for {kind}/{id}: {reason}")]
    PreconditionFailed {
        kind: String,
        id: String,
        reason: String,
    },

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Store returned status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Whether a retry with the same inputs could plausibly succeed.
    ///
    /// 5xx-class responses and transport failures qualify; precondition
    /// failures and 4xx responses do not.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Status { code, .. } => *code >= 500,
            Error::Transport(_) => true,
            _ => false,
        }
    }
}
