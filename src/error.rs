use thiserror::Error;

use crate::db::DbError;

/// Failure taxonomy for one sync cycle.
///
/// `Auth` is terminal for the cycle. `TransientFetch` and `Parse` are
/// tolerated per message and only abort the cycle when the message index
/// itself cannot be listed. `Store` aborts the cycle and rolls back the batch.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("auth: {0}")]
    Auth(String),

    #[error("fetch: {0}")]
    TransientFetch(String),

    #[error("parse: {0}")]
    Parse(String),

    #[error("store: {0}")]
    Store(#[from] DbError),
}

impl SyncError {
    /// Whether a later cycle can succeed without operator intervention.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::TransientFetch(_) => "fetch",
            Self::Parse(_) => "parse",
            Self::Store(_) => "store",
        }
    }
}
