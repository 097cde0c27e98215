use chrono::{DateTime, Utc};

use super::models::{Credentials, CycleSuccess, Email, SyncState};
use super::DbError;

/// Persistence contract the sync engine depends on.
///
/// Implementations must make `upsert_batch` atomic per call and enforce the
/// `(user_id, provider_message_id)` natural key, so concurrent writers racing
/// on a never-seen id cannot double-insert.
pub trait MailStore: Send + Sync {
    /// Whether a message is already stored for this user.
    fn exists(&self, user_id: &str, provider_message_id: &str) -> Result<bool, DbError>;

    /// Insert new messages, skipping keys that already exist.
    ///
    /// Returns the number of rows actually inserted. Either the whole batch
    /// commits or none of it does.
    fn upsert_batch(&self, user_id: &str, emails: &[Email]) -> Result<usize, DbError>;

    /// Load sync state, creating an empty row on first use.
    fn load_state(&self, user_id: &str, provider: &str) -> Result<SyncState, DbError>;

    fn save_state(&self, state: &SyncState) -> Result<(), DbError>;

    /// Store a successful cycle: insert `emails` and write the folded state
    /// in one transaction.
    ///
    /// `state` is updated only when the commit succeeds. Returns the number
    /// of rows actually inserted.
    fn commit_cycle(
        &self,
        state: &mut SyncState,
        emails: &[Email],
        success: &CycleSuccess,
    ) -> Result<usize, DbError>;

    /// Record a failed cycle: set `last_error`, `last_error_at` and bump
    /// `error_count`.
    fn record_error(&self, user_id: &str, provider: &str, message: &str) -> Result<(), DbError>;

    fn load_credentials(&self, user_id: &str) -> Result<Option<Credentials>, DbError>;

    fn save_access_token(
        &self,
        user_id: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DbError>;
}
