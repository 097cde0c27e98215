use chrono::{DateTime, Duration, Utc};
use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

/// A mailbox owner the engine syncs on behalf of.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub user_id: String,
    pub email_address: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// OAuth material for one user. Never serialized.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub user_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_id", &self.user_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// One stored message, keyed by `(user_id, provider_message_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Email {
    pub user_id: String,
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub subject: String,
    pub from_address: String,
    pub to_addresses: Vec<String>,
    pub cc_addresses: Vec<String>,
    pub bcc_addresses: Vec<String>,
    pub snippet: String,
    pub body_text: String,
    pub body_html: String,
    pub labels: Vec<String>,
    pub is_read: bool,
    pub is_important: bool,
    pub is_starred: bool,
    pub is_draft: bool,
    pub is_sent: bool,
    pub is_trash: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

/// Per (user, provider) sync progress and failure bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub user_id: String,
    pub provider: String,
    pub cursor: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub total_synced: i64,
    pub last_batch_count: i64,
    pub last_skipped_count: i64,
    pub last_error: Option<String>,
    pub error_count: i64,
    pub last_error_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncState {
    pub fn new(user_id: impl Into<String>, provider: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            provider: provider.into(),
            cursor: None,
            last_sync_at: None,
            next_sync_at: None,
            total_synced: 0,
            last_batch_count: 0,
            last_skipped_count: 0,
            last_error: None,
            error_count: 0,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a successful cycle that stored `stored` new rows into the state.
    ///
    /// `last_error_at` is kept so the previous failure stays visible.
    pub fn apply_success(&mut self, stored: usize, success: &CycleSuccess) {
        let at = success.at;
        self.cursor = success.cursor.clone();
        self.last_sync_at = Some(at);
        self.next_sync_at = Some(
            at.checked_add_signed(success.interval)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        self.total_synced += stored as i64;
        self.last_batch_count = stored as i64;
        self.last_skipped_count = success.skipped as i64;
        self.last_error = None;
        self.error_count = 0;
        self.updated_at = at;
    }
}

/// Bookkeeping for a cycle that reached the store, minus the stored count,
/// which only the committing transaction knows.
#[derive(Debug, Clone)]
pub struct CycleSuccess {
    pub skipped: usize,
    pub cursor: Option<String>,
    pub at: DateTime<Utc>,
    pub interval: Duration,
}

fn parse_json_array(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default()
}

impl User {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            email_address: row.get("email_address")?,
            display_name: row.get("display_name")?,
            is_active: row.get("is_active")?,
            token_expires_at: row.get("token_expires_at")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl Email {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            provider_message_id: row.get("provider_message_id")?,
            thread_id: row.get("thread_id")?,
            subject: row.get("subject")?,
            from_address: row.get("from_address")?,
            to_addresses: parse_json_array(row.get("to_addresses")?),
            cc_addresses: parse_json_array(row.get("cc_addresses")?),
            bcc_addresses: parse_json_array(row.get("bcc_addresses")?),
            snippet: row.get("snippet")?,
            body_text: row.get("body_text")?,
            body_html: row.get("body_html")?,
            labels: parse_json_array(row.get("labels")?),
            is_read: row.get("is_read")?,
            is_important: row.get("is_important")?,
            is_starred: row.get("is_starred")?,
            is_draft: row.get("is_draft")?,
            is_sent: row.get("is_sent")?,
            is_trash: row.get("is_trash")?,
            sent_at: row.get("sent_at")?,
            received_at: row.get("received_at")?,
        })
    }
}

impl SyncState {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            provider: row.get("provider")?,
            cursor: row.get("cursor")?,
            last_sync_at: row.get("last_sync_at")?,
            next_sync_at: row.get("next_sync_at")?,
            total_synced: row.get("total_synced")?,
            last_batch_count: row.get("last_batch_count")?,
            last_skipped_count: row.get("last_skipped_count")?,
            last_error: row.get("last_error")?,
            error_count: row.get("error_count")?,
            last_error_at: row.get("last_error_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}
