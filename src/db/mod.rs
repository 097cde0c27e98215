use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use thiserror::Error;

use crate::crypto::{CryptoError, TokenCipher};

use self::models::{Credentials, CycleSuccess, Email, SyncState, User};

pub use self::store::MailStore;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("token sealing: {0}")]
    Crypto(#[from] CryptoError),

    #[error("{0}")]
    Config(String),
}

pub mod migrations;
pub mod models;
pub mod schema;
pub mod store;

const EMAIL_COLUMNS: &str = r#"
    user_id, provider_message_id, thread_id, subject, from_address,
    to_addresses, cc_addresses, bcc_addresses, snippet, body_text, body_html, labels,
    is_read, is_important, is_starred, is_draft, is_sent, is_trash, sent_at, received_at
"#;

const SYNC_STATE_COLUMNS: &str = r#"
    user_id, provider, cursor, last_sync_at, next_sync_at, total_synced, last_batch_count,
    last_skipped_count, last_error, error_count, last_error_at, created_at, updated_at
"#;

const USER_COLUMNS: &str =
    "user_id, email_address, display_name, is_active, token_expires_at, created_at";

#[derive(Debug, Clone, Default)]
pub struct EmailListFilters {
    pub user_id: Option<String>,
    pub label: Option<String>,
    pub unread_only: bool,
    pub include_trash: bool,
    pub limit: usize,
    pub offset: usize,
}

pub struct Database {
    conn: Mutex<Connection>,
    cipher: Option<TokenCipher>,
}

impl Database {
    /// Open (and migrate) the database, sealing tokens when
    /// `MAILSYNC_TOKEN_KEY` is set.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        Self::open_with_cipher(path, TokenCipher::from_env()?)
    }

    pub fn open_with_cipher(path: &Path, cipher: Option<TokenCipher>) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        migrations::migrate(&mut conn)
            .map_err(|e| DbError::Config(format!("migration failed: {e}")))?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    pub fn default_db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DbError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".mailsync").join("mailsync.db"))
    }

    pub fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn
            .lock()
            .map_err(|_| DbError::Config("database connection lock poisoned".to_string()))
    }

    fn seal_token(&self, value: Option<&str>) -> Result<Option<String>, DbError> {
        match (value, &self.cipher) {
            (Some(token), Some(cipher)) => Ok(Some(cipher.seal(token)?)),
            (Some(token), None) => Ok(Some(token.to_string())),
            (None, _) => Ok(None),
        }
    }

    fn open_token(&self, value: Option<String>) -> Result<Option<String>, DbError> {
        match (value, &self.cipher) {
            (Some(stored), Some(cipher)) => Ok(Some(cipher.open(&stored)?)),
            (value, _) => Ok(value),
        }
    }

    /// Insert or update a user. Absent tokens keep the stored ones.
    pub fn upsert_user(&self, user: &User, credentials: &Credentials) -> Result<(), DbError> {
        let access_token = self.seal_token(credentials.access_token.as_deref())?;
        let refresh_token = self.seal_token(credentials.refresh_token.as_deref())?;

        self.conn()?.execute(
            r#"
            INSERT INTO users (
                user_id, email_address, display_name, access_token, refresh_token,
                token_expires_at, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(user_id) DO UPDATE SET
                email_address = excluded.email_address,
                display_name = excluded.display_name,
                access_token = COALESCE(excluded.access_token, users.access_token),
                refresh_token = COALESCE(excluded.refresh_token, users.refresh_token),
                token_expires_at = COALESCE(excluded.token_expires_at, users.token_expires_at),
                is_active = excluded.is_active
            "#,
            params![
                user.user_id,
                user.email_address,
                user.display_name,
                access_token,
                refresh_token,
                credentials.expires_at,
                user.is_active,
                user.created_at,
            ],
        )?;

        Ok(())
    }

    pub fn get_user(&self, user_id: &str) -> Result<Option<User>, DbError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                [user_id],
                User::from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn list_users(&self) -> Result<Vec<User>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY email_address ASC"
        ))?;
        let users = stmt
            .query_map([], User::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    pub fn list_active_users(&self) -> Result<Vec<User>, DbError> {
        Ok(self
            .list_users()?
            .into_iter()
            .filter(|user| user.is_active)
            .collect())
    }

    pub fn set_user_active(&self, user_id: &str, active: bool) -> Result<usize, DbError> {
        let updated = self.conn()?.execute(
            "UPDATE users SET is_active = ?1 WHERE user_id = ?2",
            params![active, user_id],
        )?;
        Ok(updated)
    }

    pub fn get_email(
        &self,
        user_id: &str,
        provider_message_id: &str,
    ) -> Result<Option<Email>, DbError> {
        let conn = self.conn()?;
        let email = conn
            .query_row(
                &format!(
                    "SELECT {EMAIL_COLUMNS} FROM emails WHERE user_id = ?1 AND provider_message_id = ?2"
                ),
                params![user_id, provider_message_id],
                Email::from_row,
            )
            .optional()?;
        Ok(email)
    }

    pub fn list_emails(&self, mut filters: EmailListFilters) -> Result<Vec<Email>, DbError> {
        if filters.limit == 0 {
            filters.limit = 50;
        }

        let mut sql = format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE 1 = 1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(user_id) = filters.user_id {
            sql.push_str(" AND user_id = ?");
            params_vec.push(Box::new(user_id));
        }

        if let Some(label) = filters.label.filter(|s| !s.trim().is_empty()) {
            sql.push_str(" AND EXISTS (SELECT 1 FROM json_each(emails.labels) WHERE json_each.value = ?)");
            params_vec.push(Box::new(label));
        }

        if filters.unread_only {
            sql.push_str(" AND is_read = 0");
        }

        if !filters.include_trash {
            sql.push_str(" AND is_trash = 0");
        }

        sql.push_str(" ORDER BY received_at DESC LIMIT ? OFFSET ?");
        params_vec.push(Box::new(filters.limit as i64));
        params_vec.push(Box::new(filters.offset as i64));

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|v| v.as_ref()).collect();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let emails = stmt
            .query_map(params_refs.as_slice(), Email::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(emails)
    }

    pub fn count_emails(&self, user_id: &str) -> Result<i64, DbError> {
        let count = self.conn()?.query_row(
            "SELECT COUNT(*) FROM emails WHERE user_id = ?1",
            [user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get_sync_state(
        &self,
        user_id: &str,
        provider: &str,
    ) -> Result<Option<SyncState>, DbError> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                &format!(
                    "SELECT {SYNC_STATE_COLUMNS} FROM sync_state WHERE user_id = ?1 AND provider = ?2"
                ),
                params![user_id, provider],
                SyncState::from_row,
            )
            .optional()?;
        Ok(state)
    }

    pub fn list_sync_states(&self) -> Result<Vec<SyncState>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SYNC_STATE_COLUMNS} FROM sync_state ORDER BY user_id ASC, provider ASC"
        ))?;
        let states = stmt
            .query_map([], SyncState::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(states)
    }
}

fn insert_emails(conn: &Connection, user_id: &str, emails: &[Email]) -> Result<usize, DbError> {
    let mut stmt = conn.prepare(
        r#"
        INSERT INTO emails (
            user_id, provider_message_id, thread_id, subject, from_address,
            to_addresses, cc_addresses, bcc_addresses, snippet, body_text, body_html, labels,
            is_read, is_important, is_starred, is_draft, is_sent, is_trash, sent_at, received_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
        ON CONFLICT(user_id, provider_message_id) DO NOTHING
        "#,
    )?;

    let mut stored = 0usize;
    for email in emails {
        stored += stmt.execute(params![
            user_id,
            email.provider_message_id,
            email.thread_id,
            email.subject,
            email.from_address,
            serde_json::to_string(&email.to_addresses)?,
            serde_json::to_string(&email.cc_addresses)?,
            serde_json::to_string(&email.bcc_addresses)?,
            email.snippet,
            email.body_text,
            email.body_html,
            serde_json::to_string(&email.labels)?,
            email.is_read,
            email.is_important,
            email.is_starred,
            email.is_draft,
            email.is_sent,
            email.is_trash,
            email.sent_at,
            email.received_at,
        ])?;
    }
    Ok(stored)
}

fn write_state(conn: &Connection, state: &SyncState) -> Result<(), DbError> {
    conn.execute(
        r#"
        INSERT INTO sync_state (
            user_id, provider, cursor, last_sync_at, next_sync_at, total_synced,
            last_batch_count, last_skipped_count, last_error, error_count, last_error_at,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT(user_id, provider) DO UPDATE SET
            cursor = excluded.cursor,
            last_sync_at = excluded.last_sync_at,
            next_sync_at = excluded.next_sync_at,
            total_synced = excluded.total_synced,
            last_batch_count = excluded.last_batch_count,
            last_skipped_count = excluded.last_skipped_count,
            last_error = excluded.last_error,
            error_count = excluded.error_count,
            last_error_at = excluded.last_error_at,
            updated_at = excluded.updated_at
        "#,
        params![
            state.user_id,
            state.provider,
            state.cursor,
            state.last_sync_at,
            state.next_sync_at,
            state.total_synced,
            state.last_batch_count,
            state.last_skipped_count,
            state.last_error,
            state.error_count,
            state.last_error_at,
            state.created_at,
            state.updated_at,
        ],
    )?;
    Ok(())
}

impl MailStore for Database {
    fn exists(&self, user_id: &str, provider_message_id: &str) -> Result<bool, DbError> {
        let found = self
            .conn()?
            .query_row(
                "SELECT 1 FROM emails WHERE user_id = ?1 AND provider_message_id = ?2 LIMIT 1",
                params![user_id, provider_message_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn upsert_batch(&self, user_id: &str, emails: &[Email]) -> Result<usize, DbError> {
        if emails.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stored = insert_emails(&tx, user_id, emails)?;
        tx.commit()?;

        Ok(stored)
    }

    fn commit_cycle(
        &self,
        state: &mut SyncState,
        emails: &[Email],
        success: &CycleSuccess,
    ) -> Result<usize, DbError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stored = insert_emails(&tx, &state.user_id, emails)?;

        let mut updated = state.clone();
        updated.apply_success(stored, success);
        write_state(&tx, &updated)?;
        tx.commit()?;

        *state = updated;
        Ok(stored)
    }

    fn load_state(&self, user_id: &str, provider: &str) -> Result<SyncState, DbError> {
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            r#"
            INSERT INTO sync_state (user_id, provider, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?3)
            ON CONFLICT(user_id, provider) DO NOTHING
            "#,
            params![user_id, provider, now],
        )?;

        let state = conn.query_row(
            &format!(
                "SELECT {SYNC_STATE_COLUMNS} FROM sync_state WHERE user_id = ?1 AND provider = ?2"
            ),
            params![user_id, provider],
            SyncState::from_row,
        )?;
        Ok(state)
    }

    fn save_state(&self, state: &SyncState) -> Result<(), DbError> {
        write_state(&*self.conn()?, state)
    }

    fn record_error(&self, user_id: &str, provider: &str, message: &str) -> Result<(), DbError> {
        let now = Utc::now();
        self.conn()?.execute(
            r#"
            INSERT INTO sync_state (
                user_id, provider, last_error, error_count, last_error_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, 1, ?4, ?4, ?4)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                last_error = excluded.last_error,
                error_count = sync_state.error_count + 1,
                last_error_at = excluded.last_error_at,
                updated_at = excluded.updated_at
            "#,
            params![user_id, provider, message, now],
        )?;
        Ok(())
    }

    fn load_credentials(&self, user_id: &str) -> Result<Option<Credentials>, DbError> {
        let row = self
            .conn()?
            .query_row(
                r#"
                SELECT user_id, access_token, refresh_token, token_expires_at, is_active
                FROM users
                WHERE user_id = ?1
                "#,
                [user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<DateTime<Utc>>>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((user_id, access_token, refresh_token, expires_at, is_active)) = row else {
            return Ok(None);
        };

        Ok(Some(Credentials {
            user_id,
            access_token: self.open_token(access_token)?,
            refresh_token: self.open_token(refresh_token)?,
            expires_at,
            is_active,
        }))
    }

    fn save_access_token(
        &self,
        user_id: &str,
        access_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let sealed = self.seal_token(Some(access_token))?;
        let updated = self.conn()?.execute(
            "UPDATE users SET access_token = ?1, token_expires_at = ?2 WHERE user_id = ?3",
            params![sealed, expires_at, user_id],
        )?;
        if updated == 0 {
            return Err(DbError::Config(format!("unknown user '{user_id}'")));
        }
        Ok(())
    }
}
