use anyhow::Result;
use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY,
            email_address TEXT NOT NULL UNIQUE,
            display_name TEXT,
            access_token TEXT,
            refresh_token TEXT,
            token_expires_at TEXT,
            is_active BOOLEAN NOT NULL DEFAULT true,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS emails (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL REFERENCES users(user_id),
            provider_message_id TEXT NOT NULL,
            thread_id TEXT,
            subject TEXT NOT NULL DEFAULT '',
            from_address TEXT NOT NULL DEFAULT '',
            to_addresses TEXT NOT NULL DEFAULT '[]',
            cc_addresses TEXT NOT NULL DEFAULT '[]',
            bcc_addresses TEXT NOT NULL DEFAULT '[]',
            snippet TEXT NOT NULL DEFAULT '',
            body_text TEXT NOT NULL DEFAULT '',
            body_html TEXT NOT NULL DEFAULT '',
            labels TEXT NOT NULL DEFAULT '[]',
            is_read BOOLEAN NOT NULL DEFAULT false,
            is_important BOOLEAN NOT NULL DEFAULT false,
            is_starred BOOLEAN NOT NULL DEFAULT false,
            is_draft BOOLEAN NOT NULL DEFAULT false,
            is_sent BOOLEAN NOT NULL DEFAULT false,
            is_trash BOOLEAN NOT NULL DEFAULT false,
            sent_at TEXT,
            received_at TEXT NOT NULL,
            UNIQUE (user_id, provider_message_id)
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            user_id TEXT NOT NULL REFERENCES users(user_id),
            provider TEXT NOT NULL,
            cursor TEXT,
            last_sync_at TEXT,
            next_sync_at TEXT,
            total_synced INTEGER NOT NULL DEFAULT 0,
            last_batch_count INTEGER NOT NULL DEFAULT 0,
            last_skipped_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            error_count INTEGER NOT NULL DEFAULT 0,
            last_error_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, provider)
        );

        CREATE INDEX IF NOT EXISTS idx_emails_user_received ON emails(user_id, received_at);
        CREATE INDEX IF NOT EXISTS idx_emails_thread_id ON emails(thread_id);
        "#,
    )?;

    Ok(())
}
