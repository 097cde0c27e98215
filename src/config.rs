use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_QUERY: &str = "in:inbox";
pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const MAX_PAGE_SIZE: u32 = 500;
pub const DEFAULT_FAN_OUT: usize = 8;
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 15 * 60;
pub const MAX_SYNC_INTERVAL_SECS: u64 = 30 * 24 * 60 * 60;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Runtime settings for the sync engine.
#[derive(Clone, PartialEq)]
pub struct SyncConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub api_base: String,
    pub query: String,
    pub page_size: u32,
    pub fan_out: usize,
    pub sync_interval: Duration,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("token_url", &self.token_url)
            .field("api_base", &self.api_base)
            .field("query", &self.query)
            .field("page_size", &self.page_size)
            .field("fan_out", &self.fan_out)
            .field("sync_interval", &self.sync_interval)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            query: DEFAULT_QUERY.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            fan_out: DEFAULT_FAN_OUT,
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup`, falling back to defaults for
    /// missing or blank values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();

        if let Some(value) = get("MAILSYNC_GMAIL_CLIENT_ID") {
            config.client_id = value;
        }
        if let Some(value) = get("MAILSYNC_GMAIL_CLIENT_SECRET") {
            config.client_secret = value;
        }
        if let Some(value) = get("MAILSYNC_GMAIL_TOKEN_URL") {
            config.token_url = value;
        }
        if let Some(value) = get("MAILSYNC_GMAIL_API_BASE") {
            config.api_base = value.trim_end_matches('/').to_string();
        }
        if let Some(value) = get("MAILSYNC_QUERY") {
            config.query = value;
        }
        if let Some(value) = get("MAILSYNC_PAGE_SIZE") {
            let parsed = value
                .parse::<u32>()
                .with_context(|| format!("invalid MAILSYNC_PAGE_SIZE: {value}"))?;
            config.page_size = clamp_page_size(parsed);
        }
        if let Some(value) = get("MAILSYNC_FAN_OUT") {
            let parsed = value
                .parse::<usize>()
                .with_context(|| format!("invalid MAILSYNC_FAN_OUT: {value}"))?;
            config.fan_out = parsed.max(1);
        }
        if let Some(value) = get("MAILSYNC_SYNC_INTERVAL_SECS") {
            let parsed = value
                .parse::<u64>()
                .with_context(|| format!("invalid MAILSYNC_SYNC_INTERVAL_SECS: {value}"))?;
            if parsed > MAX_SYNC_INTERVAL_SECS {
                bail!(
                    "MAILSYNC_SYNC_INTERVAL_SECS must be at most {MAX_SYNC_INTERVAL_SECS}, got {parsed}"
                );
            }
            config.sync_interval = Duration::from_secs(parsed);
        }
        if let Some(value) = get("MAILSYNC_REQUEST_TIMEOUT_SECS") {
            let parsed = value
                .parse::<u64>()
                .with_context(|| format!("invalid MAILSYNC_REQUEST_TIMEOUT_SECS: {value}"))?;
            config.request_timeout = Duration::from_secs(parsed.max(1));
        }

        Ok(config)
    }

    pub fn sync_interval_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.sync_interval)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_SYNC_INTERVAL_SECS as i64))
    }

    pub fn has_client_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

pub fn clamp_page_size(value: u32) -> u32 {
    value.clamp(1, MAX_PAGE_SIZE)
}
