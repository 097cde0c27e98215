//! Access-token supply for Gmail calls.
//!
//! A stored access token is reused until it is within [`REFRESH_MARGIN_SECS`]
//! of expiry. Past that point the refresh token is exchanged at the OAuth
//! token endpoint and the new token is written back through the store before
//! it is handed out.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::db::MailStore;
use crate::error::SyncError;
use crate::gmail::client::{build_http_client, redact_response_body};
use crate::gmail::TokenResponse;

pub const REFRESH_MARGIN_SECS: i64 = 5 * 60;
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Clone)]
pub struct TokenProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// True when a token expiring at `expires_at` should be refreshed at `now`.
/// A token with no known expiry always needs a refresh.
pub fn needs_refresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expires_at) => expires_at - now <= Duration::seconds(REFRESH_MARGIN_SECS),
        None => true,
    }
}

/// Expiry of a token issued at `issued_at` that lives `expires_in` seconds.
/// `None` when the lifetime is negative or not representable.
pub fn token_expiry(issued_at: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    if expires_in < 0 {
        return None;
    }
    Duration::try_seconds(expires_in).and_then(|lifetime| issued_at.checked_add_signed(lifetime))
}

impl TokenProvider {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        Ok(Self {
            client: build_http_client(config.request_timeout)?,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }

    /// Return a bearer token for `user_id` that is valid for at least the
    /// refresh margin, refreshing and persisting it when needed.
    pub async fn ensure_valid(
        &self,
        store: &dyn MailStore,
        user_id: &str,
    ) -> Result<String, SyncError> {
        let credentials = store
            .load_credentials(user_id)?
            .ok_or_else(|| SyncError::Auth(format!("unknown user '{user_id}'")))?;

        if !credentials.is_active {
            return Err(SyncError::Auth(format!("user '{user_id}' is inactive")));
        }

        let now = Utc::now();
        if let Some(access_token) = credentials
            .access_token
            .as_deref()
            .filter(|token| !token.is_empty())
        {
            if !needs_refresh(credentials.expires_at, now) {
                debug!(user_id, "reusing stored access token");
                return Ok(access_token.to_string());
            }
        }

        let refresh_token = credentials
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| SyncError::Auth("no refresh token stored".to_string()))?;

        let response = self.exchange(refresh_token).await?;
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at = token_expiry(Utc::now(), expires_in).ok_or_else(|| {
            SyncError::Auth(format!(
                "oauth token response carried an out-of-range expires_in: {expires_in}"
            ))
        })?;

        store.save_access_token(user_id, &response.access_token, expires_at)?;
        info!(user_id, expires_at = %expires_at, "refreshed gmail access token");

        Ok(response.access_token)
    }

    async fn exchange(&self, refresh_token: &str) -> Result<TokenResponse, SyncError> {
        if self.client_id.is_empty() || self.client_secret.is_empty() {
            return Err(SyncError::Auth(
                "gmail client id/secret not configured; cannot refresh token".to_string(),
            ));
        }

        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                SyncError::Auth(format!("request oauth token from {}: {e}", self.token_url))
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Auth(format!("read oauth token response: {e}")))?;
        if !status.is_success() {
            return Err(SyncError::Auth(format!(
                "oauth token refresh failed: status={} body={}",
                status,
                redact_response_body(&body)
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| SyncError::Auth(format!("decode oauth token response: {e}")))?;
        if token.access_token.is_empty() {
            return Err(SyncError::Auth(
                "oauth token response carried an empty access token".to_string(),
            ));
        }
        Ok(token)
    }
}
