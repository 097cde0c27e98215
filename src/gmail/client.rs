use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::gmail::{MailProvider, MessageList, RawMessage};

const MAX_RATE_LIMIT_RETRIES: usize = 5;
const MAX_BACKOFF_SECONDS: u64 = 32;
const REDACTED_BODY_MAX_LEN: usize = 200;

/// Gmail REST v1 client for the list and get calls.
#[derive(Debug, Clone)]
pub struct GmailClient {
    client: Client,
    api_base: String,
    max_rate_limit_retries: usize,
}

impl GmailClient {
    pub fn new(config: &SyncConfig) -> Result<Self, SyncError> {
        let client = build_http_client(config.request_timeout)?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            max_rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
        })
    }

    pub fn with_max_rate_limit_retries(mut self, retries: usize) -> Self {
        self.max_rate_limit_retries = retries;
        self
    }

    async fn fetch_with_retry(
        &self,
        token: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<String, SyncError> {
        let mut backoff_seconds = 1u64;

        for attempt in 0..=self.max_rate_limit_retries {
            let response = self
                .client
                .get(url)
                .query(query)
                .bearer_auth(token)
                .header("accept", "application/json")
                .send()
                .await
                .map_err(|e| SyncError::TransientFetch(format!("gmail request {url}: {e}")))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if attempt == self.max_rate_limit_retries {
                    let body = response.text().await.unwrap_or_default();
                    return Err(SyncError::TransientFetch(format!(
                        "gmail rate limit retries exhausted: {}",
                        redact_response_body(&body)
                    )));
                }

                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .unwrap_or(backoff_seconds);

                warn!(
                    attempt = attempt + 1,
                    retry_after_seconds, "gmail rate limited, backing off"
                );
                sleep(Duration::from_secs(retry_after_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(MAX_BACKOFF_SECONDS);
                continue;
            }

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| SyncError::TransientFetch(format!("read gmail response body: {e}")))?;

            if status == StatusCode::UNAUTHORIZED {
                return Err(SyncError::Auth(format!(
                    "gmail rejected access token: status={} body={}",
                    status,
                    redact_response_body(&body)
                )));
            }
            if !status.is_success() {
                return Err(SyncError::TransientFetch(format!(
                    "gmail request failed: status={} body={}",
                    status,
                    redact_response_body(&body)
                )));
            }

            return Ok(body);
        }

        Err(SyncError::TransientFetch(
            "gmail request failed without response".to_string(),
        ))
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list_page(
        &self,
        access_token: &str,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessageList, SyncError> {
        let url = format!("{}/users/me/messages", self.api_base);
        let mut params = vec![("maxResults", page_size.to_string()), ("q", query.to_string())];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_string()));
        }

        let body = self.fetch_with_retry(access_token, &url, &params).await?;
        let list: MessageList = decode(&body, "gmail message list")?;
        debug!(
            count = list.messages.len(),
            has_next = list.next_page_token.is_some(),
            "listed gmail page"
        );
        Ok(list)
    }

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<RawMessage, SyncError> {
        let url = format!("{}/users/me/messages/{message_id}", self.api_base);
        let params = [("format", "full".to_string())];
        let body = self.fetch_with_retry(access_token, &url, &params).await?;
        decode(&body, "gmail message")
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, SyncError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .build()
        .map_err(|e| SyncError::TransientFetch(format!("build http client: {e}")))
}

fn decode<T: DeserializeOwned>(body: &str, what: &str) -> Result<T, SyncError> {
    serde_json::from_str(body).map_err(|e| SyncError::Parse(format!("decode {what}: {e}")))
}

pub(crate) fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        return trimmed.to_string();
    }

    let mut end = REDACTED_BODY_MAX_LEN;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…[truncated {} bytes]", &trimmed[..end], trimmed.len())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{redact_response_body, GmailClient};
    use crate::config::SyncConfig;
    use crate::error::SyncError;
    use crate::gmail::MailProvider;

    fn client_for(server: &MockServer) -> GmailClient {
        let config = SyncConfig {
            api_base: format!("{}/gmail/v1", server.uri()),
            request_timeout: Duration::from_secs(5),
            ..SyncConfig::default()
        };
        GmailClient::new(&config).expect("client")
    }

    #[tokio::test]
    async fn list_page_sends_query_and_page_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("maxResults", "500"))
            .and(query_param("q", "in:inbox"))
            .and(query_param("pageToken", "p2"))
            .and(header("authorization", "Bearer ya29.token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "m3", "threadId": "t3" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let list = client_for(&server)
            .list_page("ya29.token", "in:inbox", 500, Some("p2"))
            .await
            .expect("list page");
        assert_eq!(list.messages.len(), 1);
        assert!(list.next_page_token.is_none());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .list_page("expired", "in:inbox", 10, None)
            .await
            .expect_err("401 must fail");
        assert!(matches!(error, SyncError::Auth(_)));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn server_error_maps_to_transient_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .get_message("token", "m1")
            .await
            .expect_err("503 must fail");
        assert!(matches!(error, SyncError::TransientFetch(_)));
    }

    #[tokio::test]
    async fn undecodable_body_maps_to_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&server)
            .await;

        let error = client_for(&server)
            .get_message("token", "m1")
            .await
            .expect_err("garbage must fail");
        assert!(matches!(error, SyncError::Parse(_)));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "m1",
                "threadId": "t1",
                "payload": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let message = client_for(&server)
            .get_message("token", "m1")
            .await
            .expect("retried fetch");
        assert_eq!(message.id, "m1");
    }

    #[tokio::test]
    async fn rate_limit_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages/m1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .expect(3)
            .mount(&server)
            .await;

        let error = client_for(&server)
            .with_max_rate_limit_retries(2)
            .get_message("token", "m1")
            .await
            .expect_err("exhausted");
        assert!(matches!(error, SyncError::TransientFetch(_)));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(500);
        let redacted = redact_response_body(&body);
        assert!(redacted.contains("[truncated 500 bytes]"));
        assert!(redacted.len() < body.len());
    }
}
