use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub mod auth;
pub mod client;
pub mod parser;

pub use auth::TokenProvider;
pub use client::GmailClient;

pub const GMAIL_PROVIDER: &str = "gmail";

// Wire types for the Gmail REST v1 responses the engine reads. Fields the
// engine never looks at are left out and ignored by serde.

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageList {
    #[serde(default)]
    pub messages: Vec<MessageRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_size_estimate: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// A message as returned by `messages.get?format=full`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub payload: MessagePart,
    /// Milliseconds since the epoch, as a decimal string.
    #[serde(default)]
    pub internal_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: Option<PartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// The two remote calls a sync cycle needs from a mail provider.
#[async_trait]
pub trait MailProvider: Send + Sync {
    async fn list_page(
        &self,
        access_token: &str,
        query: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<MessageList, SyncError>;

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<RawMessage, SyncError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{MessageList, RawMessage, TokenResponse};

    #[test]
    fn message_list_tolerates_missing_fields() {
        let empty: MessageList =
            serde_json::from_value(json!({ "resultSizeEstimate": 0 })).expect("decode");
        assert!(empty.messages.is_empty());
        assert!(empty.next_page_token.is_none());

        let page: MessageList = serde_json::from_value(json!({
            "messages": [{ "id": "m1", "threadId": "t1" }],
            "nextPageToken": "p2"
        }))
        .expect("decode");
        assert_eq!(page.messages[0].thread_id.as_deref(), Some("t1"));
        assert_eq!(page.next_page_token.as_deref(), Some("p2"));
    }

    #[test]
    fn raw_message_decodes_nested_parts() {
        let message: RawMessage = serde_json::from_value(json!({
            "id": "m1",
            "threadId": "t1",
            "labelIds": ["INBOX"],
            "internalDate": "1735732800000",
            "payload": {
                "mimeType": "multipart/alternative",
                "headers": [{ "name": "Subject", "value": "Hi" }],
                "parts": [
                    { "mimeType": "text/plain", "body": { "size": 2, "data": "SGk" } }
                ]
            }
        }))
        .expect("decode");

        assert_eq!(message.payload.parts.len(), 1);
        assert_eq!(message.payload.headers[0].value, "Hi");
        assert!(message.snippet.is_empty());
    }

    #[test]
    fn token_response_expiry_is_optional() {
        let token: TokenResponse =
            serde_json::from_value(json!({ "access_token": "ya29.x" })).expect("decode");
        assert!(token.expires_in.is_none());
    }
}
