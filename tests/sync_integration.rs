use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mailsync::config::SyncConfig;
use mailsync::db::models::{Credentials, User};
use mailsync::db::{Database, EmailListFilters, MailStore};
use mailsync::error::SyncError;
use mailsync::gmail::{parser, GmailClient, RawMessage, TokenProvider};
use mailsync::sync::{SyncCoordinator, SyncPhase};

const USER: &str = "owner@example.com";

fn temp_db_path() -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("mailsync-integration-{}.db", Uuid::new_v4()));
    path
}

struct Harness {
    server: MockServer,
    db: Arc<Database>,
    coordinator: SyncCoordinator,
    path: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn harness(
    access_token: Option<&str>,
    refresh_token: Option<&str>,
    expires_in: Duration,
) -> Harness {
    let server = MockServer::start().await;
    let path = temp_db_path();
    let db = Arc::new(Database::open_with_cipher(&path, None).expect("open db"));

    let expires_at = Utc::now() + expires_in;
    db.upsert_user(
        &User {
            user_id: USER.to_string(),
            email_address: USER.to_string(),
            display_name: Some("Owner".to_string()),
            is_active: true,
            token_expires_at: Some(expires_at),
            created_at: Utc::now(),
        },
        &Credentials {
            user_id: USER.to_string(),
            access_token: access_token.map(str::to_string),
            refresh_token: refresh_token.map(str::to_string),
            expires_at: Some(expires_at),
            is_active: true,
        },
    )
    .expect("seed user");

    let config = SyncConfig {
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        token_url: format!("{}/token", server.uri()),
        api_base: format!("{}/gmail/v1", server.uri()),
        fan_out: 4,
        request_timeout: StdDuration::from_secs(5),
        ..SyncConfig::default()
    };
    let client = GmailClient::new(&config).expect("gmail client");
    let tokens = TokenProvider::new(&config).expect("token provider");
    let coordinator = SyncCoordinator::new(db.clone(), Arc::new(client), tokens, &config);

    Harness {
        server,
        db,
        coordinator,
        path,
    }
}

async fn healthy_harness() -> Harness {
    harness(Some("ya29.current"), Some("1//refresh"), Duration::hours(1)).await
}

fn message_json(id: &str, subject: &str, labels: &[&str]) -> Value {
    json!({
        "id": id,
        "threadId": format!("thread-{id}"),
        "labelIds": labels,
        "snippet": format!("snippet for {id}"),
        "internalDate": "1735732800000",
        "payload": {
            "mimeType": "multipart/alternative",
            "headers": [
                { "name": "Subject", "value": subject },
                { "name": "From", "value": "Sender <sender@example.com>" },
                { "name": "To", "value": USER },
                { "name": "Date", "value": "Wed, 01 Jan 2025 12:00:00 +0000" }
            ],
            "parts": [
                {
                    "mimeType": "text/plain",
                    "body": { "data": URL_SAFE_NO_PAD.encode(format!("plain body {id}")) }
                },
                {
                    "mimeType": "text/html",
                    "body": { "data": URL_SAFE_NO_PAD.encode(format!("<p>html body {id}</p>")) }
                }
            ]
        }
    })
}

fn page_json(ids: &[&str], next: Option<&str>) -> Value {
    let messages: Vec<Value> = ids
        .iter()
        .map(|id| json!({ "id": id, "threadId": format!("thread-{id}") }))
        .collect();
    match next {
        Some(token) => json!({ "messages": messages, "nextPageToken": token }),
        None => json!({ "messages": messages }),
    }
}

async fn mount_two_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&["m3"], None)))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(query_param("q", "in:inbox"))
        .and(query_param("maxResults", "500"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(page_json(&["m1", "m2"], Some("page-2"))),
        )
        .mount(server)
        .await;
}

async fn mount_message(server: &MockServer, id: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/gmail/v1/users/me/messages/{id}")))
        .and(query_param("format", "full"))
        .respond_with(ResponseTemplate::new(200).set_body_json(message_json(
            id,
            &format!("Subject {id}"),
            &["INBOX", "UNREAD"],
        )))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn two_page_mailbox_is_fully_synced() {
    let h = healthy_harness().await;
    mount_two_pages(&h.server).await;
    for id in ["m1", "m2", "m3"] {
        mount_message(&h.server, id, 1).await;
    }

    let report = h.coordinator.run_cycle(USER).await.expect("cycle");
    assert_eq!(report.pages, 2);
    assert_eq!(report.listed, 3);
    assert_eq!(report.fetched, 3);
    assert_eq!(report.stored, 3);
    assert!(report.failures.is_empty());

    let state = h.db.load_state(USER, "gmail").expect("state");
    assert_eq!(state.total_synced, 3);
    assert_eq!(state.last_batch_count, 3);
    assert_eq!(state.error_count, 0);
    assert!(state.cursor.is_none());
    assert!(state.last_sync_at.is_some());

    let email = h.db.get_email(USER, "m2").expect("get").expect("stored");
    assert_eq!(email.subject, "Subject m2");
    assert_eq!(email.body_text, "plain body m2");
    assert_eq!(email.body_html, "<p>html body m2</p>");
    assert_eq!(email.thread_id.as_deref(), Some("thread-m2"));
    assert!(!email.is_read);

    // Every list call happens before the first body fetch.
    let requests = h.server.received_requests().await.expect("recording on");
    let is_list = |r: &wiremock::Request| r.url.path() == "/gmail/v1/users/me/messages";
    let last_list = requests.iter().rposition(is_list).expect("list calls");
    let first_get = requests.iter().position(|r| !is_list(r)).expect("get calls");
    assert!(last_list < first_get);
}

#[tokio::test]
async fn second_run_stores_nothing_new() {
    let h = healthy_harness().await;
    mount_two_pages(&h.server).await;
    for id in ["m1", "m2", "m3"] {
        mount_message(&h.server, id, 1).await;
    }

    h.coordinator.run_cycle(USER).await.expect("first cycle");
    let second = h.coordinator.run_cycle(USER).await.expect("second cycle");

    assert_eq!(second.stored, 0);
    assert_eq!(second.fetched, 0);
    assert_eq!(second.skipped_existing, 3);

    let state = h.db.load_state(USER, "gmail").expect("state");
    assert_eq!(state.total_synced, 3);
    assert_eq!(state.last_batch_count, 0);
    assert_eq!(h.db.count_emails(USER).expect("count"), 3);
}

#[tokio::test]
async fn already_stored_ids_are_not_fetched() {
    let h = healthy_harness().await;
    mount_two_pages(&h.server).await;
    mount_message(&h.server, "m1", 1).await;
    mount_message(&h.server, "m2", 0).await;
    mount_message(&h.server, "m3", 1).await;

    let existing: RawMessage =
        serde_json::from_value(message_json("m2", "Stored earlier", &["INBOX"])).expect("raw");
    h.db.upsert_batch(USER, &[parser::parse(USER, &existing, Utc::now())])
        .expect("pre-store m2");

    let report = h.coordinator.run_cycle(USER).await.expect("cycle");
    assert_eq!(report.stored, 2);
    assert_eq!(report.skipped_existing, 1);

    let kept = h.db.get_email(USER, "m2").expect("get").expect("stored");
    assert_eq!(kept.subject, "Stored earlier");
}

#[tokio::test]
async fn failed_message_is_skipped_then_picked_up_next_cycle() {
    let h = healthy_harness().await;
    mount_two_pages(&h.server).await;
    mount_message(&h.server, "m1", 1).await;
    mount_message(&h.server, "m3", 1).await;

    let broken = Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m2"))
        .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
        .mount_as_scoped(&h.server)
        .await;

    let first = h.coordinator.run_cycle(USER).await.expect("first cycle");
    assert_eq!(first.stored, 2);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].message_id, "m2");

    let state = h.db.load_state(USER, "gmail").expect("state");
    assert_eq!(state.last_skipped_count, 1);
    assert_eq!(state.error_count, 0);
    assert!(h.db.get_email(USER, "m2").expect("get").is_none());

    drop(broken);
    mount_message(&h.server, "m2", 1).await;

    let second = h.coordinator.run_cycle(USER).await.expect("second cycle");
    assert_eq!(second.stored, 1);
    assert!(second.failures.is_empty());

    let state = h.db.load_state(USER, "gmail").expect("state");
    assert_eq!(state.total_synced, 3);
    assert_eq!(state.last_skipped_count, 0);
}

#[tokio::test]
async fn expired_token_is_refreshed_before_listing() {
    let h = harness(Some("ya29.stale"), Some("1//refresh"), Duration::minutes(-10)).await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.fresh",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .and(header("authorization", "Bearer ya29.fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&["m1"], None)))
        .expect(1)
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m1"))
        .and(header("authorization", "Bearer ya29.fresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(message_json("m1", "Fresh", &["INBOX"])),
        )
        .expect(1)
        .mount(&h.server)
        .await;

    let report = h.coordinator.run_cycle(USER).await.expect("cycle");
    assert_eq!(report.stored, 1);

    let credentials = h
        .db
        .load_credentials(USER)
        .expect("load")
        .expect("credentials");
    assert_eq!(credentials.access_token.as_deref(), Some("ya29.fresh"));
    assert!(credentials.expires_at.expect("expiry") > Utc::now() + Duration::minutes(55));
}

#[tokio::test]
async fn missing_refresh_token_records_failed_state() {
    let h = harness(Some("ya29.stale"), None, Duration::minutes(-10)).await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&[], None)))
        .expect(0)
        .mount(&h.server)
        .await;

    let error = h.coordinator.run_cycle(USER).await.expect_err("must fail");
    assert_eq!(error.phase, SyncPhase::TokenCheck);
    assert!(matches!(error.source, SyncError::Auth(_)));
    assert!(!error.source.is_retryable());

    let state = h.db.load_state(USER, "gmail").expect("state");
    assert_eq!(state.error_count, 1);
    assert!(state.last_error_at.is_some());
    assert!(state
        .last_error
        .as_deref()
        .expect("diagnostic")
        .starts_with("token check: auth:"));
}

#[tokio::test]
async fn list_failure_records_failed_state_and_stores_nothing() {
    let h = healthy_harness().await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&h.server)
        .await;

    let error = h.coordinator.run_cycle(USER).await.expect_err("must fail");
    assert_eq!(error.phase, SyncPhase::Fetching);
    assert!(matches!(error.source, SyncError::TransientFetch(_)));
    assert!(error.source.is_retryable());

    assert_eq!(h.db.count_emails(USER).expect("count"), 0);
    let state = h.db.load_state(USER, "gmail").expect("state");
    assert_eq!(state.error_count, 1);
    assert_eq!(state.total_synced, 0);
    assert!(state.last_sync_at.is_none());
    assert!(state
        .last_error
        .as_deref()
        .expect("diagnostic")
        .starts_with("fetching: fetch:"));
}

#[tokio::test]
async fn unauthorized_listing_is_an_auth_failure() {
    let h = healthy_harness().await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid credentials"))
        .mount(&h.server)
        .await;

    let error = h.coordinator.run_cycle(USER).await.expect_err("must fail");
    assert_eq!(error.phase, SyncPhase::Fetching);
    assert!(matches!(error.source, SyncError::Auth(_)));
}

#[tokio::test]
async fn stored_mail_is_listed_without_trash_by_default() {
    let h = healthy_harness().await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page_json(&["m1", "m2"], None)))
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(message_json("m1", "Keep", &["INBOX"])),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gmail/v1/users/me/messages/m2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(message_json("m2", "Binned", &["TRASH"])),
        )
        .mount(&h.server)
        .await;

    h.coordinator.run_cycle(USER).await.expect("cycle");

    let visible = h
        .db
        .list_emails(EmailListFilters {
            user_id: Some(USER.to_string()),
            ..EmailListFilters::default()
        })
        .expect("list");
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].subject, "Keep");

    let everything = h
        .db
        .list_emails(EmailListFilters {
            user_id: Some(USER.to_string()),
            include_trash: true,
            ..EmailListFilters::default()
        })
        .expect("list");
    assert_eq!(everything.len(), 2);
}
