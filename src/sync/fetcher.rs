use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{clamp_page_size, SyncConfig};
use crate::db::MailStore;
use crate::error::SyncError;
use crate::gmail::{MailProvider, RawMessage};

/// One message that could not be fetched and was left for a later cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub message_id: String,
    pub kind: &'static str,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Fetched messages, in listing order.
    pub messages: Vec<RawMessage>,
    pub cursor: Option<String>,
    pub failures: Vec<FetchFailure>,
    pub pages: usize,
    /// Distinct ids seen across all pages.
    pub listed: usize,
    pub skipped_existing: usize,
}

pub struct PageFetcher {
    provider: Arc<dyn MailProvider>,
    store: Arc<dyn MailStore>,
    query: String,
    page_size: u32,
    fan_out: usize,
}

impl PageFetcher {
    pub fn new(
        provider: Arc<dyn MailProvider>,
        store: Arc<dyn MailStore>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            provider,
            store,
            query: config.query.clone(),
            page_size: clamp_page_size(config.page_size),
            fan_out: config.fan_out.max(1),
        }
    }

    /// List every page, then fetch the bodies of ids the store has not seen.
    ///
    /// A failed list call aborts with its error. A failed message fetch is
    /// recorded in [`FetchOutcome::failures`] and skipped. The returned cursor
    /// is always `None` once the walk completes, so the next cycle starts
    /// from the first page again.
    pub async fn fetch_new(
        &self,
        user_id: &str,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<FetchOutcome, SyncError> {
        let mut outcome = FetchOutcome::default();
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut page_token = cursor.filter(|token| !token.is_empty()).map(str::to_string);

        loop {
            let page = self
                .provider
                .list_page(access_token, &self.query, self.page_size, page_token.as_deref())
                .await?;
            outcome.pages += 1;
            debug!(
                user_id,
                page = outcome.pages,
                count = page.messages.len(),
                "listed message page"
            );

            if page.messages.is_empty() {
                break;
            }
            for message in page.messages {
                if seen.insert(message.id.clone()) {
                    ids.push(message.id);
                }
            }

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }
        outcome.listed = ids.len();

        let mut fresh = Vec::with_capacity(ids.len());
        for id in ids {
            if self.store.exists(user_id, &id)? {
                outcome.skipped_existing += 1;
            } else {
                fresh.push(id);
            }
        }

        let provider = &self.provider;
        let results: Vec<(String, Result<RawMessage, SyncError>)> = stream::iter(fresh)
            .map(|id| async move {
                let result = provider.get_message(access_token, &id).await;
                (id, result)
            })
            .buffered(self.fan_out)
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(message) => outcome.messages.push(message),
                Err(error) => {
                    warn!(user_id, message_id = %id, error = %error, "skipping message");
                    outcome.failures.push(FetchFailure {
                        message_id: id,
                        kind: error.kind(),
                        error: error.to_string(),
                    });
                }
            }
        }

        outcome.cursor = None;
        Ok(outcome)
    }
}
