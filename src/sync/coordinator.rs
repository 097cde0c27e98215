use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::db::models::CycleSuccess;
use crate::db::MailStore;
use crate::error::SyncError;
use crate::gmail::{parser, MailProvider, TokenProvider, GMAIL_PROVIDER};
use crate::sync::fetcher::{FetchFailure, PageFetcher};

/// Where a cycle was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    TokenCheck,
    Fetching,
    Storing,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::TokenCheck => "token check",
            Self::Fetching => "fetching",
            Self::Storing => "storing",
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed cycle. Its display form is what gets recorded as `last_error`.
#[derive(Debug, Error)]
#[error("{phase}: {source}")]
pub struct CycleError {
    pub user_id: String,
    pub phase: SyncPhase,
    #[source]
    pub source: SyncError,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub user_id: String,
    pub provider: String,
    pub run_id: Uuid,
    pub pages: usize,
    pub listed: usize,
    pub skipped_existing: usize,
    pub fetched: usize,
    pub stored: usize,
    pub failures: Vec<FetchFailure>,
    pub total_synced: i64,
    pub next_sync_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
}

/// Drives sync cycles: token check, page walk, parse, store, bookkeeping.
pub struct SyncCoordinator {
    store: Arc<dyn MailStore>,
    tokens: TokenProvider,
    fetcher: PageFetcher,
    interval: chrono::Duration,
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<dyn MailStore>,
        provider: Arc<dyn MailProvider>,
        tokens: TokenProvider,
        config: &SyncConfig,
    ) -> Self {
        Self {
            fetcher: PageFetcher::new(provider, store.clone(), config),
            store,
            tokens,
            interval: config.sync_interval_chrono(),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        let mut gates = self
            .gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        gates
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Run one full cycle for `user_id`.
    ///
    /// Concurrent calls for the same user are serialized. On failure the
    /// error is recorded in sync state before it is returned.
    pub async fn run_cycle(&self, user_id: &str) -> Result<CycleReport, CycleError> {
        let gate = self.gate(user_id);
        let result = {
            let _guard = gate.lock().await;
            let run_id = Uuid::new_v4();
            let span = info_span!("sync_cycle", user_id, run_id = %run_id);
            self.run_cycle_inner(user_id, run_id).instrument(span).await
        };
        self.release_gate(user_id, gate);
        result
    }

    fn release_gate(&self, user_id: &str, gate: Arc<AsyncMutex<()>>) {
        let mut gates = self
            .gates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this caller still hold it: nobody is waiting.
        if Arc::strong_count(&gate) == 2 {
            gates.remove(user_id);
        }
    }

    async fn run_cycle_inner(
        &self,
        user_id: &str,
        run_id: Uuid,
    ) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let mut phase = SyncPhase::Idle;

        match self.execute(user_id, run_id, started, &mut phase).await {
            Ok(report) => {
                info!(
                    stored = report.stored,
                    skipped_existing = report.skipped_existing,
                    failures = report.failures.len(),
                    elapsed_ms = report.elapsed_ms,
                    "sync cycle succeeded"
                );
                Ok(report)
            }
            Err(source) => {
                let error = CycleError {
                    user_id: user_id.to_string(),
                    phase,
                    source,
                };
                let message = error.to_string();
                warn!(phase = %phase, error = %message, "sync cycle failed");
                if let Err(record_error) =
                    self.store.record_error(user_id, GMAIL_PROVIDER, &message)
                {
                    warn!(error = %record_error, "failed to record sync failure");
                }
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        user_id: &str,
        run_id: Uuid,
        started: Instant,
        phase: &mut SyncPhase,
    ) -> Result<CycleReport, SyncError> {
        *phase = SyncPhase::Idle;
        let mut state = self.store.load_state(user_id, GMAIL_PROVIDER)?;

        *phase = SyncPhase::TokenCheck;
        let access_token = self.tokens.ensure_valid(self.store.as_ref(), user_id).await?;

        *phase = SyncPhase::Fetching;
        let outcome = self
            .fetcher
            .fetch_new(user_id, &access_token, state.cursor.as_deref())
            .await?;

        *phase = SyncPhase::Storing;
        let now = Utc::now();
        let emails: Vec<_> = outcome
            .messages
            .iter()
            .map(|message| parser::parse(user_id, message, now))
            .collect();
        let success = CycleSuccess {
            skipped: outcome.failures.len(),
            cursor: outcome.cursor.clone(),
            at: now,
            interval: self.interval,
        };
        let stored = self.store.commit_cycle(&mut state, &emails, &success)?;

        Ok(CycleReport {
            user_id: user_id.to_string(),
            provider: GMAIL_PROVIDER.to_string(),
            run_id,
            pages: outcome.pages,
            listed: outcome.listed,
            skipped_existing: outcome.skipped_existing,
            fetched: outcome.messages.len(),
            stored,
            failures: outcome.failures,
            total_synced: state.total_synced,
            next_sync_at: state.next_sync_at,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Run cycles for several users, at most `concurrency` at a time.
    /// One user's failure does not stop the others.
    pub async fn sync_users(
        &self,
        user_ids: &[String],
        concurrency: usize,
    ) -> Vec<(String, Result<CycleReport, CycleError>)> {
        stream::iter(user_ids)
            .map(|user_id| async move { (user_id.clone(), self.run_cycle(user_id).await) })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}
