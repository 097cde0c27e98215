pub mod json;
pub mod table;

use anyhow::Result;
use serde::Serialize;

use crate::db::models::{Email, SyncState, User};
use crate::sync::{CycleError, CycleReport, SyncPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

/// Outcome of one user's cycle, flattened for display.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResultItem {
    pub user_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<CycleReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<SyncPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncResultItem {
    pub fn from_result(user_id: &str, result: &Result<CycleReport, CycleError>) -> Self {
        match result {
            Ok(report) => Self {
                user_id: user_id.to_string(),
                ok: true,
                report: Some(report.clone()),
                phase: None,
                error: None,
            },
            Err(error) => Self {
                user_id: user_id.to_string(),
                ok: false,
                report: None,
                phase: Some(error.phase),
                error: Some(error.source.to_string()),
            },
        }
    }
}

pub fn format_sync_results(format: OutputFormat, results: &[SyncResultItem]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_sync_results(results)),
        OutputFormat::Json => json::format_sync_results(results),
    }
}

pub fn format_sync_states(format: OutputFormat, states: &[SyncState]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_sync_states(states)),
        OutputFormat::Json => json::format_sync_states(states),
    }
}

pub fn format_users(format: OutputFormat, users: &[User]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_users(users)),
        OutputFormat::Json => json::format_users(users),
    }
}

pub fn format_email_list(format: OutputFormat, emails: &[Email]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_email_list(emails)),
        OutputFormat::Json => json::format_email_list(emails),
    }
}

pub fn format_email(format: OutputFormat, email: &Email) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_email(email)),
        OutputFormat::Json => json::format_email(email),
    }
}
