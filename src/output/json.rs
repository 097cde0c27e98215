use anyhow::Result;

use crate::db::models::{Email, SyncState, User};
use crate::output::SyncResultItem;

pub fn format_sync_results(results: &[SyncResultItem]) -> Result<String> {
    Ok(serde_json::to_string_pretty(results)?)
}

pub fn format_sync_states(states: &[SyncState]) -> Result<String> {
    Ok(serde_json::to_string_pretty(states)?)
}

pub fn format_users(users: &[User]) -> Result<String> {
    Ok(serde_json::to_string_pretty(users)?)
}

pub fn format_email_list(emails: &[Email]) -> Result<String> {
    Ok(serde_json::to_string_pretty(emails)?)
}

pub fn format_email(email: &Email) -> Result<String> {
    Ok(serde_json::to_string_pretty(email)?)
}
