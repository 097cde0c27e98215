//! Scheduling helpers for recurring sync.

use chrono::{DateTime, Duration, Utc};

use crate::db::models::SyncState;

/// Whether a user with this state should be synced at `now`.
/// Users that have never been scheduled are always due.
pub fn is_due(state: Option<&SyncState>, now: DateTime<Utc>) -> bool {
    match state.and_then(|state| state.next_sync_at) {
        Some(next_sync_at) => next_sync_at <= now,
        None => true,
    }
}

/// How long a watch loop can sleep before the earliest scheduled sync,
/// capped at `max_wait`.
pub fn wait_until_next_due<'a, I>(states: I, now: DateTime<Utc>, max_wait: Duration) -> Duration
where
    I: IntoIterator<Item = &'a SyncState>,
{
    states
        .into_iter()
        .filter_map(|state| state.next_sync_at)
        .map(|next| (next - now).max(Duration::zero()))
        .min()
        .map_or(max_wait, |wait| wait.min(max_wait))
}
