use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::db::models::{Email, SyncState, User};
use crate::output::SyncResultItem;

const USER_WIDTH: usize = 20;
const FROM_WIDTH: usize = 24;
const SUBJECT_WIDTH: usize = 48;
const DATE_WIDTH: usize = 12;
const ERROR_WIDTH: usize = 48;

pub fn format_sync_results(results: &[SyncResultItem]) -> String {
    if results.is_empty() {
        return "No users to sync.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<user$}  {:<6}  {:>6}  {:>6}  {:>7}  {:>6}  {:>8}\n",
        "User",
        "Status",
        "Listed",
        "Stored",
        "Existed",
        "Failed",
        "Total",
        user = USER_WIDTH
    ));
    out.push_str(&format!(
        "{}  ------  ------  ------  -------  ------  --------\n",
        "-".repeat(USER_WIDTH)
    ));

    for item in results {
        let user = truncate_for_width(&item.user_id, USER_WIDTH);
        match &item.report {
            Some(report) => out.push_str(&format!(
                "{:<user$}  {:<6}  {:>6}  {:>6}  {:>7}  {:>6}  {:>8}\n",
                user,
                "ok",
                report.listed,
                report.stored,
                report.skipped_existing,
                report.failures.len(),
                report.total_synced,
                user = USER_WIDTH
            )),
            None => {
                let phase = item.phase.map(|p| p.as_str()).unwrap_or("unknown");
                let error = item.error.as_deref().unwrap_or("(no detail)");
                out.push_str(&format!(
                    "{:<user$}  {:<6}  {}\n",
                    user,
                    "failed",
                    truncate_for_width(&format!("{phase}: {error}"), ERROR_WIDTH * 2),
                    user = USER_WIDTH
                ));
            }
        }
    }

    let skipped: Vec<_> = results
        .iter()
        .filter_map(|item| item.report.as_ref())
        .flat_map(|report| report.failures.iter().map(move |f| (&report.user_id, f)))
        .collect();
    if !skipped.is_empty() {
        out.push('\n');
        out.push_str("Skipped messages\n");
        out.push_str("----------------\n");
        for (user_id, failure) in skipped {
            out.push_str(&format!(
                "{user_id} {} {}\n",
                failure.message_id,
                truncate_for_width(&failure.error, ERROR_WIDTH)
            ));
        }
    }

    out
}

pub fn format_sync_states(states: &[SyncState]) -> String {
    if states.is_empty() {
        return "No sync state recorded yet.".to_string();
    }

    let now = Utc::now();
    let mut out = String::new();
    out.push_str(&format!(
        "{:<user$}  {:>8}  {:>5}  {:<date$}  {:<date$}  {:>6}  {}\n",
        "User",
        "Total",
        "Last",
        "Last Sync",
        "Next Sync",
        "Errors",
        "Last Error",
        user = USER_WIDTH,
        date = DATE_WIDTH
    ));
    out.push_str(&format!(
        "{}  --------  -----  {}  {}  ------  ----------\n",
        "-".repeat(USER_WIDTH),
        "-".repeat(DATE_WIDTH),
        "-".repeat(DATE_WIDTH)
    ));

    for state in states {
        let last_sync = state
            .last_sync_at
            .map(|at| relative_date(at, now))
            .unwrap_or_else(|| "never".to_string());
        let next_sync = state
            .next_sync_at
            .map(|at| relative_date(at, now))
            .unwrap_or_else(|| "due".to_string());

        out.push_str(&format!(
            "{:<user$}  {:>8}  {:>5}  {:<date$}  {:<date$}  {:>6}  {}\n",
            truncate_for_width(&state.user_id, USER_WIDTH),
            state.total_synced,
            state.last_batch_count,
            truncate_for_width(&last_sync, DATE_WIDTH),
            truncate_for_width(&next_sync, DATE_WIDTH),
            state.error_count,
            truncate_for_width(state.last_error.as_deref().unwrap_or("-"), ERROR_WIDTH),
            user = USER_WIDTH,
            date = DATE_WIDTH
        ));
    }

    out
}

pub fn format_users(users: &[User]) -> String {
    if users.is_empty() {
        return "No users registered.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<user$}  {:<32}  {:<6}  {}\n",
        "User",
        "Email",
        "Active",
        "Token Expires",
        user = USER_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  ------  -------------\n",
        "-".repeat(USER_WIDTH),
        "-".repeat(32)
    ));
    for user in users {
        let expires = user
            .token_expires_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<user$}  {:<32}  {:<6}  {}\n",
            truncate_for_width(&user.user_id, USER_WIDTH),
            truncate_for_width(&user.email_address, 32),
            if user.is_active { "yes" } else { "no" },
            expires,
            user = USER_WIDTH
        ));
    }
    out
}

pub fn format_email_list(emails: &[Email]) -> String {
    if emails.is_empty() {
        return "No emails found.".to_string();
    }

    let now = Utc::now();
    let mut out = String::new();
    out.push_str(&format!(
        "  {:<from$}  {:<subject$}  {:<date$}  {}\n",
        "From",
        "Subject",
        "Date",
        "ID",
        from = FROM_WIDTH,
        subject = SUBJECT_WIDTH,
        date = DATE_WIDTH
    ));
    out.push_str(&format!(
        "  {}  {}  {}  --\n",
        "-".repeat(FROM_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(DATE_WIDTH)
    ));

    for email in emails {
        let marker = if email.is_read { ' ' } else { '*' };
        let from = if email.from_address.is_empty() {
            "(unknown)"
        } else {
            email.from_address.as_str()
        };
        let subject = if email.subject.is_empty() {
            "(no subject)"
        } else {
            email.subject.as_str()
        };
        out.push_str(&format!(
            "{marker} {:<from$}  {:<subject$}  {:<date$}  {}\n",
            truncate_for_width(from, FROM_WIDTH),
            truncate_for_width(subject, SUBJECT_WIDTH),
            truncate_for_width(&relative_date(email.received_at, now), DATE_WIDTH),
            email.provider_message_id,
            from = FROM_WIDTH,
            subject = SUBJECT_WIDTH,
            date = DATE_WIDTH
        ));
    }

    out
}

pub fn format_email(email: &Email) -> String {
    let mut out = String::new();
    out.push_str(&format!("ID: {}\n", email.provider_message_id));
    if let Some(thread_id) = &email.thread_id {
        out.push_str(&format!("Thread: {thread_id}\n"));
    }
    out.push_str(&format!(
        "Subject: {}\n",
        if email.subject.is_empty() {
            "(no subject)"
        } else {
            email.subject.as_str()
        }
    ));
    out.push_str(&format!("From: {}\n", email.from_address));
    if !email.to_addresses.is_empty() {
        out.push_str(&format!("To: {}\n", email.to_addresses.join(", ")));
    }
    if !email.cc_addresses.is_empty() {
        out.push_str(&format!("CC: {}\n", email.cc_addresses.join(", ")));
    }
    if !email.bcc_addresses.is_empty() {
        out.push_str(&format!("BCC: {}\n", email.bcc_addresses.join(", ")));
    }
    if let Some(sent_at) = email.sent_at {
        out.push_str(&format!("Sent: {}\n", sent_at.to_rfc3339()));
    }
    out.push_str(&format!(
        "Received: {} ({})\n",
        email.received_at.to_rfc3339(),
        relative_date(email.received_at, Utc::now())
    ));
    if !email.labels.is_empty() {
        out.push_str(&format!("Labels: {}\n", email.labels.join(", ")));
    }
    out.push_str(&format!("Flags: {}\n", flag_summary(email)));

    out.push('\n');
    out.push_str("Body\n");
    out.push_str("----\n");
    let body = if !email.body_text.is_empty() {
        email.body_text.as_str()
    } else if !email.snippet.is_empty() {
        email.snippet.as_str()
    } else if !email.body_html.is_empty() {
        "(html only)"
    } else {
        "(empty)"
    };
    out.push_str(body);
    out.push('\n');
    out
}

fn flag_summary(email: &Email) -> String {
    let flags: Vec<&str> = [
        (!email.is_read, "unread"),
        (email.is_important, "important"),
        (email.is_starred, "starred"),
        (email.is_draft, "draft"),
        (email.is_sent, "sent"),
        (email.is_trash, "trash"),
    ]
    .into_iter()
    .filter_map(|(set, name)| set.then_some(name))
    .collect();

    if flags.is_empty() {
        "-".to_string()
    } else {
        flags.join(", ")
    }
}

fn relative_date(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(at);
    if delta.num_seconds() < 0 {
        let ahead = at.signed_duration_since(now);
        if ahead.num_hours() < 1 {
            return format!("in {}m", ahead.num_minutes().max(1));
        }
        if ahead.num_hours() < 24 {
            return format!("in {}h", ahead.num_hours());
        }
        return at.format("%Y-%m-%d").to_string();
    }
    if delta.num_minutes() < 1 {
        return "just now".to_string();
    }
    if delta.num_hours() < 1 {
        return format!("{}m ago", delta.num_minutes());
    }
    if delta.num_hours() < 24 {
        return format!("{}h ago", delta.num_hours());
    }
    if delta.num_days() == 1 {
        return "yesterday".to_string();
    }
    if delta.num_days() < 7 {
        return format!("{}d ago", delta.num_days());
    }
    at.format("%Y-%m-%d").to_string()
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}
