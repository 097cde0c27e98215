use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};

use crate::db::models::Email;
use crate::gmail::{MessagePart, RawMessage};

/// Build an [`Email`] from a full Gmail message.
///
/// Missing headers, bodies or dates never fail the parse; they produce empty
/// or absent fields. `now` stands in for `received_at` when the message has
/// no usable `internalDate`.
pub fn parse(user_id: &str, message: &RawMessage, now: DateTime<Utc>) -> Email {
    let payload = &message.payload;
    let labels = message.label_ids.clone();
    let has_label = |name: &str| labels.iter().any(|label| label == name);
    let (body_text, body_html) = extract_bodies(payload);

    Email {
        user_id: user_id.to_string(),
        provider_message_id: message.id.clone(),
        thread_id: message.thread_id.clone(),
        subject: header(payload, "Subject").unwrap_or_default().to_string(),
        from_address: header(payload, "From").unwrap_or_default().to_string(),
        to_addresses: split_addresses(header(payload, "To")),
        cc_addresses: split_addresses(header(payload, "Cc")),
        bcc_addresses: split_addresses(header(payload, "Bcc")),
        snippet: message.snippet.clone(),
        body_text: body_text.unwrap_or_default(),
        body_html: body_html.unwrap_or_default(),
        is_read: !has_label("UNREAD"),
        is_important: has_label("IMPORTANT"),
        is_starred: has_label("STARRED"),
        is_draft: has_label("DRAFT"),
        is_sent: has_label("SENT"),
        is_trash: has_label("TRASH"),
        sent_at: header(payload, "Date").and_then(parse_date_header),
        received_at: parse_internal_date(message.internal_date.as_deref()).unwrap_or(now),
        labels,
    }
}

/// Exact, case-sensitive header lookup on the top-level payload.
fn header<'a>(payload: &'a MessagePart, name: &str) -> Option<&'a str> {
    payload
        .headers
        .iter()
        .find(|header| header.name == name)
        .map(|header| header.value.as_str())
}

fn split_addresses(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// First `text/plain` and first `text/html` body in document order.
fn extract_bodies(payload: &MessagePart) -> (Option<String>, Option<String>) {
    let mut text_body = None;
    let mut html_body = None;
    let mut worklist = vec![payload];

    while let Some(part) = worklist.pop() {
        if text_body.is_some() && html_body.is_some() {
            break;
        }

        let mime_type = part.mime_type.as_deref().unwrap_or("");
        let is_text = mime_type.eq_ignore_ascii_case("text/plain");
        let is_html = mime_type.eq_ignore_ascii_case("text/html");

        if (is_text && text_body.is_none()) || (is_html && html_body.is_none()) {
            let decoded = part
                .body
                .as_ref()
                .and_then(|body| body.data.as_deref())
                .filter(|data| !data.is_empty())
                .and_then(decode_body_data);

            if let Some(decoded) = decoded {
                if is_text {
                    text_body = Some(decoded);
                } else {
                    html_body = Some(decoded);
                }
            }
        }

        // Reverse so the first child is popped next.
        worklist.extend(part.parts.iter().rev());
    }

    (text_body, html_body)
}

/// Base64url with optional padding, falling back to the standard alphabet.
/// Invalid UTF-8 is replaced rather than rejected.
pub(crate) fn decode_body_data(data: &str) -> Option<String> {
    let unpadded = data.trim().trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(unpadded)
        .or_else(|_| STANDARD_NO_PAD.decode(unpadded))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn parse_date_header(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }

    // Trailing zone comments such as "(UTC)" or "(PST)".
    let without_comment = match trimmed.rfind('(') {
        Some(idx) if trimmed.ends_with(')') => trimmed[..idx].trim_end(),
        _ => return None,
    };
    DateTime::parse_from_rfc2822(without_comment)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

fn parse_internal_date(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let millis = raw?.trim().parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
