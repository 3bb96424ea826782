//! Chat-list rendering helpers.

use chrono::{DateTime, Utc};

use crate::constants::{AVATAR_SERVICE_URL, PREVIEW_ID_CHARS, STICKER_PREVIEW};
use crate::models::Contact;
use crate::obfuscation::{decode_body, Body, ObfuscationKey};
use crate::types::UserId;

/// One-line summary of the newest message shown under a contact's name.
pub fn render_preview(contact: &Contact, key: &ObfuscationKey) -> String {
    match contact.last_message.as_deref() {
        None | Some("") => format!("{}...", contact.id.prefix(PREVIEW_ID_CHARS)),
        Some(raw) => match decode_body(raw, key) {
            Body::Sticker(_) => STICKER_PREVIEW.to_string(),
            Body::Text(text) => text,
        },
    }
}

/// Relative age of a millisecond timestamp: `Just now`, `5m`, `3h`, `2d`,
/// then a short date such as `Oct 5` after a week.
pub fn format_time_ago(timestamp_ms: i64, now: DateTime<Utc>) -> String {
    // a gap too wide for i64 is far beyond a week
    let seconds = now
        .timestamp_millis()
        .checked_sub(timestamp_ms)
        .map_or(i64::MAX, |gap| gap.div_euclid(1000));
    if seconds < 60 {
        return "Just now".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h");
    }
    let days = hours / 24;
    if days < 7 {
        return format!("{days}d");
    }
    match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(date) => date.format("%b %-d").to_string(),
        None => String::new(),
    }
}

pub fn avatar_url(id: &UserId) -> String {
    format!("{AVATAR_SERVICE_URL}{id}")
}

/// Fallback shown when the avatar image cannot be loaded.
pub fn initials(username: &str) -> String {
    match username.chars().next() {
        Some(c) => c.to_uppercase().collect(),
        None => "?".to_string(),
    }
}
