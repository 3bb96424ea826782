use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use superyap_shared::obfuscation::Body;
use superyap_shared::preview::{avatar_url, format_time_ago, render_preview};
use superyap_shared::{Contact, ObfuscationKey, UserId};
use superyap_store::SubscriptionFailure;

use crate::conversation::DecodedMessage;

/// What a [`ContactSyncEngine`](crate::ContactSyncEngine) snapshot changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactEvent {
    /// The contact set or a contact record changed.
    ContactsChanged,
    /// The newest message of the conversation with this contact changed.
    PreviewUpdated(UserId),
    /// A subscription stopped. For the list itself `start` subscribes again.
    SubscriptionFailed(SubscriptionFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    MessagesChanged,
    /// The conversation stopped updating. Messages already seen are kept.
    SubscriptionFailed(SubscriptionFailure),
}

/// A chat-list row, ready to render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactView {
    pub id: String,
    pub username: String,
    pub avatar_url: String,
    pub preview: String,
    pub time_ago: Option<String>,
    pub pinned: bool,
}

impl ContactView {
    pub fn new(contact: &Contact, key: &ObfuscationKey, now: DateTime<Utc>) -> Self {
        Self {
            id: contact.id.to_string(),
            username: contact.username.clone(),
            avatar_url: avatar_url(&contact.id),
            preview: render_preview(contact, key),
            time_ago: contact.last_timestamp.map(|ts| format_time_ago(ts, now)),
            pinned: contact.is_pinned(),
        }
    }
}

/// A message bubble, ready to render.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: String,
    pub sender_id: String,
    pub text: Option<String>,
    pub sticker: Option<u32>,
    pub timestamp: i64,
    /// emoji -> number of users
    pub reactions: BTreeMap<String, usize>,
    pub is_own: bool,
}

impl From<&DecodedMessage> for MessageView {
    fn from(m: &DecodedMessage) -> Self {
        let (text, sticker) = match m.body {
            Body::Text(ref text) => (Some(text.clone()), None),
            Body::Sticker(index) => (None, Some(index)),
        };
        Self {
            id: m.id.to_string(),
            sender_id: m.sender.to_string(),
            text,
            sticker,
            timestamp: m.timestamp,
            reactions: m
                .reactions
                .iter()
                .map(|(emoji, users)| (emoji.clone(), users.len()))
                .collect(),
            is_own: m.is_own,
        }
    }
}
