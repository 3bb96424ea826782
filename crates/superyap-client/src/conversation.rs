//! Message synchronisation for the open conversation.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use superyap_shared::obfuscation::{decode_body, obfuscate, sticker_marker};
use superyap_shared::paths::{conversation_index_path, message_path, reactions_path};
use superyap_shared::types::is_valid_key;
use superyap_shared::{
    Body, ConversationPath, Message, MessageId, NewMessage, ObfuscationKey, ReactionMap,
    SharedError, UserId,
};
use superyap_store::{KeyValueStore, SetOp, Snapshot, SubscriptionHandle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::events::MessageEvent;

/// A message as the user sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub body: Body,
    pub timestamp: i64,
    pub reactions: ReactionMap,
    pub is_own: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Added,
    Removed,
}

struct ActiveConversation {
    peer: UserId,
    path: ConversationPath,
    handle: SubscriptionHandle,
    messages: Vec<Message>,
    indexed: bool,
}

pub struct MessageSyncEngine {
    store: Arc<dyn KeyValueStore>,
    me: UserId,
    key: ObfuscationKey,
    active: Option<ActiveConversation>,
    tx: mpsc::UnboundedSender<Snapshot>,
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl MessageSyncEngine {
    pub fn new(store: Arc<dyn KeyValueStore>, me: UserId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            me,
            key: ObfuscationKey::default(),
            active: None,
            tx,
            rx,
        }
    }

    pub fn with_obfuscation_key(mut self, key: ObfuscationKey) -> Self {
        self.key = key;
        self
    }

    /// Switch to the conversation with `peer`. The previous subscription is
    /// disposed first and anything it already queued is discarded.
    pub fn open(&mut self, peer: &UserId) -> Result<&ConversationPath> {
        if self.active.as_ref().map(|a| &a.peer) != Some(peer) {
            self.close();

            let path = ConversationPath::resolve(&self.me, peer);
            let handle = self.store.subscribe(path.as_path(), self.tx.clone())?;
            debug!(conversation = %path, subscription = %handle.id(), "conversation opened");

            self.active = Some(ActiveConversation {
                peer: peer.clone(),
                path,
                handle,
                messages: Vec::new(),
                indexed: false,
            });
        }
        self.active
            .as_ref()
            .map(|a| &a.path)
            .ok_or(SyncError::NoActiveConversation)
    }

    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(conversation = %active.path, "conversation closed");
            active.handle.dispose();
        }
    }

    pub fn conversation(&self) -> Option<&ConversationPath> {
        self.active.as_ref().map(|a| &a.path)
    }

    pub fn peer(&self) -> Option<&UserId> {
        self.active.as_ref().map(|a| &a.peer)
    }

    /// Messages in append order, still obfuscated.
    pub fn messages(&self) -> &[Message] {
        self.active.as_ref().map_or(&[], |a| a.messages.as_slice())
    }

    /// Messages decoded for display. Undecodable text shows the placeholder.
    pub fn decoded(&self) -> Vec<DecodedMessage> {
        self.messages()
            .iter()
            .map(|m| DecodedMessage {
                id: m.id.clone(),
                sender: m.sender_id.clone(),
                body: decode_body(&m.content, &self.key),
                timestamp: m.timestamp,
                reactions: m.reactions.clone(),
                is_own: m.sender_id == self.me,
            })
            .collect()
    }

    pub async fn send(&mut self, text: &str) -> Result<MessageId> {
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let payload = obfuscate(text, &self.key);
        self.append_message(payload).await
    }

    /// Send sticker `index` (1-based). The marker is stored as-is.
    pub async fn send_sticker(&mut self, index: u32) -> Result<MessageId> {
        let marker = sticker_marker(index)?;
        self.append_message(marker).await
    }

    async fn append_message(&mut self, content: String) -> Result<MessageId> {
        let (path, peer) = {
            let active = self.active.as_ref().ok_or(SyncError::NoActiveConversation)?;
            (active.path.clone(), active.peer.clone())
        };

        let record = NewMessage {
            sender_id: self.me.clone(),
            content,
            timestamp: Utc::now().timestamp_millis(),
        };
        let value = serde_json::to_value(&record).map_err(|e| SyncError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        let key = self.store.append(path.as_path(), value).await?;
        let id = MessageId::new(key)?;

        info!(msg_id = %id, conversation = %path, "Message sent");

        if self.active.as_ref().is_some_and(|a| !a.indexed) {
            self.index_conversation(&peer).await;
            if let Some(active) = self.active.as_mut() {
                active.indexed = true;
            }
        }
        Ok(id)
    }

    /// Record the conversation under both users. Best effort: the message is
    /// already stored.
    async fn index_conversation(&self, peer: &UserId) {
        for (owner, other) in [(&self.me, peer), (peer, &self.me)] {
            let path = conversation_index_path(owner, other);
            if let Err(e) = self.store.write(&path, Value::Bool(true)).await {
                warn!(path = %path, error = %e, "conversation index not written");
            }
        }
    }

    /// Delete a message sent by the local user. Other senders' messages are
    /// refused before the store is touched.
    pub async fn delete_own_message(&mut self, id: &MessageId) -> Result<()> {
        let active = self.active.as_ref().ok_or(SyncError::NoActiveConversation)?;
        let message = active
            .messages
            .iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| SyncError::MessageNotFound(id.clone()))?;
        if message.sender_id != self.me {
            warn!(msg_id = %id, sender = %message.sender_id, "refusing to delete another user's message");
            return Err(SyncError::NotOwner(id.clone()));
        }

        let path = message_path(&active.path, id);
        self.store.delete(&path).await?;
        info!(msg_id = %id, "Message deleted");
        Ok(())
    }

    /// Add the local user's `emoji` reaction, or take it back if present.
    /// Only that one membership is written.
    pub async fn toggle_reaction(&mut self, id: &MessageId, emoji: &str) -> Result<ReactionChange> {
        if !is_valid_key(emoji) {
            return Err(SharedError::InvalidId(emoji.to_string()).into());
        }
        let active = self.active.as_ref().ok_or(SyncError::NoActiveConversation)?;
        let message = active
            .messages
            .iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| SyncError::MessageNotFound(id.clone()))?;

        let member = self.me.to_string();
        let (op, change) = if message.has_reaction(emoji, &self.me) {
            (SetOp::Remove(member), ReactionChange::Removed)
        } else {
            (SetOp::Insert(member), ReactionChange::Added)
        };

        self.store
            .merge_field(&reactions_path(&active.path, id), emoji, op)
            .await?;
        debug!(msg_id = %id, emoji, ?change, "reaction toggled");
        Ok(change)
    }

    /// Wait for the next snapshot of the open conversation.
    pub async fn next_event(&mut self) -> Option<MessageEvent> {
        loop {
            let snapshot = self.rx.recv().await?;
            if let Some(event) = self.apply(snapshot) {
                return Some(event);
            }
        }
    }

    /// Apply every snapshot that is already queued.
    pub fn pump(&mut self) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        while let Ok(snapshot) = self.rx.try_recv() {
            if let Some(event) = self.apply(snapshot) {
                events.push(event);
            }
        }
        events
    }

    fn apply(&mut self, snapshot: Snapshot) -> Option<MessageEvent> {
        let Some(active) = self
            .active
            .as_mut()
            .filter(|a| a.handle.id() == snapshot.subscription)
        else {
            debug!(subscription = %snapshot.subscription, "dropping stale snapshot");
            return None;
        };

        if let Some(failure) = snapshot.failure {
            warn!(conversation = %active.path, %failure, "conversation subscription failed");
            return Some(MessageEvent::SubscriptionFailed(failure));
        }

        active.messages = parse_messages(snapshot.value);
        debug!(conversation = %active.path, count = active.messages.len(), "messages updated");
        Some(MessageEvent::MessagesChanged)
    }
}

/// Messages in append order. Unreadable records are skipped.
fn parse_messages(value: Option<Value>) -> Vec<Message> {
    let mut entries: Vec<(String, Value)> = match value {
        Some(Value::Object(records)) => records.into_iter().collect(),
        Some(Value::Array(records)) => records
            .into_iter()
            .enumerate()
            .filter(|(_, record)| !record.is_null())
            .map(|(index, record)| (index.to_string(), record))
            .collect(),
        _ => Vec::new(),
    };
    entries.sort_by(|(a, _), (b, _)| append_order(a, b));

    entries
        .into_iter()
        .filter_map(|(key, record)| match Message::from_entry(&key, &record) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(key = %key, error = %e, "skipping unreadable message");
                None
            }
        })
        .collect()
}

/// Push ids sort as strings. Index keys from a stored array sort as numbers.
pub(crate) fn append_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}
