//! Contact list synchronisation.
//!
//! The engine mirrors `users/{me}/contacts` and keeps one subscription per
//! contact on the shared conversation, from which it derives the chat-list
//! preview. Previews live in memory only.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use superyap_shared::constants::{ID_FIELD, PINNED_FIELD};
use superyap_shared::models::sort_for_display;
use superyap_shared::paths::{contact_path, contacts_path, user_path};
use superyap_shared::preview::render_preview;
use superyap_shared::{Contact, ConversationPath, Message, ObfuscationKey, UserId, UserProfile};
use superyap_store::{KeyValueStore, Snapshot, SubscriptionHandle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::conversation::append_order;
use crate::error::{Result, SyncError};
use crate::events::ContactEvent;
use crate::subscription_set::SubscriptionSet;

pub struct ContactSyncEngine {
    store: Arc<dyn KeyValueStore>,
    me: UserId,
    key: ObfuscationKey,
    mutual_removal: bool,
    contacts: BTreeMap<UserId, Contact>,
    /// `true` once the store has delivered the list at least once
    loaded: bool,
    list: Option<SubscriptionHandle>,
    previews: SubscriptionSet<UserId>,
    tx: mpsc::UnboundedSender<Snapshot>,
    rx: mpsc::UnboundedReceiver<Snapshot>,
}

impl ContactSyncEngine {
    pub fn new(store: Arc<dyn KeyValueStore>, me: UserId) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            store,
            me,
            key: ObfuscationKey::default(),
            mutual_removal: false,
            contacts: BTreeMap::new(),
            loaded: false,
            list: None,
            previews: SubscriptionSet::new(),
            tx,
            rx,
        }
    }

    pub fn with_obfuscation_key(mut self, key: ObfuscationKey) -> Self {
        self.key = key;
        self
    }

    pub fn with_mutual_removal(mut self, enabled: bool) -> Self {
        self.mutual_removal = enabled;
        self
    }

    pub fn me(&self) -> &UserId {
        &self.me
    }

    /// Subscribe to the contact list. Preview subscriptions follow once the
    /// list is known.
    pub fn start(&mut self) -> Result<()> {
        if self.list.is_some() {
            return Ok(());
        }
        let handle = self.store.subscribe(&contacts_path(&self.me), self.tx.clone())?;
        debug!(user = %self.me, subscription = %handle.id(), "contact list subscribed");
        self.list = Some(handle);
        self.sync_previews();
        Ok(())
    }

    /// Dispose every subscription. State is kept.
    pub fn stop(&mut self) {
        self.list = None;
        self.previews.clear();
        debug!(user = %self.me, "contact sync stopped");
    }

    /// Seed the list from the warm-start cache. Ignored once the store has
    /// answered.
    pub fn warm_start(&mut self, cached: Vec<Contact>) {
        if self.loaded {
            return;
        }
        self.contacts = cached
            .into_iter()
            .filter(|c| c.id != self.me)
            .map(|c| (c.id.clone(), c))
            .collect();
        self.sync_previews();
    }

    pub fn get(&self, id: &UserId) -> Option<&Contact> {
        self.contacts.get(id)
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.contacts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Contacts in chat-list order.
    pub fn sorted(&self) -> Vec<Contact> {
        let mut list: Vec<Contact> = self.contacts.values().cloned().collect();
        sort_for_display(&mut list);
        list
    }

    pub fn preview(&self, id: &UserId) -> Option<String> {
        self.contacts.get(id).map(|c| render_preview(c, &self.key))
    }

    /// Contacts whose conversation currently has a preview subscription.
    pub fn watched(&self) -> impl Iterator<Item = &UserId> {
        self.previews.keys()
    }

    /// Look `candidate` up and add it. Adding an existing contact returns the
    /// existing entry and writes nothing.
    pub async fn add_contact(&mut self, candidate: &UserId) -> Result<Contact> {
        if candidate == &self.me {
            return Err(SyncError::SelfContact);
        }
        if let Some(existing) = self.contacts.get(candidate) {
            return Ok(existing.clone());
        }

        let path = contact_path(&self.me, candidate);
        if let Some(record) = self.store.read(&path).await? {
            if let Some(existing) = parse_contact(candidate, record) {
                return Ok(existing);
            }
        }

        let profile_path = user_path(candidate);
        let Some(mut record) = self.store.read(&profile_path).await? else {
            info!(candidate = %candidate, "contact lookup found no profile");
            return Err(SyncError::LookupNotFound(candidate.clone()));
        };
        if let Value::Object(ref mut fields) = record {
            fields.insert(ID_FIELD.to_string(), Value::String(candidate.to_string()));
        }
        let profile: UserProfile =
            serde_json::from_value(record).map_err(|e| SyncError::Malformed {
                path: profile_path.to_string(),
                reason: e.to_string(),
            })?;

        let contact = Contact::from_profile(&profile);
        let value = serde_json::to_value(contact.without_preview()).map_err(|e| {
            SyncError::Malformed {
                path: path.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.store.write(&path, value).await?;

        info!(user = %self.me, contact = %candidate, "Contact added");
        Ok(contact)
    }

    /// Remove `id` from the list. The conversation itself is kept.
    pub async fn remove_contact(&mut self, id: &UserId) -> Result<()> {
        self.store.delete(&contact_path(&self.me, id)).await?;
        info!(user = %self.me, contact = %id, "Contact removed");

        if self.mutual_removal {
            if let Err(e) = self.store.delete(&contact_path(id, &self.me)).await {
                warn!(contact = %id, error = %e, "mutual removal failed");
            }
        }
        Ok(())
    }

    pub async fn set_pinned(&mut self, id: &UserId, pinned: bool) -> Result<()> {
        if !self.contacts.contains_key(id) {
            return Err(SyncError::UnknownContact(id.clone()));
        }
        let mut fields = Map::new();
        fields.insert(PINNED_FIELD.to_string(), Value::Bool(pinned));
        self.store.patch(&contact_path(&self.me, id), fields).await?;
        debug!(contact = %id, pinned, "pin updated");
        Ok(())
    }

    /// Flip the pin and return the new state.
    pub async fn toggle_pinned(&mut self, id: &UserId) -> Result<bool> {
        let pinned = !self
            .contacts
            .get(id)
            .ok_or_else(|| SyncError::UnknownContact(id.clone()))?
            .is_pinned();
        self.set_pinned(id, pinned).await?;
        Ok(pinned)
    }

    /// Wait for the next snapshot that changes something.
    pub async fn next_event(&mut self) -> Option<ContactEvent> {
        loop {
            let snapshot = self.rx.recv().await?;
            if let Some(event) = self.apply(snapshot) {
                return Some(event);
            }
        }
    }

    /// Apply every snapshot that is already queued.
    pub fn pump(&mut self) -> Vec<ContactEvent> {
        let mut events = Vec::new();
        while let Ok(snapshot) = self.rx.try_recv() {
            if let Some(event) = self.apply(snapshot) {
                events.push(event);
            }
        }
        events
    }

    fn apply(&mut self, snapshot: Snapshot) -> Option<ContactEvent> {
        if self
            .list
            .as_ref()
            .is_some_and(|h| h.id() == snapshot.subscription)
        {
            if let Some(failure) = snapshot.failure {
                warn!(user = %self.me, %failure, "contact list subscription failed");
                self.list = None;
                return Some(ContactEvent::SubscriptionFailed(failure));
            }
            self.apply_list(snapshot.value);
            return Some(ContactEvent::ContactsChanged);
        }

        if let Some(owner) = self.previews.owner_of(snapshot.subscription).cloned() {
            if let Some(failure) = snapshot.failure {
                warn!(contact = %owner, %failure, "preview subscription failed");
                return Some(ContactEvent::SubscriptionFailed(failure));
            }
            return self.apply_preview(&owner, snapshot.value);
        }

        debug!(subscription = %snapshot.subscription, "dropping stale snapshot");
        None
    }

    fn apply_list(&mut self, value: Option<Value>) {
        let mut previous = std::mem::take(&mut self.contacts);
        self.loaded = true;

        if let Some(Value::Object(records)) = value {
            for (key, record) in records {
                let Ok(id) = UserId::new(key.as_str()) else {
                    warn!(key = %key, "skipping contact with invalid id");
                    continue;
                };
                if id == self.me {
                    warn!("skipping self entry in contact list");
                    continue;
                }
                let Some(mut contact) = parse_contact(&id, record) else {
                    continue;
                };
                if let Some(old) = previous.remove(&id) {
                    contact.last_message = old.last_message;
                    contact.last_timestamp = old.last_timestamp;
                }
                self.contacts.insert(id, contact);
            }
        }

        debug!(count = self.contacts.len(), "contact list updated");
        self.sync_previews();
    }

    fn apply_preview(&mut self, owner: &UserId, value: Option<Value>) -> Option<ContactEvent> {
        let preview = match value {
            None => None,
            Some(messages) => match newest_message(&messages) {
                Some(message) => Some((message.content, message.timestamp)),
                None => {
                    debug!(contact = %owner, "no readable message in conversation");
                    return None;
                }
            },
        };

        let contact = self.contacts.get_mut(owner)?;
        let before = (contact.last_message.clone(), contact.last_timestamp);
        contact.set_preview(preview);
        if before == (contact.last_message.clone(), contact.last_timestamp) {
            return None;
        }
        Some(ContactEvent::PreviewUpdated(owner.clone()))
    }

    /// Keep exactly one conversation subscription per contact while started.
    fn sync_previews(&mut self) {
        if self.list.is_none() {
            return;
        }
        let store = Arc::clone(&self.store);
        let me = self.me.clone();
        let tx = self.tx.clone();

        let result = self.previews.reconcile(self.contacts.keys().cloned(), |id| {
            let conversation = ConversationPath::resolve(&me, id);
            store.subscribe(conversation.as_path(), tx.clone())
        });

        for id in &result.removed {
            debug!(contact = %id, "preview subscription disposed");
        }
        for (id, e) in result.failed {
            warn!(contact = %id, error = %e, "preview subscription failed");
        }
    }
}

fn parse_contact(id: &UserId, mut record: Value) -> Option<Contact> {
    if let Value::Object(ref mut fields) = record {
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    }
    match serde_json::from_value(record) {
        Ok(contact) => Some(contact),
        Err(e) => {
            warn!(contact = %id, error = %e, "skipping malformed contact");
            None
        }
    }
}

/// Last message by append order: the greatest push key, or the last element
/// of an array written by an older client.
fn newest_message(messages: &Value) -> Option<Message> {
    match messages {
        Value::Object(records) => records
            .iter()
            .max_by(|a, b| append_order(a.0, b.0))
            .and_then(|(key, record)| Message::from_entry(key, record).ok()),
        Value::Array(records) => records
            .iter()
            .enumerate()
            .rev()
            .find(|(_, record)| !record.is_null())
            .and_then(|(index, record)| Message::from_entry(&index.to_string(), record).ok()),
        _ => None,
    }
}
