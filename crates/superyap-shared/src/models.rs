//! Records persisted in the key-value store.
//!
//! Field names are camelCase on the wire so the web client and this crate
//! read and write the same documents.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{
    DEFAULT_AVATAR, ID_FIELD, MASTER_KEY_PREFIX, MASTER_KEY_SUFFIX_LEN, SHARED_KEY_PREFIX,
};
use crate::types::{MessageId, UserId};

/// emoji -> users who reacted with it
pub type ReactionMap = BTreeMap<String, BTreeSet<UserId>>;

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    /// Image URL or `sprite:INDEX`
    #[serde(default = "default_avatar")]
    pub avatar: String,
    pub hashing_key: String,
}

fn default_avatar() -> String {
    DEFAULT_AVATAR.to_string()
}

impl UserProfile {
    /// Fresh per-user key material: `master_key_` + random base-36 suffix.
    pub fn new_master_key() -> String {
        const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
        let mut rng = rand::thread_rng();
        let suffix: String = (0..MASTER_KEY_SUFFIX_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        format!("{MASTER_KEY_PREFIX}{suffix}")
    }

    pub fn apply(&mut self, update: &ProfileUpdate) {
        if let Some(ref username) = update.username {
            self.username = username.clone();
        }
        if let Some(ref avatar) = update.avatar {
            self.avatar = avatar.clone();
        }
    }
}

/// Partial profile edit from the settings screen.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: UserId,
    /// Locally editable alias, initialised from the contact's profile
    pub username: String,
    pub hashing_key: String,
    #[serde(default = "default_avatar")]
    pub avatar: String,
    /// Cached preview: payload of the newest message in the conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    /// Cached preview: timestamp (ms) of that message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
}

impl Contact {
    /// Key material for a contact, derived from its public id alone.
    /// This is not a key agreement and protects nothing.
    pub fn derived_key(id: &UserId) -> String {
        format!("{SHARED_KEY_PREFIX}{id}")
    }

    pub fn from_profile(profile: &UserProfile) -> Self {
        Self {
            id: profile.id.clone(),
            username: profile.username.clone(),
            hashing_key: Self::derived_key(&profile.id),
            avatar: profile.avatar.clone(),
            last_message: None,
            last_timestamp: None,
            pinned: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.unwrap_or(false)
    }

    pub fn set_preview(&mut self, preview: Option<(String, i64)>) {
        match preview {
            Some((content, timestamp)) => {
                self.last_message = Some(content);
                self.last_timestamp = Some(timestamp);
            }
            None => {
                self.last_message = None;
                self.last_timestamp = None;
            }
        }
    }

    /// The contact as it is written to the store: previews stay in memory.
    pub fn without_preview(&self) -> Self {
        Self {
            last_message: None,
            last_timestamp: None,
            ..self.clone()
        }
    }
}

/// Pinned first, then newest message first. Contacts that were never
/// messaged go to the bottom of their tier. Stable for equal keys.
pub fn sort_for_display(contacts: &mut [Contact]) {
    contacts.sort_by_key(|c| (!c.is_pinned(), Reverse(c.last_timestamp)));
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    /// Obfuscated text or a tagged marker
    pub content: String,
    /// Milliseconds since the Unix epoch, assigned by the sender
    pub timestamp: i64,
    #[serde(default, with = "reaction_wire", skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: ReactionMap,
}

impl Message {
    /// Build a message from a collection entry. The store key wins over any
    /// `id` field inside the record.
    pub fn from_entry(key: &str, record: &Value) -> Result<Self, serde_json::Error> {
        let mut record = record.clone();
        if let Value::Object(ref mut fields) = record {
            fields.insert(ID_FIELD.to_string(), Value::String(key.to_string()));
        }
        serde_json::from_value(record)
    }

    pub fn has_reaction(&self, emoji: &str, user: &UserId) -> bool {
        self.reactions
            .get(emoji)
            .map_or(false, |users| users.contains(user))
    }
}

/// A message before the store assigns its id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub sender_id: UserId,
    pub content: String,
    pub timestamp: i64,
}

/// Reaction sets are stored as `{ emoji: { userId: true } }` so a single
/// membership change touches a single key. Arrays written by older clients
/// (`["alice"]`, or `{ "0": "alice" }` once the database has turned them
/// into objects) are still read.
mod reaction_wire {
    use std::collections::{BTreeMap, BTreeSet};

    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    use super::ReactionMap;
    use crate::types::UserId;

    pub fn serialize<S: Serializer>(map: &ReactionMap, s: S) -> Result<S::Ok, S::Error> {
        let wire: BTreeMap<&str, BTreeMap<&str, bool>> = map
            .iter()
            .filter(|(_, users)| !users.is_empty())
            .map(|(emoji, users)| {
                (
                    emoji.as_str(),
                    users.iter().map(|u| (u.as_str(), true)).collect(),
                )
            })
            .collect();
        wire.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<ReactionMap, D::Error> {
        let wire: Option<BTreeMap<String, Value>> = Option::deserialize(d)?;
        let mut map = ReactionMap::new();
        for (emoji, members) in wire.unwrap_or_default() {
            let users: BTreeSet<UserId> = match members {
                Value::Object(fields) => fields
                    .into_iter()
                    .filter_map(|(key, value)| match value {
                        Value::Bool(true) => UserId::new(key).ok(),
                        Value::String(id) => UserId::new(id).ok(),
                        _ => None,
                    })
                    .collect(),
                Value::Array(items) => items
                    .into_iter()
                    .filter_map(|v| v.as_str().and_then(|s| UserId::new(s).ok()))
                    .collect(),
                _ => BTreeSet::new(),
            };
            if !users.is_empty() {
                map.insert(emoji, users);
            }
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    fn contact(id: &str, pinned: bool, ts: Option<i64>) -> Contact {
        Contact {
            id: uid(id),
            username: id.to_string(),
            hashing_key: Contact::derived_key(&uid(id)),
            avatar: DEFAULT_AVATAR.to_string(),
            last_message: ts.map(|_| "x".to_string()),
            last_timestamp: ts,
            pinned: pinned.then_some(true),
        }
    }

    #[test]
    fn test_sort_pinned_first_then_newest() {
        let mut list = vec![
            contact("old", false, Some(10)),
            contact("never", false, None),
            contact("pinned-never", true, None),
            contact("new", false, Some(99)),
            contact("pinned-old", true, Some(1)),
        ];
        sort_for_display(&mut list);
        let order: Vec<_> = list.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(order, ["pinned-old", "pinned-never", "new", "old", "never"]);
    }

    #[test]
    fn test_contact_wire_format() {
        let c = Contact::from_profile(&UserProfile {
            id: uid("bob"),
            username: "Bob".into(),
            avatar: "sprite:3".into(),
            hashing_key: "master_key_abc".into(),
        });
        assert_eq!(c.hashing_key, "shared_hash_bob");
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(
            v,
            json!({"id": "bob", "username": "Bob", "hashingKey": "shared_hash_bob", "avatar": "sprite:3"})
        );
    }

    #[test]
    fn test_message_from_entry_uses_key() {
        let record = json!({"id": "stale", "senderId": "alice", "content": "aGk=", "timestamp": 5});
        let msg = Message::from_entry("-Nkey", &record).unwrap();
        assert_eq!(msg.id.as_str(), "-Nkey");
        assert_eq!(msg.sender_id, uid("alice"));
        assert!(msg.reactions.is_empty());
    }

    #[test]
    fn test_reactions_read_both_wire_forms() {
        let record = json!({
            "senderId": "alice", "content": "x", "timestamp": 1,
            "reactions": {
                "👍": {"bob": true, "carol": true},
                "🔥": ["alice"],
                "😂": {"0": "dave"},
                "💀": {}
            }
        });
        let msg = Message::from_entry("k", &record).unwrap();
        assert_eq!(msg.reactions.len(), 3);
        assert!(msg.has_reaction("👍", &uid("carol")));
        assert!(msg.has_reaction("🔥", &uid("alice")));
        assert!(msg.has_reaction("😂", &uid("dave")));
        assert!(!msg.reactions.contains_key("💀"));

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["reactions"]["🔥"], json!({"alice": true}));
    }

    #[test]
    fn test_master_key_shape() {
        let key = UserProfile::new_master_key();
        assert!(key.starts_with(MASTER_KEY_PREFIX));
        assert_eq!(key.len(), MASTER_KEY_PREFIX.len() + MASTER_KEY_SUFFIX_LEN);
    }

    #[test]
    fn test_profile_update() {
        let mut p = UserProfile {
            id: uid("alice"),
            username: "Alice".into(),
            avatar: DEFAULT_AVATAR.into(),
            hashing_key: "k".into(),
        };
        p.apply(&ProfileUpdate {
            username: Some("Al".into()),
            avatar: None,
        });
        assert_eq!(p.username, "Al");
        assert_eq!(p.avatar, DEFAULT_AVATAR);
    }
}
