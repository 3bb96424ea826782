use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::{ADDRESS_BYTES, CHATS_ROOT, CONVERSATION_SEPARATOR};
use crate::error::SharedError;

/// Returns `true` when `key` can be used as a single store path segment.
///
/// Mirrors the realtime database key rules: non-empty, no `/ . # $ [ ]`
/// and no control characters.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key
            .chars()
            .any(|c| matches!(c, '/' | '.' | '#' | '$' | '[' | ']') || c.is_control())
}

// User identity = opaque id handed out by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, SharedError> {
        let id = id.into();
        if is_valid_key(&id) {
            Ok(Self(id))
        } else {
            Err(SharedError::InvalidId(id))
        }
    }

    /// Random local-only address for sessions without an identity provider.
    pub fn generate_address() -> Self {
        let mut bytes = [0u8; ADDRESS_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `n` characters, never splitting a code point.
    pub fn prefix(&self, n: usize) -> &str {
        match self.0.char_indices().nth(n) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for UserId {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

/// Store-assigned message key (a push id for new messages).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Result<Self, SharedError> {
        let id = id.into();
        if is_valid_key(&id) {
            Ok(Self(id))
        } else {
            Err(SharedError::InvalidId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MessageId {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageId> for String {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

// ---------------------------------------------------------------------------
// StorePath
// ---------------------------------------------------------------------------

/// A `/`-separated address into the key-value store. The empty path is the
/// store root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse `a/b/c`. Leading and trailing slashes are ignored.
    pub fn parse(path: &str) -> Result<Self, SharedError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let segments = trimmed
            .split('/')
            .map(|s| {
                if is_valid_key(s) {
                    Ok(s.to_string())
                } else {
                    Err(SharedError::InvalidPath(path.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn child(&self, segment: &str) -> Result<Self, SharedError> {
        if !is_valid_key(segment) {
            return Err(SharedError::InvalidPath(format!("{self}/{segment}")));
        }
        Ok(self.child_unchecked(segment))
    }

    // Callers pass already-validated ids.
    pub(crate) fn child_unchecked(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Self { segments }
    }

    pub(crate) fn from_validated<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Strict prefix test: `a` is an ancestor of `a/b` but not of `a`.
    pub fn is_ancestor_of(&self, other: &StorePath) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments[..self.segments.len()] == self.segments[..]
    }

    /// Equal, ancestor or descendant. A change at one path is visible to a
    /// subscriber of the other exactly when they overlap.
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self == other || self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Segments of `self` below `ancestor`, if `ancestor` is a prefix.
    pub fn relative_to(&self, ancestor: &StorePath) -> Option<&[String]> {
        if self == ancestor || ancestor.is_ancestor_of(self) {
            Some(&self.segments[ancestor.segments.len()..])
        } else {
            None
        }
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for StorePath {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// ConversationPath
// ---------------------------------------------------------------------------

/// Canonical location of the two-party message collection.
///
/// The participants are sorted by byte order, so both sides resolve the same
/// path no matter who starts the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationPath {
    low: UserId,
    high: UserId,
    path: StorePath,
}

impl ConversationPath {
    pub fn resolve(a: &UserId, b: &UserId) -> Self {
        let (low, high) = if a.as_str().as_bytes() <= b.as_str().as_bytes() {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        };
        let key = format!("{low}{CONVERSATION_SEPARATOR}{high}");
        let path = StorePath::from_validated([CHATS_ROOT.to_string(), key]);
        Self { low, high, path }
    }

    pub fn as_path(&self) -> &StorePath {
        &self.path
    }

    /// `{low}_{high}`, the segment under `chats/`.
    pub fn key(&self) -> &str {
        self.path.last().unwrap_or_default()
    }

    pub fn participants(&self) -> (&UserId, &UserId) {
        (&self.low, &self.high)
    }

    /// The participant that is not `me`.
    pub fn peer_of(&self, me: &UserId) -> Option<&UserId> {
        if &self.low == me {
            Some(&self.high)
        } else if &self.high == me {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for ConversationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.path.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    #[test]
    fn test_resolve_is_order_independent() {
        let pairs = [
            ("alice", "bob"),
            ("bob", "alice"),
            ("0xabc", "0xabd"),
            ("Zed", "adam"),
            ("same", "same"),
            ("ünï", "ascii"),
        ];
        for (a, b) in pairs {
            assert_eq!(
                ConversationPath::resolve(&uid(a), &uid(b)),
                ConversationPath::resolve(&uid(b), &uid(a)),
            );
        }
    }

    #[test]
    fn test_resolve_format() {
        let path = ConversationPath::resolve(&uid("bob"), &uid("alice"));
        assert_eq!(path.to_string(), "chats/alice_bob");
        assert_eq!(path.key(), "alice_bob");
        assert_eq!(path.peer_of(&uid("alice")), Some(&uid("bob")));
        assert_eq!(path.peer_of(&uid("carol")), None);
    }

    #[test]
    fn test_uppercase_sorts_before_lowercase() {
        // byte order, not case-insensitive
        let path = ConversationPath::resolve(&uid("adam"), &uid("Zed"));
        assert_eq!(path.key(), "Zed_adam");
    }

    #[test]
    fn test_user_id_rejects_reserved_characters() {
        for bad in ["", "a/b", "a.b", "a#b", "a$b", "a[b", "a]b", "a\nb"] {
            assert!(UserId::new(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(UserId::new("google-oauth2|1234").is_ok());
    }

    #[test]
    fn test_generated_address_shape() {
        let id = UserId::generate_address();
        assert!(id.as_str().starts_with("0x"));
        assert_eq!(id.as_str().len(), 2 + ADDRESS_BYTES * 2);
        assert_ne!(id, UserId::generate_address());
    }

    #[test]
    fn test_prefix_respects_char_boundaries() {
        let id = uid("ééééé-rest");
        assert_eq!(id.prefix(3), "ééé");
        assert_eq!(uid("ab").prefix(5), "ab");
    }

    #[test]
    fn test_store_path_relations() {
        let users = StorePath::parse("users").unwrap();
        let alice = StorePath::parse("/users/alice/").unwrap();
        let pinned = StorePath::parse("users/alice/contacts/bob/pinned").unwrap();
        let chats = StorePath::parse("chats").unwrap();

        assert!(users.is_ancestor_of(&alice));
        assert!(!alice.is_ancestor_of(&alice));
        assert!(alice.overlaps(&pinned));
        assert!(pinned.overlaps(&users));
        assert!(!chats.overlaps(&alice));
        assert!(StorePath::root().overlaps(&chats));

        assert_eq!(
            pinned.relative_to(&alice).unwrap(),
            &["contacts".to_string(), "bob".to_string(), "pinned".to_string()]
        );
        assert!(alice.relative_to(&pinned).is_none());
        assert_eq!(pinned.parent().unwrap().last(), Some("bob"));
    }

    #[test]
    fn test_store_path_rejects_bad_segments() {
        assert!(StorePath::parse("users//alice").is_err());
        assert!(StorePath::parse("users/a.b").is_err());
        assert!(StorePath::root().child("x$").is_err());
        assert!(StorePath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_user_id_serde_validates() {
        let ok: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(ok.as_str(), "alice");
        assert!(serde_json::from_str::<UserId>("\"a/b\"").is_err());
    }
}
