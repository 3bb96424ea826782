//! The store path scheme.
//!
//! ```text
//! users/{id}                              UserProfile
//! users/{id}/contacts/{contactId}         Contact
//! users/{id}/contacts/{contactId}/pinned  pin flag
//! users/{id}/conversations/{peerId}       conversation index (true)
//! chats/{low}_{high}                      messages keyed by push id
//! chats/{low}_{high}/{msgId}/reactions    emoji -> {userId: true}
//! ```

use crate::constants::{
    CONTACTS_SEGMENT, CONVERSATIONS_SEGMENT, PINNED_FIELD, REACTIONS_FIELD, USERS_ROOT,
};
use crate::types::{ConversationPath, MessageId, StorePath, UserId};

pub fn user_path(id: &UserId) -> StorePath {
    StorePath::from_validated([USERS_ROOT, id.as_str()])
}

pub fn contacts_path(owner: &UserId) -> StorePath {
    user_path(owner).child_unchecked(CONTACTS_SEGMENT)
}

pub fn contact_path(owner: &UserId, contact: &UserId) -> StorePath {
    contacts_path(owner).child_unchecked(contact.as_str())
}

pub fn pinned_path(owner: &UserId, contact: &UserId) -> StorePath {
    contact_path(owner, contact).child_unchecked(PINNED_FIELD)
}

pub fn conversation_index_path(owner: &UserId, peer: &UserId) -> StorePath {
    user_path(owner)
        .child_unchecked(CONVERSATIONS_SEGMENT)
        .child_unchecked(peer.as_str())
}

pub fn message_path(conversation: &ConversationPath, message: &MessageId) -> StorePath {
    conversation.as_path().child_unchecked(message.as_str())
}

pub fn reactions_path(conversation: &ConversationPath, message: &MessageId) -> StorePath {
    message_path(conversation, message).child_unchecked(REACTIONS_FIELD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_scheme() {
        let alice = UserId::new("alice").unwrap();
        let bob = UserId::new("bob").unwrap();
        let conv = ConversationPath::resolve(&bob, &alice);
        let msg = MessageId::new("-Nabc123").unwrap();

        assert_eq!(user_path(&alice).to_string(), "users/alice");
        assert_eq!(contacts_path(&alice).to_string(), "users/alice/contacts");
        assert_eq!(contact_path(&alice, &bob).to_string(), "users/alice/contacts/bob");
        assert_eq!(
            pinned_path(&alice, &bob).to_string(),
            "users/alice/contacts/bob/pinned"
        );
        assert_eq!(
            conversation_index_path(&bob, &alice).to_string(),
            "users/bob/conversations/alice"
        );
        assert_eq!(message_path(&conv, &msg).to_string(), "chats/alice_bob/-Nabc123");
        assert_eq!(
            reactions_path(&conv, &msg).to_string(),
            "chats/alice_bob/-Nabc123/reactions"
        );
    }
}
