//! Two users talking through one store.

use std::sync::Arc;

use serde_json::json;
use superyap_client::{
    ClientConfig, ContactEvent, ContactSyncEngine, Identity, MessageEvent, MessageSyncEngine,
    ReactionChange, Session, SyncError,
};
use superyap_shared::paths::{contacts_path, message_path, user_path};
use superyap_shared::{Body, ConversationPath, UserId};
use superyap_store::{Database, KeyValueStore, LocalStore};

fn uid(s: &str) -> UserId {
    UserId::new(s).unwrap()
}

struct User {
    session: Session,
    contacts: ContactSyncEngine,
    messages: MessageSyncEngine,
}

async fn sign_in(store: &Arc<LocalStore>, id: &str) -> User {
    let config = ClientConfig::default();
    let session = Session::start(store.clone(), &Identity::new(uid(id)), None)
        .await
        .unwrap();
    let mut contacts = session.contact_engine(&config);
    contacts.start().unwrap();
    contacts.pump();
    let messages = session.message_engine(&config);
    User {
        session,
        contacts,
        messages,
    }
}

#[tokio::test]
async fn alice_and_bob_exchange_a_message() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let mut alice = sign_in(&store, "alice").await;
    let mut bob = sign_in(&store, "bob").await;

    alice.contacts.add_contact(&uid("bob")).await.unwrap();
    bob.contacts.add_contact(&uid("alice")).await.unwrap();

    let path = alice.messages.open(&uid("bob")).unwrap().clone();
    assert_eq!(path.to_string(), "chats/alice_bob");
    assert_eq!(bob.messages.open(&uid("alice")).unwrap(), &path);

    let id = alice.messages.send("hi").await.unwrap();

    let stored = store.read(path.as_path()).await.unwrap().unwrap();
    assert_eq!(stored.as_object().unwrap().len(), 1);
    assert_eq!(stored[id.as_str()]["senderId"], json!("alice"));

    assert_eq!(bob.messages.next_event().await, Some(MessageEvent::MessagesChanged));
    bob.messages.pump();
    let seen = bob.messages.decoded();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].sender, uid("alice"));
    assert_eq!(seen[0].body, Body::Text("hi".into()));
    assert!(!seen[0].is_own);

    alice.messages.pump();
    assert_eq!(alice.messages.decoded()[0].body, Body::Text("hi".into()));
    assert!(alice.messages.decoded()[0].is_own);
}

#[tokio::test]
async fn sticker_preview_is_not_decoded() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let mut alice = sign_in(&store, "alice").await;
    let mut bob = sign_in(&store, "bob").await;
    bob.contacts.add_contact(&uid("alice")).await.unwrap();
    bob.contacts.pump();

    alice.messages.open(&uid("bob")).unwrap();
    alice.messages.send_sticker(7).await.unwrap();

    let events = bob.contacts.pump();
    assert!(events.contains(&ContactEvent::PreviewUpdated(uid("alice"))));
    assert_eq!(bob.contacts.preview(&uid("alice")).unwrap(), "Sent a sticker");
}

#[tokio::test]
async fn pinned_contacts_sort_first() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let mut alice = sign_in(&store, "alice").await;
    let mut bob = sign_in(&store, "bob").await;
    let _carol = sign_in(&store, "carol").await;

    alice.contacts.add_contact(&uid("bob")).await.unwrap();
    alice.contacts.add_contact(&uid("carol")).await.unwrap();
    alice.contacts.pump();

    // bob has the newest message, carol is pinned
    bob.messages.open(&uid("alice")).unwrap();
    bob.messages.send("newest").await.unwrap();
    alice.contacts.set_pinned(&uid("carol"), true).await.unwrap();
    alice.contacts.pump();

    let order: Vec<UserId> = alice.contacts.sorted().into_iter().map(|c| c.id).collect();
    assert_eq!(order, [uid("carol"), uid("bob")]);
}

#[tokio::test]
async fn add_contact_twice_keeps_one_entry() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let mut alice = sign_in(&store, "alice").await;
    let _bob = sign_in(&store, "bob").await;

    alice.contacts.add_contact(&uid("bob")).await.unwrap();
    // before the echo arrives
    alice.contacts.add_contact(&uid("bob")).await.unwrap();
    alice.contacts.pump();
    alice.contacts.add_contact(&uid("bob")).await.unwrap();
    alice.contacts.pump();

    assert_eq!(alice.contacts.len(), 1);
    let stored = store.read(&contacts_path(&uid("alice"))).await.unwrap().unwrap();
    assert_eq!(stored.as_object().unwrap().len(), 1);

    assert!(matches!(
        alice.contacts.add_contact(&uid("alice")).await,
        Err(SyncError::SelfContact)
    ));
    assert!(matches!(
        alice.contacts.add_contact(&uid("nobody")).await,
        Err(SyncError::LookupNotFound(_))
    ));
}

#[tokio::test]
async fn reaction_toggle_is_self_inverse() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let mut alice = sign_in(&store, "alice").await;
    let mut bob = sign_in(&store, "bob").await;
    alice.messages.open(&uid("bob")).unwrap();
    bob.messages.open(&uid("alice")).unwrap();

    let id = alice.messages.send("hello").await.unwrap();
    alice.messages.pump();
    alice.messages.toggle_reaction(&id, "😂").await.unwrap();
    alice.messages.pump();
    bob.messages.pump();
    let before = bob.messages.messages()[0].reactions.clone();

    assert_eq!(
        bob.messages.toggle_reaction(&id, "❤️").await.unwrap(),
        ReactionChange::Added
    );
    bob.messages.pump();
    assert_ne!(bob.messages.messages()[0].reactions, before);

    assert_eq!(
        bob.messages.toggle_reaction(&id, "❤️").await.unwrap(),
        ReactionChange::Removed
    );
    bob.messages.pump();
    assert_eq!(bob.messages.messages()[0].reactions, before);
}

#[tokio::test]
async fn foreign_delete_leaves_store_untouched() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let mut alice = sign_in(&store, "alice").await;
    let mut bob = sign_in(&store, "bob").await;
    alice.messages.open(&uid("bob")).unwrap();
    bob.messages.open(&uid("alice")).unwrap();

    let id = alice.messages.send("keep me").await.unwrap();
    bob.messages.pump();

    let conversation = ConversationPath::resolve(&uid("alice"), &uid("bob"));
    let before = store.read(conversation.as_path()).await.unwrap();
    assert!(matches!(
        bob.messages.delete_own_message(&id).await,
        Err(SyncError::NotOwner(_))
    ));
    assert_eq!(store.read(conversation.as_path()).await.unwrap(), before);
    assert!(store
        .read(&message_path(&conversation, &id))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn deep_link_adds_then_opens() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let _bob = sign_in(&store, "bob").await;
    let mut alice = sign_in(&store, "alice").await;

    let link = superyap_client::DeepLink::parse("https://superyap.app/?user=bob").unwrap();
    let contact = alice
        .session
        .handle_deep_link(&link, &mut alice.contacts)
        .await
        .unwrap()
        .unwrap();
    alice.messages.open(&contact.id).unwrap();
    alice.contacts.pump();

    assert!(alice.contacts.contains(&uid("bob")));
    assert_eq!(alice.messages.peer(), Some(&uid("bob")));
    assert_eq!(link.cleaned_url().as_str(), "https://superyap.app/");
}

#[tokio::test]
async fn removing_contacts_releases_subscriptions() {
    let store = Arc::new(LocalStore::in_memory().unwrap());
    let mut alice = sign_in(&store, "alice").await;
    let _bob = sign_in(&store, "bob").await;
    let _carol = sign_in(&store, "carol").await;

    alice.contacts.add_contact(&uid("bob")).await.unwrap();
    alice.contacts.add_contact(&uid("carol")).await.unwrap();
    alice.contacts.pump();
    alice.messages.open(&uid("bob")).unwrap();

    // bob and carol start their own contact lists too
    let engines = store.subscriber_count();
    assert_eq!(alice.contacts.watched().count(), 2);

    alice.contacts.remove_contact(&uid("carol")).await.unwrap();
    alice.contacts.pump();
    assert_eq!(store.subscriber_count(), engines - 1);

    alice.contacts.stop();
    alice.messages.close();
    assert_eq!(store.subscriber_count(), engines - 4);
}

#[tokio::test]
async fn two_tabs_share_one_database() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("superyap.db");

    {
        let store = Arc::new(LocalStore::open_at(&db_path).unwrap());
        let mut alice = sign_in(&store, "alice").await;
        let mut tab = MessageSyncEngine::new(store.clone(), uid("alice"));
        tab.open(&uid("bob")).unwrap();

        alice.messages.open(&uid("bob")).unwrap();
        alice.messages.send("from tab one").await.unwrap();
        tab.pump();
        assert_eq!(tab.decoded()[0].body, Body::Text("from tab one".into()));
    }

    let store = LocalStore::from_database(Database::open_at(&db_path).unwrap(), None).unwrap();
    let profile = store.read(&user_path(&uid("alice"))).await.unwrap();
    assert!(profile.is_some());
    let conversation = ConversationPath::resolve(&uid("alice"), &uid("bob"));
    assert!(store.read(conversation.as_path()).await.unwrap().is_some());
}
