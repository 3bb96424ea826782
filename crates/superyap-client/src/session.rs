//! Session startup: sign-in against the store and the one-shot deep link.

use std::sync::Arc;

use serde_json::Value;
use superyap_shared::constants::{DEFAULT_AVATAR, ID_FIELD};
use superyap_shared::paths::user_path;
use superyap_shared::{Contact, ProfileUpdate, UserId, UserProfile};
use superyap_store::{KeyValueStore, SessionCache};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::contacts::ContactSyncEngine;
use crate::conversation::MessageSyncEngine;
use crate::deep_link::DeepLink;
use crate::error::{Result, SyncError};

/// Characters of the id used for the fallback display name.
const FALLBACK_NAME_CHARS: usize = 5;

/// What the login provider tells us about the user.
#[derive(Debug, Clone)]
pub struct Identity {
    pub external_id: UserId,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl Identity {
    pub fn new(external_id: UserId) -> Self {
        Self {
            external_id,
            display_name: None,
            photo_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Random local address, for running without a login provider.
    pub fn local() -> Self {
        Self::new(UserId::generate_address())
    }
}

pub struct Session {
    store: Arc<dyn KeyValueStore>,
    cache: Option<Arc<SessionCache>>,
    profile: UserProfile,
    deep_link_handled: bool,
}

impl Session {
    /// Load the user's profile, creating it on first sign-in.
    pub async fn start(
        store: Arc<dyn KeyValueStore>,
        identity: &Identity,
        cache: Option<Arc<SessionCache>>,
    ) -> Result<Self> {
        let id = &identity.external_id;
        let path = user_path(id);

        let profile = match store.read(&path).await? {
            Some(record) => {
                let profile = parse_profile(id, record).map_err(|e| SyncError::Malformed {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
                debug!(user = %id, "profile loaded");
                profile
            }
            None => {
                let profile = new_profile(identity);
                let value = serde_json::to_value(&profile).map_err(|e| SyncError::Malformed {
                    path: path.to_string(),
                    reason: e.to_string(),
                })?;
                store.write(&path, value).await?;
                info!(user = %id, username = %profile.username, "Profile created");
                profile
            }
        };

        let session = Self {
            store,
            cache,
            profile,
            deep_link_handled: false,
        };
        session.cache_profile();
        Ok(session)
    }

    /// Start a session for a fresh local identity.
    pub async fn start_local(
        store: Arc<dyn KeyValueStore>,
        cache: Option<Arc<SessionCache>>,
    ) -> Result<Self> {
        Self::start(store, &Identity::local(), cache).await
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn user_id(&self) -> &UserId {
        &self.profile.id
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// A contact engine for this user, seeded from the cache. Call
    /// [`ContactSyncEngine::start`] to go live.
    pub fn contact_engine(&self, config: &ClientConfig) -> ContactSyncEngine {
        let mut engine = ContactSyncEngine::new(Arc::clone(&self.store), self.user_id().clone())
            .with_obfuscation_key(config.obfuscation_key.clone())
            .with_mutual_removal(config.mutual_removal);
        let cached = self.cached_contacts();
        if !cached.is_empty() {
            debug!(count = cached.len(), "warm start from cache");
            engine.warm_start(cached);
        }
        engine
    }

    pub fn message_engine(&self, config: &ClientConfig) -> MessageSyncEngine {
        MessageSyncEngine::new(Arc::clone(&self.store), self.user_id().clone())
            .with_obfuscation_key(config.obfuscation_key.clone())
    }

    /// Apply a profile edit. The whole record is written back.
    pub async fn update_profile(&mut self, update: &ProfileUpdate) -> Result<&UserProfile> {
        let mut profile = self.profile.clone();
        profile.apply(update);

        let path = user_path(&profile.id);
        let value = serde_json::to_value(&profile).map_err(|e| SyncError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        self.store.write(&path, value).await?;

        info!(user = %profile.id, "Profile updated");
        self.profile = profile;
        self.cache_profile();
        Ok(&self.profile)
    }

    /// Act on an "add me" link. Runs at most once per session.
    ///
    /// Returns the contact whose conversation should be opened: the existing
    /// entry, or a newly added one. Links to the local user do nothing.
    pub async fn handle_deep_link(
        &mut self,
        link: &DeepLink,
        contacts: &mut ContactSyncEngine,
    ) -> Result<Option<Contact>> {
        if self.deep_link_handled {
            return Ok(None);
        }
        self.deep_link_handled = true;

        let Some(target) = link.target() else {
            return Ok(None);
        };
        if target == self.user_id() {
            debug!("deep link points at the local user");
            return Ok(None);
        }
        if let Some(existing) = contacts.get(target) {
            return Ok(Some(existing.clone()));
        }

        let contact = contacts.add_contact(target).await?;
        info!(contact = %target, "Contact added from deep link");
        Ok(Some(contact))
    }

    pub fn deep_link_handled(&self) -> bool {
        self.deep_link_handled
    }

    /// Save the current contact list for the next warm start.
    pub fn persist_contacts(&self, engine: &ContactSyncEngine) -> Result<()> {
        if let Some(ref cache) = self.cache {
            cache.save_contacts(&engine.sorted())?;
        }
        Ok(())
    }

    pub fn cached_contacts(&self) -> Vec<Contact> {
        let Some(ref cache) = self.cache else {
            return Vec::new();
        };
        match cache.load_contacts() {
            Ok(contacts) => contacts,
            Err(e) => {
                warn!(error = %e, "session cache unreadable");
                Vec::new()
            }
        }
    }

    /// Forget the cached session. Store data is untouched.
    pub fn sign_out(self) -> Result<()> {
        if let Some(ref cache) = self.cache {
            cache.clear()?;
        }
        info!(user = %self.profile.id, "Signed out");
        Ok(())
    }

    fn cache_profile(&self) {
        if let Some(ref cache) = self.cache {
            if let Err(e) = cache.save_profile(&self.profile) {
                warn!(error = %e, "profile not cached");
            }
        }
    }
}

fn new_profile(identity: &Identity) -> UserProfile {
    let id = identity.external_id.clone();
    let username = identity
        .display_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| format!("User_{}", id.prefix(FALLBACK_NAME_CHARS)));
    let avatar = identity
        .photo_url
        .clone()
        .unwrap_or_else(|| DEFAULT_AVATAR.to_string());
    UserProfile {
        id,
        username,
        avatar,
        hashing_key: UserProfile::new_master_key(),
    }
}

fn parse_profile(id: &UserId, mut record: Value) -> serde_json::Result<UserProfile> {
    if let Value::Object(ref mut fields) = record {
        fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    }
    serde_json::from_value(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use superyap_store::LocalStore;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    #[tokio::test]
    async fn first_start_creates_profile() {
        let store = Arc::new(LocalStore::in_memory().unwrap());
        let cache = Arc::new(SessionCache::in_memory().unwrap());
        let identity = Identity::new(uid("0xabcdef12"));

        let session = Session::start(store.clone(), &identity, Some(cache.clone()))
            .await
            .unwrap();
        assert_eq!(session.profile().username, "User_0xabc");
        assert_eq!(session.profile().avatar, "robohash");
        assert!(session.profile().hashing_key.starts_with("master_key_"));

        let stored = store.read(&user_path(&uid("0xabcdef12"))).await.unwrap().unwrap();
        assert_eq!(stored["username"], json!("User_0xabc"));
        assert_eq!(cache.load_profile().unwrap().as_ref(), Some(session.profile()));
    }

    #[tokio::test]
    async fn existing_profile_is_kept() {
        let store = Arc::new(LocalStore::in_memory().unwrap());
        store
            .write(
                &user_path(&uid("alice")),
                json!({"username": "Alice", "avatar": "sprite:3", "hashingKey": "master_key_aaaaaaa"}),
            )
            .await
            .unwrap();

        let identity = Identity::new(uid("alice")).with_display_name("Provider Name");
        let session = Session::start(store, &identity, None).await.unwrap();
        assert_eq!(session.profile().username, "Alice");
        assert_eq!(session.profile().avatar, "sprite:3");
    }

    #[tokio::test]
    async fn identity_details_seed_new_profile() {
        let store = Arc::new(LocalStore::in_memory().unwrap());
        let identity = Identity::new(uid("dana"))
            .with_display_name("Dana")
            .with_photo_url("https://img.example/dana.png");
        let session = Session::start(store, &identity, None).await.unwrap();
        assert_eq!(session.profile().username, "Dana");
        assert_eq!(session.profile().avatar, "https://img.example/dana.png");
    }

    #[tokio::test]
    async fn update_profile_overwrites_record() {
        let store = Arc::new(LocalStore::in_memory().unwrap());
        let cache = Arc::new(SessionCache::in_memory().unwrap());
        let mut session = Session::start(store.clone(), &Identity::new(uid("erin")), Some(cache.clone()))
            .await
            .unwrap();

        let update = ProfileUpdate {
            username: Some("Erin".into()),
            avatar: None,
        };
        session.update_profile(&update).await.unwrap();

        let stored = store.read(&user_path(&uid("erin"))).await.unwrap().unwrap();
        assert_eq!(stored["username"], json!("Erin"));
        assert_eq!(stored["avatar"], json!("robohash"));
        assert_eq!(cache.load_profile().unwrap().unwrap().username, "Erin");
    }

    #[tokio::test]
    async fn deep_link_runs_once_and_skips_self() {
        let store = Arc::new(LocalStore::in_memory().unwrap());
        Session::start(store.clone(), &Identity::new(uid("bob")), None)
            .await
            .unwrap();
        let mut session = Session::start(store.clone(), &Identity::new(uid("alice")), None)
            .await
            .unwrap();
        let config = ClientConfig::default();
        let mut contacts = session.contact_engine(&config);

        let own = DeepLink::parse("https://superyap.app/?user=alice").unwrap();
        assert!(session.handle_deep_link(&own, &mut contacts).await.unwrap().is_none());
        assert!(session.deep_link_handled());

        let link = DeepLink::parse("https://superyap.app/?user=bob").unwrap();
        assert!(session.handle_deep_link(&link, &mut contacts).await.unwrap().is_none());
        assert!(store
            .read(&superyap_shared::paths::contact_path(&uid("alice"), &uid("bob")))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deep_link_adds_contact() {
        let store = Arc::new(LocalStore::in_memory().unwrap());
        Session::start(store.clone(), &Identity::new(uid("bob")), None)
            .await
            .unwrap();
        let mut session = Session::start(store.clone(), &Identity::new(uid("alice")), None)
            .await
            .unwrap();
        let mut contacts = session.contact_engine(&ClientConfig::default());
        contacts.start().unwrap();
        contacts.pump();

        let link = DeepLink::parse("https://superyap.app/?user=bob").unwrap();
        let contact = session
            .handle_deep_link(&link, &mut contacts)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(contact.id, uid("bob"));
        assert_eq!(contact.username, "User_bob");

        contacts.pump();
        assert!(contacts.contains(&uid("bob")));
    }

    #[tokio::test]
    async fn contacts_persist_for_warm_start() {
        let store = Arc::new(LocalStore::in_memory().unwrap());
        let cache = Arc::new(SessionCache::in_memory().unwrap());
        Session::start(store.clone(), &Identity::new(uid("bob")), None)
            .await
            .unwrap();
        let session = Session::start(store.clone(), &Identity::new(uid("alice")), Some(cache.clone()))
            .await
            .unwrap();

        let mut contacts = session.contact_engine(&ClientConfig::default());
        contacts.start().unwrap();
        contacts.add_contact(&uid("bob")).await.unwrap();
        contacts.pump();
        session.persist_contacts(&contacts).unwrap();

        let warm = session.contact_engine(&ClientConfig::default());
        assert!(warm.contains(&uid("bob")));
        assert!(!warm.is_loaded());

        session.sign_out().unwrap();
        assert!(cache.load_contacts().unwrap().is_empty());
        assert!(cache.load_profile().unwrap().is_none());
    }
}
