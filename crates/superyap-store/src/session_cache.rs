//! Warm-start copy of the signed-in session.
//!
//! The profile and contact list are cached so the UI can render before the
//! first snapshot arrives. The store stays the source of truth.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use superyap_shared::{Contact, UserProfile};

use crate::database::Database;
use crate::error::Result;

const PROFILE_KEY: &str = "super_chat_user";
const CONTACTS_KEY: &str = "super_chat_contacts";

impl Database {
    pub(crate) fn put_cache_entry(&self, key: &str, json: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO session_cache (key, json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET json = excluded.json, updated_at = excluded.updated_at",
            params![key, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub(crate) fn get_cache_entry(&self, key: &str) -> Result<Option<String>> {
        let json = self
            .conn()
            .query_row(
                "SELECT json FROM session_cache WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json)
    }

    pub(crate) fn clear_cache(&self) -> Result<()> {
        self.conn().execute("DELETE FROM session_cache", [])?;
        Ok(())
    }
}

pub struct SessionCache {
    db: Mutex<Database>,
}

impl SessionCache {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.db().put_cache_entry(key, &json)
    }

    /// A corrupt entry is treated as missing.
    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(json) = self.db().get_cache_entry(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding unreadable session cache entry");
                Ok(None)
            }
        }
    }

    pub fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        self.save(PROFILE_KEY, profile)
    }

    pub fn load_profile(&self) -> Result<Option<UserProfile>> {
        self.load(PROFILE_KEY)
    }

    pub fn save_contacts(&self, contacts: &[Contact]) -> Result<()> {
        self.save(CONTACTS_KEY, contacts)
    }

    pub fn load_contacts(&self) -> Result<Vec<Contact>> {
        Ok(self.load(CONTACTS_KEY)?.unwrap_or_default())
    }

    /// Forget the session, e.g. on sign-out.
    pub fn clear(&self) -> Result<()> {
        self.db().clear_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use superyap_shared::UserId;

    fn profile() -> UserProfile {
        UserProfile {
            id: UserId::new("alice").unwrap(),
            username: "Alice".into(),
            avatar: "robohash".into(),
            hashing_key: "master_key_abc1234".into(),
        }
    }

    #[test]
    fn profile_and_contacts_round_trip() {
        let cache = SessionCache::in_memory().unwrap();
        assert_eq!(cache.load_profile().unwrap(), None);
        assert!(cache.load_contacts().unwrap().is_empty());

        cache.save_profile(&profile()).unwrap();
        let bob = Contact::from_profile(&UserProfile {
            id: UserId::new("bob").unwrap(),
            ..profile()
        });
        cache.save_contacts(std::slice::from_ref(&bob)).unwrap();

        assert_eq!(cache.load_profile().unwrap(), Some(profile()));
        assert_eq!(cache.load_contacts().unwrap(), vec![bob]);

        cache.clear().unwrap();
        assert_eq!(cache.load_profile().unwrap(), None);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        SessionCache::open_at(&path).unwrap().save_profile(&profile()).unwrap();
        let cache = SessionCache::open_at(&path).unwrap();
        assert_eq!(cache.load_profile().unwrap().unwrap().username, "Alice");
    }

    #[test]
    fn corrupt_entry_reads_as_missing() {
        let cache = SessionCache::in_memory().unwrap();
        cache.db().put_cache_entry(PROFILE_KEY, "{oops").unwrap();
        assert_eq!(cache.load_profile().unwrap(), None);
    }
}
