//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so the client runs against a local store in
//! the platform data directory with zero configuration.

use std::path::PathBuf;
use std::sync::Arc;

use superyap_shared::ObfuscationKey;
use superyap_store::{Database, KeyValueStore, LocalStore, RemoteStore, SessionCache};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// SQLite-backed store on this machine.
    Local,
    /// Firebase Realtime Database.
    Remote,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Env: `SUPERYAP_BACKEND` (`local` / `remote`)
    /// Default: `local`
    pub backend: Backend,

    /// Database file for the local store and the session cache.
    /// Env: `SUPERYAP_DB_PATH`
    /// Default: platform data directory.
    pub db_path: Option<PathBuf>,

    /// Env: `SUPERYAP_DATABASE_URL`
    /// Required for the remote backend.
    pub database_url: Option<String>,

    /// Env: `SUPERYAP_AUTH_TOKEN`
    pub auth_token: Option<String>,

    /// Cap on locally persisted bytes.
    /// Env: `SUPERYAP_QUOTA_BYTES`
    /// Default: unlimited.
    pub quota_bytes: Option<u64>,

    /// Must match every other participant's key.
    /// Env: `SUPERYAP_OBFUSCATION_KEY`
    pub obfuscation_key: ObfuscationKey,

    /// Also drop the local user from the removed contact's list.
    /// Env: `SUPERYAP_MUTUAL_REMOVAL` (true/false)
    /// Default: `false`
    pub mutual_removal: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Local,
            db_path: None,
            database_url: None,
            auth_token: None,
            quota_bytes: None,
            obfuscation_key: ObfuscationKey::default(),
            mutual_removal: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("SUPERYAP_BACKEND") {
            match val.to_ascii_lowercase().as_str() {
                "local" => config.backend = Backend::Local,
                "remote" | "firebase" => config.backend = Backend::Remote,
                _ => tracing::warn!(value = %val, "Invalid SUPERYAP_BACKEND, using local"),
            }
        }

        if let Some(path) = lookup("SUPERYAP_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(url) = lookup("SUPERYAP_DATABASE_URL") {
            if !url.is_empty() {
                config.database_url = Some(url);
            }
        }

        if let Some(token) = lookup("SUPERYAP_AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = Some(token);
            }
        }

        if let Some(val) = lookup("SUPERYAP_QUOTA_BYTES") {
            match val.parse::<u64>() {
                Ok(limit) => config.quota_bytes = Some(limit),
                Err(_) => tracing::warn!(value = %val, "Invalid SUPERYAP_QUOTA_BYTES, ignoring"),
            }
        }

        if let Some(key) = lookup("SUPERYAP_OBFUSCATION_KEY") {
            match ObfuscationKey::new(&key) {
                Ok(key) => config.obfuscation_key = key,
                Err(e) => tracing::warn!(error = %e, "Invalid SUPERYAP_OBFUSCATION_KEY, using default"),
            }
        }

        if let Some(val) = lookup("SUPERYAP_MUTUAL_REMOVAL") {
            config.mutual_removal = val == "true" || val == "1";
        }

        config
    }

    /// Open the configured backend.
    pub fn open_store(&self) -> Result<Arc<dyn KeyValueStore>> {
        match self.backend {
            Backend::Local => {
                let db = match self.db_path {
                    Some(ref path) => Database::open_at(path)?,
                    None => Database::open_default()?,
                };
                Ok(Arc::new(LocalStore::from_database(db, self.quota_bytes)?))
            }
            Backend::Remote => {
                let url = self.database_url.as_deref().ok_or_else(|| {
                    SyncError::Config("SUPERYAP_DATABASE_URL is required for the remote backend".into())
                })?;
                Ok(Arc::new(RemoteStore::new(url, self.auth_token.clone())?))
            }
        }
    }

    /// Open the warm-start cache. It always lives on this machine.
    pub fn open_cache(&self) -> Result<SessionCache> {
        let db = match self.db_path {
            Some(ref path) => Database::open_at(path)?,
            None => Database::open_default()?,
        };
        Ok(SessionCache::new(db))
    }
}
