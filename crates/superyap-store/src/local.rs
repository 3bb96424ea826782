//! SQLite-backed local store.
//!
//! The whole tree lives in memory. Each top-level root (`users`, `chats`) is
//! persisted as one row, so a mutation rewrites exactly one row before any
//! subscriber is notified. Clones share the tree and the listener registry,
//! which is how several windows of the app see each other's writes.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use superyap_shared::constants::ID_FIELD;
use superyap_shared::{SharedError, StorePath};
use tokio::sync::mpsc;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::push_id::PushIdGenerator;
use crate::store::{
    normalize_set, set_member_path, KeyValueStore, SetOp, Snapshot, SubscriptionHandle,
};
use crate::subscriptions::Registry;
use crate::tree;

struct LocalState {
    tree: Value,
    db: Database,
    root_bytes: HashMap<String, u64>,
    /// `PRAGMA data_version` when `tree` was last synced with the file.
    data_version: i64,
}

impl LocalState {
    fn used_bytes(&self) -> u64 {
        self.root_bytes.values().sum()
    }
}

struct Inner {
    state: Mutex<LocalState>,
    registry: Arc<Registry>,
    push_ids: Mutex<PushIdGenerator>,
    quota: Option<u64>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<Inner>,
}

impl LocalStore {
    /// Open the store in the platform data directory.
    pub fn open_default() -> Result<Self> {
        Self::from_database(Database::open_default()?, None)
    }

    /// Open (or create) a store backed by the database file at `path`.
    pub fn open_at(path: &Path) -> Result<Self> {
        Self::from_database(Database::open_at(path)?, None)
    }

    /// A store that persists nothing across restarts.
    pub fn in_memory() -> Result<Self> {
        Self::from_database(Database::open_in_memory()?, None)
    }

    /// Load the persisted tree from `db`. `quota` caps the total size of the
    /// persisted JSON in bytes.
    pub fn from_database(db: Database, quota: Option<u64>) -> Result<Self> {
        let data_version = db.data_version()?;
        let (tree, root_bytes) = load_tree(&db)?;

        tracing::info!(
            roots = tree.as_object().map_or(0, Map::len),
            bytes = root_bytes.values().sum::<u64>(),
            quota = ?quota,
            "local store loaded"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LocalState {
                    tree,
                    db,
                    root_bytes,
                    data_version,
                }),
                registry: Arc::new(Registry::default()),
                push_ids: Mutex::new(PushIdGenerator::new()),
                quota,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Open (or create) a store at `path`, capping persisted JSON at `limit`
    /// bytes.
    pub fn open_with_quota(path: &Path, limit: u64) -> Result<Self> {
        Self::from_database(Database::open_at(path)?, Some(limit))
    }

    /// Bytes of persisted JSON currently counted against the quota.
    pub fn used_bytes(&self) -> u64 {
        self.state().used_bytes()
    }

    /// Number of live subscriptions across every handle on this tree.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Pick up roots committed by another connection to the same file and
    /// tell the subscribers whose subtree moved.
    fn refresh(&self, state: &mut LocalState) -> Result<()> {
        let version = state.db.data_version()?;
        if version == state.data_version {
            return Ok(());
        }
        state.data_version = version;

        let (tree, root_bytes) = load_tree(&state.db)?;
        let before = std::mem::replace(&mut state.tree, tree);
        state.root_bytes = root_bytes;

        let mut keys: BTreeSet<String> = BTreeSet::new();
        for value in [&before, &state.tree] {
            if let Value::Object(roots) = value {
                keys.extend(roots.keys().cloned());
            }
        }
        let changed: Vec<StorePath> = keys
            .into_iter()
            .filter(|key| before.get(key) != state.tree.get(key))
            .map(|key| StorePath::root().child(&key))
            .collect::<std::result::Result<_, _>>()?;

        tracing::debug!(roots = changed.len(), "picked up writes from another connection");
        let tree = &state.tree;
        for path in &changed {
            self.inner
                .registry
                .notify(path, |target| tree::get(tree, target.segments()).cloned());
        }
        Ok(())
    }

    /// Apply `change` to a copy of the root subtree containing `path`,
    /// persist it, then publish it to the tree and the subscribers.
    ///
    /// The write runs in an immediate transaction after a refresh, so a
    /// second process on the same file cannot have its root overwritten by
    /// a stale copy.
    fn mutate<F>(&self, path: &StorePath, change: F) -> Result<()>
    where
        F: FnOnce(&mut Value, &[String]) -> Result<()>,
    {
        self.ensure_open()?;
        let Some((root_key, rest)) = path.segments().split_first() else {
            return Err(SharedError::InvalidPath(String::new()).into());
        };

        let mut state = self.state();

        state.db.conn().execute_batch("BEGIN IMMEDIATE")?;
        let staged = self.stage(&mut state, path, root_key, rest, change);
        let end = if matches!(staged, Ok(Some(_))) { "COMMIT" } else { "ROLLBACK" };
        if let Err(e) = state.db.conn().execute_batch(end) {
            if staged.is_ok() {
                return Err(e.into());
            }
            tracing::warn!(path = %path, error = %e, "rollback failed");
        }
        let Some((candidate, new_bytes)) = staged? else {
            return Ok(());
        };

        if let Value::Object(ref mut roots) = state.tree {
            if candidate.is_null() {
                roots.remove(root_key);
            } else {
                roots.insert(root_key.clone(), candidate);
            }
        }
        if new_bytes == 0 {
            state.root_bytes.remove(root_key);
        } else {
            state.root_bytes.insert(root_key.clone(), new_bytes);
        }

        tracing::debug!(path = %path, bytes = new_bytes, "local mutation persisted");

        let tree = &state.tree;
        self.inner
            .registry
            .notify(path, |target| tree::get(tree, target.segments()).cloned());
        Ok(())
    }

    /// Build and save the new root inside the open transaction. `None` when
    /// the change leaves the root as it was.
    fn stage<F>(
        &self,
        state: &mut LocalState,
        path: &StorePath,
        root_key: &str,
        rest: &[String],
        change: F,
    ) -> Result<Option<(Value, u64)>>
    where
        F: FnOnce(&mut Value, &[String]) -> Result<()>,
    {
        self.refresh(state)?;

        let current = state.tree.get(root_key).cloned().unwrap_or(Value::Null);
        let mut candidate = current.clone();
        change(&mut candidate, rest)?;
        tree::prune(&mut candidate);

        if candidate == current {
            return Ok(None);
        }

        let json = if candidate.is_null() {
            None
        } else {
            Some(serde_json::to_string(&candidate)?)
        };
        let new_bytes = json.as_ref().map_or(0, |j| j.len() as u64);

        if let Some(limit) = self.inner.quota {
            let old_bytes = state.root_bytes.get(root_key).copied().unwrap_or(0);
            let used = state.used_bytes() - old_bytes + new_bytes;
            if new_bytes > old_bytes && used > limit {
                tracing::warn!(path = %path, used, limit, "storage quota exceeded");
                return Err(StoreError::StorageQuotaExceeded { used, limit });
            }
        }

        match json {
            Some(ref json) => state.db.save_root(root_key, json)?,
            None => {
                state.db.delete_root(root_key)?;
            }
        }
        Ok(Some((candidate, new_bytes)))
    }
}

fn load_tree(db: &Database) -> Result<(Value, HashMap<String, u64>)> {
    let mut root = Map::new();
    let mut root_bytes = HashMap::new();
    for stored in db.load_roots()? {
        let value: Value = serde_json::from_str(&stored.json)?;
        root_bytes.insert(stored.root.clone(), stored.bytes);
        root.insert(stored.root, value);
    }
    Ok((Value::Object(root), root_bytes))
}

#[async_trait]
impl KeyValueStore for LocalStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>> {
        self.ensure_open()?;
        let mut state = self.state();
        self.refresh(&mut state)?;
        Ok(tree::get(&state.tree, path.segments()).cloned())
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        self.mutate(path, |subtree, rest| {
            tree::set(subtree, rest, value);
            Ok(())
        })
    }

    async fn append(&self, path: &StorePath, mut record: Value) -> Result<String> {
        let key = self
            .inner
            .push_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_id(Utc::now().timestamp_millis());
        let target = path.child(&key)?;

        if let Value::Object(ref mut fields) = record {
            fields.insert(ID_FIELD.to_string(), Value::String(key.clone()));
        }

        self.mutate(&target, |subtree, rest| {
            tree::set(subtree, rest, record);
            Ok(())
        })?;
        Ok(key)
    }

    async fn patch(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        let children = fields
            .into_iter()
            .map(|(field, value)| Ok((path.child(&field)?, value)))
            .collect::<Result<Vec<_>>>()?;

        // Children share the root segment with `path`.
        self.mutate(path, |subtree, _| {
            for (child, value) in children {
                tree::set(subtree, &child.segments()[1..], value);
            }
            Ok(())
        })
    }

    async fn delete(&self, path: &StorePath) -> Result<()> {
        self.mutate(path, |subtree, rest| {
            tree::remove(subtree, rest);
            Ok(())
        })
    }

    async fn merge_field(&self, path: &StorePath, key: &str, op: SetOp) -> Result<()> {
        let member = set_member_path(path, key, &op)?;
        self.mutate(&member, |subtree, rest| {
            if let Some((_, set)) = rest.split_last() {
                if let Some((_, record)) = set.split_last() {
                    match tree::get(subtree, record) {
                        None | Some(Value::Object(_)) => {}
                        Some(_) => return Err(StoreError::NotAnObject(path.to_string())),
                    }
                }
                if let Some(members) = tree::get(subtree, set).and_then(normalize_set) {
                    tracing::debug!(path = %path, key, "rewriting legacy set");
                    tree::set(subtree, set, Value::Object(members));
                }
            }
            match op {
                SetOp::Insert(_) => tree::set(subtree, rest, Value::Bool(true)),
                SetOp::Remove(_) => tree::remove(subtree, rest),
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        path: &StorePath,
        listener: mpsc::UnboundedSender<Snapshot>,
    ) -> Result<SubscriptionHandle> {
        self.ensure_open()?;

        // Holding the tree lock orders the initial snapshot before any change.
        let mut state = self.state();
        self.refresh(&mut state)?;
        let handle = self.inner.registry.register(path.clone(), listener.clone());
        let initial = Snapshot::new(
            handle.id(),
            path.clone(),
            tree::get(&state.tree, path.segments()).cloned(),
        );
        if listener.send(initial).is_err() {
            tracing::debug!(path = %path, "listener gone before first snapshot");
        }

        tracing::debug!(path = %path, subscription = %handle.id(), "subscribed");
        Ok(handle)
    }

    async fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.registry.clear();
            tracing::info!("local store closed");
        }
    }
}
