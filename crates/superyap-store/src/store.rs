use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};
use superyap_shared::types::is_valid_key;
use superyap_shared::StorePath;
use tokio::sync::mpsc;

use crate::error::{Result, StoreError};

/// Process-unique id of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Why a subscription stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFailure {
    PermissionDenied(String),
    Connectivity(String),
}

impl fmt::Display for SubscriptionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionFailure::PermissionDenied(what) => write!(f, "permission denied: {what}"),
            SubscriptionFailure::Connectivity(what) => write!(f, "connectivity: {what}"),
        }
    }
}

impl From<SubscriptionFailure> for StoreError {
    fn from(failure: SubscriptionFailure) -> Self {
        match failure {
            SubscriptionFailure::PermissionDenied(what) => StoreError::PermissionDenied(what),
            SubscriptionFailure::Connectivity(what) => StoreError::Connectivity(what),
        }
    }
}

/// The value at a subscribed path after a change. `None` when absent.
///
/// A snapshot carrying a `failure` is the last one the subscription sends.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub subscription: SubscriptionId,
    pub path: StorePath,
    pub value: Option<Value>,
    pub failure: Option<SubscriptionFailure>,
}

impl Snapshot {
    pub fn new(subscription: SubscriptionId, path: StorePath, value: Option<Value>) -> Self {
        Self {
            subscription,
            path,
            value,
            failure: None,
        }
    }

    pub fn failed(
        subscription: SubscriptionId,
        path: StorePath,
        failure: SubscriptionFailure,
    ) -> Self {
        Self {
            subscription,
            path,
            value: None,
            failure: Some(failure),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.failure.is_some()
    }
}

/// Membership change for a set stored as `{ member: true }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOp {
    Insert(String),
    Remove(String),
}

impl SetOp {
    pub fn member(&self) -> &str {
        match self {
            SetOp::Insert(m) | SetOp::Remove(m) => m,
        }
    }
}

/// Deregisters its subscription when disposed or dropped.
#[must_use = "dropping the handle ends the subscription"]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    path: StorePath,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        path: StorePath,
        cancel: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            path,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Stop deliveries. A no-op once the store is closed.
    pub fn dispose(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish()
    }
}

/// A durable, path-addressed JSON store with change notification.
///
/// Writing `null` anywhere is a delete, and objects left empty by a change
/// disappear. Every successful mutation is persisted before any subscriber
/// is told about it, and the subscriber that caused it is told as well.
/// Nothing is retried.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Latest known value at `path`.
    async fn read(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Replace the whole value at `path`.
    async fn write(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Store `record` under a fresh push key below `path` and return the key.
    /// Object records get an `id` field holding the key.
    async fn append(&self, path: &StorePath, record: Value) -> Result<String>;

    /// Shallow merge. `null` field values delete the field.
    async fn patch(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()>;

    async fn delete(&self, path: &StorePath) -> Result<()>;

    /// Add or remove one member of the set at `path/key` without touching
    /// any other member or key. The last removal drops `key` itself.
    async fn merge_field(&self, path: &StorePath, key: &str, op: SetOp) -> Result<()>;

    /// Deliver the value at `path` now and again whenever a change lands
    /// on, above or below it. If the backend drops the subscription, one
    /// last snapshot carries the reason.
    fn subscribe(
        &self,
        path: &StorePath,
        listener: mpsc::UnboundedSender<Snapshot>,
    ) -> Result<SubscriptionHandle>;

    /// Stop all subscriptions and refuse further operations.
    async fn close(&self);
}

/// The member path touched by a [`KeyValueStore::merge_field`] call.
pub(crate) fn set_member_path(path: &StorePath, key: &str, op: &SetOp) -> Result<StorePath> {
    Ok(path.child(key)?.child(op.member())?)
}

/// Rewrite a set written by an older client (`["alice", "bob"]`, or
/// `{"0": "alice"}` once the database has turned the array into an object)
/// as `{member: true}`. `None` when `value` already has that form.
pub(crate) fn normalize_set(value: &Value) -> Option<Map<String, Value>> {
    let members: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Value::Object(fields) if fields.values().all(|v| *v == Value::Bool(true)) => return None,
        Value::Object(fields) => fields
            .iter()
            .filter_map(|(key, v)| match v {
                Value::Bool(true) => Some(key.clone()),
                Value::String(member) => Some(member.clone()),
                _ => None,
            })
            .collect(),
        _ => return None,
    };
    Some(
        members
            .into_iter()
            .filter(|member| is_valid_key(member))
            .map(|member| (member, Value::Bool(true)))
            .collect(),
    )
}

/// Apply `op` to a set already in `{member: true}` form.
pub(crate) fn apply_set_op(set: &mut Map<String, Value>, op: &SetOp) {
    match op {
        SetOp::Insert(member) => {
            set.insert(member.clone(), Value::Bool(true));
        }
        SetOp::Remove(member) => {
            set.remove(member);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_sets_are_normalized() {
        assert_eq!(
            normalize_set(&json!(["alice", "bob", null, "a.b"])),
            Some(json!({"alice": true, "bob": true}).as_object().unwrap().clone())
        );
        assert_eq!(
            normalize_set(&json!({"0": "alice", "carol": true})),
            Some(json!({"alice": true, "carol": true}).as_object().unwrap().clone())
        );
        assert_eq!(normalize_set(&json!({"alice": true})), None);
        assert_eq!(normalize_set(&json!("leaf")), None);
    }

    #[test]
    fn set_op_touches_one_member() {
        let mut set = json!({"alice": true, "bob": true}).as_object().unwrap().clone();
        apply_set_op(&mut set, &SetOp::Remove("alice".into()));
        apply_set_op(&mut set, &SetOp::Insert("carol".into()));
        assert_eq!(Value::Object(set), json!({"bob": true, "carol": true}));
    }
}
