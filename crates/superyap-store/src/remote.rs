//! Firebase Realtime Database over its REST API.
//!
//! Reads and mutations are plain HTTP calls on `{base}/{path}.json`.
//! Subscriptions open an event stream per path in a tokio task, mirror the
//! subscribed value locally and forward a snapshot after every event. When
//! the stream cannot be opened or ends, the listener gets one failed
//! snapshot saying why.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use superyap_shared::constants::ID_FIELD;
use superyap_shared::StorePath;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, StoreError};
use crate::push_id::PushIdGenerator;
use crate::sse::{SseEvent, SseParser};
use crate::store::{
    apply_set_op, normalize_set, set_member_path, KeyValueStore, SetOp, Snapshot,
    SubscriptionFailure, SubscriptionHandle, SubscriptionId,
};
use crate::tree;

/// Event-stream tasks by subscription.
#[derive(Default)]
struct StreamSet {
    tasks: Mutex<HashMap<SubscriptionId, AbortHandle>>,
}

impl StreamSet {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionId, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, id: SubscriptionId, task: AbortHandle) {
        self.lock().insert(id, task);
    }

    fn cancel(&self, id: SubscriptionId) {
        if let Some(task) = self.lock().remove(&id) {
            task.abort();
            debug!(subscription = %id, "event stream aborted");
        }
    }

    fn cancel_all(&self) {
        for (_, task) in self.lock().drain() {
            task.abort();
        }
    }
}

struct RemoteInner {
    client: Client,
    base: Url,
    auth_token: Option<String>,
    push_ids: Mutex<PushIdGenerator>,
    streams: Arc<StreamSet>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<RemoteInner>,
}

impl RemoteStore {
    /// `database_url` is the database root, e.g.
    /// `https://my-app-default-rtdb.firebaseio.com`. `auth_token` is sent as
    /// the `auth` query parameter.
    pub fn new(database_url: &str, auth_token: Option<String>) -> Result<Self> {
        let base = Url::parse(database_url)
            .map_err(|e| StoreError::Connectivity(format!("invalid database URL: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::Connectivity(format!(
                "invalid database URL: {database_url}"
            )));
        }

        let client = Client::builder()
            .build()
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;

        info!(url = %base, authenticated = auth_token.is_some(), "remote store configured");

        Ok(Self {
            inner: Arc::new(RemoteInner {
                client,
                base,
                auth_token,
                push_ids: Mutex::new(PushIdGenerator::new()),
                streams: Arc::new(StreamSet::default()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// REST endpoint for `path`.
    pub fn endpoint(&self, path: &StorePath) -> Result<Url> {
        let mut url = self.inner.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::Connectivity("invalid database URL".into()))?;
            segments.pop_if_empty();
            match path.segments().split_last() {
                Some((last, parents)) => {
                    segments.extend(parents);
                    segments.push(&format!("{last}.json"));
                }
                None => {
                    segments.push(".json");
                }
            }
        }
        if let Some(ref token) = self.inner.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    async fn execute(&self, request: RequestBuilder, path: &StorePath) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;
        check_status(response.status(), path)?;
        Ok(response)
    }

    async fn put(&self, path: &StorePath, value: &Value) -> Result<()> {
        self.ensure_open()?;
        let request = self.inner.client.put(self.endpoint(path)?).json(value);
        self.execute(request, path).await?;
        Ok(())
    }
}

fn check_status(status: StatusCode, path: &StorePath) -> Result<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            warn!(path = %path, %status, "remote store refused operation");
            Err(StoreError::PermissionDenied(path.to_string()))
        }
        s => Err(StoreError::Connectivity(format!("{s} at {path}"))),
    }
}

#[async_trait]
impl KeyValueStore for RemoteStore {
    async fn read(&self, path: &StorePath) -> Result<Option<Value>> {
        self.ensure_open()?;
        let request = self.inner.client.get(self.endpoint(path)?);
        let value: Value = self
            .execute(request, path)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;
        Ok(if value.is_null() { None } else { Some(value) })
    }

    async fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        if value.is_null() {
            return self.delete(path).await;
        }
        self.put(path, &value).await
    }

    async fn append(&self, path: &StorePath, mut record: Value) -> Result<String> {
        let key = self
            .inner
            .push_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_id(Utc::now().timestamp_millis());

        if let Value::Object(ref mut fields) = record {
            fields.insert(ID_FIELD.to_string(), Value::String(key.clone()));
        }
        self.put(&path.child(&key)?, &record).await?;
        Ok(key)
    }

    async fn patch(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        self.ensure_open()?;
        for field in fields.keys() {
            path.child(field)?;
        }
        if fields.is_empty() {
            return Ok(());
        }
        let request = self.inner.client.patch(self.endpoint(path)?).json(&fields);
        self.execute(request, path).await?;
        Ok(())
    }

    async fn delete(&self, path: &StorePath) -> Result<()> {
        self.ensure_open()?;
        let request = self.inner.client.delete(self.endpoint(path)?);
        self.execute(request, path).await?;
        Ok(())
    }

    async fn merge_field(&self, path: &StorePath, key: &str, op: SetOp) -> Result<()> {
        let member = set_member_path(path, key, &op)?;
        let set = path.child(key)?;
        if let Some(mut members) = self.read(&set).await?.as_ref().and_then(normalize_set) {
            debug!(path = %set, "rewriting legacy set");
            apply_set_op(&mut members, &op);
            let value = if members.is_empty() {
                Value::Null
            } else {
                Value::Object(members)
            };
            return self.write(&set, value).await;
        }
        match op {
            SetOp::Insert(_) => self.put(&member, &Value::Bool(true)).await,
            // The server drops parents left empty.
            SetOp::Remove(_) => self.delete(&member).await,
        }
    }

    fn subscribe(
        &self,
        path: &StorePath,
        listener: mpsc::UnboundedSender<Snapshot>,
    ) -> Result<SubscriptionHandle> {
        self.ensure_open()?;
        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;

        let url = self.endpoint(path)?;
        let id = SubscriptionId::next();
        let task = runtime.spawn(stream_events(
            self.inner.client.clone(),
            url,
            id,
            path.clone(),
            listener,
        ));
        self.inner.streams.insert(id, task.abort_handle());

        debug!(path = %path, subscription = %id, "event stream opened");

        let streams = Arc::downgrade(&self.inner.streams);
        Ok(SubscriptionHandle::new(id, path.clone(), move || {
            if let Some(streams) = streams.upgrade() {
                streams.cancel(id);
            }
        }))
    }

    async fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.streams.cancel_all();
            info!("remote store closed");
        }
    }
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum StreamStep {
    Changed,
    Idle,
    End(&'static str),
}

#[derive(Deserialize)]
struct EventPayload {
    path: String,
    data: Value,
}

fn split_path(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/').filter(|s| !s.is_empty()).map(str::to_string)
}

/// Fold one server event into the mirrored value of the subscribed path.
fn apply_event(mirror: &mut Value, event: &SseEvent) -> StreamStep {
    match event.event.as_str() {
        kind @ ("put" | "patch") => {
            let payload: EventPayload = match serde_json::from_str(&event.data) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "malformed event payload");
                    return StreamStep::Idle;
                }
            };
            let base: Vec<String> = split_path(&payload.path).collect();

            if kind == "put" {
                tree::set(mirror, &base, payload.data);
            } else if let Value::Object(fields) = payload.data {
                for (field, value) in fields {
                    let mut target = base.clone();
                    target.extend(split_path(&field));
                    tree::set(mirror, &target, value);
                }
            }
            tree::prune(mirror);
            StreamStep::Changed
        }
        "cancel" => StreamStep::End("cancelled by security rules"),
        "auth_revoked" => StreamStep::End("auth token revoked"),
        _ => StreamStep::Idle,
    }
}

async fn stream_events(
    client: Client,
    url: Url,
    id: SubscriptionId,
    path: StorePath,
    listener: mpsc::UnboundedSender<Snapshot>,
) {
    match follow(&client, url, id, &path, &listener).await {
        Ok(()) => debug!(path = %path, subscription = %id, "listener gone, event stream dropped"),
        Err(failure) => {
            warn!(path = %path, subscription = %id, %failure, "event stream ended");
            if listener.send(Snapshot::failed(id, path.clone(), failure)).is_err() {
                debug!(path = %path, "listener gone before failure");
            }
        }
    }
}

/// Forward snapshots until the listener goes away (`Ok`) or the stream
/// stops (`Err`).
async fn follow(
    client: &Client,
    url: Url,
    id: SubscriptionId,
    path: &StorePath,
    listener: &mpsc::UnboundedSender<Snapshot>,
) -> std::result::Result<(), SubscriptionFailure> {
    let response = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await
        .map_err(|e| SubscriptionFailure::Connectivity(e.to_string()))?;
    match check_status(response.status(), path) {
        Ok(()) => {}
        Err(StoreError::PermissionDenied(what)) => {
            return Err(SubscriptionFailure::PermissionDenied(what))
        }
        Err(e) => return Err(SubscriptionFailure::Connectivity(e.to_string())),
    }

    let mut body = response.bytes_stream();
    let mut parser = SseParser::default();
    let mut mirror = Value::Null;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| SubscriptionFailure::Connectivity(e.to_string()))?;

        for event in parser.push(&chunk) {
            match apply_event(&mut mirror, &event) {
                StreamStep::Changed => {
                    let value = if mirror.is_null() { None } else { Some(mirror.clone()) };
                    if listener.send(Snapshot::new(id, path.clone(), value)).is_err() {
                        return Ok(());
                    }
                }
                StreamStep::Idle => {}
                StreamStep::End(reason) => {
                    return Err(SubscriptionFailure::PermissionDenied(format!("{path}: {reason}")))
                }
            }
        }
    }

    Err(SubscriptionFailure::Connectivity(format!(
        "event stream for {path} closed by server"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(path: &str) -> StorePath {
        StorePath::parse(path).unwrap()
    }

    fn event(kind: &str, data: Value) -> SseEvent {
        SseEvent {
            event: kind.into(),
            data: data.to_string(),
        }
    }

    #[test]
    fn endpoint_layout() {
        let store = RemoteStore::new("https://demo.firebaseio.com/", Some("tok".into())).unwrap();
        assert_eq!(
            store.endpoint(&p("chats/alice_bob")).unwrap().as_str(),
            "https://demo.firebaseio.com/chats/alice_bob.json?auth=tok"
        );
        assert_eq!(
            store.endpoint(&StorePath::root()).unwrap().as_str(),
            "https://demo.firebaseio.com/.json?auth=tok"
        );

        let anon = RemoteStore::new("https://demo.firebaseio.com", None).unwrap();
        assert_eq!(
            anon.endpoint(&p("users/alice")).unwrap().as_str(),
            "https://demo.firebaseio.com/users/alice.json"
        );
    }

    #[test]
    fn rejects_unusable_url() {
        assert!(RemoteStore::new("not a url", None).is_err());
        assert!(RemoteStore::new("mailto:someone@example.com", None).is_err());
    }

    #[test]
    fn status_mapping() {
        let path = p("users/alice");
        assert!(check_status(StatusCode::OK, &path).is_ok());
        assert!(matches!(
            check_status(StatusCode::UNAUTHORIZED, &path),
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(matches!(
            check_status(StatusCode::FORBIDDEN, &path),
            Err(StoreError::PermissionDenied(_))
        ));
        assert!(matches!(
            check_status(StatusCode::SERVICE_UNAVAILABLE, &path),
            Err(StoreError::Connectivity(_))
        ));
    }

    #[test]
    fn events_fold_into_mirror() {
        let mut mirror = Value::Null;

        let initial = json!({"path": "/", "data": {"m1": {"content": "a"}}});
        assert_eq!(apply_event(&mut mirror, &event("put", initial)), StreamStep::Changed);

        let added = json!({"path": "/m2", "data": {"content": "b"}});
        apply_event(&mut mirror, &event("put", added));

        let reacted = json!({"path": "/m1", "data": {"reactions/👍/bob": true}});
        apply_event(&mut mirror, &event("patch", reacted));
        assert_eq!(
            mirror,
            json!({
                "m1": {"content": "a", "reactions": {"👍": {"bob": true}}},
                "m2": {"content": "b"}
            })
        );

        let removed = json!({"path": "/m1", "data": null});
        apply_event(&mut mirror, &event("put", removed));
        assert_eq!(mirror, json!({"m2": {"content": "b"}}));

        let cleared = json!({"path": "/", "data": null});
        apply_event(&mut mirror, &event("put", cleared));
        assert!(mirror.is_null());
    }

    #[test]
    fn control_events() {
        let mut mirror = json!({"a": 1});
        assert_eq!(apply_event(&mut mirror, &event("keep-alive", Value::Null)), StreamStep::Idle);
        assert!(matches!(
            apply_event(&mut mirror, &event("cancel", Value::Null)),
            StreamStep::End(_)
        ));
        assert!(matches!(
            apply_event(&mut mirror, &event("auth_revoked", json!("expired"))),
            StreamStep::End(_)
        ));
        let garbage = SseEvent {
            event: "put".into(),
            data: "{not json".into(),
        };
        assert_eq!(apply_event(&mut mirror, &garbage), StreamStep::Idle);
        assert_eq!(mirror, json!({"a": 1}));
    }

    #[test]
    fn subscribe_needs_runtime() {
        let store = RemoteStore::new("https://demo.firebaseio.com", None).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            store.subscribe(&p("users"), tx),
            Err(StoreError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn closed_store_refuses_without_network() {
        let store = RemoteStore::new("https://demo.firebaseio.com", None).unwrap();
        store.close().await;
        assert!(matches!(store.read(&p("users")).await, Err(StoreError::Closed)));
        assert!(matches!(
            store.write(&p("users/a"), json!(1)).await,
            Err(StoreError::Closed)
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(store.subscribe(&p("users"), tx), Err(StoreError::Closed)));
    }
}
