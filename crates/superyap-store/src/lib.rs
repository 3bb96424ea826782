//! # superyap-store
//!
//! The path-addressed key-value store behind the Super Yap sync layer.
//!
//! [`KeyValueStore`] is implemented twice: [`LocalStore`] keeps the whole tree
//! in memory and persists it to SQLite, and [`RemoteStore`] talks to a
//! Firebase Realtime Database over its REST and event-stream API. Both
//! deliver changes to subscribers as [`Snapshot`]s over tokio channels.
//!
//! [`SessionCache`] holds the warm-start copy of the signed-in profile and
//! contact list.

pub mod database;
pub mod local;
pub mod migrations;
pub mod push_id;
pub mod remote;
pub mod session_cache;
pub mod store;

mod error;
mod nodes;
mod sse;
mod subscriptions;
mod tree;

pub use database::Database;
pub use error::{Result, StoreError};
pub use local::LocalStore;
pub use remote::RemoteStore;
pub use session_cache::SessionCache;
pub use store::{
    KeyValueStore, SetOp, Snapshot, SubscriptionFailure, SubscriptionHandle, SubscriptionId,
};
