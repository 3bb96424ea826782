//! # superyap-client
//!
//! The realtime sync layer of the Super Yap chat client.
//!
//! A [`Session`] signs the user in against the store, then hands out the two
//! engines that keep local state in step with it:
//!
//! - [`ContactSyncEngine`] mirrors the contact list and keeps one preview
//!   subscription per contact.
//! - [`MessageSyncEngine`] mirrors the single open conversation and issues
//!   sends, deletions and reactions.
//!
//! Engines never update their state from their own writes. Every change,
//! local or remote, arrives as a store snapshot and is applied by
//! `next_event` / `pump`.

pub mod config;
pub mod contacts;
pub mod conversation;
pub mod deep_link;
pub mod events;
pub mod session;
pub mod subscription_set;

mod error;

pub use config::{Backend, ClientConfig};
pub use contacts::ContactSyncEngine;
pub use conversation::{DecodedMessage, MessageSyncEngine, ReactionChange};
pub use deep_link::DeepLink;
pub use error::{Result, SyncError};
pub use events::{ContactEvent, ContactView, MessageEvent, MessageView};
pub use session::{Identity, Session};
pub use subscription_set::SubscriptionSet;
