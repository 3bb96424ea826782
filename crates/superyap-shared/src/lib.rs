//! # superyap-shared
//!
//! Types shared by every Super Yap crate: identifiers, the store path scheme,
//! the persisted data model, message obfuscation and preview rendering.

pub mod constants;
pub mod error;
pub mod models;
pub mod obfuscation;
pub mod paths;
pub mod preview;
pub mod types;

pub use error::SharedError;
pub use models::{Contact, Message, NewMessage, ProfileUpdate, ReactionMap, UserProfile};
pub use obfuscation::{Body, ObfuscationKey};
pub use types::{ConversationPath, MessageId, StorePath, UserId};
