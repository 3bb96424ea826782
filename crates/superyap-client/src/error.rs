use superyap_shared::{MessageId, SharedError, UserId};
use superyap_store::{StoreError, SubscriptionFailure};
use thiserror::Error;

/// Failures surfaced by the sync engines. Every one of them ends the
/// operation that raised it; nothing is retried.
#[derive(Error, Debug)]
pub enum SyncError {
    /// `add_contact` with an id that has no profile.
    #[error("No user with id {0}")]
    LookupNotFound(UserId),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage quota exceeded ({used} of {limit} bytes)")]
    StorageQuotaExceeded { used: u64, limit: u64 },

    #[error("You cannot add yourself as a contact")]
    SelfContact,

    #[error("{0} is not in the contact list")]
    UnknownContact(UserId),

    #[error("Message {0} not found")]
    MessageNotFound(MessageId),

    #[error("Message {0} was sent by someone else")]
    NotOwner(MessageId),

    #[error("No conversation is open")]
    NoActiveConversation,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed record at {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error(transparent)]
    Shared(#[from] SharedError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::PermissionDenied(what) => SyncError::PermissionDenied(what),
            StoreError::StorageQuotaExceeded { used, limit } => {
                SyncError::StorageQuotaExceeded { used, limit }
            }
            StoreError::Shared(e) => SyncError::Shared(e),
            other => SyncError::Store(other),
        }
    }
}

impl From<SubscriptionFailure> for SyncError {
    fn from(failure: SubscriptionFailure) -> Self {
        StoreError::from(failure).into()
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
