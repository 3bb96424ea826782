use superyap_shared::SharedError;
use thiserror::Error;

/// Errors produced by the store layer. None of them are retried here.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend refused the operation (security rules, bad token).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The backend could not be reached or answered with an unexpected status.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Local persistence is full. The mutation was not applied.
    #[error("Storage quota exceeded ({used} of {limit} bytes)")]
    StorageQuotaExceeded { used: u64, limit: u64 },

    #[error(transparent)]
    Shared(#[from] SharedError),

    /// The store has been closed.
    #[error("Store is closed")]
    Closed,

    /// A patch or set merge addressed a value that cannot hold fields.
    #[error("Expected an object at {0}")]
    NotAnObject(String),

    /// Subscriptions on the remote backend need a running tokio runtime.
    #[error("No tokio runtime available")]
    NoRuntime,

    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
