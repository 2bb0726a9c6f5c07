use std::time::Duration;

use thiserror::Error;

/// Errors raised by the storage primitives.
///
/// A missing document or path on *read* is not an error: reads return
/// `Ok(None)` so callers can branch on it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no value at {path} in {key}")]
    NotFound { key: String, path: String },

    #[error("value at {path} in {key} is not {expected}")]
    WrongType {
        key: String,
        path: String,
        expected: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("lock '{name}' not acquired within {timeout:?}")]
    LockTimeout { name: String, timeout: Duration },

    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed document {key}: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Timeout(_) | StoreError::LockTimeout { .. } => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

/// Coarse classification of tick failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A document or map tile was absent.
    NotFound,
    /// A queued action that must never have been enqueued.
    InvalidAction,
    /// Timeout or connection failure; the tick can be retried as is.
    TransientStore,
    /// The user's lock could not be taken within the retry budget.
    LockTimeout,
    /// Anything else. The user's state was left unchanged.
    Fatal,
}

/// Errors that abort a user's tick. No partial patch is ever committed
/// for the user that failed.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("no town at ({x}, {y})")]
    NoTown { x: i32, y: i32 },

    #[error("document {0} does not exist")]
    MissingDocument(String),

    #[error("user {user_id} cannot raid their own town at ({x}, {y})")]
    SelfTarget { user_id: String, x: i32, y: i32 },

    #[error("lock for user {user_id} not acquired after {attempts} attempts")]
    LockExhausted { user_id: String, attempts: u32 },

    #[error("travel queue of user {0} changed since it was read; resolved prefix no longer leads it")]
    QueueConflict(String),

    #[error("map lookup failed: {0}")]
    Map(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TickError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TickError::NoTown { .. } | TickError::MissingDocument(_) => ErrorKind::NotFound,
            TickError::SelfTarget { .. } => ErrorKind::InvalidAction,
            TickError::LockExhausted { .. } => ErrorKind::LockTimeout,
            TickError::Store(e) if e.is_retryable() => ErrorKind::TransientStore,
            TickError::QueueConflict(_) | TickError::Map(_) | TickError::Store(_) => {
                ErrorKind::Fatal
            }
        }
    }
}
