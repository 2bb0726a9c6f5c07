//! Storage primitives the updater is built on.
//!
//! The backing store has no multi-document transactions. Consistency comes
//! from four primitives: path-addressed document ops (with an all-or-nothing
//! batch), a lower-only sorted set for scheduling, time series for metrics,
//! and named distributed locks.

mod memory;
mod path;

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use memory::{MemoryGuard, MemoryStore};
pub use path::{DocOp, JsonPath, PathError, lookup};

use crate::error::StoreError;
use crate::model::{Aggregation, DataPoint};

/// One write of an [`DocumentStore::apply`] batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DocWrite {
    pub key: String,
    pub path: JsonPath,
    pub op: DocOp,
}

impl DocWrite {
    pub fn set(key: impl Into<String>, path: impl Into<JsonPath>, value: Value) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            op: DocOp::Set(value),
        }
    }

    pub fn incr_by(key: impl Into<String>, path: impl Into<JsonPath>, by: i64) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            op: DocOp::IncrBy(by),
        }
    }

    pub fn append(key: impl Into<String>, path: impl Into<JsonPath>, values: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
            op: DocOp::Append(values),
        }
    }

    /// Create the document at `key` with `value` unless it already exists.
    pub fn init(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            path: JsonPath::root(),
            op: DocOp::Init(value),
        }
    }
}

/// Path-addressed JSON documents keyed by string.
pub trait DocumentStore: Send + Sync {
    /// Read the subtree at `path`. `Ok(None)` when the key or path is absent.
    fn json_get(
        &self,
        key: &str,
        path: &JsonPath,
    ) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Atomically add `by` to the integer at `path`, returning the new value.
    fn json_incr_by(
        &self,
        key: &str,
        path: &JsonPath,
        by: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;

    /// Apply every write or none of them. Writes may span keys.
    fn apply(&self, writes: &[DocWrite]) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Remove the document at `key`. Returns whether it existed.
    fn json_del(&self, key: &str) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Replace the subtree at `path`. Setting the root creates the document.
    fn json_set(
        &self,
        key: &str,
        path: &JsonPath,
        value: Value,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let write = DocWrite {
            key: key.to_string(),
            path: path.clone(),
            op: DocOp::Set(value),
        };
        async move { self.apply(std::slice::from_ref(&write)).await }
    }
}

/// Sorted set used as the "next due" scheduling index.
pub trait ScheduleIndex: Send + Sync {
    /// Add `member` with `score`, or lower its score. Never raises an existing
    /// score. Returns whether the set changed.
    fn zadd_lt(
        &self,
        key: &str,
        member: &str,
        score: i64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn zscore(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<Option<i64>, StoreError>> + Send;

    /// Remove and return up to `limit` members with `score <= max_score`,
    /// lowest first. Each member is handed to exactly one caller.
    fn claim_due(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<(String, i64)>, StoreError>> + Send;
}

/// Append-only numeric series kept outside the user documents.
pub trait TimeSeries: Send + Sync {
    /// Create the series if absent. `retention_ms == 0` keeps every sample.
    /// Returns whether it was created.
    fn ts_create(
        &self,
        key: &str,
        retention_ms: i64,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Append a sample; a sample at an existing timestamp replaces it.
    fn ts_add(
        &self,
        key: &str,
        timestamp_ms: i64,
        value: f64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Samples with `from <= timestamp <= to`, oldest first.
    fn ts_range(
        &self,
        key: &str,
        from: i64,
        to: i64,
    ) -> impl Future<Output = Result<Vec<DataPoint>, StoreError>> + Send;

    /// Like [`TimeSeries::ts_range`], reduced per `bucket_ms` bucket.
    fn ts_range_aggr(
        &self,
        key: &str,
        from: i64,
        to: i64,
        aggregation: Aggregation,
        bucket_ms: i64,
    ) -> impl Future<Output = Result<Vec<DataPoint>, StoreError>> + Send;
}

/// A held lock. Dropping a guard also frees the lock, but callers should
/// release explicitly to observe failures.
pub trait LockGuard: Send {
    fn release(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Named mutual exclusion shared by every worker using the same backend.
pub trait Locks: Send + Sync {
    type Guard: LockGuard;

    /// Wait at most `timeout` for the lock; `StoreError::LockTimeout` otherwise.
    fn acquire(
        &self,
        name: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<Self::Guard, StoreError>> + Send;
}

/// A backend providing every primitive.
pub trait Store: DocumentStore + ScheduleIndex + TimeSeries + Locks {}

impl<T: DocumentStore + ScheduleIndex + TimeSeries + Locks> Store for T {}

/// Run a store future with a deadline.
pub async fn bounded<T>(
    timeout: Duration,
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StoreError::Timeout(timeout))?
}

/// Read and deserialize the subtree at `path`.
pub async fn read_json<S, T>(store: &S, key: &str, path: &JsonPath) -> Result<Option<T>, StoreError>
where
    S: DocumentStore,
    T: DeserializeOwned,
{
    match store.json_get(key, path).await? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

pub(crate) fn path_error(key: &str, path: &JsonPath, err: PathError) -> StoreError {
    match err {
        PathError::Missing => StoreError::NotFound {
            key: key.to_string(),
            path: path.to_string(),
        },
        PathError::WrongType(expected) => StoreError::WrongType {
            key: key.to_string(),
            path: path.to_string(),
            expected,
        },
    }
}
