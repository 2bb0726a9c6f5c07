use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::path::{self, DocOp, JsonPath};
use super::{DocWrite, DocumentStore, LockGuard, Locks, ScheduleIndex, TimeSeries, path_error};
use crate::error::StoreError;
use crate::model::series::bucket_start;
use crate::model::{Aggregation, DataPoint};

#[derive(Debug, Default)]
struct Inner {
    docs: HashMap<String, Value>,
    sorted_sets: HashMap<String, HashMap<String, i64>>,
    series: HashMap<String, Series>,
}

#[derive(Debug, Default)]
struct Series {
    retention_ms: i64,
    points: BTreeMap<i64, f64>,
}

/// In-process backend. Clones share the same data and locks, so several
/// workers in one process see one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether some guard currently holds `name`.
    pub async fn is_locked(&self, name: &str) -> bool {
        let locks = self.locks.lock().await;
        locks.get(name).is_some_and(|l| l.try_lock().is_err())
    }
}

impl DocumentStore for MemoryStore {
    async fn json_get(&self, key: &str, path: &JsonPath) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .docs
            .get(key)
            .and_then(|doc| path::lookup(doc, path))
            .cloned())
    }

    async fn json_incr_by(&self, key: &str, path: &JsonPath, by: i64) -> Result<i64, StoreError> {
        let mut inner = self.inner.lock().await;
        let doc = inner
            .docs
            .get_mut(key)
            .ok_or_else(|| path_error(key, path, path::PathError::Missing))?;
        match path::apply(doc, path, &DocOp::IncrBy(by)) {
            Ok(Some(n)) => Ok(n),
            Ok(None) => Err(path_error(key, path, path::PathError::WrongType("an integer"))),
            Err(e) => Err(path_error(key, path, e)),
        }
    }

    async fn apply(&self, writes: &[DocWrite]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        // Work on copies of the touched documents; publish only if all succeed.
        let mut staged: HashMap<&str, Option<Value>> = HashMap::new();
        for write in writes {
            let key = write.key.as_str();
            let doc = staged
                .entry(key)
                .or_insert_with(|| inner.docs.get(key).cloned());
            match (&write.op, doc.as_mut()) {
                (DocOp::Init(_), _) if !write.path.is_root() => {
                    return Err(StoreError::InvalidArgument(format!(
                        "init below the root of {key}"
                    )));
                }
                (DocOp::Init(_), Some(_)) => {}
                (DocOp::Init(value), None) => *doc = Some(value.clone()),
                (DocOp::Set(value), None) if write.path.is_root() => *doc = Some(value.clone()),
                (_, None) => return Err(path_error(key, &write.path, path::PathError::Missing)),
                (op, Some(current)) => {
                    path::apply(current, &write.path, op)
                        .map_err(|e| path_error(key, &write.path, e))?;
                }
            }
        }

        for (key, doc) in staged {
            if let Some(doc) = doc {
                inner.docs.insert(key.to_string(), doc);
            }
        }
        Ok(())
    }

    async fn json_del(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.docs.remove(key).is_some())
    }
}

impl ScheduleIndex for MemoryStore {
    async fn zadd_lt(&self, key: &str, member: &str, score: i64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let set = inner.sorted_sets.entry(key.to_string()).or_default();
        match set.get_mut(member) {
            Some(current) if *current <= score => Ok(false),
            Some(current) => {
                *current = score;
                Ok(true)
            }
            None => {
                set.insert(member.to_string(), score);
                Ok(true)
            }
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sorted_sets
            .get(key)
            .and_then(|set| set.get(member))
            .copied())
    }

    async fn claim_due(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(set) = inner.sorted_sets.get_mut(key) else {
            return Ok(Vec::new());
        };

        let mut due: Vec<(String, i64)> = set
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        due.truncate(limit);

        for (member, _) in &due {
            set.remove(member);
        }
        Ok(due)
    }
}

impl TimeSeries for MemoryStore {
    async fn ts_create(&self, key: &str, retention_ms: i64) -> Result<bool, StoreError> {
        if retention_ms < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "negative retention {retention_ms} for {key}"
            )));
        }
        let mut inner = self.inner.lock().await;
        if inner.series.contains_key(key) {
            return Ok(false);
        }
        inner.series.insert(
            key.to_string(),
            Series {
                retention_ms,
                points: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn ts_add(&self, key: &str, timestamp_ms: i64, value: f64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let series = inner.series.get_mut(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
            path: ".".to_string(),
        })?;
        series.points.insert(timestamp_ms, value);

        if series.retention_ms > 0 {
            if let Some((&latest, _)) = series.points.last_key_value() {
                let cutoff = latest.saturating_sub(series.retention_ms);
                series.points = series.points.split_off(&cutoff);
            }
        }
        Ok(())
    }

    async fn ts_range(&self, key: &str, from: i64, to: i64) -> Result<Vec<DataPoint>, StoreError> {
        let inner = self.inner.lock().await;
        let series = inner.series.get(key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
            path: ".".to_string(),
        })?;
        if from > to {
            return Ok(Vec::new());
        }
        Ok(series
            .points
            .range(from..=to)
            .map(|(&timestamp, &value)| DataPoint { timestamp, value })
            .collect())
    }

    async fn ts_range_aggr(
        &self,
        key: &str,
        from: i64,
        to: i64,
        aggregation: Aggregation,
        bucket_ms: i64,
    ) -> Result<Vec<DataPoint>, StoreError> {
        if bucket_ms <= 0 {
            return Err(StoreError::InvalidArgument(format!(
                "bucket size must be positive, got {bucket_ms}"
            )));
        }
        let points = self.ts_range(key, from, to).await?;

        let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for p in points {
            buckets
                .entry(bucket_start(p.timestamp, bucket_ms))
                .or_default()
                .push(p.value);
        }
        Ok(buckets
            .into_iter()
            .filter_map(|(timestamp, values)| {
                aggregation
                    .reduce(&values)
                    .map(|value| DataPoint { timestamp, value })
            })
            .collect())
    }
}

type LockTable = Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Guard of a [`MemoryStore`] lock. The table entry for a name goes away
/// once nobody holds or waits on it.
#[derive(Debug)]
pub struct MemoryGuard {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl MemoryGuard {
    fn unlock(&mut self, locks: &mut HashMap<String, Arc<Mutex<()>>>) {
        drop(self.guard.take());
        forget_idle(locks, &self.name);
    }
}

/// Drop the entry for `name` if the table holds the only reference.
fn forget_idle(locks: &mut HashMap<String, Arc<Mutex<()>>>, name: &str) {
    if locks.get(name).is_some_and(|l| Arc::strong_count(l) == 1) {
        locks.remove(name);
    }
}

impl LockGuard for MemoryGuard {
    async fn release(mut self) -> Result<(), StoreError> {
        let table = self.table.clone();
        let mut locks = table.lock().await;
        self.unlock(&mut locks);
        Ok(())
    }
}

impl Drop for MemoryGuard {
    fn drop(&mut self) {
        if self.guard.is_none() {
            return;
        }
        let table = self.table.clone();
        // A busy table keeps the entry; the next release of that name tidies it.
        match table.try_lock() {
            Ok(mut locks) => self.unlock(&mut locks),
            Err(_) => drop(self.guard.take()),
        }
    }
}

impl Locks for MemoryStore {
    type Guard = MemoryGuard;

    async fn acquire(&self, name: &str, timeout: Duration) -> Result<MemoryGuard, StoreError> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(name.to_string()).or_default().clone()
        };
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(MemoryGuard {
                name: name.to_string(),
                guard: Some(guard),
                table: self.locks.clone(),
            }),
            Err(_) => {
                let mut locks = self.locks.lock().await;
                forget_idle(&mut locks, name);
                Err(StoreError::LockTimeout {
                    name: name.to_string(),
                    timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::bounded;

    #[tokio::test]
    async fn get_distinguishes_missing_key_and_path() {
        let store = MemoryStore::new();
        store
            .json_set("doc", &JsonPath::root(), json!({ "a": { "b": 1 } }))
            .await
            .unwrap();

        assert_eq!(store.json_get("doc", &".a.b".into()).await.unwrap(), Some(json!(1)));
        assert_eq!(store.json_get("doc", &".a.c".into()).await.unwrap(), None);
        assert_eq!(store.json_get("nope", &JsonPath::root()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_below_root_of_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .json_set("doc", &".a".into(), json!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn incr_by_returns_new_value() {
        let store = MemoryStore::new();
        store
            .json_set("doc", &JsonPath::root(), json!({ "n": 10 }))
            .await
            .unwrap();
        assert_eq!(store.json_incr_by("doc", &".n".into(), 5).await.unwrap(), 15);
        assert_eq!(store.json_incr_by("doc", &".n".into(), -20).await.unwrap(), -5);
        assert!(store.json_incr_by("doc", &".m".into(), 1).await.is_err());
    }

    #[tokio::test]
    async fn failed_batch_changes_nothing() {
        let store = MemoryStore::new();
        store
            .json_set("a", &JsonPath::root(), json!({ "n": 1 }))
            .await
            .unwrap();

        let writes = [
            DocWrite::set("a", ".n", json!(2)),
            DocWrite::set("b", JsonPath::root(), json!([])),
            DocWrite::incr_by("a", ".missing", 1),
        ];
        assert!(store.apply(&writes).await.is_err());

        assert_eq!(store.json_get("a", &".n".into()).await.unwrap(), Some(json!(1)));
        assert_eq!(store.json_get("b", &JsonPath::root()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn batch_spans_keys() {
        let store = MemoryStore::new();
        let writes = [
            DocWrite::set("reports", JsonPath::root(), json!([])),
            DocWrite::append("reports", JsonPath::root(), vec![json!("r1"), json!("r2")]),
            DocWrite::set("state", JsonPath::root(), json!({ "coins": 3 })),
        ];
        store.apply(&writes).await.unwrap();
        assert_eq!(
            store.json_get("reports", &JsonPath::root()).await.unwrap(),
            Some(json!(["r1", "r2"]))
        );
        assert_eq!(store.json_get("state", &".coins".into()).await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn zadd_lt_only_lowers() {
        let store = MemoryStore::new();
        assert!(store.zadd_lt("due", "u1", 100).await.unwrap());
        assert!(!store.zadd_lt("due", "u1", 150).await.unwrap());
        assert_eq!(store.zscore("due", "u1").await.unwrap(), Some(100));
        assert!(store.zadd_lt("due", "u1", 50).await.unwrap());
        assert_eq!(store.zscore("due", "u1").await.unwrap(), Some(50));
        assert_eq!(store.zscore("due", "u2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn claim_due_removes_lowest_first() {
        let store = MemoryStore::new();
        store.zadd_lt("due", "late", 300).await.unwrap();
        store.zadd_lt("due", "b", 100).await.unwrap();
        store.zadd_lt("due", "a", 100).await.unwrap();
        store.zadd_lt("due", "c", 200).await.unwrap();

        let claimed = store.claim_due("due", 250, 2).await.unwrap();
        assert_eq!(claimed, vec![("a".to_string(), 100), ("b".to_string(), 100)]);

        let rest = store.claim_due("due", 250, 10).await.unwrap();
        assert_eq!(rest, vec![("c".to_string(), 200)]);
        assert_eq!(store.zscore("due", "late").await.unwrap(), Some(300));
    }

    #[tokio::test]
    async fn series_retention_and_aggregation() {
        let store = MemoryStore::new();
        assert!(store.ts_create("coins", 1_500).await.unwrap());
        assert!(!store.ts_create("coins", 5).await.unwrap());

        for (t, v) in [(0, 1.0), (500, 3.0), (1_200, 5.0), (1_700, 7.0)] {
            store.ts_add("coins", t, v).await.unwrap();
        }
        // 0 is older than 1_700 - 1_500 and has been trimmed.
        let all = store.ts_range("coins", i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0], DataPoint { timestamp: 500, value: 3.0 });

        let avg = store
            .ts_range_aggr("coins", 0, 2_000, Aggregation::Avg, 1_000)
            .await
            .unwrap();
        assert_eq!(
            avg,
            vec![
                DataPoint { timestamp: 0, value: 3.0 },
                DataPoint { timestamp: 1_000, value: 6.0 },
            ]
        );

        assert!(store.ts_add("missing", 0, 1.0).await.is_err());
        assert!(matches!(
            store.ts_range_aggr("coins", 0, 1, Aggregation::Sum, 0).await,
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_released() {
        let store = MemoryStore::new();
        let guard = store.acquire("user-update:u1", Duration::from_millis(50)).await.unwrap();
        assert!(store.is_locked("user-update:u1").await);

        let err = store
            .acquire("user-update:u1", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LockTimeout { .. }));

        // Different names never contend.
        let other = store.acquire("user-update:u2", Duration::from_millis(20)).await.unwrap();
        other.release().await.unwrap();

        guard.release().await.unwrap();
        assert!(!store.is_locked("user-update:u1").await);
        store
            .acquire("user-update:u1", Duration::from_millis(20))
            .await
            .unwrap()
            .release()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lock_table_forgets_released_names() {
        let store = MemoryStore::new();
        for n in 0..50 {
            let name = format!("user-update:u{n}");
            store
                .acquire(&name, Duration::from_millis(20))
                .await
                .unwrap()
                .release()
                .await
                .unwrap();
        }
        drop(store.acquire("dropped", Duration::from_millis(20)).await.unwrap());

        let held = store.acquire("held", Duration::from_millis(20)).await.unwrap();
        assert!(store.acquire("held", Duration::from_millis(5)).await.is_err());
        assert_eq!(store.locks.lock().await.len(), 1);

        held.release().await.unwrap();
        assert!(store.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn init_creates_only_missing_documents() {
        let store = MemoryStore::new();
        store
            .json_set("kept", &JsonPath::root(), json!(["old"]))
            .await
            .unwrap();
        let writes = [
            DocWrite::init("kept", json!([])),
            DocWrite::init("fresh", json!([])),
            DocWrite::append("fresh", JsonPath::root(), vec![json!("new")]),
        ];
        store.apply(&writes).await.unwrap();
        assert_eq!(store.json_get("kept", &JsonPath::root()).await.unwrap(), Some(json!(["old"])));
        assert_eq!(store.json_get("fresh", &JsonPath::root()).await.unwrap(), Some(json!(["new"])));

        assert!(store.json_del("fresh").await.unwrap());
        assert!(!store.json_del("fresh").await.unwrap());
        assert_eq!(store.json_get("fresh", &JsonPath::root()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn bounded_maps_elapsed_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, StoreError>(())
        };
        let err = bounded(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }
}
