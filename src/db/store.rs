use std::time::Duration;

use serde_json::Value;
use sqlx::{PgConnection, PgPool};

use super::lock::PgLockGuard;
use crate::error::StoreError;
use crate::model::{Aggregation, DataPoint};
use crate::store::{
    DocOp, DocWrite, DocumentStore, JsonPath, Locks, ScheduleIndex, TimeSeries,
};

/// Storage primitives over a Postgres pool.
///
/// Documents are JSONB rows; path operations map onto `#>`, `jsonb_set` and
/// `||`. Locks are session-level advisory locks.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_poll: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_poll: Duration::from_millis(25),
        }
    }

    /// Interval between advisory-lock attempts while waiting.
    pub fn with_lock_poll(mut self, interval: Duration) -> Self {
        self.lock_poll = interval;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn pg_path(path: &JsonPath) -> Vec<String> {
    path.segments().to_vec()
}

/// Explain why a conditional update matched no row.
async fn write_failure(
    conn: &mut PgConnection,
    key: &str,
    path: &JsonPath,
    expected: &'static str,
) -> StoreError {
    let found: Result<Option<Option<String>>, sqlx::Error> =
        sqlx::query_scalar("SELECT jsonb_typeof(doc #> $2) FROM documents WHERE key = $1")
            .bind(key)
            .bind(pg_path(path))
            .fetch_optional(&mut *conn)
            .await;
    match found {
        Ok(Some(Some(_))) => StoreError::WrongType {
            key: key.to_string(),
            path: path.to_string(),
            expected,
        },
        Ok(_) => StoreError::NotFound {
            key: key.to_string(),
            path: path.to_string(),
        },
        Err(e) => StoreError::Database(e),
    }
}

async fn set(
    conn: &mut PgConnection,
    key: &str,
    path: &JsonPath,
    value: &Value,
) -> Result<(), StoreError> {
    let Some((parent, _)) = path.split_last() else {
        sqlx::query(
            "INSERT INTO documents (key, doc) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET doc = EXCLUDED.doc",
        )
        .bind(key)
        .bind(value)
        .execute(&mut *conn)
        .await?;
        return Ok(());
    };

    let updated = sqlx::query(
        "UPDATE documents SET doc = jsonb_set(doc, $2, $3, true) \
         WHERE key = $1 AND jsonb_typeof(doc #> $4) IN ('object', 'array')",
    )
    .bind(key)
    .bind(pg_path(path))
    .bind(value)
    .bind(pg_path(&parent))
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(write_failure(conn, key, &parent, "an object or array").await);
    }
    Ok(())
}

async fn incr_by(
    conn: &mut PgConnection,
    key: &str,
    path: &JsonPath,
    by: i64,
) -> Result<i64, StoreError> {
    let sql = if path.is_root() {
        "UPDATE documents SET doc = to_jsonb((doc #>> $2)::bigint + $3) \
         WHERE key = $1 AND jsonb_typeof(doc) = 'number' \
         RETURNING (doc #>> $2)::bigint"
    } else {
        "UPDATE documents SET doc = jsonb_set(doc, $2, to_jsonb((doc #>> $2)::bigint + $3)) \
         WHERE key = $1 AND jsonb_typeof(doc #> $2) = 'number' \
         RETURNING (doc #>> $2)::bigint"
    };
    let next: Option<i64> = sqlx::query_scalar(sql)
        .bind(key)
        .bind(pg_path(path))
        .bind(by)
        .fetch_optional(&mut *conn)
        .await?;

    match next {
        Some(n) => Ok(n),
        None => Err(write_failure(conn, key, path, "an integer").await),
    }
}

async fn append(
    conn: &mut PgConnection,
    key: &str,
    path: &JsonPath,
    values: &[Value],
) -> Result<(), StoreError> {
    let sql = if path.is_root() {
        "UPDATE documents SET doc = doc || $3 \
         WHERE key = $1 AND jsonb_typeof(doc #> $2) = 'array'"
    } else {
        "UPDATE documents SET doc = jsonb_set(doc, $2, (doc #> $2) || $3) \
         WHERE key = $1 AND jsonb_typeof(doc #> $2) = 'array'"
    };
    let updated = sqlx::query(sql)
        .bind(key)
        .bind(pg_path(path))
        .bind(Value::Array(values.to_vec()))
        .execute(&mut *conn)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(write_failure(conn, key, path, "an array").await);
    }
    Ok(())
}

async fn apply_write(conn: &mut PgConnection, write: &DocWrite) -> Result<(), StoreError> {
    match &write.op {
        DocOp::Set(value) => set(conn, &write.key, &write.path, value).await,
        DocOp::IncrBy(by) => incr_by(conn, &write.key, &write.path, *by).await.map(|_| ()),
        DocOp::Append(values) => append(conn, &write.key, &write.path, values).await,
        DocOp::Init(_) if !write.path.is_root() => Err(StoreError::InvalidArgument(format!(
            "init below the root of {}",
            write.key
        ))),
        DocOp::Init(value) => {
            sqlx::query("INSERT INTO documents (key, doc) VALUES ($1, $2) ON CONFLICT (key) DO NOTHING")
                .bind(&write.key)
                .bind(value)
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
    }
}

impl DocumentStore for PgStore {
    async fn json_get(&self, key: &str, path: &JsonPath) -> Result<Option<Value>, StoreError> {
        let row: Option<Option<Value>> =
            sqlx::query_scalar("SELECT doc #> $2 FROM documents WHERE key = $1")
                .bind(key)
                .bind(pg_path(path))
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.flatten())
    }

    async fn json_incr_by(&self, key: &str, path: &JsonPath, by: i64) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        incr_by(&mut conn, key, path, by).await
    }

    async fn apply(&self, writes: &[DocWrite]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for write in writes {
            apply_write(&mut tx, write).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn json_del(&self, key: &str) -> Result<bool, StoreError> {
        let deleted = sqlx::query("DELETE FROM documents WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }
}

impl ScheduleIndex for PgStore {
    async fn zadd_lt(&self, key: &str, member: &str, score: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO sorted_sets (key, member, score) VALUES ($1, $2, $3) \
             ON CONFLICT (key, member) DO UPDATE SET score = EXCLUDED.score \
             WHERE sorted_sets.score > EXCLUDED.score",
        )
        .bind(key)
        .bind(member)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError> {
        let score = sqlx::query_scalar("SELECT score FROM sorted_sets WHERE key = $1 AND member = $2")
            .bind(key)
            .bind(member)
            .fetch_optional(&self.pool)
            .await?;
        Ok(score)
    }

    async fn claim_due(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut claimed: Vec<(String, i64)> = sqlx::query_as(
            "DELETE FROM sorted_sets s \
             USING ( \
                 SELECT member FROM sorted_sets \
                 WHERE key = $1 AND score <= $2 \
                 ORDER BY score, member \
                 LIMIT $3 \
                 FOR UPDATE SKIP LOCKED \
             ) due \
             WHERE s.key = $1 AND s.member = due.member \
             RETURNING s.member, s.score",
        )
        .bind(key)
        .bind(max_score)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        claimed.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(claimed)
    }
}

async fn series_exists(pool: &PgPool, key: &str) -> Result<(), StoreError> {
    let found: Option<i64> = sqlx::query_scalar("SELECT retention_ms FROM timeseries WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound {
            key: key.to_string(),
            path: ".".to_string(),
        }),
    }
}

fn aggregate_sql(aggregation: Aggregation) -> &'static str {
    match aggregation {
        Aggregation::Avg => "avg(value)",
        Aggregation::Sum => "sum(value)",
        Aggregation::Min => "min(value)",
        Aggregation::Max => "max(value)",
        Aggregation::Count => "count(*)::float8",
        Aggregation::First => "(array_agg(value ORDER BY ts))[1]",
        Aggregation::Last => "(array_agg(value ORDER BY ts DESC))[1]",
    }
}

impl TimeSeries for PgStore {
    async fn ts_create(&self, key: &str, retention_ms: i64) -> Result<bool, StoreError> {
        if retention_ms < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "negative retention {retention_ms} for {key}"
            )));
        }
        let result = sqlx::query(
            "INSERT INTO timeseries (key, retention_ms) VALUES ($1, $2) \
             ON CONFLICT (key) DO NOTHING",
        )
        .bind(key)
        .bind(retention_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn ts_add(&self, key: &str, timestamp_ms: i64, value: f64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let retention: Option<i64> =
            sqlx::query_scalar("SELECT retention_ms FROM timeseries WHERE key = $1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(retention) = retention else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
                path: ".".to_string(),
            });
        };

        sqlx::query(
            "INSERT INTO timeseries_points (key, ts, value) VALUES ($1, $2, $3) \
             ON CONFLICT (key, ts) DO UPDATE SET value = EXCLUDED.value",
        )
        .bind(key)
        .bind(timestamp_ms)
        .bind(value)
        .execute(&mut *tx)
        .await?;

        if retention > 0 {
            sqlx::query(
                "DELETE FROM timeseries_points WHERE key = $1 \
                 AND ts < (SELECT max(ts) FROM timeseries_points WHERE key = $1) - $2",
            )
            .bind(key)
            .bind(retention)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn ts_range(&self, key: &str, from: i64, to: i64) -> Result<Vec<DataPoint>, StoreError> {
        series_exists(&self.pool, key).await?;
        let rows: Vec<(i64, f64)> = sqlx::query_as(
            "SELECT ts, value FROM timeseries_points \
             WHERE key = $1 AND ts BETWEEN $2 AND $3 ORDER BY ts",
        )
        .bind(key)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(timestamp, value)| DataPoint { timestamp, value })
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
        series_exists(&self.pool, key).await?;

        let sql = format!(
            "SELECT ts - (((ts % $4) + $4) % $4) AS bucket, {}::float8 AS value \
             FROM timeseries_points \
             WHERE key = $1 AND ts BETWEEN $2 AND $3 \
             GROUP BY bucket ORDER BY bucket",
            aggregate_sql(aggregation)
        );
        let rows: Vec<(i64, f64)> = sqlx::query_as(&sql)
            .bind(key)
            .bind(from)
            .bind(to)
            .bind(bucket_ms)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(timestamp, value)| DataPoint { timestamp, value })
            .collect())
    }
}

impl Locks for PgStore {
    type Guard = PgLockGuard;

    async fn acquire(&self, name: &str, timeout: Duration) -> Result<PgLockGuard, StoreError> {
        PgLockGuard::acquire(&self.pool, name, timeout, self.lock_poll).await
    }
}
