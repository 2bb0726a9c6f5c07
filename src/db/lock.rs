use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio::time::Instant;

use crate::error::StoreError;
use crate::store::LockGuard;

const TRY_LOCK: &str = "SELECT pg_try_advisory_lock(hashtextextended($1, 0))";
const UNLOCK: &str = "SELECT pg_advisory_unlock(hashtextextended($1, 0))";

/// A session advisory lock held on a dedicated pooled connection.
///
/// Dropping the guard without [`LockGuard::release`] closes the connection
/// instead of returning it to the pool, which ends the session and frees the
/// lock server-side.
#[derive(Debug)]
pub struct PgLockGuard {
    conn: Option<PoolConnection<Postgres>>,
    name: String,
}

impl PgLockGuard {
    pub(super) async fn acquire(
        pool: &PgPool,
        name: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Self, StoreError> {
        let deadline = Instant::now() + timeout;
        let lock_timeout = || StoreError::LockTimeout {
            name: name.to_string(),
            timeout,
        };

        let mut conn = tokio::time::timeout_at(deadline, pool.acquire())
            .await
            .map_err(|_| lock_timeout())??;

        loop {
            let polled = tokio::time::timeout_at(
                deadline,
                sqlx::query_scalar::<_, bool>(TRY_LOCK)
                    .bind(name)
                    .fetch_one(&mut *conn),
            )
            .await;
            let acquired = match polled {
                Ok(acquired) => acquired?,
                Err(_) => {
                    // The attempt may still land server-side; ending the
                    // session is the only way to be sure it is not held.
                    drop(conn.detach());
                    return Err(lock_timeout());
                }
            };
            if acquired {
                return Ok(Self {
                    conn: Some(conn),
                    name: name.to_string(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(lock_timeout());
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }
}

impl LockGuard for PgLockGuard {
    async fn release(mut self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        match sqlx::query_scalar::<_, bool>(UNLOCK)
            .bind(&self.name)
            .fetch_one(&mut *conn)
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(lock = %self.name, "advisory lock was not held at release");
                drop(conn.detach());
                Ok(())
            }
            Err(e) => {
                drop(conn.detach());
                Err(e.into())
            }
        }
    }
}

impl Drop for PgLockGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}
