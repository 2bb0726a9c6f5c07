//! Writes a tick's effects back under per-user locks.
//!
//! Locks are held one user at a time, never two at once. Raid targets are
//! settled first (see the `settle` module); only then is the acting user's
//! patch finished from the settled figures and written. If any target cannot
//! be settled the tick fails before the acting user is touched, so the raid
//! stays queued and a retry settles it.
//!
//! Under the acting user's lock the live state is re-read: staged scalar
//! deltas are re-applied to the live values, and the queue edit is only
//! written if the prefix it resolved still leads the live queue. A tick
//! retried after its acting user's commit went through therefore fails with
//! `QueueConflict` instead of resolving the same travels twice.

use std::collections::HashMap;
use std::future::Future;

use serde_json::{Value, json};

use super::patch::{Field, Patch, PatchSet};
use super::settle::{Settlement, finish_raid, settle_target};
use crate::config::UpdaterConfig;
use crate::error::{StoreError, TickError};
use crate::keys;
use crate::model::GameState;
use crate::store::{DocWrite, DocumentStore, JsonPath, LockGuard, Locks, bounded, read_json};

/// State of one user right after their documents were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub user_id: String,
    pub coins: i64,
    /// Head of the committed travel queue. Not tracked for raid targets.
    pub next_arrival: Option<i64>,
}

/// Result of committing one tick.
#[derive(Debug, Default)]
pub struct CommitReport {
    /// Acting user first, then each target that was written.
    pub committed: Vec<CommitOutcome>,
}

/// Settle every raid target, then commit the acting user's patch.
///
/// Any failure is returned as is. Targets settled before the failure keep
/// their settlement records, so the retried tick does not debit them again.
pub async fn commit_all<S>(
    store: &S,
    config: &UpdaterConfig,
    patches: &PatchSet,
    now: i64,
) -> Result<CommitReport, TickError>
where
    S: DocumentStore + Locks,
{
    let acting_id = patches.acting_user_id();

    let mut targets = Vec::new();
    let mut settled: HashMap<&str, Settlement> = HashMap::new();
    for (target_id, claims) in patches.raids_by_target() {
        let target = settle_target(store, config, acting_id, target_id, &claims, now).await?;
        for (claim, settlement) in claims.iter().zip(&target.settlements) {
            settled.insert(claim.raid_id.as_str(), *settlement);
        }
        targets.push(target);
    }

    let mut acting = patches.acting_patch().clone();
    for claim in patches.raids() {
        if let Some(settlement) = settled.get(claim.raid_id.as_str()) {
            finish_raid(&mut acting, claim, settlement, now);
        }
    }

    let mut report = CommitReport::default();
    if !acting.is_empty() {
        report.committed.push(commit_user(store, config, &acting).await?);
    }
    report
        .committed
        .extend(targets.iter().filter_map(|t| t.outcome()));

    // The queue edit now guards these raids; the records are no longer needed.
    for claim in patches.raids() {
        let record = keys::raid_settlement(&claim.raid_id);
        if let Err(err) = bounded(config.store_timeout(), store.json_del(&record)).await {
            tracing::warn!(
                user_id = acting_id,
                raid_id = %claim.raid_id,
                error = %err,
                "Failed to drop settlement record"
            );
        }
    }
    Ok(report)
}

/// Write one user's patch while holding `user-update:{id}`.
pub async fn commit_user<S>(
    store: &S,
    config: &UpdaterConfig,
    patch: &Patch,
) -> Result<CommitOutcome, TickError>
where
    S: DocumentStore + Locks,
{
    under_user_lock(store, config, patch.user_id(), write_patch(store, config, patch)).await
}

/// Run `work` while holding the user's lock. The lock is released on every
/// path; a failed release is only logged.
pub(super) async fn under_user_lock<S, T>(
    store: &S,
    config: &UpdaterConfig,
    user_id: &str,
    work: impl Future<Output = Result<T, TickError>>,
) -> Result<T, TickError>
where
    S: Locks,
{
    let guard = acquire_user_lock(store, config, user_id).await?;
    let done = work.await;
    if let Err(err) = bounded(config.store_timeout(), guard.release()).await {
        tracing::warn!(user_id, error = %err, "Failed to release user lock");
    }
    done
}

async fn acquire_user_lock<S: Locks>(
    store: &S,
    config: &UpdaterConfig,
    user_id: &str,
) -> Result<S::Guard, TickError> {
    let name = keys::user_lock(user_id);
    let attempts = config.lock_attempts.max(1);
    for attempt in 1..=attempts {
        match store.acquire(&name, config.lock_timeout()).await {
            Ok(guard) => return Ok(guard),
            Err(StoreError::LockTimeout { .. }) => {
                if attempt < attempts {
                    let backoff = config.lock_backoff(attempt);
                    tracing::debug!(user_id, attempt, ?backoff, "User lock busy, backing off");
                    tokio::time::sleep(backoff).await;
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(TickError::LockExhausted {
        user_id: user_id.to_string(),
        attempts,
    })
}

async fn write_patch<S: DocumentStore>(
    store: &S,
    config: &UpdaterConfig,
    patch: &Patch,
) -> Result<CommitOutcome, TickError> {
    let timeout = config.store_timeout();
    let user_id = patch.user_id();
    let key = keys::gamestate(user_id);

    let live: GameState = bounded(timeout, read_json(store, &key, &JsonPath::root()))
        .await?
        .ok_or_else(|| TickError::MissingDocument(key.clone()))?;

    let mut writes = Vec::new();
    let mut coins = live.resources.coins;
    for (field, staged) in patch.touched_fields() {
        let value = field.read(&live).saturating_add(staged.delta()).max(0);
        if field == Field::Coins {
            coins = value;
        }
        writes.push(DocWrite::set(key.as_str(), field.path(), json!(value)));
    }

    let queue = match patch.queue() {
        Some(edit) => {
            let next = edit
                .rebase(&live.travel_queue)
                .ok_or_else(|| TickError::QueueConflict(user_id.to_string()))?;
            writes.push(DocWrite::set(
                key.as_str(),
                ".travelQueue",
                to_json(&key, &next)?,
            ));
            next
        }
        None => live.travel_queue,
    };

    if !patch.reports().is_empty() {
        let reports_key = keys::reports(user_id);
        writes.push(DocWrite::init(reports_key.as_str(), json!([])));
        let reports = patch
            .reports()
            .iter()
            .map(|r| to_json(&reports_key, r))
            .collect::<Result<Vec<_>, _>>()?;
        writes.push(DocWrite::append(reports_key, JsonPath::root(), reports));
    }

    if !writes.is_empty() {
        bounded(timeout, store.apply(&writes)).await?;
    }

    tracing::debug!(user_id, writes = writes.len(), coins, "Committed patch");
    Ok(CommitOutcome {
        user_id: user_id.to_string(),
        coins,
        next_arrival: queue.first().map(|t| t.arrival_at),
    })
}

pub(super) fn to_json<T: serde::Serialize>(key: &str, value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|source| StoreError::Malformed {
        key: key.to_string(),
        source,
    })
}
