//! The target side of raids.
//!
//! A raid is resolved against a snapshot of the target read during the
//! tick. Before the attacker's documents are touched, each target is settled
//! under its own lock: loot is clamped to the coins the target holds right
//! now, the debit and the defender's report are written, and the settled
//! figures are stored under `raid:{raid_id}`. A retried tick finds that
//! record and reuses the figures instead of debiting the target again.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::commit::{CommitOutcome, to_json, under_user_lock};
use super::patch::{Field, Patch};
use super::reports::{RaidFacts, attacker_report, defender_report};
use crate::config::UpdaterConfig;
use crate::error::TickError;
use crate::keys;
use crate::model::{GameState, Travel};
use crate::store::{DocWrite, DocumentStore, JsonPath, Locks, bounded, read_json};

/// A raid resolved this tick whose effect on the target is not written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidClaim {
    pub raid_id: String,
    pub target_id: String,
    pub target_username: String,
    /// The raid leg as it sits in the attacker's queue.
    pub leg: Travel,
    pub successful: i64,
    pub caught: i64,
    /// Loot as clamped against the target's staged coins.
    pub loot: i64,
    /// Arrival of the return leg, should anyone walk home.
    pub return_at: i64,
}

impl RaidClaim {
    pub fn facts(&self, settled: &Settlement) -> RaidFacts {
        RaidFacts {
            target_username: self.target_username.clone(),
            thieves: self.leg.thieves,
            successful: settled.successful,
            caught: settled.caught,
            loot: settled.loot,
        }
    }
}

/// Figures of a raid as written to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub successful: i64,
    pub caught: i64,
    pub loot: i64,
}

/// Target-side result of settling every raid of a tick on one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledTarget {
    pub user_id: String,
    /// One per claim, in claim order.
    pub settlements: Vec<Settlement>,
    /// Coin balance written, or `None` if every raid was settled earlier.
    pub coins: Option<i64>,
}

impl SettledTarget {
    pub fn outcome(&self) -> Option<CommitOutcome> {
        self.coins.map(|coins| CommitOutcome {
            user_id: self.user_id.clone(),
            coins,
            next_arrival: None,
        })
    }
}

/// Stable identity of a raid leg. `ordinal` tells apart identical legs in one
/// resolved prefix.
pub fn raid_id(attacker_id: &str, leg: &Travel, ordinal: usize) -> String {
    format!(
        "{attacker_id}:{}:{}:{}:{}:{ordinal}",
        leg.arrival_at, leg.destination_x, leg.destination_y, leg.thieves
    )
}

/// Settle `claims`, all aimed at `target_id`, while holding the target's lock.
///
/// Fails with `QueueConflict` if a raid that has no settlement record is no
/// longer in the attacker's queue: another tick already finished it.
pub async fn settle_target<S>(
    store: &S,
    config: &UpdaterConfig,
    attacker_id: &str,
    target_id: &str,
    claims: &[&RaidClaim],
    now: i64,
) -> Result<SettledTarget, TickError>
where
    S: DocumentStore + Locks,
{
    under_user_lock(
        store,
        config,
        target_id,
        write_settlements(store, config, attacker_id, target_id, claims, now),
    )
    .await
}

async fn write_settlements<S: DocumentStore>(
    store: &S,
    config: &UpdaterConfig,
    attacker_id: &str,
    target_id: &str,
    claims: &[&RaidClaim],
    now: i64,
) -> Result<SettledTarget, TickError> {
    let timeout = config.store_timeout();
    let key = keys::gamestate(target_id);
    let reports_key = keys::reports(target_id);

    let live: GameState = bounded(timeout, read_json(store, &key, &JsonPath::root()))
        .await?
        .ok_or_else(|| TickError::MissingDocument(key.clone()))?;
    let attacker_queue: Vec<Travel> = bounded(
        timeout,
        read_json(store, &keys::gamestate(attacker_id), &JsonPath::parse(".travelQueue")),
    )
    .await?
    .unwrap_or_default();

    let mut available = live.resources.coins.max(0);
    let mut taken = 0i64;
    let mut settlements = Vec::with_capacity(claims.len());
    let mut writes = Vec::new();
    let mut reports = Vec::new();
    for claim in claims {
        let record_key = keys::raid_settlement(&claim.raid_id);
        if let Some(done) =
            bounded(timeout, read_json::<_, Settlement>(store, &record_key, &JsonPath::root()))
                .await?
        {
            tracing::debug!(raid_id = %claim.raid_id, "Raid already settled");
            settlements.push(done);
            continue;
        }
        if !attacker_queue.contains(&claim.leg) {
            return Err(TickError::QueueConflict(attacker_id.to_string()));
        }

        let settled = Settlement {
            successful: claim.successful,
            caught: claim.caught,
            loot: claim.loot.min(available),
        };
        available -= settled.loot;
        taken += settled.loot;

        writes.push(DocWrite::set(
            record_key.as_str(),
            JsonPath::root(),
            to_json(&record_key, &settled)?,
        ));
        reports.push(to_json(
            &reports_key,
            &defender_report(&claim.facts(&settled), now),
        )?);
        if settled.loot < claim.loot {
            tracing::info!(
                raid_id = %claim.raid_id,
                staged = claim.loot,
                settled = settled.loot,
                "Loot clamped to coins on hand"
            );
        }
        settlements.push(settled);
    }

    if reports.is_empty() {
        return Ok(SettledTarget {
            user_id: target_id.to_string(),
            settlements,
            coins: None,
        });
    }

    let coins = live.resources.coins - taken;
    writes.push(DocWrite::set(key.as_str(), Field::Coins.path(), json!(coins)));
    writes.push(DocWrite::init(reports_key.as_str(), json!([])));
    writes.push(DocWrite::append(reports_key, JsonPath::root(), reports));
    bounded(timeout, store.apply(&writes)).await?;

    tracing::debug!(
        user_id = attacker_id,
        target_id,
        raids = claims.len(),
        coins,
        "Settled raids on target"
    );
    Ok(SettledTarget {
        user_id: target_id.to_string(),
        settlements,
        coins: Some(coins),
    })
}

/// Stage the attacker's side of a settled raid: the return leg, if anyone
/// escaped, and the thief report.
pub fn finish_raid(acting: &mut Patch, claim: &RaidClaim, settled: &Settlement, now: i64) {
    if settled.successful > 0 {
        acting.schedule_travel(Travel::homecoming(
            claim.return_at,
            claim.leg.destination_x,
            claim.leg.destination_y,
            settled.successful,
            settled.loot,
        ));
    }
    acting.append_report(attacker_report(&claim.facts(settled), now));
}
