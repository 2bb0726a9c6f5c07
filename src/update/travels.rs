//! Resolution of arrived travel-queue entries.

use rand::Rng;

use super::context::TickContext;
use super::patch::Field;
use super::settle::{RaidClaim, raid_id};
use super::world::TownLookup;
use crate::error::{StoreError, TickError};
use crate::keys;
use crate::model::Travel;
use crate::model::travel::{arrival_at, completed_prefix};
use crate::store::{DocumentStore, JsonPath, bounded, read_json};

/// Above this many thieves the draw switches from one trial per thief to a
/// normal approximation.
pub const EXACT_DRAW_LIMIT: i64 = 4_096;

/// Outcome of one raid before it is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaidResult {
    pub successful: i64,
    pub caught: i64,
    pub loot: i64,
}

/// What one tick resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletedTravels {
    /// Queue entries consumed, including no-op entries.
    pub resolved: usize,
    pub raids: usize,
    pub returns: usize,
}

/// Chance that a single thief slips past the guards.
pub fn escape_probability(thieves: i64, guards: i64) -> f64 {
    let thieves = thieves.max(0) as f64;
    let guards = guards.max(0) as f64;
    if thieves == 0.0 {
        return 0.0;
    }
    thieves / (thieves + guards / 2.0)
}

/// Draw from Binomial(thieves, escape_probability(thieves, guards)).
///
/// Up to [`EXACT_DRAW_LIMIT`] thieves this is one independent trial per
/// thief. Larger parties use a normal approximation so the cost stays flat.
pub fn draw_successful_thieves<R: Rng + ?Sized>(rng: &mut R, thieves: i64, guards: i64) -> i64 {
    if thieves <= 0 {
        return 0;
    }
    let p = escape_probability(thieves, guards);
    if p >= 1.0 {
        return thieves;
    }
    if thieves <= EXACT_DRAW_LIMIT {
        return (0..thieves).filter(|_| rng.random_bool(p)).count() as i64;
    }
    approximate_binomial(rng, thieves, p)
}

fn approximate_binomial<R: Rng + ?Sized>(rng: &mut R, n: i64, p: f64) -> i64 {
    // Box-Muller; 1 - u keeps the logarithm's argument in (0, 1].
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();

    let trials = n as f64;
    let mean = trials * p;
    let sd = (trials * p * (1.0 - p)).sqrt();
    (mean + sd * z).round().clamp(0.0, trials) as i64
}

/// Draw the number of escaping thieves and the loot they carry off.
pub fn resolve_raid<R: Rng + ?Sized>(
    rng: &mut R,
    thieves: i64,
    guards: i64,
    thief_capacity: i64,
    target_coins: i64,
) -> RaidResult {
    let successful = draw_successful_thieves(rng, thieves, guards);
    let max_loot = successful.saturating_mul(thief_capacity.max(0));
    RaidResult {
        successful,
        caught: thieves.max(0) - successful,
        loot: max_loot.min(target_coins.max(0)),
    }
}

/// Resolve every entry of the acting user's queue that has arrived by
/// `ctx.now`, staging the effects into `ctx.patches`.
///
/// Any error aborts the whole tick; nothing staged so far may be committed.
pub async fn complete_travels<S, W>(
    ctx: &mut TickContext<'_, S, W>,
) -> Result<CompletedTravels, TickError>
where
    S: DocumentStore,
    W: TownLookup,
{
    let state = ctx.state;
    let count = completed_prefix(&state.travel_queue, ctx.now);
    if count == 0 {
        return Ok(CompletedTravels::default());
    }

    let completed = &state.travel_queue[..count];
    ctx.patches.acting().replace_queue(completed);

    let mut summary = CompletedTravels {
        resolved: count,
        ..CompletedTravels::default()
    };
    for (i, travel) in completed.iter().enumerate() {
        if travel.thieves <= 0 {
            continue;
        }
        if travel.returning {
            complete_return(ctx, travel);
            summary.returns += 1;
        } else {
            let ordinal = completed[..i].iter().filter(|t| *t == travel).count();
            complete_raid(ctx, travel, ordinal).await?;
            summary.raids += 1;
        }
    }
    Ok(summary)
}

/// Resolve one raid against the target as staged so far this tick. The
/// target's coins are debited in the staging patch so later raids of the same
/// tick see the lower balance; everything else waits for settlement.
async fn complete_raid<S, W>(
    ctx: &mut TickContext<'_, S, W>,
    travel: &Travel,
    ordinal: usize,
) -> Result<RaidResult, TickError>
where
    S: DocumentStore,
    W: TownLookup,
{
    let (x, y) = (travel.destination_x, travel.destination_y);
    let timeout = ctx.config.store_timeout();

    // Validate target town
    let town = tokio::time::timeout(timeout, ctx.world.lookup_town(x, y))
        .await
        .map_err(|_| StoreError::Timeout(timeout))??
        .ok_or(TickError::NoTown { x, y })?;
    if town.owner_user_id == ctx.user_id {
        return Err(TickError::SelfTarget {
            user_id: ctx.user_id.to_string(),
            x,
            y,
        });
    }
    let target_id = town.owner_user_id;

    let profile_key = keys::profile(&target_id);
    let target_username: String = bounded(
        timeout,
        read_json(ctx.store, &profile_key, &JsonPath::parse(".username")),
    )
    .await?
    .ok_or(TickError::MissingDocument(profile_key))?;

    let target = ctx.patches.touch(ctx.store, &target_id, timeout).await?;
    let result = resolve_raid(
        &mut *ctx.rng,
        travel.thieves,
        target.current(Field::Guards),
        ctx.config.thief_capacity,
        target.current(Field::Coins),
    );
    target.incr(Field::Coins, -result.loot);

    let home = (ctx.state.town_x, ctx.state.town_y);
    ctx.patches.record_raid(RaidClaim {
        raid_id: raid_id(ctx.user_id, travel, ordinal),
        target_id: target_id.clone(),
        target_username,
        leg: travel.clone(),
        successful: result.successful,
        caught: result.caught,
        loot: result.loot,
        return_at: arrival_at(travel.arrival_at, (x, y), home, ctx.config.thief_speed),
    });

    tracing::info!(
        user_id = ctx.user_id,
        target_id = %target_id,
        thieves = travel.thieves,
        successful = result.successful,
        loot = result.loot,
        "Raid resolved"
    );
    Ok(result)
}

fn complete_return<S, W>(ctx: &mut TickContext<'_, S, W>, travel: &Travel) {
    let acting = ctx.patches.acting();
    acting.incr(Field::Coins, travel.coins);
    acting.incr(Field::Thieves, travel.thieves);

    tracing::info!(
        user_id = ctx.user_id,
        loot = travel.coins,
        thieves = travel.thieves,
        "Raid return completed"
    );
}
