use rand::RngCore;

use super::commit::commit_all;
use super::context::TickContext;
use super::patch::PatchSet;
use super::travels::complete_travels;
use super::world::TownLookup;
use crate::config::UpdaterConfig;
use crate::error::TickError;
use crate::keys;
use crate::model::GameState;
use crate::store::{JsonPath, Store, bounded, read_json};

const NANOS_PER_MILLI: i64 = 1_000_000;

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickSummary {
    /// Queue entries consumed, including no-op entries.
    pub resolved: usize,
    pub raids: usize,
    pub returns: usize,
    /// Users whose documents were written, acting user first.
    pub committed: Vec<String>,
    /// Due time proposed for the acting user afterwards.
    pub next_due: Option<i64>,
}

/// Result of one [`Updater::run_due`] step.
#[derive(Debug, Default)]
pub struct RunReport {
    pub ticked: Vec<(String, TickSummary)>,
    pub failed: Vec<(String, TickError)>,
}

/// Drives ticks for users against one backend and map authority.
pub struct Updater<S, W> {
    store: S,
    world: W,
    config: UpdaterConfig,
}

impl<S: Store, W: TownLookup> Updater<S, W> {
    pub fn new(store: S, world: W, config: UpdaterConfig) -> Self {
        Self {
            store,
            world,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// Resolve every travel of `user_id` that has arrived by `now` (unix
    /// nanoseconds) and commit the effects.
    ///
    /// On error nothing was written for the acting user.
    pub async fn tick(
        &self,
        user_id: &str,
        now: i64,
        rng: &mut (dyn RngCore + Send),
    ) -> Result<TickSummary, TickError> {
        let key = keys::gamestate(user_id);
        let timeout = self.config.store_timeout();
        let Some(state) =
            bounded(timeout, read_json::<_, GameState>(&self.store, &key, &JsonPath::root()))
                .await?
        else {
            tracing::debug!(user_id, "No game state, skipping tick");
            return Ok(TickSummary::default());
        };

        let mut patches = PatchSet::new(user_id, state.clone());
        let completed = {
            let mut ctx = TickContext {
                user_id,
                now,
                state: &state,
                store: &self.store,
                world: &self.world,
                config: &self.config,
                rng,
                patches: &mut patches,
            };
            complete_travels(&mut ctx).await?
        };

        let mut summary = TickSummary {
            resolved: completed.resolved,
            raids: completed.raids,
            returns: completed.returns,
            ..TickSummary::default()
        };

        if patches.is_empty() {
            summary.next_due = state.next_arrival();
        } else {
            let report = commit_all(&self.store, &self.config, &patches, now).await?;
            for outcome in &report.committed {
                self.record_coins(&outcome.user_id, now, outcome.coins).await;
                if outcome.user_id == user_id {
                    summary.next_due = outcome.next_arrival;
                }
            }
            summary.committed = report.committed.into_iter().map(|o| o.user_id).collect();
        }

        if let Some(at) = summary.next_due {
            if let Err(err) = self.schedule(user_id, at).await {
                tracing::warn!(user_id, error = %err, "Failed to schedule next update");
            }
        }
        if summary.resolved > 0 {
            self.record_metric(keys::TRAVELS_COMPLETED_SERIES, now, summary.resolved as f64)
                .await;
        }

        tracing::info!(
            user_id,
            resolved = summary.resolved,
            raids = summary.raids,
            returns = summary.returns,
            committed = summary.committed.len(),
            "Tick complete"
        );
        Ok(summary)
    }

    /// Propose `at` as the user's next due time. Only ever lowers an
    /// existing proposal; returns whether the index changed.
    pub async fn schedule(&self, user_id: &str, at: i64) -> Result<bool, TickError> {
        let changed = bounded(
            self.config.store_timeout(),
            self.store.zadd_lt(&self.config.schedule_key, user_id, at),
        )
        .await?;
        Ok(changed)
    }

    /// Claim up to `limit` users due by `now` and tick each one. A user whose
    /// tick fails is offered again after `retry_delay`.
    pub async fn run_due(
        &self,
        now: i64,
        limit: usize,
        rng: &mut (dyn RngCore + Send),
    ) -> Result<RunReport, TickError> {
        let claimed = bounded(
            self.config.store_timeout(),
            self.store.claim_due(&self.config.schedule_key, now, limit),
        )
        .await?;

        let mut report = RunReport::default();
        for (user_id, _due) in claimed {
            match self.tick(&user_id, now, &mut *rng).await {
                Ok(summary) => report.ticked.push((user_id, summary)),
                Err(err) => {
                    tracing::error!(
                        user_id = %user_id,
                        kind = ?err.kind(),
                        error = %err,
                        "Tick failed"
                    );
                    let retry_at = now.saturating_add(self.config.retry_delay_nanos());
                    if let Err(schedule_err) = self.schedule(&user_id, retry_at).await {
                        tracing::warn!(
                            user_id = %user_id,
                            error = %schedule_err,
                            "Failed to reschedule failed user"
                        );
                    }
                    report.failed.push((user_id, err));
                }
            }
        }
        Ok(report)
    }

    async fn record_coins(&self, user_id: &str, now: i64, coins: i64) {
        self.record_metric(&keys::coins_series(user_id), now, coins as f64)
            .await;
    }

    /// Best effort: metric failures never affect a committed tick.
    async fn record_metric(&self, series: &str, now: i64, value: f64) {
        let timeout = self.config.store_timeout();
        let result = async {
            bounded(
                timeout,
                self.store.ts_create(series, self.config.metrics_retention_ms),
            )
            .await?;
            bounded(
                timeout,
                self.store.ts_add(series, now / NANOS_PER_MILLI, value),
            )
            .await
        }
        .await;
        if let Err(err) = result {
            tracing::warn!(series, error = %err, "Failed to record metric");
        }
    }
}
