use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::time::Duration;

use super::settle::RaidClaim;
use crate::error::TickError;
use crate::keys;
use crate::model::travel::insert_sorted;
use crate::model::{GameState, Report, Travel};
use crate::store::{DocumentStore, JsonPath, bounded, read_json};

/// Scalar game-state fields the updater stages changes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Coins,
    Thieves,
    Guards,
}

impl Field {
    pub fn path(self) -> JsonPath {
        match self {
            Field::Coins => JsonPath::parse(".resources.coins"),
            Field::Thieves => JsonPath::parse(".population.thieves"),
            Field::Guards => JsonPath::parse(".population.guards"),
        }
    }

    pub fn read(self, gs: &GameState) -> i64 {
        match self {
            Field::Coins => gs.resources.coins,
            Field::Thieves => gs.population.thieves,
            Field::Guards => gs.population.guards,
        }
    }
}

/// A touched field: the baseline it was staged against and the staged value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Staged {
    pub baseline: i64,
    pub value: i64,
}

impl Staged {
    pub fn delta(self) -> i64 {
        self.value - self.baseline
    }
}

/// Staged replacement of the travel queue.
///
/// `resolved` is the prefix consumed this tick; it must still lead the stored
/// queue when the patch is committed. `scheduled` are legs created this tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueEdit {
    pub resolved: Vec<Travel>,
    pub scheduled: Vec<Travel>,
}

impl QueueEdit {
    /// Queue resulting from applying this edit to `queue`, or `None` when
    /// `queue` no longer starts with the resolved prefix.
    pub fn rebase(&self, queue: &[Travel]) -> Option<Vec<Travel>> {
        if !queue.starts_with(&self.resolved) {
            return None;
        }
        let mut next = queue[self.resolved.len()..].to_vec();
        for travel in &self.scheduled {
            insert_sorted(&mut next, travel.clone());
        }
        Some(next)
    }
}

/// Pending changes to one user's documents within one tick.
#[derive(Debug, Clone)]
pub struct Patch {
    user_id: String,
    baseline: GameState,
    fields: BTreeMap<Field, Staged>,
    queue: Option<QueueEdit>,
    reports: Vec<Report>,
}

impl Patch {
    pub fn new(user_id: impl Into<String>, baseline: GameState) -> Self {
        Self {
            user_id: user_id.into(),
            baseline,
            fields: BTreeMap::new(),
            queue: None,
            reports: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Snapshot the staged deltas are relative to.
    pub fn baseline(&self) -> &GameState {
        &self.baseline
    }

    /// Value of `field` with this tick's staged changes applied.
    pub fn current(&self, field: Field) -> i64 {
        self.fields
            .get(&field)
            .map_or_else(|| field.read(&self.baseline), |s| s.value)
    }

    pub fn staged(&self, field: Field) -> Option<Staged> {
        self.fields.get(&field).copied()
    }

    pub fn touched_fields(&self) -> impl Iterator<Item = (Field, Staged)> + '_ {
        self.fields.iter().map(|(f, s)| (*f, *s))
    }

    pub fn set(&mut self, field: Field, value: i64) {
        let baseline = field.read(&self.baseline);
        self.fields
            .entry(field)
            .or_insert(Staged { baseline, value: baseline })
            .value = value;
    }

    pub fn incr(&mut self, field: Field, by: i64) {
        let next = self.current(field).saturating_add(by);
        self.set(field, next);
    }

    /// Record that the leading `resolved` entries of the baseline queue were
    /// consumed. Further calls extend the consumed prefix.
    pub fn replace_queue(&mut self, resolved: &[Travel]) {
        self.queue
            .get_or_insert_with(QueueEdit::default)
            .resolved
            .extend_from_slice(resolved);
    }

    pub fn schedule_travel(&mut self, travel: Travel) {
        self.queue
            .get_or_insert_with(QueueEdit::default)
            .scheduled
            .push(travel);
    }

    pub fn queue(&self) -> Option<&QueueEdit> {
        self.queue.as_ref()
    }

    /// The queue this patch would leave behind if the stored queue still
    /// equals the baseline.
    pub fn planned_queue(&self) -> Vec<Travel> {
        match &self.queue {
            Some(edit) => edit
                .rebase(&self.baseline.travel_queue)
                .unwrap_or_else(|| self.baseline.travel_queue.clone()),
            None => self.baseline.travel_queue.clone(),
        }
    }

    pub fn append_report(&mut self, report: Report) {
        self.reports.push(report);
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.queue.is_none() && self.reports.is_empty()
    }
}

/// All patches staged during one tick: the acting user's, one per other
/// user the tick touched, and the raids waiting to be settled with them.
///
/// Patches of other users only carry the staging baseline that later raids
/// in the same tick resolve against. What reaches those users is decided
/// when the raids are settled.
#[derive(Debug)]
pub struct PatchSet {
    acting: Patch,
    others: BTreeMap<String, Patch>,
    raids: Vec<RaidClaim>,
}

impl PatchSet {
    pub fn new(acting_user_id: impl Into<String>, acting_state: GameState) -> Self {
        Self {
            acting: Patch::new(acting_user_id, acting_state),
            others: BTreeMap::new(),
            raids: Vec::new(),
        }
    }

    pub fn acting(&mut self) -> &mut Patch {
        &mut self.acting
    }

    pub fn acting_patch(&self) -> &Patch {
        &self.acting
    }

    pub fn acting_user_id(&self) -> &str {
        &self.acting.user_id
    }

    pub fn get(&self, user_id: &str) -> Option<&Patch> {
        if user_id == self.acting.user_id {
            Some(&self.acting)
        } else {
            self.others.get(user_id)
        }
    }

    /// The patch for `user_id`, creating it on first touch. The baseline is
    /// read from the store once per user per tick, within `timeout`; this is
    /// the only I/O the accumulator performs.
    pub async fn touch<S: DocumentStore>(
        &mut self,
        store: &S,
        user_id: &str,
        timeout: Duration,
    ) -> Result<&mut Patch, TickError> {
        if user_id == self.acting.user_id {
            return Ok(&mut self.acting);
        }
        match self.others.entry(user_id.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let key = keys::gamestate(user_id);
                let baseline: GameState =
                    bounded(timeout, read_json(store, &key, &JsonPath::root()))
                        .await?
                        .ok_or(TickError::MissingDocument(key))?;
                Ok(e.insert(Patch::new(user_id, baseline)))
            }
        }
    }

    pub fn record_raid(&mut self, claim: RaidClaim) {
        self.raids.push(claim);
    }

    /// Raids resolved this tick, in queue order.
    pub fn raids(&self) -> &[RaidClaim] {
        &self.raids
    }

    /// Raids grouped per target, by target id. Claims keep queue order.
    pub fn raids_by_target(&self) -> BTreeMap<&str, Vec<&RaidClaim>> {
        let mut grouped: BTreeMap<&str, Vec<&RaidClaim>> = BTreeMap::new();
        for claim in &self.raids {
            grouped.entry(claim.target_id.as_str()).or_default().push(claim);
        }
        grouped
    }

    pub fn len(&self) -> usize {
        1 + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acting.is_empty() && self.raids.is_empty()
    }
}
