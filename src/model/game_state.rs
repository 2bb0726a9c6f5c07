use serde::{Deserialize, Serialize};

use super::travel::Travel;

/// Persistent state of one user's town, stored as `user:{id}:gamestate`.
///
/// Only the fields the updater reads or writes are modelled; other fields in
/// the stored document are left alone because all writes are path-addressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameState {
    pub town_x: i32,
    pub town_y: i32,
    pub population: Population,
    pub resources: Resources,
    /// Sorted by `arrival_at` ascending; a tick only consumes a prefix.
    pub travel_queue: Vec<Travel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Population {
    pub uneducated: i64,
    pub chefs: i64,
    pub salesmice: i64,
    pub guards: i64,
    pub thieves: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Resources {
    pub coins: i64,
    pub pizzas: i64,
}

impl GameState {
    /// Arrival time of the next queued travel, if any.
    pub fn next_arrival(&self) -> Option<i64> {
        self.travel_queue.first().map(|t| t.arrival_at)
    }
}
