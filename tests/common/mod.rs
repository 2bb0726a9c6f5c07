use rand::RngCore;
use serde_json::json;
use town_updater::keys;
use town_updater::model::*;
use town_updater::store::{DocumentStore, JsonPath, MemoryStore, read_json};
use town_updater::update::StaticWorld;

/// Random source whose Bernoulli trials follow a fixed script: `true` draws
/// succeed, `false` (and anything past the end) fail.
pub struct ScriptedRng {
    outcomes: Vec<bool>,
    next: usize,
}

impl ScriptedRng {
    pub fn new(outcomes: impl IntoIterator<Item = bool>) -> Self {
        Self {
            outcomes: outcomes.into_iter().collect(),
            next: 0,
        }
    }

    /// `successes` successful trials followed by failures.
    pub fn successes(successes: usize) -> Self {
        Self::new(std::iter::repeat_n(true, successes))
    }
}

impl RngCore for ScriptedRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        let success = self.outcomes.get(self.next).copied().unwrap_or(false);
        self.next += 1;
        if success { 0 } else { u64::MAX }
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        dst.fill(0);
    }
}

pub fn town(x: i32, y: i32, guards: i64, coins: i64) -> GameState {
    GameState {
        town_x: x,
        town_y: y,
        population: Population {
            guards,
            ..Population::default()
        },
        resources: Resources { coins, pizzas: 0 },
        travel_queue: Vec::new(),
    }
}

pub async fn seed_user(store: &MemoryStore, user_id: &str, username: &str, gs: &GameState) {
    store
        .json_set(
            &keys::gamestate(user_id),
            &JsonPath::root(),
            serde_json::to_value(gs).unwrap(),
        )
        .await
        .unwrap();
    store
        .json_set(
            &keys::profile(user_id),
            &JsonPath::root(),
            json!({ "username": username }),
        )
        .await
        .unwrap();
}

pub async fn load_state(store: &MemoryStore, user_id: &str) -> GameState {
    read_json(store, &keys::gamestate(user_id), &JsonPath::root())
        .await
        .unwrap()
        .unwrap()
}

pub async fn load_reports(store: &MemoryStore, user_id: &str) -> Vec<Report> {
    read_json(store, &keys::reports(user_id), &JsonPath::root())
        .await
        .unwrap()
        .unwrap_or_default()
}

/// u1 at (2,3), u2 at (5,5), u3 at (8,1).
pub fn build_test_world() -> StaticWorld {
    StaticWorld::new()
        .with_town(2, 3, "u1")
        .with_town(5, 5, "u2")
        .with_town(8, 1, "u3")
}
