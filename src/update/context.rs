use rand::RngCore;

use super::patch::PatchSet;
use crate::config::UpdaterConfig;
use crate::model::GameState;

/// Context passed through one user's tick.
///
/// Everything resolution needs is handed in explicitly: the store and map
/// authority, configuration, and the random source (seeded by tests).
pub struct TickContext<'a, S, W> {
    pub user_id: &'a str,
    /// Reference time of the tick, unix nanoseconds.
    pub now: i64,
    /// The acting user's state as read at the start of the tick.
    pub state: &'a GameState,
    pub store: &'a S,
    pub world: &'a W,
    pub config: &'a UpdaterConfig,
    pub rng: &'a mut (dyn RngCore + Send),
    /// Resolution writes its effects here.
    pub patches: &'a mut PatchSet,
}
