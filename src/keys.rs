//! Store key and lock naming.

/// Primary game-state document of a user.
pub fn gamestate(user_id: &str) -> String {
    format!("user:{user_id}:gamestate")
}

/// Profile document of a user (username and other account fields).
pub fn profile(user_id: &str) -> String {
    format!("user:{user_id}")
}

/// Report array document of a user.
pub fn reports(user_id: &str) -> String {
    format!("user:{user_id}:reports")
}

/// Coin balance time series of a user.
pub fn coins_series(user_id: &str) -> String {
    format!("user:{user_id}:ts_coins")
}

/// Settlement record of one raid, kept until the attacker's side is written.
pub fn raid_settlement(raid_id: &str) -> String {
    format!("raid:{raid_id}")
}

/// Global time series counting resolved travels per tick.
pub const TRAVELS_COMPLETED_SERIES: &str = "metrics:travels_completed";

/// Name of the lock serializing writes to one user's documents.
pub fn user_lock(user_id: &str) -> String {
    format!("user-update:{user_id}")
}
