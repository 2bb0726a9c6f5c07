use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One leg of a trip between towns, queued on the travelling user's state.
///
/// A raid leg and the return leg it produces are separate records with no
/// back-reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Travel {
    /// Absolute arrival time, unix nanoseconds.
    pub arrival_at: i64,
    pub destination_x: i32,
    pub destination_y: i32,
    pub returning: bool,
    pub thieves: i64,
    /// Loot carried home; only meaningful on a returning leg.
    pub coins: i64,
}

impl Travel {
    pub fn raid(arrival_at: i64, x: i32, y: i32, thieves: i64) -> Self {
        Self {
            arrival_at,
            destination_x: x,
            destination_y: y,
            returning: false,
            thieves,
            coins: 0,
        }
    }

    pub fn homecoming(arrival_at: i64, x: i32, y: i32, thieves: i64, coins: i64) -> Self {
        Self {
            arrival_at,
            destination_x: x,
            destination_y: y,
            returning: true,
            thieves,
            coins,
        }
    }
}

/// Euclidean distance between two tiles.
pub fn tile_distance(from: (i32, i32), to: (i32, i32)) -> f64 {
    let dx = f64::from(to.0 - from.0);
    let dy = f64::from(to.1 - from.1);
    dx.hypot(dy)
}

/// Time to cover the distance between two tiles at `speed` tiles per second.
pub fn travel_duration(from: (i32, i32), to: (i32, i32), speed: f64) -> Duration {
    if speed <= 0.0 {
        return Duration::MAX;
    }
    Duration::try_from_secs_f64(tile_distance(from, to) / speed).unwrap_or(Duration::MAX)
}

/// Arrival timestamp (ns) of a leg departing at `depart_at` (ns).
pub fn arrival_at(depart_at: i64, from: (i32, i32), to: (i32, i32), speed: f64) -> i64 {
    let nanos = i64::try_from(travel_duration(from, to, speed).as_nanos()).unwrap_or(i64::MAX);
    depart_at.saturating_add(nanos)
}

/// Insert `travel` keeping the queue sorted by arrival; it goes after any
/// entries with the same arrival time.
pub fn insert_sorted(queue: &mut Vec<Travel>, travel: Travel) {
    let at = queue.partition_point(|t| t.arrival_at <= travel.arrival_at);
    queue.insert(at, travel);
}

/// Number of leading entries that have arrived by `now`.
pub fn completed_prefix(queue: &[Travel], now: i64) -> usize {
    queue.iter().take_while(|t| t.arrival_at <= now).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: i64 = 1_000_000_000;

    #[test]
    fn three_four_five() {
        assert_eq!(tile_distance((2, 3), (5, 7)), 5.0);
        assert_eq!(travel_duration((2, 3), (5, 7), 0.5), Duration::from_secs(10));
        assert_eq!(arrival_at(1_000, (2, 3), (5, 7), 0.5), 1_000 + 10 * SECOND);
    }

    #[test]
    fn zero_speed_never_arrives() {
        assert_eq!(arrival_at(5, (0, 0), (1, 0), 0.0), i64::MAX);
    }

    #[test]
    fn prefix_stops_at_first_future_entry() {
        let queue = vec![
            Travel::raid(10, 0, 0, 1),
            Travel::raid(20, 0, 0, 1),
            Travel::raid(30, 0, 0, 1),
        ];
        assert_eq!(completed_prefix(&queue, 5), 0);
        assert_eq!(completed_prefix(&queue, 20), 2);
        assert_eq!(completed_prefix(&queue, 99), 3);
    }

    #[test]
    fn insert_after_equal_arrivals() {
        let mut queue = vec![Travel::raid(10, 0, 0, 1), Travel::raid(30, 0, 0, 1)];
        insert_sorted(&mut queue, Travel::homecoming(10, 9, 9, 2, 5));
        insert_sorted(&mut queue, Travel::homecoming(40, 9, 9, 3, 5));

        let arrivals: Vec<i64> = queue.iter().map(|t| t.arrival_at).collect();
        assert_eq!(arrivals, vec![10, 10, 30, 40]);
        assert!(queue[1].returning);
    }
}
