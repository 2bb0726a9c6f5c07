mod common;

use common::{ScriptedRng, build_test_world, load_reports, load_state, seed_user, town};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use town_updater::model::Travel;
use town_updater::model::travel::arrival_at;
use town_updater::store::{MemoryStore, ScheduleIndex};
use town_updater::update::{StaticWorld, Updater};
use town_updater::{ErrorKind, UpdaterConfig};

const SECOND: i64 = 1_000_000_000;

async fn setup(attacker_queue: Vec<Travel>, target_guards: i64, target_coins: i64) -> MemoryStore {
    let store = MemoryStore::new();
    let mut attacker = town(2, 3, 0, 0);
    attacker.travel_queue = attacker_queue;
    seed_user(&store, "u1", "alice", &attacker).await;
    seed_user(&store, "u2", "bob", &town(5, 5, target_guards, target_coins)).await;
    seed_user(&store, "u3", "carol", &town(8, 1, 0, 0)).await;
    store
}

fn updater(store: &MemoryStore) -> Updater<MemoryStore, StaticWorld> {
    Updater::new(store.clone(), build_test_world(), UpdaterConfig::default())
}

#[tokio::test]
async fn raid_sends_thieves_home_with_loot() {
    let raid = Travel::raid(100 * SECOND, 5, 5, 10);
    let store = setup(vec![raid], 4, 50).await;
    let updater = updater(&store);

    let mut rng = ScriptedRng::successes(8);
    let summary = updater.tick("u1", 100 * SECOND, &mut rng).await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.raids, 1);
    assert_eq!(summary.committed, vec!["u1", "u2"]);

    let target = load_state(&store, "u2").await;
    assert_eq!(target.resources.coins, 0);

    let expected_return = arrival_at(100 * SECOND, (5, 5), (2, 3), 0.05);
    let attacker = load_state(&store, "u1").await;
    assert_eq!(
        attacker.travel_queue,
        vec![Travel::homecoming(expected_return, 5, 5, 8, 50)]
    );
    assert_eq!(summary.next_due, Some(expected_return));
    assert_eq!(
        store.zscore("user_updates", "u1").await.unwrap(),
        Some(expected_return)
    );

    let attacker_reports = load_reports(&store, "u1").await;
    assert_eq!(attacker_reports.len(), 1);
    assert_eq!(attacker_reports[0].title, "Thief report");
    assert_eq!(
        attacker_reports[0].content,
        "Our heist with 10 thieves on bob's town was successful. \
         2 thieves were caught, but 8 thieves got away with 50 coins."
    );

    let target_reports = load_reports(&store, "u2").await;
    assert_eq!(target_reports.len(), 1);
    assert_eq!(target_reports[0].title, "We have been robbed!");
    assert!(target_reports[0].unread);
}

#[tokio::test]
async fn return_leg_credits_attacker_without_reports() {
    let store = setup(vec![Travel::homecoming(200 * SECOND, 5, 5, 8, 50)], 4, 0).await;
    let updater = updater(&store);

    // Every scripted trial fails, so any randomness would show up as a loss.
    let mut rng = ScriptedRng::successes(0);
    let summary = updater.tick("u1", 200 * SECOND, &mut rng).await.unwrap();
    assert_eq!(summary.returns, 1);
    assert_eq!(summary.committed, vec!["u1"]);

    let attacker = load_state(&store, "u1").await;
    assert_eq!(attacker.resources.coins, 50);
    assert_eq!(attacker.population.thieves, 8);
    assert!(attacker.travel_queue.is_empty());
    assert!(load_reports(&store, "u1").await.is_empty());
    assert_eq!(summary.next_due, None);
}

#[tokio::test]
async fn all_caught_means_no_return_leg() {
    let store = setup(vec![Travel::raid(10, 5, 5, 6)], 30, 500).await;
    let updater = updater(&store);

    let mut rng = ScriptedRng::successes(0);
    updater.tick("u1", 10, &mut rng).await.unwrap();

    assert!(load_state(&store, "u1").await.travel_queue.is_empty());
    assert_eq!(load_state(&store, "u2").await.resources.coins, 500);

    let attacker_reports = load_reports(&store, "u1").await;
    assert_eq!(
        attacker_reports[0].content,
        "Our heist on bob was a failure. All 6 thieves got caught."
    );
    let target_reports = load_reports(&store, "u2").await;
    assert_eq!(target_reports[0].title, "We caught thieves!");
}

#[tokio::test]
async fn unguarded_town_loses_full_capacity() {
    let store = setup(vec![Travel::raid(10, 5, 5, 7)], 0, 1_000).await;
    let updater = updater(&store);

    let mut rng = SmallRng::seed_from_u64(5);
    updater.tick("u1", 10, &mut rng).await.unwrap();

    assert_eq!(load_state(&store, "u2").await.resources.coins, 930);
    let attacker = load_state(&store, "u1").await;
    let leg = &attacker.travel_queue[0];
    assert_eq!((leg.thieves, leg.coins), (7, 70));
    assert_eq!(
        load_reports(&store, "u2").await[0].content,
        "It looks like someone stole 70 coins from us."
    );
}

#[tokio::test]
async fn empty_legs_are_dropped_without_lookup() {
    // (40, 40) has no town; a lookup would fail the tick.
    let store = setup(
        vec![Travel::raid(10, 40, 40, 0), Travel::raid(99, 5, 5, 3)],
        0,
        10,
    )
    .await;
    let updater = updater(&store);

    let mut rng = SmallRng::seed_from_u64(1);
    let summary = updater.tick("u1", 50, &mut rng).await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.raids, 0);

    let attacker = load_state(&store, "u1").await;
    assert_eq!(attacker.travel_queue, vec![Travel::raid(99, 5, 5, 3)]);
    assert!(load_reports(&store, "u1").await.is_empty());
    assert_eq!(summary.next_due, Some(99));
}

#[tokio::test]
async fn self_target_fails_without_writes() {
    let queue = vec![Travel::raid(10, 2, 3, 4)];
    let store = setup(queue.clone(), 0, 0).await;
    let before = load_state(&store, "u1").await;
    let updater = updater(&store);

    let mut rng = SmallRng::seed_from_u64(1);
    let err = updater.tick("u1", 10, &mut rng).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAction);
    assert_eq!(load_state(&store, "u1").await, before);
    assert!(load_reports(&store, "u1").await.is_empty());
}

#[tokio::test]
async fn missing_town_fails_without_writes() {
    let store = setup(
        vec![Travel::homecoming(5, 5, 5, 2, 20), Travel::raid(10, 40, 40, 4)],
        0,
        0,
    )
    .await;
    let before = load_state(&store, "u1").await;
    let updater = updater(&store);

    let mut rng = SmallRng::seed_from_u64(1);
    let err = updater.tick("u1", 10, &mut rng).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    // The earlier return leg is not credited either.
    assert_eq!(load_state(&store, "u1").await, before);
}

#[tokio::test]
async fn concurrent_ticks_resolve_a_raid_once() {
    let store = setup(vec![Travel::raid(10, 5, 5, 5)], 0, 1_000).await;
    let updater = updater(&store);

    let mut rng_a = SmallRng::seed_from_u64(1);
    let mut rng_b = SmallRng::seed_from_u64(2);
    let (a, b) = tokio::join!(
        updater.tick("u1", 10, &mut rng_a),
        updater.tick("u1", 10, &mut rng_b)
    );

    let raids: usize = [&a, &b]
        .into_iter()
        .filter_map(|r| r.as_ref().ok())
        .map(|s| s.raids)
        .sum();
    let committed = [&a, &b]
        .into_iter()
        .filter(|r| r.as_ref().is_ok_and(|s| !s.committed.is_empty()))
        .count();
    assert_eq!(committed, 1);
    assert!(raids >= 1);

    assert_eq!(load_state(&store, "u2").await.resources.coins, 950);
    assert_eq!(load_state(&store, "u1").await.travel_queue.len(), 1);
    assert_eq!(load_reports(&store, "u1").await.len(), 1);
    assert_eq!(load_reports(&store, "u2").await.len(), 1);
}

#[tokio::test]
async fn second_raid_in_one_tick_sees_first_debit() {
    let store = setup(
        vec![Travel::raid(10, 5, 5, 10), Travel::raid(20, 5, 5, 10)],
        0,
        50,
    )
    .await;
    let updater = updater(&store);

    let mut rng = SmallRng::seed_from_u64(1);
    let summary = updater.tick("u1", 20, &mut rng).await.unwrap();
    assert_eq!(summary.raids, 2);

    assert_eq!(load_state(&store, "u2").await.resources.coins, 0);
    let loot: Vec<i64> = load_state(&store, "u1")
        .await
        .travel_queue
        .iter()
        .map(|t| t.coins)
        .collect();
    assert_eq!(loot, vec![50, 0]);
    assert_eq!(load_reports(&store, "u1").await.len(), 2);
    assert_eq!(load_reports(&store, "u2").await.len(), 2);
}

#[tokio::test]
async fn coins_and_thieves_are_conserved() {
    for seed in 0..20 {
        let store = setup(vec![Travel::raid(10, 5, 5, 12)], 9, 80).await;
        let updater = updater(&store);

        let mut rng = SmallRng::seed_from_u64(seed);
        updater.tick("u1", 10, &mut rng).await.unwrap();

        let target_coins = load_state(&store, "u2").await.resources.coins;
        let queue = load_state(&store, "u1").await.travel_queue;
        let (carried, escaped) = queue
            .first()
            .map_or((0, 0), |leg| (leg.coins, leg.thieves));

        assert_eq!(target_coins + carried, 80);
        assert!((0..=12).contains(&escaped));
        assert!(carried <= escaped * 10);
        assert_eq!(queue.len(), usize::from(escaped > 0));
    }
}

#[tokio::test]
async fn travels_metric_counts_resolved_entries() {
    use town_updater::keys;
    use town_updater::store::TimeSeries;

    let store = setup(vec![Travel::homecoming(2_000_000, 5, 5, 1, 4)], 0, 0).await;
    let updater = updater(&store);

    let mut rng = SmallRng::seed_from_u64(1);
    updater.tick("u1", 3_000_000, &mut rng).await.unwrap();

    let points = store
        .ts_range(keys::TRAVELS_COMPLETED_SERIES, 0, i64::MAX)
        .await
        .unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!((points[0].timestamp, points[0].value), (3, 1.0));

    let coins = store
        .ts_range(&keys::coins_series("u1"), 0, i64::MAX)
        .await
        .unwrap();
    assert_eq!(coins[0].value, 4.0);
}
