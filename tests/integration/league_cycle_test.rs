//! Weekly league cycle against the SQLite store.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use uuid::Uuid;

use matharena::league::{league_for_elo, week_start_for, LeagueService, StandingLeague, WeeklyTier};
use matharena::storage::database::LeagueParticipantRow;
use matharena::storage::{LeagueStore, ProfileStore, SqliteArenaStore};

fn plasma_week(store: &SqliteArenaStore, count: usize) -> Vec<Uuid> {
    let monday = Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let user_id = Uuid::new_v4();
            store.register_user(user_id, &format!("racer {}", i)).unwrap();
            store
                .upsert_participant(&LeagueParticipantRow {
                    user_id,
                    tier: WeeklyTier::Plasma,
                    weekly_xp: 50 + 10 * i as u32,
                    week_start: monday,
                    joined_at: monday,
                })
                .unwrap();
            user_id
        })
        .collect()
}

#[test]
fn test_ten_player_cycle_moves_top_three_and_bottom_two() {
    let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
    let league = LeagueService::new(store.clone());
    let users = plasma_week(&store, 10);

    let next_monday = Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap();
    let outcomes = league.sync(next_monday).unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].promoted().count(), 3);
    assert_eq!(outcomes[0].demoted().count(), 2);

    let tier_of = |user: Uuid| store.participant(user).unwrap().unwrap().tier;
    for top in &users[7..] {
        assert_eq!(tier_of(*top), WeeklyTier::Void);
    }
    for bottom in &users[..2] {
        assert_eq!(tier_of(*bottom), WeeklyTier::Cobalt);
    }
    assert_eq!(tier_of(users[5]), WeeklyTier::Plasma);

    let monday = Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap();
    let history = store.league_history(monday).unwrap();
    assert_eq!(history.len(), 10);
    let first = history.iter().find(|h| h.position == 1).unwrap();
    assert_eq!(first.user_id, users[9]);
    assert_eq!(first.movement, "promoted");
    assert_eq!(first.prize_coins, 100);

    // Winner's prize was credited with the cycle
    assert_eq!(store.credit_coins(users[9], 0).unwrap(), 100);

    let rows = store.participants().unwrap();
    assert!(rows.iter().all(|r| r.week_start == week_start_for(next_monday)));
    assert!(rows.iter().all(|r| r.weekly_xp == 0));

    // Replaying the same week is a no-op
    assert!(league.sync(next_monday + Duration::hours(1)).unwrap().is_empty());
}

#[test]
fn test_standings_pad_humans_with_ghosts() {
    let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
    let league = LeagueService::new(store.clone());
    let monday = Utc.with_ymd_and_hms(2026, 10, 12, 0, 0, 0).unwrap();
    let user = Uuid::new_v4();
    store.register_user(user, "Ada").unwrap();
    league.award_xp(user, 500, monday).unwrap();

    let midweek = monday + Duration::days(3);
    let standings = league
        .standings(WeeklyTier::Neon, &|_| "Ada".to_string(), midweek)
        .unwrap();
    assert!(standings.len() > 1);
    assert!(standings.iter().any(|e| e.is_ghost));
    let me = standings.iter().find(|e| e.user_id == Some(user)).unwrap();
    assert_eq!(me.name, "Ada");
    for (index, entry) in standings.iter().enumerate() {
        assert_eq!(entry.position, index as u32 + 1);
    }
}

#[test]
fn test_standing_leagues_follow_elo() {
    assert_eq!(league_for_elo(0), StandingLeague::Bronze);
    assert_eq!(league_for_elo(100_000), StandingLeague::Diamond);
}
