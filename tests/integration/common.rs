//! Shared fixtures.

use std::sync::Arc;
use uuid::Uuid;

use matharena::app::ArenaApp;
use matharena::storage::config::AppConfig;
use matharena::storage::{MemoryStore, SqliteArenaStore};
use matharena::{ArenaMode, MatchType};

/// App over in-memory stores with short match clocks.
pub fn test_app() -> (ArenaApp, Arc<MemoryStore>) {
    let mut config = AppConfig::default();
    config.server.bind_addr = "127.0.0.1:0".to_string();
    config.matches.tick_interval_ms = 10;
    config.matches.pre_match_secs = 0;
    config.matches.break_secs = 0;
    config.matches.halftime_secs = 0;
    config.matches.anchor_decision_secs = 0;
    config.matches.handoff_secs = 0;
    config.matches.team_slot_secs = 1;
    config.matches.solo_round_secs = 1;
    config.matches.rounds_per_half = 1;
    config.matchmaking.pass_interval_ms = 20;

    let store = Arc::new(MemoryStore::new());
    let db = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
    (ArenaApp::with_stores(config, store.clone(), db), store)
}

/// Create a ready, searching party of `size` registered users, the way a
/// client does: create, join, ready up and start the queue.
pub fn queued_party(app: &ArenaApp, mode: ArenaMode, size: usize, match_type: MatchType) -> (Uuid, Vec<Uuid>) {
    let users: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
    for (i, user) in users.iter().enumerate() {
        app.db().register_user(*user, &format!("player {}", i)).unwrap();
    }

    let parties = app.parties();
    let leader = users[0];
    let party_id = parties.create_party(leader, "player 0").unwrap().party.id;
    parties.set_target_mode(party_id, leader, Some(mode)).unwrap();
    for (i, user) in users.iter().enumerate().skip(1) {
        parties.join_party(party_id, *user, &format!("player {}", i)).unwrap();
    }
    for user in &users {
        parties.toggle_ready(party_id, *user).unwrap();
    }
    parties.start_queue(party_id, leader, match_type).unwrap();
    (party_id, users)
}
