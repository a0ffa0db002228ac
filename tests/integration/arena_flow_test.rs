//! Party to queue to match to results, through the public API.

use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use matharena::matches::{MatchCommand, MatchResult};
use matharena::networking::ServerEvent;
use matharena::party::QueueStatus;
use matharena::rating::Outcome;
use matharena::storage::{LeagueStore, ProfileStore};
use matharena::{ArenaMode, MatchType};

use crate::common::{queued_party, test_app};

async fn wait_for_match(app: &matharena::ArenaApp, user_id: Uuid) -> Uuid {
    for _ in 0..200 {
        if let Some(match_id) = app.orchestrator().match_for_user(user_id).await {
            return match_id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no match created for {}", user_id);
}

#[tokio::test]
async fn test_ranked_duel_forfeit_updates_records() {
    let (app, store) = test_app();
    let orchestrator = app.orchestrator().clone();
    let listener = orchestrator.run_queue_listener(app.matchmaker().clone());
    let mut finished = orchestrator.subscribe_finished();

    let (party_a, users_a) = queued_party(&app, ArenaMode::Duel, 1, MatchType::Ranked);
    let (party_b, users_b) = queued_party(&app, ArenaMode::Duel, 1, MatchType::Ranked);
    let (a, b) = (users_a[0], users_b[0]);

    let pairings = app.matchmaker().run_pass(store.now()).unwrap();
    assert_eq!(pairings.len(), 1);
    assert!(!pairings[0].is_ai_match());

    let match_id = wait_for_match(&app, a).await;
    assert_eq!(match_id, pairings[0].match_id);
    assert_eq!(orchestrator.match_for_user(b).await, Some(match_id));
    for party in [party_a, party_b] {
        let queue = app.parties().queue_state(party).unwrap();
        assert_eq!(queue.status, QueueStatus::MatchFound);
        assert_eq!(queue.match_id, Some(match_id));
    }

    let mut events = orchestrator.subscribe(match_id).await.unwrap();
    orchestrator.send(match_id, MatchCommand::Join { user_id: a }).await.unwrap();
    orchestrator.send(match_id, MatchCommand::Join { user_id: b }).await.unwrap();
    let first = events.recv().await.unwrap();
    assert!(matches!(first.event, ServerEvent::MatchState { .. }));

    orchestrator.send(match_id, MatchCommand::Forfeit { user_id: b }).await.unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(5), finished.recv())
        .await
        .unwrap()
        .unwrap();
    let winner = summary.player(a).unwrap();
    let loser = summary.player(b).unwrap();
    assert_ne!(summary.outcome.result, MatchResult::Draw);
    assert_eq!(
        summary.outcome.forfeited_by.map(|side| side.index()),
        Some(loser.team_index)
    );
    assert_eq!(winner.outcome, Outcome::Win);
    assert_eq!(loser.outcome, Outcome::Loss);
    assert_eq!(winner.elo_after, winner.elo_before + 16);
    assert_eq!(loser.elo_after + 16, loser.elo_before);

    let record = app.db().load_record(a, ArenaMode::Duel).unwrap();
    assert_eq!(record.wins, 1);
    assert_eq!(record.matches_played, 1);
    assert_eq!(record.wins_in_tier, 1);
    let record = app.db().load_record(b, ArenaMode::Duel).unwrap();
    assert_eq!(record.losses, 1);

    let league_row = app.db().participant(a).unwrap().unwrap();
    assert!(league_row.weekly_xp > 0);
    assert_eq!(app.db().recent_matches(a, 5).unwrap().len(), 1);

    for party in [party_a, party_b] {
        assert_eq!(app.parties().queue_state(party).unwrap().status, QueueStatus::Idle);
    }
    assert_eq!(orchestrator.active_matches().await, 0);
    listener.abort();
}

#[tokio::test]
async fn test_casual_duo_against_ai_plays_to_the_end() {
    let (app, store) = test_app();
    let orchestrator = app.orchestrator().clone();
    let listener = orchestrator.run_queue_listener(app.matchmaker().clone());
    let mut finished = orchestrator.subscribe_finished();

    let (party, users) = queued_party(&app, ArenaMode::Duo, 2, MatchType::Casual);
    let later = store.now() + chrono::Duration::seconds(31);
    let pairings = app.matchmaker().run_pass(later).unwrap();
    assert!(pairings[0].is_ai_match());

    let match_id = wait_for_match(&app, users[0]).await;
    for user_id in &users {
        orchestrator
            .send(match_id, MatchCommand::Join { user_id: *user_id })
            .await
            .unwrap();
    }

    let summary = tokio::time::timeout(Duration::from_secs(30), finished.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.match_id, match_id);
    assert_eq!(summary.players.len(), 2);
    assert!(summary.outcome.forfeited_by.is_none());
    // Casual matches leave ratings alone
    assert!(summary.players.iter().all(|p| p.elo_delta == 0));

    let record = app.db().load_record(users[1], ArenaMode::Duo).unwrap();
    assert_eq!(record.matches_played, 1);
    assert!(record.last_active_at <= Utc::now());

    let history = app.db().match_history(match_id).unwrap().unwrap();
    assert_eq!(history.mode, ArenaMode::Duo);
    assert_eq!(app.parties().queue_state(party).unwrap().status, QueueStatus::Idle);
    listener.abort();
}

#[tokio::test]
async fn test_running_app_matches_parties_that_start_searching() {
    let (app, _store) = test_app();
    let handles = app.start().await.unwrap();

    let (party_a, users_a) = queued_party(&app, ArenaMode::Duel, 1, MatchType::Ranked);
    let (party_b, users_b) = queued_party(&app, ArenaMode::Duel, 1, MatchType::Ranked);

    let match_id = wait_for_match(&app, users_a[0]).await;
    assert_eq!(app.orchestrator().match_for_user(users_b[0]).await, Some(match_id));
    for party in [party_a, party_b] {
        let queue = app.parties().queue_state(party).unwrap();
        assert_eq!(queue.status, QueueStatus::MatchFound);
        assert_eq!(queue.match_id, Some(match_id));
    }
    assert!(app.matchmaker().tickets().unwrap().is_empty());

    app.shutdown(handles);
}
