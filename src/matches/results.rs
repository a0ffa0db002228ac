//! Post-match processing: ratings, league XP and the match archive.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::types::{MatchOutcome, MatchState, TeamSide};
use super::MatchError;
use crate::league::LeagueService;
use crate::rating::decay::DecayEngine;
use crate::rating::elo::{apply_elo_change, calculate_elo_change, Outcome, DEFAULT_K_FACTOR};
use crate::rating::types::{MatchType, Operation};
use crate::storage::database::{MatchHistoryRecord, MatchParticipantRecord};
use crate::storage::{MatchArchive, ProfileStore};

/// Rating change for one human player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerResult {
    pub user_id: Uuid,
    pub team_index: usize,
    pub outcome: Outcome,
    pub elo_before: u32,
    pub elo_after: u32,
    pub elo_delta: i32,
    pub xp_awarded: u32,
    /// The match completed the player's placement run
    pub placement_finished: bool,
}

/// Everything a finished match changed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    pub match_id: Uuid,
    pub outcome: MatchOutcome,
    pub players: Vec<PlayerResult>,
}

impl MatchSummary {
    pub fn player(&self, user_id: Uuid) -> Option<&PlayerResult> {
        self.players.iter().find(|p| p.user_id == user_id)
    }
}

/// Applies a final match snapshot to player records.
pub struct RatingService {
    profiles: Arc<dyn ProfileStore>,
    archive: Arc<dyn MatchArchive>,
    league: Arc<LeagueService>,
    base_xp: u32,
    k_factor: f64,
}

impl RatingService {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        archive: Arc<dyn MatchArchive>,
        league: Arc<LeagueService>,
        base_xp: u32,
    ) -> Self {
        Self {
            profiles,
            archive,
            league,
            base_xp,
            k_factor: DEFAULT_K_FACTOR,
        }
    }

    pub fn with_k_factor(mut self, k_factor: f64) -> Self {
        self.k_factor = k_factor;
        self
    }

    /// League XP for a finished match: winners get half again.
    pub fn match_xp(&self, outcome: Outcome) -> u32 {
        match outcome {
            Outcome::Win => self.base_xp + self.base_xp / 2,
            Outcome::Loss | Outcome::Draw => self.base_xp,
        }
    }

    /// Update every human's record, award league XP and archive the match.
    /// Casual matches move stats only.
    pub fn apply(&self, state: &MatchState, now: DateTime<Utc>) -> Result<MatchSummary, MatchError> {
        let outcome = state.outcome.ok_or(MatchError::NotFinished)?;
        let ranked = state.match_type == MatchType::Ranked;
        let focus = state.operation.filter(|op| *op != Operation::Mixed);

        let mut players = Vec::new();
        let mut archived = Vec::new();

        for (t, team) in state.teams.iter().enumerate() {
            let team_outcome = outcome.result.outcome_for(TeamSide::from_index(t));
            let opponent_rating = state.teams[1 - t].rating;

            for player in team.players.iter().filter(|p| !p.is_ai) {
                let mut record = self.profiles.load_record(player.user_id, state.mode)?;
                DecayEngine::record_activity(&mut record, now);
                let elo_before = record.elo;
                let mut elo_delta = 0;
                let mut placement_finished = false;

                if ranked {
                    let multiplier = DecayEngine::elo_multiplier(&record);
                    elo_delta = calculate_elo_change(record.elo, opponent_rating, team_outcome, self.k_factor)
                        * multiplier;
                    record.elo = apply_elo_change(record.elo, elo_delta);

                    if let Some(op_elo) = focus.and_then(|op| record.operation_elo.get_mut(op)) {
                        let op_delta =
                            calculate_elo_change(*op_elo, opponent_rating, team_outcome, self.k_factor) * multiplier;
                        *op_elo = apply_elo_change(*op_elo, op_delta);
                    }
                    if team_outcome == Outcome::Win {
                        record.wins_in_tier += 1;
                    }
                    placement_finished = DecayEngine::record_placement_match(&mut record);
                }

                record.matches_played += 1;
                match team_outcome {
                    Outcome::Win => record.wins += 1,
                    Outcome::Loss => record.losses += 1,
                    Outcome::Draw => record.draws += 1,
                }
                record.refresh_rank();
                self.profiles.save_record(&record)?;

                let xp_awarded = self
                    .league
                    .award_xp(player.user_id, self.match_xp(team_outcome), now)?;

                archived.push(MatchParticipantRecord {
                    match_id: state.match_id,
                    user_id: player.user_id,
                    team_index: t as u8,
                    score: player.score,
                    correct: player.correct,
                    total: player.total,
                    elo_before,
                    elo_after: record.elo,
                });
                players.push(PlayerResult {
                    user_id: player.user_id,
                    team_index: t,
                    outcome: team_outcome,
                    elo_before,
                    elo_after: record.elo,
                    elo_delta: record.elo as i32 - elo_before as i32,
                    xp_awarded,
                    placement_finished,
                });
            }
        }

        let snapshot_json =
            serde_json::to_string(state).map_err(|e| MatchError::Serialization(e.to_string()))?;
        let history = MatchHistoryRecord {
            match_id: state.match_id,
            mode: state.mode,
            match_type: state.match_type,
            result: outcome.result.as_str().to_string(),
            home_score: outcome.home_score,
            away_score: outcome.away_score,
            started_at: state.started_at,
            ended_at: state.ended_at.unwrap_or(now),
            snapshot_json,
        };
        self.archive.archive_match(&history, &archived)?;

        tracing::info!(
            "Match {} results applied for {} players",
            state.match_id,
            players.len()
        );
        Ok(MatchSummary {
            match_id: state.match_id,
            outcome,
            players,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::engine::tests::{ai_team, human_team};
    use crate::matches::engine::{MatchCommand, MatchEngine, MatchSetup};
    use crate::matches::rules::MatchRules;
    use crate::matches::types::MatchResult;
    use crate::rating::types::ArenaMode;
    use crate::storage::{LeagueStore, SqliteArenaStore};

    fn service(store: &Arc<SqliteArenaStore>) -> RatingService {
        RatingService::new(
            store.clone(),
            store.clone(),
            Arc::new(LeagueService::new(store.clone())),
            20,
        )
    }

    /// A finished duel where the away side conceded.
    fn finished_duel(store: &SqliteArenaStore, match_type: MatchType, operation: Option<Operation>) -> MatchState {
        let home = human_team("Home", 1);
        let away = human_team("Away", 1);
        for team in [&home, &away] {
            for p in &team.players {
                store.register_user(p.user_id, &p.display_name).unwrap();
            }
        }
        let setup = MatchSetup {
            match_id: Uuid::new_v4(),
            mode: ArenaMode::Duel,
            match_type,
            operation,
            home,
            away,
            seed: 5,
        };
        let mut engine = MatchEngine::new(setup, MatchRules::default(), Utc::now()).unwrap();
        for id in engine.state().human_ids() {
            engine.handle(MatchCommand::Join { user_id: id }, Utc::now()).unwrap();
        }
        engine.tick(5_000, Utc::now());
        let away_player = engine.state().teams[1].players[0].user_id;
        engine
            .handle(MatchCommand::Forfeit { user_id: away_player }, Utc::now())
            .unwrap();
        engine.state().clone()
    }

    #[test]
    fn test_ranked_result_moves_elo_and_stats() {
        let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
        let state = finished_duel(&store, MatchType::Ranked, None);
        let summary = service(&store).apply(&state, Utc::now()).unwrap();

        let winner = state.teams[0].players[0].user_id;
        let loser = state.teams[1].players[0].user_id;
        assert_eq!(summary.outcome.result, MatchResult::Home);
        assert_eq!(summary.player(winner).unwrap().elo_delta, 16);
        assert_eq!(summary.player(loser).unwrap().elo_delta, -16);

        let record = store.load_record(winner, ArenaMode::Duel).unwrap();
        assert_eq!(record.elo, 516);
        assert_eq!(record.wins, 1);
        assert_eq!(record.wins_in_tier, 1);
        assert_eq!(record.matches_played, 1);

        let record = store.load_record(loser, ArenaMode::Duel).unwrap();
        assert_eq!(record.elo, 484);
        assert_eq!(record.losses, 1);
        assert_eq!(record.wins_in_tier, 0);
    }

    #[test]
    fn test_k_factor_scales_swing() {
        let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
        let state = finished_duel(&store, MatchType::Ranked, None);
        let summary = service(&store).with_k_factor(64.0).apply(&state, Utc::now()).unwrap();

        let winner = state.teams[0].players[0].user_id;
        assert_eq!(summary.player(winner).unwrap().elo_delta, 32);
    }

    #[test]
    fn test_casual_keeps_elo() {
        let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
        let state = finished_duel(&store, MatchType::Casual, None);
        let summary = service(&store).apply(&state, Utc::now()).unwrap();

        for result in &summary.players {
            assert_eq!(result.elo_delta, 0);
            let record = store.load_record(result.user_id, ArenaMode::Duel).unwrap();
            assert_eq!(record.elo, 500);
            assert_eq!(record.matches_played, 1);
            assert_eq!(record.wins_in_tier, 0);
        }
    }

    #[test]
    fn test_operation_rating_follows_focus() {
        let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
        let state = finished_duel(&store, MatchType::Ranked, Some(Operation::Division));
        service(&store).apply(&state, Utc::now()).unwrap();

        let winner = state.teams[0].players[0].user_id;
        let record = store.load_record(winner, ArenaMode::Duel).unwrap();
        assert_eq!(record.operation_elo.division, 516);
        assert_eq!(record.operation_elo.addition, 500);
    }

    #[test]
    fn test_placement_match_doubles_swing() {
        let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
        let state = finished_duel(&store, MatchType::Ranked, None);
        let loser = state.teams[1].players[0].user_id;

        let mut record = store.load_record(loser, ArenaMode::Duel).unwrap();
        record.placement_matches_completed = Some(0);
        store.save_record(&record).unwrap();

        let summary = service(&store).apply(&state, Utc::now()).unwrap();
        assert_eq!(summary.player(loser).unwrap().elo_delta, -32);
        let record = store.load_record(loser, ArenaMode::Duel).unwrap();
        assert_eq!(record.placement_matches_completed, Some(1));
    }

    #[test]
    fn test_archive_and_league_xp() {
        let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
        let state = finished_duel(&store, MatchType::Ranked, None);
        let summary = service(&store).apply(&state, Utc::now()).unwrap();

        let history = store.match_history(state.match_id).unwrap().unwrap();
        assert_eq!(history.result, "home");
        assert!(history.snapshot_json.contains(&state.match_id.to_string()));

        let winner = state.teams[0].players[0].user_id;
        let recent = store.recent_matches(winner, 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].elo_after, 516);

        let row = store.participant(winner).unwrap().unwrap();
        assert_eq!(row.weekly_xp, summary.player(winner).unwrap().xp_awarded);
        assert!(summary.player(winner).unwrap().xp_awarded >= 30);
    }

    #[test]
    fn test_ai_players_are_skipped_and_unfinished_rejected() {
        let store = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
        let home = human_team("Solo", 1);
        store
            .register_user(home.players[0].user_id, "Solo 1")
            .unwrap();
        let setup = MatchSetup {
            match_id: Uuid::new_v4(),
            mode: ArenaMode::Duel,
            match_type: MatchType::Ranked,
            operation: None,
            home,
            away: ai_team(1, 500),
            seed: 8,
        };
        let mut engine = MatchEngine::new(setup, MatchRules::default(), Utc::now()).unwrap();
        assert!(matches!(
            service(&store).apply(engine.state(), Utc::now()),
            Err(MatchError::NotFinished)
        ));

        let user_id = engine.state().teams[0].players[0].user_id;
        engine.handle(MatchCommand::Forfeit { user_id }, Utc::now()).unwrap();
        let summary = service(&store).apply(engine.state(), Utc::now()).unwrap();
        assert_eq!(summary.players.len(), 1);
        assert_eq!(summary.players[0].outcome, Outcome::Loss);
    }
}
