//! Live match state, as owned by the engine and shipped in snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::questions::Question;
use crate::rating::elo::Outcome;
use crate::rating::types::{ArenaMode, MatchType, Operation};

/// Match phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    PreMatch,
    Active,
    Break,
    Halftime,
    AnchorDecision,
    PostMatch,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::PreMatch => "pre_match",
            MatchPhase::Active => "active",
            MatchPhase::Break => "break",
            MatchPhase::Halftime => "halftime",
            MatchPhase::AnchorDecision => "anchor_decision",
            MatchPhase::PostMatch => "post_match",
        }
    }
}

impl std::fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Home or away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamSide {
    Home,
    Away,
}

impl TeamSide {
    pub fn index(&self) -> usize {
        match self {
            TeamSide::Home => 0,
            TeamSide::Away => 1,
        }
    }

    pub fn from_index(index: usize) -> Self {
        if index == 0 {
            TeamSide::Home
        } else {
            TeamSide::Away
        }
    }

    pub fn opponent(&self) -> TeamSide {
        match self {
            TeamSide::Home => TeamSide::Away,
            TeamSide::Away => TeamSide::Home,
        }
    }
}

/// Final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    Home,
    Away,
    Draw,
}

impl MatchResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchResult::Home => "home",
            MatchResult::Away => "away",
            MatchResult::Draw => "draw",
        }
    }

    /// Result by score; equal scores are an explicit draw.
    pub fn by_score(home: u32, away: u32) -> Self {
        match home.cmp(&away) {
            std::cmp::Ordering::Greater => MatchResult::Home,
            std::cmp::Ordering::Less => MatchResult::Away,
            std::cmp::Ordering::Equal => MatchResult::Draw,
        }
    }

    pub fn winner(side: TeamSide) -> Self {
        match side {
            TeamSide::Home => MatchResult::Home,
            TeamSide::Away => MatchResult::Away,
        }
    }

    /// Outcome for one team.
    pub fn outcome_for(&self, side: TeamSide) -> Outcome {
        match (self, side) {
            (MatchResult::Draw, _) => Outcome::Draw,
            (MatchResult::Home, TeamSide::Home) | (MatchResult::Away, TeamSide::Away) => Outcome::Win,
            _ => Outcome::Loss,
        }
    }
}

/// How a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOutcome {
    pub result: MatchResult,
    pub home_score: u32,
    pub away_score: u32,
    /// Set when a team conceded or timed out fully disconnected
    pub forfeited_by: Option<TeamSide>,
}

/// One player in a live match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub user_id: Uuid,
    pub display_name: String,
    /// Assigned relay slot (1-based)
    pub slot: u8,
    pub score: u32,
    pub correct: u32,
    pub total: u32,
    pub streak: u32,
    pub max_streak: u32,
    pub is_active: bool,
    /// Slot quota reached
    pub is_complete: bool,
    pub is_igl: bool,
    pub is_anchor: bool,
    pub is_connected: bool,
    pub is_ai: bool,
    pub current_question: Option<Question>,
    pub questions_in_slot: u32,
}

impl PlayerState {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// One team in a live match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamState {
    pub team_id: Option<Uuid>,
    pub name: String,
    pub tag: Option<String>,
    pub is_home: bool,
    pub score: u32,
    pub streak: u32,
    pub timeouts_used: u32,
    pub swaps_used: u32,
    pub anchor_callins_used: u32,
    /// Slot number to the player answering it
    pub slots: BTreeMap<u8, Uuid>,
    /// Final-round replacements from the anchor call-in
    pub final_round_overrides: BTreeMap<u8, Uuid>,
    pub players: Vec<PlayerState>,
    pub party_ids: Vec<Uuid>,
    /// Matchmaking rating of the side
    pub rating: u32,
    pub igl_id: Option<Uuid>,
    pub anchor_id: Option<Uuid>,
    /// Time every human has been disconnected
    pub disconnected_ms: u64,
}

impl TeamState {
    pub fn player(&self, user_id: Uuid) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn player_mut(&mut self, user_id: Uuid) -> Option<&mut PlayerState> {
        self.players.iter_mut().find(|p| p.user_id == user_id)
    }

    pub fn member_ids(&self) -> Vec<Uuid> {
        self.players.iter().map(|p| p.user_id).collect()
    }

    pub fn human_ids(&self) -> Vec<Uuid> {
        self.players.iter().filter(|p| !p.is_ai).map(|p| p.user_id).collect()
    }

    /// A team with humans none of whom are connected.
    pub fn is_abandoned(&self) -> bool {
        let mut humans = self.players.iter().filter(|p| !p.is_ai).peekable();
        humans.peek().is_some() && humans.all(|p| !p.is_connected)
    }

    pub fn active_player(&self) -> Option<&PlayerState> {
        self.players.iter().find(|p| p.is_active)
    }
}

/// Authoritative match snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchState {
    pub match_id: Uuid,
    pub mode: ArenaMode,
    pub match_type: MatchType,
    pub operation: Option<Operation>,
    pub phase: MatchPhase,
    /// 0 before the first round
    pub round: u32,
    pub half: u8,
    /// Elapsed match time
    pub game_clock_ms: u64,
    /// Remaining time in the current slot
    pub relay_clock_ms: u64,
    /// Remaining time of a timed pause phase
    pub phase_remaining_ms: u64,
    pub handoff_remaining_ms: Option<u64>,
    pub current_slot: u8,
    pub teams: [TeamState; 2],
    pub outcome: Option<MatchOutcome>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl MatchState {
    /// Team index and player for a user.
    pub fn locate(&self, user_id: Uuid) -> Option<(usize, &PlayerState)> {
        self.teams
            .iter()
            .enumerate()
            .find_map(|(i, team)| team.player(user_id).map(|p| (i, p)))
    }

    pub fn human_ids(&self) -> Vec<Uuid> {
        self.teams.iter().flat_map(|t| t.human_ids()).collect()
    }

    pub fn party_ids(&self) -> Vec<Uuid> {
        self.teams.iter().flat_map(|t| t.party_ids.iter().copied()).collect()
    }

    pub fn scores(&self) -> (u32, u32) {
        (self.teams[0].score, self.teams[1].score)
    }
}
