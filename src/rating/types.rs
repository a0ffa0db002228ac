//! Shared arena types: modes, operations and the persisted player record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rank::{calculate_arena_rank, Division, Rank};

/// Competitive arena mode, keyed by team size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaMode {
    #[serde(rename = "1v1")]
    Duel,
    #[serde(rename = "2v2")]
    Duo,
    #[serde(rename = "3v3")]
    Trio,
    #[serde(rename = "4v4")]
    Quad,
    #[serde(rename = "5v5")]
    Squad,
}

impl ArenaMode {
    pub const ALL: [ArenaMode; 5] = [
        ArenaMode::Duel,
        ArenaMode::Duo,
        ArenaMode::Trio,
        ArenaMode::Quad,
        ArenaMode::Squad,
    ];

    /// Players per team.
    pub fn team_size(&self) -> usize {
        match self {
            ArenaMode::Duel => 1,
            ArenaMode::Duo => 2,
            ArenaMode::Trio => 3,
            ArenaMode::Quad => 4,
            ArenaMode::Squad => 5,
        }
    }

    /// Starting rating for a new record in this mode.
    pub fn base_elo(&self) -> u32 {
        match self {
            ArenaMode::Duel => 500,
            ArenaMode::Duo => 400,
            ArenaMode::Trio => 350,
            ArenaMode::Quad => 300,
            ArenaMode::Squad => 250,
        }
    }

    pub fn is_team_mode(&self) -> bool {
        self.team_size() > 1
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArenaMode::Duel => "1v1",
            ArenaMode::Duo => "2v2",
            ArenaMode::Trio => "3v3",
            ArenaMode::Quad => "4v4",
            ArenaMode::Squad => "5v5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1v1" => Some(ArenaMode::Duel),
            "2v2" => Some(ArenaMode::Duo),
            "3v3" => Some(ArenaMode::Trio),
            "4v4" => Some(ArenaMode::Quad),
            "5v5" => Some(ArenaMode::Squad),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArenaMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arithmetic operation practiced in a slot or selected for a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Mixed,
}

impl Operation {
    /// Operations with their own rating variant.
    pub const RATED: [Operation; 4] = [
        Operation::Addition,
        Operation::Subtraction,
        Operation::Multiplication,
        Operation::Division,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Addition => "addition",
            Operation::Subtraction => "subtraction",
            Operation::Multiplication => "multiplication",
            Operation::Division => "division",
            Operation::Mixed => "mixed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "addition" => Some(Operation::Addition),
            "subtraction" => Some(Operation::Subtraction),
            "multiplication" => Some(Operation::Multiplication),
            "division" => Some(Operation::Division),
            "mixed" => Some(Operation::Mixed),
            _ => None,
        }
    }
}

/// Ranked or casual play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Ranked,
    Casual,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Ranked => "ranked",
            MatchType::Casual => "casual",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ranked" => Some(MatchType::Ranked),
            "casual" => Some(MatchType::Casual),
            _ => None,
        }
    }
}

/// Per-operation rating variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationElo {
    pub addition: u32,
    pub subtraction: u32,
    pub multiplication: u32,
    pub division: u32,
}

impl OperationElo {
    pub fn uniform(elo: u32) -> Self {
        Self {
            addition: elo,
            subtraction: elo,
            multiplication: elo,
            division: elo,
        }
    }

    /// Rating for an operation; `Mixed` has no variant.
    pub fn get(&self, operation: Operation) -> Option<u32> {
        match operation {
            Operation::Addition => Some(self.addition),
            Operation::Subtraction => Some(self.subtraction),
            Operation::Multiplication => Some(self.multiplication),
            Operation::Division => Some(self.division),
            Operation::Mixed => None,
        }
    }

    pub fn get_mut(&mut self, operation: Operation) -> Option<&mut u32> {
        match operation {
            Operation::Addition => Some(&mut self.addition),
            Operation::Subtraction => Some(&mut self.subtraction),
            Operation::Multiplication => Some(&mut self.multiplication),
            Operation::Division => Some(&mut self.division),
            Operation::Mixed => None,
        }
    }
}

/// Persisted competitive record, one per user per arena mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaPlayerRecord {
    pub user_id: Uuid,
    pub mode: ArenaMode,
    pub elo: u32,
    pub operation_elo: OperationElo,
    pub wins_in_tier: u32,
    /// Practice mastery tier (1-100)
    pub skill_tier: u8,
    pub rank: Rank,
    pub division: Division,
    pub matches_played: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub last_active_at: DateTime<Utc>,
    /// Some while the player is completing placement matches after a return
    pub placement_matches_completed: Option<u8>,
}

impl ArenaPlayerRecord {
    /// Seed a new record at the mode's base rating.
    pub fn new(user_id: Uuid, mode: ArenaMode, skill_tier: u8, now: DateTime<Utc>) -> Self {
        let base = mode.base_elo();
        let rank = calculate_arena_rank(0, skill_tier);
        Self {
            user_id,
            mode,
            elo: base,
            operation_elo: OperationElo::uniform(base),
            wins_in_tier: 0,
            skill_tier: skill_tier.clamp(1, 100),
            rank: rank.rank,
            division: rank.division,
            matches_played: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            last_active_at: now,
            placement_matches_completed: None,
        }
    }

    /// Rating used for matchmaking with an optional operation focus.
    pub fn rating_for(&self, operation: Option<Operation>) -> u32 {
        operation
            .and_then(|op| self.operation_elo.get(op))
            .unwrap_or(self.elo)
    }

    /// Recompute rank and division from wins and skill tier.
    pub fn refresh_rank(&mut self) {
        let rank = calculate_arena_rank(self.wins_in_tier, self.skill_tier);
        self.rank = rank.rank;
        self.division = rank.division;
    }

    /// Set a new skill tier and rerun the rank derivation.
    pub fn set_skill_tier(&mut self, skill_tier: u8) {
        self.skill_tier = skill_tier.clamp(1, 100);
        self.refresh_rank();
    }
}
