//! Rank and division derivation.
//!
//! A player's rank is a pure function of wins in the current tier and the
//! practice skill tier. The skill tier sets the highest rank that can be
//! reached; wins move the player up to that ceiling.

use serde::{Deserialize, Serialize};

/// Wins needed to advance one division.
pub const WINS_PER_DIVISION: u32 = 10;

/// Wins needed to advance one rank (three divisions).
pub const WINS_PER_RANK: u32 = 30;

/// Competitive rank, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rank {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
    Master,
}

impl Rank {
    pub const ALL: [Rank; 6] = [
        Rank::Bronze,
        Rank::Silver,
        Rank::Gold,
        Rank::Platinum,
        Rank::Diamond,
        Rank::Master,
    ];

    fn from_index(index: usize) -> Rank {
        Rank::ALL[index.min(Rank::ALL.len() - 1)]
    }

    fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rank::Bronze => "Bronze",
            Rank::Silver => "Silver",
            Rank::Gold => "Gold",
            Rank::Platinum => "Platinum",
            Rank::Diamond => "Diamond",
            Rank::Master => "Master",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Rank::ALL.iter().copied().find(|r| r.as_str().eq_ignore_ascii_case(s))
    }
}

/// Division within a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Division {
    I,
    II,
    III,
}

impl Division {
    fn from_index(index: u32) -> Division {
        match index {
            0 => Division::I,
            1 => Division::II,
            _ => Division::III,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Division::I => "I",
            Division::II => "II",
            Division::III => "III",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "I" => Some(Division::I),
            "II" => Some(Division::II),
            "III" => Some(Division::III),
            _ => None,
        }
    }
}

/// Result of a rank calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaRank {
    pub rank: Rank,
    pub division: Division,
    /// Wins accumulated inside the current rank
    pub wins_in_rank: u32,
    /// 0 when no further division is reachable
    pub wins_to_next_division: u32,
    /// 0 when no further rank is reachable
    pub wins_to_next_rank: u32,
}

impl std::fmt::Display for ArenaRank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.rank.as_str(), self.division.as_str())
    }
}

/// Highest rank a skill tier permits.
pub fn rank_ceiling(skill_tier: u8) -> Rank {
    match skill_tier.clamp(1, 100) {
        1..=20 => Rank::Bronze,
        21..=40 => Rank::Silver,
        41..=60 => Rank::Gold,
        61..=80 => Rank::Platinum,
        _ => Rank::Master,
    }
}

/// Derive rank, division and progress from wins in tier and skill tier.
pub fn calculate_arena_rank(wins_in_tier: u32, skill_tier: u8) -> ArenaRank {
    let ceiling = rank_ceiling(skill_tier).index();
    let rank_index = ((wins_in_tier / WINS_PER_RANK) as usize).min(ceiling);
    let wins_in_rank = wins_in_tier - rank_index as u32 * WINS_PER_RANK;
    let division_index = (wins_in_rank / WINS_PER_DIVISION).min(2);

    let at_ceiling = rank_index == ceiling;
    let wins_to_next_division = if at_ceiling && division_index == 2 {
        0
    } else {
        WINS_PER_DIVISION - wins_in_tier % WINS_PER_DIVISION
    };
    let wins_to_next_rank = if at_ceiling {
        0
    } else {
        WINS_PER_RANK - wins_in_tier % WINS_PER_RANK
    };

    ArenaRank {
        rank: Rank::from_index(rank_index),
        division: Division::from_index(division_index),
        wins_in_rank,
        wins_to_next_division,
        wins_to_next_rank,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_player_starts_bronze_one() {
        let rank = calculate_arena_rank(0, 50);
        assert_eq!(rank.rank, Rank::Bronze);
        assert_eq!(rank.division, Division::I);
        assert_eq!(rank.wins_to_next_division, 10);
        assert_eq!(rank.wins_to_next_rank, 30);
        assert_eq!(rank.to_string(), "Bronze I");
    }

    #[test]
    fn test_divisions_advance_every_ten_wins() {
        assert_eq!(calculate_arena_rank(9, 100).division, Division::I);
        assert_eq!(calculate_arena_rank(10, 100).division, Division::II);
        assert_eq!(calculate_arena_rank(20, 100).division, Division::III);

        let promoted = calculate_arena_rank(30, 100);
        assert_eq!(promoted.rank, Rank::Silver);
        assert_eq!(promoted.division, Division::I);
        assert_eq!(promoted.wins_in_rank, 0);
    }

    #[test]
    fn test_low_tier_cannot_pass_ceiling() {
        let rank = calculate_arena_rank(500, 15);
        assert_eq!(rank.rank, Rank::Bronze);
        assert_eq!(rank.division, Division::III);
        assert_eq!(rank.wins_in_rank, 500);
        assert_eq!(rank.wins_to_next_division, 0);
        assert_eq!(rank.wins_to_next_rank, 0);
    }

    #[test]
    fn test_ceiling_rank_still_tracks_divisions() {
        // Silver ceiling, 35 wins: Silver I, next division reachable, no next rank
        let rank = calculate_arena_rank(35, 30);
        assert_eq!(rank.rank, Rank::Silver);
        assert_eq!(rank.division, Division::I);
        assert_eq!(rank.wins_to_next_division, 5);
        assert_eq!(rank.wins_to_next_rank, 0);
    }

    #[test]
    fn test_top_tier_reaches_master() {
        let rank = calculate_arena_rank(150, 95);
        assert_eq!(rank.rank, Rank::Master);
        assert_eq!(rank_ceiling(81), Rank::Master);
        assert_eq!(rank_ceiling(0), Rank::Bronze);
        assert_eq!(rank_ceiling(255), Rank::Master);
    }

    #[test]
    fn test_rank_monotonic_in_tier_and_wins() {
        for tier in 1..=100u8 {
            let mut previous = calculate_arena_rank(0, tier);
            for wins in 1..=200u32 {
                let current = calculate_arena_rank(wins, tier);
                assert!(
                    (current.rank, current.division) >= (previous.rank, previous.division),
                    "rank dropped at tier {} wins {}",
                    tier,
                    wins
                );
                previous = current;
            }
        }

        for wins in [0u32, 29, 60, 150, 400] {
            for tier in 2..=100u8 {
                let lower = calculate_arena_rank(wins, tier - 1);
                let higher = calculate_arena_rank(wins, tier);
                assert!(rank_ceiling(tier) >= rank_ceiling(tier - 1));
                assert!(higher.rank >= lower.rank);
            }
        }
    }
}
