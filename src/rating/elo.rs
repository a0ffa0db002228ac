//! ELO rating deltas.

use serde::{Deserialize, Serialize};

/// Default K-factor.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Match outcome from one participant's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Draw,
}

impl Outcome {
    fn actual_score(&self) -> f64 {
        match self {
            Outcome::Win => 1.0,
            Outcome::Loss => 0.0,
            Outcome::Draw => 0.5,
        }
    }

    /// Outcome seen from the other side.
    pub fn inverse(&self) -> Outcome {
        match self {
            Outcome::Win => Outcome::Loss,
            Outcome::Loss => Outcome::Win,
            Outcome::Draw => Outcome::Draw,
        }
    }
}

/// Logistic expected score of `player` against `opponent`.
pub fn expected_score(player_elo: f64, opponent_elo: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_elo - player_elo) / 400.0))
}

/// Rating delta for one participant, rounded to an integer.
pub fn calculate_elo_change(player_elo: u32, opponent_elo: u32, outcome: Outcome, k: f64) -> i32 {
    let expected = expected_score(player_elo as f64, opponent_elo as f64);
    (k * (outcome.actual_score() - expected)).round() as i32
}

/// Apply a delta to a rating, flooring at zero.
pub fn apply_elo_change(elo: u32, delta: i32) -> u32 {
    (elo as i64 + delta as i64).max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_losing_side_mirrors_winner() {
        let won = calculate_elo_change(1400, 1200, Outcome::Win, DEFAULT_K_FACTOR);
        let lost = calculate_elo_change(1200, 1400, Outcome::Win.inverse(), DEFAULT_K_FACTOR);
        assert_eq!(won, -lost);
        assert_eq!(Outcome::Draw.inverse(), Outcome::Draw);
    }

    #[test]
    fn test_equal_ratings_swing_sixteen() {
        assert_eq!(calculate_elo_change(1200, 1200, Outcome::Win, DEFAULT_K_FACTOR), 16);
        assert_eq!(calculate_elo_change(1200, 1200, Outcome::Loss, DEFAULT_K_FACTOR), -16);
        assert_eq!(calculate_elo_change(1200, 1200, Outcome::Draw, DEFAULT_K_FACTOR), 0);
    }

    #[test]
    fn test_equal_ratings_half_k() {
        for rating in [0u32, 250, 500, 1500, 2800] {
            for k in [16.0, 24.0, 32.0, 40.0] {
                assert_eq!(
                    calculate_elo_change(rating, rating, Outcome::Win, k),
                    (k / 2.0) as i32
                );
            }
        }
    }

    #[test]
    fn test_upset_win_pays_more() {
        let upset = calculate_elo_change(1000, 1400, Outcome::Win, DEFAULT_K_FACTOR);
        let even = calculate_elo_change(1200, 1200, Outcome::Win, DEFAULT_K_FACTOR);
        let expected = calculate_elo_change(1400, 1000, Outcome::Win, DEFAULT_K_FACTOR);
        assert!(upset > even);
        assert!(even > expected);
    }

    #[test]
    fn test_favorite_loss_costs_more() {
        let favorite = calculate_elo_change(1400, 1000, Outcome::Loss, DEFAULT_K_FACTOR);
        let underdog = calculate_elo_change(1000, 1400, Outcome::Loss, DEFAULT_K_FACTOR);
        assert!(favorite < underdog);
    }

    #[test]
    fn test_exchange_is_near_zero_sum() {
        for (a, b) in [(1000u32, 1100u32), (500, 900), (1500, 1490)] {
            let gain = calculate_elo_change(a, b, Outcome::Win, DEFAULT_K_FACTOR);
            let loss = calculate_elo_change(b, a, Outcome::Loss, DEFAULT_K_FACTOR);
            assert!((gain + loss).abs() <= 1);
        }
    }

    #[test]
    fn test_apply_floors_at_zero() {
        assert_eq!(apply_elo_change(10, -16), 0);
        assert_eq!(apply_elo_change(500, 16), 516);
    }
}
