//! Simulated opponents and teammates.
//!
//! An AI player answers after a randomized delay and is right with a
//! probability that grows with the rating it stands in for.

use rand::Rng;
use uuid::Uuid;

/// Names given to AI players, cycled by seat.
pub const AI_NAMES: [&str; 10] = [
    "Euclid-9",
    "Gauss-7",
    "Hypatia-3",
    "Leibniz-5",
    "Noether-2",
    "Ramanujan-8",
    "Fermat-4",
    "Lovelace-6",
    "Turing-1",
    "Kovalevskaya-0",
];

const MIN_ACCURACY: f64 = 0.5;
const MAX_ACCURACY: f64 = 0.95;
const SLOWEST_ANSWER_MS: f64 = 6_000.0;
const FASTEST_ANSWER_MS: f64 = 1_500.0;

/// Rating range the profile interpolates over.
const RATING_FLOOR: f64 = 200.0;
const RATING_CEILING: f64 = 2_000.0;

/// Shortest delay an AI ever answers after.
pub const MIN_ANSWER_DELAY_MS: u64 = 400;

/// Answering behaviour of one AI player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiProfile {
    pub accuracy: f64,
    pub mean_answer_ms: u64,
}

impl AiProfile {
    pub fn for_rating(rating: u32) -> Self {
        let t = ((rating as f64 - RATING_FLOOR) / (RATING_CEILING - RATING_FLOOR)).clamp(0.0, 1.0);
        Self {
            accuracy: MIN_ACCURACY + (MAX_ACCURACY - MIN_ACCURACY) * t,
            mean_answer_ms: (SLOWEST_ANSWER_MS - (SLOWEST_ANSWER_MS - FASTEST_ANSWER_MS) * t).round() as u64,
        }
    }

    /// Delay before the next answer, within ±40% of the mean.
    pub fn answer_delay_ms<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let jitter: f64 = rng.gen_range(0.6..1.4);
        ((self.mean_answer_ms as f64 * jitter).round() as u64).max(MIN_ANSWER_DELAY_MS)
    }

    pub fn answers_correctly<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.accuracy)
    }
}

/// Seat for an AI player.
#[derive(Debug, Clone, PartialEq)]
pub struct AiSeat {
    pub user_id: Uuid,
    pub display_name: String,
}

impl AiSeat {
    pub fn new(seat: usize) -> Self {
        Self {
            user_id: Uuid::new_v4(),
            display_name: AI_NAMES[seat % AI_NAMES.len()].to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_profile_bounds() {
        let weak = AiProfile::for_rating(0);
        let strong = AiProfile::for_rating(5_000);
        assert_eq!(weak.accuracy, MIN_ACCURACY);
        assert_eq!(strong.accuracy, MAX_ACCURACY);
        assert_eq!(weak.mean_answer_ms, 6_000);
        assert_eq!(strong.mean_answer_ms, 1_500);
    }

    #[test]
    fn test_stronger_rating_is_faster_and_sharper() {
        let low = AiProfile::for_rating(400);
        let high = AiProfile::for_rating(1_200);
        assert!(high.accuracy > low.accuracy);
        assert!(high.mean_answer_ms < low.mean_answer_ms);
    }

    #[test]
    fn test_delay_stays_in_band() {
        let profile = AiProfile::for_rating(800);
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..500 {
            let delay = profile.answer_delay_ms(&mut rng);
            assert!(delay >= MIN_ANSWER_DELAY_MS);
            assert!(delay as f64 <= profile.mean_answer_ms as f64 * 1.4 + 1.0);
        }
    }

    #[test]
    fn test_seats_cycle_names() {
        assert_eq!(AiSeat::new(0).display_name, "Euclid-9");
        assert_eq!(AiSeat::new(AI_NAMES.len()).display_name, "Euclid-9");
        assert_ne!(AiSeat::new(1).user_id, AiSeat::new(1).user_id);
    }
}
