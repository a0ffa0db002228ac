//! Practice question source for live matches.
//!
//! Questions are pure functions of the generator seed, the operation and the
//! answering player's skill tier, so a replayed match issues the same
//! problems.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::rating::types::Operation;

/// A single arithmetic problem. The answer never leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: u32,
    pub operation: Operation,
    pub prompt: String,
    #[serde(skip)]
    answer: i64,
}

impl Question {
    pub fn answer(&self) -> i64 {
        self.answer
    }

    /// Compare a raw client answer. Surrounding whitespace is ignored;
    /// anything that is not an integer is wrong.
    pub fn check(&self, input: &str) -> bool {
        input
            .trim()
            .parse::<i64>()
            .map(|value| value == self.answer)
            .unwrap_or(false)
    }
}

/// Seeded question generator.
pub struct QuestionGenerator {
    rng: StdRng,
    next_id: u32,
}

impl QuestionGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            next_id: 1,
        }
    }

    /// Next problem for an operation at a skill tier (1-100). `Mixed` picks
    /// one of the rated operations.
    pub fn next(&mut self, operation: Operation, skill_tier: u8) -> Question {
        let operation = match operation {
            Operation::Mixed => Operation::RATED[self.rng.gen_range(0..Operation::RATED.len())],
            op => op,
        };
        let tier = skill_tier.clamp(1, 100) as i64;
        let sum_max = 10 + tier * 2;
        let factor_max = 5 + tier / 10;

        let (prompt, answer) = match operation {
            Operation::Addition => {
                let a = self.rng.gen_range(1..=sum_max);
                let b = self.rng.gen_range(1..=sum_max);
                (format!("{} + {}", a, b), a + b)
            }
            Operation::Subtraction => {
                let a = self.rng.gen_range(1..=sum_max);
                let b = self.rng.gen_range(1..=a);
                (format!("{} - {}", a, b), a - b)
            }
            Operation::Multiplication => {
                let a = self.rng.gen_range(2..=factor_max);
                let b = self.rng.gen_range(2..=factor_max);
                (format!("{} × {}", a, b), a * b)
            }
            // Dividend is built from the quotient so results stay whole
            Operation::Division | Operation::Mixed => {
                let divisor = self.rng.gen_range(2..=factor_max);
                let quotient = self.rng.gen_range(1..=factor_max);
                (format!("{} ÷ {}", divisor * quotient, divisor), quotient)
            }
        };

        let id = self.next_id;
        self.next_id += 1;

        Question {
            id,
            operation,
            prompt,
            answer,
        }
    }
}
