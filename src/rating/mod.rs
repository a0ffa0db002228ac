//! Skill rating: ranks, ELO deltas and inactivity decay.
//!
//! Everything in this module is pure computation over player records.

pub mod decay;
pub mod elo;
pub mod rank;
pub mod types;

// Re-export commonly used types
pub use decay::{DecayEngine, DecayPhase, DecayStatus};
pub use elo::{apply_elo_change, calculate_elo_change, Outcome, DEFAULT_K_FACTOR};
pub use rank::{calculate_arena_rank, ArenaRank, Division, Rank};
pub use types::{ArenaMode, ArenaPlayerRecord, MatchType, Operation, OperationElo};
