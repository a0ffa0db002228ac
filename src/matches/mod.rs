//! Live matches: the phase/clock state machine, AI players, question
//! issuing, post-match rating and the per-match actors that own it all.

pub mod ai;
pub mod engine;
pub mod orchestrator;
pub mod questions;
pub mod results;
pub mod rules;
pub mod types;

use thiserror::Error;
use uuid::Uuid;

use crate::league::LeagueError;
use crate::party::PartyError;
use crate::storage::database::DatabaseError;

pub use engine::{Audience, MatchCommand, MatchEngine, MatchSetup, Outbound, PlayerSetup, TeamSetup};
pub use orchestrator::MatchOrchestrator;
pub use questions::{Question, QuestionGenerator};
pub use results::{MatchSummary, PlayerResult, RatingService};
pub use rules::MatchRules;
pub use types::{MatchOutcome, MatchPhase, MatchResult, MatchState, PlayerState, TeamSide, TeamState};

/// Match errors.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Match {0} not found")]
    NotFound(Uuid),

    #[error("User {0} is not playing in this match")]
    NotParticipant(Uuid),

    #[error("Not allowed during {0}")]
    WrongPhase(types::MatchPhase),

    #[error("Match is over")]
    Finished,

    #[error("Match is not finished")]
    NotFinished,

    #[error("Player is not answering this slot")]
    NotActivePlayer,

    #[error("No open question")]
    NoQuestion,

    #[error("Only the IGL can do that")]
    NotIgl,

    #[error("Only the anchor can do that")]
    NotAnchor,

    #[error("No {0} left")]
    AbilityExhausted(&'static str),

    #[error("Invalid slot assignment: {0}")]
    InvalidAssignment(String),

    #[error("Invalid slot {0}")]
    InvalidSlot(u8),

    #[error("Invalid match setup: {0}")]
    InvalidSetup(String),

    #[error("Match task stopped")]
    Closed,

    #[error("Party error: {0}")]
    Party(#[from] PartyError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("League error: {0}")]
    League(#[from] LeagueError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}
