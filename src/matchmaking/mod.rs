//! Matchmaking module: turns searching parties into match pairings.

pub mod queue;
pub mod ticket;

pub use queue::{MatchPairing, MatchSide, Matchmaker, MatchmakingError, QueueEvent};
pub use ticket::{plan_pass, rating_window, QueueTicket};
