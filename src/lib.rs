//! MathArena - competitive arena server for a math-practice application.
//!
//! Ranked and casual 1v1 through 5v5 matches: parties and matchmaking over a
//! shared TTL store, server-driven relay matches with IGL and anchor roles,
//! ELO and rank progression with inactivity decay, and weekly XP leagues.

pub mod app;
pub mod league;
pub mod matches;
pub mod matchmaking;
pub mod networking;
pub mod party;
pub mod rating;
pub mod storage;

// Re-export commonly used types
pub use app::ArenaApp;
pub use matches::MatchOrchestrator;
pub use matchmaking::Matchmaker;
pub use party::PartyCoordinator;
pub use rating::types::{ArenaMode, ArenaPlayerRecord, MatchType, Operation};
pub use storage::config::AppConfig;
