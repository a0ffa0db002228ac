//! League module: weekly XP tiers with promotion/demotion, ghosts, and
//! rating-band standing leagues.

pub mod engine;
pub mod ghosts;
pub mod scheduler;
pub mod tiers;

pub use engine::{process_cycle, week_start_for, xp_multiplier, CycleOutcome, Movement};
pub use scheduler::{LeagueError, LeagueScheduler, LeagueService};
pub use tiers::{league_for_elo, StandingLeague, WeeklyTier, LEAGUE_BANDS};
