//! Inactivity decay projection.
//!
//! Decay status is derived from the last activity timestamp and the current
//! rating (plus placement progress for returning players). Nothing here is
//! persisted; the accrued loss is applied when the player becomes active
//! again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::ArenaPlayerRecord;

/// Days of inactivity before the warning phase.
pub const WARNING_AFTER_DAYS: i64 = 4;

/// Days of inactivity before rating starts to decay.
pub const DECAY_AFTER_DAYS: i64 = 7;

/// Days of inactivity before accelerated decay.
pub const SEVERE_AFTER_DAYS: i64 = 14;

/// Rating lost per day while decaying.
pub const DECAY_PER_DAY: u32 = 5;

/// Rating lost per day while in severe decay.
pub const SEVERE_DECAY_PER_DAY: u32 = 15;

/// Maximum number of days accrued in each decay phase.
pub const DECAY_WINDOW_DAYS: i64 = 7;

/// Decay never takes a rating below this value.
pub const DECAY_FLOOR: u32 = 100;

/// Placement matches a returning player must complete.
pub const PLACEMENT_MATCHES_REQUIRED: u8 = 3;

/// Rating swing multiplier during placement matches.
pub const PLACEMENT_ELO_MULTIPLIER: i32 = 2;

/// Inactivity phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayPhase {
    Active,
    Warning,
    Decaying,
    Severe,
    Returning,
}

/// Derived decay status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayStatus {
    pub phase: DecayPhase,
    pub days_inactive: i64,
    pub days_until_next_phase: i64,
    pub elo_at_risk: u32,
    pub is_returning_player: bool,
    pub placement_matches_required: u8,
    pub placement_matches_completed: u8,
}

/// What happened when activity was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityOutcome {
    pub decay_applied: u32,
    pub became_returning: bool,
}

/// Stateless decay calculations.
pub struct DecayEngine;

impl DecayEngine {
    /// Whole days since the last activity, never negative.
    pub fn days_inactive(last_active_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        (now - last_active_at).num_days().max(0)
    }

    /// Phase and accrued loss from inactivity alone.
    pub fn project(last_active_at: DateTime<Utc>, elo: u32, now: DateTime<Utc>) -> DecayStatus {
        let days = Self::days_inactive(last_active_at, now);
        let headroom = elo.saturating_sub(DECAY_FLOOR);

        let (phase, days_until_next_phase, raw_loss) = if days < WARNING_AFTER_DAYS {
            (DecayPhase::Active, WARNING_AFTER_DAYS - days, 0)
        } else if days < DECAY_AFTER_DAYS {
            // Projected first day of decay
            (DecayPhase::Warning, DECAY_AFTER_DAYS - days, DECAY_PER_DAY)
        } else if days < SEVERE_AFTER_DAYS {
            let decay_days = (days - DECAY_AFTER_DAYS + 1).min(DECAY_WINDOW_DAYS) as u32;
            (
                DecayPhase::Decaying,
                SEVERE_AFTER_DAYS - days,
                decay_days * DECAY_PER_DAY,
            )
        } else {
            let severe_days = (days - SEVERE_AFTER_DAYS + 1).min(DECAY_WINDOW_DAYS) as u32;
            (
                DecayPhase::Severe,
                0,
                DECAY_WINDOW_DAYS as u32 * DECAY_PER_DAY + severe_days * SEVERE_DECAY_PER_DAY,
            )
        };

        DecayStatus {
            phase,
            days_inactive: days,
            days_until_next_phase,
            elo_at_risk: raw_loss.min(headroom),
            is_returning_player: false,
            placement_matches_required: PLACEMENT_MATCHES_REQUIRED,
            placement_matches_completed: 0,
        }
    }

    /// Full status for a record. The placement flow overrides the active and
    /// warning phases; a returning player who stops playing again decays as
    /// usual and keeps the returning flag.
    pub fn status(record: &ArenaPlayerRecord, now: DateTime<Utc>) -> DecayStatus {
        let projected = Self::project(record.last_active_at, record.elo, now);

        match record.placement_matches_completed {
            Some(completed) if completed < PLACEMENT_MATCHES_REQUIRED => {
                if matches!(projected.phase, DecayPhase::Active | DecayPhase::Warning) {
                    DecayStatus {
                        phase: DecayPhase::Returning,
                        days_until_next_phase: 0,
                        elo_at_risk: 0,
                        is_returning_player: true,
                        placement_matches_completed: completed,
                        ..projected
                    }
                } else {
                    DecayStatus {
                        is_returning_player: true,
                        placement_matches_completed: completed,
                        ..projected
                    }
                }
            }
            _ => projected,
        }
    }

    /// Record activity: apply accrued decay and start placement if the player
    /// was decaying.
    pub fn record_activity(record: &mut ArenaPlayerRecord, now: DateTime<Utc>) -> ActivityOutcome {
        let status = Self::status(record, now);
        let mut outcome = ActivityOutcome {
            decay_applied: 0,
            became_returning: false,
        };

        if matches!(status.phase, DecayPhase::Decaying | DecayPhase::Severe) {
            record.elo -= status.elo_at_risk;
            record.placement_matches_completed = Some(0);
            outcome.decay_applied = status.elo_at_risk;
            outcome.became_returning = true;
            tracing::info!(
                "Player {} returning after {} days, decay applied: {}",
                record.user_id,
                status.days_inactive,
                status.elo_at_risk
            );
        }

        record.last_active_at = now;
        outcome
    }

    /// Count a completed placement match. Returns true when placement ends.
    pub fn record_placement_match(record: &mut ArenaPlayerRecord) -> bool {
        match record.placement_matches_completed {
            Some(completed) => {
                let completed = completed.saturating_add(1);
                if completed >= PLACEMENT_MATCHES_REQUIRED {
                    record.placement_matches_completed = None;
                    true
                } else {
                    record.placement_matches_completed = Some(completed);
                    false
                }
            }
            None => false,
        }
    }

    /// Multiplier applied to rating swings for this record.
    pub fn elo_multiplier(record: &ArenaPlayerRecord) -> i32 {
        if record.placement_matches_completed.is_some() {
            PLACEMENT_ELO_MULTIPLIER
        } else {
            1
        }
    }
}
