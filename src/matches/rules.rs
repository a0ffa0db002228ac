//! Match timing and ability limits in engine units.

use crate::rating::types::{ArenaMode, Operation};
use crate::storage::config::MatchSettings;

/// Slot operations in relay order.
pub const SLOT_OPERATIONS: [Operation; 5] = [
    Operation::Addition,
    Operation::Subtraction,
    Operation::Multiplication,
    Operation::Division,
    Operation::Mixed,
];

/// Base points for a correct answer.
pub const BASE_POINTS: u32 = 10;

/// Points added per streak step.
pub const STREAK_BONUS: u32 = 2;

/// Streak steps that earn a bonus.
pub const MAX_STREAK_STEPS: u32 = 5;

/// Points for a correct answer at the streak reached by it.
pub fn points_for_streak(streak: u32) -> u32 {
    BASE_POINTS + STREAK_BONUS * streak.saturating_sub(1).min(MAX_STREAK_STEPS)
}

/// Clock lengths in milliseconds and per-match caps.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRules {
    pub pre_match_ms: u64,
    pub break_ms: u64,
    pub halftime_ms: u64,
    pub anchor_decision_ms: u64,
    pub handoff_ms: u64,
    pub team_slot_ms: u64,
    pub solo_round_ms: u64,
    pub questions_per_slot: u32,
    pub rounds_per_half: u32,
    pub timeouts_per_team: u32,
    pub timeout_extension_ms: u64,
    pub igl_swaps_per_team: u32,
    pub anchor_callins_per_match: u32,
    pub forfeit_after_ms: u64,
}

impl From<&MatchSettings> for MatchRules {
    fn from(s: &MatchSettings) -> Self {
        let ms = |secs: u32| secs as u64 * 1000;
        Self {
            pre_match_ms: ms(s.pre_match_secs),
            break_ms: ms(s.break_secs),
            halftime_ms: ms(s.halftime_secs),
            anchor_decision_ms: ms(s.anchor_decision_secs),
            handoff_ms: ms(s.handoff_secs),
            team_slot_ms: ms(s.team_slot_secs),
            solo_round_ms: ms(s.solo_round_secs),
            questions_per_slot: s.questions_per_slot,
            rounds_per_half: s.rounds_per_half.max(1),
            timeouts_per_team: s.timeouts_per_team,
            timeout_extension_ms: ms(s.timeout_extension_secs),
            igl_swaps_per_team: s.igl_swaps_per_team,
            anchor_callins_per_match: s.anchor_callins_per_match,
            forfeit_after_ms: ms(s.forfeit_after_secs),
        }
    }
}

impl Default for MatchRules {
    fn default() -> Self {
        Self::from(&MatchSettings::default())
    }
}

impl MatchRules {
    pub fn total_rounds(&self) -> u32 {
        self.rounds_per_half * 2
    }

    /// Slots per round: one per team member.
    pub fn slot_count(&self, mode: ArenaMode) -> u8 {
        mode.team_size() as u8
    }

    /// Relay clock per slot; solo plays the whole round as one slot.
    pub fn slot_ms(&self, mode: ArenaMode) -> u64 {
        if mode.is_team_mode() {
            self.team_slot_ms
        } else {
            self.solo_round_ms
        }
    }

    /// Questions per slot before the active player is done. Solo has no quota.
    pub fn quota(&self, mode: ArenaMode) -> Option<u32> {
        mode.is_team_mode().then_some(self.questions_per_slot.max(1))
    }

    /// Operation answered in a slot. A match focused on one operation uses it
    /// everywhere.
    pub fn slot_operation(&self, mode: ArenaMode, focus: Option<Operation>, slot: u8) -> Operation {
        if let Some(op) = focus {
            return op;
        }
        if !mode.is_team_mode() {
            return Operation::Mixed;
        }
        let index = (slot.max(1) as usize - 1) % SLOT_OPERATIONS.len();
        SLOT_OPERATIONS[index]
    }
}
