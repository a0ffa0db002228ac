//! Weekly league cycle computation.
//!
//! Pure functions over participant rows: week boundaries, XP scaling,
//! standings and promotion/demotion.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::ghosts::ghosts_for;
use super::tiers::WeeklyTier;
use crate::storage::database::{LeagueHistoryRow, LeagueParticipantRow};

/// Length of a league week in milliseconds.
pub const WEEK_MS: i64 = 604_800_000;

/// Unix epoch was a Thursday; weeks start on Monday 00:00 UTC.
const MONDAY_OFFSET_MS: i64 = 4 * 24 * 60 * 60 * 1000;

/// Humans promoted from each tier.
pub const PROMOTION_COUNT: usize = 3;

/// Humans demoted from the bottom of each tier.
pub const DEMOTION_COUNT: usize = 2;

/// Participants below this XP are demoted regardless of position.
pub const MIN_WEEKLY_XP: u32 = 50;

/// Coins for first, second and third place.
pub const PRIZE_COINS: [u32; 3] = [100, 60, 30];

/// Largest XP multiplier, reached at the end of the week.
pub const MAX_XP_MULTIPLIER: f64 = 3.0;

/// Start of the league week containing `now`.
pub fn week_start_for(now: DateTime<Utc>) -> DateTime<Utc> {
    let ms = now.timestamp_millis() - MONDAY_OFFSET_MS;
    let start = ms.div_euclid(WEEK_MS) * WEEK_MS + MONDAY_OFFSET_MS;
    Utc.timestamp_millis_opt(start)
        .single()
        .unwrap_or(now)
}

/// Fraction of the current week elapsed, in [0, 1].
pub fn week_progress(now: DateTime<Utc>) -> f64 {
    let elapsed = (now - week_start_for(now)).num_milliseconds();
    (elapsed as f64 / WEEK_MS as f64).clamp(0.0, 1.0)
}

/// XP multiplier: 1x at week start growing linearly to 3x at week end.
pub fn xp_multiplier(now: DateTime<Utc>) -> f64 {
    1.0 + (MAX_XP_MULTIPLIER - 1.0) * week_progress(now)
}

/// Scaled XP for a session.
pub fn scaled_xp(base_xp: u32, now: DateTime<Utc>) -> u32 {
    (base_xp as f64 * xp_multiplier(now)).round() as u32
}

/// Tier change at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Movement {
    Promoted,
    Demoted,
    Stayed,
}

impl Movement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Movement::Promoted => "promoted",
            Movement::Demoted => "demoted",
            Movement::Stayed => "stayed",
        }
    }
}

/// Result for one human participant.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleResult {
    pub user_id: Uuid,
    pub from_tier: WeeklyTier,
    pub to_tier: WeeklyTier,
    /// 1-based position among humans in the tier
    pub position: u32,
    pub weekly_xp: u32,
    pub movement: Movement,
    pub prize_coins: u32,
}

/// Outcome of processing one week.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub week_start: DateTime<Utc>,
    pub results: Vec<CycleResult>,
}

impl CycleOutcome {
    pub fn promoted(&self) -> impl Iterator<Item = &CycleResult> {
        self.results.iter().filter(|r| r.movement == Movement::Promoted)
    }

    pub fn demoted(&self) -> impl Iterator<Item = &CycleResult> {
        self.results.iter().filter(|r| r.movement == Movement::Demoted)
    }

    /// Membership rows for the next week, XP reset.
    pub fn next_rows(
        &self,
        previous: &[LeagueParticipantRow],
        next_week: DateTime<Utc>,
    ) -> Vec<LeagueParticipantRow> {
        self.results
            .iter()
            .filter_map(|result| {
                previous
                    .iter()
                    .find(|row| row.user_id == result.user_id)
                    .map(|row| LeagueParticipantRow {
                        user_id: row.user_id,
                        tier: result.to_tier,
                        weekly_xp: 0,
                        week_start: next_week,
                        joined_at: row.joined_at,
                    })
            })
            .collect()
    }

    pub fn history_rows(&self) -> Vec<LeagueHistoryRow> {
        self.results
            .iter()
            .map(|r| LeagueHistoryRow {
                week_start: self.week_start,
                user_id: r.user_id,
                tier: r.from_tier,
                position: r.position,
                weekly_xp: r.weekly_xp,
                movement: r.movement.as_str().to_string(),
                prize_coins: r.prize_coins,
            })
            .collect()
    }
}

fn rank_humans(rows: &mut Vec<&LeagueParticipantRow>) {
    rows.sort_by(|a, b| {
        b.weekly_xp
            .cmp(&a.weekly_xp)
            .then(a.joined_at.cmp(&b.joined_at))
            .then(a.user_id.cmp(&b.user_id))
    });
}

/// Rank every tier's humans and decide movement and prizes.
pub fn process_cycle(week_start: DateTime<Utc>, rows: &[LeagueParticipantRow]) -> CycleOutcome {
    let mut by_tier: BTreeMap<WeeklyTier, Vec<&LeagueParticipantRow>> = BTreeMap::new();
    for row in rows {
        by_tier.entry(row.tier).or_default().push(row);
    }

    let mut results = Vec::with_capacity(rows.len());

    for (tier, mut members) in by_tier {
        rank_humans(&mut members);
        // The bottom band never reaches into the promotion positions
        let bottom_from = PROMOTION_COUNT.max(members.len().saturating_sub(DEMOTION_COUNT));

        for (index, row) in members.into_iter().enumerate() {
            let qualifies = row.weekly_xp >= MIN_WEEKLY_XP;
            let promote = index < PROMOTION_COUNT && qualifies && tier != WeeklyTier::Apex;
            let in_bottom = index >= bottom_from;
            let demote = !promote && (in_bottom || !qualifies) && tier != WeeklyTier::Neon;

            let (movement, to_tier) = if promote {
                (Movement::Promoted, tier.promoted())
            } else if demote {
                (Movement::Demoted, tier.demoted())
            } else {
                (Movement::Stayed, tier)
            };

            let prize_coins = if row.weekly_xp > 0 {
                PRIZE_COINS.get(index).copied().unwrap_or(0)
            } else {
                0
            };

            results.push(CycleResult {
                user_id: row.user_id,
                from_tier: tier,
                to_tier,
                position: index as u32 + 1,
                weekly_xp: row.weekly_xp,
                movement,
                prize_coins,
            });
        }
    }

    CycleOutcome {
        week_start,
        results,
    }
}

/// A line in a tier's displayed standings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingEntry {
    pub position: u32,
    pub user_id: Option<Uuid>,
    pub name: String,
    pub weekly_xp: u32,
    pub is_ghost: bool,
}

/// Displayed standings for a tier, humans padded with ghosts.
pub fn standings(
    tier: WeeklyTier,
    rows: &[LeagueParticipantRow],
    names: &dyn Fn(Uuid) -> String,
    now: DateTime<Utc>,
) -> Vec<StandingEntry> {
    let week_start = week_start_for(now);
    let mut entries: Vec<StandingEntry> = rows
        .iter()
        .filter(|row| row.tier == tier)
        .map(|row| StandingEntry {
            position: 0,
            user_id: Some(row.user_id),
            name: names(row.user_id),
            weekly_xp: row.weekly_xp,
            is_ghost: false,
        })
        .collect();

    entries.extend(
        ghosts_for(week_start, tier, week_progress(now))
            .into_iter()
            .map(|ghost| StandingEntry {
                position: 0,
                user_id: None,
                name: ghost.name,
                weekly_xp: ghost.weekly_xp,
                is_ghost: true,
            }),
    );

    // Humans win ties against ghosts
    entries.sort_by(|a, b| b.weekly_xp.cmp(&a.weekly_xp).then(a.is_ghost.cmp(&b.is_ghost)));
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.position = index as u32 + 1;
    }
    entries
}

/// Week that follows `week_start`.
pub fn next_week(week_start: DateTime<Utc>) -> DateTime<Utc> {
    week_start + Duration::milliseconds(WEEK_MS)
}
