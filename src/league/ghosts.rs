//! Ghost participants that keep sparse tiers competitive.
//!
//! Ghosts are generated on demand from (week, tier) and never stored. They
//! appear in standings only.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::tiers::WeeklyTier;

/// Ghosts added to every tier's standings.
pub const GHOSTS_PER_TIER: usize = 5;

/// Names ghosts are drawn from.
pub const GHOST_NAMES: [&str; 12] = [
    "Quill",
    "Nova",
    "Cipher",
    "Echo",
    "Vector",
    "Pixel",
    "Sigma",
    "Orbit",
    "Fractal",
    "Prism",
    "Tangent",
    "Radix",
];

/// A generated ghost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostParticipant {
    pub name: String,
    pub weekly_xp: u32,
}

/// Ghosts for a tier at a point in the week.
pub fn ghosts_for(week_start: DateTime<Utc>, tier: WeeklyTier, week_progress: f64) -> Vec<GhostParticipant> {
    let seed = (week_start.timestamp() as u64).wrapping_mul(31) ^ (tier.index() as u64 + 1);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut names: Vec<&str> = GHOST_NAMES.to_vec();
    names.shuffle(&mut rng);

    // Higher tiers field stronger ghosts
    let tier_scale = 1.0 + tier.index() as f64 * 0.35;
    let progress = week_progress.clamp(0.0, 1.0);

    names
        .into_iter()
        .take(GHOSTS_PER_TIER)
        .map(|name| {
            let weekly_pace: f64 = rng.gen_range(150.0..600.0) * tier_scale;
            GhostParticipant {
                name: name.to_string(),
                weekly_xp: (weekly_pace * progress).round() as u32,
            }
        })
        .collect()
}
