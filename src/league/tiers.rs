//! Weekly tiers and standing leagues.
//!
//! These are two unrelated ladders. Weekly tiers rotate every week based on
//! XP; standing leagues are coarse rating bands.

use serde::{Deserialize, Serialize};

/// Weekly XP ladder tier, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeeklyTier {
    Neon,
    Cobalt,
    Plasma,
    Void,
    Apex,
}

impl WeeklyTier {
    pub const ALL: [WeeklyTier; 5] = [
        WeeklyTier::Neon,
        WeeklyTier::Cobalt,
        WeeklyTier::Plasma,
        WeeklyTier::Void,
        WeeklyTier::Apex,
    ];

    /// One tier up, or the same tier at the top.
    pub fn promoted(&self) -> WeeklyTier {
        match self {
            WeeklyTier::Neon => WeeklyTier::Cobalt,
            WeeklyTier::Cobalt => WeeklyTier::Plasma,
            WeeklyTier::Plasma => WeeklyTier::Void,
            WeeklyTier::Void | WeeklyTier::Apex => WeeklyTier::Apex,
        }
    }

    /// One tier down, or the same tier at the bottom.
    pub fn demoted(&self) -> WeeklyTier {
        match self {
            WeeklyTier::Neon | WeeklyTier::Cobalt => WeeklyTier::Neon,
            WeeklyTier::Plasma => WeeklyTier::Cobalt,
            WeeklyTier::Void => WeeklyTier::Plasma,
            WeeklyTier::Apex => WeeklyTier::Void,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WeeklyTier::Neon => "neon",
            WeeklyTier::Cobalt => "cobalt",
            WeeklyTier::Plasma => "plasma",
            WeeklyTier::Void => "void",
            WeeklyTier::Apex => "apex",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        WeeklyTier::ALL.iter().copied().find(|t| t.as_str() == s)
    }
}

/// Standing league derived from rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandingLeague {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

/// Rating band of a standing league. `max_elo` of `None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeagueBand {
    pub league: StandingLeague,
    pub min_elo: u32,
    pub max_elo: Option<u32>,
}

impl LeagueBand {
    pub fn contains(&self, elo: u32) -> bool {
        elo >= self.min_elo && self.max_elo.map_or(true, |max| elo <= max)
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_elo.is_none()
    }
}

/// Rating bands, ascending and contiguous.
pub const LEAGUE_BANDS: [LeagueBand; 5] = [
    LeagueBand {
        league: StandingLeague::Bronze,
        min_elo: 0,
        max_elo: Some(799),
    },
    LeagueBand {
        league: StandingLeague::Silver,
        min_elo: 800,
        max_elo: Some(1199),
    },
    LeagueBand {
        league: StandingLeague::Gold,
        min_elo: 1200,
        max_elo: Some(1599),
    },
    LeagueBand {
        league: StandingLeague::Platinum,
        min_elo: 1600,
        max_elo: Some(1999),
    },
    LeagueBand {
        league: StandingLeague::Diamond,
        min_elo: 2000,
        max_elo: None,
    },
];

/// Standing league for a rating.
pub fn league_for_elo(elo: u32) -> StandingLeague {
    LEAGUE_BANDS
        .iter()
        .find(|band| band.contains(elo))
        .map(|band| band.league)
        .unwrap_or(StandingLeague::Diamond)
}

/// Band of a standing league.
pub fn band_for(league: StandingLeague) -> LeagueBand {
    LEAGUE_BANDS[league as usize]
}
