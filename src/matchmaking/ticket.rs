//! Queue tickets and the pure pairing pass.
//!
//! A pass seeds from the longest-waiting ticket, gathers the closest
//! compatible candidates, and accepts a grouping only when every ticket's
//! rating window (which widens with wait time) covers the group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::rating::types::{ArenaMode, MatchType, Operation};
use crate::storage::config::MatchmakingSettings;

/// A party waiting in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueTicket {
    pub party_id: Uuid,
    pub mode: ArenaMode,
    pub match_type: MatchType,
    /// Set when every member picked the same rated operation
    pub operation: Option<Operation>,
    pub rating: u32,
    pub member_ids: Vec<Uuid>,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueTicket {
    pub fn size(&self) -> usize {
        self.member_ids.len()
    }

    pub fn waited_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.enqueued_at).num_seconds().max(0)
    }

    fn bucket(&self) -> (ArenaMode, MatchType, Option<Operation>) {
        (self.mode, self.match_type, self.operation)
    }
}

/// Allowed rating gap for a ticket. `None` means unlimited.
pub fn rating_window(settings: &MatchmakingSettings, match_type: MatchType, waited_secs: i64) -> Option<u32> {
    if match_type == MatchType::Casual {
        return None;
    }
    let steps = (waited_secs.max(0) as u64 / settings.window_growth_interval_secs.max(1) as u64) as u32;
    let window = settings
        .base_rating_window
        .saturating_add(settings.window_growth.saturating_mul(steps));
    Some(window.min(settings.max_rating_window))
}

fn narrower(a: Option<u32>, b: Option<u32>) -> Option<u32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    }
}

fn within(window: Option<u32>, a: u32, b: u32) -> bool {
    window.map_or(true, |w| a.abs_diff(b) <= w)
}

/// One side of a match assembled from one or more parties.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamCandidate {
    pub tickets: Vec<QueueTicket>,
    pub rating: u32,
    pub window: Option<u32>,
    pub waiting_since: DateTime<Utc>,
}

impl TeamCandidate {
    fn from_tickets(tickets: Vec<QueueTicket>, settings: &MatchmakingSettings, now: DateTime<Utc>) -> Self {
        let players: usize = tickets.iter().map(|t| t.size()).sum();
        let weighted: u64 = tickets
            .iter()
            .map(|t| t.rating as u64 * t.size() as u64)
            .sum();
        let rating = if players == 0 {
            0
        } else {
            (weighted / players as u64) as u32
        };
        let window = tickets
            .iter()
            .map(|t| rating_window(settings, t.match_type, t.waited_secs(now)))
            .reduce(narrower)
            .flatten();
        let waiting_since = tickets
            .iter()
            .map(|t| t.enqueued_at)
            .min()
            .unwrap_or(now);

        Self {
            tickets,
            rating,
            window,
            waiting_since,
        }
    }

    pub fn players(&self) -> usize {
        self.tickets.iter().map(|t| t.size()).sum()
    }

    fn bucket(&self) -> Option<(ArenaMode, MatchType, Option<Operation>)> {
        self.tickets.first().map(|t| t.bucket())
    }
}

/// A pairing decided by a pass, before it is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMatch {
    pub home: TeamCandidate,
    /// `None`: the home side plays an AI team
    pub away: Option<TeamCandidate>,
}

impl PlannedMatch {
    pub fn party_ids(&self) -> Vec<Uuid> {
        self.home
            .tickets
            .iter()
            .chain(self.away.iter().flat_map(|team| team.tickets.iter()))
            .map(|t| t.party_id)
            .collect()
    }
}

/// Group tickets into full teams: full parties stand alone, partial parties
/// are combined to exactly the team size.
pub fn form_teams(tickets: &[QueueTicket], settings: &MatchmakingSettings, now: DateTime<Utc>) -> Vec<TeamCandidate> {
    let mut order: Vec<usize> = (0..tickets.len()).collect();
    order.sort_by_key(|&i| (tickets[i].enqueued_at, tickets[i].party_id));

    let mut used: HashSet<usize> = HashSet::new();
    let mut teams = Vec::new();

    for &seed_idx in &order {
        if used.contains(&seed_idx) {
            continue;
        }
        let seed = &tickets[seed_idx];
        let team_size = seed.mode.team_size();

        if seed.size() > team_size {
            continue;
        }
        if seed.size() == team_size {
            used.insert(seed_idx);
            teams.push(TeamCandidate::from_tickets(vec![seed.clone()], settings, now));
            continue;
        }

        let seed_window = rating_window(settings, seed.match_type, seed.waited_secs(now));
        let mut candidates: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&i| {
                let t = &tickets[i];
                i != seed_idx
                    && !used.contains(&i)
                    && t.bucket() == seed.bucket()
                    && t.size() < team_size
                    && within(seed_window, seed.rating, t.rating)
                    && within(
                        rating_window(settings, t.match_type, t.waited_secs(now)),
                        seed.rating,
                        t.rating,
                    )
            })
            .collect();
        candidates.sort_by_key(|&i| (tickets[i].rating.abs_diff(seed.rating), tickets[i].enqueued_at));

        let mut group = vec![seed_idx];
        let mut filled = seed.size();
        for idx in candidates {
            if filled == team_size {
                break;
            }
            if filled + tickets[idx].size() <= team_size {
                filled += tickets[idx].size();
                group.push(idx);
            }
        }

        if filled == team_size {
            used.extend(group.iter().copied());
            let members = group.into_iter().map(|i| tickets[i].clone()).collect();
            teams.push(TeamCandidate::from_tickets(members, settings, now));
        }
    }

    teams
}

/// Decide the pairings for one pass.
pub fn plan_pass(tickets: &[QueueTicket], settings: &MatchmakingSettings, now: DateTime<Utc>) -> Vec<PlannedMatch> {
    let mut teams = form_teams(tickets, settings, now);
    teams.sort_by_key(|t| (t.waiting_since, t.tickets.first().map(|x| x.party_id)));

    let mut paired: HashSet<usize> = HashSet::new();
    let mut planned = Vec::new();

    for seed_idx in 0..teams.len() {
        if paired.contains(&seed_idx) {
            continue;
        }
        let seed = &teams[seed_idx];

        let opponent = (0..teams.len())
            .filter(|&i| i != seed_idx && !paired.contains(&i))
            .filter(|&i| teams[i].bucket() == seed.bucket())
            .filter(|&i| within(narrower(seed.window, teams[i].window), seed.rating, teams[i].rating))
            .min_by_key(|&i| (teams[i].rating.abs_diff(seed.rating), teams[i].waiting_since));

        if let Some(opponent_idx) = opponent {
            paired.insert(seed_idx);
            paired.insert(opponent_idx);
            planned.push(PlannedMatch {
                home: seed.clone(),
                away: Some(teams[opponent_idx].clone()),
            });
        }
    }

    let fallback_after = settings.ai_fallback_secs as i64;
    let mut claimed: HashSet<Uuid> = planned.iter().flat_map(|p| p.party_ids()).collect();

    // Complete teams with nobody to play
    for (idx, team) in teams.iter().enumerate() {
        if paired.contains(&idx) {
            continue;
        }
        if (now - team.waiting_since).num_seconds() >= fallback_after {
            claimed.extend(team.tickets.iter().map(|t| t.party_id));
            planned.push(PlannedMatch {
                home: team.clone(),
                away: None,
            });
        }
    }

    // Partial parties that never found teammates play with AI teammates
    for ticket in tickets {
        if claimed.contains(&ticket.party_id) || ticket.size() > ticket.mode.team_size() {
            continue;
        }
        if ticket.waited_secs(now) >= fallback_after {
            claimed.insert(ticket.party_id);
            planned.push(PlannedMatch {
                home: TeamCandidate::from_tickets(vec![ticket.clone()], settings, now),
                away: None,
            });
        }
    }

    planned
}
