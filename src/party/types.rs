//! Party records stored in the shared store.
//!
//! These types are encoded with bincode at the store boundary, so they stay
//! plain structs and unit enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rating::types::{ArenaMode, MatchType, Operation};

/// Largest party size, used when no target mode is set.
pub const MAX_PARTY_SIZE: usize = 5;

/// Who may join a party without an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteMode {
    Open,
    InviteOnly,
}

impl Default for InviteMode {
    fn default() -> Self {
        InviteMode::Open
    }
}

/// Party header record (`party:{id}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyState {
    pub id: Uuid,
    pub leader_id: Uuid,
    pub igl_id: Option<Uuid>,
    pub anchor_id: Option<Uuid>,
    pub target_mode: Option<ArenaMode>,
    pub team_id: Option<Uuid>,
    pub team_name: Option<String>,
    pub team_tag: Option<String>,
    pub invite_mode: InviteMode,
    pub max_size: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PartyState {
    pub fn new(leader_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            leader_id,
            igl_id: None,
            anchor_id: None,
            target_mode: None,
            team_id: None,
            team_name: None,
            team_tag: None,
            invite_mode: InviteMode::Open,
            max_size: MAX_PARTY_SIZE,
            created_at: now,
            updated_at: now,
        }
    }

    /// Party size allowed for a target mode.
    pub fn max_size_for(mode: Option<ArenaMode>) -> usize {
        mode.map(|m| m.team_size()).unwrap_or(MAX_PARTY_SIZE)
    }

    pub fn set_target_mode(&mut self, mode: Option<ArenaMode>) {
        self.target_mode = mode;
        self.max_size = Self::max_size_for(mode);
    }

    /// Drop role assignments held by a departing member.
    pub fn clear_roles_of(&mut self, user_id: Uuid) {
        if self.igl_id == Some(user_id) {
            self.igl_id = None;
        }
        if self.anchor_id == Some(user_id) {
            self.anchor_id = None;
        }
    }
}

/// Member entry in `party:{id}:members`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyMember {
    pub user_id: Uuid,
    pub display_name: String,
    pub avatar: Option<String>,
    pub title: Option<String>,
    pub is_ready: bool,
    pub preferred_operation: Option<Operation>,
    pub joined_at: DateTime<Utc>,
    pub is_online: bool,
    pub last_seen_at: DateTime<Utc>,
}

impl PartyMember {
    pub fn new(user_id: Uuid, display_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            display_name: display_name.to_string(),
            avatar: None,
            title: None,
            is_ready: false,
            preferred_operation: None,
            joined_at: now,
            is_online: true,
            last_seen_at: now,
        }
    }
}

/// Pending invitation (`party:{id}:invites`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyInvite {
    pub invite_id: Uuid,
    pub inviter_id: Uuid,
    pub invitee_id: Uuid,
    pub party_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PartyInvite {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Queue status of a party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Idle,
    FindingTeammates,
    FindingOpponents,
    MatchFound,
}

impl QueueStatus {
    pub fn is_searching(&self) -> bool {
        matches!(self, QueueStatus::FindingTeammates | QueueStatus::FindingOpponents)
    }
}

/// Kind of opponent assigned by matchmaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpponentKind {
    Human,
    Ai,
}

/// Queue state (`party:{id}:queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyQueueState {
    pub status: QueueStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub match_type: Option<MatchType>,
    pub match_id: Option<Uuid>,
    pub opponent: Option<OpponentKind>,
}

impl PartyQueueState {
    pub fn idle() -> Self {
        Self {
            status: QueueStatus::Idle,
            started_at: None,
            match_type: None,
            match_id: None,
            opponent: None,
        }
    }

    pub fn searching(status: QueueStatus, match_type: MatchType, now: DateTime<Utc>) -> Self {
        Self {
            status,
            started_at: Some(now),
            match_type: Some(match_type),
            match_id: None,
            opponent: None,
        }
    }

    /// Transition into `match_found`, keeping the search metadata.
    pub fn matched(&self, match_id: Uuid, opponent: OpponentKind) -> Self {
        Self {
            status: QueueStatus::MatchFound,
            started_at: self.started_at,
            match_type: self.match_type,
            match_id: Some(match_id),
            opponent: Some(opponent),
        }
    }
}

impl Default for PartyQueueState {
    fn default() -> Self {
        Self::idle()
    }
}

/// Party with its members and queue state, as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyView {
    pub party: PartyState,
    pub members: Vec<PartyMember>,
    pub queue: PartyQueueState,
}

impl PartyView {
    pub fn member(&self, user_id: Uuid) -> Option<&PartyMember> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.member(user_id).is_some()
    }

    pub fn all_ready(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.is_ready)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.party.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_size_follows_mode() {
        let mut party = PartyState::new(Uuid::new_v4(), Utc::now());
        assert_eq!(party.max_size, MAX_PARTY_SIZE);
        party.set_target_mode(Some(ArenaMode::Duo));
        assert_eq!(party.max_size, 2);
        party.set_target_mode(None);
        assert_eq!(party.max_size, MAX_PARTY_SIZE);
    }

    #[test]
    fn test_matched_keeps_search_metadata() {
        let now = Utc::now();
        let searching = PartyQueueState::searching(QueueStatus::FindingOpponents, MatchType::Ranked, now);
        let match_id = Uuid::new_v4();
        let found = searching.matched(match_id, OpponentKind::Human);
        assert_eq!(found.status, QueueStatus::MatchFound);
        assert_eq!(found.match_id, Some(match_id));
        assert_eq!(found.started_at, Some(now));
        assert_eq!(found.match_type, Some(MatchType::Ranked));
    }

    #[test]
    fn test_records_survive_store_codec() {
        let now = Utc::now();
        let member = PartyMember::new(Uuid::new_v4(), "Noether", now);
        let bytes = crate::storage::kv::encode(&vec![member.clone()]).unwrap();
        let decoded: Vec<PartyMember> = crate::storage::kv::decode(&bytes).unwrap();
        assert_eq!(decoded, vec![member]);
    }
}
