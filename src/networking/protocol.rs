//! Real-time protocol definitions.
//!
//! JSON text frames over WebSocket. Every message carries a snake_case
//! `type` tag; fields are camelCase.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::matches::questions::Question;
use crate::matches::types::{MatchOutcome, MatchPhase, MatchState};
use crate::party::PartyView;
use crate::rating::types::{ArenaMode, Operation};

/// Protocol version reported on authentication.
pub const PROTOCOL_VERSION: u8 = 1;

/// Longest text frame accepted from a client.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024;

/// Longest typing preview relayed to teammates.
pub const MAX_TYPING_LEN: usize = 32;

/// Client to server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    JoinTeamMatch {
        match_id: Uuid,
        user_id: Uuid,
    },
    SubmitAnswer {
        match_id: Uuid,
        user_id: Uuid,
        answer: String,
    },
    TypingUpdate {
        match_id: Uuid,
        user_id: Uuid,
        current_input: String,
    },
    IglTimeout {
        match_id: Uuid,
        user_id: Uuid,
    },
    IglSwapSlots {
        match_id: Uuid,
        user_id: Uuid,
        /// Slot number (as a JSON object key) to user
        new_assignments: BTreeMap<String, Uuid>,
    },
    AnchorDoubleCallin {
        match_id: Uuid,
        user_id: Uuid,
        target_slot: u8,
    },
    ForfeitMatch {
        match_id: Uuid,
        user_id: Uuid,
    },
    /// Polling read of the caller's party and queue state
    PartyStatus,
}

impl ClientMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientMessage::Authenticate { .. } => "authenticate",
            ClientMessage::JoinTeamMatch { .. } => "join_team_match",
            ClientMessage::SubmitAnswer { .. } => "submit_answer",
            ClientMessage::TypingUpdate { .. } => "typing_update",
            ClientMessage::IglTimeout { .. } => "igl_timeout",
            ClientMessage::IglSwapSlots { .. } => "igl_swap_slots",
            ClientMessage::AnchorDoubleCallin { .. } => "anchor_double_callin",
            ClientMessage::ForfeitMatch { .. } => "forfeit_match",
            ClientMessage::PartyStatus => "party_status",
        }
    }

    /// Match and claimed user of a match message.
    pub fn match_target(&self) -> Option<(Uuid, Uuid)> {
        match self {
            ClientMessage::JoinTeamMatch { match_id, user_id }
            | ClientMessage::SubmitAnswer { match_id, user_id, .. }
            | ClientMessage::TypingUpdate { match_id, user_id, .. }
            | ClientMessage::IglTimeout { match_id, user_id }
            | ClientMessage::IglSwapSlots { match_id, user_id, .. }
            | ClientMessage::AnchorDoubleCallin { match_id, user_id, .. }
            | ClientMessage::ForfeitMatch { match_id, user_id } => Some((*match_id, *user_id)),
            ClientMessage::Authenticate { .. } | ClientMessage::PartyStatus => None,
        }
    }
}

/// Parse slot assignment keys into slot numbers.
pub fn parse_slot_assignments(raw: &BTreeMap<String, Uuid>) -> Result<BTreeMap<u8, Uuid>, String> {
    raw.iter()
        .map(|(slot, user_id)| {
            slot.trim()
                .parse::<u8>()
                .map(|slot| (slot, *user_id))
                .map_err(|_| format!("Invalid slot number: {}", slot))
        })
        .collect()
}

/// Server to client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Authenticated {
        user_id: Uuid,
        protocol_version: u8,
    },
    /// Full snapshot, sent on (re)join
    MatchState {
        state: Box<MatchState>,
    },
    MatchStart {
        match_id: Uuid,
        mode: ArenaMode,
        total_rounds: u32,
    },
    QuestionUpdate {
        match_id: Uuid,
        user_id: Uuid,
        slot: u8,
        question: Question,
    },
    TypingUpdate {
        match_id: Uuid,
        user_id: Uuid,
        current_input: String,
    },
    AnswerResult {
        match_id: Uuid,
        user_id: Uuid,
        team_index: usize,
        correct: bool,
        points: u32,
        streak: u32,
        player_score: u32,
        team_score: u32,
    },
    TeammateAnswer {
        match_id: Uuid,
        user_id: Uuid,
        correct: bool,
        points: u32,
        team_score: u32,
    },
    SlotChange {
        match_id: Uuid,
        round: u32,
        slot: u8,
        operation: Operation,
        active_players: Vec<Uuid>,
        relay_clock_ms: u64,
    },
    HandoffCountdown {
        match_id: Uuid,
        next_slot: u8,
        remaining_ms: u64,
    },
    RoundBreak {
        match_id: Uuid,
        completed_round: u32,
        duration_ms: u64,
        home_score: u32,
        away_score: u32,
    },
    Halftime {
        match_id: Uuid,
        duration_ms: u64,
        home_score: u32,
        away_score: u32,
    },
    RoundStart {
        match_id: Uuid,
        round: u32,
        half: u8,
    },
    ClockUpdate {
        match_id: Uuid,
        phase: MatchPhase,
        game_clock_ms: u64,
        relay_clock_ms: u64,
        phase_remaining_ms: u64,
    },
    MatchEnd {
        match_id: Uuid,
        outcome: MatchOutcome,
        state: Box<MatchState>,
    },
    PlayerConnected {
        match_id: Uuid,
        user_id: Uuid,
    },
    PlayerDisconnected {
        match_id: Uuid,
        user_id: Uuid,
    },
    TimeoutCalled {
        match_id: Uuid,
        team_index: usize,
        user_id: Uuid,
        timeouts_remaining: u32,
        relay_clock_ms: u64,
    },
    SlotsUpdated {
        match_id: Uuid,
        team_index: usize,
        slots: BTreeMap<u8, Uuid>,
    },
    AnchorAbilityUsed {
        match_id: Uuid,
        team_index: usize,
        user_id: Uuid,
        target_slot: u8,
    },
    PartyStatus {
        party: Option<Box<PartyView>>,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerEvent::Authenticated { .. } => "authenticated",
            ServerEvent::MatchState { .. } => "match_state",
            ServerEvent::MatchStart { .. } => "match_start",
            ServerEvent::QuestionUpdate { .. } => "question_update",
            ServerEvent::TypingUpdate { .. } => "typing_update",
            ServerEvent::AnswerResult { .. } => "answer_result",
            ServerEvent::TeammateAnswer { .. } => "teammate_answer",
            ServerEvent::SlotChange { .. } => "slot_change",
            ServerEvent::HandoffCountdown { .. } => "handoff_countdown",
            ServerEvent::RoundBreak { .. } => "round_break",
            ServerEvent::Halftime { .. } => "halftime",
            ServerEvent::RoundStart { .. } => "round_start",
            ServerEvent::ClockUpdate { .. } => "clock_update",
            ServerEvent::MatchEnd { .. } => "match_end",
            ServerEvent::PlayerConnected { .. } => "player_connected",
            ServerEvent::PlayerDisconnected { .. } => "player_disconnected",
            ServerEvent::TimeoutCalled { .. } => "timeout_called",
            ServerEvent::SlotsUpdated { .. } => "slots_updated",
            ServerEvent::AnchorAbilityUsed { .. } => "anchor_ability_used",
            ServerEvent::PartyStatus { .. } => "party_status",
            ServerEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_names() {
        let match_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"anchor_double_callin","matchId":"{}","userId":"{}","targetSlot":3}}"#,
            match_id, user_id
        );
        let msg: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::AnchorDoubleCallin {
                match_id,
                user_id,
                target_slot: 3
            }
        );
        assert_eq!(msg.match_target(), Some((match_id, user_id)));
    }

    #[test]
    fn test_swap_assignments_parse_from_string_keys() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"igl_swap_slots","matchId":"{}","userId":"{}","newAssignments":{{"1":"{}","2":"{}"}}}}"#,
            Uuid::new_v4(),
            a,
            b,
            a
        );
        match serde_json::from_str::<ClientMessage>(&json).unwrap() {
            ClientMessage::IglSwapSlots { new_assignments, .. } => {
                let slots = parse_slot_assignments(&new_assignments).unwrap();
                assert_eq!(slots.get(&1), Some(&b));
                assert_eq!(slots.get(&2), Some(&a));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_slot_key_is_reported() {
        let mut raw = BTreeMap::new();
        raw.insert("first".to_string(), Uuid::new_v4());
        assert!(parse_slot_assignments(&raw).is_err());
    }

    #[test]
    fn test_party_status_has_no_fields() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"party_status"}"#).unwrap();
        assert_eq!(msg, ClientMessage::PartyStatus);
        assert_eq!(msg.match_target(), None);
    }

    #[test]
    fn test_server_event_tag_matches_as_str() {
        let event = ServerEvent::HandoffCountdown {
            match_id: Uuid::new_v4(),
            next_slot: 2,
            remaining_ms: 3000,
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], event.as_str());
        assert_eq!(value["nextSlot"], 2);
        assert_eq!(value["remainingMs"], 3000);
    }

    #[test]
    fn test_error_event() {
        let json = ServerEvent::error("Not authenticated").to_json().unwrap();
        assert_eq!(json, r#"{"type":"error","message":"Not authenticated"}"#);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"teleport"}"#).is_err());
    }
}
