//! Shared store key layout.

use uuid::Uuid;

pub fn party(party_id: Uuid) -> String {
    format!("party:{}", party_id)
}

pub fn members(party_id: Uuid) -> String {
    format!("party:{}:members", party_id)
}

pub fn invites(party_id: Uuid) -> String {
    format!("party:{}:invites", party_id)
}

pub fn queue(party_id: Uuid) -> String {
    format!("party:{}:queue", party_id)
}

/// Party a user currently belongs to.
pub fn user_party(user_id: Uuid) -> String {
    format!("user:{}:party", user_id)
}

/// Parties holding a pending invite for a user.
pub fn user_invites(user_id: Uuid) -> String {
    format!("user:{}:invites", user_id)
}

/// Open matchmaking tickets.
pub const MATCHMAKING_TICKETS: &str = "matchmaking:tickets";

/// Parties that started searching and have no ticket yet.
pub const SEARCHING_PARTIES: &str = "matchmaking:searching";

/// Committed pairings the orchestrator has not picked up yet.
pub const MATCHMAKING_PAIRINGS: &str = "matchmaking:pairings";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::nil();
        assert_eq!(party(id), "party:00000000-0000-0000-0000-000000000000");
        assert!(members(id).ends_with(":members"));
        assert!(queue(id).ends_with(":queue"));
        assert!(user_party(id).starts_with("user:"));
    }
}
