//! Collaborator interfaces consumed by the arena core, and their SQLite
//! implementation.
//!
//! The arena never talks to the database directly; it goes through these
//! traits so profile storage, mastery, authentication and league rows can be
//! served by whatever the application shell provides.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::database::{
    Database, DatabaseError, LeagueHistoryRow, LeagueParticipantRow, MatchHistoryRecord,
    MatchParticipantRecord,
};
use crate::rating::types::{ArenaMode, ArenaPlayerRecord, Operation};

/// Default skill tier when no practice mastery has been recorded.
pub const DEFAULT_SKILL_TIER: u8 = 1;

/// Read/write access to persisted arena records.
pub trait ProfileStore: Send + Sync {
    /// Load a record, seeding a fresh one when the user has none for the mode.
    fn load_record(&self, user_id: Uuid, mode: ArenaMode) -> Result<ArenaPlayerRecord, DatabaseError>;

    fn save_record(&self, record: &ArenaPlayerRecord) -> Result<(), DatabaseError>;

    fn display_name(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError>;

    fn credit_coins(&self, user_id: Uuid, amount: u32) -> Result<u64, DatabaseError>;
}

/// Skill tier per operation from practice mastery.
pub trait MasterySource: Send + Sync {
    /// `None` asks for the overall tier.
    fn skill_tier(&self, user_id: Uuid, operation: Option<Operation>) -> Result<u8, DatabaseError>;
}

/// Resolves a bearer token to the authenticated user.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<Uuid>;
}

/// Weekly league rows.
pub trait LeagueStore: Send + Sync {
    fn participants(&self) -> Result<Vec<LeagueParticipantRow>, DatabaseError>;

    fn participant(&self, user_id: Uuid) -> Result<Option<LeagueParticipantRow>, DatabaseError>;

    fn upsert_participant(&self, row: &LeagueParticipantRow) -> Result<(), DatabaseError>;

    fn is_cycle_processed(&self, week_start: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Persist new memberships, history and prize credit in one transaction.
    fn commit_cycle(
        &self,
        week_start: DateTime<Utc>,
        participants: &[LeagueParticipantRow],
        history: &[LeagueHistoryRow],
    ) -> Result<(), DatabaseError>;
}

/// Persistent archive of finished matches.
pub trait MatchArchive: Send + Sync {
    fn archive_match(
        &self,
        record: &MatchHistoryRecord,
        participants: &[MatchParticipantRecord],
    ) -> Result<(), DatabaseError>;
}

/// SQLite-backed implementation of every collaborator interface.
pub struct SqliteArenaStore {
    db: Mutex<Database>,
}

impl SqliteArenaStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open(path: &PathBuf) -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Lock the underlying database.
    pub fn db(&self) -> Result<MutexGuard<'_, Database>, DatabaseError> {
        self.db
            .lock()
            .map_err(|_| DatabaseError::ConnectionFailed("database mutex poisoned".to_string()))
    }

    /// Register a user (application shell responsibility, exposed for setup).
    pub fn register_user(&self, user_id: Uuid, display_name: &str) -> Result<(), DatabaseError> {
        self.db()?.ensure_user(&user_id, display_name)
    }

    /// Issue a token for a user.
    pub fn issue_token(
        &self,
        token: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.db()?.insert_auth_token(token, &user_id, expires_at)
    }

    pub fn recent_matches(
        &self,
        user_id: Uuid,
        limit: usize,
    ) -> Result<Vec<MatchParticipantRecord>, DatabaseError> {
        self.db()?.get_recent_matches(&user_id, limit)
    }

    pub fn match_history(&self, match_id: Uuid) -> Result<Option<MatchHistoryRecord>, DatabaseError> {
        self.db()?.get_match_history(&match_id)
    }

    /// Final standings of a processed league week.
    pub fn league_history(&self, week_start: DateTime<Utc>) -> Result<Vec<LeagueHistoryRow>, DatabaseError> {
        self.db()?.get_league_history(week_start)
    }
}

impl ProfileStore for SqliteArenaStore {
    fn load_record(&self, user_id: Uuid, mode: ArenaMode) -> Result<ArenaPlayerRecord, DatabaseError> {
        let db = self.db()?;
        if let Some(record) = db.get_arena_record(&user_id, mode)? {
            return Ok(record);
        }

        let skill_tier = db
            .get_overall_skill_tier(&user_id)?
            .unwrap_or(DEFAULT_SKILL_TIER);
        Ok(ArenaPlayerRecord::new(user_id, mode, skill_tier, Utc::now()))
    }

    fn save_record(&self, record: &ArenaPlayerRecord) -> Result<(), DatabaseError> {
        self.db()?.upsert_arena_record(record)
    }

    fn display_name(&self, user_id: Uuid) -> Result<Option<String>, DatabaseError> {
        self.db()?.get_display_name(&user_id)
    }

    fn credit_coins(&self, user_id: Uuid, amount: u32) -> Result<u64, DatabaseError> {
        self.db()?.credit_coins(&user_id, amount)
    }
}

impl MasterySource for SqliteArenaStore {
    fn skill_tier(&self, user_id: Uuid, operation: Option<Operation>) -> Result<u8, DatabaseError> {
        let db = self.db()?;
        let tier = match operation {
            Some(op) if op != Operation::Mixed => db.get_skill_tier(&user_id, op)?,
            _ => db.get_overall_skill_tier(&user_id)?,
        };
        Ok(tier.unwrap_or(DEFAULT_SKILL_TIER))
    }
}

impl Authenticator for SqliteArenaStore {
    fn authenticate(&self, token: &str) -> Option<Uuid> {
        match self.db().and_then(|db| db.resolve_auth_token(token, Utc::now())) {
            Ok(user_id) => user_id,
            Err(e) => {
                tracing::warn!("Token lookup failed: {}", e);
                None
            }
        }
    }
}

impl LeagueStore for SqliteArenaStore {
    fn participants(&self) -> Result<Vec<LeagueParticipantRow>, DatabaseError> {
        self.db()?.list_league_participants()
    }

    fn participant(&self, user_id: Uuid) -> Result<Option<LeagueParticipantRow>, DatabaseError> {
        self.db()?.get_league_participant(&user_id)
    }

    fn upsert_participant(&self, row: &LeagueParticipantRow) -> Result<(), DatabaseError> {
        self.db()?.upsert_league_participant(row)
    }

    fn is_cycle_processed(&self, week_start: DateTime<Utc>) -> Result<bool, DatabaseError> {
        self.db()?.is_cycle_processed(week_start)
    }

    fn commit_cycle(
        &self,
        week_start: DateTime<Utc>,
        participants: &[LeagueParticipantRow],
        history: &[LeagueHistoryRow],
    ) -> Result<(), DatabaseError> {
        self.db()?.commit_league_cycle(week_start, participants, history)
    }
}

impl MatchArchive for SqliteArenaStore {
    fn archive_match(
        &self,
        record: &MatchHistoryRecord,
        participants: &[MatchParticipantRecord],
    ) -> Result<(), DatabaseError> {
        self.db()?.insert_match_history(record, participants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_load_record_seeds_from_mastery() {
        let store = SqliteArenaStore::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        store.register_user(user_id, "Emmy").unwrap();
        store
            .db()
            .unwrap()
            .set_skill_tier(&user_id, Operation::Multiplication, 64)
            .unwrap();

        let record = store.load_record(user_id, ArenaMode::Squad).unwrap();
        assert_eq!(record.elo, 250);
        assert_eq!(record.skill_tier, 64);
        assert_eq!(store.skill_tier(user_id, Some(Operation::Addition)).unwrap(), 1);
        assert_eq!(
            store.skill_tier(user_id, Some(Operation::Multiplication)).unwrap(),
            64
        );
    }

    #[test]
    fn test_save_then_load() {
        let store = SqliteArenaStore::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        store.register_user(user_id, "Alan").unwrap();

        let mut record = store.load_record(user_id, ArenaMode::Duel).unwrap();
        record.elo = 777;
        store.save_record(&record).unwrap();

        assert_eq!(store.load_record(user_id, ArenaMode::Duel).unwrap().elo, 777);
        assert_eq!(store.display_name(user_id).unwrap().as_deref(), Some("Alan"));
    }

    #[test]
    fn test_authenticate_token() {
        let store = SqliteArenaStore::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        store
            .issue_token("token-1", user_id, Utc::now() + Duration::hours(1))
            .unwrap();

        assert_eq!(store.authenticate("token-1"), Some(user_id));
        assert_eq!(store.authenticate("token-2"), None);
    }
}
