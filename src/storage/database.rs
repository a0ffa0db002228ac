//! Database operations using rusqlite.
//!
//! Persists arena records, practice mastery, authentication tokens, weekly
//! league rows and archived matches.

use crate::league::tiers::WeeklyTier;
use crate::rating::rank::{Division, Rank};
use crate::rating::types::{ArenaMode, ArenaPlayerRecord, MatchType, Operation, OperationElo};
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Weekly league participant row.
#[derive(Debug, Clone, PartialEq)]
pub struct LeagueParticipantRow {
    pub user_id: Uuid,
    pub tier: WeeklyTier,
    pub weekly_xp: u32,
    pub week_start: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
}

/// Final standing of a processed league cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LeagueHistoryRow {
    pub week_start: DateTime<Utc>,
    pub user_id: Uuid,
    pub tier: WeeklyTier,
    pub position: u32,
    pub weekly_xp: u32,
    pub movement: String,
    pub prize_coins: u32,
}

/// Archived match summary.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchHistoryRecord {
    pub match_id: Uuid,
    pub mode: ArenaMode,
    pub match_type: MatchType,
    /// "home", "away", or "draw"
    pub result: String,
    pub home_score: u32,
    pub away_score: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub snapshot_json: String,
}

/// Per-player archived result.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchParticipantRecord {
    pub match_id: Uuid,
    pub user_id: Uuid,
    pub team_index: u8,
    pub score: u32,
    pub correct: u32,
    pub total: u32,
    pub elo_before: u32,
    pub elo_after: u32,
}

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &PathBuf) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.get_schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    fn get_schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            self.conn
                .execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            self.conn
                .execute(
                    "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                    [CURRENT_VERSION],
                )
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== User Operations ==========

    /// Insert a user if it does not exist yet.
    pub fn ensure_user(&self, user_id: &Uuid, display_name: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO users (id, display_name, coins, created_at) VALUES (?1, ?2, 0, ?3)",
                params![user_id.to_string(), display_name, Utc::now().to_rfc3339()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Get a user's display name.
    pub fn get_display_name(&self, user_id: &Uuid) -> Result<Option<String>, DatabaseError> {
        self.conn
            .query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    /// Add coins to a user's balance, returning the new balance.
    pub fn credit_coins(&self, user_id: &Uuid, amount: u32) -> Result<u64, DatabaseError> {
        let updated = self
            .conn
            .execute(
                "UPDATE users SET coins = coins + ?1 WHERE id = ?2",
                params![amount, user_id.to_string()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound(format!("user {}", user_id)));
        }

        self.get_coins(user_id)
    }

    /// Get a user's coin balance.
    pub fn get_coins(&self, user_id: &Uuid) -> Result<u64, DatabaseError> {
        self.conn
            .query_row(
                "SELECT coins FROM users WHERE id = ?1",
                params![user_id.to_string()],
                |row| row.get::<_, i64>(0),
            )
            .map(|c| c.max(0) as u64)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DatabaseError::NotFound(format!("user {}", user_id))
                }
                other => DatabaseError::QueryFailed(other.to_string()),
            })
    }

    // ========== Arena Record Operations ==========

    /// Insert or replace an arena record.
    pub fn upsert_arena_record(&self, record: &ArenaPlayerRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO arena_players (
                    user_id, mode, elo, elo_addition, elo_subtraction, elo_multiplication,
                    elo_division, wins_in_tier, skill_tier, rank, division, matches_played,
                    wins, losses, draws, last_active_at, placement_matches_completed
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    record.user_id.to_string(),
                    record.mode.as_str(),
                    record.elo,
                    record.operation_elo.addition,
                    record.operation_elo.subtraction,
                    record.operation_elo.multiplication,
                    record.operation_elo.division,
                    record.wins_in_tier,
                    record.skill_tier,
                    record.rank.as_str(),
                    record.division.as_str(),
                    record.matches_played,
                    record.wins,
                    record.losses,
                    record.draws,
                    record.last_active_at.to_rfc3339(),
                    record.placement_matches_completed,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Get an arena record.
    pub fn get_arena_record(
        &self,
        user_id: &Uuid,
        mode: ArenaMode,
    ) -> Result<Option<ArenaPlayerRecord>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT elo, elo_addition, elo_subtraction, elo_multiplication, elo_division,
                        wins_in_tier, skill_tier, rank, division, matches_played, wins, losses,
                        draws, last_active_at, placement_matches_completed
                 FROM arena_players WHERE user_id = ?1 AND mode = ?2",
                params![user_id.to_string(), mode.as_str()],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        OperationElo {
                            addition: row.get(1)?,
                            subtraction: row.get(2)?,
                            multiplication: row.get(3)?,
                            division: row.get(4)?,
                        },
                        row.get::<_, u32>(5)?,
                        row.get::<_, u8>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        (
                            row.get::<_, u32>(9)?,
                            row.get::<_, u32>(10)?,
                            row.get::<_, u32>(11)?,
                            row.get::<_, u32>(12)?,
                        ),
                        row.get::<_, String>(13)?,
                        row.get::<_, Option<u8>>(14)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let Some((
            elo,
            operation_elo,
            wins_in_tier,
            skill_tier,
            rank,
            division,
            (matches_played, wins, losses, draws),
            last_active_at,
            placement_matches_completed,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(ArenaPlayerRecord {
            user_id: *user_id,
            mode,
            elo,
            operation_elo,
            wins_in_tier,
            skill_tier,
            rank: Rank::from_str(&rank)
                .ok_or_else(|| DatabaseError::DeserializationError(format!("rank {}", rank)))?,
            division: Division::from_str(&division).ok_or_else(|| {
                DatabaseError::DeserializationError(format!("division {}", division))
            })?,
            matches_played,
            wins,
            losses,
            draws,
            last_active_at: parse_timestamp(&last_active_at)?,
            placement_matches_completed,
        }))
    }

    // ========== Practice Mastery Operations ==========

    /// Set the skill tier for an operation.
    pub fn set_skill_tier(
        &self,
        user_id: &Uuid,
        operation: Operation,
        skill_tier: u8,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO practice_mastery (user_id, operation, skill_tier) VALUES (?1, ?2, ?3)",
                params![user_id.to_string(), operation.as_str(), skill_tier.clamp(1, 100)],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Get the skill tier for an operation.
    pub fn get_skill_tier(
        &self,
        user_id: &Uuid,
        operation: Operation,
    ) -> Result<Option<u8>, DatabaseError> {
        self.conn
            .query_row(
                "SELECT skill_tier FROM practice_mastery WHERE user_id = ?1 AND operation = ?2",
                params![user_id.to_string(), operation.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    /// Average skill tier across rated operations, if any were recorded.
    pub fn get_overall_skill_tier(&self, user_id: &Uuid) -> Result<Option<u8>, DatabaseError> {
        let avg: Option<f64> = self
            .conn
            .query_row(
                "SELECT AVG(skill_tier) FROM practice_mastery WHERE user_id = ?1 AND operation != 'mixed'",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(avg.map(|a| a.round().clamp(1.0, 100.0) as u8))
    }

    // ========== Auth Token Operations ==========

    /// Store an authentication token.
    pub fn insert_auth_token(
        &self,
        token: &str,
        user_id: &Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO auth_tokens (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token, user_id.to_string(), expires_at.to_rfc3339()],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Resolve a token that has not expired.
    pub fn resolve_auth_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>, DatabaseError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT user_id, expires_at FROM auth_tokens WHERE token = ?1",
                params![token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        match row {
            Some((user_id, expires_at)) if parse_timestamp(&expires_at)? > now => {
                Ok(Some(parse_uuid(&user_id)?))
            }
            _ => Ok(None),
        }
    }

    // ========== League Operations ==========

    /// Insert or replace a league participant row.
    pub fn upsert_league_participant(
        &self,
        row: &LeagueParticipantRow,
    ) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO league_participants (user_id, tier, weekly_xp, week_start, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.user_id.to_string(),
                    row.tier.as_str(),
                    row.weekly_xp,
                    row.week_start.to_rfc3339(),
                    row.joined_at.to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Get one league participant.
    pub fn get_league_participant(
        &self,
        user_id: &Uuid,
    ) -> Result<Option<LeagueParticipantRow>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id, tier, weekly_xp, week_start, joined_at
                 FROM league_participants WHERE user_id = ?1",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut rows = stmt
            .query_map(params![user_id.to_string()], read_league_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        match rows.next() {
            Some(row) => Ok(Some(convert_league_row(
                row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?,
            )?)),
            None => Ok(None),
        }
    }

    /// List all league participants.
    pub fn list_league_participants(&self) -> Result<Vec<LeagueParticipantRow>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id, tier, weekly_xp, week_start, joined_at
                 FROM league_participants ORDER BY joined_at ASC",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map([], read_league_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut participants = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            participants.push(convert_league_row(raw)?);
        }
        Ok(participants)
    }

    /// Check whether a cycle has been processed.
    pub fn is_cycle_processed(&self, week_start: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM league_cycles WHERE week_start = ?1")
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        stmt.exists(params![week_start.to_rfc3339()])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    /// Persist a processed cycle atomically: new rows, history, cycle marker.
    pub fn commit_league_cycle(
        &mut self,
        week_start: DateTime<Utc>,
        participants: &[LeagueParticipantRow],
        history: &[LeagueHistoryRow],
    ) -> Result<(), DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO league_cycles (week_start, processed_at, participants) VALUES (?1, ?2, ?3)",
                params![
                    week_start.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    participants.len() as i64
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if inserted == 0 {
            return Err(DatabaseError::ConstraintViolation(format!(
                "cycle {} already processed",
                week_start
            )));
        }

        for row in participants {
            tx.execute(
                "INSERT OR REPLACE INTO league_participants (user_id, tier, weekly_xp, week_start, joined_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    row.user_id.to_string(),
                    row.tier.as_str(),
                    row.weekly_xp,
                    row.week_start.to_rfc3339(),
                    row.joined_at.to_rfc3339(),
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        }

        for entry in history {
            tx.execute(
                "INSERT INTO league_history (week_start, user_id, tier, position, weekly_xp, movement, prize_coins)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.week_start.to_rfc3339(),
                    entry.user_id.to_string(),
                    entry.tier.as_str(),
                    entry.position,
                    entry.weekly_xp,
                    entry.movement,
                    entry.prize_coins,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

            if entry.prize_coins > 0 {
                tx.execute(
                    "UPDATE users SET coins = coins + ?1 WHERE id = ?2",
                    params![entry.prize_coins, entry.user_id.to_string()],
                )
                .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            }
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }

    /// League history rows for a week.
    pub fn get_league_history(
        &self,
        week_start: DateTime<Utc>,
    ) -> Result<Vec<LeagueHistoryRow>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT user_id, tier, position, weekly_xp, movement, prize_coins
                 FROM league_history WHERE week_start = ?1 ORDER BY tier, position",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![week_start.to_rfc3339()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, u32>(5)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut history = Vec::new();
        for row in rows {
            let (user_id, tier, position, weekly_xp, movement, prize_coins) =
                row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            history.push(LeagueHistoryRow {
                week_start,
                user_id: parse_uuid(&user_id)?,
                tier: WeeklyTier::from_str(&tier)
                    .ok_or_else(|| DatabaseError::DeserializationError(format!("tier {}", tier)))?,
                position,
                weekly_xp,
                movement,
                prize_coins,
            });
        }
        Ok(history)
    }

    // ========== Match History Operations ==========

    /// Archive a finished match with its participants.
    pub fn insert_match_history(
        &mut self,
        record: &MatchHistoryRecord,
        participants: &[MatchParticipantRecord],
    ) -> Result<(), DatabaseError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))?;

        tx.execute(
            "INSERT INTO match_history (match_id, mode, match_type, result, home_score, away_score, started_at, ended_at, snapshot_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.match_id.to_string(),
                record.mode.as_str(),
                record.match_type.as_str(),
                record.result,
                record.home_score,
                record.away_score,
                record.started_at.to_rfc3339(),
                record.ended_at.to_rfc3339(),
                record.snapshot_json,
            ],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        for p in participants {
            tx.execute(
                "INSERT INTO match_participants (match_id, user_id, team_index, score, correct, total, elo_before, elo_after)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    p.match_id.to_string(),
                    p.user_id.to_string(),
                    p.team_index,
                    p.score,
                    p.correct,
                    p.total,
                    p.elo_before,
                    p.elo_after,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        }

        tx.commit()
            .map_err(|e| DatabaseError::TransactionFailed(e.to_string()))
    }

    /// Get an archived match.
    pub fn get_match_history(
        &self,
        match_id: &Uuid,
    ) -> Result<Option<MatchHistoryRecord>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                "SELECT mode, match_type, result, home_score, away_score, started_at, ended_at, snapshot_json
                 FROM match_history WHERE match_id = ?1",
                params![match_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let Some((mode, match_type, result, home_score, away_score, started_at, ended_at, snapshot_json)) =
            row
        else {
            return Ok(None);
        };

        Ok(Some(MatchHistoryRecord {
            match_id: *match_id,
            mode: ArenaMode::from_str(&mode)
                .ok_or_else(|| DatabaseError::DeserializationError(format!("mode {}", mode)))?,
            match_type: MatchType::from_str(&match_type).ok_or_else(|| {
                DatabaseError::DeserializationError(format!("match type {}", match_type))
            })?,
            result,
            home_score,
            away_score,
            started_at: parse_timestamp(&started_at)?,
            ended_at: parse_timestamp(&ended_at)?,
            snapshot_json,
        }))
    }

    /// Most recent results for a user.
    pub fn get_recent_matches(
        &self,
        user_id: &Uuid,
        limit: usize,
    ) -> Result<Vec<MatchParticipantRecord>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT p.match_id, p.team_index, p.score, p.correct, p.total, p.elo_before, p.elo_after
                 FROM match_participants p
                 JOIN match_history h ON h.match_id = p.match_id
                 WHERE p.user_id = ?1
                 ORDER BY h.ended_at DESC
                 LIMIT ?2",
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![user_id.to_string(), limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, u8>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, u32>(6)?,
                ))
            })
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let mut results = Vec::new();
        for row in rows {
            let (match_id, team_index, score, correct, total, elo_before, elo_after) =
                row.map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            results.push(MatchParticipantRecord {
                match_id: parse_uuid(&match_id)?,
                user_id: *user_id,
                team_index,
                score,
                correct,
                total,
                elo_before,
                elo_after,
            });
        }
        Ok(results)
    }
}

type RawLeagueRow = (String, String, u32, String, String);

fn read_league_row(row: &rusqlite::Row<'_>) -> SqliteResult<RawLeagueRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn convert_league_row(raw: RawLeagueRow) -> Result<LeagueParticipantRow, DatabaseError> {
    let (user_id, tier, weekly_xp, week_start, joined_at) = raw;
    Ok(LeagueParticipantRow {
        user_id: parse_uuid(&user_id)?,
        tier: WeeklyTier::from_str(&tier)
            .ok_or_else(|| DatabaseError::DeserializationError(format!("tier {}", tier)))?,
        weekly_xp,
        week_start: parse_timestamp(&week_start)?,
        joined_at: parse_timestamp(&joined_at)?,
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s).map_err(|e| DatabaseError::DeserializationError(e.to_string()))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::DeserializationError(e.to_string()))
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_schema_version().unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn test_arena_record_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        db.ensure_user(&user_id, "Ada").unwrap();

        let mut record = ArenaPlayerRecord::new(user_id, ArenaMode::Duo, 70, Utc::now());
        record.elo = 612;
        record.operation_elo.division = 433;
        record.wins_in_tier = 41;
        record.refresh_rank();
        record.placement_matches_completed = Some(1);
        db.upsert_arena_record(&record).unwrap();

        let loaded = db.get_arena_record(&user_id, ArenaMode::Duo).unwrap().unwrap();
        assert_eq!(loaded.elo, 612);
        assert_eq!(loaded.operation_elo.division, 433);
        assert_eq!(loaded.rank, Rank::Silver);
        assert_eq!(loaded.division, Division::I);
        assert_eq!(loaded.placement_matches_completed, Some(1));

        assert!(db.get_arena_record(&user_id, ArenaMode::Duel).unwrap().is_none());
    }

    #[test]
    fn test_credit_coins() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        db.ensure_user(&user_id, "Grace").unwrap();

        assert_eq!(db.credit_coins(&user_id, 100).unwrap(), 100);
        assert_eq!(db.credit_coins(&user_id, 30).unwrap(), 130);
        assert!(matches!(
            db.credit_coins(&Uuid::new_v4(), 10),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn test_auth_token_expiry() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        db.insert_auth_token("abc", &user_id, now + Duration::hours(1))
            .unwrap();

        assert_eq!(db.resolve_auth_token("abc", now).unwrap(), Some(user_id));
        assert_eq!(
            db.resolve_auth_token("abc", now + Duration::hours(2)).unwrap(),
            None
        );
        assert_eq!(db.resolve_auth_token("missing", now).unwrap(), None);
    }

    #[test]
    fn test_league_cycle_is_processed_once() {
        let mut db = Database::open_in_memory().unwrap();
        let week = Utc::now();
        let row = LeagueParticipantRow {
            user_id: Uuid::new_v4(),
            tier: WeeklyTier::Cobalt,
            weekly_xp: 0,
            week_start: week,
            joined_at: week,
        };

        db.commit_league_cycle(week, &[row.clone()], &[]).unwrap();
        assert!(db.is_cycle_processed(week).unwrap());
        assert!(db.commit_league_cycle(week, &[row], &[]).is_err());
        assert_eq!(db.list_league_participants().unwrap().len(), 1);
    }

    #[test]
    fn test_skill_tier_average() {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        assert_eq!(db.get_overall_skill_tier(&user_id).unwrap(), None);

        db.set_skill_tier(&user_id, Operation::Addition, 80).unwrap();
        db.set_skill_tier(&user_id, Operation::Division, 40).unwrap();
        assert_eq!(db.get_overall_skill_tier(&user_id).unwrap(), Some(60));
        assert_eq!(
            db.get_skill_tier(&user_id, Operation::Division).unwrap(),
            Some(40)
        );
    }
}
