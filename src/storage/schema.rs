//! Database schema definitions for MathArena.

/// SQL schema for creating all database tables.
pub const SCHEMA: &str = r#"
-- Users table (profile fields owned by the application shell)
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    coins INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- Arena records, one per user per mode
CREATE TABLE IF NOT EXISTS arena_players (
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    mode TEXT NOT NULL,
    elo INTEGER NOT NULL,
    elo_addition INTEGER NOT NULL,
    elo_subtraction INTEGER NOT NULL,
    elo_multiplication INTEGER NOT NULL,
    elo_division INTEGER NOT NULL,
    wins_in_tier INTEGER NOT NULL DEFAULT 0,
    skill_tier INTEGER NOT NULL DEFAULT 1,
    rank TEXT NOT NULL,
    division TEXT NOT NULL,
    matches_played INTEGER NOT NULL DEFAULT 0,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    draws INTEGER NOT NULL DEFAULT 0,
    last_active_at TEXT NOT NULL,
    placement_matches_completed INTEGER,
    PRIMARY KEY (user_id, mode)
);

-- Practice mastery per operation (skill tier source)
CREATE TABLE IF NOT EXISTS practice_mastery (
    user_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    skill_tier INTEGER NOT NULL,
    PRIMARY KEY (user_id, operation)
);

-- Authentication tokens issued by the application shell
CREATE TABLE IF NOT EXISTS auth_tokens (
    token TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Weekly league membership
CREATE TABLE IF NOT EXISTS league_participants (
    user_id TEXT PRIMARY KEY,
    tier TEXT NOT NULL,
    weekly_xp INTEGER NOT NULL DEFAULT 0,
    week_start TEXT NOT NULL,
    joined_at TEXT NOT NULL
);

-- Processed league cycles
CREATE TABLE IF NOT EXISTS league_cycles (
    week_start TEXT PRIMARY KEY,
    processed_at TEXT NOT NULL,
    participants INTEGER NOT NULL
);

-- Final standings of processed cycles
CREATE TABLE IF NOT EXISTS league_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    week_start TEXT NOT NULL,
    user_id TEXT NOT NULL,
    tier TEXT NOT NULL,
    position INTEGER NOT NULL,
    weekly_xp INTEGER NOT NULL,
    movement TEXT NOT NULL,
    prize_coins INTEGER NOT NULL DEFAULT 0
);

-- Archived matches
CREATE TABLE IF NOT EXISTS match_history (
    match_id TEXT PRIMARY KEY,
    mode TEXT NOT NULL,
    match_type TEXT NOT NULL,
    result TEXT NOT NULL,
    home_score INTEGER NOT NULL,
    away_score INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    snapshot_json TEXT NOT NULL
);

-- Per-player match results
CREATE TABLE IF NOT EXISTS match_participants (
    match_id TEXT NOT NULL REFERENCES match_history(match_id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    team_index INTEGER NOT NULL,
    score INTEGER NOT NULL,
    correct INTEGER NOT NULL,
    total INTEGER NOT NULL,
    elo_before INTEGER NOT NULL,
    elo_after INTEGER NOT NULL,
    PRIMARY KEY (match_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_league_participants_tier ON league_participants(tier);
CREATE INDEX IF NOT EXISTS idx_league_history_week ON league_history(week_start);
CREATE INDEX IF NOT EXISTS idx_match_participants_user ON match_participants(user_id);
"#;

/// Schema version table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;
