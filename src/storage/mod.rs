//! Storage module: shared key-value state, SQLite persistence and configuration.

pub mod arena_store;
pub mod config;
pub mod database;
pub mod kv;
pub mod schema;

pub use arena_store::{
    Authenticator, LeagueStore, MasterySource, MatchArchive, ProfileStore, SqliteArenaStore,
};
pub use config::AppConfig;
pub use database::{Database, DatabaseError};
pub use kv::{CommitResult, MemoryStore, SharedStore, StoreError, Transaction};
