//! Application wiring.
//!
//! Builds every service from an [`AppConfig`], starts the background loops
//! and stops them again on shutdown.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::league::{LeagueScheduler, LeagueService};
use crate::matches::{MatchOrchestrator, RatingService};
use crate::matchmaking::Matchmaker;
use crate::networking::{ArenaServer, ConnectionServices};
use crate::party::PartyCoordinator;
use crate::storage::{AppConfig, DatabaseError, MemoryStore, SharedStore, SqliteArenaStore};

/// Startup errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The arena server with all of its services.
pub struct ArenaApp {
    config: AppConfig,
    db: Arc<SqliteArenaStore>,
    parties: Arc<PartyCoordinator>,
    matchmaker: Arc<Matchmaker>,
    league: Arc<LeagueService>,
    scheduler: LeagueScheduler,
    orchestrator: Arc<MatchOrchestrator>,
    server: Arc<ArenaServer>,
}

impl ArenaApp {
    /// Open the database in the data directory and use an in-process
    /// shared store.
    pub fn new(config: AppConfig) -> Result<Self, AppError> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db = Arc::new(SqliteArenaStore::open(&config.database_path())?);
        Ok(Self::with_stores(config, Arc::new(MemoryStore::new()), db))
    }

    /// Wire services over the given stores.
    pub fn with_stores(config: AppConfig, store: Arc<dyn SharedStore>, db: Arc<SqliteArenaStore>) -> Self {
        let parties = Arc::new(PartyCoordinator::new(Arc::clone(&store), config.party.clone()));
        let matchmaker = Arc::new(Matchmaker::new(
            store,
            parties.clone(),
            db.clone(),
            config.matchmaking.clone(),
            config.party.queue_ttl_secs,
        ));
        let league = Arc::new(LeagueService::new(db.clone()));
        let scheduler = LeagueScheduler::new(
            league.clone(),
            Duration::from_secs(config.league.check_interval_secs.max(1)),
        );
        let ratings = Arc::new(RatingService::new(
            db.clone(),
            db.clone(),
            league.clone(),
            config.league.match_base_xp,
        ));
        let orchestrator = Arc::new(MatchOrchestrator::new(
            parties.clone(),
            db.clone(),
            db.clone(),
            ratings,
            config.matches.clone(),
        ));
        let server = Arc::new(ArenaServer::new(
            config.server.clone(),
            ConnectionServices {
                auth: db.clone(),
                parties: parties.clone(),
                orchestrator: orchestrator.clone(),
            },
        ));

        Self {
            config,
            db,
            parties,
            matchmaker,
            league,
            scheduler,
            orchestrator,
            server,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<SqliteArenaStore> {
        &self.db
    }

    pub fn parties(&self) -> &Arc<PartyCoordinator> {
        &self.parties
    }

    pub fn matchmaker(&self) -> &Arc<Matchmaker> {
        &self.matchmaker
    }

    pub fn league(&self) -> &Arc<LeagueService> {
        &self.league
    }

    pub fn orchestrator(&self) -> &Arc<MatchOrchestrator> {
        &self.orchestrator
    }

    /// Start the queue listener, matchmaker, league scheduler and the
    /// WebSocket server.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>, AppError> {
        let listener = self.server.bind().await?;
        let handles = vec![
            self.orchestrator.run_queue_listener(self.matchmaker.clone()),
            self.matchmaker.start(),
            self.scheduler.start(),
            self.server.start(listener),
        ];
        tracing::info!("MathArena v{} started", self.config.version);
        Ok(handles)
    }

    /// Stop the background loops.
    pub fn shutdown(&self, handles: Vec<JoinHandle<()>>) {
        self.server.stop();
        self.matchmaker.stop();
        self.scheduler.stop();
        for handle in handles {
            handle.abort();
        }
        tracing::info!("MathArena stopped");
    }

    /// Run until ctrl-c.
    pub async fn run(&self) -> Result<(), AppError> {
        let handles = self.start().await?;
        tokio::signal::ctrl_c().await?;
        self.shutdown(handles);
        Ok(())
    }
}
