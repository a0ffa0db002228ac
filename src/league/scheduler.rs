//! League membership, XP awards and the weekly cycle trigger.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::engine::{self, CycleOutcome, StandingEntry};
use super::tiers::WeeklyTier;
use crate::storage::database::{DatabaseError, LeagueParticipantRow};
use crate::storage::LeagueStore;

/// League errors.
#[derive(Debug, Error)]
pub enum LeagueError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("User {0} is not in a league")]
    NotParticipant(Uuid),
}

/// Weekly league operations over a `LeagueStore`.
pub struct LeagueService {
    store: Arc<dyn LeagueStore>,
}

impl LeagueService {
    pub fn new(store: Arc<dyn LeagueStore>) -> Self {
        Self { store }
    }

    /// Membership row for the current week, created in the lowest tier.
    pub fn join(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<LeagueParticipantRow, LeagueError> {
        if let Some(row) = self.store.participant(user_id)? {
            return Ok(row);
        }

        let row = LeagueParticipantRow {
            user_id,
            tier: WeeklyTier::Neon,
            weekly_xp: 0,
            week_start: engine::week_start_for(now),
            joined_at: now,
        };
        self.store.upsert_participant(&row)?;
        tracing::info!("User {} joined the {} league", user_id, row.tier.as_str());
        Ok(row)
    }

    /// Award session XP scaled by the week multiplier. Returns the XP added.
    pub fn award_xp(&self, user_id: Uuid, base_xp: u32, now: DateTime<Utc>) -> Result<u32, LeagueError> {
        let current_week = engine::week_start_for(now);
        let mut row = self.join(user_id, now)?;

        if row.week_start < current_week {
            self.sync(now)?;
            row = self
                .store
                .participant(user_id)?
                .ok_or(LeagueError::NotParticipant(user_id))?;
        }

        let awarded = engine::scaled_xp(base_xp, now);
        row.weekly_xp = row.weekly_xp.saturating_add(awarded);
        self.store.upsert_participant(&row)?;

        tracing::debug!("Awarded {} league XP to {}", awarded, user_id);
        Ok(awarded)
    }

    /// Process every finished week that still has members. Returns the
    /// outcomes processed by this call.
    pub fn sync(&self, now: DateTime<Utc>) -> Result<Vec<CycleOutcome>, LeagueError> {
        let current_week = engine::week_start_for(now);
        let mut processed = Vec::new();

        loop {
            let rows = self.store.participants()?;
            let oldest = match rows
                .iter()
                .map(|r| r.week_start)
                .filter(|week| *week < current_week)
                .min()
            {
                Some(week) => week,
                None => break,
            };

            let week_rows: Vec<LeagueParticipantRow> =
                rows.into_iter().filter(|r| r.week_start == oldest).collect();

            // Idle weeks in between are skipped, members land in the current week
            let next_week = engine::next_week(oldest).max(current_week);

            if self.store.is_cycle_processed(oldest)? {
                // Rows left behind by a cycle another node already processed
                for row in &week_rows {
                    let mut rolled = row.clone();
                    rolled.week_start = next_week;
                    rolled.weekly_xp = 0;
                    self.store.upsert_participant(&rolled)?;
                }
                continue;
            }

            let outcome = engine::process_cycle(oldest, &week_rows);
            let next_rows = outcome.next_rows(&week_rows, next_week);
            let history = outcome.history_rows();

            match self.store.commit_cycle(oldest, &next_rows, &history) {
                Ok(()) => {
                    tracing::info!(
                        "Processed league week {}: {} promoted, {} demoted",
                        oldest.format("%Y-%m-%d"),
                        outcome.promoted().count(),
                        outcome.demoted().count()
                    );
                    processed.push(outcome);
                }
                Err(DatabaseError::ConstraintViolation(reason)) => {
                    tracing::debug!("League week already processed: {}", reason);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(processed)
    }

    /// Current standings of a tier, padded with ghosts.
    pub fn standings(
        &self,
        tier: WeeklyTier,
        names: &dyn Fn(Uuid) -> String,
        now: DateTime<Utc>,
    ) -> Result<Vec<StandingEntry>, LeagueError> {
        let current_week = engine::week_start_for(now);
        let rows: Vec<LeagueParticipantRow> = self
            .store
            .participants()?
            .into_iter()
            .filter(|r| r.week_start == current_week)
            .collect();
        Ok(engine::standings(tier, &rows, names, now))
    }
}

/// Periodically runs `LeagueService::sync`.
pub struct LeagueScheduler {
    service: Arc<LeagueService>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl LeagueScheduler {
    pub fn new(service: Arc<LeagueService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the background check loop.
    pub fn start(&self) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        let service = Arc::clone(&self.service);
        let running = Arc::clone(&self.running);
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                // rusqlite calls block; keep them off the runtime workers
                let sync = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || sync.sync(Utc::now())).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!("League sync failed: {}", e),
                    Err(e) => tracing::error!("League sync task panicked: {}", e),
                }
            }
            tracing::debug!("League scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
