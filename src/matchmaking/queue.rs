//! Matchmaking queue service.
//!
//! Tickets live in the shared store next to party queue state. Parties that
//! start searching are listed under `matchmaking:searching` and get a ticket
//! at the next pass. Each pairing moves every involved party to `match_found`,
//! removes their tickets and records the pairing for the orchestrator in a
//! single transaction, so a pairing is either fully visible or not at all.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::ticket::{plan_pass, PlannedMatch, QueueTicket};
use crate::party::keys;
use crate::party::{OpponentKind, PartyCoordinator, PartyError, PartyQueueState, PartyView};
use crate::rating::types::{ArenaMode, MatchType, Operation};
use crate::storage::config::MatchmakingSettings;
use crate::storage::database::DatabaseError;
use crate::storage::kv::{get_typed, CommitResult, SharedStore, StoreError, Transaction, Typed};
use crate::storage::ProfileStore;

/// Matchmaking errors.
#[derive(Debug, Error)]
pub enum MatchmakingError {
    #[error("Party {0} not found")]
    PartyNotFound(Uuid),

    #[error("Party {0} is not searching")]
    NotSearching(Uuid),

    #[error("Party has no target mode")]
    NoTargetMode,

    #[error("Queue changed concurrently, try again")]
    Conflict,

    #[error("Party error: {0}")]
    Party(#[from] PartyError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Parties assembled into one side of a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSide {
    pub party_ids: Vec<Uuid>,
    pub player_ids: Vec<Uuid>,
    pub rating: u32,
}

/// A committed pairing, handed to the match orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPairing {
    pub match_id: Uuid,
    pub mode: ArenaMode,
    pub match_type: MatchType,
    pub operation: Option<Operation>,
    pub home: MatchSide,
    /// `None`: AI opponents
    pub away: Option<MatchSide>,
    pub created_at: DateTime<Utc>,
}

impl MatchPairing {
    pub fn is_ai_match(&self) -> bool {
        self.away.is_none()
    }

    pub fn party_ids(&self) -> Vec<Uuid> {
        self.home
            .party_ids
            .iter()
            .chain(self.away.iter().flat_map(|side| side.party_ids.iter()))
            .copied()
            .collect()
    }
}

/// Queue notifications.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    MatchFound(MatchPairing),
    Dequeued { party_id: Uuid },
}

/// Matchmaking queue over the shared store.
pub struct Matchmaker {
    store: Arc<dyn SharedStore>,
    parties: Arc<PartyCoordinator>,
    profiles: Arc<dyn ProfileStore>,
    settings: MatchmakingSettings,
    ticket_ttl: Duration,
    event_tx: broadcast::Sender<QueueEvent>,
    running: Arc<AtomicBool>,
}

impl Matchmaker {
    pub fn new(
        store: Arc<dyn SharedStore>,
        parties: Arc<PartyCoordinator>,
        profiles: Arc<dyn ProfileStore>,
        settings: MatchmakingSettings,
        ticket_ttl_secs: u32,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            parties,
            profiles,
            settings,
            ticket_ttl: Duration::seconds(ticket_ttl_secs as i64),
            event_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to queue events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    fn load_tickets(&self) -> Result<Option<Typed<Vec<QueueTicket>>>, StoreError> {
        get_typed::<Vec<QueueTicket>>(self.store.as_ref(), keys::MATCHMAKING_TICKETS)
    }

    /// Tickets currently waiting.
    pub fn tickets(&self) -> Result<Vec<QueueTicket>, MatchmakingError> {
        Ok(self.load_tickets()?.map(|t| t.value).unwrap_or_default())
    }

    fn build_ticket(&self, view: &PartyView, now: DateTime<Utc>) -> Result<QueueTicket, MatchmakingError> {
        let mode = view.party.target_mode.ok_or(MatchmakingError::NoTargetMode)?;
        let match_type = view
            .queue
            .match_type
            .ok_or(MatchmakingError::NotSearching(view.party.id))?;

        let first = view.members.first().and_then(|m| m.preferred_operation);
        let operation = match first {
            Some(op)
                if op != Operation::Mixed
                    && view.members.iter().all(|m| m.preferred_operation == Some(op)) =>
            {
                Some(op)
            }
            _ => None,
        };

        let mut total: u64 = 0;
        for member in &view.members {
            let record = self.profiles.load_record(member.user_id, mode)?;
            total += record.rating_for(operation) as u64;
        }
        let rating = if view.members.is_empty() {
            mode.base_elo()
        } else {
            (total / view.members.len() as u64) as u32
        };

        Ok(QueueTicket {
            party_id: view.party.id,
            mode,
            match_type,
            operation,
            rating,
            member_ids: view.members.iter().map(|m| m.user_id).collect(),
            enqueued_at: view.queue.started_at.unwrap_or(now),
        })
    }

    /// Register a ticket for a searching party. Enqueueing twice keeps the
    /// original ticket.
    pub fn enqueue(&self, party_id: Uuid) -> Result<QueueTicket, MatchmakingError> {
        let view = self
            .parties
            .get_party(party_id)?
            .ok_or(MatchmakingError::PartyNotFound(party_id))?;
        if !view.queue.status.is_searching() {
            return Err(MatchmakingError::NotSearching(party_id));
        }
        let ticket = self.build_ticket(&view, self.store.now())?;

        for _ in 0..crate::party::coordinator::MAX_TXN_RETRIES {
            let current = self.load_tickets()?;
            let mut tickets = current.as_ref().map(|t| t.value.clone()).unwrap_or_default();
            if let Some(existing) = tickets.iter().find(|t| t.party_id == party_id) {
                return Ok(existing.clone());
            }
            tickets.push(ticket.clone());

            let mut txn = Transaction::new();
            txn.watch(keys::MATCHMAKING_TICKETS, current.map(|t| t.version));
            txn.put_typed(keys::MATCHMAKING_TICKETS, &tickets, self.ticket_ttl)?;
            if self.store.commit(txn)? == CommitResult::Committed {
                tracing::info!(
                    "Party {} queued for {} {} at rating {}",
                    party_id,
                    ticket.mode,
                    ticket.match_type.as_str(),
                    ticket.rating
                );
                return Ok(ticket);
            }
        }
        Err(MatchmakingError::Conflict)
    }

    /// Remove a party's ticket. Removing a missing ticket succeeds.
    pub fn dequeue(&self, party_id: Uuid) -> Result<(), MatchmakingError> {
        for _ in 0..crate::party::coordinator::MAX_TXN_RETRIES {
            let current = match self.load_tickets()? {
                Some(current) => current,
                None => return Ok(()),
            };
            if !current.value.iter().any(|t| t.party_id == party_id) {
                return Ok(());
            }

            let remaining: Vec<QueueTicket> = current
                .value
                .iter()
                .filter(|t| t.party_id != party_id)
                .cloned()
                .collect();
            let mut txn = Transaction::new();
            txn.watch(keys::MATCHMAKING_TICKETS, Some(current.version));
            txn.put_typed(keys::MATCHMAKING_TICKETS, &remaining, self.ticket_ttl)?;
            if self.store.commit(txn)? == CommitResult::Committed {
                let _ = self.event_tx.send(QueueEvent::Dequeued { party_id });
                return Ok(());
            }
        }
        Err(MatchmakingError::Conflict)
    }

    /// Ticket every party that started searching since the last pass.
    pub fn admit_searching(&self) -> Result<(), MatchmakingError> {
        let searching = match get_typed::<Vec<Uuid>>(self.store.as_ref(), keys::SEARCHING_PARTIES)? {
            Some(searching) => searching,
            None => return Ok(()),
        };

        for party_id in &searching.value {
            match self.enqueue(*party_id) {
                Ok(_) => {}
                Err(
                    e @ (MatchmakingError::NotSearching(_)
                    | MatchmakingError::PartyNotFound(_)
                    | MatchmakingError::NoTargetMode),
                ) => {
                    tracing::debug!("Party {} not admitted: {}", party_id, e);
                }
                Err(e) => return Err(e),
            }
        }

        let mut txn = Transaction::new();
        txn.watch(keys::SEARCHING_PARTIES, Some(searching.version));
        txn.delete(keys::SEARCHING_PARTIES);
        // On conflict the list is read again next pass; enqueue keeps existing tickets
        self.store.commit(txn)?;
        Ok(())
    }

    fn load_pairings(&self) -> Result<Option<Typed<Vec<MatchPairing>>>, StoreError> {
        get_typed::<Vec<MatchPairing>>(self.store.as_ref(), keys::MATCHMAKING_PAIRINGS)
    }

    /// Pairings committed but not yet picked up by the orchestrator.
    pub fn pending_pairings(&self) -> Result<Vec<MatchPairing>, MatchmakingError> {
        Ok(self.load_pairings()?.map(|p| p.value).unwrap_or_default())
    }

    /// Mark a pairing as picked up. Acknowledging twice succeeds.
    pub fn acknowledge(&self, match_id: Uuid) -> Result<(), MatchmakingError> {
        for _ in 0..crate::party::coordinator::MAX_TXN_RETRIES {
            let current = match self.load_pairings()? {
                Some(current) => current,
                None => return Ok(()),
            };
            if !current.value.iter().any(|p| p.match_id == match_id) {
                return Ok(());
            }

            let remaining: Vec<MatchPairing> = current
                .value
                .iter()
                .filter(|p| p.match_id != match_id)
                .cloned()
                .collect();
            let mut txn = Transaction::new();
            txn.watch(keys::MATCHMAKING_PAIRINGS, Some(current.version));
            if remaining.is_empty() {
                txn.delete(keys::MATCHMAKING_PAIRINGS);
            } else {
                txn.put_typed(keys::MATCHMAKING_PAIRINGS, &remaining, self.ticket_ttl)?;
            }
            if self.store.commit(txn)? == CommitResult::Committed {
                return Ok(());
            }
        }
        Err(MatchmakingError::Conflict)
    }

    /// Drop tickets whose party is gone or no longer searching.
    fn prune(&self) -> Result<Vec<QueueTicket>, MatchmakingError> {
        let current = match self.load_tickets()? {
            Some(current) => current,
            None => return Ok(Vec::new()),
        };

        let mut live = Vec::with_capacity(current.value.len());
        for ticket in &current.value {
            let queue = get_typed::<PartyQueueState>(self.store.as_ref(), &keys::queue(ticket.party_id))?;
            if queue.map(|q| q.value.status.is_searching()).unwrap_or(false) {
                live.push(ticket.clone());
            } else {
                tracing::debug!("Dropping stale ticket for party {}", ticket.party_id);
            }
        }

        if live.len() != current.value.len() {
            let mut txn = Transaction::new();
            txn.watch(keys::MATCHMAKING_TICKETS, Some(current.version));
            txn.put_typed(keys::MATCHMAKING_TICKETS, &live, self.ticket_ttl)?;
            // A conflict here only means another pass got there first
            self.store.commit(txn)?;
        }
        Ok(live)
    }

    /// Commit one planned match. Returns `None` when state moved underneath.
    fn commit_pairing(
        &self,
        plan: &PlannedMatch,
        now: DateTime<Utc>,
    ) -> Result<Option<MatchPairing>, MatchmakingError> {
        let tickets = match self.load_tickets()? {
            Some(tickets) => tickets,
            None => return Ok(None),
        };
        let party_ids = plan.party_ids();
        if !party_ids
            .iter()
            .all(|id| tickets.value.iter().any(|t| t.party_id == *id))
        {
            return Ok(None);
        }

        let match_id = Uuid::new_v4();
        let opponent = if plan.away.is_some() {
            OpponentKind::Human
        } else {
            OpponentKind::Ai
        };

        let side = |team: &super::ticket::TeamCandidate| MatchSide {
            party_ids: team.tickets.iter().map(|t| t.party_id).collect(),
            player_ids: team
                .tickets
                .iter()
                .flat_map(|t| t.member_ids.iter().copied())
                .collect(),
            rating: team.rating,
        };
        let first = &plan.home.tickets[0];
        let pairing = MatchPairing {
            match_id,
            mode: first.mode,
            match_type: first.match_type,
            operation: first.operation,
            home: side(&plan.home),
            away: plan.away.as_ref().map(side),
            created_at: now,
        };

        let mut txn = Transaction::new();
        txn.watch(keys::MATCHMAKING_TICKETS, Some(tickets.version));

        for party_id in &party_ids {
            let key = keys::queue(*party_id);
            let queue = match get_typed::<PartyQueueState>(self.store.as_ref(), &key)? {
                Some(queue) if queue.value.status.is_searching() => queue,
                _ => return Ok(None),
            };
            txn.watch(key.clone(), Some(queue.version));
            txn.put_typed(key, &queue.value.matched(match_id, opponent), self.ticket_ttl)?;
        }

        let remaining: Vec<QueueTicket> = tickets
            .value
            .iter()
            .filter(|t| !party_ids.contains(&t.party_id))
            .cloned()
            .collect();
        txn.put_typed(keys::MATCHMAKING_TICKETS, &remaining, self.ticket_ttl)?;

        let pending = self.load_pairings()?;
        let mut pairings = pending.as_ref().map(|p| p.value.clone()).unwrap_or_default();
        pairings.push(pairing.clone());
        txn.watch(keys::MATCHMAKING_PAIRINGS, pending.map(|p| p.version));
        txn.put_typed(keys::MATCHMAKING_PAIRINGS, &pairings, self.ticket_ttl)?;

        if self.store.commit(txn)? == CommitResult::Conflict {
            tracing::debug!("Pairing for {:?} conflicted, retrying next pass", party_ids);
            return Ok(None);
        }
        Ok(Some(pairing))
    }

    /// Run one matchmaking pass.
    pub fn run_pass(&self, now: DateTime<Utc>) -> Result<Vec<MatchPairing>, MatchmakingError> {
        self.admit_searching()?;
        let tickets = self.prune()?;
        if tickets.is_empty() {
            return Ok(Vec::new());
        }

        let mut pairings = Vec::new();
        for plan in plan_pass(&tickets, &self.settings, now) {
            if plan.home.tickets.is_empty() {
                continue;
            }
            if let Some(pairing) = self.commit_pairing(&plan, now)? {
                tracing::info!(
                    "Match {} found: {} {} ({})",
                    pairing.match_id,
                    pairing.mode,
                    pairing.match_type.as_str(),
                    if pairing.is_ai_match() { "vs AI" } else { "vs players" }
                );
                let _ = self.event_tx.send(QueueEvent::MatchFound(pairing.clone()));
                pairings.push(pairing);
            }
        }
        Ok(pairings)
    }

    /// Run passes on an interval until stopped.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let matchmaker = Arc::clone(self);
        let period = std::time::Duration::from_millis(self.settings.pass_interval_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            while matchmaker.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                // Store and profile reads block; run the pass off the runtime workers
                let pass = Arc::clone(&matchmaker);
                match tokio::task::spawn_blocking(move || pass.run_pass(pass.store.now())).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!("Matchmaking pass failed: {}", e),
                    Err(e) => tracing::error!("Matchmaking pass panicked: {}", e),
                }
            }
            tracing::debug!("Matchmaker stopped");
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}
