//! Live match registry.
//!
//! Every match is owned by one tokio task. Commands and clock ticks reach the
//! engine through a single `select!` loop, so answers, hand-offs and ticks are
//! applied one at a time per match. Events fan out on a broadcast channel and
//! the latest snapshot is published on a watch channel.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use super::ai::AiSeat;
use super::engine::{MatchCommand, MatchEngine, MatchSetup, Outbound, PlayerSetup, TeamSetup};
use super::results::{MatchSummary, RatingService};
use super::rules::MatchRules;
use super::types::MatchState;
use super::MatchError;
use crate::matchmaking::{MatchPairing, MatchSide, Matchmaker, QueueEvent};
use crate::party::{PartyCoordinator, PartyView, QueueStatus};
use crate::rating::types::ArenaMode;
use crate::storage::arena_store::DEFAULT_SKILL_TIER;
use crate::storage::config::MatchSettings;
use crate::storage::{MasterySource, ProfileStore};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 512;

struct ActorRequest {
    command: MatchCommand,
    reply: oneshot::Sender<Result<(), MatchError>>,
}

struct MatchHandle {
    commands: mpsc::Sender<ActorRequest>,
    events: broadcast::Sender<Outbound>,
    snapshot: watch::Receiver<MatchState>,
}

/// Registry of running matches.
pub struct MatchOrchestrator {
    parties: Arc<PartyCoordinator>,
    profiles: Arc<dyn ProfileStore>,
    mastery: Arc<dyn MasterySource>,
    results: Arc<RatingService>,
    settings: MatchSettings,
    matches: RwLock<HashMap<Uuid, MatchHandle>>,
    /// User to the match they are playing
    players: RwLock<HashMap<Uuid, Uuid>>,
    finished_tx: broadcast::Sender<MatchSummary>,
}

impl MatchOrchestrator {
    pub fn new(
        parties: Arc<PartyCoordinator>,
        profiles: Arc<dyn ProfileStore>,
        mastery: Arc<dyn MasterySource>,
        results: Arc<RatingService>,
        settings: MatchSettings,
    ) -> Self {
        let (finished_tx, _) = broadcast::channel(64);
        Self {
            parties,
            profiles,
            mastery,
            results,
            settings,
            matches: RwLock::new(HashMap::new()),
            players: RwLock::new(HashMap::new()),
            finished_tx,
        }
    }

    /// Summaries of matches as they finish.
    pub fn subscribe_finished(&self) -> broadcast::Receiver<MatchSummary> {
        self.finished_tx.subscribe()
    }

    pub async fn active_matches(&self) -> usize {
        self.matches.read().await.len()
    }

    pub async fn match_for_user(&self, user_id: Uuid) -> Option<Uuid> {
        self.players.read().await.get(&user_id).copied()
    }

    /// Latest published state of a match.
    pub async fn snapshot(&self, match_id: Uuid) -> Option<MatchState> {
        self.matches
            .read()
            .await
            .get(&match_id)
            .map(|handle| handle.snapshot.borrow().clone())
    }

    /// Event stream of a match. Subscribe before joining so the snapshot
    /// sent on join is not missed.
    pub async fn subscribe(&self, match_id: Uuid) -> Result<broadcast::Receiver<Outbound>, MatchError> {
        self.matches
            .read()
            .await
            .get(&match_id)
            .map(|handle| handle.events.subscribe())
            .ok_or(MatchError::NotFound(match_id))
    }

    /// Apply a command on the match task and wait for its verdict.
    pub async fn send(&self, match_id: Uuid, command: MatchCommand) -> Result<(), MatchError> {
        let commands = self
            .matches
            .read()
            .await
            .get(&match_id)
            .map(|handle| handle.commands.clone())
            .ok_or(MatchError::NotFound(match_id))?;

        let (reply, verdict) = oneshot::channel();
        commands
            .send(ActorRequest { command, reply })
            .await
            .map_err(|_| MatchError::Closed)?;
        verdict.await.map_err(|_| MatchError::Closed)?
    }

    // ----------------------------------------------------------------------
    // Creation
    // ----------------------------------------------------------------------

    /// Start a match for a committed pairing. Creating the same match twice
    /// is a no-op.
    pub async fn create_match(self: &Arc<Self>, pairing: &MatchPairing) -> Result<Uuid, MatchError> {
        if self.matches.read().await.contains_key(&pairing.match_id) {
            return Ok(pairing.match_id);
        }

        let home = self.build_team(pairing, &pairing.home, "Home", 0)?;
        let away = match &pairing.away {
            Some(side) => self.build_team(pairing, side, "Away", pairing.mode.team_size())?,
            None => ai_only_team(pairing.mode, pairing.home.rating),
        };

        let setup = MatchSetup {
            match_id: pairing.match_id,
            mode: pairing.mode,
            match_type: pairing.match_type,
            operation: pairing.operation,
            home,
            away,
            seed: pairing.match_id.as_u64_pair().0,
        };
        let engine = MatchEngine::new(setup, MatchRules::from(&self.settings), Utc::now())?;
        let humans = engine.state().human_ids();

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.state().clone());

        {
            let mut matches = self.matches.write().await;
            if matches.contains_key(&pairing.match_id) {
                return Ok(pairing.match_id);
            }
            matches.insert(
                pairing.match_id,
                MatchHandle {
                    commands: command_tx,
                    events: event_tx.clone(),
                    snapshot: snapshot_rx,
                },
            );
        }
        {
            let mut players = self.players.write().await;
            for user_id in humans {
                players.insert(user_id, pairing.match_id);
            }
        }

        tracing::info!(
            "Match {} created: {} {}",
            pairing.match_id,
            pairing.mode,
            pairing.match_type.as_str()
        );
        tokio::spawn(Arc::clone(self).run_match(engine, command_rx, event_tx, snapshot_tx));
        Ok(pairing.match_id)
    }

    fn build_team(
        &self,
        pairing: &MatchPairing,
        side: &MatchSide,
        fallback_name: &str,
        seat_offset: usize,
    ) -> Result<TeamSetup, MatchError> {
        let views: Vec<PartyView> = side
            .party_ids
            .iter()
            .map(|id| self.parties.get_party(*id))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        let mut players = Vec::new();
        for user_id in side.player_ids.iter().take(pairing.mode.team_size()) {
            let display_name = match views.iter().find_map(|v| v.member(*user_id)) {
                Some(member) => member.display_name.clone(),
                None => self
                    .profiles
                    .display_name(*user_id)?
                    .unwrap_or_else(|| "Player".to_string()),
            };
            let skill_tier = self
                .mastery
                .skill_tier(*user_id, pairing.operation)
                .unwrap_or(DEFAULT_SKILL_TIER);
            players.push(PlayerSetup {
                user_id: *user_id,
                display_name,
                is_ai: false,
                skill_tier,
            });
        }
        fill_with_ai(&mut players, pairing.mode, side.rating, seat_offset);

        // Roles and identity come from the first party on the side
        let lead = views.first();
        let seated = |id: Option<Uuid>| id.filter(|id| players.iter().any(|p| p.user_id == *id));
        let igl_id = seated(lead.and_then(|v| v.party.igl_id.or(Some(v.party.leader_id))));
        let anchor_id = seated(lead.and_then(|v| v.party.anchor_id));

        Ok(TeamSetup {
            team_id: lead.and_then(|v| v.party.team_id),
            name: lead
                .and_then(|v| v.party.team_name.clone())
                .unwrap_or_else(|| fallback_name.to_string()),
            tag: lead.and_then(|v| v.party.team_tag.clone()),
            party_ids: side.party_ids.clone(),
            rating: side.rating,
            igl_id,
            anchor_id,
            players,
        })
    }

    // ----------------------------------------------------------------------
    // Match task
    // ----------------------------------------------------------------------

    async fn run_match(
        self: Arc<Self>,
        mut engine: MatchEngine,
        mut commands: mpsc::Receiver<ActorRequest>,
        events: broadcast::Sender<Outbound>,
        snapshot: watch::Sender<MatchState>,
    ) {
        let match_id = engine.state().match_id;
        let period = std::time::Duration::from_millis(self.settings.tick_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started = Instant::now();
        let mut consumed_ms: u64 = 0;

        loop {
            tokio::select! {
                request = commands.recv() => {
                    let Some(ActorRequest { command, reply }) = request else {
                        break;
                    };
                    let verdict = engine.handle(command, Utc::now()).map(|out| publish(&events, out));
                    let _ = reply.send(verdict);
                }
                _ = ticker.tick() => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    let step = elapsed_ms.saturating_sub(consumed_ms);
                    consumed_ms = elapsed_ms;
                    publish(&events, engine.tick(step, Utc::now()));
                }
            }

            let _ = snapshot.send(engine.state().clone());
            if engine.is_finished() {
                break;
            }
        }

        tracing::debug!("Match {} task exiting", match_id);
        self.finish_match(engine.state().clone()).await;
    }

    async fn finish_match(&self, state: MatchState) {
        let match_id = state.match_id;

        self.matches.write().await.remove(&match_id);
        self.players.write().await.retain(|_, m| *m != match_id);

        for party_id in state.party_ids() {
            if let Err(e) = self.parties.complete_match(party_id, match_id) {
                tracing::warn!("Failed to release party {} after match {}: {}", party_id, match_id, e);
            }
        }

        if state.outcome.is_none() {
            return;
        }
        let results = Arc::clone(&self.results);
        let applied = tokio::task::spawn_blocking(move || results.apply(&state, Utc::now())).await;
        match applied {
            Ok(Ok(summary)) => {
                let _ = self.finished_tx.send(summary);
            }
            Ok(Err(e)) => tracing::error!("Failed to apply results of match {}: {}", match_id, e),
            Err(e) => tracing::error!("Result task for match {} panicked: {}", match_id, e),
        }
    }

    /// Create matches for pairings announced by the matchmaker. Pairings
    /// committed before the listener started, or skipped while it lagged,
    /// are picked up from the matchmaker's pending list.
    pub fn run_queue_listener(self: &Arc<Self>, matchmaker: Arc<Matchmaker>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        let mut queue = matchmaker.subscribe();
        tokio::spawn(async move {
            orchestrator.recover_pairings(&matchmaker).await;
            loop {
                match queue.recv().await {
                    Ok(QueueEvent::MatchFound(pairing)) => orchestrator.launch(&matchmaker, &pairing).await,
                    Ok(QueueEvent::Dequeued { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Queue listener lagged, {} events skipped", skipped);
                        orchestrator.recover_pairings(&matchmaker).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Queue listener stopped");
        })
    }

    async fn recover_pairings(self: &Arc<Self>, matchmaker: &Matchmaker) {
        match matchmaker.pending_pairings() {
            Ok(pending) => {
                for pairing in pending {
                    self.launch(matchmaker, &pairing).await;
                }
            }
            Err(e) => tracing::warn!("Could not read pending pairings: {}", e),
        }
    }

    /// Start the match for a pairing, or hand its parties back when it
    /// cannot be started.
    async fn launch(self: &Arc<Self>, matchmaker: &Matchmaker, pairing: &MatchPairing) {
        if self.pairing_is_committed(pairing) {
            if let Err(e) = self.create_match(pairing).await {
                tracing::error!("Failed to create match {}: {}", pairing.match_id, e);
                self.release_parties(pairing);
            }
        } else {
            tracing::debug!("Pairing {} is no longer held by its parties", pairing.match_id);
        }

        if let Err(e) = matchmaker.acknowledge(pairing.match_id) {
            tracing::warn!("Failed to acknowledge pairing {}: {}", pairing.match_id, e);
        }
    }

    /// Every party of the pairing still waits on this match.
    fn pairing_is_committed(&self, pairing: &MatchPairing) -> bool {
        pairing.party_ids().iter().all(|party_id| {
            self.parties
                .queue_state(*party_id)
                .map(|q| q.status == QueueStatus::MatchFound && q.match_id == Some(pairing.match_id))
                .unwrap_or(false)
        })
    }

    fn release_parties(&self, pairing: &MatchPairing) {
        for party_id in pairing.party_ids() {
            if let Err(e) = self.parties.complete_match(party_id, pairing.match_id) {
                tracing::warn!(
                    "Failed to release party {} from match {}: {}",
                    party_id,
                    pairing.match_id,
                    e
                );
            }
        }
    }
}

fn publish(events: &broadcast::Sender<Outbound>, out: Vec<Outbound>) {
    for outbound in out {
        // No subscribers is fine
        let _ = events.send(outbound);
    }
}

fn ai_skill_tier(rating: u32) -> u8 {
    (rating / 20).clamp(1, 100) as u8
}

fn fill_with_ai(players: &mut Vec<PlayerSetup>, mode: ArenaMode, rating: u32, seat_offset: usize) {
    while players.len() < mode.team_size() {
        let seat = AiSeat::new(seat_offset + players.len());
        players.push(PlayerSetup {
            user_id: seat.user_id,
            display_name: seat.display_name,
            is_ai: true,
            skill_tier: ai_skill_tier(rating),
        });
    }
}

fn ai_only_team(mode: ArenaMode, rating: u32) -> TeamSetup {
    let mut players = Vec::new();
    fill_with_ai(&mut players, mode, rating, mode.team_size());
    TeamSetup {
        team_id: None,
        name: "Arena Bots".to_string(),
        tag: Some("BOT".to_string()),
        party_ids: Vec::new(),
        rating,
        igl_id: None,
        anchor_id: None,
        players,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league::LeagueService;
    use crate::matches::types::{MatchPhase, MatchResult};
    use crate::rating::types::MatchType;
    use crate::storage::config::{MatchmakingSettings, PartySettings};
    use crate::storage::kv::MemoryStore;
    use crate::storage::SqliteArenaStore;
    use crate::networking::protocol::ServerEvent;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        parties: Arc<PartyCoordinator>,
        db: Arc<SqliteArenaStore>,
        matchmaker: Arc<Matchmaker>,
        orchestrator: Arc<MatchOrchestrator>,
    }

    fn quick_settings() -> MatchSettings {
        MatchSettings {
            tick_interval_ms: 10,
            pre_match_secs: 0,
            break_secs: 0,
            halftime_secs: 0,
            anchor_decision_secs: 0,
            handoff_secs: 0,
            team_slot_secs: 1,
            solo_round_secs: 1,
            rounds_per_half: 1,
            ..MatchSettings::default()
        }
    }

    fn fixture(settings: MatchSettings) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let parties = Arc::new(PartyCoordinator::new(store.clone(), PartySettings::default()));
        let db = Arc::new(SqliteArenaStore::open_in_memory().unwrap());
        let matchmaker = Arc::new(Matchmaker::new(
            store.clone(),
            parties.clone(),
            db.clone(),
            MatchmakingSettings::default(),
            300,
        ));
        let results = Arc::new(RatingService::new(
            db.clone(),
            db.clone(),
            Arc::new(LeagueService::new(db.clone())),
            20,
        ));
        let orchestrator = Arc::new(MatchOrchestrator::new(
            parties.clone(),
            db.clone(),
            db.clone(),
            results,
            settings,
        ));
        Fixture {
            store,
            parties,
            db,
            matchmaker,
            orchestrator,
        }
    }

    fn queued(f: &Fixture, mode: ArenaMode, size: usize) -> (Uuid, Vec<Uuid>) {
        let users: Vec<Uuid> = (0..size).map(|_| Uuid::new_v4()).collect();
        for (i, user) in users.iter().enumerate() {
            f.db.register_user(*user, &format!("player {}", i)).unwrap();
        }
        let leader = users[0];
        let id = f.parties.create_party(leader, "player 0").unwrap().party.id;
        f.parties.set_target_mode(id, leader, Some(mode)).unwrap();
        for (i, user) in users.iter().enumerate().skip(1) {
            f.parties.join_party(id, *user, &format!("player {}", i)).unwrap();
        }
        for user in &users {
            f.parties.toggle_ready(id, *user).unwrap();
        }
        f.parties.start_queue(id, leader, MatchType::Ranked).unwrap();
        (id, users)
    }

    #[tokio::test]
    async fn test_pairing_creates_match_and_forfeit_releases_parties() {
        let f = fixture(MatchSettings::default());
        let mut finished = f.orchestrator.subscribe_finished();
        let (a, users_a) = queued(&f, ArenaMode::Duel, 1);
        let (b, users_b) = queued(&f, ArenaMode::Duel, 1);

        let pairing = f.matchmaker.run_pass(f.store.now()).unwrap().remove(0);
        let match_id = f.orchestrator.create_match(&pairing).await.unwrap();
        assert_eq!(f.orchestrator.create_match(&pairing).await.unwrap(), match_id);
        assert_eq!(f.orchestrator.active_matches().await, 1);
        assert_eq!(f.orchestrator.match_for_user(users_a[0]).await, Some(match_id));

        let mut events = f.orchestrator.subscribe(match_id).await.unwrap();
        f.orchestrator
            .send(match_id, MatchCommand::Join { user_id: users_a[0] })
            .await
            .unwrap();
        let first = events.recv().await.unwrap();
        assert!(first.is_for(users_a[0]));
        assert!(matches!(first.event, ServerEvent::MatchState { .. }));

        let err = f
            .orchestrator
            .send(match_id, MatchCommand::Join { user_id: Uuid::new_v4() })
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::NotParticipant(_)));

        f.orchestrator
            .send(match_id, MatchCommand::Forfeit { user_id: users_b[0] })
            .await
            .unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), finished.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.match_id, match_id);
        assert_ne!(summary.outcome.result, MatchResult::Draw);
        let loser = summary.player(users_b[0]).unwrap();
        assert_eq!(summary.outcome.forfeited_by.map(|side| side.index()), Some(loser.team_index));
        assert_eq!(f.orchestrator.active_matches().await, 0);
        assert_eq!(f.orchestrator.match_for_user(users_a[0]).await, None);

        for party in [a, b] {
            assert_eq!(f.parties.queue_state(party).unwrap().status, QueueStatus::Idle);
        }
        assert!(matches!(
            f.orchestrator.send(match_id, MatchCommand::Join { user_id: users_a[0] }).await,
            Err(MatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_ai_match_plays_out_on_the_clock() {
        let f = fixture(quick_settings());
        let mut finished = f.orchestrator.subscribe_finished();
        let (party, users) = queued(&f, ArenaMode::Duo, 2);

        let later = f.store.now() + chrono::Duration::seconds(31);
        let pairing = f.matchmaker.run_pass(later).unwrap().remove(0);
        assert!(pairing.is_ai_match());

        let match_id = f.orchestrator.create_match(&pairing).await.unwrap();
        for user_id in &users {
            f.orchestrator
                .send(match_id, MatchCommand::Join { user_id: *user_id })
                .await
                .unwrap();
        }
        let state = f.orchestrator.snapshot(match_id).await.unwrap();
        assert_eq!(state.teams[1].players.iter().filter(|p| p.is_ai).count(), 2);
        assert_eq!(state.teams[0].igl_id, Some(users[0]));

        let summary = tokio::time::timeout(Duration::from_secs(20), finished.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.players.len(), 2);
        assert_eq!(f.parties.queue_state(party).unwrap().status, QueueStatus::Idle);

        let history = f.db.match_history(match_id).unwrap().unwrap();
        assert!(history.snapshot_json.contains(MatchPhase::PostMatch.as_str()));
    }

    #[tokio::test]
    async fn test_queue_listener_creates_matches() {
        let f = fixture(MatchSettings::default());
        let listener = f.orchestrator.run_queue_listener(f.matchmaker.clone());
        let (_, users) = queued(&f, ArenaMode::Duel, 1);
        queued(&f, ArenaMode::Duel, 1);

        let pairing = f.matchmaker.run_pass(f.store.now()).unwrap().remove(0);
        assert_eq!(wait_for_match(&f, users[0]).await, Some(pairing.match_id));
        wait_for_acknowledged(&f).await;
        listener.abort();
    }

    async fn wait_for_match(f: &Fixture, user_id: Uuid) -> Option<Uuid> {
        for _ in 0..100 {
            if let Some(match_id) = f.orchestrator.match_for_user(user_id).await {
                return Some(match_id);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        None
    }

    async fn wait_for_acknowledged(f: &Fixture) {
        for _ in 0..100 {
            if f.matchmaker.pending_pairings().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pairing was never acknowledged");
    }

    #[tokio::test]
    async fn test_listener_picks_up_pairings_committed_before_it_started() {
        let f = fixture(MatchSettings::default());
        let (_, users) = queued(&f, ArenaMode::Duel, 1);
        queued(&f, ArenaMode::Duel, 1);
        let pairing = f.matchmaker.run_pass(f.store.now()).unwrap().remove(0);
        assert_eq!(f.matchmaker.pending_pairings().unwrap().len(), 1);

        let listener = f.orchestrator.run_queue_listener(f.matchmaker.clone());
        assert_eq!(wait_for_match(&f, users[0]).await, Some(pairing.match_id));
        wait_for_acknowledged(&f).await;
        listener.abort();
    }

    #[tokio::test]
    async fn test_failed_match_creation_releases_parties() {
        let f = fixture(MatchSettings::default());
        let (a, users_a) = queued(&f, ArenaMode::Duel, 1);
        let (b, _) = queued(&f, ArenaMode::Duel, 1);
        let mut pairing = f.matchmaker.run_pass(f.store.now()).unwrap().remove(0);

        // The same user on both sides cannot be seated
        pairing.home.player_ids = users_a.clone();
        if let Some(away) = pairing.away.as_mut() {
            away.player_ids = users_a.clone();
        }
        assert!(matches!(
            f.orchestrator.create_match(&pairing).await,
            Err(MatchError::InvalidSetup(_))
        ));

        f.orchestrator.launch(&f.matchmaker, &pairing).await;
        assert_eq!(f.orchestrator.active_matches().await, 0);
        assert!(f.matchmaker.pending_pairings().unwrap().is_empty());
        for party in [a, b] {
            assert_eq!(f.parties.queue_state(party).unwrap().status, QueueStatus::Idle);
        }

        // Released parties can queue again
        for party in [a, b] {
            let view = f.parties.get_party(party).unwrap().unwrap();
            let leader = view.party.leader_id;
            f.parties.toggle_ready(party, leader).unwrap();
            f.parties.start_queue(party, leader, MatchType::Ranked).unwrap();
        }
        assert_eq!(f.matchmaker.run_pass(f.store.now()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_pairing_is_not_started() {
        let f = fixture(MatchSettings::default());
        let (a, users) = queued(&f, ArenaMode::Duel, 1);
        queued(&f, ArenaMode::Duel, 1);
        let pairing = f.matchmaker.run_pass(f.store.now()).unwrap().remove(0);
        f.parties.complete_match(a, pairing.match_id).unwrap();

        f.orchestrator.launch(&f.matchmaker, &pairing).await;
        assert_eq!(f.orchestrator.match_for_user(users[0]).await, None);
        assert!(f.matchmaker.pending_pairings().unwrap().is_empty());
    }

    #[test]
    fn test_ai_fill_keeps_humans_first() {
        let mut players = vec![PlayerSetup {
            user_id: Uuid::new_v4(),
            display_name: "human".into(),
            is_ai: false,
            skill_tier: 10,
        }];
        fill_with_ai(&mut players, ArenaMode::Trio, 800, 0);
        assert_eq!(players.len(), 3);
        assert!(!players[0].is_ai);
        assert!(players[1].is_ai && players[2].is_ai);
        assert_eq!(players[1].skill_tier, 40);
    }
}
