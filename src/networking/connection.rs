//! Per-connection context.
//!
//! Each socket gets a [`Connection`] that remembers who authenticated on it
//! and which match it is following. Handlers receive the context instead of
//! looking a socket up globally.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::protocol::{parse_slot_assignments, ClientMessage, ServerEvent, MAX_MESSAGE_SIZE};
use crate::matches::{MatchCommand, MatchError, MatchOrchestrator, Outbound};
use crate::party::{LeaderPresence, PartyCoordinator, PartyError};
use crate::storage::Authenticator;

/// Connection errors, reported to the client as `error` events.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Message user does not match the authenticated user")]
    UserMismatch,

    #[error("Message too large ({0} bytes)")]
    MessageTooLarge(usize),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("{0}")]
    Match(#[from] MatchError),

    #[error("{0}")]
    Party(#[from] PartyError),
}

/// Services a connection talks to.
#[derive(Clone)]
pub struct ConnectionServices {
    pub auth: Arc<dyn Authenticator>,
    pub parties: Arc<PartyCoordinator>,
    pub orchestrator: Arc<MatchOrchestrator>,
}

struct FollowedMatch {
    match_id: Uuid,
    forwarder: JoinHandle<()>,
}

/// State of one client connection.
pub struct Connection {
    id: Uuid,
    services: ConnectionServices,
    outbound: mpsc::Sender<ServerEvent>,
    user_id: Option<Uuid>,
    followed: Option<FollowedMatch>,
}

impl Connection {
    pub fn new(services: ConnectionServices, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            services,
            outbound,
            user_id: None,
            followed: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }

    pub fn match_id(&self) -> Option<Uuid> {
        self.followed.as_ref().map(|f| f.match_id)
    }

    /// Handle one text frame. Failures are answered with an `error` event.
    pub async fn handle_text(&mut self, text: &str) {
        let result = match parse_message(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::debug!("Connection {}: {}", self.id, e);
            self.send(ServerEvent::error(e.to_string())).await;
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) -> Result<(), ConnectionError> {
        if let ClientMessage::Authenticate { token } = &message {
            return self.authenticate(token).await;
        }
        let user_id = self.user_id.ok_or(ConnectionError::NotAuthenticated)?;

        if let Some((_, claimed)) = message.match_target() {
            if claimed != user_id {
                return Err(ConnectionError::UserMismatch);
            }
        }

        match message {
            ClientMessage::Authenticate { .. } => Ok(()),
            ClientMessage::PartyStatus => {
                let party = self.services.parties.get_user_party(user_id)?;
                self.send(ServerEvent::PartyStatus {
                    party: party.map(Box::new),
                })
                .await;
                Ok(())
            }
            ClientMessage::JoinTeamMatch { match_id, .. } => self.join_match(match_id, user_id).await,
            ClientMessage::SubmitAnswer { match_id, answer, .. } => {
                self.command(match_id, MatchCommand::SubmitAnswer { user_id, answer }).await
            }
            ClientMessage::TypingUpdate {
                match_id,
                current_input,
                ..
            } => {
                self.command(
                    match_id,
                    MatchCommand::Typing {
                        user_id,
                        input: current_input,
                    },
                )
                .await
            }
            ClientMessage::IglTimeout { match_id, .. } => {
                self.command(match_id, MatchCommand::IglTimeout { user_id }).await
            }
            ClientMessage::IglSwapSlots {
                match_id,
                new_assignments,
                ..
            } => {
                let assignments =
                    parse_slot_assignments(&new_assignments).map_err(ConnectionError::InvalidMessage)?;
                self.command(match_id, MatchCommand::IglSwap { user_id, assignments })
                    .await
            }
            ClientMessage::AnchorDoubleCallin {
                match_id, target_slot, ..
            } => {
                self.command(match_id, MatchCommand::AnchorCallIn { user_id, target_slot })
                    .await
            }
            ClientMessage::ForfeitMatch { match_id, .. } => {
                self.command(match_id, MatchCommand::Forfeit { user_id }).await
            }
        }
    }

    async fn authenticate(&mut self, token: &str) -> Result<(), ConnectionError> {
        let user_id = self
            .services
            .auth
            .authenticate(token)
            .ok_or(ConnectionError::InvalidToken)?;

        if let Some(previous) = self.user_id.filter(|id| *id != user_id) {
            self.release(previous).await;
        }
        self.user_id = Some(user_id);
        if let Err(e) = self.services.parties.validate_user_party_state(user_id) {
            tracing::warn!("Party pointer check for {} failed: {}", user_id, e);
        }
        self.set_online(user_id, true);

        tracing::info!("Connection {} authenticated as {}", self.id, user_id);
        self.send(ServerEvent::Authenticated {
            user_id,
            protocol_version: super::protocol::PROTOCOL_VERSION,
        })
        .await;
        Ok(())
    }

    async fn join_match(&mut self, match_id: Uuid, user_id: Uuid) -> Result<(), ConnectionError> {
        // Subscribe before joining so the snapshot reply is not missed
        let events = self.services.orchestrator.subscribe(match_id).await?;
        self.unfollow();
        let forwarder = spawn_forwarder(
            Arc::clone(&self.services.orchestrator),
            match_id,
            user_id,
            events,
            self.outbound.clone(),
        );
        self.followed = Some(FollowedMatch { match_id, forwarder });

        let joined = self
            .services
            .orchestrator
            .send(match_id, MatchCommand::Join { user_id })
            .await;
        if joined.is_err() {
            self.unfollow();
        }
        Ok(joined?)
    }

    async fn command(&mut self, match_id: Uuid, command: MatchCommand) -> Result<(), ConnectionError> {
        Ok(self.services.orchestrator.send(match_id, command).await?)
    }

    /// Tear down after the socket closed.
    pub async fn close(&mut self) {
        if let Some(user_id) = self.user_id.take() {
            self.release(user_id).await;
        }
        tracing::info!("Connection {} closed", self.id);
    }

    async fn release(&mut self, user_id: Uuid) {
        if let Some(followed) = self.followed.take() {
            followed.forwarder.abort();
            let disconnect = self
                .services
                .orchestrator
                .send(followed.match_id, MatchCommand::Disconnect { user_id })
                .await;
            if let Err(e) = disconnect {
                tracing::debug!("Disconnect of {} not delivered: {}", user_id, e);
            }
        }
        self.set_online(user_id, false);
    }

    fn unfollow(&mut self) {
        if let Some(followed) = self.followed.take() {
            followed.forwarder.abort();
        }
    }

    fn set_online(&self, user_id: Uuid, online: bool) {
        let parties = &self.services.parties;
        let result = parties.get_user_party(user_id).and_then(|party| match party {
            Some(view) => parties.set_member_online(view.party.id, user_id, online).map(Some),
            None => Ok(None),
        });
        match result {
            Ok(Some(view)) if !online && view.party.leader_id == user_id => {
                spawn_leader_check(Arc::clone(parties), view.party.id);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Failed to update presence of {}: {}", user_id, e),
        }
    }

    async fn send(&self, event: ServerEvent) {
        if self.outbound.send(event).await.is_err() {
            tracing::debug!("Connection {} outbound queue closed", self.id);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.unfollow();
    }
}

fn parse_message(text: &str) -> Result<ClientMessage, ConnectionError> {
    if text.len() > MAX_MESSAGE_SIZE {
        return Err(ConnectionError::MessageTooLarge(text.len()));
    }
    serde_json::from_str(text).map_err(|e| ConnectionError::InvalidMessage(e.to_string()))
}

/// Re-check a party once its offline leader's grace period has passed.
fn spawn_leader_check(parties: Arc<PartyCoordinator>, party_id: Uuid) {
    let grace = parties
        .leader_timeout()
        .to_std()
        .unwrap_or_default()
        + std::time::Duration::from_secs(1);
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        match parties.enforce_leader_presence(party_id) {
            Ok(LeaderPresence::Present) | Ok(LeaderPresence::Gone) => {}
            Ok(outcome) => tracing::info!("Party {} leader check: {:?}", party_id, outcome),
            Err(e) => tracing::warn!("Leader check for party {} failed: {}", party_id, e),
        }
    });
}

/// Relay a match's events addressed to `user_id` into the connection queue.
fn spawn_forwarder(
    orchestrator: Arc<MatchOrchestrator>,
    match_id: Uuid,
    user_id: Uuid,
    mut events: broadcast::Receiver<Outbound>,
    outbound: mpsc::Sender<ServerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(out) if out.is_for(user_id) => out.event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("{} fell {} events behind in match {}", user_id, skipped, match_id);
                    match orchestrator.snapshot(match_id).await {
                        Some(state) => ServerEvent::MatchState { state: Box::new(state) },
                        None => break,
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if outbound.send(event).await.is_err() {
                break;
            }
        }
    })
}
