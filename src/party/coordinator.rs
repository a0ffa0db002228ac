//! Party coordinator.
//!
//! All party state lives in the shared store under the keys in
//! [`super::keys`]. Every mutation reads the records it depends on with their
//! versions, builds a transaction watching those versions, and retries on
//! conflict. A losing writer therefore re-validates against fresh state and
//! either succeeds or gets a validation error; it never leaves partial state.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::keys;
use super::types::{
    InviteMode, OpponentKind, PartyInvite, PartyMember, PartyQueueState, PartyState, PartyView,
    QueueStatus,
};
use crate::rating::types::{ArenaMode, MatchType, Operation};
use crate::storage::config::PartySettings;
use crate::storage::kv::{get_typed, CommitResult, SharedStore, StoreError, Transaction, Typed};

/// Attempts per mutation before giving up on contention.
pub const MAX_TXN_RETRIES: usize = 5;

/// Longest team tag.
pub const MAX_TEAM_TAG_LEN: usize = 5;

/// Longest team name.
pub const MAX_TEAM_NAME_LEN: usize = 32;

/// Party errors.
#[derive(Debug, Error)]
pub enum PartyError {
    #[error("Party {0} not found")]
    NotFound(Uuid),

    #[error("User is not a member of this party")]
    NotMember,

    #[error("Only the party leader can do that")]
    NotLeader,

    #[error("Party is full ({0} members)")]
    PartyFull(usize),

    #[error("Party has more members than {0} allows")]
    TooManyMembers(ArenaMode),

    #[error("User is already in party {0}")]
    AlreadyInParty(Uuid),

    #[error("User is already a member of this party")]
    AlreadyMember,

    #[error("Party is invite only")]
    InviteOnly,

    #[error("Invite not found")]
    InviteNotFound,

    #[error("Invite has expired")]
    InviteExpired,

    #[error("Invalid role assignment: {0}")]
    InvalidRole(String),

    #[error("Invalid team identity: {0}")]
    InvalidTeamIdentity(String),

    #[error("Not every member is ready")]
    NotReady,

    #[error("Party has no target mode")]
    NoTargetMode,

    #[error("Party is in the matchmaking queue")]
    InQueue,

    #[error("Party is not searching for a match")]
    NotSearching,

    #[error("A match has already been found")]
    MatchAlreadyFound,

    #[error("Party state changed concurrently, try again")]
    Conflict,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a leader presence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderPresence {
    Present,
    Transferred { from: Uuid, to: Uuid },
    Disbanded,
    Gone,
}

/// Outcome of validating a user's party pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartyRepair {
    /// Pointer and membership agree
    Consistent(Option<Uuid>),
    /// Pointer referenced a party the user is not in; it was removed
    ClearedStalePointer(Uuid),
}

enum Step<T> {
    Write(Transaction, T),
    Skip(T),
}

struct Snapshot {
    party: Typed<PartyState>,
    members: Typed<Vec<PartyMember>>,
    queue: Option<Typed<PartyQueueState>>,
}

impl Snapshot {
    fn id(&self) -> Uuid {
        self.party.value.id
    }

    fn view(&self) -> PartyView {
        PartyView {
            party: self.party.value.clone(),
            members: self.members.value.clone(),
            queue: self
                .queue
                .as_ref()
                .map(|q| q.value.clone())
                .unwrap_or_default(),
        }
    }

    fn watch(&self, txn: &mut Transaction) {
        let id = self.id();
        txn.watch(keys::party(id), Some(self.party.version));
        txn.watch(keys::members(id), Some(self.members.version));
        txn.watch(keys::queue(id), self.queue.as_ref().map(|q| q.version));
    }

    fn is_member(&self, user_id: Uuid) -> bool {
        self.members.value.iter().any(|m| m.user_id == user_id)
    }

    fn require_member(&self, user_id: Uuid) -> Result<(), PartyError> {
        if self.is_member(user_id) {
            Ok(())
        } else {
            Err(PartyError::NotMember)
        }
    }

    fn require_leader(&self, user_id: Uuid) -> Result<(), PartyError> {
        self.require_member(user_id)?;
        if self.party.value.leader_id == user_id {
            Ok(())
        } else {
            Err(PartyError::NotLeader)
        }
    }
}

/// Earliest-joined member, preferring members who are online.
fn successor(members: &[PartyMember], excluding: Uuid) -> Option<Uuid> {
    let candidates = members.iter().filter(|m| m.user_id != excluding);
    let online = candidates
        .clone()
        .filter(|m| m.is_online)
        .min_by_key(|m| m.joined_at);
    online
        .or_else(|| candidates.min_by_key(|m| m.joined_at))
        .map(|m| m.user_id)
}

/// Pending invite located through the invitee's index.
struct FoundInvite {
    invite: PartyInvite,
    list: Typed<Vec<PartyInvite>>,
    index: Typed<Vec<Uuid>>,
}

/// Coordinates party state in the shared store.
pub struct PartyCoordinator {
    store: Arc<dyn SharedStore>,
    settings: PartySettings,
}

impl PartyCoordinator {
    pub fn new(store: Arc<dyn SharedStore>, settings: PartySettings) -> Self {
        Self { store, settings }
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.store
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.store.now()
    }

    fn party_ttl(&self) -> Duration {
        Duration::seconds(self.settings.party_ttl_secs as i64)
    }

    fn invite_ttl(&self) -> Duration {
        Duration::seconds(self.settings.invite_ttl_secs as i64)
    }

    fn queue_ttl(&self) -> Duration {
        Duration::seconds(self.settings.queue_ttl_secs as i64)
    }

    /// Grace period an offline leader keeps the party.
    pub fn leader_timeout(&self) -> Duration {
        Duration::seconds(self.settings.leader_disconnect_timeout_secs as i64)
    }

    fn transact<T>(
        &self,
        op: &str,
        mut attempt: impl FnMut(DateTime<Utc>) -> Result<Step<T>, PartyError>,
    ) -> Result<T, PartyError> {
        for attempt_no in 1..=MAX_TXN_RETRIES {
            let now = self.store.now();
            match attempt(now)? {
                Step::Skip(value) => return Ok(value),
                Step::Write(txn, value) => match self.store.commit(txn)? {
                    CommitResult::Committed => return Ok(value),
                    CommitResult::Conflict => {
                        tracing::debug!("{} conflicted on attempt {}, retrying", op, attempt_no);
                    }
                },
            }
        }

        tracing::warn!("{} gave up after {} attempts", op, MAX_TXN_RETRIES);
        Err(PartyError::Conflict)
    }

    fn load(&self, party_id: Uuid) -> Result<Snapshot, PartyError> {
        let store = self.store.as_ref();
        let party = get_typed::<PartyState>(store, &keys::party(party_id))?
            .ok_or(PartyError::NotFound(party_id))?;
        let members = get_typed::<Vec<PartyMember>>(store, &keys::members(party_id))?
            .ok_or(PartyError::NotFound(party_id))?;
        let queue = get_typed::<PartyQueueState>(store, &keys::queue(party_id))?;

        Ok(Snapshot {
            party,
            members,
            queue,
        })
    }

    fn load_optional(&self, party_id: Uuid) -> Result<Option<Snapshot>, PartyError> {
        match self.load(party_id) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(PartyError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Version of the user's pointer and the live party it references.
    fn current_membership(&self, user_id: Uuid) -> Result<(Option<u64>, Option<Uuid>), PartyError> {
        let store = self.store.as_ref();
        let pointer = match get_typed::<Uuid>(store, &keys::user_party(user_id))? {
            Some(pointer) => pointer,
            None => return Ok((None, None)),
        };

        let live = get_typed::<Vec<PartyMember>>(store, &keys::members(pointer.value))?
            .map(|members| members.value.iter().any(|m| m.user_id == user_id))
            .unwrap_or(false);

        Ok((Some(pointer.version), live.then_some(pointer.value)))
    }

    /// Write a party view back, refreshing every related TTL.
    fn stage(&self, txn: &mut Transaction, view: &PartyView) -> Result<(), PartyError> {
        let id = view.party.id;
        let ttl = self.party_ttl();
        txn.put_typed(keys::party(id), &view.party, ttl)?;
        txn.put_typed(keys::members(id), &view.members, ttl)?;
        txn.put_typed(keys::queue(id), &view.queue, self.queue_ttl())?;
        for member in &view.members {
            txn.expire(keys::user_party(member.user_id), ttl);
        }
        Ok(())
    }

    /// Delete every record of a party and the pointers that reference it.
    fn stage_teardown(
        &self,
        txn: &mut Transaction,
        party_id: Uuid,
        members: &[PartyMember],
    ) -> Result<(), PartyError> {
        txn.delete(keys::party(party_id));
        txn.delete(keys::members(party_id));
        txn.delete(keys::queue(party_id));
        txn.delete(keys::invites(party_id));

        for member in members {
            self.stage_pointer_removal(txn, member.user_id, party_id)?;
        }
        Ok(())
    }

    /// Remove a user's party pointer if it still references `party_id`.
    fn stage_pointer_removal(
        &self,
        txn: &mut Transaction,
        user_id: Uuid,
        party_id: Uuid,
    ) -> Result<(), PartyError> {
        let key = keys::user_party(user_id);
        if let Some(pointer) = get_typed::<Uuid>(self.store.as_ref(), &key)? {
            if pointer.value == party_id {
                txn.watch(key.clone(), Some(pointer.version));
                txn.delete(key);
            }
        }
        Ok(())
    }

    /// Add a member after capacity, queue and single-party checks.
    fn stage_join(
        &self,
        snapshot: &Snapshot,
        user_id: Uuid,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(Transaction, PartyView), PartyError> {
        let (pointer_version, current) = self.current_membership(user_id)?;
        if let Some(other) = current {
            return Err(PartyError::AlreadyInParty(other));
        }

        let mut view = snapshot.view();
        if view.queue.status != QueueStatus::Idle {
            return Err(PartyError::InQueue);
        }
        if view.is_full() {
            return Err(PartyError::PartyFull(view.party.max_size));
        }

        view.members.push(PartyMember::new(user_id, display_name, now));
        view.party.updated_at = now;

        let mut txn = Transaction::new();
        snapshot.watch(&mut txn);
        txn.watch(keys::user_party(user_id), pointer_version);
        self.stage(&mut txn, &view)?;
        txn.put_typed(keys::user_party(user_id), &view.party.id, self.party_ttl())?;

        Ok((txn, view))
    }

    /// Remove a member, moving leadership or tearing down when needed.
    fn stage_removal(
        &self,
        snapshot: &Snapshot,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Step<Option<PartyView>>, PartyError> {
        let party_id = snapshot.id();
        let mut view = snapshot.view();
        view.members.retain(|m| m.user_id != user_id);

        let mut txn = Transaction::new();
        snapshot.watch(&mut txn);
        self.stage_pointer_removal(&mut txn, user_id, party_id)?;

        if view.members.is_empty() {
            self.stage_teardown(&mut txn, party_id, &[])?;
            tracing::info!("Party {} disbanded: last member left", party_id);
            return Ok(Step::Write(txn, None));
        }

        view.party.clear_roles_of(user_id);
        if view.party.leader_id == user_id {
            if let Some(next) = successor(&view.members, user_id) {
                tracing::info!("Party {} leadership moved to {}", party_id, next);
                view.party.leader_id = next;
            }
        }
        if view.queue.status.is_searching() {
            view.queue = PartyQueueState::idle();
        }
        view.party.updated_at = now;

        self.stage(&mut txn, &view)?;
        Ok(Step::Write(txn, Some(view)))
    }

    /// Apply an edit to a loaded party and write it back.
    fn edit(
        &self,
        op: &str,
        party_id: Uuid,
        mut apply: impl FnMut(&Snapshot, &mut PartyView) -> Result<(), PartyError>,
    ) -> Result<PartyView, PartyError> {
        self.transact(op, |now| {
            let snapshot = self.load(party_id)?;
            let mut view = snapshot.view();
            apply(&snapshot, &mut view)?;
            view.party.updated_at = now;

            let mut txn = Transaction::new();
            snapshot.watch(&mut txn);
            self.stage(&mut txn, &view)?;
            Ok(Step::Write(txn, view))
        })
    }

    fn find_invite(&self, user_id: Uuid, invite_id: Uuid) -> Result<Option<FoundInvite>, PartyError> {
        let store = self.store.as_ref();
        let index = match get_typed::<Vec<Uuid>>(store, &keys::user_invites(user_id))? {
            Some(index) => index,
            None => return Ok(None),
        };

        for party_id in &index.value {
            if let Some(list) = get_typed::<Vec<PartyInvite>>(store, &keys::invites(*party_id))? {
                if let Some(invite) = list
                    .value
                    .iter()
                    .find(|i| i.invite_id == invite_id && i.invitee_id == user_id)
                    .cloned()
                {
                    return Ok(Some(FoundInvite {
                        invite,
                        list,
                        index,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Remove an invite from its party list and the invitee index.
    fn stage_invite_removal(&self, txn: &mut Transaction, found: &FoundInvite) -> Result<(), PartyError> {
        let party_id = found.invite.party_id;
        let invites_key = keys::invites(party_id);
        let index_key = keys::user_invites(found.invite.invitee_id);

        let remaining: Vec<PartyInvite> = found
            .list
            .value
            .iter()
            .filter(|i| i.invite_id != found.invite.invite_id)
            .cloned()
            .collect();
        let parties: Vec<Uuid> = found
            .index
            .value
            .iter()
            .copied()
            .filter(|id| *id != party_id)
            .collect();

        txn.watch(invites_key.clone(), Some(found.list.version));
        txn.watch(index_key.clone(), Some(found.index.version));

        if remaining.is_empty() {
            txn.delete(invites_key);
        } else {
            txn.put_typed(invites_key, &remaining, self.invite_ttl())?;
        }
        if parties.is_empty() {
            txn.delete(index_key);
        } else {
            txn.put_typed(index_key, &parties, self.invite_ttl())?;
        }
        Ok(())
    }

    /// Announce a searching party to the matchmaker.
    fn stage_search_entry(&self, txn: &mut Transaction, party_id: Uuid) -> Result<(), PartyError> {
        let current = get_typed::<Vec<Uuid>>(self.store.as_ref(), keys::SEARCHING_PARTIES)?;
        let mut searching = current.as_ref().map(|c| c.value.clone()).unwrap_or_default();
        txn.watch(keys::SEARCHING_PARTIES, current.map(|c| c.version));
        if !searching.contains(&party_id) {
            searching.push(party_id);
        }
        txn.put_typed(keys::SEARCHING_PARTIES, &searching, self.queue_ttl())?;
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Lifecycle
    // ----------------------------------------------------------------------

    /// Create a party led by `leader_id`.
    pub fn create_party(&self, leader_id: Uuid, display_name: &str) -> Result<PartyView, PartyError> {
        let view = self.transact("create_party", |now| {
            let (pointer_version, current) = self.current_membership(leader_id)?;
            if let Some(other) = current {
                return Err(PartyError::AlreadyInParty(other));
            }

            let view = PartyView {
                party: PartyState::new(leader_id, now),
                members: vec![PartyMember::new(leader_id, display_name, now)],
                queue: PartyQueueState::idle(),
            };

            let mut txn = Transaction::new();
            txn.watch(keys::user_party(leader_id), pointer_version);
            txn.watch(keys::party(view.party.id), None);
            self.stage(&mut txn, &view)?;
            txn.put_typed(keys::user_party(leader_id), &view.party.id, self.party_ttl())?;
            Ok(Step::Write(txn, view))
        })?;

        tracing::info!("Party {} created by {}", view.party.id, leader_id);
        Ok(view)
    }

    /// Join an open party.
    pub fn join_party(
        &self,
        party_id: Uuid,
        user_id: Uuid,
        display_name: &str,
    ) -> Result<PartyView, PartyError> {
        self.transact("join_party", |now| {
            let snapshot = self.load(party_id)?;
            if snapshot.is_member(user_id) {
                return Ok(Step::Skip(snapshot.view()));
            }
            if snapshot.party.value.invite_mode == InviteMode::InviteOnly {
                return Err(PartyError::InviteOnly);
            }

            let (txn, view) = self.stage_join(&snapshot, user_id, display_name, now)?;
            Ok(Step::Write(txn, view))
        })
    }

    /// Leave a party. Returns the remaining party, or `None` once it is gone.
    pub fn leave_party(&self, party_id: Uuid, user_id: Uuid) -> Result<Option<PartyView>, PartyError> {
        self.transact("leave_party", |now| {
            let snapshot = match self.load_optional(party_id)? {
                Some(snapshot) => snapshot,
                None => {
                    let mut txn = Transaction::new();
                    self.stage_pointer_removal(&mut txn, user_id, party_id)?;
                    return Ok(if txn.is_empty() {
                        Step::Skip(None)
                    } else {
                        Step::Write(txn, None)
                    });
                }
            };

            snapshot.require_member(user_id)?;
            self.stage_removal(&snapshot, user_id, now)
        })
    }

    /// Remove another member. Leader only.
    pub fn kick_member(
        &self,
        party_id: Uuid,
        leader_id: Uuid,
        target_id: Uuid,
    ) -> Result<PartyView, PartyError> {
        let view = self.transact("kick_member", |now| {
            let snapshot = self.load(party_id)?;
            snapshot.require_leader(leader_id)?;
            if target_id == leader_id {
                return Err(PartyError::InvalidRole("leader cannot kick themselves".to_string()));
            }
            snapshot.require_member(target_id)?;
            self.stage_removal(&snapshot, target_id, now)
        })?;

        tracing::info!("User {} kicked from party {}", target_id, party_id);
        view.ok_or(PartyError::NotFound(party_id))
    }

    /// Disband a party. Leader only; disbanding a missing party succeeds.
    pub fn disband_party(&self, party_id: Uuid, leader_id: Uuid) -> Result<(), PartyError> {
        self.transact("disband_party", |_now| {
            let snapshot = match self.load_optional(party_id)? {
                Some(snapshot) => snapshot,
                None => return Ok(Step::Skip(())),
            };
            snapshot.require_leader(leader_id)?;

            let mut txn = Transaction::new();
            snapshot.watch(&mut txn);
            self.stage_teardown(&mut txn, party_id, &snapshot.members.value)?;
            Ok(Step::Write(txn, ()))
        })?;

        tracing::info!("Party {} disbanded by {}", party_id, leader_id);
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Members and roles
    // ----------------------------------------------------------------------

    /// Flip a member's ready flag. Unreadying cancels an active search.
    pub fn toggle_ready(&self, party_id: Uuid, user_id: Uuid) -> Result<bool, PartyError> {
        let view = self.edit("toggle_ready", party_id, |snapshot, view| {
            snapshot.require_member(user_id)?;
            if view.queue.status == QueueStatus::MatchFound {
                return Err(PartyError::MatchAlreadyFound);
            }
            if let Some(member) = view.members.iter_mut().find(|m| m.user_id == user_id) {
                member.is_ready = !member.is_ready;
                if !member.is_ready && view.queue.status.is_searching() {
                    view.queue = PartyQueueState::idle();
                }
            }
            Ok(())
        })?;

        Ok(view.member(user_id).map(|m| m.is_ready).unwrap_or(false))
    }

    pub fn set_preferred_operation(
        &self,
        party_id: Uuid,
        user_id: Uuid,
        operation: Option<Operation>,
    ) -> Result<PartyView, PartyError> {
        self.edit("set_preferred_operation", party_id, |snapshot, view| {
            snapshot.require_member(user_id)?;
            if view.queue.status != QueueStatus::Idle {
                return Err(PartyError::InQueue);
            }
            if let Some(member) = view.members.iter_mut().find(|m| m.user_id == user_id) {
                member.preferred_operation = operation;
            }
            Ok(())
        })
    }

    /// Assign or clear the in-game leader. Leader only; target must be a member.
    pub fn assign_igl(
        &self,
        party_id: Uuid,
        leader_id: Uuid,
        target: Option<Uuid>,
    ) -> Result<PartyView, PartyError> {
        self.edit("assign_igl", party_id, |snapshot, view| {
            snapshot.require_leader(leader_id)?;
            if let Some(target) = target {
                if !snapshot.is_member(target) {
                    return Err(PartyError::InvalidRole("IGL must be a party member".to_string()));
                }
            }
            view.party.igl_id = target;
            Ok(())
        })
    }

    /// Assign or clear the anchor. Leader only; target must be a member.
    pub fn assign_anchor(
        &self,
        party_id: Uuid,
        leader_id: Uuid,
        target: Option<Uuid>,
    ) -> Result<PartyView, PartyError> {
        self.edit("assign_anchor", party_id, |snapshot, view| {
            snapshot.require_leader(leader_id)?;
            if let Some(target) = target {
                if !snapshot.is_member(target) {
                    return Err(PartyError::InvalidRole("anchor must be a party member".to_string()));
                }
            }
            view.party.anchor_id = target;
            Ok(())
        })
    }

    pub fn set_target_mode(
        &self,
        party_id: Uuid,
        leader_id: Uuid,
        mode: Option<ArenaMode>,
    ) -> Result<PartyView, PartyError> {
        self.edit("set_target_mode", party_id, |snapshot, view| {
            snapshot.require_leader(leader_id)?;
            if view.queue.status != QueueStatus::Idle {
                return Err(PartyError::InQueue);
            }
            if let Some(mode) = mode {
                if view.members.len() > mode.team_size() {
                    return Err(PartyError::TooManyMembers(mode));
                }
            }
            view.party.set_target_mode(mode);
            Ok(())
        })
    }

    pub fn set_invite_mode(
        &self,
        party_id: Uuid,
        leader_id: Uuid,
        mode: InviteMode,
    ) -> Result<PartyView, PartyError> {
        self.edit("set_invite_mode", party_id, |snapshot, view| {
            snapshot.require_leader(leader_id)?;
            view.party.invite_mode = mode;
            Ok(())
        })
    }

    pub fn set_team_identity(
        &self,
        party_id: Uuid,
        leader_id: Uuid,
        team_id: Option<Uuid>,
        team_name: Option<String>,
        team_tag: Option<String>,
    ) -> Result<PartyView, PartyError> {
        if let Some(name) = &team_name {
            if name.trim().is_empty() || name.chars().count() > MAX_TEAM_NAME_LEN {
                return Err(PartyError::InvalidTeamIdentity(format!(
                    "name must be 1-{} characters",
                    MAX_TEAM_NAME_LEN
                )));
            }
        }
        if let Some(tag) = &team_tag {
            if tag.is_empty() || tag.chars().count() > MAX_TEAM_TAG_LEN {
                return Err(PartyError::InvalidTeamIdentity(format!(
                    "tag must be 1-{} characters",
                    MAX_TEAM_TAG_LEN
                )));
            }
        }

        self.edit("set_team_identity", party_id, |snapshot, view| {
            snapshot.require_leader(leader_id)?;
            view.party.team_id = team_id;
            view.party.team_name = team_name.clone();
            view.party.team_tag = team_tag.clone();
            Ok(())
        })
    }

    pub fn transfer_leadership(
        &self,
        party_id: Uuid,
        leader_id: Uuid,
        new_leader_id: Uuid,
    ) -> Result<PartyView, PartyError> {
        self.edit("transfer_leadership", party_id, |snapshot, view| {
            snapshot.require_leader(leader_id)?;
            if !snapshot.is_member(new_leader_id) {
                return Err(PartyError::InvalidRole("new leader must be a party member".to_string()));
            }
            view.party.leader_id = new_leader_id;
            Ok(())
        })
    }

    /// Record a member's connection state.
    pub fn set_member_online(
        &self,
        party_id: Uuid,
        user_id: Uuid,
        online: bool,
    ) -> Result<PartyView, PartyError> {
        let now = self.now();
        self.edit("set_member_online", party_id, |snapshot, view| {
            snapshot.require_member(user_id)?;
            if let Some(member) = view.members.iter_mut().find(|m| m.user_id == user_id) {
                member.is_online = online;
                member.last_seen_at = now;
            }
            Ok(())
        })
    }

    /// Move leadership away from, or disband around, a leader who has been
    /// offline past the grace period.
    pub fn enforce_leader_presence(&self, party_id: Uuid) -> Result<LeaderPresence, PartyError> {
        let timeout = self.leader_timeout();
        let outcome = self.transact("enforce_leader_presence", |now| {
            let snapshot = match self.load_optional(party_id)? {
                Some(snapshot) => snapshot,
                None => return Ok(Step::Skip(LeaderPresence::Gone)),
            };

            let leader_id = snapshot.party.value.leader_id;
            let leader = snapshot.members.value.iter().find(|m| m.user_id == leader_id);
            let present = leader
                .map(|l| l.is_online || now - l.last_seen_at < timeout)
                .unwrap_or(false);
            if present {
                return Ok(Step::Skip(LeaderPresence::Present));
            }

            let mut txn = Transaction::new();
            snapshot.watch(&mut txn);

            let online_successor = snapshot
                .members
                .value
                .iter()
                .filter(|m| m.user_id != leader_id && m.is_online)
                .min_by_key(|m| m.joined_at)
                .map(|m| m.user_id);

            match online_successor {
                Some(next) => {
                    let mut view = snapshot.view();
                    view.party.leader_id = next;
                    view.party.updated_at = now;
                    self.stage(&mut txn, &view)?;
                    Ok(Step::Write(
                        txn,
                        LeaderPresence::Transferred {
                            from: leader_id,
                            to: next,
                        },
                    ))
                }
                None => {
                    self.stage_teardown(&mut txn, party_id, &snapshot.members.value)?;
                    Ok(Step::Write(txn, LeaderPresence::Disbanded))
                }
            }
        })?;

        match &outcome {
            LeaderPresence::Transferred { from, to } => {
                tracing::info!("Party {} leader {} timed out, {} now leads", party_id, from, to)
            }
            LeaderPresence::Disbanded => {
                tracing::info!("Party {} disbanded after leader disconnect timeout", party_id)
            }
            _ => {}
        }
        Ok(outcome)
    }

    /// Check that a user's party pointer references a party listing them,
    /// removing it when it does not.
    pub fn validate_user_party_state(&self, user_id: Uuid) -> Result<PartyRepair, PartyError> {
        let repair = self.transact("validate_user_party_state", |_now| {
            let key = keys::user_party(user_id);
            let pointer = match get_typed::<Uuid>(self.store.as_ref(), &key)? {
                Some(pointer) => pointer,
                None => return Ok(Step::Skip(PartyRepair::Consistent(None))),
            };

            let members_key = keys::members(pointer.value);
            let members = get_typed::<Vec<PartyMember>>(self.store.as_ref(), &members_key)?;
            let listed = members
                .as_ref()
                .map(|m| m.value.iter().any(|member| member.user_id == user_id))
                .unwrap_or(false);

            if listed {
                return Ok(Step::Skip(PartyRepair::Consistent(Some(pointer.value))));
            }

            let mut txn = Transaction::new();
            txn.watch(key.clone(), Some(pointer.version));
            txn.watch(members_key, members.map(|m| m.version));
            txn.delete(key);
            Ok(Step::Write(txn, PartyRepair::ClearedStalePointer(pointer.value)))
        })?;

        if let PartyRepair::ClearedStalePointer(party_id) = repair {
            tracing::warn!("Removed stale party pointer {} for user {}", party_id, user_id);
        }
        Ok(repair)
    }

    // ----------------------------------------------------------------------
    // Invites
    // ----------------------------------------------------------------------

    /// Invite a user. Re-inviting returns the pending invite.
    pub fn create_invite(
        &self,
        party_id: Uuid,
        inviter_id: Uuid,
        invitee_id: Uuid,
    ) -> Result<PartyInvite, PartyError> {
        self.transact("create_invite", |now| {
            let snapshot = self.load(party_id)?;
            snapshot.require_member(inviter_id)?;
            if snapshot.party.value.invite_mode == InviteMode::InviteOnly
                && snapshot.party.value.leader_id != inviter_id
            {
                return Err(PartyError::NotLeader);
            }
            if snapshot.is_member(invitee_id) {
                return Err(PartyError::AlreadyMember);
            }
            if snapshot.view().is_full() {
                return Err(PartyError::PartyFull(snapshot.party.value.max_size));
            }

            let store = self.store.as_ref();
            let invites_key = keys::invites(party_id);
            let index_key = keys::user_invites(invitee_id);
            let list = get_typed::<Vec<PartyInvite>>(store, &invites_key)?;
            let index = get_typed::<Vec<Uuid>>(store, &index_key)?;

            let mut pending: Vec<PartyInvite> = list
                .as_ref()
                .map(|l| l.value.clone())
                .unwrap_or_default()
                .into_iter()
                .filter(|i| !i.is_expired(now))
                .collect();

            if let Some(existing) = pending.iter().find(|i| i.invitee_id == invitee_id) {
                return Ok(Step::Skip(existing.clone()));
            }

            let invite = PartyInvite {
                invite_id: Uuid::new_v4(),
                inviter_id,
                invitee_id,
                party_id,
                created_at: now,
                expires_at: now + self.invite_ttl(),
            };
            pending.push(invite.clone());

            let mut parties = index.as_ref().map(|i| i.value.clone()).unwrap_or_default();
            if !parties.contains(&party_id) {
                parties.push(party_id);
            }

            let mut txn = Transaction::new();
            txn.watch(keys::party(party_id), Some(snapshot.party.version));
            txn.watch(invites_key.clone(), list.map(|l| l.version));
            txn.watch(index_key.clone(), index.map(|i| i.version));
            txn.put_typed(invites_key, &pending, self.invite_ttl())?;
            txn.put_typed(index_key, &parties, self.invite_ttl())?;
            Ok(Step::Write(txn, invite))
        })
    }

    /// Accept an invite, joining its party. A consumed invite cannot be
    /// accepted again.
    pub fn accept_invite(
        &self,
        invite_id: Uuid,
        user_id: Uuid,
        display_name: &str,
    ) -> Result<PartyView, PartyError> {
        let view = self.transact("accept_invite", |now| {
            let found = self
                .find_invite(user_id, invite_id)?
                .ok_or(PartyError::InviteNotFound)?;
            if found.invite.is_expired(now) {
                return Err(PartyError::InviteExpired);
            }

            let snapshot = self.load(found.invite.party_id)?;
            if snapshot.is_member(user_id) {
                return Err(PartyError::AlreadyMember);
            }

            let (mut txn, view) = self.stage_join(&snapshot, user_id, display_name, now)?;
            self.stage_invite_removal(&mut txn, &found)?;
            Ok(Step::Write(txn, view))
        })?;

        tracing::info!("User {} accepted invite into party {}", user_id, view.party.id);
        Ok(view)
    }

    /// Decline an invite. Declining a missing invite succeeds.
    pub fn decline_invite(&self, invite_id: Uuid, user_id: Uuid) -> Result<(), PartyError> {
        self.transact("decline_invite", |_now| {
            let found = match self.find_invite(user_id, invite_id)? {
                Some(found) => found,
                None => return Ok(Step::Skip(())),
            };
            let mut txn = Transaction::new();
            self.stage_invite_removal(&mut txn, &found)?;
            Ok(Step::Write(txn, ()))
        })
    }

    /// Unexpired invites addressed to a user for parties that still exist.
    pub fn pending_invites(&self, user_id: Uuid) -> Result<Vec<PartyInvite>, PartyError> {
        let store = self.store.as_ref();
        let now = self.now();
        let index = match get_typed::<Vec<Uuid>>(store, &keys::user_invites(user_id))? {
            Some(index) => index.value,
            None => return Ok(Vec::new()),
        };

        let mut pending = Vec::new();
        for party_id in index {
            if store.get(&keys::party(party_id))?.is_none() {
                continue;
            }
            if let Some(list) = get_typed::<Vec<PartyInvite>>(store, &keys::invites(party_id))? {
                pending.extend(
                    list.value
                        .into_iter()
                        .filter(|i| i.invitee_id == user_id && !i.is_expired(now)),
                );
            }
        }
        Ok(pending)
    }

    // ----------------------------------------------------------------------
    // Queue
    // ----------------------------------------------------------------------

    /// Start searching. Leader only; every member must be ready.
    pub fn start_queue(
        &self,
        party_id: Uuid,
        leader_id: Uuid,
        match_type: MatchType,
    ) -> Result<PartyQueueState, PartyError> {
        let queue = self.transact("start_queue", |now| {
            let snapshot = self.load(party_id)?;
            snapshot.require_leader(leader_id)?;
            let mode = snapshot
                .party
                .value
                .target_mode
                .ok_or(PartyError::NoTargetMode)?;

            let mut view = snapshot.view();
            if view.queue.status.is_searching() {
                return Ok(Step::Skip(view.queue));
            }
            if view.queue.status == QueueStatus::MatchFound {
                return Err(PartyError::MatchAlreadyFound);
            }
            if !view.all_ready() {
                return Err(PartyError::NotReady);
            }

            let status = if view.members.len() < mode.team_size() {
                QueueStatus::FindingTeammates
            } else {
                QueueStatus::FindingOpponents
            };
            view.queue = PartyQueueState::searching(status, match_type, now);
            view.party.updated_at = now;

            let mut txn = Transaction::new();
            snapshot.watch(&mut txn);
            self.stage(&mut txn, &view)?;
            self.stage_search_entry(&mut txn, party_id)?;
            Ok(Step::Write(txn, view.queue))
        })?;

        tracing::info!("Party {} entered queue: {:?}", party_id, queue.status);
        Ok(queue)
    }

    /// Stop searching. Any member may cancel; cancelling an idle queue succeeds.
    pub fn cancel_queue(&self, party_id: Uuid, user_id: Uuid) -> Result<PartyQueueState, PartyError> {
        self.transact("cancel_queue", |now| {
            let snapshot = self.load(party_id)?;
            snapshot.require_member(user_id)?;

            let mut view = snapshot.view();
            match view.queue.status {
                QueueStatus::Idle => return Ok(Step::Skip(view.queue)),
                QueueStatus::MatchFound => return Err(PartyError::MatchAlreadyFound),
                _ => {}
            }

            view.queue = PartyQueueState::idle();
            view.party.updated_at = now;
            let mut txn = Transaction::new();
            snapshot.watch(&mut txn);
            self.stage(&mut txn, &view)?;
            Ok(Step::Write(txn, view.queue))
        })
    }

    pub fn queue_state(&self, party_id: Uuid) -> Result<PartyQueueState, PartyError> {
        Ok(self.load(party_id)?.view().queue)
    }

    /// Move a searching party to `match_found`. Repeating with the same
    /// match id succeeds.
    pub fn mark_match_found(
        &self,
        party_id: Uuid,
        match_id: Uuid,
        opponent: OpponentKind,
    ) -> Result<PartyQueueState, PartyError> {
        self.transact("mark_match_found", |now| {
            let snapshot = self.load(party_id)?;
            let mut view = snapshot.view();

            if view.queue.status == QueueStatus::MatchFound {
                return if view.queue.match_id == Some(match_id) {
                    Ok(Step::Skip(view.queue))
                } else {
                    Err(PartyError::MatchAlreadyFound)
                };
            }
            if !view.queue.status.is_searching() {
                return Err(PartyError::NotSearching);
            }

            view.queue = view.queue.matched(match_id, opponent);
            view.party.updated_at = now;
            let mut txn = Transaction::new();
            snapshot.watch(&mut txn);
            self.stage(&mut txn, &view)?;
            Ok(Step::Write(txn, view.queue))
        })
    }

    /// Return a party to idle after its match ends. Members must ready up again.
    pub fn complete_match(&self, party_id: Uuid, match_id: Uuid) -> Result<(), PartyError> {
        self.transact("complete_match", |now| {
            let snapshot = match self.load_optional(party_id)? {
                Some(snapshot) => snapshot,
                None => return Ok(Step::Skip(())),
            };
            let mut view = snapshot.view();
            if view.queue.match_id != Some(match_id) {
                return Ok(Step::Skip(()));
            }

            view.queue = PartyQueueState::idle();
            for member in view.members.iter_mut() {
                member.is_ready = false;
            }
            view.party.updated_at = now;

            let mut txn = Transaction::new();
            snapshot.watch(&mut txn);
            self.stage(&mut txn, &view)?;
            Ok(Step::Write(txn, ()))
        })
    }

    // ----------------------------------------------------------------------
    // Reads
    // ----------------------------------------------------------------------

    pub fn get_party(&self, party_id: Uuid) -> Result<Option<PartyView>, PartyError> {
        Ok(self.load_optional(party_id)?.map(|s| s.view()))
    }

    /// The party a user is currently in, if the pointer is live.
    pub fn get_user_party(&self, user_id: Uuid) -> Result<Option<PartyView>, PartyError> {
        let (_, current) = self.current_membership(user_id)?;
        match current {
            Some(party_id) => self.get_party(party_id),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryStore;

    fn setup() -> (Arc<MemoryStore>, PartyCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let coordinator = PartyCoordinator::new(store.clone(), PartySettings::default());
        (store, coordinator)
    }

    #[test]
    fn test_create_and_join() {
        let (_store, parties) = setup();
        let leader = Uuid::new_v4();
        let friend = Uuid::new_v4();

        let party = parties.create_party(leader, "Lead").unwrap();
        assert_eq!(party.party.leader_id, leader);
        assert_eq!(party.members.len(), 1);

        let joined = parties.join_party(party.party.id, friend, "Friend").unwrap();
        assert_eq!(joined.members.len(), 2);

        // Joining again is a no-op
        let again = parties.join_party(party.party.id, friend, "Friend").unwrap();
        assert_eq!(again.members.len(), 2);

        let mine = parties.get_user_party(friend).unwrap().unwrap();
        assert_eq!(mine.party.id, party.party.id);
    }

    #[test]
    fn test_party_never_exceeds_mode_size() {
        let (_store, parties) = setup();
        let leader = Uuid::new_v4();
        let party = parties.create_party(leader, "Lead").unwrap();
        let id = party.party.id;
        parties.set_target_mode(id, leader, Some(ArenaMode::Duo)).unwrap();

        parties.join_party(id, Uuid::new_v4(), "Two").unwrap();
        let err = parties.join_party(id, Uuid::new_v4(), "Three").unwrap_err();
        assert!(matches!(err, PartyError::PartyFull(2)));
        assert_eq!(parties.get_party(id).unwrap().unwrap().members.len(), 2);

        let err = parties.set_target_mode(id, leader, Some(ArenaMode::Duel)).unwrap_err();
        assert!(matches!(err, PartyError::TooManyMembers(ArenaMode::Duel)));
    }

    #[test]
    fn test_concurrent_joins_respect_capacity() {
        let (_store, parties) = setup();
        let parties = Arc::new(parties);
        let leader = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        parties.set_target_mode(id, leader, Some(ArenaMode::Duo)).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let parties = Arc::clone(&parties);
                std::thread::spawn(move || parties.join_party(id, Uuid::new_v4(), &format!("u{}", i)))
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();

        assert_eq!(successes, 1);
        assert_eq!(parties.get_party(id).unwrap().unwrap().members.len(), 2);
    }

    #[test]
    fn test_user_in_one_party_at_a_time() {
        let (_store, parties) = setup();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let first = parties.create_party(a, "A").unwrap();
        let second = parties.create_party(b, "B").unwrap();

        let err = parties.join_party(second.party.id, a, "A").unwrap_err();
        assert!(matches!(err, PartyError::AlreadyInParty(id) if id == first.party.id));
        assert!(matches!(
            parties.create_party(a, "A").unwrap_err(),
            PartyError::AlreadyInParty(_)
        ));
    }

    #[test]
    fn test_invite_accepted_once() {
        let (_store, parties) = setup();
        let leader = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        parties.set_invite_mode(id, leader, InviteMode::InviteOnly).unwrap();

        assert!(matches!(
            parties.join_party(id, guest, "Guest").unwrap_err(),
            PartyError::InviteOnly
        ));

        let invite = parties.create_invite(id, leader, guest).unwrap();
        let repeat = parties.create_invite(id, leader, guest).unwrap();
        assert_eq!(invite.invite_id, repeat.invite_id);
        assert_eq!(parties.pending_invites(guest).unwrap().len(), 1);

        let view = parties.accept_invite(invite.invite_id, guest, "Guest").unwrap();
        assert!(view.is_member(guest));

        let err = parties.accept_invite(invite.invite_id, guest, "Guest").unwrap_err();
        assert!(matches!(err, PartyError::InviteNotFound));
        assert!(parties.pending_invites(guest).unwrap().is_empty());
        assert_eq!(parties.get_party(id).unwrap().unwrap().members.len(), 2);
    }

    #[test]
    fn test_expired_invite_rejected() {
        let (store, parties) = setup();
        let leader = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        let invite = parties.create_invite(id, leader, guest).unwrap();

        store.advance_clock(Duration::minutes(11));
        assert!(parties.accept_invite(invite.invite_id, guest, "Guest").is_err());
        assert_eq!(parties.get_party(id).unwrap().unwrap().members.len(), 1);
    }

    #[test]
    fn test_decline_invite_is_idempotent() {
        let (_store, parties) = setup();
        let leader = Uuid::new_v4();
        let guest = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        let invite = parties.create_invite(id, leader, guest).unwrap();

        parties.decline_invite(invite.invite_id, guest).unwrap();
        parties.decline_invite(invite.invite_id, guest).unwrap();
        assert!(parties.pending_invites(guest).unwrap().is_empty());
    }

    #[test]
    fn test_leader_leaving_reassigns_then_last_member_disbands() {
        let (store, parties) = setup();
        let leader = Uuid::new_v4();
        let second = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        parties.join_party(id, second, "Second").unwrap();
        parties.assign_igl(id, leader, Some(leader)).unwrap();

        let remaining = parties.leave_party(id, leader).unwrap().unwrap();
        assert_eq!(remaining.party.leader_id, second);
        assert_eq!(remaining.party.igl_id, None);

        assert!(parties.leave_party(id, second).unwrap().is_none());
        assert!(parties.get_party(id).unwrap().is_none());
        assert!(store.get(&keys::members(id)).unwrap().is_none());
        assert!(parties.get_user_party(second).unwrap().is_none());

        // Leaving again is terminal and idempotent
        assert!(parties.leave_party(id, second).unwrap().is_none());
    }

    #[test]
    fn test_disband_clears_everything() {
        let (store, parties) = setup();
        let leader = Uuid::new_v4();
        let member = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        parties.join_party(id, member, "Member").unwrap();

        assert!(matches!(
            parties.disband_party(id, member).unwrap_err(),
            PartyError::NotLeader
        ));
        parties.disband_party(id, leader).unwrap();
        parties.disband_party(id, leader).unwrap();

        assert!(store.is_empty());
        assert!(parties.get_user_party(member).unwrap().is_none());
    }

    #[test]
    fn test_ttl_expiry_removes_party() {
        let (store, parties) = setup();
        let leader = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;

        store.advance_clock(Duration::hours(4) + Duration::seconds(1));
        assert!(parties.get_party(id).unwrap().is_none());
        assert!(store.get(&keys::members(id)).unwrap().is_none());
        assert!(matches!(
            parties.queue_state(id).unwrap_err(),
            PartyError::NotFound(_)
        ));
    }

    #[test]
    fn test_kick_and_roles_are_leader_only() {
        let (_store, parties) = setup();
        let leader = Uuid::new_v4();
        let member = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        parties.join_party(id, member, "Member").unwrap();

        assert!(matches!(
            parties.assign_anchor(id, member, Some(member)).unwrap_err(),
            PartyError::NotLeader
        ));
        assert!(matches!(
            parties.assign_anchor(id, leader, Some(outsider)).unwrap_err(),
            PartyError::InvalidRole(_)
        ));
        let view = parties.assign_anchor(id, leader, Some(member)).unwrap();
        assert_eq!(view.party.anchor_id, Some(member));

        let view = parties.kick_member(id, leader, member).unwrap();
        assert_eq!(view.members.len(), 1);
        assert_eq!(view.party.anchor_id, None);
        assert!(parties.get_user_party(member).unwrap().is_none());
    }

    #[test]
    fn test_queue_requires_mode_and_ready() {
        let (store, parties) = setup();
        let leader = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;

        assert!(matches!(
            parties.start_queue(id, leader, MatchType::Ranked).unwrap_err(),
            PartyError::NoTargetMode
        ));
        parties.set_target_mode(id, leader, Some(ArenaMode::Duo)).unwrap();
        assert!(matches!(
            parties.start_queue(id, leader, MatchType::Ranked).unwrap_err(),
            PartyError::NotReady
        ));

        assert!(parties.toggle_ready(id, leader).unwrap());
        let queue = parties.start_queue(id, leader, MatchType::Ranked).unwrap();
        assert_eq!(queue.status, QueueStatus::FindingTeammates);
        let searching = get_typed::<Vec<Uuid>>(&*store, keys::SEARCHING_PARTIES)
            .unwrap()
            .unwrap();
        assert_eq!(searching.value, vec![id]);

        let match_id = Uuid::new_v4();
        let found = parties.mark_match_found(id, match_id, OpponentKind::Ai).unwrap();
        assert_eq!(found.match_id, Some(match_id));
        assert!(matches!(
            parties.cancel_queue(id, leader).unwrap_err(),
            PartyError::MatchAlreadyFound
        ));

        parties.complete_match(id, match_id).unwrap();
        let view = parties.get_party(id).unwrap().unwrap();
        assert_eq!(view.queue.status, QueueStatus::Idle);
        assert!(!view.all_ready());
    }

    #[test]
    fn test_unready_cancels_search() {
        let (_store, parties) = setup();
        let leader = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        parties.set_target_mode(id, leader, Some(ArenaMode::Duel)).unwrap();
        parties.toggle_ready(id, leader).unwrap();
        assert_eq!(
            parties.start_queue(id, leader, MatchType::Casual).unwrap().status,
            QueueStatus::FindingOpponents
        );

        assert!(!parties.toggle_ready(id, leader).unwrap());
        assert_eq!(parties.queue_state(id).unwrap().status, QueueStatus::Idle);
        // Cancelling an idle queue succeeds
        parties.cancel_queue(id, leader).unwrap();
    }

    #[test]
    fn test_leader_disconnect_timeout() {
        let (store, parties) = setup();
        let leader = Uuid::new_v4();
        let member = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;
        parties.join_party(id, member, "Member").unwrap();

        parties.set_member_online(id, leader, false).unwrap();
        assert_eq!(parties.enforce_leader_presence(id).unwrap(), LeaderPresence::Present);

        store.advance_clock(Duration::seconds(61));
        assert_eq!(
            parties.enforce_leader_presence(id).unwrap(),
            LeaderPresence::Transferred {
                from: leader,
                to: member
            }
        );

        parties.set_member_online(id, member, false).unwrap();
        store.advance_clock(Duration::seconds(61));
        assert_eq!(parties.enforce_leader_presence(id).unwrap(), LeaderPresence::Disbanded);
        assert_eq!(parties.enforce_leader_presence(id).unwrap(), LeaderPresence::Gone);
    }

    #[test]
    fn test_validate_repairs_stale_pointer() {
        let (store, parties) = setup();
        let user = Uuid::new_v4();
        let ghost_party = Uuid::new_v4();

        let mut txn = Transaction::new();
        txn.put_typed(keys::user_party(user), &ghost_party, Duration::hours(1))
            .unwrap();
        store.commit(txn).unwrap();

        assert_eq!(
            parties.validate_user_party_state(user).unwrap(),
            PartyRepair::ClearedStalePointer(ghost_party)
        );
        assert_eq!(
            parties.validate_user_party_state(user).unwrap(),
            PartyRepair::Consistent(None)
        );

        let id = parties.create_party(user, "User").unwrap().party.id;
        assert_eq!(
            parties.validate_user_party_state(user).unwrap(),
            PartyRepair::Consistent(Some(id))
        );
    }

    #[test]
    fn test_store_outage_fails_closed() {
        let (store, parties) = setup();
        store.set_available(false);
        let err = parties.create_party(Uuid::new_v4(), "Lead").unwrap_err();
        assert!(matches!(err, PartyError::Store(StoreError::Unavailable)));

        store.set_available(true);
        assert!(store.is_empty());
    }

    #[test]
    fn test_team_identity_validation() {
        let (_store, parties) = setup();
        let leader = Uuid::new_v4();
        let id = parties.create_party(leader, "Lead").unwrap().party.id;

        assert!(matches!(
            parties
                .set_team_identity(id, leader, None, Some("Pi".into()), Some("TOOLONG".into()))
                .unwrap_err(),
            PartyError::InvalidTeamIdentity(_)
        ));
        let view = parties
            .set_team_identity(id, leader, Some(Uuid::new_v4()), Some("Primes".into()), Some("PRM".into()))
            .unwrap();
        assert_eq!(view.party.team_tag.as_deref(), Some("PRM"));
    }
}
