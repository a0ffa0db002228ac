//! Match state machine.
//!
//! The engine is pure: its owner feeds it commands and elapsed time and
//! forwards the events it returns. Clock deadlines inside one tick are
//! processed in order, so a long tick behaves like many short ones.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::ai::AiProfile;
use super::questions::QuestionGenerator;
use super::rules::{points_for_streak, MatchRules};
use super::types::{
    MatchOutcome, MatchPhase, MatchResult, MatchState, PlayerState, TeamSide, TeamState,
};
use super::MatchError;
use crate::networking::protocol::{ServerEvent, MAX_TYPING_LEN};
use crate::rating::types::{ArenaMode, MatchType, Operation};

/// Upper bound on clock steps processed by one tick.
const MAX_STEPS_PER_TICK: usize = 10_000;

/// Who receives an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    All,
    Users(Vec<Uuid>),
}

/// Event addressed to part of a match.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub audience: Audience,
    pub event: ServerEvent,
}

impl Outbound {
    pub fn all(event: ServerEvent) -> Self {
        Self {
            audience: Audience::All,
            event,
        }
    }

    pub fn to(users: Vec<Uuid>, event: ServerEvent) -> Self {
        Self {
            audience: Audience::Users(users),
            event,
        }
    }

    pub fn is_for(&self, user_id: Uuid) -> bool {
        match &self.audience {
            Audience::All => true,
            Audience::Users(users) => users.contains(&user_id),
        }
    }
}

/// Player seat at match creation.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSetup {
    pub user_id: Uuid,
    pub display_name: String,
    pub is_ai: bool,
    pub skill_tier: u8,
}

/// Team at match creation. Player order is the initial slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct TeamSetup {
    pub team_id: Option<Uuid>,
    pub name: String,
    pub tag: Option<String>,
    pub party_ids: Vec<Uuid>,
    pub rating: u32,
    pub igl_id: Option<Uuid>,
    pub anchor_id: Option<Uuid>,
    pub players: Vec<PlayerSetup>,
}

/// Everything needed to start a match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSetup {
    pub match_id: Uuid,
    pub mode: ArenaMode,
    pub match_type: MatchType,
    pub operation: Option<Operation>,
    pub home: TeamSetup,
    pub away: TeamSetup,
    /// Seeds questions and AI behaviour
    pub seed: u64,
}

/// Player intent, already authenticated.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchCommand {
    Join { user_id: Uuid },
    Disconnect { user_id: Uuid },
    SubmitAnswer { user_id: Uuid, answer: String },
    Typing { user_id: Uuid, input: String },
    IglTimeout { user_id: Uuid },
    IglSwap { user_id: Uuid, assignments: BTreeMap<u8, Uuid> },
    AnchorCallIn { user_id: Uuid, target_slot: u8 },
    Forfeit { user_id: Uuid },
}

impl MatchCommand {
    pub fn user_id(&self) -> Uuid {
        match self {
            MatchCommand::Join { user_id }
            | MatchCommand::Disconnect { user_id }
            | MatchCommand::SubmitAnswer { user_id, .. }
            | MatchCommand::Typing { user_id, .. }
            | MatchCommand::IglTimeout { user_id }
            | MatchCommand::IglSwap { user_id, .. }
            | MatchCommand::AnchorCallIn { user_id, .. }
            | MatchCommand::Forfeit { user_id } => *user_id,
        }
    }
}

/// Authoritative state machine for one match.
pub struct MatchEngine {
    state: MatchState,
    rules: MatchRules,
    questions: QuestionGenerator,
    rng: StdRng,
    skill_tiers: BTreeMap<Uuid, u8>,
    ai_profiles: BTreeMap<Uuid, AiProfile>,
    /// Time until each AI player with an open question answers
    ai_timers: BTreeMap<Uuid, u64>,
}

impl MatchEngine {
    pub fn new(setup: MatchSetup, rules: MatchRules, now: DateTime<Utc>) -> Result<Self, MatchError> {
        let team_size = setup.mode.team_size();
        for team in [&setup.home, &setup.away] {
            if team.players.len() != team_size {
                return Err(MatchError::InvalidSetup(format!(
                    "{} has {} players, {} needs {}",
                    team.name,
                    team.players.len(),
                    setup.mode,
                    team_size
                )));
            }
        }

        let mut seen = BTreeSet::new();
        let mut skill_tiers = BTreeMap::new();
        let mut ai_profiles = BTreeMap::new();
        for team in [&setup.home, &setup.away] {
            let profile = AiProfile::for_rating(team.rating);
            for player in &team.players {
                if !seen.insert(player.user_id) {
                    return Err(MatchError::InvalidSetup(format!(
                        "player {} seated twice",
                        player.user_id
                    )));
                }
                skill_tiers.insert(player.user_id, player.skill_tier);
                if player.is_ai {
                    ai_profiles.insert(player.user_id, profile);
                }
            }
        }

        let state = MatchState {
            match_id: setup.match_id,
            mode: setup.mode,
            match_type: setup.match_type,
            operation: setup.operation,
            phase: MatchPhase::PreMatch,
            round: 0,
            half: 1,
            game_clock_ms: 0,
            relay_clock_ms: 0,
            phase_remaining_ms: rules.pre_match_ms,
            handoff_remaining_ms: None,
            current_slot: 0,
            teams: [build_team(setup.home, true), build_team(setup.away, false)],
            outcome: None,
            started_at: now,
            ended_at: None,
        };

        Ok(Self {
            state,
            rules,
            questions: QuestionGenerator::new(setup.seed),
            rng: StdRng::seed_from_u64(setup.seed.rotate_left(17)),
            skill_tiers,
            ai_profiles,
            ai_timers: BTreeMap::new(),
        })
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn rules(&self) -> &MatchRules {
        &self.rules
    }

    pub fn is_finished(&self) -> bool {
        self.state.phase == MatchPhase::PostMatch
    }

    /// Full snapshot event.
    pub fn snapshot_event(&self) -> ServerEvent {
        ServerEvent::MatchState {
            state: Box::new(self.state.clone()),
        }
    }

    fn clock_event(&self) -> ServerEvent {
        ServerEvent::ClockUpdate {
            match_id: self.state.match_id,
            phase: self.state.phase,
            game_clock_ms: self.state.game_clock_ms,
            relay_clock_ms: self.state.relay_clock_ms,
            phase_remaining_ms: self.state.phase_remaining_ms,
        }
    }

    // ----------------------------------------------------------------------
    // Commands
    // ----------------------------------------------------------------------

    /// Apply a player command. Rejected commands change nothing.
    pub fn handle(&mut self, command: MatchCommand, now: DateTime<Utc>) -> Result<Vec<Outbound>, MatchError> {
        let mut out = Vec::new();
        match command {
            MatchCommand::Join { user_id } => self.join(user_id, &mut out)?,
            MatchCommand::Disconnect { user_id } => self.disconnect(user_id, &mut out)?,
            MatchCommand::SubmitAnswer { user_id, answer } => self.submit_answer(user_id, &answer, &mut out)?,
            MatchCommand::Typing { user_id, input } => self.typing(user_id, input, &mut out)?,
            MatchCommand::IglTimeout { user_id } => self.igl_timeout(user_id, &mut out)?,
            MatchCommand::IglSwap { user_id, assignments } => self.igl_swap(user_id, assignments, &mut out)?,
            MatchCommand::AnchorCallIn { user_id, target_slot } => {
                self.anchor_call_in(user_id, target_slot, &mut out)?
            }
            MatchCommand::Forfeit { user_id } => {
                self.ensure_live()?;
                let (team, _) = self.locate_human(user_id)?;
                let side = TeamSide::from_index(team);
                tracing::info!("Match {}: {} forfeited by {}", self.state.match_id, self.state.teams[team].name, user_id);
                self.finish(MatchResult::winner(side.opponent()), Some(side), now, &mut out);
            }
        }
        self.fire_due(now, &mut out);
        Ok(out)
    }

    fn ensure_live(&self) -> Result<(), MatchError> {
        if self.is_finished() {
            Err(MatchError::Finished)
        } else {
            Ok(())
        }
    }

    fn locate(&self, user_id: Uuid) -> Result<(usize, usize), MatchError> {
        self.state
            .teams
            .iter()
            .enumerate()
            .find_map(|(t, team)| {
                team.players
                    .iter()
                    .position(|p| p.user_id == user_id)
                    .map(|p| (t, p))
            })
            .ok_or(MatchError::NotParticipant(user_id))
    }

    fn locate_human(&self, user_id: Uuid) -> Result<(usize, usize), MatchError> {
        let (t, p) = self.locate(user_id)?;
        if self.state.teams[t].players[p].is_ai {
            return Err(MatchError::NotParticipant(user_id));
        }
        Ok((t, p))
    }

    fn teammates_of(&self, team: usize, user_id: Uuid) -> Vec<Uuid> {
        self.state.teams[team]
            .human_ids()
            .into_iter()
            .filter(|id| *id != user_id)
            .collect()
    }

    fn join(&mut self, user_id: Uuid, out: &mut Vec<Outbound>) -> Result<(), MatchError> {
        let (t, p) = self.locate_human(user_id)?;
        let team = &mut self.state.teams[t];
        let newly_connected = !team.players[p].is_connected;
        team.players[p].is_connected = true;
        team.disconnected_ms = 0;

        out.push(Outbound::to(vec![user_id], self.snapshot_event()));
        if newly_connected {
            tracing::debug!("Match {}: player {} connected", self.state.match_id, user_id);
            out.push(Outbound::all(ServerEvent::PlayerConnected {
                match_id: self.state.match_id,
                user_id,
            }));
        }
        Ok(())
    }

    fn disconnect(&mut self, user_id: Uuid, out: &mut Vec<Outbound>) -> Result<(), MatchError> {
        let (t, p) = self.locate_human(user_id)?;
        let player = &mut self.state.teams[t].players[p];
        if player.is_connected {
            player.is_connected = false;
            tracing::info!("Match {}: player {} disconnected", self.state.match_id, user_id);
            out.push(Outbound::all(ServerEvent::PlayerDisconnected {
                match_id: self.state.match_id,
                user_id,
            }));
        }
        Ok(())
    }

    fn submit_answer(&mut self, user_id: Uuid, answer: &str, out: &mut Vec<Outbound>) -> Result<(), MatchError> {
        self.ensure_live()?;
        let (t, p) = self.locate_human(user_id)?;
        if self.state.phase != MatchPhase::Active || self.state.handoff_remaining_ms.is_some() {
            return Err(MatchError::WrongPhase(self.state.phase));
        }
        let player = &self.state.teams[t].players[p];
        if !player.is_active {
            return Err(MatchError::NotActivePlayer);
        }
        if player.current_question.is_none() {
            return Err(MatchError::NoQuestion);
        }
        self.answer(t, p, answer, out);
        Ok(())
    }

    fn typing(&mut self, user_id: Uuid, input: String, out: &mut Vec<Outbound>) -> Result<(), MatchError> {
        self.ensure_live()?;
        let (t, p) = self.locate_human(user_id)?;
        if !self.state.teams[t].players[p].is_active {
            return Err(MatchError::NotActivePlayer);
        }
        let current_input: String = input.chars().take(MAX_TYPING_LEN).collect();
        out.push(Outbound::to(
            self.teammates_of(t, user_id),
            ServerEvent::TypingUpdate {
                match_id: self.state.match_id,
                user_id,
                current_input,
            },
        ));
        Ok(())
    }

    fn igl_timeout(&mut self, user_id: Uuid, out: &mut Vec<Outbound>) -> Result<(), MatchError> {
        self.ensure_live()?;
        let (t, _) = self.locate_human(user_id)?;
        if self.state.teams[t].igl_id != Some(user_id) {
            return Err(MatchError::NotIgl);
        }
        if self.state.phase != MatchPhase::Active || self.state.handoff_remaining_ms.is_some() {
            return Err(MatchError::WrongPhase(self.state.phase));
        }
        if self.state.teams[t].timeouts_used >= self.rules.timeouts_per_team {
            return Err(MatchError::AbilityExhausted("timeouts"));
        }

        self.state.teams[t].timeouts_used += 1;
        self.state.relay_clock_ms += self.rules.timeout_extension_ms;
        tracing::info!("Match {}: timeout called by {}", self.state.match_id, self.state.teams[t].name);

        out.push(Outbound::all(ServerEvent::TimeoutCalled {
            match_id: self.state.match_id,
            team_index: t,
            user_id,
            timeouts_remaining: self.rules.timeouts_per_team - self.state.teams[t].timeouts_used,
            relay_clock_ms: self.state.relay_clock_ms,
        }));
        Ok(())
    }

    fn igl_swap(
        &mut self,
        user_id: Uuid,
        assignments: BTreeMap<u8, Uuid>,
        out: &mut Vec<Outbound>,
    ) -> Result<(), MatchError> {
        self.ensure_live()?;
        let (t, _) = self.locate_human(user_id)?;
        if self.state.teams[t].igl_id != Some(user_id) {
            return Err(MatchError::NotIgl);
        }
        if self.state.phase == MatchPhase::Active {
            return Err(MatchError::WrongPhase(self.state.phase));
        }
        if self.state.teams[t].swaps_used >= self.rules.igl_swaps_per_team {
            return Err(MatchError::AbilityExhausted("slot swaps"));
        }

        let slot_count = self.rules.slot_count(self.state.mode);
        let expected_slots: BTreeSet<u8> = (1..=slot_count).collect();
        let given_slots: BTreeSet<u8> = assignments.keys().copied().collect();
        if given_slots != expected_slots {
            return Err(MatchError::InvalidAssignment(format!(
                "slots must be 1..={}",
                slot_count
            )));
        }
        let roster: BTreeSet<Uuid> = self.state.teams[t].member_ids().into_iter().collect();
        let assigned: BTreeSet<Uuid> = assignments.values().copied().collect();
        if assigned != roster {
            return Err(MatchError::InvalidAssignment(
                "every teammate must hold exactly one slot".to_string(),
            ));
        }

        let team = &mut self.state.teams[t];
        for (slot, member) in &assignments {
            if let Some(player) = team.player_mut(*member) {
                player.slot = *slot;
            }
        }
        team.slots = assignments.clone();
        team.swaps_used += 1;
        tracing::info!("Match {}: {} reassigned slots", self.state.match_id, team.name);

        out.push(Outbound::all(ServerEvent::SlotsUpdated {
            match_id: self.state.match_id,
            team_index: t,
            slots: assignments,
        }));
        Ok(())
    }

    fn anchor_call_in(&mut self, user_id: Uuid, target_slot: u8, out: &mut Vec<Outbound>) -> Result<(), MatchError> {
        self.ensure_live()?;
        let (t, _) = self.locate_human(user_id)?;
        if self.state.teams[t].anchor_id != Some(user_id) {
            return Err(MatchError::NotAnchor);
        }
        if self.state.phase != MatchPhase::AnchorDecision {
            return Err(MatchError::WrongPhase(self.state.phase));
        }
        if self.state.teams[t].anchor_callins_used >= self.rules.anchor_callins_per_match {
            return Err(MatchError::AbilityExhausted("anchor call-ins"));
        }
        if target_slot == 0 || target_slot > self.rules.slot_count(self.state.mode) {
            return Err(MatchError::InvalidSlot(target_slot));
        }

        let team = &mut self.state.teams[t];
        team.final_round_overrides.insert(target_slot, user_id);
        team.anchor_callins_used += 1;
        tracing::info!(
            "Match {}: anchor {} called into slot {}",
            self.state.match_id,
            user_id,
            target_slot
        );

        out.push(Outbound::all(ServerEvent::AnchorAbilityUsed {
            match_id: self.state.match_id,
            team_index: t,
            user_id,
            target_slot,
        }));
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Answers
    // ----------------------------------------------------------------------

    fn answer(&mut self, t: usize, p: usize, input: &str, out: &mut Vec<Outbound>) {
        let match_id = self.state.match_id;
        let quota = self.rules.quota(self.state.mode);

        let team = &mut self.state.teams[t];
        let player = &mut team.players[p];
        let question = match player.current_question.take() {
            Some(question) => question,
            None => return,
        };
        let correct = question.check(input);

        player.total += 1;
        player.questions_in_slot += 1;
        let points = if correct {
            player.streak += 1;
            player.max_streak = player.max_streak.max(player.streak);
            player.correct += 1;
            let points = points_for_streak(player.streak);
            player.score += points;
            points
        } else {
            player.streak = 0;
            0
        };
        let done = quota.map_or(false, |q| player.questions_in_slot >= q);
        if done {
            player.is_complete = true;
        }
        let (user_id, streak, player_score) = (player.user_id, player.streak, player.score);

        if correct {
            team.score += points;
            team.streak += 1;
        } else {
            team.streak = 0;
        }
        let team_score = team.score;

        let mut answerer_view = vec![user_id];
        answerer_view.extend(self.state.teams[1 - t].human_ids());
        out.push(Outbound::to(
            answerer_view,
            ServerEvent::AnswerResult {
                match_id,
                user_id,
                team_index: t,
                correct,
                points,
                streak,
                player_score,
                team_score,
            },
        ));
        out.push(Outbound::to(
            self.teammates_of(t, user_id),
            ServerEvent::TeammateAnswer {
                match_id,
                user_id,
                correct,
                points,
                team_score,
            },
        ));

        if !done {
            self.issue_question(t, p, out);
        }
    }

    fn issue_question(&mut self, t: usize, p: usize, out: &mut Vec<Outbound>) {
        let slot = self.state.current_slot;
        let operation = self
            .rules
            .slot_operation(self.state.mode, self.state.operation, slot);
        let user_id = self.state.teams[t].players[p].user_id;
        let tier = self.skill_tiers.get(&user_id).copied().unwrap_or(1);
        let question = self.questions.next(operation, tier);

        self.state.teams[t].players[p].current_question = Some(question.clone());
        if let Some(profile) = self.ai_profiles.get(&user_id).copied() {
            let delay = profile.answer_delay_ms(&mut self.rng);
            self.ai_timers.insert(user_id, delay);
        }

        out.push(Outbound::to(
            self.state.teams[t].human_ids(),
            ServerEvent::QuestionUpdate {
                match_id: self.state.match_id,
                user_id,
                slot,
                question,
            },
        ));
    }

    fn ai_answer(&mut self, user_id: Uuid, out: &mut Vec<Outbound>) {
        let (t, p) = match self.locate(user_id) {
            Ok(found) => found,
            Err(_) => return,
        };
        let expected = match &self.state.teams[t].players[p].current_question {
            Some(question) => question.answer(),
            None => return,
        };
        let correct = match self.ai_profiles.get(&user_id).copied() {
            Some(profile) => profile.answers_correctly(&mut self.rng),
            None => return,
        };
        let input = if correct { expected } else { expected + 1 };
        self.answer(t, p, &input.to_string(), out);
    }

    fn slot_quota_met(&self) -> bool {
        self.rules.quota(self.state.mode).is_some()
            && self
                .state
                .teams
                .iter()
                .all(|team| team.active_player().map_or(true, |p| p.is_complete))
    }

    // ----------------------------------------------------------------------
    // Clock
    // ----------------------------------------------------------------------

    /// Advance the clocks by `elapsed_ms`.
    pub fn tick(&mut self, elapsed_ms: u64, now: DateTime<Utc>) -> Vec<Outbound> {
        let mut out = Vec::new();
        if self.is_finished() {
            return out;
        }

        let second_before = self.state.game_clock_ms / 1000;
        self.fire_due(now, &mut out);

        let mut remaining = elapsed_ms;
        let mut steps = 0;
        while remaining > 0 && !self.is_finished() && steps < MAX_STEPS_PER_TICK {
            steps += 1;
            let step = self.next_deadline().map_or(remaining, |d| d.min(remaining));
            self.advance(step);
            remaining -= step;
            self.fire_due(now, &mut out);
        }

        if !self.is_finished() && self.state.game_clock_ms / 1000 != second_before {
            out.push(Outbound::all(self.clock_event()));
        }
        out
    }

    fn next_deadline(&self) -> Option<u64> {
        let mut next: Option<u64> = None;
        let mut consider = |value: u64| next = Some(next.map_or(value, |n| n.min(value)));

        match self.state.phase {
            MatchPhase::PostMatch => return None,
            MatchPhase::Active => match self.state.handoff_remaining_ms {
                Some(handoff) => consider(handoff),
                None => {
                    consider(self.state.relay_clock_ms);
                    for timer in self.ai_timers.values() {
                        consider(*timer);
                    }
                }
            },
            _ => consider(self.state.phase_remaining_ms),
        }

        for team in &self.state.teams {
            if team.is_abandoned() {
                consider(self.rules.forfeit_after_ms.saturating_sub(team.disconnected_ms));
            }
        }
        next
    }

    fn advance(&mut self, step: u64) {
        self.state.game_clock_ms += step;
        match self.state.phase {
            MatchPhase::PostMatch => {}
            MatchPhase::Active => match self.state.handoff_remaining_ms.as_mut() {
                Some(handoff) => *handoff = handoff.saturating_sub(step),
                None => {
                    self.state.relay_clock_ms = self.state.relay_clock_ms.saturating_sub(step);
                    for timer in self.ai_timers.values_mut() {
                        *timer = timer.saturating_sub(step);
                    }
                }
            },
            _ => {
                self.state.phase_remaining_ms = self.state.phase_remaining_ms.saturating_sub(step);
            }
        }

        for team in self.state.teams.iter_mut() {
            if team.is_abandoned() {
                team.disconnected_ms += step;
            }
        }
    }

    fn fire_due(&mut self, now: DateTime<Utc>, out: &mut Vec<Outbound>) {
        let mut steps = 0;
        while steps < MAX_STEPS_PER_TICK && self.fire_once(now, out) {
            steps += 1;
        }
    }

    /// Handle one expired deadline. Returns false when nothing was due.
    fn fire_once(&mut self, now: DateTime<Utc>, out: &mut Vec<Outbound>) -> bool {
        if self.is_finished() {
            return false;
        }

        let forfeit_after = self.rules.forfeit_after_ms;
        let timed_out: Vec<usize> = (0..2)
            .filter(|&t| {
                let team = &self.state.teams[t];
                team.is_abandoned() && team.disconnected_ms >= forfeit_after
            })
            .collect();
        match timed_out.as_slice() {
            [_, _] => {
                tracing::info!("Match {}: both teams abandoned", self.state.match_id);
                self.finish(MatchResult::Draw, None, now, out);
                return true;
            }
            [t] => {
                let side = TeamSide::from_index(*t);
                tracing::info!(
                    "Match {}: {} abandoned the match",
                    self.state.match_id,
                    self.state.teams[*t].name
                );
                self.finish(MatchResult::winner(side.opponent()), Some(side), now, out);
                return true;
            }
            _ => {}
        }

        match self.state.phase {
            MatchPhase::Active => {
                match self.state.handoff_remaining_ms {
                    Some(0) => {
                        self.state.handoff_remaining_ms = None;
                        let next = self.state.current_slot + 1;
                        self.start_slot(next, out);
                        return true;
                    }
                    Some(_) => return false,
                    None => {}
                }

                let due = self
                    .ai_timers
                    .iter()
                    .find(|(_, remaining)| **remaining == 0)
                    .map(|(user_id, _)| *user_id);
                if let Some(user_id) = due {
                    self.ai_timers.remove(&user_id);
                    self.ai_answer(user_id, out);
                    return true;
                }

                if self.state.relay_clock_ms == 0 || self.slot_quota_met() {
                    self.end_slot(now, out);
                    return true;
                }
                false
            }
            MatchPhase::PostMatch => false,
            _ if self.state.phase_remaining_ms == 0 => {
                self.end_pause(out);
                true
            }
            _ => false,
        }
    }

    fn has_anchor_decision(&self) -> bool {
        self.state.mode.is_team_mode() && self.state.teams.iter().any(|t| t.anchor_id.is_some())
    }

    fn end_pause(&mut self, out: &mut Vec<Outbound>) {
        let next_round = self.state.round + 1;
        let entering_final = next_round == self.rules.total_rounds();

        if matches!(self.state.phase, MatchPhase::Break | MatchPhase::Halftime)
            && entering_final
            && self.has_anchor_decision()
        {
            self.state.phase = MatchPhase::AnchorDecision;
            self.state.phase_remaining_ms = self.rules.anchor_decision_ms;
            tracing::debug!("Match {}: anchor decision", self.state.match_id);
            out.push(Outbound::all(self.clock_event()));
            return;
        }

        self.start_round(next_round, out);
    }

    fn start_round(&mut self, round: u32, out: &mut Vec<Outbound>) {
        self.state.round = round;
        self.state.half = if round <= self.rules.rounds_per_half { 1 } else { 2 };
        self.state.phase = MatchPhase::Active;
        self.state.phase_remaining_ms = 0;

        if round == 1 {
            tracing::info!("Match {} started ({})", self.state.match_id, self.state.mode);
            out.push(Outbound::all(ServerEvent::MatchStart {
                match_id: self.state.match_id,
                mode: self.state.mode,
                total_rounds: self.rules.total_rounds(),
            }));
        }
        tracing::debug!("Match {}: round {} started", self.state.match_id, round);
        out.push(Outbound::all(ServerEvent::RoundStart {
            match_id: self.state.match_id,
            round,
            half: self.state.half,
        }));

        self.start_slot(1, out);
    }

    fn slot_player(&self, team: &TeamState, slot: u8) -> Option<Uuid> {
        let final_round = self.state.round == self.rules.total_rounds();
        final_round
            .then(|| team.final_round_overrides.get(&slot))
            .flatten()
            .or_else(|| team.slots.get(&slot))
            .copied()
    }

    fn start_slot(&mut self, slot: u8, out: &mut Vec<Outbound>) {
        self.state.current_slot = slot;
        self.state.relay_clock_ms = self.rules.slot_ms(self.state.mode);
        self.state.handoff_remaining_ms = None;
        self.ai_timers.clear();

        let mut seats = Vec::new();
        for t in 0..2 {
            let active = self.slot_player(&self.state.teams[t], slot);
            let team = &mut self.state.teams[t];
            for player in team.players.iter_mut() {
                reset_for_slot(player);
            }
            let seat = active.and_then(|id| team.players.iter().position(|pl| pl.user_id == id));
            if let Some(p) = seat {
                team.players[p].is_active = true;
                seats.push((t, p));
            }
        }

        out.push(Outbound::all(ServerEvent::SlotChange {
            match_id: self.state.match_id,
            round: self.state.round,
            slot,
            operation: self
                .rules
                .slot_operation(self.state.mode, self.state.operation, slot),
            active_players: seats
                .iter()
                .map(|&(t, p)| self.state.teams[t].players[p].user_id)
                .collect(),
            relay_clock_ms: self.state.relay_clock_ms,
        }));

        for (t, p) in seats {
            self.issue_question(t, p, out);
        }
    }

    fn end_slot(&mut self, now: DateTime<Utc>, out: &mut Vec<Outbound>) {
        self.ai_timers.clear();
        for team in self.state.teams.iter_mut() {
            for player in team.players.iter_mut() {
                player.is_active = false;
                player.current_question = None;
            }
        }

        if self.state.current_slot < self.rules.slot_count(self.state.mode) {
            self.state.handoff_remaining_ms = Some(self.rules.handoff_ms);
            out.push(Outbound::all(ServerEvent::HandoffCountdown {
                match_id: self.state.match_id,
                next_slot: self.state.current_slot + 1,
                remaining_ms: self.rules.handoff_ms,
            }));
        } else {
            self.end_round(now, out);
        }
    }

    fn end_round(&mut self, now: DateTime<Utc>, out: &mut Vec<Outbound>) {
        let round = self.state.round;
        let (home_score, away_score) = self.state.scores();
        self.state.relay_clock_ms = 0;

        if round >= self.rules.total_rounds() {
            self.finish(MatchResult::by_score(home_score, away_score), None, now, out);
            return;
        }

        if round == self.rules.rounds_per_half {
            self.state.phase = MatchPhase::Halftime;
            self.state.phase_remaining_ms = self.rules.halftime_ms;
            tracing::debug!("Match {}: halftime {}-{}", self.state.match_id, home_score, away_score);
            out.push(Outbound::all(ServerEvent::Halftime {
                match_id: self.state.match_id,
                duration_ms: self.rules.halftime_ms,
                home_score,
                away_score,
            }));
        } else {
            self.state.phase = MatchPhase::Break;
            self.state.phase_remaining_ms = self.rules.break_ms;
            out.push(Outbound::all(ServerEvent::RoundBreak {
                match_id: self.state.match_id,
                completed_round: round,
                duration_ms: self.rules.break_ms,
                home_score,
                away_score,
            }));
        }
    }

    fn finish(
        &mut self,
        result: MatchResult,
        forfeited_by: Option<TeamSide>,
        now: DateTime<Utc>,
        out: &mut Vec<Outbound>,
    ) {
        self.ai_timers.clear();
        for team in self.state.teams.iter_mut() {
            for player in team.players.iter_mut() {
                player.is_active = false;
                player.current_question = None;
            }
        }

        let (home_score, away_score) = self.state.scores();
        let outcome = MatchOutcome {
            result,
            home_score,
            away_score,
            forfeited_by,
        };
        self.state.phase = MatchPhase::PostMatch;
        self.state.relay_clock_ms = 0;
        self.state.phase_remaining_ms = 0;
        self.state.handoff_remaining_ms = None;
        self.state.outcome = Some(outcome);
        self.state.ended_at = Some(now);

        tracing::info!(
            "Match {} ended {} ({}-{})",
            self.state.match_id,
            result.as_str(),
            home_score,
            away_score
        );
        out.push(Outbound::all(ServerEvent::MatchEnd {
            match_id: self.state.match_id,
            outcome,
            state: Box::new(self.state.clone()),
        }));
    }
}

fn reset_for_slot(player: &mut PlayerState) {
    player.is_active = false;
    player.is_complete = false;
    player.current_question = None;
    player.questions_in_slot = 0;
}

fn build_team(setup: TeamSetup, is_home: bool) -> TeamState {
    let players: Vec<PlayerState> = setup
        .players
        .iter()
        .enumerate()
        .map(|(i, p)| PlayerState {
            user_id: p.user_id,
            display_name: p.display_name.clone(),
            slot: i as u8 + 1,
            score: 0,
            correct: 0,
            total: 0,
            streak: 0,
            max_streak: 0,
            is_active: false,
            is_complete: false,
            is_igl: setup.igl_id == Some(p.user_id),
            is_anchor: setup.anchor_id == Some(p.user_id),
            // Humans count as connected once they join
            is_connected: p.is_ai,
            is_ai: p.is_ai,
            current_question: None,
            questions_in_slot: 0,
        })
        .collect();

    TeamState {
        team_id: setup.team_id,
        name: setup.name,
        tag: setup.tag,
        is_home,
        score: 0,
        streak: 0,
        timeouts_used: 0,
        swaps_used: 0,
        anchor_callins_used: 0,
        slots: players.iter().map(|p| (p.slot, p.user_id)).collect(),
        final_round_overrides: BTreeMap::new(),
        players,
        party_ids: setup.party_ids,
        rating: setup.rating,
        igl_id: setup.igl_id,
        anchor_id: setup.anchor_id,
        disconnected_ms: 0,
    }
}
