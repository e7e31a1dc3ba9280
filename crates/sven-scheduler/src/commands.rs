// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Turn Scheduler Commands (C11): spec §4.6, one async method per command.
//! Every command acquires the conversation lock via [`Store::conversation`],
//! mutates, and returns a [`ServiceResponse`] plus the [`Effect`]s the caller
//! must run after dropping the guard.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::directory::SpeakerDirectory;
use crate::error::{SchedulerError, ServiceResponse};
use crate::events::{event_name, Effect, EventEnvelope};
use crate::ids::{ConversationId, MessageId, ParticipantId, RoundId};
use crate::round::{InsertionRecord, ParticipantStatus, ReplyOrder, Round, RoundParticipant, RoundStatus, SchedulingState};
use crate::run::{ConversationRun, RunKind, RunPlanner, RunStatus};
use crate::store::{ConversationState, Store};

/// Debounce applied to a speaker scheduled in response to user input
/// (spec §4.6 StartRound step 5).
pub const USER_INPUT_DEBOUNCE: ChronoDuration = ChronoDuration::milliseconds(600);

pub struct Scheduler {
    pub store: Arc<Store>,
    pub directory: Arc<dyn SpeakerDirectory>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, directory: Arc<dyn SpeakerDirectory>) -> Self {
        Self { store, directory }
    }

    /// spec §4.6 StartRound.
    pub async fn start_round(
        &self,
        conversation_id: ConversationId,
        trigger_message_id: Option<MessageId>,
        is_user_input: bool,
        reply_order: ReplyOrder,
    ) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let mut effects = Vec::new();

        // 1. Cancel all queued runs.
        for run_id in state.cancel_queued_runs() {
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::RUN_CANCELED, conversation_id, "start_round_supersedes").with_run(run_id),
            ));
        }

        // 2. Compute the activated queue, filtered to extant, non-removed
        // members. Muted members and members without an auto-responder are
        // still persisted into the round (spec §8 scenario 4/5: a muted
        // participant is recorded in Participants and only marked
        // `skipped{not_schedulable}` once the round actually reaches their
        // position) — full `can_be_scheduled()` is re-checked per position
        // in `advance_to_next_speaker`/`resume_round`, not here.
        let candidates: Vec<ParticipantId> = self
            .directory
            .activated_queue(conversation_id)
            .into_iter()
            .filter(|id| self.directory.membership(*id).map(|m| !m.removed).unwrap_or(false))
            .collect();

        if candidates.is_empty() {
            debug!(%conversation_id, "start_round: no eligible speakers");
            return (ServiceResponse::noop("no_eligible_speakers"), effects);
        }

        // 3. Supersede any existing active round.
        if let Some(active) = state.active_round_mut() {
            active.status = RoundStatus::Superseded;
            active.ended_reason = Some("superseded".into());
            let round_id = active.id;
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::ROUND_SUPERSEDED, conversation_id, "start_round").with_round(round_id),
            ));
        }

        // 4. Insert a fresh round with dense positions 0..n-1.
        let mut round = Round::new(reply_order, is_user_input, trigger_message_id);
        round.participants = candidates.iter().map(|id| RoundParticipant::pending(*id)).collect();
        let round_id = round.id;
        state.rounds.push(round);

        info!(%conversation_id, %round_id, speakers = candidates.len(), "round started");
        effects.push(Effect::Broadcast(
            EventEnvelope::new(event_name::ROUND_STARTED, conversation_id, "start_round").with_round(round_id),
        ));

        // 5. Broadcast queue update and schedule position 0.
        let delay = if is_user_input { USER_INPUT_DEBOUNCE } else { ChronoDuration::zero() };
        let speaker = candidates[0];
        let run_id = self.schedule_speaker(&mut state, conversation_id, round_id, speaker, delay);
        if let Some(run_id) = run_id {
            effects.push(Effect::KickRun(run_id));
        }

        (ServiceResponse::ok_with("started", serde_json::json!({ "round_id": round_id.to_string() })), effects)
    }

    /// spec §4.6 AdvanceTurn, triggered after a Message is created.
    #[allow(clippy::too_many_arguments)]
    pub async fn advance_turn(
        &self,
        conversation_id: ConversationId,
        message_run_id: Option<crate::ids::RunId>,
        message_round_id: Option<RoundId>,
        message_role_is_user: bool,
        reply_order: ReplyOrder,
        trigger_message_id: MessageId,
    ) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;

        // Stale run: message belongs to a run whose round is not the active one.
        if let (Some(_run_id), Some(msg_round_id)) = (message_run_id, message_round_id) {
            let active_id = state.active_round().map(|r| r.id);
            if active_id != Some(msg_round_id) {
                return (
                    ServiceResponse::noop("ignored_stale_run_message"),
                    vec![Effect::Broadcast(EventEnvelope::new(
                        event_name::ADVANCE_TURN_IGNORED,
                        conversation_id,
                        "ignored_stale_run_message",
                    ))],
                );
            }
        }

        if let Some(active) = state.active_round() {
            if active.scheduling_state == Some(SchedulingState::Failed) {
                return (ServiceResponse::noop("noop_failed_state"), vec![]);
            }
        }

        // Independent run: message's run has no round.
        if message_run_id.is_some() && message_round_id.is_none() {
            return (
                ServiceResponse::noop("ignored_independent_run_message"),
                vec![Effect::Broadcast(EventEnvelope::new(
                    event_name::ADVANCE_TURN_IGNORED,
                    conversation_id,
                    "ignored_independent_run_message",
                ))],
            );
        }

        if state.active_round().is_none() {
            let should_start = if message_role_is_user {
                reply_order != ReplyOrder::Manual
            } else {
                self.directory.auto_scheduling_enabled(conversation_id)
            };
            drop(state);
            if should_start {
                return self.start_round(conversation_id, Some(trigger_message_id), message_role_is_user, reply_order).await;
            }
            return (ServiceResponse::noop("noop_idle_no_trigger"), vec![]);
        }

        if state.active_round().and_then(|r| r.scheduling_state) == Some(SchedulingState::Paused) {
            let round_id = state.active_round().unwrap().id;
            let round = state.round_mut(round_id).unwrap();
            if let Some(speaker) = round.participants.get_mut(round.current_position) {
                speaker.status = ParticipantStatus::Spoken;
                speaker.spoken_at = Some(Utc::now());
            }
            while round.current_position < round.participants.len()
                && round.participants[round.current_position].status != ParticipantStatus::Pending
            {
                round.current_position += 1;
            }
            return (
                ServiceResponse::ok("paused"),
                vec![Effect::Broadcast(
                    EventEnvelope::new(event_name::TURN_ADVANCED, conversation_id, "paused").with_round(round_id),
                )],
            );
        }

        let round_id = state.active_round().unwrap().id;
        let round = state.round(round_id).unwrap();
        let current_position = round.current_position;
        if round.is_complete_at(current_position) {
            return self.handle_round_complete(&mut state, conversation_id, round_id).await;
        }

        self.advance_to_next_speaker(&mut state, conversation_id, round_id).await
    }

    /// spec §4.6 advance_to_next_speaker.
    async fn advance_to_next_speaker(
        &self,
        state: &mut tokio::sync::MutexGuard<'_, ConversationState>,
        conversation_id: ConversationId,
        round_id: RoundId,
    ) -> (ServiceResponse, Vec<Effect>) {
        let mut effects = Vec::new();
        let participant_count = state.round(round_id).unwrap().participants.len();
        let mut position = state.round(round_id).unwrap().current_position + 1;

        while position < participant_count {
            let speaker_id = state.round(round_id).unwrap().participants[position].space_membership_id;
            let membership = self.directory.membership(speaker_id);
            if membership.as_ref().map(|m| m.can_be_scheduled()).unwrap_or(false) {
                let round = state.round_mut(round_id).unwrap();
                round.scheduling_state = Some(SchedulingState::AiGenerating);
                round.current_position = position;
                if let Some(run_id) = self.schedule_speaker(state, conversation_id, round_id, speaker_id, ChronoDuration::zero()) {
                    effects.push(Effect::KickRun(run_id));
                }
                return (ServiceResponse::ok("advanced"), effects);
            }
            let round = state.round_mut(round_id).unwrap();
            round.participants[position].status = ParticipantStatus::Skipped;
            round.participants[position].skipped_at = Some(Utc::now());
            round.participants[position].skip_reason = Some("not_schedulable".into());
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::PARTICIPANT_SKIPPED, conversation_id, "not_schedulable")
                    .with_round(round_id)
                    .with_speaker(speaker_id),
            ));
            position += 1;
        }

        let (resp, more) = self.handle_round_complete(state, conversation_id, round_id).await;
        effects.extend(more);
        (resp, effects)
    }

    /// spec §4.6 handle_round_complete.
    async fn handle_round_complete(
        &self,
        state: &mut tokio::sync::MutexGuard<'_, ConversationState>,
        conversation_id: ConversationId,
        round_id: RoundId,
    ) -> (ServiceResponse, Vec<Effect>) {
        let mut effects = Vec::new();
        {
            let round = state.round_mut(round_id).unwrap();
            round.status = RoundStatus::Finished;
            round.ended_reason = Some("round_complete".into());
        }
        info!(%conversation_id, %round_id, "round finished");
        effects.push(Effect::Broadcast(
            EventEnvelope::new(event_name::ROUND_FINISHED, conversation_id, "round_complete").with_round(round_id),
        ));

        if self.directory.auto_scheduling_enabled(conversation_id) {
            let (resp, more) = self.start_round_locked(state, conversation_id, None, false, ReplyOrder::Normal);
            effects.extend(more);
            (resp, effects)
        } else {
            for run_id in state.cancel_queued_runs() {
                effects.push(Effect::Broadcast(
                    EventEnvelope::new(event_name::RUN_CANCELED, conversation_id, "round_complete").with_run(run_id),
                ));
            }
            (ServiceResponse::ok("round_finished"), effects)
        }
    }

    /// Lock-already-held variant of `start_round`, used by `handle_round_complete`
    /// which runs inside the same critical section.
    fn start_round_locked(
        &self,
        state: &mut tokio::sync::MutexGuard<'_, ConversationState>,
        conversation_id: ConversationId,
        trigger_message_id: Option<MessageId>,
        is_user_input: bool,
        reply_order: ReplyOrder,
    ) -> (ServiceResponse, Vec<Effect>) {
        let mut effects = Vec::new();
        for run_id in state.cancel_queued_runs() {
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::RUN_CANCELED, conversation_id, "start_round_supersedes").with_run(run_id),
            ));
        }
        let candidates: Vec<ParticipantId> = self
            .directory
            .activated_queue(conversation_id)
            .into_iter()
            .filter(|id| self.directory.membership(*id).map(|m| !m.removed).unwrap_or(false))
            .collect();
        if candidates.is_empty() {
            return (ServiceResponse::noop("no_eligible_speakers"), effects);
        }
        if let Some(active) = state.active_round_mut() {
            active.status = RoundStatus::Superseded;
            active.ended_reason = Some("superseded".into());
        }
        let mut round = Round::new(reply_order, is_user_input, trigger_message_id);
        round.participants = candidates.iter().map(|id| RoundParticipant::pending(*id)).collect();
        let round_id = round.id;
        state.rounds.push(round);
        effects.push(Effect::Broadcast(
            EventEnvelope::new(event_name::ROUND_STARTED, conversation_id, "start_round").with_round(round_id),
        ));
        let delay = if is_user_input { USER_INPUT_DEBOUNCE } else { ChronoDuration::zero() };
        if let Some(run_id) = self.schedule_speaker(state, conversation_id, round_id, candidates[0], delay) {
            effects.push(Effect::KickRun(run_id));
        }
        (ServiceResponse::ok_with("started", serde_json::json!({ "round_id": round_id.to_string() })), effects)
    }

    /// spec §4.6 ScheduleSpeaker. Returns `None` on the `RecordNotUnique`
    /// case (a run is already queued) per spec's "return nil".
    fn schedule_speaker(
        &self,
        state: &mut ConversationState,
        conversation_id: ConversationId,
        round_id: RoundId,
        speaker: ParticipantId,
        delay: ChronoDuration,
    ) -> Option<crate::ids::RunId> {
        if state.queued_run().is_some() {
            return None;
        }
        let membership = self.directory.membership(speaker);
        let kind = if membership.map(|m| m.is_human && m.auto.is_auto_with_remaining()).unwrap_or(false) {
            RunKind::AutoUserResponse
        } else {
            RunKind::AutoResponse
        };
        let now = Utc::now();
        let run = ConversationRun::new_scheduler_owned(conversation_id, round_id, speaker, kind, now + delay);
        let id = run.id;
        state.runs.push(run);
        // "Kick" the run only if no running run exists.
        if state.running_run().is_none() {
            Some(id)
        } else {
            None
        }
    }

    /// spec §4.6 ResumeRound.
    pub async fn resume_round(&self, conversation_id: ConversationId) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let mut effects = Vec::new();

        let Some(round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), effects);
        };
        if state.round(round_id).unwrap().scheduling_state != Some(SchedulingState::Paused) {
            return (ServiceResponse::noop("not_paused"), effects);
        }

        if let Some(queued) = state.queued_run_mut() {
            queued.status = RunStatus::Canceled;
            let run_id = queued.id;
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::RUN_CANCELED, conversation_id, "resume_round").with_run(run_id),
            ));
        }
        if state.running_run().is_some() {
            return (ServiceResponse::noop("blocked_active_run"), effects);
        }

        let participant_count = state.round(round_id).unwrap().participants.len();
        let mut position = state.round(round_id).unwrap().current_position;
        let mut scheduled = false;
        while position < participant_count {
            let speaker_id = state.round(round_id).unwrap().participants[position].space_membership_id;
            let status = state.round(round_id).unwrap().participants[position].status;
            if status != ParticipantStatus::Pending {
                position += 1;
                continue;
            }
            let schedulable = self.directory.membership(speaker_id).map(|m| m.can_be_scheduled()).unwrap_or(false);
            if schedulable {
                let round = state.round_mut(round_id).unwrap();
                round.current_position = position;
                round.scheduling_state = Some(SchedulingState::AiGenerating);
                round.resumed_at = Some(Utc::now());
                if let Some(run_id) = self.schedule_speaker(&mut state, conversation_id, round_id, speaker_id, ChronoDuration::zero()) {
                    effects.push(Effect::KickRun(run_id));
                }
                scheduled = true;
                break;
            } else {
                let round = state.round_mut(round_id).unwrap();
                round.participants[position].status = ParticipantStatus::Skipped;
                round.participants[position].skip_reason = Some("not_schedulable".into());
                position += 1;
            }
        }

        if scheduled {
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::ROUND_RESUMED, conversation_id, "resume_round").with_round(round_id),
            ));
            (ServiceResponse::ok("resumed"), effects)
        } else {
            let (resp, more) = self.handle_round_complete(&mut state, conversation_id, round_id).await;
            effects.extend(more);
            (resp, effects)
        }
    }

    /// Transitions an active, `ai_generating` round to `paused`. Spec §4.6's
    /// state diagram and ResumeRound's precondition both require this state
    /// to be reachable, but no command in §4.6 explicitly names the
    /// transition into it (Open Question, recorded in DESIGN.md) — modeled
    /// here as the explicit user-facing "pause" action.
    pub async fn pause_round(&self, conversation_id: ConversationId) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let Some(round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), vec![]);
        };
        if state.round(round_id).unwrap().scheduling_state != Some(SchedulingState::AiGenerating) {
            return (ServiceResponse::noop("not_generating"), vec![]);
        }
        state.round_mut(round_id).unwrap().scheduling_state = Some(SchedulingState::Paused);
        (ServiceResponse::ok("paused"), vec![])
    }

    /// spec §4.6 StopRound.
    pub async fn stop_round(&self, conversation_id: ConversationId, ended_reason: impl Into<String>) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let mut effects = Vec::new();

        for run_id in state.cancel_queued_runs() {
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::RUN_CANCELED, conversation_id, "stop_round").with_run(run_id),
            ));
        }

        let Some(round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), effects);
        };
        let reason = ended_reason.into();
        {
            let round = state.round_mut(round_id).unwrap();
            round.status = RoundStatus::Canceled;
            round.ended_reason = Some(reason.clone());
        }
        effects.push(Effect::Broadcast(
            EventEnvelope::new(event_name::ROUND_FAILED, conversation_id, reason).with_round(round_id),
        ));
        (ServiceResponse::ok("stopped"), effects)
    }

    /// spec §4.6 SkipCurrentSpeaker.
    pub async fn skip_current_speaker(
        &self,
        conversation_id: ConversationId,
        speaker_id: ParticipantId,
        round_id: Option<RoundId>,
        reason: impl Into<String>,
        cancel_running: bool,
    ) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let mut effects = Vec::new();

        let Some(active_round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), effects);
        };
        if let Some(requested) = round_id {
            if requested != active_round_id {
                return (ServiceResponse::noop("round_mismatch"), effects);
            }
        }
        let current_speaker = state.round(active_round_id).unwrap().current_speaker().map(|p| p.space_membership_id);
        if current_speaker != Some(speaker_id) {
            return (ServiceResponse::noop("speaker_mismatch"), effects);
        }

        if let Some(queued) = state.queued_run_mut() {
            queued.status = RunStatus::Canceled;
        }

        if let Some(running) = state.running_run_mut() {
            if cancel_running {
                running.cancel_requested_at = Some(Utc::now());
                let run_id = running.id;
                effects.push(Effect::Broadcast(
                    EventEnvelope::new(event_name::RUN_CANCELED, conversation_id, "skip_current_speaker").with_run(run_id),
                ));
            }
        }

        let reason = reason.into();
        {
            let round = state.round_mut(active_round_id).unwrap();
            let position = round.current_position;
            round.participants[position].status = ParticipantStatus::Skipped;
            round.participants[position].skipped_at = Some(Utc::now());
            round.participants[position].skip_reason = Some(reason.clone());
        }
        effects.push(Effect::Broadcast(
            EventEnvelope::new(event_name::PARTICIPANT_SKIPPED, conversation_id, reason)
                .with_round(active_round_id)
                .with_speaker(speaker_id),
        ));

        let round = state.round(active_round_id).unwrap();
        if round.is_complete_at(round.current_position) {
            let (resp, more) = self.handle_round_complete(&mut state, conversation_id, active_round_id).await;
            effects.extend(more);
            (resp, effects)
        } else {
            let (resp, more) = self.advance_to_next_speaker(&mut state, conversation_id, active_round_id).await;
            effects.extend(more);
            (resp, effects)
        }
    }

    /// spec §4.6 InsertNextSpeaker.
    pub async fn insert_next_speaker(&self, conversation_id: ConversationId, speaker_id: ParticipantId) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let Some(round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), vec![]);
        };
        let round = state.round_mut(round_id).unwrap();
        let insert_at = round.current_position + 1;
        // Shift later participants +1 in descending order to honor the
        // unique (round, position) constraint.
        round.participants.insert(insert_at.min(round.participants.len()), RoundParticipant::pending(speaker_id));
        round.insertions.push(InsertionRecord { space_membership_id: speaker_id, position: insert_at, at: Utc::now() });
        (ServiceResponse::ok("inserted"), vec![])
    }

    /// spec §4.6 AppendSpeakerToRound.
    pub async fn append_speaker_to_round(&self, conversation_id: ConversationId, speaker_id: ParticipantId) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let Some(round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), vec![]);
        };
        let round = state.round_mut(round_id).unwrap();
        let position = round.participants.len();
        round.participants.push(RoundParticipant::pending(speaker_id));
        round.insertions.push(InsertionRecord { space_membership_id: speaker_id, position, at: Utc::now() });
        (ServiceResponse::ok("appended"), vec![])
    }

    /// spec §4.6 RemovePendingParticipant.
    pub async fn remove_pending_participant(&self, conversation_id: ConversationId, speaker_id: ParticipantId) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let mut effects = Vec::new();
        let Some(round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), effects);
        };

        let (editable_from, paused) = {
            let round = state.round(round_id).unwrap();
            let paused = round.scheduling_state == Some(SchedulingState::Paused);
            (if paused { round.current_position } else { round.current_position + 1 }, paused)
        };
        let _ = paused;

        let round = state.round_mut(round_id).unwrap();
        let position = round
            .participants
            .iter()
            .position(|p| p.space_membership_id == speaker_id && p.status == ParticipantStatus::Pending);
        let Some(position) = position else {
            return (ServiceResponse::noop("not_pending"), effects);
        };
        if position < editable_from {
            return (ServiceResponse::noop("not_editable"), effects);
        }
        round.participants.remove(position);

        let now_empty = round.current_position >= round.participants.len();
        if now_empty {
            for run_id in state.cancel_queued_runs() {
                effects.push(Effect::Broadcast(
                    EventEnvelope::new(event_name::RUN_CANCELED, conversation_id, "round_queue_emptied").with_run(run_id),
                ));
            }
            let round = state.round_mut(round_id).unwrap();
            round.status = RoundStatus::Finished;
            round.ended_reason = Some("round_queue_emptied".into());
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::ROUND_FINISHED, conversation_id, "round_queue_emptied").with_round(round_id),
            ));
        }
        (ServiceResponse::ok("removed"), effects)
    }

    /// spec §4.6 ReorderPendingParticipants. Two-phase update through a temp
    /// position base, the only order safe under a unique `(round, position)`
    /// constraint.
    pub async fn reorder_pending_participants(
        &self,
        conversation_id: ConversationId,
        desired_ids: Vec<ParticipantId>,
    ) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let Some(round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), vec![]);
        };
        let round = state.round_mut(round_id).unwrap();
        let paused = round.scheduling_state == Some(SchedulingState::Paused);
        let editable_from = if paused { round.current_position } else { round.current_position + 1 };

        let editable_current: Vec<ParticipantId> =
            round.participants[editable_from.min(round.participants.len())..].iter().map(|p| p.space_membership_id).collect();

        let mut sorted_current = editable_current.clone();
        let mut sorted_desired = desired_ids.clone();
        sorted_current.sort_by_key(|id| id.0);
        sorted_desired.sort_by_key(|id| id.0);
        if editable_current.len() != desired_ids.len() || sorted_current != sorted_desired {
            return (
                ServiceResponse::error("reorder_mismatch", SchedulerError::ReorderMismatch.to_string()),
                vec![],
            );
        }

        let reordered: Vec<RoundParticipant> = desired_ids
            .iter()
            .map(|id| round.participants.iter().find(|p| p.space_membership_id == *id).unwrap().clone())
            .collect();
        round.participants.truncate(editable_from.min(round.participants.len()));
        round.participants.extend(reordered);

        (ServiceResponse::ok("reordered"), vec![])
    }

    /// spec §4.6 HandleFailure.
    pub async fn handle_failure(&self, conversation_id: ConversationId, run_id: crate::ids::RunId) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let mut effects = Vec::new();

        let Some(active_round_id) = state.active_round().map(|r| r.id) else {
            return (ServiceResponse::noop("no_active_round"), effects);
        };
        let run = state.run(run_id);
        let Some(run) = run else {
            return (ServiceResponse::noop("unknown_run"), effects);
        };
        let current_speaker = state.round(active_round_id).unwrap().current_speaker().map(|p| p.space_membership_id);
        if !run.is_scheduler_owned() || run.round_id != Some(active_round_id) || run.speaker_space_membership_id != current_speaker {
            return (ServiceResponse::noop("run_mismatch"), effects);
        }

        for run_id in state.cancel_queued_runs() {
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::RUN_CANCELED, conversation_id, "handle_failure").with_run(run_id),
            ));
        }
        self.directory.disable_auto(conversation_id);
        {
            let round = state.round_mut(active_round_id).unwrap();
            round.scheduling_state = Some(SchedulingState::Failed);
        }
        warn!(%conversation_id, round_id = %active_round_id, %run_id, "round failed, auto-scheduling disabled");
        effects.push(Effect::Broadcast(
            EventEnvelope::new(event_name::ROUND_FAILED, conversation_id, "run_failed").with_round(active_round_id),
        ));
        (ServiceResponse::ok("paused_on_failure"), effects)
    }

    /// spec §4.7 `plan_force_talk` entry point: "StartRoundForSpeaker" in the
    /// task's pending-work note — force-talk always creates a queued run for
    /// an explicit speaker regardless of `reply_order`, without going through
    /// the eligible-speaker filter StartRound applies.
    pub async fn start_round_for_speaker(
        &self,
        conversation_id: ConversationId,
        speaker_id: ParticipantId,
        delay: ChronoDuration,
    ) -> (ServiceResponse, Vec<Effect>) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let mut effects = Vec::new();

        if state.active_round().is_none() {
            let mut round = Round::new(ReplyOrder::Normal, false, None);
            round.participants = vec![RoundParticipant::pending(speaker_id)];
            let round_id = round.id;
            state.rounds.push(round);
            effects.push(Effect::Broadcast(
                EventEnvelope::new(event_name::ROUND_STARTED, conversation_id, "force_talk").with_round(round_id),
            ));
        }
        let now = Utc::now();
        let run_id = RunPlanner::plan_force_talk(&mut state, conversation_id, speaker_id, delay, now);
        if let Some(run) = state.run_mut(run_id) {
            run.round_id = state.active_round().map(|r| r.id);
        }
        if state.running_run().is_none() {
            effects.push(Effect::KickRun(run_id));
        }
        (ServiceResponse::ok_with("force_talk_scheduled", serde_json::json!({ "run_id": run_id.to_string() })), effects)
    }
}
