// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Run Planner / Executor (C12). The Planner is the only legal way to create
//! user-triggered Runs (spec §4.7); the Executor claims and drives a single
//! queued Run to completion, holding no conversation lock while it streams
//! (spec §5 "only the Executor is allowed to suspend").

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use sven_model::{CompletionRequest, ModelProvider, ResponseEvent};

use crate::ids::{ConversationId, MessageId, ParticipantId, RoundId, RunId};
use crate::store::{ConversationState, Store};

/// Stale-claim timeout (spec §4.7 step 1, §5 "Cancellation"). A running run
/// whose heartbeat is older than this is reclaimable.
pub const STALE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    AutoResponse,
    AutoUserResponse,
    ForceTalk,
    Regenerate,
    AutoWithoutHuman,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunErrorInfo {
    pub code: String,
    pub message: String,
}

/// spec §3 `ConversationRun.debug`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDebug {
    pub trigger: Option<String>,
    pub scheduled_by: Option<String>,
    pub expected_last_message_id: Option<MessageId>,
    pub target_message_id: Option<MessageId>,
    pub canceled_by: Option<String>,
    pub user_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRun {
    pub id: RunId,
    pub conversation_id: ConversationId,
    pub round_id: Option<RoundId>,
    pub status: RunStatus,
    pub kind: RunKind,
    pub reason: Option<String>,
    pub speaker_space_membership_id: Option<ParticipantId>,
    pub run_after: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub error: Option<RunErrorInfo>,
    pub debug: RunDebug,
}

impl ConversationRun {
    fn new(conversation_id: ConversationId, kind: RunKind, run_after: DateTime<Utc>) -> Self {
        Self {
            id: RunId::new(),
            conversation_id,
            round_id: None,
            status: RunStatus::Queued,
            kind,
            reason: None,
            speaker_space_membership_id: None,
            run_after,
            started_at: None,
            heartbeat_at: None,
            finished_at: None,
            cancel_requested_at: None,
            error: None,
            debug: RunDebug::default(),
        }
    }

    /// spec §3: "A Run is scheduler-owned iff debug.scheduled_by =
    /// \"turn_scheduler\" and conversation_round_id is set; only
    /// scheduler-owned Runs may mutate Round state."
    pub fn is_scheduler_owned(&self) -> bool {
        self.debug.scheduled_by.as_deref() == Some("turn_scheduler") && self.round_id.is_some()
    }

    /// Constructs a scheduler-owned run (spec §4.6 ScheduleSpeaker): the only
    /// kind of run allowed to mutate Round state.
    pub fn new_scheduler_owned(
        conversation_id: ConversationId,
        round_id: RoundId,
        speaker: ParticipantId,
        kind: RunKind,
        run_after: DateTime<Utc>,
    ) -> Self {
        let mut run = Self::new(conversation_id, kind, run_after);
        run.round_id = Some(round_id);
        run.speaker_space_membership_id = Some(speaker);
        run.debug.scheduled_by = Some("turn_scheduler".to_string());
        run
    }
}

/// Mid-generation user input policy (spec §4.7 end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPolicy {
    /// New message queues behind the running run; planner kicks it on success.
    Queue,
    /// Running run is cancel-requested; no partial output kept.
    Restart,
}

/// `plan_*` functions: the only legal way to create user-triggered Runs.
/// All take the already-locked [`ConversationState`] — callers acquire the
/// lock via [`Store::conversation`].
pub struct RunPlanner;

impl RunPlanner {
    /// spec §4.7 `plan_from_user_message`.
    pub fn plan_from_user_message(
        state: &mut ConversationState,
        conversation_id: ConversationId,
        manual_reply_order: bool,
        user_message_id: MessageId,
        debounce: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Option<RunId> {
        if manual_reply_order {
            return None;
        }
        if let Some(existing) = state.queued_run_mut() {
            existing.run_after = now + debounce;
            existing.debug.user_message_id = Some(user_message_id);
            return Some(existing.id);
        }
        let mut run = ConversationRun::new(conversation_id, RunKind::AutoUserResponse, now + debounce);
        run.debug.user_message_id = Some(user_message_id);
        let id = run.id;
        state.runs.push(run);
        Some(id)
    }

    /// spec §4.7 `plan_force_talk`: "always create a queued force_talk run
    /// for an explicit speaker, regardless of reply_order".
    pub fn plan_force_talk(
        state: &mut ConversationState,
        conversation_id: ConversationId,
        speaker: ParticipantId,
        delay: ChronoDuration,
        now: DateTime<Utc>,
    ) -> RunId {
        let mut run = ConversationRun::new(conversation_id, RunKind::ForceTalk, now + delay);
        run.speaker_space_membership_id = Some(speaker);
        let id = run.id;
        state.runs.push(run);
        id
    }

    /// spec §4.7 `plan_auto_without_human_followup`: "if one is already
    /// queued, do not override".
    pub fn plan_auto_without_human_followup(
        state: &mut ConversationState,
        conversation_id: ConversationId,
        trigger_message_id: MessageId,
        delay: ChronoDuration,
        now: DateTime<Utc>,
    ) -> Option<RunId> {
        if state.queued_run().is_some() {
            return None;
        }
        let mut run = ConversationRun::new(conversation_id, RunKind::AutoWithoutHuman, now + delay);
        run.debug.expected_last_message_id = Some(trigger_message_id);
        let id = run.id;
        state.runs.push(run);
        Some(id)
    }

    /// spec §4.7 `plan_regenerate`.
    pub fn plan_regenerate(
        state: &mut ConversationState,
        conversation_id: ConversationId,
        target_message_id: MessageId,
        expected_last_message_id: MessageId,
        now: DateTime<Utc>,
    ) -> RunId {
        let mut run = ConversationRun::new(conversation_id, RunKind::Regenerate, now);
        run.debug.target_message_id = Some(target_message_id);
        run.debug.expected_last_message_id = Some(expected_last_message_id);
        let id = run.id;
        state.runs.push(run);
        id
    }
}

/// Outcome of one executor pass, used by the CLI demo and tests to report
/// what happened without re-reading the store.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Succeeded { run_id: RunId, content: String },
    Skipped { run_id: RunId, code: String },
    Failed { run_id: RunId, code: String, message: String },
    Canceled { run_id: RunId, partial_kept: bool },
}

/// Drives a single claimed run to completion. Holds no conversation lock
/// while streaming; re-acquires it only for the terminal state transition
/// (spec §5).
pub struct RunExecutor {
    store: Arc<Store>,
}

impl RunExecutor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// spec §4.7 step 1: atomically transition queued → running, reclaiming
    /// a stale running run first if one exists.
    pub async fn claim_queued_run(
        &self,
        conversation_id: ConversationId,
        now: DateTime<Utc>,
    ) -> Result<RunId, crate::error::ExecutorError> {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;

        if let Some(running) = state.running_run_mut() {
            let stale = running
                .heartbeat_at
                .map(|hb| now.signed_duration_since(hb) > ChronoDuration::from_std(STALE_TIMEOUT).unwrap())
                .unwrap_or(false);
            if stale {
                warn!(%conversation_id, run_id = %running.id, "reclaiming stale running run");
                running.status = RunStatus::Failed;
                running.error = Some(RunErrorInfo {
                    code: "stale_running_run".into(),
                    message: "heartbeat exceeded stale timeout".into(),
                });
                running.cancel_requested_at = Some(now);
                running.finished_at = Some(now);
            }
        }

        let run = state.queued_run_mut().ok_or(crate::error::ExecutorError::NothingQueued)?;
        run.status = RunStatus::Running;
        run.started_at = Some(now);
        run.heartbeat_at = Some(now);
        debug!(%conversation_id, run_id = %run.id, "run claimed");
        Ok(run.id)
    }

    /// spec §4.7 step 2: guard against a stale `expected_last_message_id`.
    pub async fn check_expected_last_message(
        &self,
        conversation_id: ConversationId,
        run_id: RunId,
        current_last_message_id: Option<MessageId>,
    ) -> Result<(), crate::error::ExecutorError> {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        let run = state.run_mut(run_id).expect("run must exist after claim");
        if let Some(expected) = run.debug.expected_last_message_id {
            if Some(expected) != current_last_message_id {
                run.status = RunStatus::Skipped;
                run.error = Some(RunErrorInfo {
                    code: "expected_last_message_mismatch".into(),
                    message: "scheduler-visible last message changed since this run was planned".into(),
                });
                return Err(crate::error::ExecutorError::ExpectedLastMessageMismatch);
            }
        }
        Ok(())
    }

    /// spec §4.7 step 3-6: stream the completion, honoring cooperative
    /// cancellation at chunk boundaries, and persist the terminal state.
    /// `policy` decides whether a cancel keeps partial output (`Queue`) or
    /// discards it (`Restart`, and the ordinary user-Stop path).
    pub async fn execute(
        &self,
        conversation_id: ConversationId,
        run_id: RunId,
        provider: Arc<dyn ModelProvider>,
        request: CompletionRequest,
        policy: InputPolicy,
    ) -> ExecutionOutcome {
        let stream_result = provider.complete(request).await;
        let mut stream = match stream_result {
            Ok(s) => s,
            Err(e) => {
                return self.finish_failed(conversation_id, run_id, "provider_error", e.to_string()).await;
            }
        };

        let mut text = String::new();
        loop {
            if self.cancel_requested(conversation_id, run_id).await {
                let partial_kept = policy == InputPolicy::Queue && !text.is_empty();
                return self.finish_canceled(conversation_id, run_id, partial_kept).await;
            }
            match stream.next().await {
                Some(Ok(ResponseEvent::TextDelta(delta))) => {
                    text.push_str(&delta);
                    self.heartbeat(conversation_id, run_id).await;
                }
                Some(Ok(ResponseEvent::Done)) => break,
                Some(Ok(ResponseEvent::Error(message))) => {
                    return self.finish_failed(conversation_id, run_id, "provider_error", message).await;
                }
                Some(Ok(_)) => {
                    self.heartbeat(conversation_id, run_id).await;
                }
                Some(Err(e)) => {
                    return self.finish_failed(conversation_id, run_id, "provider_error", e.to_string()).await;
                }
                None => break,
            }
        }

        self.finish_succeeded(conversation_id, run_id, text).await
    }

    async fn cancel_requested(&self, conversation_id: ConversationId, run_id: RunId) -> bool {
        let conv = self.store.conversation(conversation_id);
        let state = conv.lock().await;
        state.run(run_id).and_then(|r| r.cancel_requested_at).is_some()
    }

    async fn heartbeat(&self, conversation_id: ConversationId, run_id: RunId) {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        if let Some(run) = state.run_mut(run_id) {
            run.heartbeat_at = Some(Utc::now());
        }
    }

    async fn finish_succeeded(&self, conversation_id: ConversationId, run_id: RunId, content: String) -> ExecutionOutcome {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        if let Some(run) = state.run_mut(run_id) {
            run.status = RunStatus::Succeeded;
            run.finished_at = Some(Utc::now());
        }
        info!(%conversation_id, %run_id, chars = content.len(), "run succeeded");
        ExecutionOutcome::Succeeded { run_id, content }
    }

    async fn finish_failed(&self, conversation_id: ConversationId, run_id: RunId, code: &str, message: String) -> ExecutionOutcome {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        if let Some(run) = state.run_mut(run_id) {
            run.status = RunStatus::Failed;
            run.error = Some(RunErrorInfo { code: code.to_string(), message: message.clone() });
            run.finished_at = Some(Utc::now());
        }
        warn!(%conversation_id, %run_id, %code, %message, "run failed");
        ExecutionOutcome::Failed { run_id, code: code.to_string(), message }
    }

    async fn finish_canceled(&self, conversation_id: ConversationId, run_id: RunId, partial_kept: bool) -> ExecutionOutcome {
        let conv = self.store.conversation(conversation_id);
        let mut state = conv.lock().await;
        if let Some(run) = state.run_mut(run_id) {
            run.status = RunStatus::Canceled;
            run.finished_at = Some(Utc::now());
        }
        debug!(%conversation_id, %run_id, partial_kept, "run canceled");
        ExecutionOutcome::Canceled { run_id, partial_kept }
    }
}

/// Request cooperative cancellation of a running run (spec §5, §4.7 policy
/// "restart"/Stop/SkipCurrentSpeaker-with-cancel_running).
pub async fn request_cancel(store: &Store, conversation_id: ConversationId, run_id: RunId, now: DateTime<Utc>) {
    let conv = store.conversation(conversation_id);
    let mut state = conv.lock().await;
    if let Some(run) = state.run_mut(run_id) {
        run.cancel_requested_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ConversationId;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-07-28T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn plan_from_user_message_respects_manual_reply_order() {
        let mut state = ConversationState::default();
        let conv = ConversationId::new();
        let result = RunPlanner::plan_from_user_message(&mut state, conv, true, MessageId::new(), ChronoDuration::seconds(1), now());
        assert!(result.is_none());
        assert!(state.queued_run().is_none());
    }

    #[tokio::test]
    async fn plan_from_user_message_extends_existing_queued_run() {
        let mut state = ConversationState::default();
        let conv = ConversationId::new();
        let first = RunPlanner::plan_from_user_message(&mut state, conv, false, MessageId::new(), ChronoDuration::seconds(1), now()).unwrap();
        let second_msg = MessageId::new();
        let second = RunPlanner::plan_from_user_message(&mut state, conv, false, second_msg, ChronoDuration::seconds(5), now()).unwrap();
        assert_eq!(first, second);
        assert_eq!(state.queued_run().unwrap().debug.user_message_id, Some(second_msg));
    }

    #[tokio::test]
    async fn plan_auto_without_human_followup_does_not_override_existing_queue() {
        let mut state = ConversationState::default();
        let conv = ConversationId::new();
        let first = RunPlanner::plan_auto_without_human_followup(&mut state, conv, MessageId::new(), ChronoDuration::seconds(1), now()).unwrap();
        let second = RunPlanner::plan_auto_without_human_followup(&mut state, conv, MessageId::new(), ChronoDuration::seconds(1), now());
        assert!(second.is_none());
        assert_eq!(state.runs.iter().filter(|r| r.id == first).count(), 1);
        assert_eq!(state.runs.len(), 1);
    }

    #[tokio::test]
    async fn claim_queued_run_requires_a_queued_run() {
        let store = Arc::new(Store::new());
        let executor = RunExecutor::new(store);
        let conv = ConversationId::new();
        let result = executor.claim_queued_run(conv, now()).await;
        assert!(matches!(result, Err(crate::error::ExecutorError::NothingQueued)));
    }

    #[tokio::test]
    async fn claim_queued_run_transitions_queued_to_running() {
        let store = Arc::new(Store::new());
        let conv = ConversationId::new();
        {
            let conv_state = store.conversation(conv);
            let mut state = conv_state.lock().await;
            RunPlanner::plan_force_talk(&mut state, conv, ParticipantId::new(), ChronoDuration::zero(), now());
        }
        let executor = RunExecutor::new(store.clone());
        let run_id = executor.claim_queued_run(conv, now()).await.unwrap();
        let conv_state = store.conversation(conv);
        let state = conv_state.lock().await;
        assert_eq!(state.run(run_id).unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn claim_queued_run_reclaims_stale_running_run() {
        let store = Arc::new(Store::new());
        let conv = ConversationId::new();
        let stale_run_id;
        {
            let conv_state = store.conversation(conv);
            let mut state = conv_state.lock().await;
            let mut stale = ConversationRun::new(conv, RunKind::AutoResponse, now());
            stale.status = RunStatus::Running;
            stale.heartbeat_at = Some(now() - ChronoDuration::seconds(300));
            stale_run_id = stale.id;
            state.runs.push(stale);
            RunPlanner::plan_force_talk(&mut state, conv, ParticipantId::new(), ChronoDuration::zero(), now());
        }
        let executor = RunExecutor::new(store.clone());
        let fresh_run_id = executor.claim_queued_run(conv, now()).await.unwrap();
        let conv_state = store.conversation(conv);
        let state = conv_state.lock().await;
        assert_eq!(state.run(stale_run_id).unwrap().status, RunStatus::Failed);
        assert_eq!(state.run(stale_run_id).unwrap().error.as_ref().unwrap().code, "stale_running_run");
        assert_eq!(state.run(fresh_run_id).unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn expected_last_message_mismatch_skips_the_run() {
        let store = Arc::new(Store::new());
        let conv = ConversationId::new();
        let expected = MessageId::new();
        let run_id;
        {
            let conv_state = store.conversation(conv);
            let mut state = conv_state.lock().await;
            let mut run = ConversationRun::new(conv, RunKind::Regenerate, now());
            run.debug.expected_last_message_id = Some(expected);
            run.status = RunStatus::Running;
            run_id = run.id;
            state.runs.push(run);
        }
        let executor = RunExecutor::new(store.clone());
        let result = executor.check_expected_last_message(conv, run_id, Some(MessageId::new())).await;
        assert!(matches!(result, Err(crate::error::ExecutorError::ExpectedLastMessageMismatch)));
        let conv_state = store.conversation(conv);
        let state = conv_state.lock().await;
        assert_eq!(state.run(run_id).unwrap().status, RunStatus::Skipped);
    }
}
