// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Event envelopes and the "broadcast after unlock" [`Effect`] queue.
//!
//! Commands run under the conversation lock (see [`crate::store::Store`]) and
//! never broadcast directly. Instead they append [`Effect`]s to a `Vec` that
//! the caller drains once the lock guard is dropped, matching the ordering
//! discipline in spec §5 ("Broadcasts: emitted after the lock is released").

use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ParticipantId, RoundId, RunId};

/// Normalized event envelope, spec §4.6 / §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_name: String,
    pub conversation_id: ConversationId,
    pub round_id: Option<RoundId>,
    pub run_id: Option<RunId>,
    pub trigger_message_id: Option<String>,
    pub speaker_space_membership_id: Option<ParticipantId>,
    pub reason: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_name: impl Into<String>, conversation_id: ConversationId, reason: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            conversation_id,
            round_id: None,
            run_id: None,
            trigger_message_id: None,
            speaker_space_membership_id: None,
            reason: reason.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_round(mut self, round_id: RoundId) -> Self {
        self.round_id = Some(round_id);
        self
    }

    pub fn with_run(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_speaker(mut self, speaker: ParticipantId) -> Self {
        self.speaker_space_membership_id = Some(speaker);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Work queued by a command to run after its conversation lock is released:
/// either a broadcast event, or a request to kick the executor for a run
/// that just became the conversation's sole queued/runnable run.
#[derive(Debug, Clone)]
pub enum Effect {
    Broadcast(EventEnvelope),
    KickRun(RunId),
}

pub mod event_name {
    pub const ROUND_STARTED: &str = "turn_scheduler.round_started";
    pub const ROUND_FINISHED: &str = "turn_scheduler.round_finished";
    pub const ROUND_FAILED: &str = "turn_scheduler.round_failed";
    pub const ROUND_RESUMED: &str = "turn_scheduler.round_resumed";
    pub const ROUND_SUPERSEDED: &str = "turn_scheduler.round_superseded";
    pub const PARTICIPANT_SPOKEN: &str = "turn_scheduler.participant_spoken";
    pub const PARTICIPANT_SKIPPED: &str = "turn_scheduler.participant_skipped";
    pub const TURN_ADVANCED: &str = "turn_scheduler.turn_advanced";
    pub const ADVANCE_TURN_IGNORED: &str = "turn_scheduler.advance_turn_ignored";
    pub const ADVANCE_TURN_NOOP: &str = "turn_scheduler.advance_turn_noop";
    pub const RUN_CANCELED: &str = "conversation_run.canceled";
    pub const RUN_SKIPPED: &str = "turn_scheduler.run_skipped";
}
