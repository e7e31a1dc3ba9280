// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The "external query component" spec §4.6 StartRound step 2 refers to:
//! resolving which participants are schedulable right now. Kept as a narrow
//! trait so the scheduler never has to know how memberships, mutes, or
//! auto-responder settings are actually stored.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::ids::{ConversationId, ParticipantId};

/// A human member's auto-response setting (spec §4.6 AdvanceTurn "triggering
/// rules", ScheduleSpeaker "kind").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoMode {
    Off,
    Auto { remaining_steps: Option<u32> },
}

impl AutoMode {
    pub fn is_auto_with_remaining(&self) -> bool {
        matches!(self, AutoMode::Auto { remaining_steps } if remaining_steps.map(|n| n > 0).unwrap_or(true))
    }
}

#[derive(Debug, Clone)]
pub struct Membership {
    pub id: ParticipantId,
    pub is_human: bool,
    pub auto: AutoMode,
    pub muted: bool,
    pub removed: bool,
    pub has_auto_responder: bool,
}

impl Membership {
    /// spec §4.6 advance_to_next_speaker: "exists, active, not muted/removed,
    /// has an auto-responder".
    pub fn can_be_scheduled(&self) -> bool {
        !self.removed && !self.muted && self.has_auto_responder
    }
}

/// Resolves which participants exist and whether they can currently speak.
/// The scheduler treats this as a read-only external collaborator; it never
/// mutates membership state itself (HandleFailure's "disable human-auto
/// memberships" is the one exception, modeled as [`SpeakerDirectory::disable_auto`]).
pub trait SpeakerDirectory: Send + Sync {
    /// Ordered list of participants eligible to be queued for this
    /// conversation's next round (spec §4.6 StartRound step 2).
    fn activated_queue(&self, conversation: ConversationId) -> Vec<ParticipantId>;

    fn membership(&self, id: ParticipantId) -> Option<Membership>;

    /// True if "auto-without-human" mode is active for this conversation, or
    /// any human membership has `auto=auto` with remaining steps (spec §4.6
    /// AdvanceTurn "triggering rules" and handle_round_complete).
    fn auto_scheduling_enabled(&self, conversation: ConversationId) -> bool;

    /// HandleFailure "disable all human-auto memberships (via column update
    /// to avoid cascading broadcasts)".
    fn disable_auto(&self, conversation: ConversationId);
}

/// In-memory directory backing the CLI demo and integration tests. Memberships
/// are registered up front; `auto_without_human` is a conversation-level flag
/// the caller can flip directly.
#[derive(Default)]
pub struct InMemorySpeakerDirectory {
    queues: RwLock<HashMap<ConversationId, Vec<ParticipantId>>>,
    memberships: RwLock<HashMap<ParticipantId, Membership>>,
    auto_without_human: RwLock<HashMap<ConversationId, bool>>,
}

impl InMemorySpeakerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_queue(&self, conversation: ConversationId, queue: Vec<ParticipantId>) {
        self.queues.write().unwrap().insert(conversation, queue);
    }

    pub fn add_membership(&self, membership: Membership) {
        self.memberships.write().unwrap().insert(membership.id, membership);
    }

    pub fn set_auto_without_human(&self, conversation: ConversationId, enabled: bool) {
        self.auto_without_human.write().unwrap().insert(conversation, enabled);
    }
}

impl SpeakerDirectory for InMemorySpeakerDirectory {
    fn activated_queue(&self, conversation: ConversationId) -> Vec<ParticipantId> {
        self.queues.read().unwrap().get(&conversation).cloned().unwrap_or_default()
    }

    fn membership(&self, id: ParticipantId) -> Option<Membership> {
        self.memberships.read().unwrap().get(&id).cloned()
    }

    fn auto_scheduling_enabled(&self, conversation: ConversationId) -> bool {
        if self.auto_without_human.read().unwrap().get(&conversation).copied().unwrap_or(false) {
            return true;
        }
        self.memberships
            .read()
            .unwrap()
            .values()
            .any(|m| m.is_human && m.auto.is_auto_with_remaining())
    }

    fn disable_auto(&self, conversation: ConversationId) {
        let ids: Vec<ParticipantId> = self
            .queues
            .read()
            .unwrap()
            .get(&conversation)
            .cloned()
            .unwrap_or_default();
        let mut memberships = self.memberships.write().unwrap();
        for id in ids {
            if let Some(m) = memberships.get_mut(&id) {
                if m.is_human {
                    m.auto = AutoMode::Off;
                }
            }
        }
    }
}
