// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-memory arena standing in for a real ORM/DB, modeled only in terms of
//! entities, keys, and constraints (spec §1 Non-goals, §3).
//!
//! One [`tokio::sync::Mutex`] per conversation serializes all state
//! mutation, matching spec §5's "conversation-scoped exclusive lock".
//! Commands take the guard, mutate, and return effects for the caller to
//! run after the guard is dropped — see [`crate::events::Effect`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::ids::{ConversationId, RunId};
use crate::round::Round;
use crate::run::ConversationRun;

/// Everything the store holds for one conversation. Guarded as a unit by
/// `locks[conversation_id]` so a command can freely mutate rounds and runs
/// together without a second lock acquisition.
#[derive(Debug, Default)]
pub struct ConversationState {
    pub rounds: Vec<Round>,
    pub runs: Vec<ConversationRun>,
}

impl ConversationState {
    pub fn active_round(&self) -> Option<&Round> {
        self.rounds.iter().rev().find(|r| r.status == crate::round::RoundStatus::Active)
    }

    pub fn active_round_mut(&mut self) -> Option<&mut Round> {
        self.rounds.iter_mut().rev().find(|r| r.status == crate::round::RoundStatus::Active)
    }

    pub fn round_mut(&mut self, id: crate::ids::RoundId) -> Option<&mut Round> {
        self.rounds.iter_mut().find(|r| r.id == id)
    }

    pub fn round(&self, id: crate::ids::RoundId) -> Option<&Round> {
        self.rounds.iter().find(|r| r.id == id)
    }

    /// spec §3: "at most one queued run per conversation".
    pub fn queued_run(&self) -> Option<&ConversationRun> {
        self.runs.iter().find(|r| r.status == crate::run::RunStatus::Queued)
    }

    pub fn queued_run_mut(&mut self) -> Option<&mut ConversationRun> {
        self.runs.iter_mut().find(|r| r.status == crate::run::RunStatus::Queued)
    }

    pub fn running_run(&self) -> Option<&ConversationRun> {
        self.runs.iter().find(|r| r.status == crate::run::RunStatus::Running)
    }

    pub fn running_run_mut(&mut self) -> Option<&mut ConversationRun> {
        self.runs.iter_mut().find(|r| r.status == crate::run::RunStatus::Running)
    }

    pub fn run_mut(&mut self, id: RunId) -> Option<&mut ConversationRun> {
        self.runs.iter_mut().find(|r| r.id == id)
    }

    pub fn run(&self, id: RunId) -> Option<&ConversationRun> {
        self.runs.iter().find(|r| r.id == id)
    }

    /// Cancel every queued run for this conversation's rounds, returning
    /// their ids (spec §4.6 StartRound/StopRound/ResumeRound/SkipCurrentSpeaker
    /// "cancel all queued runs").
    pub fn cancel_queued_runs(&mut self) -> Vec<RunId> {
        let mut canceled = Vec::new();
        for run in self.runs.iter_mut() {
            if run.status == crate::run::RunStatus::Queued {
                run.status = crate::run::RunStatus::Canceled;
                canceled.push(run.id);
            }
        }
        canceled
    }
}

#[derive(Default)]
pub struct Store {
    conversations: std::sync::RwLock<HashMap<ConversationId, Arc<Mutex<ConversationState>>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the per-conversation lock, creating an empty state the first
    /// time a conversation is touched.
    pub fn conversation(&self, id: ConversationId) -> Arc<Mutex<ConversationState>> {
        if let Some(existing) = self.conversations.read().unwrap().get(&id) {
            return existing.clone();
        }
        let mut write = self.conversations.write().unwrap();
        write
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(ConversationState::default())))
            .clone()
    }
}
