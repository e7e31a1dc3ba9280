// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Transactional turn scheduler: who speaks next, single-active-generation
//! invariants, queued generation Runs, and the interruption commands
//! (pause / resume / stop / skip / append / reorder / regenerate / force-talk).
//!
//! All conversation mutation is serialized behind one lock per conversation
//! (see [`store::Store`]); commands never broadcast directly, they return
//! [`events::Effect`]s for the caller to run once the lock is released.

pub mod commands;
pub mod directory;
pub mod error;
pub mod events;
pub mod ids;
pub mod plan_bridge;
pub mod round;
pub mod run;
pub mod store;

pub use commands::{Scheduler, USER_INPUT_DEBOUNCE};
pub use directory::{AutoMode, InMemorySpeakerDirectory, Membership, SpeakerDirectory};
pub use error::{ExecutorError, SchedulerError, ServiceResponse};
pub use events::{Effect, EventEnvelope};
pub use ids::{ConversationId, MessageId, ParticipantId, RoundId, RunId};
pub use plan_bridge::completion_request_from_plan;
pub use round::{InsertionRecord, ParticipantStatus, ReplyOrder, Round, RoundParticipant, RoundStatus, RoundView, SchedulingState};
pub use run::{ConversationRun, ExecutionOutcome, InputPolicy, RunDebug, RunErrorInfo, RunExecutor, RunKind, RunPlanner, RunStatus, STALE_TIMEOUT};
pub use store::{ConversationState, Store};
