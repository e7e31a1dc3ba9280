// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed errors raised by the in-memory store, standing in for the
/// DB-level constraints a real Conversation table would enforce.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no conversation {0}")]
    NoConversation(String),

    #[error("no active round for conversation {0}")]
    NoActiveRound(String),

    #[error("no round {0}")]
    NoRound(String),

    #[error("a run is already queued for this conversation")]
    AlreadyQueued,

    #[error("round {round} is missing speaker membership for position {position}")]
    MissingSpeaker { round: String, position: usize },

    #[error("reorder desired_ids do not match the editable suffix's current ids")]
    ReorderMismatch,
}

/// Errors raised while executing a claimed run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("no queued run available to claim")]
    NothingQueued,

    #[error("expected last message mismatch")]
    ExpectedLastMessageMismatch,

    #[error("provider error: {0}")]
    Provider(String),

    #[error("run was canceled")]
    Canceled,
}

/// Structured response returned by every scheduler command (spec §7:
/// "commands return a typed ServiceResponse{success/error, reason, payload}").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResponse {
    pub success: bool,
    pub reason: String,
    pub payload: serde_json::Value,
}

impl ServiceResponse {
    pub fn ok(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            reason: reason.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn ok_with(reason: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            success: true,
            reason: reason.into(),
            payload,
        }
    }

    pub fn noop(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn error(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            payload: serde_json::json!({ "error": message.into() }),
        }
    }
}
