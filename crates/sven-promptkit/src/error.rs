// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// A non-fatal warning accumulated while building a Plan.
///
/// Surfaced on `Plan::warnings`; in `strict` mode the first warning
/// encountered is escalated into a [`PipelineError::Strict`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

impl Warning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Errors that fail Plan construction synchronously (spec §7 "input
/// validation" + "strict" escalation).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing character")]
    MissingCharacter,

    #[error("missing user persona")]
    MissingUser,

    #[error("unknown preset knob: {0}")]
    UnknownKnob(String),

    #[error("invalid greeting index {index}: only {available} greeting(s) available")]
    InvalidGreetingIndex { index: usize, available: usize },

    #[error("before_build hook failed: {0}")]
    HookFailed(String),

    #[error("strict mode escalated warning: {0}")]
    Strict(Warning),

    #[error("lore engine error: {0}")]
    Lore(#[from] LoreError),

    #[error("macro expansion error: {0}")]
    Macro(String),
}

/// Errors surfaced by the Lore Engine (C4). Book load failures are collected
/// as warnings per spec §4.2/§7 and never reach this type; this type is for
/// genuinely unrecoverable Lore Engine misconfiguration (caller bugs).
#[derive(Debug, Error)]
pub enum LoreError {
    #[error("lore book '{book}' failed canonical signature computation: {message}")]
    Signature { book: String, message: String },
}
