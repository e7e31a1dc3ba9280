// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic, budget-aware prompt assembly: macro expansion, World Info
//! lore activation, insertion-at-depth, and hard context-window trimming.
//!
//! This crate has zero dependency on `sven-config` or `sven-model` so it can
//! sit underneath `sven-model`'s dialect converters in the workspace
//! dependency graph; see [`block::Role`] and [`plan::Plan::blocks_in_order`].

pub mod block;
pub mod error;
pub mod estimator;
pub mod examples;
pub mod lore;
pub mod macros;
pub mod pipeline;
pub mod plan;
pub mod trim;
pub mod types;
pub mod vars;

pub use block::{Block, BlockId, BudgetGroup, InsertionPoint, Role};
pub use error::{LoreError, PipelineError, Warning};
pub use estimator::{CharsPerTokenEstimator, TokenEstimator};
pub use examples::{ExampleGroup, ExampleTurn};
pub use lore::{CharacterLoreStrategy, LoreBook, LoreEntry, LoreResult};
pub use macros::{MacroEngine, MacroEnv, MacroValue};
pub use pipeline::{Context, Pipeline, PipelineBuilder, Stage};
pub use plan::Plan;
pub use trim::{ExamplesBehavior, TrimReport};
pub use vars::{ChatVariableStore, InMemoryChatVariableStore};
