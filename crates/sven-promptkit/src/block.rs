// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt Block (C6): the canonical addressable unit of prompt text.
//!
//! Intentionally its own type — not re-exported from `sven-config` or
//! `sven-model` — so this crate has zero dependency on either sibling crate
//! and can sit underneath `sven-model`'s dialect converters (C9) in the
//! dependency graph.

use std::collections::HashMap;
use uuid::Uuid;

/// The speaking role of a Block, mirrored across the pipeline and the
/// dialect converters that eventually consume it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Where in the final message sequence a Block belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertionPoint {
    /// Ordered by `order` relative to other relative-point blocks.
    Relative,
    /// Injected into the chat-history block list at a computed depth index.
    InChat,
}

/// The eviction bucket a Block belongs to (C8 Trimmer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetGroup {
    /// Never evicted (spec §8 invariant).
    System,
    History,
    Examples,
    Lore,
    Custom,
}

/// Stable identity for a Block, generated once at construction and carried
/// through trimming/merging so an audit trail can be reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BlockId(pub Uuid);

impl BlockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single addressable piece of prompt text with routing metadata (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub role: Role,
    pub content: String,
    pub name: Option<String>,
    /// e.g. `history`, `user_message`, `authors_note`, `examples`,
    /// `world_info_<position>`, `new_chat_prompt`, `custom_prompt`.
    pub slot: String,
    pub insertion_point: InsertionPoint,
    pub depth: u32,
    pub order: i64,
    pub priority: i32,
    pub token_budget_group: BudgetGroup,
    pub tags: Vec<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub enabled: bool,
}

impl Block {
    pub fn new(
        role: Role,
        content: impl Into<String>,
        slot: impl Into<String>,
        insertion_point: InsertionPoint,
        token_budget_group: BudgetGroup,
    ) -> Self {
        Self {
            id: BlockId::new(),
            role,
            content: content.into(),
            name: None,
            slot: slot.into(),
            insertion_point,
            depth: 0,
            order: 0,
            priority: 0,
            token_budget_group,
            tags: Vec::new(),
            metadata: HashMap::new(),
            enabled: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}
