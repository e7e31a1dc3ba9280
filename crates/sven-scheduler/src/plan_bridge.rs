// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Adapts a finished [`sven_promptkit::Plan`] into a [`CompletionRequest`]
//! for the run executor. Dialect-specific wire shaping (tool-call squashing,
//! system-message extraction, etc.) belongs to `sven_model::dialect` (C9);
//! this is the plain role/content projection every dialect starts from.

use sven_model::{CompletionRequest, Message, MessageContent};
use sven_promptkit::{Block, Plan, Role as PromptRole};

fn map_role(role: PromptRole) -> sven_model::Role {
    match role {
        PromptRole::System => sven_model::Role::System,
        PromptRole::User => sven_model::Role::User,
        PromptRole::Assistant => sven_model::Role::Assistant,
        PromptRole::Tool => sven_model::Role::Tool,
    }
}

fn map_block(block: &Block) -> Message {
    Message {
        role: map_role(block.role),
        content: MessageContent::Text(block.content.clone()),
    }
}

/// Builds a [`CompletionRequest`] from a Plan's enabled blocks in order.
pub fn completion_request_from_plan(plan: &Plan) -> CompletionRequest {
    CompletionRequest {
        messages: plan.blocks_in_order().into_iter().map(map_block).collect(),
        tools: Vec::new(),
        stream: true,
        system_dynamic_suffix: None,
    }
}
