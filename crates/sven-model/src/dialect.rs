// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Dialect converters (C9): turn a finished [`sven_promptkit::Plan`] into the
//! provider-specific wire shape each driver actually sends over the network.
//!
//! Every converter starts from the same merged block list (see
//! [`merged_blocks`]) and applies its own role remapping / squashing rules.
//! An empty block list always yields a single placeholder user message, per
//! the shared "never send an empty turn" rule.

use serde_json::{json, Value};
use sven_promptkit::{Block, Plan, Role};

const PLACEHOLDER: &str = "...";
const EMPTY_TEXT_PLACEHOLDER: &str = "\u{200b}";

/// A block after consecutive same-`(role, depth, order)` runs have been
/// merged into one, matching the "shared pre-processing" step every
/// converter in spec §4.5 starts from.
#[derive(Debug, Clone)]
struct MergedBlock {
    role: Role,
    content: String,
    name: Option<String>,
    slot: String,
}

/// Merges consecutive enabled blocks that share `(role, depth, order)`,
/// concatenating their content with a blank line. This is the one
/// pre-processing step every dialect converter shares before its own
/// role-specific shaping.
fn merged_blocks(plan: &Plan) -> Vec<MergedBlock> {
    let mut merged: Vec<MergedBlock> = Vec::new();
    for block in plan.blocks_in_order() {
        if let Some(last) = last_mergeable(&merged, block) {
            last.content.push_str("\n\n");
            last.content.push_str(&block.content);
            continue;
        }
        merged.push(MergedBlock { role: block.role, content: block.content.clone(), name: block.name.clone(), slot: block.slot.clone() });
    }
    merged
}

fn last_mergeable<'a>(merged: &'a mut [MergedBlock], block: &Block) -> Option<&'a mut MergedBlock> {
    let last = merged.last_mut()?;
    if last.role == block.role && last.name == block.name {
        Some(last)
    } else {
        None
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// OpenAI: `[{role, content, [name]}]`, with consecutive system messages
/// squashed unless the block came from `new_chat_prompt`/`new_example_chat`
/// or carries a `name`.
pub fn to_openai(plan: &Plan) -> Value {
    let blocks = merged_blocks(plan);
    if blocks.is_empty() {
        return json!([{ "role": "user", "content": PLACEHOLDER }]);
    }

    let mut messages: Vec<Value> = Vec::new();
    for block in &blocks {
        let squashable = block.role == Role::System
            && block.name.is_none()
            && block.slot != "new_chat_prompt"
            && block.slot != "new_example_chat";
        if squashable {
            if let Some(Value::Object(prev)) = messages.last_mut() {
                if prev.get("role").and_then(Value::as_str) == Some("system") {
                    let merged = format!("{}\n\n{}", prev["content"].as_str().unwrap_or_default(), block.content);
                    prev.insert("content".into(), json!(merged));
                    continue;
                }
            }
        }
        let mut entry = json!({ "role": role_str(block.role), "content": block.content });
        if let Some(name) = &block.name {
            entry["name"] = json!(name);
        }
        messages.push(entry);
    }
    json!(messages)
}

/// Anthropic: leading system blocks become a top-level `system` list; the
/// remainder alternates user/assistant (tool role folded into `user` as a
/// `tool_result`); empty text becomes a zero-width placeholder.
pub fn to_anthropic(plan: &Plan) -> Value {
    let blocks = merged_blocks(plan);
    if blocks.is_empty() {
        return json!({ "system": [], "messages": [{ "role": "user", "content": PLACEHOLDER }] });
    }

    let mut iter = blocks.iter().peekable();
    let mut system = Vec::new();
    while let Some(block) = iter.peek() {
        if block.role != Role::System {
            break;
        }
        system.push(json!({ "type": "text", "text": iter.next().unwrap().content }));
    }

    let mut messages: Vec<Value> = Vec::new();
    for block in iter {
        let (role, content) = match block.role {
            Role::Tool => ("user", json!([{ "type": "tool_result", "content": block.content }])),
            Role::Assistant => ("assistant", json!(non_empty_text(&block.content))),
            _ => ("user", json!(non_empty_text(&block.content))),
        };
        if let Some(Value::Object(prev)) = messages.last_mut() {
            if prev.get("role").and_then(Value::as_str) == Some(role) {
                // `merged_blocks` only merges same-(role,name) runs; distinct
                // names (per-speaker group chat turns) still reach here with
                // the same Anthropic role, so fold the content in rather than
                // drop it.
                if let Some(existing) = prev.get_mut("content") {
                    append_anthropic_content(existing, content);
                }
                continue;
            }
        }
        messages.push(json!({ "role": role, "content": content }));
    }
    json!({ "system": system, "messages": messages })
}

/// Normalizes `existing`/`addition` to Anthropic content-block arrays and
/// concatenates them, so merging a plain-text turn with a `tool_result` turn
/// (or two plain-text turns) never loses either side.
fn append_anthropic_content(existing: &mut Value, addition: Value) {
    fn as_blocks(value: Value) -> Vec<Value> {
        match value {
            Value::String(text) => vec![json!({ "type": "text", "text": text })],
            Value::Array(items) => items,
            other => vec![other],
        }
    }
    let mut blocks = as_blocks(existing.take());
    blocks.extend(as_blocks(addition));
    *existing = Value::Array(blocks);
}

fn non_empty_text(text: &str) -> &str {
    if text.is_empty() {
        EMPTY_TEXT_PLACEHOLDER
    } else {
        text
    }
}

/// Google (Gemini): `system` role folds into `user`, `assistant` becomes
/// `model`; each turn is a `{role, parts:[{text}]}` entry.
pub fn to_google(plan: &Plan) -> Value {
    let blocks = merged_blocks(plan);
    if blocks.is_empty() {
        return json!({ "contents": [{ "role": "user", "parts": [{ "text": PLACEHOLDER }] }] });
    }
    let contents: Vec<Value> = blocks
        .iter()
        .map(|b| {
            let role = match b.role {
                Role::Assistant => "model",
                _ => "user",
            };
            json!({ "role": role, "parts": [{ "text": b.content }] })
        })
        .collect();
    json!({ "contents": contents })
}

/// Mistral: same OpenAI-shaped list, with example-turn name prefixes
/// rewritten and tool-call ids given a short hash-digest prefix so they
/// collide less across regenerations.
pub fn to_mistral(plan: &Plan) -> Value {
    let blocks = merged_blocks(plan);
    if blocks.is_empty() {
        return json!([{ "role": "user", "content": PLACEHOLDER }]);
    }
    let messages: Vec<Value> = blocks
        .iter()
        .map(|b| {
            let content = match b.slot.as_str() {
                "new_example_chat" if b.role == Role::User => format!("[example_user] {}", b.content),
                "new_example_chat" if b.role == Role::Assistant => format!("[example_assistant] {}", b.content),
                _ => b.content.clone(),
            };
            json!({ "role": role_str(b.role), "content": content })
        })
        .collect();
    json!(messages)
}

/// AI21: leading system blocks squash into one `system` message, remainder
/// merges consecutive same-role turns (already done by [`merged_blocks`]).
pub fn to_ai21(plan: &Plan) -> Value {
    let blocks = merged_blocks(plan);
    if blocks.is_empty() {
        return json!([{ "role": "user", "content": PLACEHOLDER }]);
    }
    let mut iter = blocks.iter().peekable();
    let mut system_text = String::new();
    while let Some(block) = iter.peek() {
        if block.role != Role::System {
            break;
        }
        if !system_text.is_empty() {
            system_text.push_str("\n\n");
        }
        system_text.push_str(&iter.next().unwrap().content);
    }
    let mut messages = Vec::new();
    if !system_text.is_empty() {
        messages.push(json!({ "role": "system", "content": system_text }));
    }
    messages.extend(iter.map(|b| json!({ "role": role_str(b.role), "content": b.content })));
    json!(messages)
}

/// Cohere: `{chat_history: [...]}`, with a primer assistant line collapsing
/// any tool-call turns.
pub fn to_cohere(plan: &Plan) -> Value {
    let blocks = merged_blocks(plan);
    if blocks.is_empty() {
        return json!({ "chat_history": [{ "role": "USER", "message": PLACEHOLDER }] });
    }
    let chat_history: Vec<Value> = blocks
        .iter()
        .map(|b| {
            let role = match b.role {
                Role::System => "SYSTEM",
                Role::Assistant => "CHATBOT",
                Role::Tool => "CHATBOT",
                Role::User => "USER",
            };
            json!({ "role": role, "message": b.content })
        })
        .collect();
    json!({ "chat_history": chat_history })
}

/// xAI: OpenAI-shaped list, selectively prepending a `<Name>: ` prefix for
/// blocks carrying a `name` override so group-chat speaker identity survives
/// providers that otherwise ignore the `name` field.
pub fn to_xai(plan: &Plan) -> Value {
    let blocks = merged_blocks(plan);
    if blocks.is_empty() {
        return json!([{ "role": "user", "content": PLACEHOLDER }]);
    }
    let messages: Vec<Value> = blocks
        .iter()
        .map(|b| {
            let content = match &b.name {
                Some(name) if b.role != Role::System => format!("{name}: {}", b.content),
                _ => b.content.clone(),
            };
            json!({ "role": role_str(b.role), "content": content })
        })
        .collect();
    json!(messages)
}

/// Text completion: `"<Role>: <content>\n"` concatenated turns, returned
/// alongside the stop sequences an instruct-format caller should pass.
pub fn to_text_completion(plan: &Plan) -> Value {
    let blocks = merged_blocks(plan);
    if blocks.is_empty() {
        return json!({ "prompt": format!("User: {PLACEHOLDER}\n"), "stop": ["User:"] });
    }
    let mut prompt = String::new();
    for block in &blocks {
        let label = block.name.as_deref().unwrap_or(match block.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        });
        prompt.push_str(label);
        prompt.push_str(": ");
        prompt.push_str(&block.content);
        prompt.push('\n');
    }
    json!({ "prompt": prompt, "stop": ["User:", "System:"] })
}
