// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared pipeline input types: Character, Persona, ChatHistory, Preset, and
//! PromptEntry, exactly as the data model describes them. Kept local to this
//! crate (rather than imported from the config crate) so the Prompt Assembly
//! Core stays a leaf with zero dependency on sibling crates; the CLI and the
//! config crate map their own richer types into these at the call site.

use crate::block::Role;
use crate::lore::{CharacterLoreStrategy, LoreBook};
use crate::trim::ExamplesBehavior;
use crate::vars::ChatVariableStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    Normal,
    Continue,
    Impersonate,
    Regenerate,
    Swipe,
    Quiet,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DepthPrompt {
    pub prompt: String,
    pub depth: u32,
    pub role: Role,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CharacterData {
    pub name: String,
    pub description: String,
    pub personality: String,
    pub scenario: String,
    pub system_prompt: String,
    pub post_history_instructions: String,
    pub mes_example: String,
    pub first_mes: String,
    pub alternate_greetings: Vec<String>,
    pub depth_prompt: Option<DepthPrompt>,
    pub creator_notes: String,
    pub character_version: String,
    pub lore_book: Option<LoreBook>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    pub name: Option<String>,
    pub excluded_from_prompt: bool,
    pub seq: i64,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct GroupInfo {
    pub member_names: Vec<String>,
    pub muted_names: Vec<String>,
    pub current_character: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPosition {
    Relative,
    InChat,
    BeforePrompt,
    InPrompt,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PromptEntry {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub pinned: bool,
    pub role: Role,
    pub position: EntryPosition,
    pub depth: u32,
    pub order: i64,
    pub content: String,
    pub triggers: Vec<GenerationType>,
    /// Forced-last pinned ids cannot be overridden to a different position;
    /// resolved when `effective_prompt_entries` is assembled upstream, so
    /// this crate only carries the flag through, never merges on it.
    pub forbid_overrides: bool,
    /// A single `{{if VAR}}`-style variable name, truthy-checked against the
    /// chat variable store; `None` means the entry has no condition.
    pub conditions: Option<String>,
}

impl PromptEntry {
    pub fn triggered_by(&self, generation_type: GenerationType) -> bool {
        self.triggers.is_empty() || self.triggers.contains(&generation_type)
    }

    pub fn conditions_met(&self, vars: &dyn ChatVariableStore) -> bool {
        match &self.conditions {
            None => true,
            Some(var) => match vars.get(&var.to_lowercase()) {
                Some(v) => !v.is_empty() && v.to_lowercase() != "false",
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Preset {
    pub main_prompt: String,
    pub post_history_instructions: String,
    pub personality_format: Option<String>,
    pub scenario_format: Option<String>,
    pub new_chat_prompt: String,
    pub new_group_chat_prompt: String,
    pub new_example_chat: String,
    pub continue_nudge_prompt: String,
    pub continue_postfix: String,
    pub group_nudge_prompt: String,
    pub wi_format: String,
    pub authors_note: Option<String>,
    pub authors_note_depth: u32,
    pub authors_note_role: Role,
    pub authors_note_frequency: u32,
    pub authors_note_allow_wi_scan: bool,
    pub enhance_definitions: Option<String>,
    pub auxiliary_prompt: Option<String>,
    pub replace_empty_message: Option<String>,

    pub context_window_tokens: usize,
    pub reserved_response_tokens: usize,
    pub max_input_tokens: usize,
    pub message_token_overhead: usize,
    pub examples_behavior: ExamplesBehavior,

    pub world_info_depth: u32,
    pub world_info_budget: usize,
    pub world_info_min_activations: usize,
    pub world_info_min_activations_depth_max: usize,
    pub character_lore_insertion_strategy: CharacterLoreStrategy,
    pub world_info_include_names: bool,

    pub prefer_char_prompt: bool,
    pub prefer_char_instructions: bool,
    pub continue_prefill: bool,

    pub effective_prompt_entries: Vec<PromptEntry>,
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            main_prompt: String::new(),
            post_history_instructions: String::new(),
            personality_format: None,
            scenario_format: None,
            new_chat_prompt: String::new(),
            new_group_chat_prompt: String::new(),
            new_example_chat: String::new(),
            continue_nudge_prompt: String::new(),
            continue_postfix: String::new(),
            group_nudge_prompt: String::new(),
            wi_format: "{0}".to_string(),
            authors_note: None,
            authors_note_depth: 0,
            authors_note_role: Role::System,
            authors_note_frequency: 0,
            authors_note_allow_wi_scan: true,
            enhance_definitions: None,
            auxiliary_prompt: None,
            replace_empty_message: None,
            context_window_tokens: 8192,
            reserved_response_tokens: 512,
            max_input_tokens: 7680,
            message_token_overhead: 3,
            examples_behavior: ExamplesBehavior::Trim,
            world_info_depth: 4,
            world_info_budget: 1024,
            world_info_min_activations: 0,
            world_info_min_activations_depth_max: 0,
            character_lore_insertion_strategy: CharacterLoreStrategy::Interleaved,
            world_info_include_names: true,
            prefer_char_prompt: true,
            prefer_char_instructions: true,
            continue_prefill: false,
            effective_prompt_entries: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vars::InMemoryChatVariableStore;

    fn entry() -> PromptEntry {
        PromptEntry {
            id: "e1".to_string(),
            name: "entry".to_string(),
            enabled: true,
            pinned: false,
            role: Role::System,
            position: EntryPosition::Relative,
            depth: 0,
            order: 0,
            content: "x".to_string(),
            triggers: Vec::new(),
            forbid_overrides: false,
            conditions: None,
        }
    }

    #[test]
    fn no_condition_is_always_met() {
        let vars = InMemoryChatVariableStore::new();
        assert!(entry().conditions_met(&vars));
    }

    #[test]
    fn unset_variable_fails_its_condition() {
        let vars = InMemoryChatVariableStore::new();
        let mut e = entry();
        e.conditions = Some("debug_mode".to_string());
        assert!(!e.conditions_met(&vars));
    }

    #[test]
    fn truthy_variable_meets_its_condition() {
        let vars = InMemoryChatVariableStore::new();
        vars.set("debug_mode", "true".to_string());
        let mut e = entry();
        e.conditions = Some("DEBUG_MODE".to_string());
        assert!(e.conditions_met(&vars), "lookup is case-insensitive, matching the macro engine's if-VAR subset");
    }

    #[test]
    fn literal_false_does_not_meet_its_condition() {
        let vars = InMemoryChatVariableStore::new();
        vars.set("debug_mode", "false".to_string());
        let mut e = entry();
        e.conditions = Some("debug_mode".to_string());
        assert!(!e.conditions_met(&vars));
    }
}
