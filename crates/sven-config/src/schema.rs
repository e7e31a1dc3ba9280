// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

fn default_context_window_tokens() -> u32 {
    128_000
}

fn default_reserved_response_tokens() -> u32 {
    1_024
}

fn default_max_input_tokens() -> u32 {
    126_976
}

fn default_message_token_overhead() -> u32 {
    4
}

fn default_world_info_depth() -> u32 {
    4
}

fn default_world_info_budget() -> u32 {
    1_024
}

fn default_wi_format() -> String {
    "[{0}]".to_string()
}

fn default_authors_note_frequency() -> u32 {
    0
}

fn default_new_chat_prompt() -> String {
    "[Start a new chat]".to_string()
}

fn default_new_group_chat_prompt() -> String {
    "[Start a new group chat. Group members: {{group}}]".to_string()
}

fn default_new_example_chat() -> String {
    "[Example Chat]".to_string()
}

fn default_continue_nudge_prompt() -> String {
    "[Continue the story where it left off. Don't repeat what has already happened.]"
        .to_string()
}

fn default_user_turn_debounce_ms() -> u64 {
    2_000
}

fn default_stale_timeout_secs() -> u64 {
    120
}

/// Top-level configuration: the process-wide defaults layered under whatever
/// per-conversation `Preset` the caller supplies.
///
/// Mirrors the on-disk shape: one YAML document, merged from the usual
/// search-path locations plus an explicit `--config` override (see
/// `loader::load`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Named provider configurations, keyed by an arbitrary alias.
    ///
    /// Define custom endpoints, local models, or additional accounts here and
    /// reference them by alias with `--model <key>` or `--model <key>/<model>`.
    ///
    /// ```yaml
    /// providers:
    ///   local_mistral:
    ///     provider: mistral
    ///     base_url: http://localhost:8080/v1
    ///     name: mistral-small
    ///   work_anthropic:
    ///     provider: anthropic
    ///     api_key_env: WORK_ANTHROPIC_KEY
    ///     name: claude-opus-4-5
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ModelConfig>,
}

/// Which provider dialect a `ModelConfig` speaks; also the set of converters
/// `sven_model::dialect` implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Google,
    Mistral,
    Ai21,
    Cohere,
    XAi,
    TextCompletion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier — selects both the wire dialect and the default
    /// catalog/base url. One of the eight recognized dialects.
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override. Useful for local proxies or OpenAI-compatible
    /// gateways fronting Mistral/AI21/xAI models.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,

    // ── Prompt caching ────────────────────────────────────────────────────────
    /// Attach an explicit cache-control marker to the system message.
    ///
    /// **Anthropic**: adds `"cache_control": {"type": "ephemeral"}` to the
    /// system block, which tells the API to cache the prefix up to and
    /// including that block. Other dialects cache automatically or not at
    /// all; this flag has no effect for those.
    #[serde(default = "default_true")]
    pub cache_system_prompt: bool,
    /// Use Anthropic's 1-hour extended cache TTL instead of the default 5m.
    #[serde(default)]
    pub extended_cache_time: bool,
    /// Cache the tool-definitions block.
    #[serde(default = "default_true")]
    pub cache_tools: bool,
    /// Cache a rolling window of the conversation history, not just the
    /// leading system block.
    #[serde(default = "default_true")]
    pub cache_conversation: bool,
    /// Include image content parts under the cached prefix.
    #[serde(default)]
    pub cache_images: bool,
    /// Include tool-result content parts under the cached prefix.
    #[serde(default)]
    pub cache_tool_results: bool,

    /// Driver-specific options passed through verbatim (e.g. Google
    /// `thoughtSignature` toggles, Cohere connector ids).
    #[serde(default)]
    pub driver_options: HashMap<String, serde_json::Value>,

    /// Path to a recorded-response fixture file, used by the `mock` provider
    /// in tests instead of performing network calls.
    pub mock_responses_file: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            // OpenAI is the most broadly compatible default: its wire format
            // is also what Mistral/AI21/xAI/local gateways emulate.
            provider: "openai".to_string(),
            name: "gpt-4o".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            api_key: None,
            base_url: None,
            max_tokens: None,
            temperature: None,
            cache_system_prompt: true,
            extended_cache_time: false,
            cache_tools: true,
            cache_conversation: true,
            cache_images: false,
            cache_tool_results: false,
            driver_options: HashMap::new(),
            mock_responses_file: None,
        }
    }
}

/// Scheduler-wide tunables that are not per-conversation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Debounce window applied to `plan_from_user_message`: a user message
    /// upserts the single queued run's `run_after` to `now + this`.
    #[serde(default = "default_user_turn_debounce_ms")]
    pub user_turn_debounce_ms: u64,
    /// A `running` run whose `heartbeat_at` is older than this is considered
    /// stale and reclaimable by another worker.
    #[serde(default = "default_stale_timeout_secs")]
    pub stale_timeout_secs: u64,
    /// Mid-generation user input policy.
    #[serde(default)]
    pub during_generation_user_input_policy: InputPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            user_turn_debounce_ms: default_user_turn_debounce_ms(),
            stale_timeout_secs: default_stale_timeout_secs(),
            during_generation_user_input_policy: InputPolicy::default(),
        }
    }
}

/// Policy governing what happens when a user message arrives while a run is
/// still generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPolicy {
    /// Queue the new message; it is kicked once the running run succeeds.
    #[default]
    Queue,
    /// Cancel-request the running run; no partial output is persisted.
    Restart,
}

// ─── Preset ──────────────────────────────────────────────────────────────────

/// How example dialog blocks behave under trimming pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamplesBehavior {
    /// Example blocks are never included in the first place.
    Disabled,
    /// Example groups are the first thing evicted once over budget.
    #[default]
    GraduallyPushOut,
    /// Synonym for `gradually_push_out`; kept for preset-file compatibility.
    Trim,
    /// Example blocks are exempt from eviction.
    AlwaysKeep,
}

/// Author's note insertion target, mirrored by `LorePosition::TopOfAn` /
/// `BottomOfAn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorsNotePosition {
    AfterScenario,
    InChat,
}

/// Resolves the "character-lore ordering strategy" open question: how
/// character-scoped lore interleaves with global/chat/persona lore at the
/// same position bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterLoreStrategy {
    /// Character-book entries are merged into the bucket in normal
    /// `(constant desc, insertion_order asc, uid asc)` order alongside
    /// every other source.
    #[default]
    Interleaved,
    /// Character-book entries are selected and ordered normally, then
    /// appended after all non-character entries within each bucket.
    CharacterLast,
}

/// A named bundle of prompt templates and assembly knobs. Callers pass a
/// `Preset` value object into the pipeline; unknown on-disk keys are
/// ignored rather than rejected, so presets stay forward-compatible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,

    // ── Templates ─────────────────────────────────────────────────────────
    #[serde(default)]
    pub main_prompt: String,
    #[serde(default)]
    pub post_history_instructions: String,
    #[serde(default)]
    pub personality_format: String,
    #[serde(default)]
    pub scenario_format: String,
    #[serde(default = "default_new_chat_prompt")]
    pub new_chat_prompt: String,
    #[serde(default = "default_new_group_chat_prompt")]
    pub new_group_chat_prompt: String,
    #[serde(default = "default_new_example_chat")]
    pub new_example_chat: String,
    #[serde(default = "default_continue_nudge_prompt")]
    pub continue_nudge_prompt: String,
    #[serde(default)]
    pub continue_postfix: String,
    #[serde(default)]
    pub group_nudge_prompt: String,
    /// Wraps each World Info block; must contain the literal placeholder
    /// `{0}`, substituted with the joined entry content.
    #[serde(default = "default_wi_format")]
    pub wi_format: String,
    #[serde(default)]
    pub authors_note: String,
    #[serde(default = "default_authors_note_position")]
    pub authors_note_position: AuthorsNotePosition,
    #[serde(default)]
    pub authors_note_depth: u32,
    #[serde(default = "default_authors_note_role")]
    pub authors_note_role: crate::Role,
    /// 0 disables the note entirely; non-zero requires
    /// `turn_count mod frequency == 0`.
    #[serde(default = "default_authors_note_frequency")]
    pub authors_note_frequency: u32,
    #[serde(default)]
    pub authors_note_allow_wi_scan: bool,
    #[serde(default)]
    pub enhance_definitions: String,
    #[serde(default)]
    pub auxiliary_prompt: String,
    #[serde(default)]
    pub replace_empty_message: String,

    // ── Budget ────────────────────────────────────────────────────────────
    #[serde(default = "default_context_window_tokens")]
    pub context_window_tokens: u32,
    #[serde(default = "default_reserved_response_tokens")]
    pub reserved_response_tokens: u32,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: u32,
    #[serde(default = "default_message_token_overhead")]
    pub message_token_overhead: u32,
    #[serde(default)]
    pub examples_behavior: ExamplesBehavior,

    // ── World Info knobs ──────────────────────────────────────────────────
    #[serde(default = "default_world_info_depth")]
    pub world_info_depth: u32,
    #[serde(default = "default_world_info_budget")]
    pub world_info_budget: u32,
    #[serde(default)]
    pub world_info_min_activations: u32,
    #[serde(default)]
    pub world_info_min_activations_depth_max: u32,
    #[serde(default)]
    pub world_info_use_group_scoring: bool,
    #[serde(default)]
    pub character_lore_insertion_strategy: CharacterLoreStrategy,
    #[serde(default)]
    pub world_info_include_names: bool,

    // ── Flags ─────────────────────────────────────────────────────────────
    #[serde(default)]
    pub prefer_char_prompt: bool,
    #[serde(default)]
    pub prefer_char_instructions: bool,
    #[serde(default)]
    pub continue_prefill: bool,

    /// Ordered list of directives describing where and whether to include a
    /// pinned group or literal content.
    #[serde(default)]
    pub effective_prompt_entries: Vec<PromptEntry>,
}

fn default_authors_note_position() -> AuthorsNotePosition {
    AuthorsNotePosition::InChat
}

fn default_authors_note_role() -> crate::Role {
    crate::Role::System
}

impl Default for Preset {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            main_prompt: String::new(),
            post_history_instructions: String::new(),
            personality_format: String::new(),
            scenario_format: String::new(),
            new_chat_prompt: default_new_chat_prompt(),
            new_group_chat_prompt: default_new_group_chat_prompt(),
            new_example_chat: default_new_example_chat(),
            continue_nudge_prompt: default_continue_nudge_prompt(),
            continue_postfix: String::new(),
            group_nudge_prompt: String::new(),
            wi_format: default_wi_format(),
            authors_note: String::new(),
            authors_note_position: default_authors_note_position(),
            authors_note_depth: 0,
            authors_note_role: default_authors_note_role(),
            authors_note_frequency: default_authors_note_frequency(),
            authors_note_allow_wi_scan: false,
            enhance_definitions: String::new(),
            auxiliary_prompt: String::new(),
            replace_empty_message: String::new(),
            context_window_tokens: default_context_window_tokens(),
            reserved_response_tokens: default_reserved_response_tokens(),
            max_input_tokens: default_max_input_tokens(),
            message_token_overhead: default_message_token_overhead(),
            examples_behavior: ExamplesBehavior::default(),
            world_info_depth: default_world_info_depth(),
            world_info_budget: default_world_info_budget(),
            world_info_min_activations: 0,
            world_info_min_activations_depth_max: 0,
            world_info_use_group_scoring: false,
            character_lore_insertion_strategy: CharacterLoreStrategy::default(),
            world_info_include_names: false,
            prefer_char_prompt: false,
            prefer_char_instructions: false,
            continue_prefill: false,
            effective_prompt_entries: Vec::new(),
        }
    }
}

/// Where a `PromptEntry`'s content is placed relative to the rest of the
/// plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptEntryPosition {
    Relative,
    InChat,
    BeforePrompt,
    InPrompt,
}

/// A generation request kind a `PromptEntry` can be gated on via `triggers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationType {
    Normal,
    Continue,
    Impersonate,
    Regenerate,
    Swipe,
    Quiet,
}

/// A preset-level directive describing where and whether to include a
/// pinned group or literal content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEntry {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default = "default_entry_role")]
    pub role: crate::Role,
    #[serde(default)]
    pub position: PromptEntryPosition,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub content: String,
    /// Generation types that activate this entry; empty means "always".
    #[serde(default)]
    pub triggers: Vec<GenerationType>,
    /// Forced-last pinned ids cannot be overridden to a different position.
    #[serde(default)]
    pub forbid_overrides: bool,
    /// Free-form conditional expression, evaluated by the macro engine's
    /// `{{if}}` grammar against the chat variable store.
    #[serde(default)]
    pub conditions: Option<String>,
}

fn default_entry_role() -> crate::Role {
    crate::Role::System
}

impl Default for PromptEntryPosition {
    fn default() -> Self {
        PromptEntryPosition::Relative
    }
}

// ─── World Info / Lore ───────────────────────────────────────────────────────

/// Precedence source of a lore book, used to resolve dedup collisions:
/// `global > chat > persona > character`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoreSource {
    Character,
    Persona,
    Chat,
    Global,
}

/// Logical combination of primary/secondary keys required for a
/// non-constant entry to activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoreLogic {
    #[default]
    AndAny,
    AndAll,
    NotAny,
    NotAll,
}

/// Where an activated entry's content is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LorePosition {
    BeforeCharDefs,
    AfterCharDefs,
    TopOfAn,
    BottomOfAn,
    BeforeExampleMessages,
    AfterExampleMessages,
    AtDepth,
}

/// A keyword-triggered World Info book: name, scan knobs, provenance, and
/// its ordered entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoreBook {
    pub name: String,
    #[serde(default = "default_world_info_depth")]
    pub scan_depth: u32,
    #[serde(default = "default_world_info_budget")]
    pub token_budget: u32,
    #[serde(default)]
    pub recursive_scanning: bool,
    pub source: LoreSource,
    #[serde(default)]
    pub entries: Vec<LoreEntry>,
}

/// A single World Info entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoreEntry {
    pub uid: u64,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub secondary_keys: Vec<String>,
    #[serde(default)]
    pub logic: LoreLogic,
    /// Always activates regardless of keyword match.
    #[serde(default)]
    pub constant: bool,
    /// Per-entry scan depth override; falls back to the book's `scan_depth`
    /// when `None`.
    #[serde(default)]
    pub scan_depth: Option<u32>,
    #[serde(default)]
    pub depth: u32,
    pub position: LorePosition,
    #[serde(default = "default_entry_role")]
    pub role: crate::Role,
    #[serde(default)]
    pub insertion_order: i64,
    /// 0.0–1.0; `None` means "always roll true" (unconditional once keys
    /// matched).
    #[serde(default)]
    pub probability: Option<f32>,
    #[serde(default)]
    pub sticky: Option<u32>,
    #[serde(default)]
    pub cooldown: Option<u32>,
    #[serde(default)]
    pub delay: Option<u32>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default = "default_true")]
    pub match_whole_words: bool,
    /// Name of an outlet this entry's content is also exported under, for
    /// `{{outlet.KEY}}` macro references.
    #[serde(default)]
    pub outlet: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_config_default_uses_openai() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.model.provider, "openai");
        assert!(cfg.model.cache_system_prompt);
    }

    #[test]
    fn preset_default_round_trips_through_yaml() {
        let preset = Preset::default();
        let yaml = serde_yaml::to_string(&preset).unwrap();
        let back: Preset = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.name, preset.name);
        assert_eq!(back.max_input_tokens, preset.max_input_tokens);
        assert_eq!(back.wi_format, "[{0}]");
    }

    #[test]
    fn preset_partial_yaml_fills_defaults() {
        let yaml = "name: minimal\n";
        let preset: Preset = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(preset.context_window_tokens, default_context_window_tokens());
        assert_eq!(preset.examples_behavior, ExamplesBehavior::GraduallyPushOut);
        assert_eq!(preset.character_lore_insertion_strategy, CharacterLoreStrategy::Interleaved);
    }

    #[test]
    fn prompt_entry_defaults_enabled_and_relative() {
        let yaml = "id: main\nname: Main Prompt\n";
        let entry: PromptEntry = serde_yaml::from_str(yaml).unwrap();
        assert!(entry.enabled);
        assert_eq!(entry.position, PromptEntryPosition::Relative);
        assert!(entry.triggers.is_empty());
    }

    #[test]
    fn lore_source_precedence_orders_global_highest() {
        let mut sources = vec![
            LoreSource::Character,
            LoreSource::Global,
            LoreSource::Chat,
            LoreSource::Persona,
        ];
        sources.sort();
        assert_eq!(
            sources,
            vec![
                LoreSource::Character,
                LoreSource::Persona,
                LoreSource::Chat,
                LoreSource::Global,
            ]
        );
    }

    #[test]
    fn lore_entry_round_trips_through_yaml() {
        let yaml = "\
uid: 1
primary_keys: [castle]
position: at_depth
content: \"A castle stands on the hill.\"
";
        let entry: LoreEntry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(entry.primary_keys, vec!["castle".to_string()]);
        assert_eq!(entry.position, LorePosition::AtDepth);
        assert_eq!(entry.logic, LoreLogic::AndAny);
        assert!(entry.match_whole_words);
    }

    #[test]
    fn model_config_driver_options_default_empty() {
        let cfg = ModelConfig::default();
        assert!(cfg.driver_options.is_empty());
    }

    #[test]
    fn scheduler_config_defaults_match_spec_constants() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.user_turn_debounce_ms, 2000);
        assert_eq!(cfg.during_generation_user_input_policy, InputPolicy::Queue);
    }
}
