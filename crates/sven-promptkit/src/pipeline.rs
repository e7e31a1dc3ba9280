// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt Pipeline (C7): the nine-stage middleware chain that turns a
//! Character + Persona + ChatHistory + Preset + Lore books into a Plan.
//!
//! Each stage owns the shared `Context`, mutates it, and hands it to the
//! next stage — an owned-and-returned context rather than a
//! shared-mutable-reference one, so stages can be reordered or unit-tested
//! in isolation without aliasing concerns.

use std::collections::HashMap;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::block::{Block, BudgetGroup, InsertionPoint, Role};
use crate::error::{PipelineError, Warning};
use crate::estimator::TokenEstimator;
use crate::examples;
use crate::lore::{self, LoreEngineInput, LoreResult, ScanContext};
use crate::macros::{MacroEngine, MacroEnv};
use crate::plan::Plan;
use crate::trim;
use crate::types::{CharacterData, EntryPosition, GenerationType, GroupInfo, Persona, Preset, PromptEntry};
use crate::vars::ChatVariableStore;

pub type HookFn = Arc<dyn Fn(&mut Context) -> Result<(), PipelineError> + Send + Sync>;
pub type AfterHookFn = Arc<dyn Fn(&mut Plan) -> Result<(), PipelineError> + Send + Sync>;

/// Shared, mutable build state threaded through the nine stages.
pub struct Context {
    pub character: CharacterData,
    pub persona: Persona,
    pub history: Vec<crate::types::HistoryMessage>,
    pub current_user_message: String,
    pub preset: Preset,
    pub generation_type: GenerationType,
    pub group: Option<GroupInfo>,
    pub turn_count: u32,
    pub is_mobile: bool,
    pub strict: bool,

    pub macro_engine: MacroEngine,
    pub macro_env: MacroEnv,
    pub vars: Arc<dyn ChatVariableStore>,
    pub estimator: Arc<dyn TokenEstimator>,
    pub rng: StdRng,
    pub greeting_index: usize,

    pub relative_entries: Vec<PromptEntry>,
    pub in_chat_entries: Vec<PromptEntry>,
    pub forced_last_entries: Vec<PromptEntry>,

    pub lore_result: Option<LoreResult>,
    pub outlets: HashMap<String, String>,

    pub blocks: Vec<Block>,
    pub continue_blocks: Vec<Block>,
    pub plan: Option<Plan>,

    pub warnings: Vec<Warning>,
    pub before_build: Vec<HookFn>,
    pub after_build: Vec<AfterHookFn>,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        character: CharacterData,
        persona: Persona,
        history: Vec<crate::types::HistoryMessage>,
        current_user_message: String,
        preset: Preset,
        generation_type: GenerationType,
        group: Option<GroupInfo>,
        vars: Arc<dyn ChatVariableStore>,
        estimator: Arc<dyn TokenEstimator>,
        rng_seed: u64,
        turn_count: u32,
        is_mobile: bool,
        macro_engine: MacroEngine,
    ) -> Self {
        let mut macro_env = MacroEnv::new();
        macro_env.set_static("char", character.name.clone());
        macro_env.set_static("user", persona.name.clone());

        let expand_char_field = |text: &str, env: &MacroEnv| -> String {
            macro_engine.expand(text, env, false, &HashMap::new()).0
        };

        macro_env.set_static("description", expand_char_field(&character.description, &macro_env));
        macro_env.set_static("scenario", expand_char_field(&character.scenario, &macro_env));
        macro_env.set_static("personality", expand_char_field(&character.personality, &macro_env));
        macro_env.set_static("charprompt", expand_char_field(&character.system_prompt, &macro_env));
        macro_env.set_static("charinstruction", expand_char_field(&character.post_history_instructions, &macro_env));
        macro_env.set_static("charjailbreak", expand_char_field(&character.post_history_instructions, &macro_env));
        macro_env.set_static("mesexamples", expand_char_field(&character.mes_example, &macro_env));
        macro_env.set_static("mesexamplesraw", character.mes_example.clone());
        macro_env.set_static("charversion", character.character_version.clone());
        macro_env.set_static("creatornotes", character.creator_notes.clone());
        macro_env.set_static(
            "chardepthprompt",
            character.depth_prompt.as_ref().map(|d| d.prompt.clone()).unwrap_or_default(),
        );
        macro_env.set_static("persona", expand_char_field(&persona.description, &macro_env));
        let group_names = group.as_ref().map(|g| g.member_names.join(", ")).unwrap_or_default();
        macro_env.set_static("group", group_names.clone());
        let not_muted = group
            .as_ref()
            .map(|g| {
                g.member_names
                    .iter()
                    .filter(|n| !g.muted_names.contains(n))
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        macro_env.set_static("groupnotmuted", not_muted);
        macro_env.set_static("charifnotgroup", if group.is_some() { String::new() } else { character.name.clone() });
        macro_env.set_static("notchar", character.name.clone());
        macro_env.set_static("input", current_user_message.clone());
        macro_env.set_static("lastchatmessage", history.last().map(|m| m.content.clone()).unwrap_or_default());
        macro_env.set_static("maxprompt", preset.max_input_tokens.to_string());
        macro_env.set_static("lastgenerationtype", format!("{generation_type:?}").to_lowercase());
        macro_env.set_static("ismobile", if is_mobile { "true" } else { "false" });

        Self {
            character,
            persona,
            history,
            current_user_message,
            preset,
            generation_type,
            group,
            turn_count,
            is_mobile,
            strict: false,
            macro_engine,
            macro_env,
            vars,
            estimator,
            rng: StdRng::seed_from_u64(rng_seed),
            greeting_index: 0,
            relative_entries: Vec::new(),
            in_chat_entries: Vec::new(),
            forced_last_entries: Vec::new(),
            lore_result: None,
            outlets: HashMap::new(),
            blocks: Vec::new(),
            continue_blocks: Vec::new(),
            plan: None,
            warnings: Vec::new(),
            before_build: Vec::new(),
            after_build: Vec::new(),
        }
    }

    fn expand(&mut self, text: &str) -> String {
        let (out, warnings) = self.macro_engine.expand(text, &self.macro_env, false, &self.outlets);
        self.warnings.extend(warnings);
        out
    }
}

pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn run(self: Box<Self>, ctx: Context) -> Result<Context, PipelineError>;
}

struct HooksStage;
impl Stage for HooksStage {
    fn name(&self) -> &'static str {
        "hooks"
    }

    fn run(self: Box<Self>, mut ctx: Context) -> Result<Context, PipelineError> {
        if ctx.character.name.trim().is_empty() {
            return Err(PipelineError::MissingCharacter);
        }
        if ctx.persona.name.trim().is_empty() {
            return Err(PipelineError::MissingUser);
        }
        let hooks = ctx.before_build.clone();
        for hook in hooks {
            hook(&mut ctx)?;
        }
        Ok(ctx)
    }
}

struct LoreStage;
impl Stage for LoreStage {
    fn name(&self) -> &'static str {
        "lore"
    }

    fn run(self: Box<Self>, mut ctx: Context) -> Result<Context, PipelineError> {
        let mut books: Vec<lore::LoreBook> = Vec::new();
        if let Some(book) = ctx.character.lore_book.clone() {
            books.push(book);
        }

        let mut scan_messages: Vec<String> = ctx
            .history
            .iter()
            .rev()
            .take(ctx.preset.world_info_depth as usize + 1)
            .map(|m| m.content.clone())
            .collect();
        scan_messages.insert(0, ctx.current_user_message.clone());

        let mut scan_context = ScanContext::default();
        scan_context.identity.insert("char".to_string(), ctx.character.name.clone());
        scan_context.identity.insert("user".to_string(), ctx.persona.name.clone());
        scan_context.active_character_name = Some(ctx.character.name.clone());

        let estimator = ctx.estimator.clone();
        let vars = ctx.vars.clone();
        let input = LoreEngineInput {
            books,
            scan_messages,
            scan_context,
            scan_injects: Vec::new(),
            token_budget: ctx.preset.world_info_budget,
            min_activations: ctx.preset.world_info_min_activations,
            min_activations_depth_max: ctx.preset.world_info_min_activations_depth_max,
            character_lore_insertion_strategy: ctx.preset.character_lore_insertion_strategy,
            forced_activations: Vec::new(),
            estimator: estimator.as_ref(),
            vars: vars.as_ref(),
            rng: &mut ctx.rng,
        };

        let (result, warnings) = lore::run(input);
        ctx.warnings.extend(warnings);
        ctx.outlets = result.outlets.clone();
        ctx.lore_result = Some(result);
        Ok(ctx)
    }
}

struct EntriesStage;
impl Stage for EntriesStage {
    fn name(&self) -> &'static str {
        "entries"
    }

    fn run(self: Box<Self>, mut ctx: Context) -> Result<Context, PipelineError> {
        let turn_count = ctx.turn_count;
        let frequency = ctx.preset.authors_note_frequency;
        let authors_note_due = frequency == 0 || turn_count % frequency == 0;

        for entry in ctx.preset.effective_prompt_entries.clone() {
            if !entry.enabled || !entry.triggered_by(ctx.generation_type) || !entry.conditions_met(ctx.vars.as_ref()) {
                continue;
            }
            if entry.id == "authors_note" && !authors_note_due {
                continue;
            }
            if entry.id == "post_history_instructions" {
                ctx.forced_last_entries.push(entry);
                continue;
            }
            match entry.position {
                EntryPosition::InChat => ctx.in_chat_entries.push(entry),
                EntryPosition::Relative | EntryPosition::BeforePrompt | EntryPosition::InPrompt => {
                    ctx.relative_entries.push(entry)
                }
            }
        }

        ctx.relative_entries.sort_by_key(|e| e.order);
        ctx.in_chat_entries.sort_by_key(|e| e.order);
        Ok(ctx)
    }
}

fn wrap(format: &Option<String>, content: &str) -> String {
    match format {
        Some(fmt) if fmt.contains("{0}") => fmt.replace("{0}", content),
        _ => content.to_string(),
    }
}

struct PinnedGroupsStage;
impl Stage for PinnedGroupsStage {
    fn name(&self) -> &'static str {
        "pinned_groups"
    }

    fn run(self: Box<Self>, mut ctx: Context) -> Result<Context, PipelineError> {
        let mut order: i64 = 0;
        let mut next_order = || {
            order += 10;
            order
        };

        let main_prompt_content = if ctx.preset.prefer_char_prompt && !ctx.character.system_prompt.is_empty() {
            ctx.character.system_prompt.clone()
        } else {
            ctx.preset.main_prompt.clone()
        };
        if !main_prompt_content.is_empty() {
            let expanded = ctx.expand(&main_prompt_content);
            ctx.blocks.push(
                Block::new(Role::System, expanded, "main_prompt", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(next_order()),
            );
        }

        if !ctx.persona.description.is_empty() {
            let expanded = ctx.expand(&ctx.persona.description.clone());
            ctx.blocks.push(
                Block::new(Role::System, expanded, "persona_description", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(next_order()),
            );
        }

        if !ctx.character.description.is_empty() {
            let expanded = ctx.expand(&ctx.character.description.clone());
            ctx.blocks.push(
                Block::new(Role::System, expanded, "character_description", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(next_order()),
            );
        }

        if !ctx.character.personality.is_empty() {
            let wrapped = wrap(&ctx.preset.personality_format.clone(), &ctx.character.personality.clone());
            let expanded = ctx.expand(&wrapped);
            ctx.blocks.push(
                Block::new(Role::System, expanded, "character_personality", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(next_order()),
            );
        }

        if !ctx.character.scenario.is_empty() {
            let wrapped = wrap(&ctx.preset.scenario_format.clone(), &ctx.character.scenario.clone());
            let expanded = ctx.expand(&wrapped);
            ctx.blocks.push(
                Block::new(Role::System, expanded, "scenario", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(next_order()),
            );
        }

        if let Some(enhance) = ctx.preset.enhance_definitions.clone() {
            let expanded = ctx.expand(&enhance);
            ctx.blocks.push(
                Block::new(Role::System, expanded, "enhance_definitions", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(next_order()),
            );
        }

        if let Some(aux) = ctx.preset.auxiliary_prompt.clone() {
            let expanded = ctx.expand(&aux);
            ctx.blocks.push(
                Block::new(Role::System, expanded, "auxiliary_prompt", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(next_order()),
            );
        }

        let phi_content = if ctx.preset.prefer_char_instructions && !ctx.character.post_history_instructions.is_empty() {
            ctx.character.post_history_instructions.clone()
        } else {
            ctx.preset.post_history_instructions.clone()
        };
        if !phi_content.is_empty() {
            let expanded = ctx.expand(&phi_content);
            ctx.blocks.push(
                Block::new(Role::System, expanded, "post_history_instructions", InsertionPoint::Relative, BudgetGroup::System)
                    .with_priority(1000)
                    .with_order(1_000_000),
            );
        }

        if !ctx.character.mes_example.is_empty() {
            let (groups, warnings) = examples::parse(&ctx.character.mes_example.clone());
            ctx.warnings.extend(warnings);
            let group_count = groups.len();
            for (gi, group) in groups.into_iter().enumerate() {
                let group_id = format!("example-{gi}");
                if !ctx.preset.new_example_chat.is_empty() {
                    let expanded = ctx.expand(&ctx.preset.new_example_chat.clone());
                    let mut separator = Block::new(
                        Role::System,
                        expanded,
                        "examples",
                        InsertionPoint::Relative,
                        BudgetGroup::Examples,
                    )
                    .with_order(next_order())
                    .with_priority((group_count - gi) as i32);
                    separator.metadata.insert("example_block".to_string(), serde_json::json!(group_id.clone()));
                    ctx.blocks.push(separator);
                }
                for turn in group.turns {
                    let mut b = Block::new(turn.role, turn.content, "examples", InsertionPoint::Relative, BudgetGroup::Examples)
                        .with_order(next_order())
                        .with_priority((group_count - gi) as i32);
                    b.metadata.insert("example_block".to_string(), serde_json::json!(group_id.clone()));
                    ctx.blocks.push(b);
                }
            }
        }

        let mut history_blocks = Vec::new();
        for (i, msg) in ctx.history.iter().enumerate() {
            if msg.excluded_from_prompt {
                continue;
            }
            let mut b = Block::new(msg.role, msg.content.clone(), "history", InsertionPoint::InChat, BudgetGroup::History)
                .with_order(i as i64);
            if let Some(name) = &msg.name {
                b = b.with_name(name.clone());
            }
            history_blocks.push(b);
        }
        let user_order = history_blocks.len() as i64;
        let expanded_user = ctx.expand(&ctx.current_user_message.clone());
        history_blocks.push(
            Block::new(Role::User, expanded_user, "user_message", InsertionPoint::InChat, BudgetGroup::History)
                .with_order(user_order),
        );
        ctx.blocks.extend(history_blocks);

        if let Some(note) = ctx.preset.authors_note.clone() {
            let expanded = ctx.expand(&note);
            let role = ctx.preset.authors_note_role;
            ctx.blocks.push(
                Block::new(role, expanded, "authors_note", InsertionPoint::InChat, BudgetGroup::System)
                    .with_depth(ctx.preset.authors_note_depth),
            );
        }

        if let Some(lore_result) = ctx.lore_result.clone() {
            for (position, entries) in &lore_result.selected_by_position {
                if *position == lore::LorePosition::AtDepth {
                    for entry in entries {
                        let wrapped = wrap(&Some(ctx.preset.wi_format.clone()), &entry.content);
                        let expanded = ctx.expand(&wrapped);
                        ctx.blocks.push(
                            Block::new(entry.role, expanded, "world_info_at_depth", InsertionPoint::InChat, BudgetGroup::Lore)
                                .with_depth(entry.depth)
                                .with_priority(entry.constant as i32 * 100)
                                .with_order(entry.insertion_order)
                                .with_metadata("uid", serde_json::json!(entry.uid)),
                        );
                    }
                    continue;
                }
                let joined: String = entries.iter().map(|e| e.content.clone()).collect::<Vec<_>>().join("\n");
                if joined.is_empty() {
                    continue;
                }
                let wrapped = wrap(&Some(ctx.preset.wi_format.clone()), &joined);
                let expanded = ctx.expand(&wrapped);
                let position_slug = serde_json::to_value(position)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let slot = format!("world_info_{position_slug}");
                ctx.blocks.push(
                    Block::new(Role::System, expanded, slot, InsertionPoint::Relative, BudgetGroup::Lore)
                        .with_order(next_order())
                        .with_priority(entries.iter().map(|e| if e.constant { 100 } else { 0 }).max().unwrap_or(0)),
                );
            }
        }

        Ok(ctx)
    }
}

struct InjectionStage;
impl Stage for InjectionStage {
    fn name(&self) -> &'static str {
        "injection"
    }

    fn run(self: Box<Self>, mut ctx: Context) -> Result<Context, PipelineError> {
        let has_history = ctx.blocks.iter().any(|b| b.slot == "history" || b.slot == "user_message");

        if has_history {
            let base_len = ctx.blocks.iter().filter(|b| b.insertion_point == InsertionPoint::InChat).count();

            for entry in ctx.in_chat_entries.clone() {
                let idx = base_len.saturating_sub(entry.depth as usize);
                let expanded = ctx.expand(&entry.content);
                let b = Block::new(entry.role, expanded, "custom_in_chat", InsertionPoint::InChat, BudgetGroup::System)
                    .with_depth(entry.depth)
                    .with_order(idx as i64);
                ctx.blocks.push(b);
            }

            if let Some(depth_prompt) = ctx.character.depth_prompt.clone() {
                let expanded = ctx.expand(&depth_prompt.prompt);
                ctx.blocks.push(
                    Block::new(depth_prompt.role, expanded, "chardepthprompt", InsertionPoint::InChat, BudgetGroup::System)
                        .with_depth(depth_prompt.depth),
                );
            }
        }

        if ctx.generation_type == GenerationType::Continue {
            if ctx.preset.continue_prefill {
                if let Some(last_assistant) = ctx.blocks.iter_mut().rev().find(|b| b.role == Role::Assistant) {
                    last_assistant.content.push_str(&ctx.preset.continue_postfix.clone());
                }
            } else {
                let expanded = ctx.expand(&ctx.preset.continue_nudge_prompt.clone());
                ctx.continue_blocks.push(Block::new(
                    Role::System,
                    expanded,
                    "continue_nudge",
                    InsertionPoint::Relative,
                    BudgetGroup::System,
                ));
            }
        }

        if ctx.current_user_message.trim().is_empty() {
            if let Some(replacement) = ctx.preset.replace_empty_message.clone() {
                if let Some(user_block) = ctx.blocks.iter_mut().find(|b| b.slot == "user_message") {
                    user_block.content = ctx.macro_engine.expand(&replacement, &ctx.macro_env, false, &ctx.outlets).0;
                    user_block.slot = "empty_user_message_replacement".to_string();
                }
            }
        }

        let new_chat_template = if ctx.group.is_some() {
            ctx.preset.new_group_chat_prompt.clone()
        } else {
            ctx.preset.new_chat_prompt.clone()
        };
        if !new_chat_template.is_empty() {
            let expanded = ctx.expand(&new_chat_template);
            ctx.blocks.insert(
                0,
                Block::new(Role::System, expanded, "new_chat_prompt", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(-1_000_000),
            );
        }

        if ctx.group.is_some() && ctx.generation_type != GenerationType::Impersonate && !ctx.preset.group_nudge_prompt.is_empty()
        {
            let expanded = ctx.expand(&ctx.preset.group_nudge_prompt.clone());
            ctx.continue_blocks.push(Block::new(
                Role::System,
                expanded,
                "group_nudge",
                InsertionPoint::Relative,
                BudgetGroup::System,
            ));
        }

        Ok(ctx)
    }
}

struct CompilationStage;
impl Stage for CompilationStage {
    fn name(&self) -> &'static str {
        "compilation"
    }

    fn run(self: Box<Self>, mut ctx: Context) -> Result<Context, PipelineError> {
        for entry in ctx.relative_entries.clone() {
            if entry.content.trim().is_empty() {
                ctx.push_warning(Warning::new("empty_pinned_fallback", format!("entry '{}' has no content", entry.id)));
                continue;
            }
            let expanded = ctx.expand(&entry.content);
            ctx.blocks.push(
                Block::new(entry.role, expanded, "custom_prompt", InsertionPoint::Relative, BudgetGroup::System)
                    .with_order(entry.order),
            );
        }

        for entry in ctx.forced_last_entries.clone() {
            let expanded = ctx.expand(&entry.content);
            ctx.blocks.push(
                Block::new(entry.role, expanded, "forced_last", InsertionPoint::Relative, BudgetGroup::System)
                    .with_priority(1000)
                    .with_order(2_000_000),
            );
        }

        let continue_blocks = std::mem::take(&mut ctx.continue_blocks);
        ctx.blocks.extend(continue_blocks);

        ctx.blocks.sort_by(|a, b| match (a.insertion_point, b.insertion_point) {
            (InsertionPoint::Relative, InsertionPoint::Relative) => a.order.cmp(&b.order),
            (InsertionPoint::InChat, InsertionPoint::InChat) => a.order.cmp(&b.order),
            (InsertionPoint::Relative, InsertionPoint::InChat) => std::cmp::Ordering::Less,
            (InsertionPoint::InChat, InsertionPoint::Relative) => std::cmp::Ordering::Greater,
        });

        Ok(ctx)
    }
}

impl Context {
    fn push_warning(&mut self, w: Warning) {
        self.warnings.push(w);
    }
}

struct MacroExpansionStage;
impl Stage for MacroExpansionStage {
    fn name(&self) -> &'static str {
        "macro_expansion"
    }

    fn run(self: Box<Self>, ctx: Context) -> Result<Context, PipelineError> {
        // All blocks are already macro-expanded as they were built; this is
        // the documented hook point for post-pass auditing or a
        // user-supplied post-expansion callable (none registered by
        // default).
        Ok(ctx)
    }
}

struct PlanAssemblyStage;
impl Stage for PlanAssemblyStage {
    fn name(&self) -> &'static str {
        "plan_assembly"
    }

    fn run(self: Box<Self>, mut ctx: Context) -> Result<Context, PipelineError> {
        let greeting = if ctx.greeting_index == 0 {
            Some(ctx.character.first_mes.clone())
        } else {
            let alt_index = ctx.greeting_index - 1;
            match ctx.character.alternate_greetings.get(alt_index) {
                Some(g) => Some(g.clone()),
                None => {
                    return Err(PipelineError::InvalidGreetingIndex {
                        index: ctx.greeting_index,
                        available: ctx.character.alternate_greetings.len() + 1,
                    })
                }
            }
        };

        let mut plan = Plan::new(std::mem::take(&mut ctx.blocks));
        plan.outlets = ctx.outlets.clone();
        plan.lore_result = ctx.lore_result.clone();
        plan.greeting = greeting;
        plan.greeting_index = Some(ctx.greeting_index);
        plan.warnings = ctx.warnings.clone();
        ctx.plan = Some(plan);
        Ok(ctx)
    }
}

struct TrimmingStage;
impl Stage for TrimmingStage {
    fn name(&self) -> &'static str {
        "trimming"
    }

    fn run(self: Box<Self>, mut ctx: Context) -> Result<Context, PipelineError> {
        let max_input_tokens = ctx.preset.max_input_tokens;
        let overhead = ctx.preset.message_token_overhead;
        let behavior = ctx.preset.examples_behavior;
        let estimator = ctx.estimator.clone();

        if let Some(plan) = ctx.plan.as_mut() {
            let report = trim::trim(&mut plan.blocks, estimator.as_ref(), max_input_tokens, overhead, behavior);
            plan.trim_report = Some(report);
        }
        Ok(ctx)
    }
}

/// Builds the fixed nine-stage chain plus any registered hooks.
pub struct PipelineBuilder {
    before_build: Vec<HookFn>,
    after_build: Vec<AfterHookFn>,
    strict: bool,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            before_build: Vec::new(),
            after_build: Vec::new(),
            strict: false,
        }
    }

    pub fn before_build<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Context) -> Result<(), PipelineError> + Send + Sync + 'static,
    {
        self.before_build.push(Arc::new(hook));
        self
    }

    pub fn after_build<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Plan) -> Result<(), PipelineError> + Send + Sync + 'static,
    {
        self.after_build.push(Arc::new(hook));
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            after_build: self.after_build,
            strict: self.strict,
        }
    }
}

fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(HooksStage),
        Box::new(LoreStage),
        Box::new(EntriesStage),
        Box::new(PinnedGroupsStage),
        Box::new(InjectionStage),
        Box::new(CompilationStage),
        Box::new(MacroExpansionStage),
        Box::new(PlanAssemblyStage),
        Box::new(TrimmingStage),
    ]
}

pub struct Pipeline {
    after_build: Vec<AfterHookFn>,
    strict: bool,
}

impl Pipeline {
    pub fn run(&self, mut ctx: Context, before_build: Vec<HookFn>) -> Result<Plan, PipelineError> {
        ctx.before_build = before_build;
        ctx.strict = self.strict;

        for stage in default_stages() {
            let name = stage.name();
            tracing::debug!(stage = name, "prompt pipeline: running stage");
            ctx = stage.run(ctx)?;
        }

        let mut plan = ctx.plan.take().expect("plan_assembly stage always populates ctx.plan");
        for hook in &self.after_build {
            hook(&mut plan)?;
        }

        if self.strict {
            if let Some(first) = plan.warnings.first().cloned() {
                return Err(PipelineError::Strict(first));
            }
        }

        Ok(plan)
    }
}
