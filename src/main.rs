// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands, DialectArg};
use sven_promptkit::types::{CharacterData, GenerationType, HistoryMessage, Persona, Preset};
use sven_promptkit::{CharsPerTokenEstimator, Context, InMemoryChatVariableStore, MacroEngine, PipelineBuilder};
use sven_scheduler::{
    AutoMode, InMemorySpeakerDirectory, Membership, ParticipantId, ReplyOrder, Scheduler, Store,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Plan { character, persona, preset, history, message, dialect } => {
            run_plan(&character, persona.as_deref(), preset.as_deref(), history.as_deref(), message, dialect)
        }
        Commands::DemoRound => run_demo_round().await,
    }
}

fn read_json_or_default<T: Default + serde::de::DeserializeOwned>(path: Option<&Path>, label: &str) -> anyhow::Result<T> {
    match path {
        None => Ok(T::default()),
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {label} fixture {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {label} fixture {}", path.display()))
        }
    }
}

fn run_plan(
    character_path: &Path,
    persona_path: Option<&Path>,
    preset_path: Option<&Path>,
    history_path: Option<&Path>,
    message: String,
    dialect: DialectArg,
) -> anyhow::Result<()> {
    let character_raw = std::fs::read_to_string(character_path)
        .with_context(|| format!("reading character fixture {}", character_path.display()))?;
    let character: CharacterData = serde_json::from_str(&character_raw)
        .with_context(|| format!("parsing character fixture {}", character_path.display()))?;
    let persona: Persona = read_json_or_default(persona_path, "persona")?;
    let preset: Preset = read_json_or_default(preset_path, "preset")?;
    let history: Vec<HistoryMessage> = read_json_or_default(history_path, "history")?;

    let ctx = Context::new(
        character,
        persona,
        history,
        message,
        preset,
        GenerationType::Normal,
        None,
        Arc::new(InMemoryChatVariableStore::new()),
        Arc::new(CharsPerTokenEstimator::new(4)),
        42,
        0,
        false,
        MacroEngine::new(),
    );

    let pipeline = PipelineBuilder::new().build();
    let plan = pipeline.run(ctx, Vec::new()).map_err(|e| anyhow::anyhow!("pipeline failed: {e}"))?;

    let wire = match dialect {
        DialectArg::Openai => sven_model::dialect::to_openai(&plan),
        DialectArg::Anthropic => sven_model::dialect::to_anthropic(&plan),
        DialectArg::Google => sven_model::dialect::to_google(&plan),
        DialectArg::Mistral => sven_model::dialect::to_mistral(&plan),
        DialectArg::Ai21 => sven_model::dialect::to_ai21(&plan),
        DialectArg::Cohere => sven_model::dialect::to_cohere(&plan),
        DialectArg::Xai => sven_model::dialect::to_xai(&plan),
        DialectArg::Text => sven_model::dialect::to_text_completion(&plan),
    };

    let report = serde_json::json!({
        "wire": wire,
        "trim_report": plan.trim_report,
        "warnings": plan.warnings,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Scenario 4 of spec §8: three auto-responding participants, one skip, one
/// force-talk insert — walked end to end against the in-memory store.
async fn run_demo_round() -> anyhow::Result<()> {
    let store = Arc::new(Store::new());
    let directory = Arc::new(InMemorySpeakerDirectory::new());

    let alice = ParticipantId::new();
    let bob = ParticipantId::new();
    let carol = ParticipantId::new();
    for id in [alice, bob, carol] {
        directory.add_membership(Membership {
            id,
            is_human: false,
            auto: AutoMode::Off,
            muted: false,
            removed: false,
            has_auto_responder: true,
        });
    }
    let conversation_id = sven_scheduler::ConversationId::new();
    directory.set_queue(conversation_id, vec![alice, bob, carol]);

    let scheduler = Scheduler::new(store, directory);
    let (response, effects) = scheduler.start_round(conversation_id, None, false, ReplyOrder::Normal).await;
    print_step("start_round", &response, &effects);

    let (response, effects) = scheduler.skip_current_speaker(conversation_id, alice, None, "demo_skip", false).await;
    print_step("skip_current_speaker(alice)", &response, &effects);

    let (response, effects) = scheduler.skip_current_speaker(conversation_id, bob, None, "demo_skip", false).await;
    print_step("skip_current_speaker(bob)", &response, &effects);

    let (response, effects) = scheduler.skip_current_speaker(conversation_id, carol, None, "demo_skip", false).await;
    print_step("skip_current_speaker(carol)", &response, &effects);

    Ok(())
}

fn print_step(label: &str, response: &sven_scheduler::ServiceResponse, effects: &[sven_scheduler::Effect]) {
    println!("== {label} ==");
    println!("{}", serde_json::to_string_pretty(response).unwrap_or_default());
    for effect in effects {
        match effect {
            sven_scheduler::Effect::Broadcast(envelope) => {
                println!("  broadcast: {}", serde_json::to_string(envelope).unwrap_or_default());
            }
            sven_scheduler::Effect::KickRun(run_id) => {
                println!("  kick_run: {run_id}");
            }
        }
    }
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}
