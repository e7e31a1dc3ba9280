// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Wire dialects a Plan can be converted to (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
pub enum DialectArg {
    Openai,
    Anthropic,
    Google,
    Mistral,
    Ai21,
    Cohere,
    Xai,
    Text,
}

#[derive(Parser, Debug)]
#[command(
    name = "loomctl",
    about = "Prompt assembly and turn-scheduling core for a multi-agent chat system",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a Plan from fixture files and print the converted dialect payload.
    Plan {
        /// Path to a CharacterData JSON fixture.
        #[arg(long)]
        character: PathBuf,
        /// Path to a Persona JSON fixture.
        #[arg(long)]
        persona: Option<PathBuf>,
        /// Path to a Preset JSON fixture; defaults to `Preset::default()`.
        #[arg(long)]
        preset: Option<PathBuf>,
        /// Path to a JSON array of HistoryMessage fixtures.
        #[arg(long)]
        history: Option<PathBuf>,
        /// The current (not-yet-in-history) user message.
        #[arg(long, default_value = "")]
        message: String,
        /// Dialect to convert the finished Plan into.
        #[arg(long, value_enum)]
        dialect: DialectArg,
    },

    /// Run an in-process three-participant StartRound/AdvanceTurn demo
    /// against the in-memory store, printing emitted event envelopes.
    DemoRound,
}
