// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "fennec",
    version,
    about = "Voice-driven smart-home agent runtime",
    long_about = "Runs the fennec agent: a unified task loop that plans tool calls, \
                  dispatches them to MCP servers, and drives a wake-word conversation."
)]
pub struct Cli {
    /// Explicit config file (merged on top of the discovered layers).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging to stderr (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Open the microphone immediately instead of waiting for an
    /// external start signal.
    #[arg(long)]
    pub listen: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the merged configuration as YAML.
    ShowConfig,
    /// Connect to the configured MCP servers and list the tool index.
    Tools,
}
