// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use fennec_core::{Agent, StateBroadcaster};
use fennec_mcp::McpControlPlane;
use fennec_model::{LanguageModel, OpenAiCompatModel};
use fennec_tools::builtin::{KnowledgeSearchTool, WebSearchTool};
use fennec_tools::LocalTool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::ShowConfig) = &cli.command {
        let config = fennec_config::load(cli.config.as_deref())?;
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }

    let config = fennec_config::load(cli.config.as_deref())?;

    let local_tools: Vec<(String, Arc<dyn LocalTool>)> = vec![
        ("local-web".into(), Arc::new(WebSearchTool::default())),
        ("local-rag".into(), Arc::new(KnowledgeSearchTool::default())),
    ];
    let control = Arc::new(McpControlPlane::initialize(&config.mcp, local_tools).await);

    if let Some(Commands::Tools) = &cli.command {
        for entry in control.index().all_tools() {
            println!("{:<32} {:<16} {}", entry.tool_name, entry.server_id, entry.description);
        }
        control.close().await;
        return Ok(());
    }

    let llm = Arc::new(OpenAiCompatModel::from_config(&config.model)?);
    info!(model = llm.model_name(), "language model ready");

    let agent = Agent::new(&config.tasks);
    // State events go to the log; a front-end would install its own
    // broadcaster here (e.g. a WebSocket fan-out).
    let broadcaster = StateBroadcaster::new(Arc::new(|state, data| {
        debug!(%state, %data, "state event");
    }));
    let (conversation, _dispatcher) =
        agent.wire_default_executors(llm, control, &config, broadcaster);

    agent.start();
    let conversation_task = agent.start_conversation("loop").await;
    info!(task_id = %conversation_task, "conversation task submitted");

    // The audio capabilities (`speak`, `listen`) are registered by the
    // embedding layer via agent.register_action(); without them the
    // conversation stays in standby.
    if cli.listen {
        conversation.start_listening();
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    conversation.stop_listening();
    agent.shutdown().await;
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
