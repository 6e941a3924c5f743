// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use fennec_model::{ChatRequest, LanguageModel, Message, ToolSchema};

use crate::index::ToolIndex;

pub const ROUTER_SYSTEM_PROMPT: &str = "\
You are a routing engine that selects the most appropriate tool for a given task.

Your task is to analyze the task goal and environment, then call exactly ONE tool from the available tool list.

Rules:
- ALWAYS use the function calling mechanism to invoke a tool.
- Only select tools from the provided tool list.
- Do NOT invent tools or arguments.
- If no suitable tool is available or the task is already complete, explain why in a text response instead of calling a tool.

Parameter mapping:
- Map parameters from the Environment section to the tool's input schema.
- The Environment contains all available data for this task; use these values directly as tool arguments.

Home automation device mapping (for Home Assistant tools):
- The Environment may contain a list of available devices with entity_ids, friendly names, areas, and current states.
- You MUST map user-friendly device names to actual entity_ids and always pass the entity_id as the parameter value.
- If the floor is unknown, do not pass a floor parameter.
- When multiple devices match, prefer an area/location match, then friendly-name similarity, then current state.
- For cover devices (curtains, blinds, shades): position ranges 0-100, where 0 means fully closed and 100 means fully open.

Important:
- Use the function calling feature to invoke the selected tool; do not output JSON text manually.
- For home automation tasks, use the actual entity_id from the device list, never user-provided names.";

/// Compact record of one prior tool call, as the router prompt wants it.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub tool: String,
    pub success: bool,
}

/// Everything the router needs to pick the next tool.
#[derive(Debug, Clone, Default)]
pub struct RouterContext {
    pub goal: String,
    pub current_step: usize,
    pub history: Vec<HistoryEntry>,
    /// Devices, prior query results, and user-provided data rendered into
    /// the prompt as a labelled list.
    pub environment: Map<String, Value>,
}

/// The tuple the router emits per step.  `server_id == None` means "no
/// tool needed"; the caller judges the decision by its confidence.
#[derive(Debug, Clone)]
pub struct RouterDecision {
    pub server_id: Option<String>,
    pub tool: Option<String>,
    pub arguments: Map<String, Value>,
    pub confidence: f64,
    pub reasoning: String,
}

impl RouterDecision {
    fn none(confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            server_id: None,
            tool: None,
            arguments: Map::new(),
            confidence,
            reasoning: reasoning.into(),
        }
    }
}

/// Stateless façade over LLM function calling plus the tool index.
/// No retries, no backoff: the caller decides whether to accept the
/// decision based on its confidence.
pub struct Router {
    llm: Arc<dyn LanguageModel>,
    index: Arc<ToolIndex>,
}

impl Router {
    pub fn new(llm: Arc<dyn LanguageModel>, index: Arc<ToolIndex>) -> Self {
        Self { llm, index }
    }

    pub fn index(&self) -> &Arc<ToolIndex> {
        &self.index
    }

    pub fn llm(&self) -> &Arc<dyn LanguageModel> {
        &self.llm
    }

    pub async fn route(&self, context: &RouterContext) -> RouterDecision {
        debug!(goal = %context.goal, step = context.current_step, "routing");

        let all_tools = self.index.all_tools();
        if all_tools.is_empty() {
            warn!("no tools available in index");
            return RouterDecision::none(0.0, "No tools available");
        }

        let tools: Vec<ToolSchema> = all_tools
            .iter()
            .map(|t| ToolSchema {
                name: t.tool_name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            })
            .collect();

        let request = ChatRequest {
            messages: vec![
                Message::system(ROUTER_SYSTEM_PROMPT),
                Message::user(build_context_prompt(context)),
            ],
            tools,
            ..Default::default()
        };

        let response = match self.llm.chat(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "routing LLM call failed");
                return RouterDecision::none(0.0, format!("Routing error: {e}"));
            }
        };

        let call = match response.first_tool_call() {
            Some(c) => c,
            None => {
                let reasoning = response
                    .content
                    .clone()
                    .unwrap_or_else(|| "LLM did not select any tool".into());
                debug!(%reasoning, "no tool call in response");
                return RouterDecision::none(0.3, reasoning);
            }
        };

        let server_id = match self.index.server_for_tool(&call.name) {
            Some(s) => s,
            None => {
                warn!(tool = %call.name, "selected tool not in index");
                return RouterDecision::none(0.0, format!("Tool {} not in index", call.name));
            }
        };

        debug!(tool = %call.name, %server_id, "router decision");
        RouterDecision {
            reasoning: format!("Selected {} from {}", call.name, server_id),
            server_id: Some(server_id),
            tool: Some(call.name.clone()),
            arguments: call.parsed_arguments(),
            confidence: 0.8,
        }
    }
}

/// Render the router context as the user prompt.
fn build_context_prompt(context: &RouterContext) -> String {
    let mut parts = Vec::new();

    parts.push(format!("Task goal: {}", context.goal));
    parts.push(format!("Current step: {}", context.current_step));

    if !context.history.is_empty() {
        let mut lines = vec!["Previous actions:".to_string()];
        for entry in context.history.iter().rev().take(3).rev() {
            lines.push(format!("- {}: {}", entry.tool, entry.success));
        }
        parts.push(lines.join("\n"));
    }

    if !context.environment.is_empty() {
        let mut lines = vec!["Environment (available data for tool parameters):".to_string()];
        for (key, value) in &context.environment {
            match value {
                Value::String(s) => lines.push(format!("  - {key}: \"{s}\"")),
                other => lines.push(format!("  - {key}: {other}")),
            }
        }
        parts.push(lines.join("\n"));
    }

    parts.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
