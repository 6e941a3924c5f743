// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt builders used by the executors.
//!
//! All prompts ask for strict JSON where the caller parses the reply;
//! the parsers tolerate markdown fences anyway (see
//! [`extract_json_object`]).

/// Intent analysis for the conversation loop: classify an utterance as
/// chit-chat vs. an actionable request and, for the latter, emit the
/// MCP sub-task parameters.
pub fn intent_analysis_prompt(
    available_actions: &[(String, String)],
    mcp_tools: &[(String, String)],
) -> String {
    let mut actions_desc = vec!["[Built-in capabilities]".to_string()];
    for (name, desc) in available_actions {
        actions_desc.push(format!("  - **{name}**: {desc}"));
    }
    let actions_text = actions_desc.join("\n");

    let mut mcp_text = String::new();
    if !mcp_tools.is_empty() {
        let mut lines = vec![
            "\n[MCP tool services]".to_string(),
            "  External tools for live information and device control:".to_string(),
        ];
        for (name, desc) in mcp_tools {
            lines.push(format!("  - **{name}**: {desc}"));
        }
        mcp_text = lines.join("\n");
    }

    format!(
        r#"You are the intent analysis engine of a voice assistant.

Classify the user input as one of:
1. **simple_chat**: small talk or greetings (e.g. "你好", "who are you", "thanks")
2. **task_request**: needs information lookup or device control (e.g. "今天天气怎么样", "search for ...", "打开客厅的灯")

Currently available capabilities:

{actions_text}{mcp_text}

Rules:
- Plain chat -> simple_chat (answer directly)
- Needs external information or device control -> task_request (executor_type: "mcp")

Output format (JSON):
```json
{{
  "intent_type": "simple_chat" or "task_request",
  "response": "direct reply (for simple_chat)",
  "task_info": {{
    "executor_type": "mcp",
    "parameters": {{
      "user_intent": "what the user wants",
      "context": {{ "query": "...", "location": "..." }}
    }}
  }}
}}
```

Keep replies short, natural, and conversational."#
    )
}

/// Plan generation for the MCP executor.
pub fn plan_generation_prompt(goal: &str, tools_summary: &str) -> String {
    format!(
        r#"You are a task planning assistant. Produce a detailed execution plan for the goal using the available tools.

**Goal**:
{goal}

**Available tools**:
{tools_summary}

**Plan requirements**:
1. Produce 3-8 steps in logical order (query before act).
2. Each step has:
   - description: natural-language step description
   - expected_tool: tool name or null
3. Keep the granularity moderate.

**Output format** (must be JSON):
```json
{{
  "steps": [
    {{ "description": "step 1", "expected_tool": "tool name or null" }},
    {{ "description": "step 2", "expected_tool": null }}
  ]
}}
```

Generate the plan:"#
    )
}

/// Plan revision after a failed or diverging step.
pub fn plan_revision_prompt(user_intent: &str, completed_steps: &[String], reason: &str) -> String {
    let completed = if completed_steps.is_empty() {
        "none".to_string()
    } else {
        completed_steps.join("\n")
    };
    format!(
        r#"You are a task planning assistant. The current plan needs revision; produce the remaining steps.

**Original intent**:
{user_intent}

**Completed steps**:
{completed}

**Revision reason**:
{reason}

**Requirements**:
1. Produce only the remaining steps (account for the completed ones).
2. 1-5 steps.
3. The steps must address the revision reason.

**Output format** (must be JSON):
```json
{{
  "steps": [
    {{ "description": "step", "expected_tool": "tool name or null" }}
  ]
}}
```

Generate the revised steps:"#
    )
}

/// Reply synthesis: summarize tool output as a spoken answer.
pub fn reply_synthesis_prompt(user_text: &str, tool_output: &str) -> String {
    format!(
        r#"You are a friendly voice assistant.

User question: "{user_text}"

Information returned by tools:
{tool_output}

Reply in 2-3 short, natural, conversational sentences in the user's language, summarizing the key information. For news or search results, briefly sum up the top items."#
    )
}

/// Pull the first JSON object out of a model reply, tolerating markdown
/// fences and prose around it.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
