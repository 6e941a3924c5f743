// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `false`, so fields
/// that should be on unless explicitly disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tasks: TaskLoopConfig,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub patrol: PatrolConfig,
}

/// LLM endpoint used for routing decisions, plan generation, intent
/// analysis, and reply synthesis.  Any OpenAI-compatible chat-completions
/// server works (the default targets the DashScope compatible mode the
/// deployment fleet runs against).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier forwarded to the API.
    pub name: String,
    /// Base URL ending before `/chat/completions`.
    pub base_url: String,
    /// Environment variable holding the API key (read at runtime).
    /// Prefer this over `api_key` so secrets stay out of config files.
    pub api_key_env: String,
    /// Explicit API key override.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Default sampling temperature when the caller does not override it.
    pub temperature: f32,
    /// Default maximum completion tokens.
    pub max_tokens: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "qwen-plus".into(),
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            api_key_env: "FENNEC_API_KEY".into(),
            api_key: None,
            timeout_secs: 30,
            temperature: 0.7,
            max_tokens: 1000,
        }
    }
}

/// Tunables for the unified task loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLoopConfig {
    /// Main loop check interval in seconds.
    pub loop_interval_secs: f64,
    /// Maximum tasks in flight at any instant.
    pub max_concurrent_tasks: usize,
    /// Default per-task timeout in seconds.
    pub default_timeout_secs: f64,
    /// Default retry budget for new tasks.
    pub default_max_retries: u32,
}

impl Default for TaskLoopConfig {
    fn default() -> Self {
        Self {
            loop_interval_secs: 1.0,
            max_concurrent_tasks: 5,
            default_timeout_secs: 60.0,
            default_max_retries: 3,
        }
    }
}

/// One remote MCP server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Stable identifier used as the `server_id` in the tool index.
    pub id: String,
    /// Streamable-HTTP endpoint URL.
    pub url: String,
    /// Per-call timeout in seconds.
    #[serde(default = "McpServerConfig::default_timeout")]
    pub timeout_secs: u64,
    /// Extra HTTP headers (e.g. Authorization) sent on every request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl McpServerConfig {
    fn default_timeout() -> u64 {
        60
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
    /// Tool-index cache validity window in seconds.  `0` treats an existing
    /// non-empty cache as permanently valid (test aid).
    pub cache_ttl_seconds: i64,
    /// Re-sync the tool index on startup even when the cache is fresh.
    pub force_refresh_on_init: bool,
    /// Tool-index cache file.  Defaults to `mcp_tool_index.json` next to
    /// the loaded config file, falling back to the working directory.
    pub cache_path: Option<std::path::PathBuf>,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            cache_ttl_seconds: 3600,
            force_refresh_on_init: false,
            cache_path: None,
        }
    }
}

/// Wake-word conversation loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Phrases that unlock a conversation from standby.
    pub wake_words: Vec<String>,
    /// Seconds of silence per listen before a round counts as idle.
    pub idle_timeout_secs: f64,
    /// Consecutive idle rounds that close the conversation.
    pub max_idle_rounds: u32,
    /// Exchanges kept for LLM context.
    pub max_history: usize,
    /// Lines kept in the broadcastable message log.
    pub max_messages: usize,
    /// Priority of MCP sub-tasks submitted on behalf of the user.
    pub mcp_task_priority: u8,
    pub welcome_phrase: String,
    pub farewell_phrase: String,
    pub idle_farewell_phrase: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            wake_words: vec!["你好小狐狸".into(), "小狐狸".into(), "hey fox".into()],
            idle_timeout_secs: 30.0,
            max_idle_rounds: 2,
            max_history: 10,
            max_messages: 50,
            mcp_task_priority: 7,
            welcome_phrase: "我在，请和我聊天吧！".into(),
            farewell_phrase: "再见，下次见！".into(),
            idle_farewell_phrase: "好的，我先休息了，有需要再叫我".into(),
        }
    }
}

/// MCP executor behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Plan-driven execution (default).  `false` selects the legacy
    /// goal-driven mode with per-step completion evaluation.
    #[serde(default = "default_true")]
    pub plan_mode: bool,
    pub max_plan_steps: usize,
    pub max_plan_revisions: u32,
    /// How plan verification decides on revision: `"rule"` or `"llm"`.
    pub verification_mode: String,
    /// Live home-automation context cache validity in seconds.
    pub home_context_ttl_secs: f64,
    /// Minimum confidence for legacy-mode completion.
    pub completion_confidence_threshold: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            plan_mode: true,
            max_plan_steps: 20,
            max_plan_revisions: 3,
            verification_mode: "rule".into(),
            home_context_ttl_secs: 60.0,
            completion_confidence_threshold: 0.7,
        }
    }
}

/// Periodic patrol trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatrolConfig {
    #[serde(default)]
    pub enabled: bool,
    pub interval_secs: f64,
    pub priority: u8,
    /// Watch-result confidence above which an alert task is escalated.
    pub emergency_threshold: f64,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 30.0,
            priority: 3,
            emergency_threshold: 0.8,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_runtime_expectations() {
        let cfg = Config::default();
        assert_eq!(cfg.tasks.max_concurrent_tasks, 5);
        assert_eq!(cfg.tasks.loop_interval_secs, 1.0);
        assert_eq!(cfg.mcp.cache_ttl_seconds, 3600);
        assert!(!cfg.mcp.force_refresh_on_init);
        assert!(cfg.executor.plan_mode);
        assert_eq!(cfg.executor.max_plan_steps, 20);
        assert_eq!(cfg.conversation.max_idle_rounds, 2);
    }

    #[test]
    fn empty_yaml_deserialises_to_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.model.name, "qwen-plus");
        assert_eq!(cfg.conversation.mcp_task_priority, 7);
    }

    #[test]
    fn server_timeout_defaults_to_sixty() {
        let yaml = "mcp:\n  servers:\n    - id: home\n      url: http://host:8000/mcp";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.mcp.servers[0].timeout_secs, 60);
        assert!(cfg.mcp.servers[0].headers.is_empty());
    }

    #[test]
    fn plan_mode_can_be_disabled() {
        let cfg: Config = serde_yaml::from_str("executor:\n  plan_mode: false").unwrap();
        assert!(!cfg.executor.plan_mode);
    }

    #[test]
    fn wake_words_round_trip() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.conversation.wake_words, cfg.conversation.wake_words);
    }
}
