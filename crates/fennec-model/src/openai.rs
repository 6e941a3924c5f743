// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat-completions driver.
//!
//! Every endpoint the deployments talk to (DashScope compatible mode,
//! OpenAI proper, local vLLM) speaks the same `/chat/completions` wire
//! format, so one driver configured from [`fennec_config::ModelConfig`]
//! covers all of them.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use fennec_config::ModelConfig;

use crate::{ChatRequest, ChatResponse, LanguageModel, ToolCallRequest};

pub struct OpenAiCompatModel {
    model: String,
    api_key: Option<String>,
    chat_url: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatModel {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: &str,
        temperature: f32,
        max_tokens: u32,
        timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        let base = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            temperature,
            max_tokens,
            client,
        })
    }

    /// Construct from config, resolving the API key from the configured
    /// environment variable when no explicit key is set.
    pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| std::env::var(&cfg.api_key_env).ok());
        Self::new(
            cfg.name.clone(),
            api_key,
            &cfg.base_url,
            cfg.temperature,
            cfg.max_tokens,
            cfg.timeout_secs,
        )
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": req.temperature.unwrap_or(self.temperature),
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }
        if req.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        debug!(model = %self.model, tools = req.tools.len(), json_mode = req.json_mode, "chat completion");

        let mut http = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.context("sending chat completion")?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("chat completion failed: HTTP {status}: {text}");
        }

        let payload: Value = resp.json().await.context("decoding chat completion")?;
        let message = &payload["choices"][0]["message"];
        if message.is_null() {
            bail!("chat completion returned no choices");
        }

        let content = message["content"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        let tool_calls = message["tool_calls"]
            .as_array()
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        let name = c["function"]["name"].as_str()?.to_string();
                        Some(ToolCallRequest {
                            id: c["id"].as_str().unwrap_or_default().to_string(),
                            name,
                            arguments: c["function"]["arguments"]
                                .as_str()
                                .unwrap_or("{}")
                                .to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(ChatResponse { content, tool_calls })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
