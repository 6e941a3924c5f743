// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;

use crate::{ChatRequest, ChatResponse};

/// A chat-completion language model.
///
/// The runtime makes three kinds of calls through this trait: free-form
/// completions (reply synthesis), JSON-mode completions (intent analysis,
/// plan generation), and function-calling completions (tool routing).
/// All of them are single-shot; the runtime never streams.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Execute one completion.  Transport and API errors surface as `Err`;
    /// a model that answers in text instead of calling a tool is still `Ok`.
    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse>;
}
