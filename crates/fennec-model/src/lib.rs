// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod mock;
mod openai;
mod provider;
mod types;

pub use mock::ScriptedModel;
pub use openai::OpenAiCompatModel;
pub use provider::LanguageModel;
pub use types::{ChatRequest, ChatResponse, Message, Role, ToolCallRequest, ToolSchema};
