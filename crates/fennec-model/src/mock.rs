// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{ChatRequest, ChatResponse, LanguageModel};

/// A pre-scripted model for tests.  Each call to `chat` pops the next
/// response from the front of the script queue, so a test can specify
/// exact decision sequences – including tool calls – without network
/// access.  Every request is captured for later inspection.
pub struct ScriptedModel {
    scripts: Mutex<Vec<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(scripts: Vec<ChatResponse>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a model that always answers with the same text.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::new(vec![ChatResponse::text(reply)])
    }

    /// All requests seen so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }

    async fn chat(&self, req: ChatRequest) -> anyhow::Result<ChatResponse> {
        self.requests.lock().unwrap().push(req);
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            // Fallback when all scripts are consumed.
            return Ok(ChatResponse::text("[no more scripts]"));
        }
        Ok(scripts.remove(0))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[tokio::test]
    async fn scripted_pops_in_order() {
        let model = ScriptedModel::new(vec![
            ChatResponse::text("first"),
            ChatResponse::text("second"),
        ]);
        let req = ChatRequest::from_messages(vec![Message::user("hi")]);
        assert_eq!(model.chat(req.clone()).await.unwrap().text_or_empty(), "first");
        assert_eq!(model.chat(req).await.unwrap().text_or_empty(), "second");
    }

    #[tokio::test]
    async fn scripted_fallback_when_exhausted() {
        let model = ScriptedModel::new(vec![]);
        let req = ChatRequest::from_messages(vec![Message::user("hi")]);
        let out = model.chat(req).await.unwrap();
        assert!(out.text_or_empty().contains("no more scripts"));
    }

    #[tokio::test]
    async fn scripted_captures_requests() {
        let model = ScriptedModel::always_text("ok");
        let req = ChatRequest::from_messages(vec![Message::user("question")]);
        model.chat(req).await.unwrap();
        let seen = model.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages[0].content, "question");
    }
}
