// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::tool::LocalTool;

/// Search the deployment's private knowledge base over its HTTP retrieval
/// endpoint.  The retrieval service (document ingestion, embedding,
/// ranking) is an external process; this tool only posts the query and
/// forwards the JSON response.
pub struct KnowledgeSearchTool {
    endpoint: String,
    client: reqwest::Client,
}

impl Default for KnowledgeSearchTool {
    fn default() -> Self {
        Self::with_endpoint("http://127.0.0.1:9000/rag/search")
    }
}

impl KnowledgeSearchTool {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("static client config"),
        }
    }
}

#[async_trait]
impl LocalTool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        "search_knowledge_base"
    }

    fn description(&self) -> &str {
        "Search the internal knowledge base for relevant documents. Use for \
         background lookups, reference retrieval, and fact checking."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Knowledge base query" }
            },
            "required": ["query"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["rag".into(), "knowledge".into(), "search".into()]
    }

    async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing 'query'"))?;

        debug!(%query, endpoint = %self.endpoint, "knowledge base search");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query }))
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.json().await?)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
