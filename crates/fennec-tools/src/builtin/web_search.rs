// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::tool::LocalTool;

/// DuckDuckGo web search — no API key required.
///
/// Queries the Instant Answer API and returns
/// `{query, results: [{title, snippet, link}], total}`.  Errors from the
/// API degrade to an empty result list with an `error` field so the
/// caller can still ground a reply on it.
pub struct WebSearchTool {
    endpoint: String,
    client: reqwest::Client,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::with_endpoint("https://api.duckduckgo.com")
    }
}

impl WebSearchTool {
    /// Endpoint override for tests.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .user_agent("Mozilla/5.0")
                .build()
                .expect("static client config"),
        }
    }

    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Value> {
        let url = format!("{}/?q={}&format=json", self.endpoint, urlencode(query));
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let data: Value = resp.json().await?;

        let mut results = Vec::new();

        // Abstract answer first, when present.
        if let Some(abstract_text) = data["Abstract"].as_str().filter(|s| !s.is_empty()) {
            results.push(json!({
                "title": data["Heading"].as_str().unwrap_or("Abstract"),
                "snippet": abstract_text,
                "link": data["AbstractURL"].as_str().unwrap_or(""),
            }));
        }

        // Then related topics.
        if let Some(topics) = data["RelatedTopics"].as_array() {
            for topic in topics.iter().take(max_results) {
                if let Some(text) = topic["Text"].as_str() {
                    let title: String = text.split(" - ").next().unwrap_or(text).chars().take(100).collect();
                    results.push(json!({
                        "title": title,
                        "snippet": text,
                        "link": topic["FirstURL"].as_str().unwrap_or(""),
                    }));
                }
            }
        }

        results.truncate(max_results);
        let total = results.len();
        Ok(json!({
            "query": query,
            "results": results,
            "total": total,
        }))
    }
}

#[async_trait]
impl LocalTool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web with DuckDuckGo. Use for real-time information, news, \
         and general knowledge lookups. Returns result titles, snippets, and links."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "max_results": { "type": "integer", "description": "Maximum results", "default": 5 }
            },
            "required": ["query"]
        })
    }

    fn tags(&self) -> Vec<String> {
        vec!["web".into(), "search".into(), "internet".into()]
    }

    async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("missing 'query'"))?;
        let max_results = args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(5)
            .min(10) as usize;

        debug!(%query, max_results, "web search");

        match self.search(query, max_results).await {
            Ok(out) => Ok(out),
            Err(e) => Ok(json!({
                "query": query,
                "results": [],
                "error": e.to_string(),
            })),
        }
    }
}

fn urlencode(s: &str) -> String {
    let mut encoded = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            ' ' => encoded.push('+'),
            c => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    encoded
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_basic() {
        assert_eq!(urlencode("today weather"), "today+weather");
        assert_eq!(urlencode("a&b"), "a%26b");
        assert_eq!(urlencode("北京"), "%E5%8C%97%E4%BA%AC");
    }

    #[test]
    fn schema_requires_query() {
        let tool = WebSearchTool::default();
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"][0], "query");
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let tool = WebSearchTool::default();
        let err = tool.execute(&Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades_to_empty_results() {
        let tool = WebSearchTool::with_endpoint("http://127.0.0.1:1");
        let mut args = Map::new();
        args.insert("query".into(), serde_json::json!("anything"));
        let out = tool.execute(&args).await.unwrap();
        assert_eq!(out["results"].as_array().unwrap().len(), 0);
        assert!(out["error"].is_string());
    }
}
