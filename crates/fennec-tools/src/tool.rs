// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{Map, Value};

/// An in-process tool.
///
/// Local tools sit in the tool index next to remote MCP tools under a
/// `local-` server id, so the router can pick them the same way; the
/// executor dispatches them directly instead of making an MCP round trip.
/// They return raw JSON data — the executor wraps it into the normalized
/// envelope.
#[async_trait]
pub trait LocalTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object.
    fn parameters_schema(&self) -> Value;
    /// Index tags used for capability lookups.
    fn tags(&self) -> Vec<String> {
        Vec::new()
    }
    /// Execute with already-parsed arguments.  Failures surface as `Err`
    /// and are lifted into `{success: false}` by the caller.
    async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct UpperTool;

    #[async_trait]
    impl LocalTool for UpperTool {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "uppercases its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }
        async fn execute(&self, args: &Map<String, Value>) -> anyhow::Result<Value> {
            let text = args.get("text").and_then(|v| v.as_str()).unwrap_or_default();
            Ok(json!({ "text": text.to_uppercase() }))
        }
    }

    #[tokio::test]
    async fn trait_object_dispatch_works() {
        let tool: Box<dyn LocalTool> = Box::new(UpperTool);
        let mut args = Map::new();
        args.insert("text".into(), json!("abc"));
        let out = tool.execute(&args).await.unwrap();
        assert_eq!(out["text"], "ABC");
        assert!(tool.tags().is_empty());
    }
}
