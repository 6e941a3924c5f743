// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rmcp::{
    model::CallToolRequestParam,
    service::RunningService,
    transport::{
        streamable_http_client::StreamableHttpClientTransportConfig, StreamableHttpClientTransport,
    },
    RoleClient, ServiceExt,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::McpError;

type McpClient = RunningService<RoleClient, ()>;

/// A connection shared between the control plane (owner) and executors
/// (callers).  The per-connection mutex serializes call-in-flight state.
pub type SharedConnection = Arc<tokio::sync::Mutex<McpConnection>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_HEALTH_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Normalized envelope returned by every tool call, remote or local.
///
/// A remote MCP `isError` flag does NOT flip `success` here — the raw
/// response is passed through and higher layers lift `isError` into
/// `success: false` during result normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEnvelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallEnvelope {
    pub fn ok(result: Value) -> Self {
        Self { success: true, result: Some(result), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, result: None, error: Some(message.into()) }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One streaming-HTTP session to a single remote MCP server.
///
/// State machine: `Disconnected → Connecting → Ready ↔ Error`;
/// repeated health-probe failures flip Ready → Error, `close` returns to
/// Disconnected.
pub struct McpConnection {
    pub server_id: String,
    pub url: String,
    timeout: Duration,
    headers: HashMap<String, String>,
    client: Option<McpClient>,
    pub state: ConnectionState,
    health_failures: u32,
}

impl McpConnection {
    pub fn new(
        server_id: impl Into<String>,
        url: impl Into<String>,
        timeout_secs: u64,
        headers: HashMap<String, String>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            url: url.into(),
            timeout: Duration::from_secs(timeout_secs),
            headers,
            client: None,
            state: ConnectionState::Disconnected,
            health_failures: 0,
        }
    }

    /// Establish the session and run MCP initialization, each under a 10s
    /// deadline.  On any failure the state goes to Error and the session
    /// is discarded.
    pub async fn connect(&mut self) -> Result<(), McpError> {
        self.state = ConnectionState::Connecting;
        debug!(server_id = %self.server_id, url = %self.url, "connecting");

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            self.state = ConnectionState::Error;
            return Err(McpError::InvalidUrl(self.url.clone()));
        }

        let mut config = StreamableHttpClientTransportConfig::with_uri(self.url.clone());
        // The transport carries a bearer token natively; other custom
        // headers are not supported by the streamable client.
        if let Some(auth) = self.headers.get("Authorization") {
            let token = auth.strip_prefix("Bearer ").unwrap_or(auth);
            config.auth_header = Some(token.to_string());
        }
        for name in self.headers.keys() {
            if name != "Authorization" {
                warn!(server_id = %self.server_id, header = %name, "unsupported custom header ignored");
            }
        }
        let transport = StreamableHttpClientTransport::from_config(config);

        // serve() covers both session establishment and MCP initialize.
        match tokio::time::timeout(CONNECT_TIMEOUT, ().serve(transport)).await {
            Ok(Ok(client)) => {
                self.client = Some(client);
                self.state = ConnectionState::Ready;
                self.health_failures = 0;
                info!(server_id = %self.server_id, "connected");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = ConnectionState::Error;
                self.client = None;
                Err(McpError::ConnectionFailed(e.to_string()))
            }
            Err(_) => {
                self.state = ConnectionState::Error;
                self.client = None;
                Err(McpError::ConnectTimeout(CONNECT_TIMEOUT.as_secs()))
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.cancel().await {
                warn!(server_id = %self.server_id, error = %e, "error closing connection");
            }
        }
        self.state = ConnectionState::Disconnected;
        debug!(server_id = %self.server_id, "closed");
    }

    pub async fn reconnect(&mut self) -> Result<(), McpError> {
        debug!(server_id = %self.server_id, "reconnecting");
        self.close().await;
        self.connect().await
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Probe the server by listing tools under a 5s deadline.  Three
    /// consecutive failures flip the state to Error.
    pub async fn health_check(&mut self) -> bool {
        if self.state != ConnectionState::Ready {
            return false;
        }
        let client = match &self.client {
            Some(c) => c,
            None => return false,
        };

        let probe = tokio::time::timeout(HEALTH_TIMEOUT, client.peer().list_all_tools()).await;
        match probe {
            Ok(Ok(_)) => {
                self.health_failures = 0;
                true
            }
            _ => {
                self.health_failures += 1;
                warn!(
                    server_id = %self.server_id,
                    failures = self.health_failures,
                    "health check failed"
                );
                if self.health_failures >= MAX_HEALTH_FAILURES {
                    self.state = ConnectionState::Error;
                }
                false
            }
        }
    }

    /// Fetch the server's tool list as `(name, description, input_schema)`.
    pub async fn list_tools(&self) -> Result<Vec<(String, String, Value)>, McpError> {
        let client = self.ready_client()?;
        let tools = client
            .peer()
            .list_all_tools()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;
        Ok(tools
            .into_iter()
            .map(|t| {
                (
                    t.name.to_string(),
                    t.description.as_deref().unwrap_or_default().to_string(),
                    Value::Object((*t.input_schema).clone()),
                )
            })
            .collect())
    }

    /// Invoke a tool.  Requires Ready; returns the normalized envelope
    /// with the serialized MCP response (`{content, isError, ...}`) as
    /// `result`.
    pub async fn call_tool(&self, tool_name: &str, arguments: Map<String, Value>) -> ToolCallEnvelope {
        let client = match self.ready_client() {
            Ok(c) => c,
            Err(e) => return ToolCallEnvelope::err(e.to_string()),
        };

        debug!(server_id = %self.server_id, tool = %tool_name, "calling tool");
        let request = CallToolRequestParam {
            meta: None,
            name: Cow::Owned(tool_name.to_string()),
            arguments: Some(arguments),
            task: None,
        };

        match tokio::time::timeout(self.timeout, client.call_tool(request)).await {
            Ok(Ok(result)) => match serde_json::to_value(&result) {
                Ok(value) => ToolCallEnvelope::ok(value),
                Err(e) => ToolCallEnvelope::err(format!("result serialization failed: {e}")),
            },
            Ok(Err(e)) => ToolCallEnvelope::err(e.to_string()),
            Err(_) => ToolCallEnvelope::err(format!(
                "Tool call timeout after {}s",
                self.timeout.as_secs()
            )),
        }
    }

    fn ready_client(&self) -> Result<&McpClient, McpError> {
        if self.state != ConnectionState::Ready {
            return Err(McpError::NotReady(self.state.to_string()));
        }
        self.client
            .as_ref()
            .ok_or_else(|| McpError::NotReady("no session".into()))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_bad_scheme() {
        let mut conn = McpConnection::new("bad", "ftp://example.com", 60, HashMap::new());
        let err = conn.connect().await.unwrap_err();
        assert!(matches!(err, McpError::InvalidUrl(_)));
        assert_eq!(conn.state, ConnectionState::Error);
    }

    #[tokio::test]
    async fn call_tool_requires_ready() {
        let conn = McpConnection::new("idle", "http://example.com", 60, HashMap::new());
        let envelope = conn.call_tool("anything", Map::new()).await;
        assert!(!envelope.success);
        assert!(envelope.error.unwrap().contains("not ready"));
    }

    #[tokio::test]
    async fn health_check_requires_ready() {
        let mut conn = McpConnection::new("idle", "http://example.com", 60, HashMap::new());
        assert!(!conn.health_check().await);
    }

    #[tokio::test]
    async fn close_resets_state() {
        let mut conn = McpConnection::new("idle", "http://example.com", 60, HashMap::new());
        conn.state = ConnectionState::Error;
        conn.close().await;
        assert_eq!(conn.state, ConnectionState::Disconnected);
    }

    #[test]
    fn envelope_serialisation_shape() {
        let ok = ToolCallEnvelope::ok(serde_json::json!({ "content": [] }));
        let v = ok.to_value();
        assert_eq!(v["success"], true);
        assert!(v.get("error").is_none());

        let err = ToolCallEnvelope::err("boom");
        let v = err.to_value();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "boom");
        assert!(v.get("result").is_none());
    }
}
