// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use fennec_config::McpConfig;
use fennec_tools::LocalTool;

use crate::connection::{McpConnection, SharedConnection};
use crate::index::ToolIndex;

/// Facade over the connection set and the tool index.
///
/// One instance per agent, injected where needed — tests build their own.
/// Initialization is best-effort: servers that fail to connect are kept
/// in the map (state Error) and simply contribute no tools; when every
/// remote sync source fails but a prior cache exists, the stale cache is
/// retained.
pub struct McpControlPlane {
    connections: HashMap<String, SharedConnection>,
    index: Arc<ToolIndex>,
    cache_path: PathBuf,
}

impl McpControlPlane {
    /// Connect the configured servers, register local tools, and bring the
    /// tool index up to date (cache load + TTL-gated sync + snapshot).
    pub async fn initialize(
        config: &McpConfig,
        local_tools: Vec<(String, Arc<dyn LocalTool>)>,
    ) -> Self {
        let index = Arc::new(ToolIndex::new());
        for (server_id, tool) in local_tools {
            index.register_local_tool(&server_id, tool);
        }

        let mut connections: HashMap<String, SharedConnection> = HashMap::new();
        let mut connected = 0usize;
        for server in &config.servers {
            let mut conn = McpConnection::new(
                &server.id,
                &server.url,
                server.timeout_secs,
                server.headers.clone(),
            );
            match conn.connect().await {
                Ok(()) => connected += 1,
                Err(e) => warn!(server_id = %server.id, error = %e, "server connection failed"),
            }
            connections.insert(server.id.clone(), Arc::new(Mutex::new(conn)));
        }
        if connected == 0 && !config.servers.is_empty() {
            warn!("no MCP servers connected; router will only see local tools");
        }

        let cache_path = config
            .cache_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("mcp_tool_index.json"));

        let cached = index
            .load_from_file(&cache_path)
            .unwrap_or_else(|e| {
                warn!(error = %e, "tool index cache unreadable");
                0
            });

        if index.should_sync(&cache_path, config.cache_ttl_seconds, config.force_refresh_on_init) {
            index.sync_from_servers(&connections).await;
            if connected > 0 {
                if let Err(e) = index.save_to_file(&cache_path) {
                    warn!(error = %e, "failed to save tool index cache");
                }
            } else if cached > 0 {
                // Every server failed; keep serving the stale cache.
                warn!(stale_tools = cached, "all servers failed, using stale tool cache");
            }
        } else {
            info!(tools = index.len(), "using cached tool index");
        }

        info!(
            servers = config.servers.len(),
            connected,
            tools = index.len(),
            "MCP control plane initialized"
        );

        Self { connections, index, cache_path }
    }

    pub fn index(&self) -> Arc<ToolIndex> {
        Arc::clone(&self.index)
    }

    pub fn connections(&self) -> &HashMap<String, SharedConnection> {
        &self.connections
    }

    pub fn connection(&self, server_id: &str) -> Option<SharedConnection> {
        self.connections.get(server_id).cloned()
    }

    pub fn server_ids(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub fn cache_path(&self) -> &PathBuf {
        &self.cache_path
    }

    /// Probe every connection once; flips repeatedly failing connections
    /// to Error (see [`McpConnection::health_check`]).
    pub async fn health_sweep(&self) -> usize {
        let mut healthy = 0usize;
        for conn in self.connections.values() {
            if conn.lock().await.health_check().await {
                healthy += 1;
            }
        }
        healthy
    }

    /// Close every connection.
    pub async fn close(&self) {
        for (server_id, conn) in &self.connections {
            conn.lock().await.close().await;
            info!(%server_id, "connection closed");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
