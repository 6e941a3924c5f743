// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use fennec_tools::LocalTool;

use crate::connection::SharedConnection;

pub const INDEX_FORMAT_VERSION: &str = "1.0.0";

/// One tool known to the index, remote or local.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolIndexEntry {
    pub server_id: String,
    pub tool_name: String,
    pub description: String,
    pub input_schema: Value,
    pub tags: Vec<String>,
    pub blocking: bool,
    pub cost_estimate: String,
    pub last_updated: String,
}

#[derive(Serialize, Deserialize)]
struct CacheTool {
    tool_name: String,
    description: String,
    input_schema: Value,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    blocking: bool,
    #[serde(default = "default_cost")]
    cost_estimate: String,
}

fn default_cost() -> String {
    "medium".into()
}

#[derive(Serialize, Deserialize)]
struct CacheServer {
    server_id: String,
    tools: Vec<CacheTool>,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: String,
    last_sync: Option<String>,
    servers: Vec<CacheServer>,
}

struct IndexInner {
    tools: HashMap<String, ToolIndexEntry>,
    local_tools: HashMap<String, Arc<dyn LocalTool>>,
    last_sync: Option<DateTime<Utc>>,
}

/// Canonical mapping `tool_name → entry` for every tool the router may
/// select.  Local tools are registered at construction and never
/// invalidated by a remote sync; remote tools are upserted by
/// [`ToolIndex::sync_from_servers`] and cached on disk with a TTL.
pub struct ToolIndex {
    inner: RwLock<IndexInner>,
}

impl Default for ToolIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                tools: HashMap::new(),
                local_tools: HashMap::new(),
                last_sync: None,
            }),
        }
    }

    /// Register an in-process tool under a `local-` server id.  The entry
    /// is built from the tool's own metadata; re-registration replaces.
    pub fn register_local_tool(&self, server_id: &str, tool: Arc<dyn LocalTool>) {
        debug_assert!(server_id.starts_with("local-"));
        let entry = ToolIndexEntry {
            server_id: server_id.to_string(),
            tool_name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.parameters_schema(),
            tags: tool.tags(),
            blocking: true,
            cost_estimate: "low".into(),
            last_updated: Utc::now().to_rfc3339(),
        };
        let mut inner = self.inner.write().unwrap();
        info!(tool = %entry.tool_name, server_id, "local tool registered");
        inner.local_tools.insert(entry.tool_name.clone(), tool);
        inner.tools.insert(entry.tool_name.clone(), entry);
    }

    pub fn local_tool(&self, tool_name: &str) -> Option<Arc<dyn LocalTool>> {
        self.inner.read().unwrap().local_tools.get(tool_name).cloned()
    }

    /// Fetch tool lists from every Ready connection and upsert entries.
    /// Best-effort: servers that fail contribute nothing.  Connections
    /// are queried before the index lock is taken.
    pub async fn sync_from_servers(&self, connections: &HashMap<String, SharedConnection>) {
        let mut fetched: Vec<(String, Vec<(String, String, Value)>)> = Vec::new();
        let mut failed = 0usize;

        for (server_id, conn) in connections {
            let conn = conn.lock().await;
            if !conn.is_ready() {
                debug!(%server_id, "sync skipped: not connected");
                failed += 1;
                continue;
            }
            match conn.list_tools().await {
                Ok(tools) => {
                    info!(%server_id, count = tools.len(), "synced tool list");
                    fetched.push((server_id.clone(), tools));
                }
                Err(e) => {
                    warn!(%server_id, error = %e, "sync failed");
                    failed += 1;
                }
            }
        }

        let mut inner = self.inner.write().unwrap();
        let mut upserted = 0usize;
        for (server_id, tools) in fetched {
            for (name, description, input_schema) in tools {
                let entry = ToolIndexEntry {
                    server_id: server_id.clone(),
                    tool_name: name.clone(),
                    description: description.clone(),
                    input_schema,
                    tags: extract_tags(&description),
                    blocking: false,
                    cost_estimate: "medium".into(),
                    last_updated: Utc::now().to_rfc3339(),
                };
                inner.tools.insert(name, entry);
                upserted += 1;
            }
        }
        inner.last_sync = Some(Utc::now());
        info!(upserted, failed_servers = failed, "tool index sync complete");
    }

    /// Snapshot the whole index to a JSON file grouped by server.
    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        let inner = self.inner.read().unwrap();

        let mut by_server: HashMap<String, Vec<CacheTool>> = HashMap::new();
        for entry in inner.tools.values() {
            by_server
                .entry(entry.server_id.clone())
                .or_default()
                .push(CacheTool {
                    tool_name: entry.tool_name.clone(),
                    description: entry.description.clone(),
                    input_schema: entry.input_schema.clone(),
                    tags: entry.tags.clone(),
                    blocking: entry.blocking,
                    cost_estimate: entry.cost_estimate.clone(),
                });
        }
        let mut servers: Vec<CacheServer> = by_server
            .into_iter()
            .map(|(server_id, tools)| CacheServer { server_id, tools })
            .collect();
        servers.sort_by(|a, b| a.server_id.cmp(&b.server_id));

        let file = CacheFile {
            version: INDEX_FORMAT_VERSION.into(),
            last_sync: inner.last_sync.map(|t| t.to_rfc3339()),
            servers,
        };

        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        debug!(path = %path.display(), "tool index saved");
        Ok(())
    }

    /// Load remote entries from a cache file.  Missing file is not an
    /// error (returns 0).  Local tool registrations are preserved.
    pub fn load_from_file(&self, path: &Path) -> anyhow::Result<usize> {
        if !path.exists() {
            debug!(path = %path.display(), "no tool index cache");
            return Ok(0);
        }
        let text = std::fs::read_to_string(path)?;
        let file: CacheFile = serde_json::from_str(&text)?;

        let mut inner = self.inner.write().unwrap();
        inner.last_sync = file
            .last_sync
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));

        let mut loaded = 0usize;
        for server in file.servers {
            for tool in server.tools {
                // Never let a stale cache shadow a live local registration.
                if inner.local_tools.contains_key(&tool.tool_name) {
                    continue;
                }
                inner.tools.insert(
                    tool.tool_name.clone(),
                    ToolIndexEntry {
                        server_id: server.server_id.clone(),
                        tool_name: tool.tool_name,
                        description: tool.description,
                        input_schema: tool.input_schema,
                        tags: tool.tags,
                        blocking: tool.blocking,
                        cost_estimate: tool.cost_estimate,
                        last_updated: file.last_sync.clone().unwrap_or_default(),
                    },
                );
                loaded += 1;
            }
        }
        info!(loaded, path = %path.display(), "tool index loaded from cache");
        Ok(loaded)
    }

    /// Cache validity rules: no `last_sync` or zero tools → invalid;
    /// `ttl_seconds == 0` → permanently valid (test aid); negative TTL is
    /// treated as the 3600s default; otherwise age must be under the TTL.
    pub fn is_cache_valid(&self, ttl_seconds: i64) -> bool {
        let inner = self.inner.read().unwrap();
        let last_sync = match inner.last_sync {
            Some(t) => t,
            None => return false,
        };
        if inner.tools.is_empty() {
            return false;
        }
        if ttl_seconds == 0 {
            return true;
        }
        let ttl = if ttl_seconds < 0 { 3600 } else { ttl_seconds };
        let age = (Utc::now() - last_sync).num_seconds();
        age < ttl
    }

    /// Decide whether a remote sync is needed.
    pub fn should_sync(&self, cache_path: &Path, ttl_seconds: i64, force_refresh: bool) -> bool {
        if force_refresh {
            debug!("force refresh requested, will sync");
            return true;
        }
        if !cache_path.exists() {
            debug!("cache file missing, will sync");
            return true;
        }
        if !self.is_cache_valid(ttl_seconds) {
            debug!("cache invalid or expired, will sync");
            return true;
        }
        debug!("cache valid, skipping sync");
        false
    }

    pub fn all_tools(&self) -> Vec<ToolIndexEntry> {
        let mut tools: Vec<ToolIndexEntry> =
            self.inner.read().unwrap().tools.values().cloned().collect();
        tools.sort_by(|a, b| a.tool_name.cmp(&b.tool_name));
        tools
    }

    pub fn tools_by_tag(&self, tag: &str) -> Vec<ToolIndexEntry> {
        self.inner
            .read()
            .unwrap()
            .tools
            .values()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .cloned()
            .collect()
    }

    pub fn server_for_tool(&self, tool_name: &str) -> Option<String> {
        self.inner
            .read()
            .unwrap()
            .tools
            .get(tool_name)
            .map(|e| e.server_id.clone())
    }

    pub fn entry(&self, tool_name: &str) -> Option<ToolIndexEntry> {
        self.inner.read().unwrap().tools.get(tool_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test hook: override the sync timestamp.
    #[doc(hidden)]
    pub fn set_last_sync(&self, when: Option<DateTime<Utc>>) {
        self.inner.write().unwrap().last_sync = when;
    }
}

/// Keyword-based capability tags derived from a tool description.
fn extract_tags(description: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let desc = description.to_lowercase();
    if desc.contains("email") || desc.contains("mail") {
        tags.push("notification".into());
    }
    if desc.contains("emergency") {
        tags.push("emergency".into());
    }
    if desc.contains("navigate") || desc.contains("navigation") {
        tags.push("navigation".into());
    }
    if desc.contains("camera") || desc.contains("photo") {
        tags.push("perception".into());
    }
    tags
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use serde_json::{json, Map};

    struct FakeTool;

    #[async_trait]
    impl LocalTool for FakeTool {
        fn name(&self) -> &str {
            "web_search"
        }
        fn description(&self) -> &str {
            "searches the web"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn tags(&self) -> Vec<String> {
            vec!["web".into()]
        }
        async fn execute(&self, _args: &Map<String, Value>) -> anyhow::Result<Value> {
            Ok(json!({ "results": [] }))
        }
    }

    fn index_with_remote(name: &str, server: &str) -> ToolIndex {
        let index = ToolIndex::new();
        {
            let mut inner = index.inner.write().unwrap();
            inner.tools.insert(
                name.to_string(),
                ToolIndexEntry {
                    server_id: server.to_string(),
                    tool_name: name.to_string(),
                    description: "navigate to a waypoint".into(),
                    input_schema: json!({ "type": "object" }),
                    tags: extract_tags("navigate to a waypoint"),
                    blocking: false,
                    cost_estimate: "medium".into(),
                    last_updated: Utc::now().to_rfc3339(),
                },
            );
        }
        index
    }

    #[test]
    fn local_registration_creates_entry_and_instance() {
        let index = ToolIndex::new();
        index.register_local_tool("local-web", Arc::new(FakeTool));
        assert_eq!(index.server_for_tool("web_search").as_deref(), Some("local-web"));
        assert!(index.local_tool("web_search").is_some());
        assert!(index.local_tool("missing").is_none());
    }

    #[test]
    fn tools_by_tag_filters() {
        let index = index_with_remote("Navigate", "robot");
        assert_eq!(index.tools_by_tag("navigation").len(), 1);
        assert!(index.tools_by_tag("perception").is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let index = index_with_remote("Navigate", "robot");
        index.set_last_sync(Some(Utc::now()));
        index.save_to_file(&path).unwrap();

        let fresh = ToolIndex::new();
        let loaded = fresh.load_from_file(&path).unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(fresh.server_for_tool("Navigate").as_deref(), Some("robot"));
        assert!(fresh.is_cache_valid(3600));
    }

    #[test]
    fn load_missing_file_is_not_an_error() {
        let index = ToolIndex::new();
        assert_eq!(index.load_from_file(Path::new("/tmp/fennec_no_such_cache.json")).unwrap(), 0);
    }

    #[test]
    fn cache_validity_rules() {
        let index = index_with_remote("Navigate", "robot");

        // No last_sync → invalid.
        assert!(!index.is_cache_valid(3600));

        // Expired: last_sync = now - ttl - 1s.
        index.set_last_sync(Some(Utc::now() - Duration::seconds(3601)));
        assert!(!index.is_cache_valid(3600));

        // Fresh: last_sync = now - ttl + 1s.
        index.set_last_sync(Some(Utc::now() - Duration::seconds(3599)));
        assert!(index.is_cache_valid(3600));

        // TTL 0 → permanent.
        index.set_last_sync(Some(Utc::now() - Duration::seconds(999_999)));
        assert!(index.is_cache_valid(0));

        // Negative TTL behaves like the 3600s default.
        index.set_last_sync(Some(Utc::now() - Duration::seconds(60)));
        assert!(index.is_cache_valid(-5));
    }

    #[test]
    fn empty_index_is_never_valid() {
        let index = ToolIndex::new();
        index.set_last_sync(Some(Utc::now()));
        assert!(!index.is_cache_valid(0));
    }

    #[test]
    fn should_sync_decision_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        let index = index_with_remote("Navigate", "robot");
        index.set_last_sync(Some(Utc::now()));

        // Cache file missing → sync.
        assert!(index.should_sync(&path, 3600, false));

        index.save_to_file(&path).unwrap();

        // Force → sync even with a fresh cache.
        assert!(index.should_sync(&path, 3600, true));

        // Fresh cache → no sync.
        assert!(!index.should_sync(&path, 3600, false));

        // Expired cache → sync.
        index.set_last_sync(Some(Utc::now() - Duration::seconds(3601)));
        assert!(index.should_sync(&path, 3600, false));

        // TTL 0 with tools → permanent cache, no sync.
        assert!(!index.should_sync(&path, 0, false));
    }

    #[test]
    fn stale_cache_does_not_shadow_local_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        // Cache claims web_search lives on a remote server.
        let stale = index_with_remote("web_search", "remote-1");
        stale.set_last_sync(Some(Utc::now()));
        stale.save_to_file(&path).unwrap();

        let index = ToolIndex::new();
        index.register_local_tool("local-web", Arc::new(FakeTool));
        index.load_from_file(&path).unwrap();
        assert_eq!(index.server_for_tool("web_search").as_deref(), Some("local-web"));
    }

    #[test]
    fn extract_tags_keywords() {
        assert_eq!(extract_tags("send an email alert"), vec!["notification"]);
        assert_eq!(extract_tags("Emergency broadcast"), vec!["emergency"]);
        assert!(extract_tags("turn on a light").is_empty());
    }
}
