// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Result of one capability invocation.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok(output: Value) -> Self {
        Self { success: true, output, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, output: Value::Null, error: Some(message.into()) }
    }
}

/// A named, opaque capability ("action") registered with the agent.
///
/// The core consumes `speak(text)` and `listen(timeout_secs)` through
/// this trait; the audio implementations behind them are out of scope
/// and injected by the embedding layer.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, input: Value) -> ActionResult;
}

/// Registry of all capabilities available to executors.
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, Arc<dyn Action>>>,
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self { actions: RwLock::new(HashMap::new()) }
    }

    pub fn register(&self, action: Arc<dyn Action>) {
        debug!(action = action.name(), "action registered");
        self.actions
            .write()
            .unwrap()
            .insert(action.name().to_string(), action);
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.actions.write().unwrap().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.read().unwrap().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.actions.write().unwrap().clear();
    }

    /// Invoke a capability by name.  Unknown names fail softly.
    pub async fn execute(&self, name: &str, input: Value) -> ActionResult {
        let action = self.actions.read().unwrap().get(name).cloned();
        match action {
            Some(action) => action.execute(input).await,
            None => {
                warn!(action = name, "action not registered");
                ActionResult::err(format!("Action '{name}' not registered"))
            }
        }
    }

    /// Execute several actions in order, feeding each output into the
    /// next input.  Stops at the first failure.
    pub async fn execute_chain(&self, names: &[String], input: Value) -> Vec<ActionResult> {
        let mut results = Vec::new();
        let mut current = input;
        for name in names {
            let result = self.execute(name, current.clone()).await;
            let failed = !result.success;
            current = result.output.clone();
            results.push(result);
            if failed {
                warn!(action = %name, "action chain stopped on failure");
                break;
            }
        }
        results
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
