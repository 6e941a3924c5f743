// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use fennec_tasks::{SharedTask, Task, TaskExecutor, TaskSink, TaskStatus, TaskType};

use crate::actions::ActionRegistry;

/// Periodic patrol sweep: run the configured watch capability, and when
/// it reports an emergency above the confidence threshold, escalate by
/// enqueueing a high-priority alert command.
pub struct PatrolExecutor {
    registry: Arc<ActionRegistry>,
    sink: Arc<dyn TaskSink>,
}

impl PatrolExecutor {
    pub fn new(registry: Arc<ActionRegistry>, sink: Arc<dyn TaskSink>) -> Self {
        Self { registry, sink }
    }
}

#[async_trait]
impl TaskExecutor for PatrolExecutor {
    async fn execute(&self, task: SharedTask) -> anyhow::Result<()> {
        let (action_name, emergency_threshold) = {
            let mut t = task.lock().await;
            let action_name = t.exec_str("action_name").unwrap_or("watch").to_string();
            if !self.registry.contains(&action_name) {
                t.transition_to(
                    TaskStatus::Failed,
                    format!("Action '{action_name}' not registered"),
                );
                return Ok(());
            }
            let threshold = t
                .execution_data
                .get("emergency_threshold")
                .and_then(Value::as_f64)
                .unwrap_or(0.8);
            (action_name, threshold)
        };

        debug!(%action_name, "patrol sweep");
        let outcome = self.registry.execute(&action_name, Value::Null).await;
        if !outcome.success {
            let error = outcome.error.unwrap_or_else(|| "unknown error".into());
            let mut t = task.lock().await;
            t.result = Some(json!({ "success": false, "error": error.clone() }));
            t.transition_to(TaskStatus::Failed, format!("Action failed: {error}"));
            return Ok(());
        }

        let analysis = outcome.output;
        let emergency = analysis["emergency"].as_bool().unwrap_or(false);
        let confidence = analysis["confidence"].as_f64().unwrap_or(0.0);

        if emergency && confidence >= emergency_threshold {
            warn!(confidence, "emergency detected, escalating");
            let mut execution_data = Map::new();
            execution_data.insert("command_type".into(), json!("alert"));
            execution_data.insert("command_params".into(), analysis.clone());
            let alert = Task::new(TaskType::UserCommand)
                .with_priority(8)
                .with_timeout(30.0)
                .with_execution_data(execution_data);
            let alert_id = self.sink.enqueue(alert).await;
            debug!(%alert_id, "alert task enqueued");
        }

        let mut t = task.lock().await;
        t.result = Some(json!({
            "success": true,
            "analysis": analysis,
            "emergency_detected": emergency,
        }));
        t.transition_to(TaskStatus::Completed, "Patrol completed");
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
