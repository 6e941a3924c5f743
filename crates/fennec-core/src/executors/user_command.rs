// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use fennec_tasks::{SharedTask, TaskExecutor, TaskStatus};

use crate::actions::ActionRegistry;

/// Executes user commands submitted over the external API: `speak`,
/// `alert`, generic `action` invocations, and the (unimplemented)
/// `custom` escape hatch.
pub struct UserCommandExecutor {
    registry: Arc<ActionRegistry>,
}

impl UserCommandExecutor {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TaskExecutor for UserCommandExecutor {
    async fn execute(&self, task: SharedTask) -> anyhow::Result<()> {
        let (command_type, params) = {
            let mut t = task.lock().await;
            let Some(command_type) = t.exec_str("command_type").map(str::to_string) else {
                t.transition_to(TaskStatus::Failed, "No command_type provided");
                return Ok(());
            };
            let params = t
                .execution_data
                .get("command_params")
                .cloned()
                .unwrap_or(Value::Null);
            (command_type, params)
        };

        debug!(%command_type, "user command");
        match command_type.as_str() {
            "speak" => {
                let Some(text) = params["text"].as_str().filter(|t| !t.is_empty()) else {
                    task.lock()
                        .await
                        .transition_to(TaskStatus::Failed, "No text provided");
                    return Ok(());
                };
                let result = self.registry.execute("speak", json!({ "text": text })).await;
                let mut t = task.lock().await;
                if result.success {
                    t.result = Some(json!({ "success": true, "action": "speak" }));
                    t.transition_to(TaskStatus::Completed, "Speak completed");
                } else {
                    let error = result.error.unwrap_or_default();
                    t.result = Some(json!({ "success": false, "error": error.clone() }));
                    t.transition_to(TaskStatus::Failed, format!("Speak failed: {error}"));
                }
            }
            "alert" => {
                let result = self.registry.execute("alert", params).await;
                let mut t = task.lock().await;
                if result.success {
                    t.result = Some(json!({ "success": true, "action": "alert" }));
                    t.transition_to(TaskStatus::Completed, "Alert completed");
                } else {
                    let error = result.error.unwrap_or_default();
                    t.result = Some(json!({ "success": false, "error": error.clone() }));
                    t.transition_to(TaskStatus::Failed, format!("Alert failed: {error}"));
                }
            }
            "action" => {
                let Some(action_name) = params["action_name"].as_str() else {
                    task.lock()
                        .await
                        .transition_to(TaskStatus::Failed, "No action_name provided");
                    return Ok(());
                };
                if !self.registry.contains(action_name) {
                    task.lock().await.transition_to(
                        TaskStatus::Failed,
                        format!("Action '{action_name}' not found"),
                    );
                    return Ok(());
                }
                let input = params.get("input_data").cloned().unwrap_or(Value::Null);
                let result = self.registry.execute(action_name, input).await;
                let mut t = task.lock().await;
                if result.success {
                    t.result = Some(json!({
                        "success": true,
                        "action": action_name,
                        "output": result.output,
                    }));
                    t.transition_to(
                        TaskStatus::Completed,
                        format!("Action '{action_name}' completed"),
                    );
                } else {
                    let error = result.error.unwrap_or_default();
                    t.result = Some(json!({ "success": false, "error": error.clone() }));
                    t.transition_to(TaskStatus::Failed, format!("Action failed: {error}"));
                }
            }
            "custom" => {
                let mut t = task.lock().await;
                t.result =
                    Some(json!({ "success": false, "error": "Custom command not implemented" }));
                t.transition_to(TaskStatus::Failed, "Not implemented");
            }
            other => {
                let mut t = task.lock().await;
                t.result = Some(json!({
                    "success": false,
                    "error": format!("Unknown command type: {other}"),
                }));
                t.transition_to(TaskStatus::Failed, format!("Unknown command type: {other}"));
            }
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionResult};
    use fennec_tasks::{shared, Task, TaskType};
    use serde_json::Map;

    struct OkAction {
        name: &'static str,
    }

    #[async_trait]
    impl Action for OkAction {
        fn name(&self) -> &str {
            self.name
        }
        async fn execute(&self, input: Value) -> ActionResult {
            ActionResult::ok(json!({ "input": input }))
        }
    }

    fn command_task(command_type: &str, params: Value) -> SharedTask {
        let mut execution_data = Map::new();
        execution_data.insert("command_type".into(), json!(command_type));
        execution_data.insert("command_params".into(), params);
        shared(Task::new(TaskType::UserCommand).with_execution_data(execution_data))
    }

    fn registry() -> Arc<ActionRegistry> {
        let registry = Arc::new(ActionRegistry::new());
        registry.register(Arc::new(OkAction { name: "speak" }));
        registry.register(Arc::new(OkAction { name: "alert" }));
        registry.register(Arc::new(OkAction { name: "wave" }));
        registry
    }

    #[tokio::test]
    async fn speak_command_runs_capability() {
        let executor = UserCommandExecutor::new(registry());
        let task = command_task("speak", json!({ "text": "hello" }));
        executor.execute(task.clone()).await.unwrap();
        let t = task.lock().await;
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result.as_ref().unwrap()["action"], "speak");
    }

    #[tokio::test]
    async fn speak_without_text_fails() {
        let executor = UserCommandExecutor::new(registry());
        let task = command_task("speak", json!({}));
        executor.execute(task.clone()).await.unwrap();
        assert_eq!(task.lock().await.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn generic_action_command() {
        let executor = UserCommandExecutor::new(registry());
        let task = command_task(
            "action",
            json!({ "action_name": "wave", "input_data": { "times": 2 } }),
        );
        executor.execute(task.clone()).await.unwrap();
        let t = task.lock().await;
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result.as_ref().unwrap()["output"]["input"]["times"], 2);
    }

    #[tokio::test]
    async fn unknown_action_fails() {
        let executor = UserCommandExecutor::new(registry());
        let task = command_task("action", json!({ "action_name": "missing" }));
        executor.execute(task.clone()).await.unwrap();
        assert_eq!(task.lock().await.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn custom_command_is_unimplemented() {
        let executor = UserCommandExecutor::new(registry());
        let task = command_task("custom", json!({}));
        executor.execute(task.clone()).await.unwrap();
        assert_eq!(task.lock().await.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn missing_command_type_fails() {
        let executor = UserCommandExecutor::new(registry());
        let task = shared(Task::new(TaskType::UserCommand));
        executor.execute(task.clone()).await.unwrap();
        assert_eq!(task.lock().await.status, TaskStatus::Failed);
    }
}
