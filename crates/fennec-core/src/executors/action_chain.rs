// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use fennec_tasks::{SharedTask, TaskExecutor, TaskStatus};

use crate::actions::ActionRegistry;

/// Runs several capabilities in order, feeding each output into the next
/// input; a failure stops the chain.
pub struct ActionChainExecutor {
    registry: Arc<ActionRegistry>,
}

impl ActionChainExecutor {
    pub fn new(registry: Arc<ActionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl TaskExecutor for ActionChainExecutor {
    async fn execute(&self, task: SharedTask) -> anyhow::Result<()> {
        let (action_names, initial_input) = {
            let mut t = task.lock().await;
            let names: Vec<String> = t
                .execution_data
                .get("action_names")
                .and_then(Value::as_array)
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if names.is_empty() {
                t.transition_to(TaskStatus::Failed, "No action_names provided");
                return Ok(());
            }
            for name in &names {
                if !self.registry.contains(name) {
                    t.transition_to(
                        TaskStatus::Failed,
                        format!("Action '{name}' not registered"),
                    );
                    return Ok(());
                }
            }
            let input = t
                .execution_data
                .get("initial_input")
                .cloned()
                .unwrap_or(Value::Null);
            (names, input)
        };

        debug!(actions = action_names.len(), "action chain started");
        let mut results = Vec::new();
        let mut current_input = initial_input;

        for name in &action_names {
            let result = self.registry.execute(name, current_input.clone()).await;
            results.push(json!({
                "action": name,
                "success": result.success,
                "output": result.output,
                "error": result.error,
            }));

            if !result.success {
                let mut t = task.lock().await;
                t.result = Some(json!({
                    "success": false,
                    "stopped_at": name,
                    "results": results,
                }));
                t.transition_to(TaskStatus::Failed, format!("Action '{name}' failed"));
                return Ok(());
            }
            current_input = result.output;
        }

        let mut t = task.lock().await;
        t.result = Some(json!({
            "success": true,
            "results": results,
            "final_output": current_input,
        }));
        t.transition_to(TaskStatus::Completed, "All actions completed");
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

    struct IncrementAction {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl Action for IncrementAction {
        fn name(&self) -> &str {
            self.name
        }
        async fn execute(&self, input: Value) -> ActionResult {
            if self.fail {
                return ActionResult::err("boom");
            }
            let n = input.as_i64().unwrap_or(0);
            ActionResult::ok(json!(n + 1))
        }
    }

    fn chain_task(names: &[&str], initial: Value) -> SharedTask {
        let mut execution_data = Map::new();
        execution_data.insert("action_names".into(), json!(names));
        execution_data.insert("initial_input".into(), initial);
        shared(Task::new(TaskType::ActionChain).with_execution_data(execution_data))
    }

    #[tokio::test]
    async fn chain_threads_outputs() {
        let registry = Arc::new(ActionRegistry::new());
        registry.register(Arc::new(IncrementAction { name: "inc1", fail: false }));
        registry.register(Arc::new(IncrementAction { name: "inc2", fail: false }));
        let executor = ActionChainExecutor::new(registry);

        let task = chain_task(&["inc1", "inc2"], json!(0));
        executor.execute(task.clone()).await.unwrap();

        let t = task.lock().await;
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.result.as_ref().unwrap()["final_output"], 2);
    }

    #[tokio::test]
    async fn failure_stops_chain_and_records_position() {
        let registry = Arc::new(ActionRegistry::new());
        registry.register(Arc::new(IncrementAction { name: "ok", fail: false }));
        registry.register(Arc::new(IncrementAction { name: "bad", fail: true }));
        registry.register(Arc::new(IncrementAction { name: "never", fail: false }));
        let executor = ActionChainExecutor::new(registry);

        let task = chain_task(&["ok", "bad", "never"], json!(0));
        executor.execute(task.clone()).await.unwrap();

        let t = task.lock().await;
        assert_eq!(t.status, TaskStatus::Failed);
        let result = t.result.as_ref().unwrap();
        assert_eq!(result["stopped_at"], "bad");
        assert_eq!(result["results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_chain_fails_validation() {
        let executor = ActionChainExecutor::new(Arc::new(ActionRegistry::new()));
        let task = chain_task(&[], Value::Null);
        executor.execute(task.clone()).await.unwrap();
        assert_eq!(task.lock().await.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn unregistered_member_fails_validation() {
        let registry = Arc::new(ActionRegistry::new());
        registry.register(Arc::new(IncrementAction { name: "only", fail: false }));
        let executor = ActionChainExecutor::new(registry);
        let task = chain_task(&["only", "ghost"], Value::Null);
        executor.execute(task.clone()).await.unwrap();
        assert_eq!(task.lock().await.status, TaskStatus::Failed);
    }
}
