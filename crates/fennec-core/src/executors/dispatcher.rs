// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Bridge from the external request API into the task runtime.
//!
//! The surrounding HTTP/WebSocket layer validates a request envelope and
//! hands it to [`Dispatcher::dispatch`]; execution then flows through the
//! queue as a `Dispatcher` task.  Task state is mirrored into an
//! external-facing status map, and completion fires the request's
//! callback URL plus a `status` broadcast event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use fennec_tasks::{
    now_ts, HistoryEvent, SharedTask, Task, TaskExecutor, TaskQueue, TaskStatus, TaskType,
};

use crate::actions::ActionRegistry;
use crate::events::StateBroadcaster;

const MCP_REQUEST_TIMEOUT_SECS: u64 = 300;

/// Validated request envelope from the external API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: String,
    pub task_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub priority: Option<u8>,
    pub timeout: Option<f64>,
    pub callback_url: Option<String>,
}

/// External-facing view of one dispatched task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub status: String,
    pub created_at: f64,
    pub updated_at: f64,
    pub message: String,
    pub callback_url: Option<String>,
    pub result: Option<Value>,
    pub parameters: Map<String, Value>,
}

pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    registry: Arc<ActionRegistry>,
    broadcaster: StateBroadcaster,
    status_map: std::sync::Mutex<HashMap<String, TaskInfo>>,
    http: reqwest::Client,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<TaskQueue>,
        registry: Arc<ActionRegistry>,
        broadcaster: StateBroadcaster,
    ) -> Self {
        Self {
            queue,
            registry,
            broadcaster,
            status_map: std::sync::Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Convert a request into a `Dispatcher` task, record it in the
    /// status mirror, and enqueue it.  Returns the external task id.
    pub async fn dispatch(&self, request: TaskRequest) -> String {
        let mut task = Task::new(TaskType::Dispatcher)
            .with_priority(request.priority.unwrap_or(5))
            .with_timeout(request.timeout.unwrap_or(300.0));
        let task_id = task.task_id.clone();

        task.context
            .insert("dispatcher_task_type".into(), json!(request.task_type));
        task.context.insert("task_name".into(), json!(request.task_name));
        task.execution_data.insert(
            "task_request".into(),
            serde_json::to_value(&request).unwrap_or(Value::Null),
        );
        task.execution_data
            .insert("task_id_for_callback".into(), json!(task_id));

        self.status_map.lock().unwrap().insert(
            task_id.clone(),
            TaskInfo {
                task_id: task_id.clone(),
                status: "pending".into(),
                created_at: now_ts(),
                updated_at: now_ts(),
                message: "Task created and queued".into(),
                callback_url: request.callback_url.clone(),
                result: None,
                parameters: request.parameters.clone(),
            },
        );

        self.queue.push(task).await;
        debug!(%task_id, task_type = %request.task_type, "dispatcher task created");
        task_id
    }

    pub fn status(&self, task_id: &str) -> Option<TaskInfo> {
        self.status_map.lock().unwrap().get(task_id).cloned()
    }

    pub(crate) fn update_status(
        &self,
        task_id: &str,
        status: &str,
        message: String,
        result: Option<Value>,
    ) {
        if let Some(info) = self.status_map.lock().unwrap().get_mut(task_id) {
            info.status = status.to_string();
            info.message = message;
            info.updated_at = now_ts();
            if result.is_some() {
                info.result = result;
            }
        }
    }

    /// Run the request body.  Recognised `parameters.executor_type`
    /// values are `"action"` (invoke a capability) and `"mcp"` (submit an
    /// MCP sub-task and wait for it).
    pub async fn execute_request(&self, request: &TaskRequest) -> Value {
        let executor_type = request
            .parameters
            .get("executor_type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match executor_type {
            "action" => self.execute_action_request(request).await,
            "mcp" => self.execute_mcp_request(request).await,
            _ => json!({
                "message": format!("Custom task '{}' executed", request.task_type),
                "parameters": request.parameters,
            }),
        }
    }

    async fn execute_action_request(&self, request: &TaskRequest) -> Value {
        let Some(action_name) = request.parameters.get("action_name").and_then(Value::as_str)
        else {
            return json!({ "success": false, "error": "Missing 'action_name' in parameters" });
        };
        let input = request
            .parameters
            .get("input_data")
            .cloned()
            .unwrap_or(Value::Null);

        let result = self.registry.execute(action_name, input).await;
        json!({
            "success": result.success,
            "output": result.output,
            "error": result.error,
        })
    }

    async fn execute_mcp_request(&self, request: &TaskRequest) -> Value {
        let Some(user_intent) = request.parameters.get("user_intent").and_then(Value::as_str)
        else {
            return json!({ "success": false, "error": "Missing 'user_intent' in parameters" });
        };
        let extra_context = request
            .parameters
            .get("context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let mut context = Map::new();
        context.insert("user_intent".into(), json!(user_intent));
        for (key, value) in extra_context {
            context.insert(key, value);
        }

        let mut execution_data = Map::new();
        execution_data.insert("goal".into(), json!(user_intent));
        execution_data.insert("current_step".into(), json!(0));
        execution_data.insert("max_steps".into(), json!(10));
        execution_data.insert("user_intent".into(), json!(user_intent));

        let task = Task::new(TaskType::McpCall)
            .with_priority(5)
            .with_timeout(300.0)
            .with_max_retries(3)
            .with_context(context)
            .with_execution_data(execution_data);
        let task_id = self.queue.push(task).await;
        debug!(%task_id, %user_intent, "MCP sub-task created for dispatcher request");

        for _ in 0..MCP_REQUEST_TIMEOUT_SECS {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let Some(task) = self.queue.get_by_id(&task_id).await else {
                break;
            };
            let t = task.lock().await;
            if !t.is_terminal() {
                continue;
            }
            return if t.status == TaskStatus::Completed {
                // Report the most recent successful tool payload.
                let output = t
                    .history
                    .iter()
                    .rev()
                    .find_map(|event| match event {
                        HistoryEvent::ToolCall { result, .. }
                            if result["success"].as_bool().unwrap_or(false) =>
                        {
                            result
                                .get("content")
                                .or_else(|| result.get("result"))
                                .cloned()
                        }
                        _ => None,
                    })
                    .unwrap_or_else(|| json!("Task completed"));
                json!({
                    "success": true,
                    "output": output,
                    "metadata": { "task_id": task_id },
                })
            } else {
                let error = t
                    .result
                    .as_ref()
                    .and_then(|r| r["error"].as_str())
                    .unwrap_or("Task failed");
                json!({
                    "success": false,
                    "error": error,
                    "metadata": { "task_id": task_id },
                })
            };
        }

        json!({
            "success": false,
            "error": "Task execution timeout",
            "metadata": { "task_id": task_id },
        })
    }

    /// Fire-and-report completion: POST to the callback URL (when set)
    /// and broadcast a `status` event.
    pub async fn notify(&self, task_id: &str, success: bool, result: &Value) {
        let callback_url = self
            .status_map
            .lock()
            .unwrap()
            .get(task_id)
            .and_then(|info| info.callback_url.clone());

        let payload = json!({
            "task_id": task_id,
            "success": success,
            "result": result,
            "timestamp": now_ts(),
        });

        if let Some(url) = callback_url {
            if let Err(e) = self.http.post(&url).json(&payload).send().await {
                warn!(%task_id, error = %e, "callback delivery failed");
            }
        }

        let mut data = Map::new();
        data.insert("task_id".into(), json!(task_id));
        data.insert("success".into(), json!(success));
        data.insert("result".into(), result.clone());
        self.broadcaster.emit("status", data);
    }
}

/// Executor for `Dispatcher` tasks: runs the embedded request, mirrors
/// the result, and fires callbacks.
pub struct DispatcherExecutor {
    dispatcher: Arc<Dispatcher>,
}

impl DispatcherExecutor {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl TaskExecutor for DispatcherExecutor {
    async fn execute(&self, task: SharedTask) -> anyhow::Result<()> {
        let (request, callback_id) = {
            let mut t = task.lock().await;
            let request = t
                .execution_data
                .get("task_request")
                .cloned()
                .and_then(|v| serde_json::from_value::<TaskRequest>(v).ok());
            let callback_id = t
                .exec_str("task_id_for_callback")
                .map(str::to_string)
                .unwrap_or_else(|| t.task_id.clone());
            match request {
                Some(request) => (request, callback_id),
                None => {
                    t.transition_to(TaskStatus::Failed, "Validation failed: no task_request");
                    return Ok(());
                }
            }
        };

        self.dispatcher
            .update_status(&callback_id, "running", "Task running".into(), None);

        let result = self.dispatcher.execute_request(&request).await;
        // Custom request kinds return no success flag and count as done.
        let success = result["success"].as_bool().unwrap_or(true);

        {
            let mut t = task.lock().await;
            t.result = Some(result.clone());
            if success {
                t.transition_to(TaskStatus::Completed, "Execution completed");
            } else {
                let error = result["error"].as_str().unwrap_or("Unknown error");
                t.transition_to(TaskStatus::Failed, error.to_string());
            }
        }

        if success {
            self.dispatcher.update_status(
                &callback_id,
                "completed",
                "Task completed successfully".into(),
                Some(result.clone()),
            );
        } else {
            let message = format!(
                "Task failed: {}",
                result["error"].as_str().unwrap_or("Unknown error")
            );
            self.dispatcher
                .update_status(&callback_id, "failed", message, Some(result.clone()));
        }
        self.dispatcher.notify(&callback_id, success, &result).await;
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, ActionResult};
    use fennec_tasks::shared;

    struct EchoAction;

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &str {
            "echo"
        }
        async fn execute(&self, input: Value) -> ActionResult {
            ActionResult::ok(json!({ "echoed": input }))
        }
    }

    fn dispatcher() -> Arc<Dispatcher> {
        let registry = Arc::new(ActionRegistry::new());
        registry.register(Arc::new(EchoAction));
        Arc::new(Dispatcher::new(
            Arc::new(TaskQueue::new()),
            registry,
            StateBroadcaster::none(),
        ))
    }

    fn action_request() -> TaskRequest {
        let mut parameters = Map::new();
        parameters.insert("executor_type".into(), json!("action"));
        parameters.insert("action_name".into(), json!("echo"));
        parameters.insert("input_data".into(), json!("ping"));
        TaskRequest {
            task_type: "execute_action".into(),
            task_name: "echo-test".into(),
            parameters,
            priority: Some(6),
            timeout: Some(30.0),
            callback_url: None,
        }
    }

    #[tokio::test]
    async fn dispatch_creates_pending_mirror_entry() {
        let d = dispatcher();
        let task_id = d.dispatch(action_request()).await;
        let info = d.status(&task_id).unwrap();
        assert_eq!(info.status, "pending");
        assert_eq!(info.parameters["action_name"], "echo");
    }

    #[tokio::test]
    async fn action_request_invokes_capability() {
        let d = dispatcher();
        let result = d.execute_request(&action_request()).await;
        assert_eq!(result["success"], true);
        assert_eq!(result["output"]["echoed"], "ping");
    }

    #[tokio::test]
    async fn unknown_executor_type_is_custom() {
        let d = dispatcher();
        let mut request = action_request();
        request.parameters.remove("executor_type");
        let result = d.execute_request(&request).await;
        assert!(result["message"].as_str().unwrap().contains("execute_action"));
    }

    #[tokio::test]
    async fn missing_action_name_fails() {
        let d = dispatcher();
        let mut request = action_request();
        request.parameters.remove("action_name");
        let result = d.execute_request(&request).await;
        assert_eq!(result["success"], false);
    }

    #[tokio::test]
    async fn executor_mirrors_completion_and_sets_result() {
        let d = dispatcher();
        let task_id = d.dispatch(action_request()).await;
        let task = d.queue.get_by_id(&task_id).await.unwrap();
        {
            // The scheduler would do this before invoking the executor.
            task.lock().await.transition_to(TaskStatus::Running, "test");
        }

        let executor = DispatcherExecutor::new(d.clone());
        executor.execute(task.clone()).await.unwrap();

        assert_eq!(task.lock().await.status, TaskStatus::Completed);
        let info = d.status(&task_id).unwrap();
        assert_eq!(info.status, "completed");
        assert_eq!(info.result.as_ref().unwrap()["output"]["echoed"], "ping");
    }

    #[tokio::test]
    async fn executor_without_request_fails_validation() {
        let d = dispatcher();
        let task = shared(Task::new(TaskType::Dispatcher));
        task.lock().await.transition_to(TaskStatus::Running, "test");
        DispatcherExecutor::new(d).execute(task.clone()).await.unwrap();
        assert_eq!(task.lock().await.status, TaskStatus::Failed);
    }
}
