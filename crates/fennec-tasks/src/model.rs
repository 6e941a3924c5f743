// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub type TaskId = String;

/// A task shared between the queue (lookup), the scheduler (cancellable
/// handle) and the executor currently mutating it.
pub type SharedTask = Arc<tokio::sync::Mutex<Task>>;

/// Wrap a task for shared ownership.
pub fn shared(task: Task) -> SharedTask {
    Arc::new(tokio::sync::Mutex::new(task))
}

/// Wall-clock seconds since the epoch, fractional.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Patrol,
    McpCall,
    UserCommand,
    ActionChain,
    Conversation,
    Dispatcher,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Retrying,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

/// One step of an execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    /// Natural-language description; becomes the router goal for the step.
    pub description: String,
    /// Tool the planner expects this step to use, if it named one.
    pub expected_tool: Option<String>,
    pub status: StepStatus,
    /// Normalized tool envelope recorded after execution.
    pub execution_result: Option<Value>,
    pub skip_reason: Option<String>,
    pub started_at: Option<f64>,
    pub completed_at: Option<f64>,
}

impl PlanStep {
    pub fn new(description: impl Into<String>, expected_tool: Option<String>) -> Self {
        Self {
            step_id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            expected_tool,
            status: StepStatus::Pending,
            execution_result: None,
            skip_reason: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// An ordered execution plan owned by a single task and inherited by its
/// successor tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    /// Index of the next step to execute.
    pub current_step_index: usize,
    pub created_at: f64,
    pub updated_at: f64,
    pub revision_count: u32,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        let now = now_ts();
        Self {
            steps,
            current_step_index: 0,
            created_at: now,
            updated_at: now,
            revision_count: 0,
        }
    }

    pub fn current_step(&self) -> Option<&PlanStep> {
        self.steps.get(self.current_step_index)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut PlanStep> {
        self.steps.get_mut(self.current_step_index)
    }

    /// Complete iff the cursor has passed the last step and every step
    /// ended Completed or Skipped.  An empty plan is never complete.
    pub fn is_completed(&self) -> bool {
        !self.steps.is_empty()
            && self.current_step_index >= self.steps.len()
            && self
                .steps
                .iter()
                .all(|s| matches!(s.status, StepStatus::Completed | StepStatus::Skipped))
    }

    pub fn advance_step(&mut self) {
        self.current_step_index += 1;
        self.updated_at = now_ts();
    }

    pub fn increment_revision(&mut self) {
        self.revision_count += 1;
        self.updated_at = now_ts();
    }
}

/// Append-only history entry.  The tagged encoding keeps task dumps
/// readable while letting each event kind carry its own fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    StatusTransition {
        timestamp: f64,
        old_status: TaskStatus,
        new_status: TaskStatus,
        reason: String,
    },
    ToolCall {
        timestamp: f64,
        step: usize,
        server_id: Option<String>,
        tool: String,
        arguments: Value,
        result: Value,
    },
    PlanGenerated {
        timestamp: f64,
        steps: usize,
    },
    PlanRevised {
        timestamp: f64,
        reason: String,
        revision_count: u32,
        added_steps: usize,
    },
    Retry {
        timestamp: f64,
        retry_count: u32,
        max_retries: u32,
    },
    Log {
        timestamp: f64,
        level: String,
        message: String,
    },
}

/// The uniform task record.
///
/// Mutated exclusively by the executor currently running it or by
/// `cancel`; a terminal task is immutable (further transitions are
/// rejected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub task_type: TaskType,
    /// 1–10, higher runs first.
    pub priority: u8,
    pub status: TaskStatus,
    pub created_at: f64,
    pub updated_at: f64,
    /// Overall deadline in seconds, enforced by the scheduler.
    pub timeout: f64,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Free-form cross-step data.
    pub context: Map<String, Value>,
    /// Task-type-specific inputs (`goal`, `user_text`, `mode`, ...).
    pub execution_data: Map<String, Value>,
    pub history: Vec<HistoryEvent>,
    /// Final or latest output.
    pub result: Option<Value>,
    pub plan: Option<Plan>,
}

impl Task {
    pub fn new(task_type: TaskType) -> Self {
        let now = now_ts();
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            task_type,
            priority: 5,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            timeout: 60.0,
            retry_count: 0,
            max_retries: 3,
            context: Map::new(),
            execution_data: Map::new(),
            history: Vec::new(),
            result: None,
            plan: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_timeout(mut self, timeout_secs: f64) -> Self {
        self.timeout = timeout_secs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_execution_data(mut self, execution_data: Map<String, Value>) -> Self {
        self.execution_data = execution_data;
        self
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Record a status transition.  Transitions out of a terminal status
    /// are rejected; the first terminal state wins.
    pub fn transition_to(&mut self, new_status: TaskStatus, reason: impl Into<String>) {
        if self.status.is_terminal() {
            warn!(
                task_id = %self.task_id,
                from = ?self.status,
                to = ?new_status,
                "ignoring transition out of terminal status"
            );
            return;
        }
        let reason = reason.into();
        let old_status = self.status;
        self.status = new_status;
        self.updated_at = now_ts();
        self.history.push(HistoryEvent::StatusTransition {
            timestamp: self.updated_at,
            old_status,
            new_status,
            reason: reason.clone(),
        });
        debug!(task_id = %self.task_id, from = ?old_status, to = ?new_status, %reason, "status transition");
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
        self.updated_at = now_ts();
        self.history.push(HistoryEvent::Retry {
            timestamp: self.updated_at,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
        });
    }

    /// Append a log line to the history.
    pub fn log(&mut self, level: &str, message: impl Into<String>) {
        self.history.push(HistoryEvent::Log {
            timestamp: now_ts(),
            level: level.into(),
            message: message.into(),
        });
    }

    /// String field from `execution_data`.
    pub fn exec_str(&self, key: &str) -> Option<&str> {
        self.execution_data.get(key).and_then(|v| v.as_str())
    }

    /// String field from `context`.
    pub fn ctx_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(|v| v.as_str())
    }

    pub fn ctx_set(&mut self, key: &str, value: Value) {
        self.context.insert(key.to_string(), value);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
