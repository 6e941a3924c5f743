// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The agent facade: owns the task runtime, the capability registry, and
//! the executor wiring; exposes the task submission API.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::info;

use fennec_config::{Config, PatrolConfig, TaskLoopConfig};
use fennec_mcp::{McpControlPlane, Router};
use fennec_model::LanguageModel;
use fennec_tasks::{
    LoopStatistics, PeriodicTrigger, Scheduler, Task, TaskId, TaskLoop, TaskQueue, TaskStatus,
    TaskTemplate, TaskType,
};

use crate::actions::{Action, ActionRegistry, ActionResult};
use crate::events::StateBroadcaster;
use crate::executors::{
    ActionChainExecutor, ConversationExecutor, Dispatcher, DispatcherExecutor, McpExecutor,
    McpExecutorSettings, PatrolExecutor, UserCommandExecutor,
};

pub struct Agent {
    registry: Arc<ActionRegistry>,
    queue: Arc<TaskQueue>,
    scheduler: Arc<Scheduler>,
    task_loop: Arc<TaskLoop>,
    patrol_trigger: std::sync::Mutex<Option<Arc<PeriodicTrigger>>>,
    control: std::sync::Mutex<Option<Arc<McpControlPlane>>>,
}

impl Agent {
    pub fn new(tasks: &TaskLoopConfig) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let scheduler = Arc::new(Scheduler::new(tasks.max_concurrent_tasks));
        let task_loop = Arc::new(TaskLoop::new(
            queue.clone(),
            scheduler.clone(),
            tasks.loop_interval_secs,
        ));
        Self {
            registry: Arc::new(ActionRegistry::new()),
            queue,
            scheduler,
            task_loop,
            patrol_trigger: std::sync::Mutex::new(None),
            control: std::sync::Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<ActionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn queue(&self) -> Arc<TaskQueue> {
        Arc::clone(&self.queue)
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    // ── Capabilities ──────────────────────────────────────────────────────────

    pub fn register_action(&self, action: Arc<dyn Action>) {
        self.registry.register(action);
    }

    pub fn unregister_action(&self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    pub async fn execute_action(&self, name: &str, input: Value) -> ActionResult {
        self.registry.execute(name, input).await
    }

    pub async fn execute_action_chain(&self, names: &[String], input: Value) -> Vec<ActionResult> {
        self.registry.execute_chain(names, input).await
    }

    // ── Wiring ────────────────────────────────────────────────────────────────

    /// Register the standard executor set.  Returns the conversation
    /// executor (for `start_listening`/`stop_listening` control) and the
    /// dispatcher (for the external request API).
    pub fn wire_default_executors(
        &self,
        llm: Arc<dyn LanguageModel>,
        control: Arc<McpControlPlane>,
        config: &Config,
        broadcaster: StateBroadcaster,
    ) -> (Arc<ConversationExecutor>, Arc<Dispatcher>) {
        let router = Arc::new(Router::new(llm.clone(), control.index()));

        let mcp_executor = Arc::new(McpExecutor::new(
            router,
            control.connections().clone(),
            self.queue.clone(),
            McpExecutorSettings::from(&config.executor),
        ));
        self.scheduler
            .register_executor(TaskType::McpCall, mcp_executor);

        let conversation = Arc::new(ConversationExecutor::new(
            self.registry.clone(),
            llm,
            control.index(),
            self.queue.clone(),
            config.conversation.clone(),
            broadcaster.clone(),
        ));
        self.scheduler
            .register_executor(TaskType::Conversation, conversation.clone());

        let dispatcher = Arc::new(Dispatcher::new(
            self.queue.clone(),
            self.registry.clone(),
            broadcaster,
        ));
        self.scheduler.register_executor(
            TaskType::Dispatcher,
            Arc::new(DispatcherExecutor::new(dispatcher.clone())),
        );

        self.scheduler.register_executor(
            TaskType::Patrol,
            Arc::new(PatrolExecutor::new(self.registry.clone(), self.queue.clone())),
        );
        self.scheduler.register_executor(
            TaskType::UserCommand,
            Arc::new(UserCommandExecutor::new(self.registry.clone())),
        );
        self.scheduler.register_executor(
            TaskType::ActionChain,
            Arc::new(ActionChainExecutor::new(self.registry.clone())),
        );

        if config.patrol.enabled {
            self.enable_patrol(&config.patrol);
        }

        *self.control.lock().unwrap() = Some(control);
        info!("executors wired");
        (conversation, dispatcher)
    }

    /// Install the periodic patrol trigger (started by [`Agent::start`]).
    pub fn enable_patrol(&self, patrol: &PatrolConfig) {
        let mut template = TaskTemplate::new(TaskType::Patrol);
        template.priority = patrol.priority;
        template
            .execution_data
            .insert("action_name".into(), json!("watch"));
        template.execution_data.insert(
            "emergency_threshold".into(),
            json!(patrol.emergency_threshold),
        );
        let trigger = Arc::new(PeriodicTrigger::new(
            self.queue.clone(),
            patrol.interval_secs,
            template,
            patrol.enabled,
        ));
        *self.patrol_trigger.lock().unwrap() = Some(trigger);
    }

    pub fn patrol_trigger(&self) -> Option<Arc<PeriodicTrigger>> {
        self.patrol_trigger.lock().unwrap().clone()
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    pub fn start(&self) {
        info!("agent starting");
        self.task_loop.start();
        if let Some(trigger) = self.patrol_trigger() {
            trigger.start();
        }
    }

    pub async fn shutdown(&self) {
        info!("agent shutting down");
        if let Some(trigger) = self.patrol_trigger() {
            trigger.stop();
        }
        self.task_loop.stop();
        self.registry.clear();
        let control = self.control.lock().unwrap().clone();
        if let Some(control) = control {
            control.close().await;
        }
    }

    // ── Task API ──────────────────────────────────────────────────────────────

    pub async fn submit_task(&self, task: Task) -> TaskId {
        self.queue.push(task).await
    }

    /// Submit the long-lived conversation task (priority 10, 24h
    /// deadline).  `mode` is `"loop"` or `"once"`.
    pub async fn start_conversation(&self, mode: &str) -> TaskId {
        let mut execution_data = Map::new();
        execution_data.insert("mode".into(), json!(mode));
        let task = Task::new(TaskType::Conversation)
            .with_priority(10)
            .with_timeout(86_400.0)
            .with_execution_data(execution_data);
        self.submit_task(task).await
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        match self.queue.get_by_id(task_id).await {
            Some(task) => Some(task.lock().await.status),
            None => None,
        }
    }

    /// Snapshot of the full task record.
    pub async fn get_task_detail(&self, task_id: &str) -> Option<Task> {
        match self.queue.get_by_id(task_id).await {
            Some(task) => Some(task.lock().await.clone()),
            None => None,
        }
    }

    /// Cancel a Pending or Running task; a running worker is also torn
    /// down through the scheduler.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let cancelled = self.queue.cancel(task_id).await;
        if cancelled {
            self.scheduler.cancel_running(task_id).await;
        }
        cancelled
    }

    pub async fn statistics(&self) -> LoopStatistics {
        self.task_loop.statistics().await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fennec_config::McpConfig;
    use fennec_model::ScriptedModel;

    struct NoopAction;

    #[async_trait]
    impl Action for NoopAction {
        fn name(&self) -> &str {
            "speak"
        }
        async fn execute(&self, _input: Value) -> ActionResult {
            ActionResult::ok(json!({ "success": true }))
        }
    }

    fn agent() -> Agent {
        Agent::new(&TaskLoopConfig::default())
    }

    #[tokio::test]
    async fn submit_and_query_task() {
        let a = agent();
        let id = a.submit_task(Task::new(TaskType::McpCall)).await;
        assert_eq!(a.get_task_status(&id).await, Some(TaskStatus::Pending));
        let detail = a.get_task_detail(&id).await.unwrap();
        assert_eq!(detail.task_id, id);
        assert!(a.get_task_status("ghost").await.is_none());
    }

    #[tokio::test]
    async fn cancel_pending_task() {
        let a = agent();
        let id = a.submit_task(Task::new(TaskType::McpCall)).await;
        assert!(a.cancel_task(&id).await);
        assert_eq!(a.get_task_status(&id).await, Some(TaskStatus::Cancelled));
        assert!(!a.cancel_task(&id).await, "terminal tasks are not cancellable");
    }

    #[tokio::test]
    async fn action_registration_round_trip() {
        let a = agent();
        a.register_action(Arc::new(NoopAction));
        let out = a.execute_action("speak", json!({ "text": "hi" })).await;
        assert!(out.success);
        assert!(a.unregister_action("speak"));
    }

    #[tokio::test]
    async fn wiring_registers_all_executor_types() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            mcp: McpConfig {
                cache_path: Some(dir.path().join("index.json")),
                ..McpConfig::default()
            },
            ..Config::default()
        };
        let control = Arc::new(McpControlPlane::initialize(&config.mcp, vec![]).await);
        let a = agent();
        let (conversation, dispatcher) = a.wire_default_executors(
            Arc::new(ScriptedModel::always_text("ok")),
            control,
            &config,
            StateBroadcaster::none(),
        );
        assert!(!conversation.is_running());
        assert!(dispatcher.status("none").is_none());
        assert!(a.patrol_trigger().is_none(), "patrol disabled by default");
    }

    #[tokio::test]
    async fn start_conversation_submits_high_priority_task() {
        let a = agent();
        let id = a.start_conversation("loop").await;
        let detail = a.get_task_detail(&id).await.unwrap();
        assert_eq!(detail.task_type, TaskType::Conversation);
        assert_eq!(detail.priority, 10);
        assert_eq!(detail.exec_str("mode"), Some("loop"));
        assert_eq!(detail.timeout, 86_400.0);
    }

    #[tokio::test]
    async fn statistics_snapshot() {
        let a = agent();
        a.submit_task(Task::new(TaskType::McpCall)).await;
        let stats = a.statistics().await;
        assert!(!stats.loop_running);
        assert_eq!(stats.queue_size, 1);
    }
}
