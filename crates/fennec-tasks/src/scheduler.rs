// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::model::{SharedTask, TaskStatus, TaskType};

/// A component bound to one [`TaskType`] that drives a task to a terminal
/// status.  On a normal return the executor has already set the terminal
/// status itself; an `Err` is the last-resort escape hatch that the
/// scheduler converts into `Failed`.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: SharedTask) -> anyhow::Result<()>;
}

/// Dispatches tasks to their type's executor under the task's deadline,
/// enforcing a global in-flight limit.  The scheduler itself never
/// retries; executors that want retry semantics enqueue a new task.
pub struct Scheduler {
    max_concurrent: usize,
    executors: RwLock<HashMap<TaskType, Arc<dyn TaskExecutor>>>,
    running: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl Scheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            executors: RwLock::new(HashMap::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn register_executor(&self, task_type: TaskType, executor: Arc<dyn TaskExecutor>) {
        debug!(?task_type, "executor registered");
        self.executors.write().unwrap().insert(task_type, executor);
    }

    fn executor_for(&self, task_type: TaskType) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.read().unwrap().get(&task_type).cloned()
    }

    /// True iff a further task may be started right now.
    pub async fn can_schedule(&self) -> bool {
        self.running.lock().await.len() < self.max_concurrent
    }

    /// Start executing a task.  Returns `false` (leaving the task Pending)
    /// when the concurrency limit is reached, or (failing the task) when no
    /// executor is registered for its type.
    pub async fn schedule(&self, task: SharedTask) -> bool {
        let (task_id, task_type, timeout_secs) = {
            let t = task.lock().await;
            (t.task_id.clone(), t.task_type, t.timeout)
        };

        let mut running = self.running.lock().await;
        if running.len() >= self.max_concurrent {
            debug!(%task_id, in_flight = running.len(), "concurrency limit reached");
            return false;
        }

        let executor = match self.executor_for(task_type) {
            Some(e) => e,
            None => {
                warn!(%task_id, ?task_type, "no executor registered");
                task.lock()
                    .await
                    .transition_to(TaskStatus::Failed, format!("No executor for {task_type:?}"));
                return false;
            }
        };

        task.lock().await.transition_to(TaskStatus::Running, "Scheduled");

        let running_map = Arc::clone(&self.running);
        let worker_task = task.clone();
        let worker_id = task_id.clone();
        let handle = tokio::spawn(async move {
            let deadline = Duration::from_secs_f64(timeout_secs.max(0.0));
            match tokio::time::timeout(deadline, executor.execute(worker_task.clone())).await {
                // Normal return: the executor set the terminal status.
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(task_id = %worker_id, error = %e, "executor error");
                    let mut t = worker_task.lock().await;
                    t.result = Some(json!({ "error": e.to_string() }));
                    t.transition_to(TaskStatus::Failed, format!("Execution error: {e}"));
                }
                Err(_) => {
                    warn!(task_id = %worker_id, timeout_secs, "task deadline exceeded");
                    worker_task
                        .lock()
                        .await
                        .transition_to(TaskStatus::Failed, format!("timeout after {timeout_secs}s"));
                }
            }
            running_map.lock().await.remove(&worker_id);
        });

        running.insert(task_id, handle);
        true
    }

    /// Abort a running worker.  The task's status is flipped to Cancelled
    /// by the queue-side cancel; this only tears the worker down.
    pub async fn cancel_running(&self, task_id: &str) -> bool {
        if let Some(handle) = self.running.lock().await.remove(task_id) {
            handle.abort();
            debug!(%task_id, "running worker aborted");
            return true;
        }
        false
    }

    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    pub async fn running_task_ids(&self) -> Vec<String> {
        self.running.lock().await.keys().cloned().collect()
    }

    /// Drop handles whose workers already finished (including aborted
    /// ones); returns how many were reaped.
    pub async fn reap_finished(&self) -> usize {
        let mut running = self.running.lock().await;
        let finished: Vec<String> = running
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in &finished {
            running.remove(id);
        }
        finished.len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
