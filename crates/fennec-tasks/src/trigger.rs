// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::model::{Task, TaskType};
use crate::queue::TaskSink;

/// Blueprint for tasks a [`PeriodicTrigger`] materializes.  Each firing
/// produces a fresh task (new id, fresh timestamps) from these fields.
#[derive(Debug, Clone)]
pub struct TaskTemplate {
    pub task_type: TaskType,
    pub priority: u8,
    pub timeout_secs: f64,
    pub max_retries: u32,
    pub context: Map<String, Value>,
    pub execution_data: Map<String, Value>,
}

impl TaskTemplate {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            priority: 3,
            timeout_secs: 60.0,
            max_retries: 3,
            context: Map::new(),
            execution_data: Map::new(),
        }
    }

    pub fn materialize(&self) -> Task {
        Task::new(self.task_type)
            .with_priority(self.priority)
            .with_timeout(self.timeout_secs)
            .with_max_retries(self.max_retries)
            .with_context(self.context.clone())
            .with_execution_data(self.execution_data.clone())
    }
}

/// Enqueues a templated task every `interval`.  Disabling stops further
/// enqueues but does not affect instances already queued or running.
pub struct PeriodicTrigger {
    sink: Arc<dyn TaskSink>,
    interval: Duration,
    template: TaskTemplate,
    enabled: AtomicBool,
    running: AtomicBool,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTrigger {
    pub fn new(
        sink: Arc<dyn TaskSink>,
        interval_secs: f64,
        template: TaskTemplate,
        enabled: bool,
    ) -> Self {
        Self {
            sink,
            interval: Duration::from_secs_f64(interval_secs.max(0.01)),
            template,
            enabled: AtomicBool::new(enabled),
            running: AtomicBool::new(false),
            handle: std::sync::Mutex::new(None),
        }
    }

    /// Spawn the trigger loop.  No-op when disabled or already running.
    pub fn start(self: &Arc<Self>) {
        if !self.enabled.load(Ordering::SeqCst) {
            debug!("trigger disabled, not starting");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("trigger already running");
            return;
        }
        info!(interval = ?self.interval, "periodic trigger started");

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while this.running.load(Ordering::SeqCst) {
                tokio::time::sleep(this.interval).await;
                if !this.running.load(Ordering::SeqCst) {
                    break;
                }
                let task = this.template.materialize();
                let task_id = this.sink.enqueue(task).await;
                debug!(%task_id, "periodic task enqueued");
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
        info!("periodic trigger stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Toggle the trigger; enabling starts the loop, disabling stops it.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled && !self.is_running() {
            self.start();
        } else if !enabled && self.is_running() {
            self.stop();
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
