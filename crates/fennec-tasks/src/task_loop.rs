// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::queue::{QueueStatistics, TaskQueue};
use crate::scheduler::Scheduler;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct LoopStatistics {
    pub loop_running: bool,
    pub queue_size: usize,
    pub running_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub queue: QueueStatistics,
}

/// Co-operates the queue and the scheduler.
///
/// The main loop pulls the highest-priority ready task once per interval
/// and hands it to the scheduler, re-enqueuing on rejection.  The cleanup
/// loop purges terminal tasks, reaps finished workers, and emits a
/// statistics snapshot every 10 seconds.
pub struct TaskLoop {
    queue: Arc<TaskQueue>,
    scheduler: Arc<Scheduler>,
    loop_interval: Duration,
    running: AtomicBool,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl TaskLoop {
    pub fn new(queue: Arc<TaskQueue>, scheduler: Arc<Scheduler>, loop_interval_secs: f64) -> Self {
        Self {
            queue,
            scheduler,
            loop_interval: Duration::from_secs_f64(loop_interval_secs.max(0.01)),
            running: AtomicBool::new(false),
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Start both loops.  No-op when already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("task loop already running");
            return;
        }
        info!("task loop started");

        let main = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.main_loop().await })
        };
        let cleanup = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.cleanup_loop().await })
        };
        let mut handles = self.handles.lock().unwrap();
        handles.push(main);
        handles.push(cleanup);
    }

    /// Stop both loops.  No-op when not running.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("task loop not running");
            return;
        }
        for handle in self.handles.lock().unwrap().drain(..) {
            handle.abort();
        }
        info!("task loop stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn main_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            if self.queue.size().await > 0 && self.scheduler.can_schedule().await {
                if let Some(task) = self.queue.dequeue().await {
                    if !self.scheduler.schedule(task.clone()).await {
                        // Scheduling failed; back to the queue for a later tick.
                        self.queue.requeue(&task).await;
                    }
                }
            }
            tokio::time::sleep(self.loop_interval).await;
        }
    }

    async fn cleanup_loop(&self) {
        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(CLEANUP_INTERVAL).await;

            let removed = self.queue.remove_completed().await;
            let reaped = self.scheduler.reap_finished().await;
            if removed > 0 || reaped > 0 {
                debug!(removed, reaped, "cleanup tick");
            }

            let stats = self.queue.get_statistics().await;
            let running = self.scheduler.running_count().await;
            debug!(
                total = stats.total,
                pending = stats.pending,
                running = running,
                completed = stats.completed,
                failed = stats.failed,
                "queue statistics"
            );
        }
    }

    pub async fn statistics(&self) -> LoopStatistics {
        LoopStatistics {
            loop_running: self.is_running(),
            queue_size: self.queue.size().await,
            running_tasks: self.scheduler.running_count().await,
            max_concurrent_tasks: self.scheduler.max_concurrent(),
            queue: self.queue.get_statistics().await,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
