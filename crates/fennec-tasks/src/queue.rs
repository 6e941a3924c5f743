// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::{shared, SharedTask, Task, TaskId, TaskStatus};

/// Heap entry: higher priority first, then FIFO by enqueue sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    priority: u8,
    seq: u64,
    task_id: TaskId,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueStatistics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub retrying: usize,
}

struct QueueInner {
    heap: BinaryHeap<HeapEntry>,
    tasks: HashMap<TaskId, SharedTask>,
    next_seq: u64,
}

/// Max-priority task queue with O(1) by-id lookup.
///
/// All mutating operations are serialized by one mutex.  The queue never
/// blocks; callers that want to wait for a particular task poll
/// [`TaskQueue::get_by_id`].  Heap entries whose task was cancelled or
/// purged become tombstones and are skipped at pop.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                tasks: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Insert a task and return its id.
    pub async fn push(&self, task: Task) -> TaskId {
        let task_id = task.task_id.clone();
        let priority = task.priority;
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(HeapEntry { priority, seq, task_id: task_id.clone() });
        inner.tasks.insert(task_id.clone(), shared(task));
        debug!(%task_id, priority, "enqueued");
        task_id
    }

    /// Re-insert a heap entry for a task already held in the side map
    /// (used when scheduling was rejected and the task goes back to wait).
    pub async fn requeue(&self, task: &SharedTask) {
        let (task_id, priority) = {
            let t = task.lock().await;
            (t.task_id.clone(), t.priority)
        };
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.tasks.entry(task_id.clone()).or_insert_with(|| task.clone());
        inner.heap.push(HeapEntry { priority, seq, task_id });
    }

    /// Pop the highest-priority task still Pending.  Entries referring to
    /// cancelled or purged tasks are silently discarded and the pop retried.
    pub async fn dequeue(&self) -> Option<SharedTask> {
        let mut inner = self.inner.lock().await;
        while let Some(entry) = inner.heap.pop() {
            if let Some(task) = inner.tasks.get(&entry.task_id).cloned() {
                if task.lock().await.status == TaskStatus::Pending {
                    debug!(task_id = %entry.task_id, priority = entry.priority, "dequeued");
                    return Some(task);
                }
            }
        }
        None
    }

    pub async fn get_by_id(&self, task_id: &str) -> Option<SharedTask> {
        self.inner.lock().await.tasks.get(task_id).cloned()
    }

    /// Cancel a Pending or Running task.  Returns `false` for unknown ids
    /// and for tasks already terminal.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let task = match self.get_by_id(task_id).await {
            Some(t) => t,
            None => return false,
        };
        let mut t = task.lock().await;
        if matches!(t.status, TaskStatus::Pending | TaskStatus::Running) {
            t.transition_to(TaskStatus::Cancelled, "Cancelled by user");
            return true;
        }
        false
    }

    /// Purge terminal tasks from the side map; returns how many were removed.
    pub async fn remove_completed(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let mut terminal = Vec::new();
        for (id, task) in inner.tasks.iter() {
            if task.lock().await.is_terminal() {
                terminal.push(id.clone());
            }
        }
        for id in &terminal {
            inner.tasks.remove(id);
        }
        if !terminal.is_empty() {
            debug!(count = terminal.len(), "purged terminal tasks");
        }
        terminal.len()
    }

    /// Number of Pending tasks.
    pub async fn size(&self) -> usize {
        let inner = self.inner.lock().await;
        let mut pending = 0;
        for task in inner.tasks.values() {
            if task.lock().await.status == TaskStatus::Pending {
                pending += 1;
            }
        }
        pending
    }

    pub async fn list_all(&self) -> Vec<SharedTask> {
        self.inner.lock().await.tasks.values().cloned().collect()
    }

    pub async fn get_statistics(&self) -> QueueStatistics {
        let inner = self.inner.lock().await;
        let mut stats = QueueStatistics { total: inner.tasks.len(), ..Default::default() };
        for task in inner.tasks.values() {
            match task.lock().await.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
                TaskStatus::Retrying => stats.retrying += 1,
            }
        }
        stats
    }
}

/// Narrow enqueue-only capability handed to executors that spawn
/// successor tasks, so they do not depend on the full queue.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn enqueue(&self, task: Task) -> TaskId;
}

#[async_trait]
impl TaskSink for TaskQueue {
    async fn enqueue(&self, task: Task) -> TaskId {
        self.push(task).await
    }
}

#[async_trait]
impl TaskSink for Arc<TaskQueue> {
    async fn enqueue(&self, task: Task) -> TaskId {
        self.push(task).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
