//! Task persistence.
//!
//! `TaskStore` is the persistence seam; `TaskUpdater` wraps it with a
//! per-task write slot and a bounded retry policy so that concurrent
//! terminal-state computations cannot interleave their writes.

use super::types::{Task, TaskId, TaskUpdate, now_ms};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persists a new task and returns the id the store assigned to it.
    async fn create_task(&self, task: &Task) -> Result<TaskId>;

    async fn update_task(&self, task_id: &TaskId, update: TaskUpdate) -> Result<()>;

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>>;
}

/// Node-local task store.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<TaskId, Task>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<TaskId> {
        let task_id = TaskId::new();
        let mut stored = task.clone();
        stored.task_id = Some(task_id.clone());
        self.tasks.insert(task_id.clone(), stored);
        Ok(task_id)
    }

    async fn update_task(&self, task_id: &TaskId, update: TaskUpdate) -> Result<()> {
        let mut task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| anyhow::anyhow!("Task not found: {}", task_id))?;
        if let Some(state) = update.state {
            task.state = state;
        }
        if let Some(error) = update.error {
            task.error = Some(error);
        }
        task.last_update_time = now_ms();
        Ok(())
    }

    async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(task_id).map(|task| task.clone()))
    }
}

const BACKOFF_START_MS: u64 = 150;
const BACKOFF_MAX_MS: u64 = 1200;

/// Serialises writes to the same task and retries failed writes.
pub struct TaskUpdater {
    store: Arc<dyn TaskStore>,
    slots: DashMap<TaskId, Arc<Semaphore>>,
    acquire_timeout: Duration,
    attempts: usize,
}

impl TaskUpdater {
    pub fn new(store: Arc<dyn TaskStore>, acquire_timeout: Duration, attempts: usize) -> Self {
        Self {
            store,
            slots: DashMap::new(),
            acquire_timeout,
            attempts: attempts.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Writes `update` once the task's write slot is free.
    ///
    /// If the slot stays busy past the acquire timeout a `force` write goes
    /// ahead anyway, any other write fails.
    pub async fn update(&self, task_id: &TaskId, update: TaskUpdate, force: bool) -> Result<()> {
        let slot = self
            .slots
            .entry(task_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        let permit = match tokio::time::timeout(self.acquire_timeout, slot.acquire_owned()).await {
            Ok(Ok(permit)) => Some(permit),
            _ => None,
        };

        if permit.is_none() {
            if !force {
                return Err(anyhow::anyhow!(
                    "Timed out after {:?} waiting to update task {}",
                    self.acquire_timeout,
                    task_id
                ));
            }
            tracing::warn!("Forcing update of task {} without write slot", task_id);
        }

        let terminal = update.state.is_some_and(|state| state.is_done());
        let result = self.write_with_retry(task_id, update).await;
        drop(permit);

        if terminal {
            self.slots.remove(task_id);
        }
        result
    }

    async fn write_with_retry(&self, task_id: &TaskId, update: TaskUpdate) -> Result<()> {
        let mut delay_ms = BACKOFF_START_MS;

        for attempt in 0..self.attempts {
            match self.store.update_task(task_id, update.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(e);
                    }
                    tracing::warn!(
                        "Update of task {} failed (attempt {}): {}",
                        task_id,
                        attempt + 1,
                        e
                    );
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(BACKOFF_MAX_MS);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted for task {}", task_id))
    }
}
