use std::{collections::HashMap, sync::Arc};

use cadence_models::core::{ScheduledTask, TaskExecution};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{StoreError, interfaces::TaskStore};

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<String, ScheduledTask>,
    executions: HashMap<String, TaskExecution>,
}

/// Process-local store; contents are lost on exit.
#[derive(Clone, Default)]
pub struct MemoryDb {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(&self, task_id: &str) -> Option<ScheduledTask> {
        self.state.lock().tasks.get(task_id).cloned()
    }

    pub fn execution_count(&self) -> usize {
        self.state.lock().executions.len()
    }
}

impl TaskStore for MemoryDb {
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let guard = self.state.lock();
        let mut tasks: Vec<_> = guard.tasks.values().cloned().collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }

    async fn save(&self, task: &ScheduledTask) -> Result<(), StoreError> {
        self.state.lock().tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn create_execution(&self, execution: &TaskExecution) -> Result<(), StoreError> {
        self.state
            .lock()
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn list_executions(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskExecution>, StoreError> {
        let guard = self.state.lock();
        let mut executions: Vec<_> = guard
            .executions
            .values()
            .filter(|execution| execution.task_id == task_id)
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        executions.truncate(limit);
        Ok(executions)
    }

    async fn delete_execution_range(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut guard = self.state.lock();
        let before = guard.executions.len();
        guard
            .executions
            .retain(|_, execution| execution.started_at >= older_than);
        Ok((before - guard.executions.len()) as u64)
    }
}
