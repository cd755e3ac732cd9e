use std::future::Future;

use cadence_models::core::{ScheduledTask, TaskExecution};
use chrono::{DateTime, Utc};

use crate::StoreError;

/// Durable mirror of the scheduler's working set.
///
/// Implementations perform no scheduling logic: `save` and
/// `create_execution` are plain upserts keyed by `id`, and the caller decides
/// when to invoke them.
pub trait TaskStore: Send + Sync + 'static {
    /// Create tables and indexes if they do not exist yet.
    fn initialize(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Every persisted task, including cancelled ones.
    fn load_all(&self) -> impl Future<Output = Result<Vec<ScheduledTask>, StoreError>> + Send;

    fn save(&self, task: &ScheduledTask) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn create_execution(
        &self,
        execution: &TaskExecution,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Most recent executions of `task_id` first, at most `limit` rows.
    fn list_executions(
        &self,
        task_id: &str,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<TaskExecution>, StoreError>> + Send;

    /// Delete executions started before `older_than`; returns the number removed.
    fn delete_execution_range(
        &self,
        older_than: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}
