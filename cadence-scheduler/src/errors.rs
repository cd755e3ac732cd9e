use cadence_database::StoreError;
use cadence_models::core::TaskStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("invalid task: {0}")]
    InvalidTask(String),
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("task store error: {0}")]
    Store(#[from] StoreError),
}
