use std::sync::Arc;

use cadence_database::TaskStore;
use cadence_models::{core::ScheduledTask, errors::SendableError};
use cadence_scheduler::{async_trait, TaskHandler};
use chrono::{Duration, Utc};
use log::info;
use serde_json::{json, Value};

const DEFAULT_RETENTION_DAYS: u64 = 30;

/// Writes broadcast tasks to the log. `parameters.message` is the text,
/// falling back to the task name.
pub struct ConsoleHandler;

#[async_trait]
impl TaskHandler for ConsoleHandler {
    async fn run(&self, task: &ScheduledTask) -> Result<Value, SendableError> {
        let message = task
            .parameters
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(&task.name);
        info!("[broadcast] {}: {}", task.name, message);
        Ok(json!({ "delivered": message }))
    }
}

/// Purges execution history older than `parameters.retention_days`.
pub struct MaintenanceHandler<S> {
    store: Arc<S>,
}

impl<S: TaskStore> MaintenanceHandler<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: TaskStore> TaskHandler for MaintenanceHandler<S> {
    async fn run(&self, task: &ScheduledTask) -> Result<Value, SendableError> {
        let retention_days = task
            .parameters
            .get("retention_days")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_RETENTION_DAYS);
        let window = i64::try_from(retention_days)
            .ok()
            .and_then(Duration::try_days)
            .ok_or("retention_days is out of range")?;

        let purged = self.store.delete_execution_range(Utc::now() - window).await?;
        info!(
            "Maintenance task {} purged {} execution record(s) older than {} day(s)",
            task.name, purged, retention_days
        );
        Ok(json!({ "purged": purged, "retention_days": retention_days }))
    }
}

#[cfg(test)]
mod tests {
    use cadence_database::memory::MemoryDb;
    use cadence_models::core::{
        ExecutionStatus, ScheduleType, TaskExecution, TaskParameters, TaskStatus, TaskType,
    };

    use super::*;

    fn task(task_type: TaskType, parameters: Value) -> ScheduledTask {
        let parameters: TaskParameters = serde_json::from_value(parameters).unwrap();
        ScheduledTask {
            id: "t1".into(),
            name: "housekeeping".into(),
            task_type,
            schedule_type: ScheduleType::Interval,
            cron_expression: None,
            interval_seconds: Some(3600),
            scheduled_time: None,
            parameters,
            status: TaskStatus::Running,
            last_run: None,
            next_run: None,
            run_count: 0,
            failure_count: 0,
            last_error: None,
            created_at: Utc::now(),
            created_by: "test".into(),
            max_failures: 3,
            timeout_seconds: 60,
        }
    }

    #[tokio::test]
    async fn console_handler_prefers_the_message_parameter() {
        let output = ConsoleHandler
            .run(&task(TaskType::Broadcast, json!({ "message": "doors close at 9" })))
            .await
            .unwrap();
        assert_eq!(output, json!({ "delivered": "doors close at 9" }));

        let output = ConsoleHandler
            .run(&task(TaskType::Broadcast, json!({})))
            .await
            .unwrap();
        assert_eq!(output, json!({ "delivered": "housekeeping" }));
    }

    #[tokio::test]
    async fn maintenance_handler_purges_old_history() {
        let store = MemoryDb::new();
        for (id, age_days) in [("old", 10), ("recent", 1)] {
            let started_at = Utc::now() - Duration::days(age_days);
            store
                .create_execution(&TaskExecution {
                    id: id.into(),
                    task_id: "t1".into(),
                    started_at,
                    completed_at: Some(started_at),
                    status: ExecutionStatus::Completed,
                    result: None,
                    error: None,
                    duration_seconds: 0.5,
                })
                .await
                .unwrap();
        }

        let handler = MaintenanceHandler::new(Arc::new(store.clone()));
        let output = handler
            .run(&task(TaskType::Maintenance, json!({ "retention_days": 7 })))
            .await
            .unwrap();
        assert_eq!(output["purged"], 1);
        assert_eq!(store.execution_count(), 1);
    }
}
