use cadence_database::TaskStore;
use cadence_models::{
    core::{ScheduleType, ScheduledTask, TaskExecution, TaskStatus},
    web::{TaskInput, TaskPatch},
};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::{errors::SchedulerError, schedule, TaskScheduler};

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub running: bool,
    pub active_tasks: usize,
    pub running_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub check_interval: u64,
    pub pending_writes: usize,
}

impl<S: TaskStore> TaskScheduler<S> {
    /// Register a new task and return its id.
    ///
    /// Schedule problems such as a bad cron expression do not reject the
    /// task; they are logged and the task simply never comes due.
    pub async fn create_task(&self, input: TaskInput) -> Result<String, SchedulerError> {
        let max_failures = input.max_failures.unwrap_or(self.config.default_max_failures);
        let timeout_seconds = input
            .timeout_seconds
            .unwrap_or(self.config.default_timeout_seconds);

        let now = Utc::now();
        let mut task = ScheduledTask {
            id: Uuid::new_v4().to_string(),
            name: input.name.trim().to_string(),
            task_type: input.task_type,
            schedule_type: input.schedule_type,
            cron_expression: input.cron_expression,
            interval_seconds: input.interval_seconds,
            scheduled_time: input.scheduled_time,
            parameters: input.parameters,
            status: TaskStatus::Active,
            last_run: None,
            next_run: None,
            run_count: 0,
            failure_count: 0,
            last_error: None,
            created_at: now,
            created_by: input.created_by,
            max_failures,
            timeout_seconds,
        };
        validate_task(&task)?;
        task.next_run = schedule::initial_run(&task, now);

        let task_id = task.id.clone();
        info!(
            "Created task {} ({}, {} schedule, next run {})",
            task.name,
            task_id,
            task.schedule_type,
            describe_instant(task.next_run)
        );
        self.tasks.write().await.insert(task_id.clone(), task);
        self.mirror.persist_task(&self.tasks, &task_id).await;
        Ok(task_id)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<ScheduledTask, SchedulerError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))
    }

    /// Tasks in the working set, oldest first. `active_only` keeps the ones
    /// that are schedulable or executing right now.
    pub async fn get_tasks(&self, active_only: bool) -> Vec<ScheduledTask> {
        let mut tasks: Vec<ScheduledTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| {
                !active_only || matches!(task.status, TaskStatus::Active | TaskStatus::Running)
            })
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Apply `patch` atomically. Schedule edits recompute `next_run`; a status
    /// change must be a valid administrative transition or nothing changes.
    pub async fn update_task(
        &self,
        task_id: &str,
        patch: TaskPatch,
    ) -> Result<ScheduledTask, SchedulerError> {
        let now = Utc::now();
        let updated = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;

            let mut updated = task.clone();
            let touches_schedule = patch.touches_schedule();
            apply_patch(&mut updated, patch)?;
            if touches_schedule {
                updated.next_run = schedule::initial_run(&updated, now);
            }
            if let Some(target) = target_status(task, &updated) {
                updated.status = task.status;
                transition(&mut updated, target, now)?;
            }
            *task = updated.clone();
            updated
        };

        info!(
            "Updated task {} ({}): status {}, next run {}",
            updated.name,
            updated.id,
            updated.status,
            describe_instant(updated.next_run)
        );
        self.mirror.persist_task(&self.tasks, task_id).await;
        Ok(updated)
    }

    /// Mark the task CANCELLED, drop it from the working set and interrupt
    /// its execution if one is in flight.
    pub async fn delete_task(&self, task_id: &str) -> Result<(), SchedulerError> {
        let mut task = self
            .tasks
            .write()
            .await
            .remove(task_id)
            .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;

        if self.limiter.cancel(task_id) {
            info!("Cancelling in-flight execution of task {}", task_id);
        }
        task.status = TaskStatus::Cancelled;
        task.next_run = None;
        info!("Deleted task {} ({})", task.name, task_id);
        self.mirror.persist_snapshot(task).await;
        Ok(())
    }

    /// Most recent executions of a task, newest first. Works for cancelled
    /// tasks too since their history stays in the store.
    pub async fn get_task_executions(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskExecution>, SchedulerError> {
        Ok(self.mirror.store().list_executions(task_id, limit).await?)
    }

    pub async fn pause_task(&self, task_id: &str) -> Result<ScheduledTask, SchedulerError> {
        self.change_status(
            task_id,
            &[TaskStatus::Active, TaskStatus::Running, TaskStatus::Inactive],
            TaskStatus::Inactive,
        )
        .await
    }

    pub async fn resume_task(&self, task_id: &str) -> Result<ScheduledTask, SchedulerError> {
        self.change_status(task_id, &[TaskStatus::Inactive], TaskStatus::Active)
            .await
    }

    /// Manual way out of FAILED: the failure streak is cleared and the task is
    /// rescheduled from now.
    pub async fn reactivate_task(&self, task_id: &str) -> Result<ScheduledTask, SchedulerError> {
        self.change_status(task_id, &[TaskStatus::Failed], TaskStatus::Active)
            .await
    }

    /// Make an ACTIVE task due immediately; the next tick dispatches it.
    pub async fn trigger_task(&self, task_id: &str) -> Result<ScheduledTask, SchedulerError> {
        let task = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
            if task.status != TaskStatus::Active {
                return Err(SchedulerError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: task.status,
                    to: TaskStatus::Running,
                });
            }
            task.next_run = Some(Utc::now());
            task.clone()
        };
        info!("Triggered task {} ({})", task.name, task_id);
        self.mirror.persist_task(&self.tasks, task_id).await;
        Ok(task)
    }

    pub async fn health_status(&self) -> HealthStatus {
        let active_tasks = self
            .tasks
            .read()
            .await
            .values()
            .filter(|task| task.status == TaskStatus::Active)
            .count();
        let running = self.is_running();
        HealthStatus {
            status: if running { "healthy" } else { "stopped" }.to_string(),
            running,
            active_tasks,
            running_tasks: self.limiter.running_count(),
            max_concurrent_tasks: self.limiter.max_concurrent(),
            check_interval: self.config.check_interval().as_secs(),
            pending_writes: self.mirror.pending_writes(),
        }
    }

    async fn change_status(
        &self,
        task_id: &str,
        allowed_from: &[TaskStatus],
        to: TaskStatus,
    ) -> Result<ScheduledTask, SchedulerError> {
        let task = {
            let mut tasks = self.tasks.write().await;
            let task = tasks
                .get_mut(task_id)
                .ok_or_else(|| SchedulerError::TaskNotFound(task_id.to_string()))?;
            if !allowed_from.contains(&task.status) {
                return Err(SchedulerError::InvalidTransition {
                    task_id: task_id.to_string(),
                    from: task.status,
                    to,
                });
            }
            transition(task, to, Utc::now())?;
            task.clone()
        };
        info!("Task {} ({}) is now {}", task.name, task_id, task.status);
        self.mirror.persist_task(&self.tasks, task_id).await;
        Ok(task)
    }
}

/// Policy checks shared by create and update. Counters are stored as signed
/// 64-bit integers, so larger durations are rejected here.
fn validate_task(task: &ScheduledTask) -> Result<(), SchedulerError> {
    if task.name.trim().is_empty() {
        return Err(SchedulerError::InvalidTask("name must not be empty".into()));
    }
    if task.max_failures == 0 {
        return Err(SchedulerError::InvalidTask("max_failures must be at least 1".into()));
    }
    if task.timeout_seconds == 0 {
        return Err(SchedulerError::InvalidTask(
            "timeout_seconds must be at least 1".into(),
        ));
    }
    if i64::try_from(task.timeout_seconds).is_err() {
        return Err(SchedulerError::InvalidTask(format!(
            "timeout_seconds must be at most {}",
            i64::MAX
        )));
    }
    if task
        .interval_seconds
        .is_some_and(|secs| i64::try_from(secs).is_err())
    {
        return Err(SchedulerError::InvalidTask(format!(
            "interval_seconds must be at most {}",
            i64::MAX
        )));
    }
    Ok(())
}

fn apply_patch(task: &mut ScheduledTask, patch: TaskPatch) -> Result<(), SchedulerError> {
    if let Some(name) = patch.name {
        task.name = name.trim().to_string();
    }
    if let Some(task_type) = patch.task_type {
        task.task_type = task_type;
    }
    if let Some(schedule_type) = patch.schedule_type {
        task.schedule_type = schedule_type;
    }
    if let Some(expression) = patch.cron_expression {
        task.cron_expression = Some(expression);
    }
    if let Some(seconds) = patch.interval_seconds {
        task.interval_seconds = Some(seconds);
    }
    if let Some(at) = patch.scheduled_time {
        task.scheduled_time = Some(at);
    }
    if let Some(parameters) = patch.parameters {
        task.parameters = parameters;
    }
    if let Some(max_failures) = patch.max_failures {
        task.max_failures = max_failures;
    }
    if let Some(timeout_seconds) = patch.timeout_seconds {
        task.timeout_seconds = timeout_seconds;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    validate_task(task)
}

fn target_status(current: &ScheduledTask, patched: &ScheduledTask) -> Option<TaskStatus> {
    (patched.status != current.status).then_some(patched.status)
}

/// Administrative status change. Execution-driven states (RUNNING,
/// COMPLETED, FAILED, CANCELLED) cannot be set from outside.
fn transition(
    task: &mut ScheduledTask,
    to: TaskStatus,
    now: DateTime<Utc>,
) -> Result<(), SchedulerError> {
    match (task.status, to) {
        (TaskStatus::Active | TaskStatus::Running | TaskStatus::Inactive, TaskStatus::Inactive) => {
            task.status = TaskStatus::Inactive;
        }
        (TaskStatus::Active | TaskStatus::Running, TaskStatus::Active) => {}
        (TaskStatus::Inactive, TaskStatus::Active) if single_run_succeeded(task) => {
            task.status = TaskStatus::Completed;
            task.next_run = None;
        }
        (TaskStatus::Inactive, TaskStatus::Active) => {
            task.status = TaskStatus::Active;
            if task.next_run.is_none() {
                task.next_run = schedule::initial_run(task, now);
            }
        }
        (TaskStatus::Failed, TaskStatus::Active) => {
            task.status = TaskStatus::Active;
            task.failure_count = 0;
            task.next_run = schedule::initial_run(task, now);
        }
        (from, to) => {
            warn!("Rejected status change of task {} from {} to {}", task.id, from, to);
            return Err(SchedulerError::InvalidTransition {
                task_id: task.id.clone(),
                from,
                to,
            });
        }
    }
    Ok(())
}

/// A one-time task paused during its only run finished that run while
/// INACTIVE; resuming it lands on COMPLETED.
fn single_run_succeeded(task: &ScheduledTask) -> bool {
    task.schedule_type == ScheduleType::OneTime && task.run_count > 0 && task.last_error.is_none()
}

fn describe_instant(instant: Option<DateTime<Utc>>) -> String {
    instant.map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use cadence_models::core::{TaskParameters, TaskType};
    use chrono::TimeZone;

    use super::*;

    fn task(status: TaskStatus) -> ScheduledTask {
        ScheduledTask {
            id: "t1".into(),
            name: "refresh".into(),
            task_type: TaskType::DataRefresh,
            schedule_type: ScheduleType::Interval,
            cron_expression: None,
            interval_seconds: Some(60),
            scheduled_time: None,
            parameters: TaskParameters::new(),
            status,
            last_run: None,
            next_run: None,
            run_count: 0,
            failure_count: 2,
            last_error: Some("boom".into()),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            created_by: "test".into(),
            max_failures: 2,
            timeout_seconds: 30,
        }
    }

    #[test]
    fn reactivating_a_failed_task_clears_the_streak() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let mut t = task(TaskStatus::Failed);
        transition(&mut t, TaskStatus::Active, now).unwrap();
        assert_eq!(t.status, TaskStatus::Active);
        assert_eq!(t.failure_count, 0);
        assert_eq!(t.next_run, Some(now + chrono::Duration::seconds(60)));
    }

    #[test]
    fn execution_driven_states_are_rejected() {
        let now = Utc::now();
        for (from, to) in [
            (TaskStatus::Active, TaskStatus::Completed),
            (TaskStatus::Active, TaskStatus::Running),
            (TaskStatus::Completed, TaskStatus::Active),
            (TaskStatus::Failed, TaskStatus::Inactive),
            (TaskStatus::Inactive, TaskStatus::Failed),
        ] {
            let mut t = task(from);
            let err = transition(&mut t, to, now).unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidTransition { .. }), "{from} -> {to}");
            assert_eq!(t.status, from);
        }
    }

    #[test]
    fn resume_keeps_an_existing_next_run() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let planned = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 30).unwrap();
        let mut t = task(TaskStatus::Inactive);
        t.next_run = Some(planned);
        transition(&mut t, TaskStatus::Active, now).unwrap();
        assert_eq!(t.next_run, Some(planned));
    }

    #[test]
    fn resuming_a_finished_one_time_task_completes_it() {
        let now = Utc::now();
        let mut t = task(TaskStatus::Inactive);
        t.schedule_type = ScheduleType::OneTime;
        t.run_count = 1;
        t.failure_count = 0;
        t.last_error = None;
        transition(&mut t, TaskStatus::Active, now).unwrap();
        assert_eq!(t.status, TaskStatus::Completed);
        assert_eq!(t.next_run, None);

        let mut failed_once = task(TaskStatus::Inactive);
        failed_once.schedule_type = ScheduleType::OneTime;
        failed_once.run_count = 0;
        transition(&mut failed_once, TaskStatus::Active, now).unwrap();
        assert_eq!(failed_once.status, TaskStatus::Active);
    }

    #[test]
    fn patch_validation_rejects_bad_policy() {
        let mut t = task(TaskStatus::Active);
        let patch = TaskPatch {
            max_failures: Some(0),
            ..TaskPatch::default()
        };
        assert!(matches!(
            apply_patch(&mut t, patch),
            Err(SchedulerError::InvalidTask(_))
        ));

        let mut blank = task(TaskStatus::Active);
        blank.name = "  ".into();
        assert!(validate_task(&blank).is_err());
        assert!(validate_task(&task(TaskStatus::Active)).is_ok());

        let mut unstorable = task(TaskStatus::Active);
        unstorable.timeout_seconds = 1 << 63;
        assert!(matches!(
            validate_task(&unstorable),
            Err(SchedulerError::InvalidTask(_))
        ));
        let mut unstorable = task(TaskStatus::Active);
        unstorable.interval_seconds = Some(u64::MAX);
        assert!(validate_task(&unstorable).is_err());
    }
}
