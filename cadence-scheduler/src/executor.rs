use std::{any::Any, sync::Arc, time::Duration};

use cadence_database::TaskStore;
use cadence_models::core::{
    ExecutionStatus, ScheduleType, ScheduledTask, TaskExecution, TaskStatus,
};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::{task::JoinError, time};
use uuid::Uuid;

use crate::{
    limiter::Reservation,
    mirror::StoreMirror,
    registry::{HandlerRegistry, TaskHandler},
    schedule, TaskIndex,
};

#[derive(Debug)]
enum Outcome {
    Completed(Value),
    Failed(String),
    TimedOut(u64),
    Cancelled,
}

impl Outcome {
    fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::TimedOut(_))
    }

    fn error_message(&self) -> Option<String> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Failed(message) => Some(message.clone()),
            Outcome::TimedOut(secs) => Some(format!("timed out after {secs}s")),
            Outcome::Cancelled => Some("cancelled".to_string()),
        }
    }
}

/// Runs one task under its deadline and writes the outcome back.
pub(crate) struct TaskExecutor<S: TaskStore> {
    registry: Arc<HandlerRegistry>,
    tasks: TaskIndex,
    mirror: Arc<StoreMirror<S>>,
}

impl<S: TaskStore> Clone for TaskExecutor<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            tasks: self.tasks.clone(),
            mirror: self.mirror.clone(),
        }
    }
}

impl<S: TaskStore> TaskExecutor<S> {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        tasks: TaskIndex,
        mirror: Arc<StoreMirror<S>>,
    ) -> Self {
        Self {
            registry,
            tasks,
            mirror,
        }
    }

    /// Execute the task whose slot `reservation` holds.
    ///
    /// Returns `None` when the task left the ACTIVE state between dispatch
    /// and start (deleted or paused); nothing is recorded in that case. The
    /// slot is released once both writes are done, or on unwind.
    pub(crate) async fn execute(&self, reservation: Reservation) -> Option<TaskExecution> {
        let task_id = reservation.task_id().to_string();
        let started_at = Utc::now();
        let clock = time::Instant::now();

        let snapshot = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&task_id)?;
            if task.status != TaskStatus::Active {
                debug!("Task {} is {}; skipping dispatch", task_id, task.status);
                return None;
            }
            task.status = TaskStatus::Running;
            task.last_run = Some(started_at);
            task.clone()
        };
        self.mirror.persist_task(&self.tasks, &task_id).await;

        let timeout_seconds = snapshot.timeout_seconds.max(1);
        info!(
            "Running task {} ({}, type {})",
            snapshot.name, task_id, snapshot.task_type
        );

        let outcome = match self.registry.resolve(snapshot.task_type) {
            Some(handler) => run_handler(handler, snapshot, timeout_seconds, &reservation).await,
            None => Outcome::Failed(format!(
                "no handler registered for task type '{}'",
                snapshot.task_type
            )),
        };

        let completed_at = Utc::now();
        let duration_seconds = match outcome {
            Outcome::TimedOut(secs) => secs as f64,
            _ => clock.elapsed().as_secs_f64(),
        };
        let execution = TaskExecution {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            started_at,
            completed_at: Some(completed_at),
            status: match outcome {
                Outcome::Completed(_) => ExecutionStatus::Completed,
                _ => ExecutionStatus::Failed,
            },
            result: match &outcome {
                Outcome::Completed(value) => Some(value.clone()),
                _ => None,
            },
            error: outcome.error_message(),
            duration_seconds,
        };

        self.apply_outcome(&task_id, &outcome, completed_at).await;
        self.mirror.persist_task(&self.tasks, &task_id).await;
        self.mirror.record_execution(execution.clone()).await;
        drop(reservation);
        Some(execution)
    }

    /// Success/failure bookkeeping on the indexed task. A task deleted while
    /// running is gone from the index and is left alone.
    async fn apply_outcome(&self, task_id: &str, outcome: &Outcome, now: DateTime<Utc>) {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            debug!("Task {} was removed while running", task_id);
            return;
        };

        // Pausing a running task leaves it INACTIVE; only RUNNING is restored.
        let restore = task.status == TaskStatus::Running;
        match outcome {
            Outcome::Completed(_) => {
                task.run_count += 1;
                task.failure_count = 0;
                task.last_error = None;
                // A one-time task resumed mid-run still completes; a paused
                // one stays INACTIVE until resumed.
                if task.schedule_type == ScheduleType::OneTime
                    && task.status != TaskStatus::Inactive
                {
                    task.status = TaskStatus::Completed;
                } else if restore {
                    task.status = TaskStatus::Active;
                }
                info!(
                    "Task {} ({}) completed, run #{}",
                    task.name, task.id, task.run_count
                );
            }
            Outcome::Failed(_) | Outcome::TimedOut(_) => {
                task.failure_count += 1;
                task.last_error = outcome.error_message();
                if restore {
                    task.status = TaskStatus::Active;
                }
                warn!(
                    "Task {} ({}) failed ({}/{}): {}",
                    task.name,
                    task.id,
                    task.failure_count,
                    task.max_failures,
                    task.last_error.as_deref().unwrap_or_default()
                );
            }
            Outcome::Cancelled => {
                if restore {
                    task.status = TaskStatus::Active;
                }
                info!("Task {} ({}) execution cancelled", task.name, task.id);
            }
        }

        task.next_run = schedule::next_run(task, now);

        if outcome.is_failure() && task.failure_threshold_reached() {
            task.status = TaskStatus::Failed;
            error!(
                "Task {} ({}) disabled after {} consecutive failure(s)",
                task.name, task.id, task.failure_count
            );
        }
    }
}

async fn run_handler(
    handler: Arc<dyn TaskHandler>,
    task: ScheduledTask,
    timeout_seconds: u64,
    reservation: &Reservation,
) -> Outcome {
    let handle = tokio::spawn(async move { handler.run(&task).await });
    let abort = handle.abort_handle();

    tokio::select! {
        joined = time::timeout(Duration::from_secs(timeout_seconds), handle) => match joined {
            Ok(Ok(Ok(value))) => Outcome::Completed(value),
            Ok(Ok(Err(err))) => Outcome::Failed(err.to_string()),
            Ok(Err(err)) => Outcome::Failed(join_error_message(err)),
            Err(_) => {
                abort.abort();
                Outcome::TimedOut(timeout_seconds)
            }
        },
        _ = reservation.cancelled() => {
            abort.abort();
            Outcome::Cancelled
        }
    }
}

fn join_error_message(err: JoinError) -> String {
    if err.is_panic() {
        format!("handler panicked: {}", panic_message(err.into_panic()))
    } else {
        "handler was cancelled".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
