use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{ScheduleType, TaskParameters, TaskStatus, TaskType};

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl TaskResponse {
    pub fn ok(message: impl Into<String>, task_id: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            task_id,
        }
    }
}

/// Everything needed to create a task. Unset policy fields fall back to the
/// scheduler defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    pub name: String,
    pub task_type: TaskType,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parameters: TaskParameters,
    #[serde(default = "default_created_by")]
    pub created_by: String,
    #[serde(default)]
    pub max_failures: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl TaskInput {
    pub fn new(name: impl Into<String>, task_type: TaskType, schedule_type: ScheduleType) -> Self {
        Self {
            name: name.into(),
            task_type,
            schedule_type,
            cron_expression: None,
            interval_seconds: None,
            scheduled_time: None,
            parameters: TaskParameters::new(),
            created_by: default_created_by(),
            max_failures: None,
            timeout_seconds: None,
        }
    }

    pub fn cron(name: impl Into<String>, task_type: TaskType, expression: impl Into<String>) -> Self {
        let mut input = Self::new(name, task_type, ScheduleType::Cron);
        input.cron_expression = Some(expression.into());
        input
    }

    pub fn interval(name: impl Into<String>, task_type: TaskType, seconds: u64) -> Self {
        let mut input = Self::new(name, task_type, ScheduleType::Interval);
        input.interval_seconds = Some(seconds);
        input
    }

    pub fn one_time(name: impl Into<String>, task_type: TaskType, at: DateTime<Utc>) -> Self {
        let mut input = Self::new(name, task_type, ScheduleType::OneTime);
        input.scheduled_time = Some(at);
        input
    }
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub schedule_type: Option<ScheduleType>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parameters: Option<TaskParameters>,
    #[serde(default)]
    pub max_failures: Option<u32>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl TaskPatch {
    pub fn touches_schedule(&self) -> bool {
        self.schedule_type.is_some()
            || self.cron_expression.is_some()
            || self.interval_seconds.is_some()
            || self.scheduled_time.is_some()
    }
}

fn default_created_by() -> String {
    "system".to_string()
}
