use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::RuntimeError;

pub type TaskParameters = Map<String, Value>;

/// Selects which handler runs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Broadcast,
    DataRefresh,
    Synchronization,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Cron,
    Interval,
    OneTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Running,
    Completed,
    Failed,
    Cancelled,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Broadcast,
        TaskType::DataRefresh,
        TaskType::Synchronization,
        TaskType::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Broadcast => "broadcast",
            TaskType::DataRefresh => "data_refresh",
            TaskType::Synchronization => "synchronization",
            TaskType::Maintenance => "maintenance",
        }
    }
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
            ScheduleType::OneTime => "one_time",
        }
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Inactive => "inactive",
        }
    }
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

fn unknown(kind: &str, value: &str) -> RuntimeError {
    RuntimeError::new(
        format!("models.{kind}.unknown"),
        format!("unknown {kind} '{value}'"),
    )
}

impl FromStr for TaskType {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|task_type| task_type.as_str() == s)
            .ok_or_else(|| unknown("task_type", s))
    }
}

impl FromStr for ScheduleType {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(ScheduleType::Cron),
            "interval" => Ok(ScheduleType::Interval),
            "one_time" => Ok(ScheduleType::OneTime),
            other => Err(unknown("schedule_type", other)),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "inactive" => Ok(TaskStatus::Inactive),
            other => Err(unknown("task_status", other)),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(unknown("execution_status", other)),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable definition of a recurring or one-off unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<u64>,
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parameters: TaskParameters,
    pub status: TaskStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub max_failures: u32,
    pub timeout_seconds: u64,
}

impl ScheduledTask {
    /// ACTIVE with a `next_run` at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Active && self.next_run.is_some_and(|next| next <= now)
    }

    pub fn failure_threshold_reached(&self) -> bool {
        self.failure_count >= self.max_failures
    }
}

/// Immutable record of one run attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_strings_parse_back() {
        for task_type in TaskType::ALL {
            assert_eq!(task_type.as_str().parse::<TaskType>().unwrap(), task_type);
        }
        assert_eq!("one_time".parse::<ScheduleType>().unwrap(), ScheduleType::OneTime);
        assert_eq!("cancelled".parse::<TaskStatus>().unwrap(), TaskStatus::Cancelled);
        assert!("paused".parse::<TaskStatus>().is_err());
        assert!("email".parse::<TaskType>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&TaskType::DataRefresh).unwrap();
        assert_eq!(json, "\"data_refresh\"");
        let status: TaskStatus = serde_json::from_str("\"inactive\"").unwrap();
        assert_eq!(status, TaskStatus::Inactive);
    }
}
