use cadence_models::core::{ScheduledTask, TaskExecution, TaskParameters};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Row, sqlite::SqliteRow};

use crate::StoreError;

pub(crate) fn to_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(|dt| dt.timestamp_millis())
}

fn from_millis(
    table: &'static str,
    column: &str,
    ts: Option<i64>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    ts.map(|ts| {
        DateTime::<Utc>::from_timestamp_millis(ts).ok_or_else(|| StoreError::InvalidRow {
            table,
            message: format!("{column} out of range: {ts}"),
        })
    })
    .transpose()
}

/// Unsigned model field to its INTEGER column, refusing values that would wrap.
pub(crate) fn to_column<T>(table: &'static str, column: &str, value: T) -> Result<i64, StoreError>
where
    T: TryInto<i64> + Copy + std::fmt::Display,
{
    value.try_into().map_err(|_| StoreError::InvalidRow {
        table,
        message: format!("{column} does not fit a signed 64-bit column: {value}"),
    })
}

fn from_column<T: TryFrom<i64>>(table: &'static str, column: &str, value: i64) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::InvalidRow {
        table,
        message: format!("{column} out of range: {value}"),
    })
}

fn parse_enum<T>(table: &'static str, raw: String) -> Result<T, StoreError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|err| StoreError::InvalidRow {
        table,
        message: err.to_string(),
    })
}

pub(crate) fn row_to_scheduled_task(row: &SqliteRow) -> Result<ScheduledTask, StoreError> {
    const TABLE: &str = "scheduled_tasks";

    let parameters = match row.try_get::<Option<String>, _>("parameters")? {
        Some(raw) if !raw.is_empty() => serde_json::from_str::<TaskParameters>(&raw)?,
        _ => TaskParameters::new(),
    };
    let created_at = from_millis(TABLE, "created_at", Some(row.try_get("created_at")?))?
        .unwrap_or_default();

    Ok(ScheduledTask {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        task_type: parse_enum(TABLE, row.try_get("task_type")?)?,
        schedule_type: parse_enum(TABLE, row.try_get("schedule_type")?)?,
        cron_expression: row.try_get("cron_expression")?,
        interval_seconds: row
            .try_get::<Option<i64>, _>("interval_seconds")?
            .map(|secs| from_column(TABLE, "interval_seconds", secs))
            .transpose()?,
        scheduled_time: from_millis(TABLE, "scheduled_time", row.try_get("scheduled_time")?)?,
        parameters,
        status: parse_enum(TABLE, row.try_get("status")?)?,
        last_run: from_millis(TABLE, "last_run", row.try_get("last_run")?)?,
        next_run: from_millis(TABLE, "next_run", row.try_get("next_run")?)?,
        run_count: from_column(TABLE, "run_count", row.try_get("run_count")?)?,
        failure_count: from_column(TABLE, "failure_count", row.try_get("failure_count")?)?,
        last_error: row.try_get("last_error")?,
        created_at,
        created_by: row.try_get("created_by")?,
        max_failures: from_column(TABLE, "max_failures", row.try_get("max_failures")?)?,
        timeout_seconds: from_column(TABLE, "timeout_seconds", row.try_get("timeout_seconds")?)?,
    })
}

pub(crate) fn row_to_task_execution(row: &SqliteRow) -> Result<TaskExecution, StoreError> {
    const TABLE: &str = "task_executions";

    let result = row
        .try_get::<Option<String>, _>("result")?
        .map(|raw| serde_json::from_str::<Value>(&raw))
        .transpose()?;

    Ok(TaskExecution {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        started_at: from_millis(TABLE, "started_at", Some(row.try_get("started_at")?))?
            .unwrap_or_default(),
        completed_at: from_millis(TABLE, "completed_at", row.try_get("completed_at")?)?,
        status: parse_enum(TABLE, row.try_get("status")?)?,
        result,
        error: row.try_get("error")?,
        duration_seconds: row.try_get("duration_seconds")?,
    })
}
