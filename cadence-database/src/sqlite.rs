use std::{str::FromStr, time::Duration};

use cadence_models::core::{ScheduledTask, TaskExecution};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sqlx::{
    ConnectOptions, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

use crate::{
    StoreError,
    interfaces::TaskStore,
    mappers::{row_to_scheduled_task, row_to_task_execution, to_column, to_millis},
};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        task_type TEXT NOT NULL,
        schedule_type TEXT NOT NULL,
        cron_expression TEXT,
        interval_seconds INTEGER,
        scheduled_time INTEGER,
        parameters TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL,
        last_run INTEGER,
        next_run INTEGER,
        run_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at INTEGER NOT NULL,
        created_by TEXT NOT NULL,
        max_failures INTEGER NOT NULL,
        timeout_seconds INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS task_executions (
        id TEXT PRIMARY KEY,
        task_id TEXT NOT NULL REFERENCES scheduled_tasks(id),
        started_at INTEGER NOT NULL,
        completed_at INTEGER,
        status TEXT NOT NULL,
        result TEXT,
        error TEXT,
        duration_seconds REAL NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_task_executions_task_id ON task_executions (task_id)",
    "CREATE INDEX IF NOT EXISTS idx_task_executions_started_at ON task_executions (started_at)",
];

pub struct SqliteDb {
    pub pool: SqlitePool,
}

impl SqliteDb {
    pub async fn new(filename: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(filename)
            .create_if_missing(true)
            .log_statements(log::LevelFilter::Debug)
            .log_slow_statements(log::LevelFilter::Warn, Duration::from_secs(1));
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        info!("Opened SQLite task store at {}", filename);
        Ok(SqliteDb { pool })
    }

    /// Private in-memory database. The pool is pinned to one connection that
    /// never expires, otherwise each new connection would see an empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(log::LevelFilter::Trace);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(SqliteDb { pool })
    }
}

impl TaskStore for SqliteDb {
    async fn initialize(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Task store schema ready");
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<ScheduledTask>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, task_type, schedule_type, cron_expression, interval_seconds,
                    scheduled_time, parameters, status, last_run, next_run, run_count,
                    failure_count, last_error, created_at, created_by, max_failures,
                    timeout_seconds
             FROM scheduled_tasks
             ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in &rows {
            match row_to_scheduled_task(row) {
                Ok(task) => tasks.push(task),
                Err(err) => warn!("Skipping unreadable scheduled_tasks row: {}", err),
            }
        }
        Ok(tasks)
    }

    async fn save(&self, task: &ScheduledTask) -> Result<(), StoreError> {
        const TABLE: &str = "scheduled_tasks";

        let parameters = serde_json::to_string(&task.parameters)?;
        let interval_seconds = task
            .interval_seconds
            .map(|secs| to_column(TABLE, "interval_seconds", secs))
            .transpose()?;
        sqlx::query(
            "INSERT INTO scheduled_tasks (id, name, task_type, schedule_type, cron_expression,
                interval_seconds, scheduled_time, parameters, status, last_run, next_run,
                run_count, failure_count, last_error, created_at, created_by, max_failures,
                timeout_seconds)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                task_type = excluded.task_type,
                schedule_type = excluded.schedule_type,
                cron_expression = excluded.cron_expression,
                interval_seconds = excluded.interval_seconds,
                scheduled_time = excluded.scheduled_time,
                parameters = excluded.parameters,
                status = excluded.status,
                last_run = excluded.last_run,
                next_run = excluded.next_run,
                run_count = excluded.run_count,
                failure_count = excluded.failure_count,
                last_error = excluded.last_error,
                created_by = excluded.created_by,
                max_failures = excluded.max_failures,
                timeout_seconds = excluded.timeout_seconds",
        )
        .bind(&task.id)
        .bind(&task.name)
        .bind(task.task_type.as_str())
        .bind(task.schedule_type.as_str())
        .bind(&task.cron_expression)
        .bind(interval_seconds)
        .bind(to_millis(task.scheduled_time))
        .bind(parameters)
        .bind(task.status.as_str())
        .bind(to_millis(task.last_run))
        .bind(to_millis(task.next_run))
        .bind(to_column(TABLE, "run_count", task.run_count)?)
        .bind(to_column(TABLE, "failure_count", task.failure_count)?)
        .bind(&task.last_error)
        .bind(task.created_at.timestamp_millis())
        .bind(&task.created_by)
        .bind(to_column(TABLE, "max_failures", task.max_failures)?)
        .bind(to_column(TABLE, "timeout_seconds", task.timeout_seconds)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_execution(&self, execution: &TaskExecution) -> Result<(), StoreError> {
        let result = execution
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            "INSERT OR REPLACE INTO task_executions
                (id, task_id, started_at, completed_at, status, result, error, duration_seconds)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&execution.id)
        .bind(&execution.task_id)
        .bind(execution.started_at.timestamp_millis())
        .bind(to_millis(execution.completed_at))
        .bind(execution.status.as_str())
        .bind(result)
        .bind(&execution.error)
        .bind(execution.duration_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_executions(
        &self,
        task_id: &str,
        limit: usize,
    ) -> Result<Vec<TaskExecution>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, task_id, started_at, completed_at, status, result, error, duration_seconds
             FROM task_executions
             WHERE task_id = ?
             ORDER BY started_at DESC
             LIMIT ?",
        )
        .bind(task_id)
        .bind(limit.min(i64::MAX as usize) as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_task_execution).collect()
    }

    async fn delete_execution_range(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM task_executions WHERE started_at < ?")
            .bind(older_than.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use cadence_models::core::{
        ExecutionStatus, ScheduleType, TaskParameters, TaskStatus, TaskType,
    };
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;

    async fn store() -> SqliteDb {
        let db = SqliteDb::in_memory().await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    fn task(id: &str) -> ScheduledTask {
        let mut parameters = TaskParameters::new();
        parameters.insert("channel".into(), json!("ops"));
        ScheduledTask {
            id: id.to_string(),
            name: format!("task {id}"),
            task_type: TaskType::Broadcast,
            schedule_type: ScheduleType::Cron,
            cron_expression: Some("*/5 * * * *".into()),
            interval_seconds: None,
            scheduled_time: None,
            parameters,
            status: TaskStatus::Active,
            last_run: None,
            next_run: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap()),
            run_count: 0,
            failure_count: 0,
            last_error: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            created_by: "admin".into(),
            max_failures: 3,
            timeout_seconds: 60,
        }
    }

    fn execution(id: &str, task_id: &str, started_at: DateTime<Utc>) -> TaskExecution {
        TaskExecution {
            id: id.to_string(),
            task_id: task_id.to_string(),
            started_at,
            completed_at: Some(started_at + Duration::milliseconds(1500)),
            status: ExecutionStatus::Completed,
            result: Some(json!({"sent": 3})),
            error: None,
            duration_seconds: 1.5,
        }
    }

    #[tokio::test]
    async fn saved_task_loads_back_unchanged() {
        let db = store().await;
        let original = task("a");
        db.save(&original).await.unwrap();

        let loaded = db.load_all().await.unwrap();
        assert_eq!(loaded, vec![original]);
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let db = store().await;
        let mut original = task("a");
        db.save(&original).await.unwrap();

        original.status = TaskStatus::Failed;
        original.failure_count = 3;
        original.last_error = Some("boom".into());
        original.next_run = None;
        db.save(&original).await.unwrap();
        db.save(&original).await.unwrap();

        let loaded = db.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], original);
    }

    #[tokio::test]
    async fn executions_are_listed_newest_first_and_limited() {
        let db = store().await;
        db.save(&task("a")).await.unwrap();
        db.save(&task("b")).await.unwrap();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            db.create_execution(&execution(&format!("a{i}"), "a", base + Duration::minutes(i)))
                .await
                .unwrap();
        }
        db.create_execution(&execution("b0", "b", base)).await.unwrap();

        let listed = db.list_executions("a", 3).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a4", "a3", "a2"]);
        assert_eq!(listed[0].result, Some(json!({"sent": 3})));
    }

    #[tokio::test]
    async fn delete_execution_range_removes_only_older_rows() {
        let db = store().await;
        db.save(&task("a")).await.unwrap();
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap();
        db.create_execution(&execution("old", "a", cutoff - Duration::days(1)))
            .await
            .unwrap();
        db.create_execution(&execution("new", "a", cutoff + Duration::days(1)))
            .await
            .unwrap();

        let removed = db.delete_execution_range(cutoff).await.unwrap();
        assert_eq!(removed, 1);
        let remaining = db.list_executions("a", 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "new");
    }

    #[tokio::test]
    async fn out_of_range_counters_are_rejected_not_wrapped() {
        let db = store().await;
        let mut huge = task("a");
        huge.timeout_seconds = 1 << 63;
        assert!(matches!(
            db.save(&huge).await,
            Err(StoreError::InvalidRow { .. })
        ));
        assert!(db.load_all().await.unwrap().is_empty());

        db.save(&task("b")).await.unwrap();
        sqlx::query("UPDATE scheduled_tasks SET timeout_seconds = -1 WHERE id = 'b'")
            .execute(&db.pool)
            .await
            .unwrap();
        assert!(db.load_all().await.unwrap().is_empty());
    }
}
