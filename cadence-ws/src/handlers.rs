use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use cadence_database::TaskStore;
use cadence_models::{
    core::{ScheduledTask, TaskExecution},
    web::{TaskInput, TaskPatch, TaskResponse},
};
use cadence_scheduler::{HealthStatus, TaskScheduler};
use log::info;
use serde::Deserialize;

use crate::errors::ApiError;

const DEFAULT_EXECUTION_LIMIT: usize = 50;
const MAX_EXECUTION_LIMIT: usize = 500;

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    active_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExecutionQuery {
    limit: Option<usize>,
}

pub(crate) async fn health<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
) -> Json<HealthStatus> {
    Json(scheduler.health_status().await)
}

pub(crate) async fn list_tasks<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<ScheduledTask>> {
    Json(scheduler.get_tasks(query.active_only).await)
}

pub(crate) async fn create_task<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Json(input): Json<TaskInput>,
) -> ApiResult<(StatusCode, Json<TaskResponse>)> {
    info!("Creating task {} via API", input.name);
    let task_id = scheduler.create_task(input).await?;
    Ok((
        StatusCode::CREATED,
        Json(TaskResponse::ok("task created", Some(task_id))),
    ))
}

pub(crate) async fn get_task<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ScheduledTask>> {
    Ok(Json(scheduler.get_task(&task_id).await?))
}

pub(crate) async fn update_task<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Path(task_id): Path<String>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<Json<ScheduledTask>> {
    Ok(Json(scheduler.update_task(&task_id, patch).await?))
}

pub(crate) async fn delete_task<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskResponse>> {
    scheduler.delete_task(&task_id).await?;
    Ok(Json(TaskResponse::ok("task deleted", Some(task_id))))
}

pub(crate) async fn list_executions<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Path(task_id): Path<String>,
    Query(query): Query<ExecutionQuery>,
) -> ApiResult<Json<Vec<TaskExecution>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EXECUTION_LIMIT)
        .clamp(1, MAX_EXECUTION_LIMIT);
    Ok(Json(scheduler.get_task_executions(&task_id, limit).await?))
}

pub(crate) async fn pause_task<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ScheduledTask>> {
    Ok(Json(scheduler.pause_task(&task_id).await?))
}

pub(crate) async fn resume_task<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ScheduledTask>> {
    Ok(Json(scheduler.resume_task(&task_id).await?))
}

pub(crate) async fn reactivate_task<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ScheduledTask>> {
    Ok(Json(scheduler.reactivate_task(&task_id).await?))
}

pub(crate) async fn run_task<S: TaskStore>(
    State(scheduler): State<TaskScheduler<S>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<ScheduledTask>> {
    Ok(Json(scheduler.trigger_task(&task_id).await?))
}
