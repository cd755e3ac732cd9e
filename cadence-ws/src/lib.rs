mod errors;
mod handlers;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use cadence_database::TaskStore;
use cadence_scheduler::TaskScheduler;
use log::info;
use tokio::{net::TcpListener, sync::Notify};

pub use errors::ApiError;

/// Admin routes over a running scheduler.
pub fn router<S: TaskStore>(scheduler: TaskScheduler<S>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::<S>))
        .route(
            "/tasks",
            get(handlers::list_tasks::<S>).post(handlers::create_task::<S>),
        )
        .route(
            "/tasks/:id",
            get(handlers::get_task::<S>)
                .patch(handlers::update_task::<S>)
                .delete(handlers::delete_task::<S>),
        )
        .route("/tasks/:id/executions", get(handlers::list_executions::<S>))
        .route("/tasks/:id/pause", post(handlers::pause_task::<S>))
        .route("/tasks/:id/resume", post(handlers::resume_task::<S>))
        .route("/tasks/:id/reactivate", post(handlers::reactivate_task::<S>))
        .route("/tasks/:id/run", post(handlers::run_task::<S>))
        .with_state(scheduler)
}

/// Serve the admin API on `port` until `notify` fires.
pub async fn run_webserver<S: TaskStore>(
    scheduler: TaskScheduler<S>,
    notify: Arc<Notify>,
    port: u16,
) -> Result<(), std::io::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Admin API listening on {}", addr);

    axum::serve(listener, router(scheduler))
        .with_graceful_shutdown(async move {
            notify.notified().await;
            info!("Shutting down web server...");
        })
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        response::Response,
    };
    use cadence_database::memory::MemoryDb;
    use cadence_models::{
        core::{ScheduledTask, TaskStatus},
        web::TaskResponse,
    };
    use cadence_scheduler::{HandlerRegistry, SchedulerConfig};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    async fn test_scheduler() -> TaskScheduler<MemoryDb> {
        TaskScheduler::load(
            Arc::new(MemoryDb::new()),
            HandlerRegistry::new(),
            SchedulerConfig::default(),
        )
        .await
        .unwrap()
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&body).unwrap())
            }
            None => Body::empty(),
        };
        app.oneshot(request.body(body).unwrap()).await.unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn interval_task() -> Value {
        json!({
            "name": "nightly refresh",
            "task_type": "data_refresh",
            "schedule_type": "interval",
            "interval_seconds": 600,
            "parameters": { "source": "inventory" }
        })
    }

    #[tokio::test]
    async fn create_then_fetch_a_task() {
        let scheduler = test_scheduler().await;
        let app = router(scheduler.clone());

        let response = send(app.clone(), "POST", "/tasks", Some(interval_task())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: TaskResponse = read_json(response).await;
        assert!(created.success);
        let task_id = created.task_id.unwrap();

        let response = send(app.clone(), "GET", &format!("/tasks/{task_id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let task: ScheduledTask = read_json(response).await;
        assert_eq!(task.name, "nightly refresh");
        assert_eq!(task.parameters["source"], "inventory");
        assert_eq!(task.created_by, "system");
        assert!(task.next_run.is_some());

        let response = send(app, "GET", "/tasks?active_only=true", None).await;
        let tasks: Vec<ScheduledTask> = read_json(response).await;
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let scheduler = test_scheduler().await;
        let app = router(scheduler.clone());

        let response = send(app.clone(), "GET", "/tasks/missing", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: Value = read_json(response).await;
        assert_eq!(body["code"], "task_not_found");

        let mut invalid = interval_task();
        invalid["max_failures"] = json!(0);
        let response = send(app.clone(), "POST", "/tasks", Some(invalid)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(app.clone(), "POST", "/tasks", Some(interval_task())).await;
        let created: TaskResponse = read_json(response).await;
        let task_id = created.task_id.unwrap();
        let response = send(app, "POST", &format!("/tasks/{task_id}/reactivate"), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn pause_patch_and_delete() {
        let scheduler = test_scheduler().await;
        let app = router(scheduler.clone());

        let response = send(app.clone(), "POST", "/tasks", Some(interval_task())).await;
        let task_id = read_json::<TaskResponse>(response).await.task_id.unwrap();

        let response = send(app.clone(), "POST", &format!("/tasks/{task_id}/pause"), None).await;
        let task: ScheduledTask = read_json(response).await;
        assert_eq!(task.status, TaskStatus::Inactive);

        let patch = json!({ "name": "hourly refresh", "interval_seconds": 3600 });
        let response = send(app.clone(), "PATCH", &format!("/tasks/{task_id}"), Some(patch)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let task: ScheduledTask = read_json(response).await;
        assert_eq!(task.name, "hourly refresh");
        assert_eq!(task.interval_seconds, Some(3600));

        let response = send(app.clone(), "DELETE", &format!("/tasks/{task_id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(scheduler.get_task(&task_id).await.is_err());

        let response = send(
            app,
            "GET",
            &format!("/tasks/{task_id}/executions?limit=5"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let executions: Vec<Value> = read_json(response).await;
        assert!(executions.is_empty());
    }

    #[tokio::test]
    async fn health_reports_scheduler_state() {
        let scheduler = test_scheduler().await;
        let response = send(router(scheduler), "GET", "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let health: Value = read_json(response).await;
        assert_eq!(health["status"], "stopped");
        assert_eq!(health["running"], false);
        assert_eq!(health["max_concurrent_tasks"], 5);
        assert_eq!(health["check_interval"], 10);
    }
}
