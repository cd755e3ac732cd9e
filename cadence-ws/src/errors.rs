use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cadence_scheduler::SchedulerError;
use log::error;
use serde::Serialize;

/// Scheduler failure rendered as a JSON error body.
pub struct ApiError(SchedulerError);

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, code) = match self.0 {
            SchedulerError::TaskNotFound(_) => (StatusCode::NOT_FOUND, "task_not_found"),
            SchedulerError::InvalidTask(_) => (StatusCode::BAD_REQUEST, "invalid_task"),
            SchedulerError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            SchedulerError::Store(_) => {
                error!("Request failed on the task store: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, "store")
            }
        };
        (status, Json(ErrorResponse { code, message })).into_response()
    }
}
