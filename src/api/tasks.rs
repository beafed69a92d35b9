use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::task::{
    TaskCreate, TaskDeletedResponse, TaskListResponse, TaskStatisticsResponse, TaskStatusResponse,
};

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/teacher/tasks", get(list_tasks).post(create_task))
        .route("/teacher/tasks/:id", delete(delete_task))
        .route("/teacher/tasks/:id/status", get(task_status))
        .route("/teacher/tasks/:id/statistics", get(task_statistics))
        .route("/teacher/tasks/:id/execute", post(execute_task))
        .route("/teacher/tasks/:id/cancel", post(cancel_task))
}

async fn create_task(
    State(state): State<AppState>,
    Json(payload): Json<TaskCreate>,
) -> Result<(StatusCode, Json<TaskStatusResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let task_id = payload
        .task_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| format!("task_{}", Uuid::new_v4().simple()));

    let snapshot = if payload.auto_start {
        state.tasks().launch(&task_id, payload.total_papers)?
    } else {
        state.tasks().register(&task_id, payload.total_papers)?
    };

    Ok((StatusCode::CREATED, Json(TaskStatusResponse::from(snapshot))))
}

async fn list_tasks(State(state): State<AppState>) -> Json<TaskListResponse> {
    let items: Vec<TaskStatusResponse> =
        state.tasks().get_all().into_iter().map(TaskStatusResponse::from).collect();
    Json(TaskListResponse { total: items.len(), items })
}

async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let snapshot =
        state.tasks().get(&id).ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;
    Ok(Json(TaskStatusResponse::from(snapshot)))
}

async fn execute_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let snapshot = state.tasks().start(&id)?;
    Ok(Json(TaskStatusResponse::from(snapshot)))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let snapshot = state.tasks().cancel(&id)?;
    Ok(Json(TaskStatusResponse::from(snapshot)))
}

async fn task_statistics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskStatisticsResponse>, ApiError> {
    let stats = state
        .tasks()
        .statistics(&id)
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;
    Ok(Json(TaskStatisticsResponse::from(stats)))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskDeletedResponse>, ApiError> {
    let removed = state.tasks().remove(&id)?;
    Ok(Json(TaskDeletedResponse {
        task_id: removed.task_id,
        status: "deleted",
        message: "Task deleted successfully",
    }))
}
