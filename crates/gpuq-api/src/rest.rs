//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use gpuq_core::{ApiConfig, GpuStatusReport, GpuqError, NewTask, Task, TaskStatus};
use gpuq_scheduler::{Scheduler, TaskLogs};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

/// Create the API router
pub fn create_router(scheduler: Arc<Scheduler>, config: &ApiConfig) -> Router {
    let state = Arc::new(AppState { scheduler });

    let mut router = Router::new()
        .route("/api/health", get(health))
        .route("/api/gpus", get(gpu_status))
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/logs", get(task_logs))
        .route("/api/tasks/:id/cancel", post(cancel_task))
        .with_state(state);

    if config.cors_enabled {
        router = router.layer(cors_layer(config));
    }
    router
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if config.cors_origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

/// Error adapter mapping the closed error set to status codes
pub struct ApiError(GpuqError);

impl From<GpuqError> for ApiError {
    fn from(err: GpuqError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GpuqError::Validation(_) => StatusCode::BAD_REQUEST,
            GpuqError::NotFound(_) => StatusCode::NOT_FOUND,
            GpuqError::IllegalState(_) => StatusCode::CONFLICT,
            GpuqError::ProbeUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

/// Request to submit a task
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub name: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub command: String,
}

/// One row of the task listing
#[derive(Debug, Serialize)]
pub struct TaskSummary {
    pub id: i64,
    pub name: String,
    pub status: TaskStatus,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskSummary {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            name: task.name,
            status: task.status,
            gpu_type: task.gpu_type,
            gpu_count: task.gpu_count,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GPU occupancy, best-effort when the probe is down
async fn gpu_status(State(state): State<Arc<AppState>>) -> Json<GpuStatusReport> {
    Json(state.scheduler.gpu_status().await)
}

/// List task summaries, newest first
async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TaskSummary>>, ApiError> {
    let tasks = state.scheduler.list().await?;
    Ok(Json(tasks.into_iter().map(TaskSummary::from).collect()))
}

/// Submit a task; it launches on a later scheduling tick
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    info!(
        name = %req.name,
        gpu_type = %req.gpu_type,
        gpu_count = req.gpu_count,
        "Submitting task"
    );
    let task = state
        .scheduler
        .submit(NewTask {
            name: req.name,
            gpu_type: req.gpu_type,
            gpu_count: req.gpu_count,
            command: req.command,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.scheduler.get(id).await?))
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    tail: Option<usize>,
}

async fn task_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<TaskLogs>, ApiError> {
    Ok(Json(state.scheduler.logs(id, query.tail).await?))
}

async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Task>, ApiError> {
    info!(task_id = id, "Cancelling task");
    Ok(Json(state.scheduler.cancel(id).await?))
}
