//! JSON over HTTP front end for the job controller

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde_json::{json, Map, Value};

use crate::controller::JobController;
use crate::error::Error;
use crate::job::spec::JobHandle;
use crate::request::message::{CheckStatusRequest, ErrorResponse, RunJobRequest, RunJobResponse, StatusResponse};
use crate::request::schema::RequestSchemas;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
    pub schemas: Arc<RequestSchemas>,
}

/// Errors leave the API as `{"error": ..., "kind": ...}`
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("Request failed: {}", self.0);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/run-job", post(run_job_handler))
        .route("/check-job-status", get(check_status_handler).post(check_status_handler))
        .route(
            "/check-job-status/:job_id",
            get(check_status_path_handler).post(check_status_path_handler),
        )
        .route("/cancel-job/:job_id", post(cancel_job_handler))
        .route("/jobs", get(list_jobs_handler).delete(clear_jobs_handler))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {addr}");
    axum::serve(listener, router(state)).await
}

/// Empty bodies are treated as `{}`
fn parse_body(body: &Bytes) -> Result<Value, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|e| Error::InvalidRequest(format!("body is not JSON: {e}")))
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn run_job_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RunJobResponse>, ApiError> {
    let spec = RunJobRequest::parse(&state.schemas, parse_body(&body)?)?;
    info!("Run job request: {} for {}", spec.model, spec.submitted_by);
    let handle = state.controller.submit(spec).await?;
    Ok(Json(RunJobResponse::from(handle)))
}

async fn check_status_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    check_status(&state, None, query, &body).await
}

async fn check_status_path_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    check_status(&state, Some(job_id), query, &body).await
}

/// The job id may come from the path, the body or the query string, in that order
async fn check_status(
    state: &AppState,
    path_id: Option<String>,
    query: HashMap<String, String>,
    body: &Bytes,
) -> Result<Json<StatusResponse>, ApiError> {
    let mut value = parse_body(body)?;
    let fields = value
        .as_object_mut()
        .ok_or_else(|| Error::InvalidRequest("body must be a JSON object".to_string()))?;
    if let Some(id) = path_id {
        fields.insert("job_id".to_string(), Value::String(id));
    }
    for key in ["job_id", "job_folder"] {
        if let Some(v) = query.get(key) {
            fields.entry(key).or_insert_with(|| Value::String(v.clone()));
        }
    }

    let request = CheckStatusRequest::parse(&state.schemas, value)?;
    let job_id = request
        .job_id()
        .ok_or_else(|| Error::InvalidRequest("job_id must be a string or number".to_string()))?;
    let report = state
        .controller
        .check_status(&job_id, request.job_folder.as_deref())
        .await?;
    Ok(Json(StatusResponse::from(report)))
}

async fn cancel_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.controller.cancel(&job_id).await?;
    Ok(Json(json!({"job_id": job_id, "cancelled": true})))
}

async fn list_jobs_handler(State(state): State<AppState>) -> Json<Vec<JobHandle>> {
    Json(state.controller.ledger().list().await)
}

async fn clear_jobs_handler(State(state): State<AppState>) -> Json<Value> {
    let cleared = state.controller.ledger().clear().await;
    Json(json!({"cleared": cleared}))
}
