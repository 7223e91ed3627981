//! HTTP surface: upload, workflow runs, the document store and dashboard stats.
use std::any::Any;
use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::Utc;
use iep_common::ids;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::AppError;
use crate::intake::{self, MAX_UPLOAD_BYTES};
use crate::model::{Document, DocumentStatus, SubCriteria};
use crate::orchestrator::{Orchestrator, WorkflowInput, WorkflowResult};
use crate::stats::{self, DashboardStats};
use crate::store::{DocumentStore, RubricEditError};

/// Multipart framing on top of the largest accepted file.
const BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(store: Arc<DocumentStore>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/upload", post(upload))
        .route("/api/process-document", post(process_document))
        .route("/api/workflow-orchestrator", post(workflow_orchestrator))
        .route("/api/documents", get(list_documents).delete(clear_documents))
        .route("/api/documents/{id}", get(get_document))
        .route(
            "/api/documents/{id}/rubric/{section_id}/{criterion_id}",
            patch(edit_rubric),
        )
        .route("/api/stats", get(dashboard))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "request handler panicked");
    AppError::Internal("request handler panicked".to_string()).into_response()
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let store = if state.store.is_persistent() {
        "redis"
    } else {
        "memory"
    };
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "api": "operational",
            "store": store,
            "agent": "configured",
        },
        "orchestration": state.orchestrator.options().mode.as_str(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    success: bool,
    document_id: String,
    file_name: String,
    file_size: u64,
}

async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let upload = intake::read_upload(multipart?).await?;
    let mut document = Document::new(ids::document_id(), &upload.file_name, upload.size());
    document.content_sha256 = Some(upload.sha256());
    info!(
        document_id = %document.id,
        file_name = %document.file_name,
        file_size = document.file_size,
        "document uploaded"
    );
    let response = UploadResponse {
        success: true,
        document_id: document.id.clone(),
        file_name: document.file_name.clone(),
        file_size: document.file_size,
    };
    state.store.put(document).await;
    Ok(Json(response))
}

/// Upload and run the workflow with the file attached to every agent call.
async fn process_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<WorkflowResult>, AppError> {
    let upload = intake::read_upload(multipart?).await?;
    let mut document = Document::new(ids::document_id(), &upload.file_name, upload.size());
    document.content_sha256 = Some(upload.sha256());
    document.status = DocumentStatus::Processing;
    state.store.put(document.clone()).await;

    let result = state
        .orchestrator
        .run(WorkflowInput {
            document_id: &document.id,
            file_name: &document.file_name,
            upload: Some(&upload),
        })
        .await?;
    result.apply_to(&mut document);
    state.store.put(document).await;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowRequest {
    #[serde(default)]
    document_id: String,
    #[serde(default)]
    file_name: Option<String>,
}

/// Run the workflow for a known id without a file. A stored document with that id takes the result.
async fn workflow_orchestrator(
    State(state): State<AppState>,
    request: Result<Json<WorkflowRequest>, JsonRejection>,
) -> Result<Json<WorkflowResult>, AppError> {
    let Json(request) = request?;
    let stored = state.store.get(&request.document_id).await;
    let file_name = request
        .file_name
        .or_else(|| stored.as_ref().map(|d| d.file_name.clone()))
        .unwrap_or_default();

    let result = state
        .orchestrator
        .run(WorkflowInput {
            document_id: &request.document_id,
            file_name: &file_name,
            upload: None,
        })
        .await?;
    if let Some(mut document) = stored {
        result.apply_to(&mut document);
        state.store.put(document).await;
    }
    Ok(Json(result))
}

async fn list_documents(State(state): State<AppState>) -> Json<Vec<Document>> {
    Json(state.store.list().await)
}

async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    state
        .store
        .get(&id)
        .await
        .map(Json)
        .ok_or(AppError::NotFound(id))
}

async fn clear_documents(State(state): State<AppState>) -> Json<Value> {
    let removed = state.store.clear().await;
    info!(removed, "document store cleared");
    Json(json!({ "success": true, "removed": removed }))
}

#[derive(Debug, Deserialize)]
struct RubricEdit {
    summary: String,
}

#[derive(Debug, Serialize)]
struct RubricEditResponse {
    success: bool,
    criterion: SubCriteria,
}

async fn edit_rubric(
    State(state): State<AppState>,
    Path((id, section_id, criterion_id)): Path<(String, String, String)>,
    edit: Result<Json<RubricEdit>, JsonRejection>,
) -> Result<Json<RubricEditResponse>, AppError> {
    let Json(edit) = edit?;
    let criterion = state
        .store
        .edit_rubric_summary(&id, &section_id, &criterion_id, &edit.summary)
        .await
        .map_err(|e| match e {
            RubricEditError::Document(id) => AppError::NotFound(id),
            other => AppError::BadRequest(other.to_string()),
        })?;
    Ok(Json(RubricEditResponse {
        success: true,
        criterion,
    }))
}

async fn dashboard(State(state): State<AppState>) -> Json<DashboardStats> {
    Json(stats::dashboard_stats(&state.store.list().await))
}
