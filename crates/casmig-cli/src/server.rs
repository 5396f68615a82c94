//! Management HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use casmig_core::verify::RelationshipFilter;
use casmig_core::{
    MigrationConfig, MigrationResult, MigrationService, OperationStatus, RunId, StorageDescriptor,
    VerificationService,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

pub struct AppState {
    pub migrations: MigrationService,
    /// Absent when no target or reference database was configured.
    pub verification: Option<Arc<VerificationService>>,
}

impl AppState {
    pub fn new(migrations: MigrationService, verification: Option<VerificationService>) -> Self {
        AppState {
            migrations,
            verification: verification.map(Arc::new),
        }
    }

    fn verification(&self) -> Result<&VerificationService, ApiError> {
        self.verification
            .as_deref()
            .ok_or(ApiError::VerificationUnavailable)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Migration not found: {0}")]
    RunNotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Verification is not configured: start the server with a target and a reference database")]
    VerificationUnavailable,

    #[error("{context}: {message}")]
    Internal { context: &'static str, message: String },
}

impl ApiError {
    fn internal(context: &'static str, err: impl std::fmt::Display) -> Self {
        ApiError::Internal {
            context,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::RunNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::VerificationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/storage/migration/start", post(start_migration))
        .route("/api/storage/migration/status/:id", get(migration_status))
        .route("/api/storage/migration/result/:id", get(migration_result))
        .route("/api/storage/migration/cancel/:id", post(cancel_migration))
        .route("/api/storage/migration/list", get(list_migrations))
        .route("/api/migration/verify", get(verify))
        .route("/api/migration/missing-files", get(missing_files))
        .route("/api/migration/orphaned-files", get(orphaned_files))
        .route("/api/migration/file-relationships", get(file_relationships))
        .route("/api/migration/cleanup", post(cleanup))
        .route("/api/migration/storage-files", get(storage_files))
        .with_state(state)
}

pub async fn serve(listen: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("casmig management API listening on http://{}", listen);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub config: MigrationConfig,
}

/// POST /api/storage/migration/start
async fn start_migration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let bad_request = |e: casmig_core::MigrationError| ApiError::BadRequest(e.to_string());
    let source: StorageDescriptor = req.source.parse().map_err(bad_request)?;
    let target: StorageDescriptor = req.target.parse().map_err(bad_request)?;
    req.config.validate().map_err(bad_request)?;

    let source = source.open().await.map_err(bad_request)?;
    let target = target.open().await.map_err(bad_request)?;
    let id = state
        .migrations
        .start_migration(source, target, req.config)
        .map_err(bad_request)?;
    Ok(Json(json!({ "migrationId": id })))
}

/// GET /api/storage/migration/status/:id
async fn migration_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .migrations
        .get_migration_progress(&RunId::from(id.as_str()))
        .map(Json)
        .ok_or(ApiError::RunNotFound(id))
}

/// GET /api/storage/migration/result/:id
async fn migration_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state
        .migrations
        .get_migration_result(&RunId::from(id.as_str()))
        .map(Json)
        .ok_or(ApiError::RunNotFound(id))
}

/// POST /api/storage/migration/cancel/:id
async fn cancel_migration(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<serde_json::Value> {
    let cancelled = state.migrations.cancel_migration(&RunId::from(id));
    Json(json!({ "cancelled": cancelled }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    migration_id: RunId,
    #[serde(flatten)]
    result: MigrationResult,
}

/// GET /api/storage/migration/list
async fn list_migrations(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let runs: Vec<RunSummary> = state
        .migrations
        .get_all_migrations()
        .into_iter()
        .map(|(migration_id, result)| RunSummary {
            migration_id,
            result,
        })
        .collect();
    Json(runs)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailsQuery {
    details: bool,
}

/// GET /api/migration/verify
async fn verify(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DetailsQuery>,
) -> ApiResult<impl IntoResponse> {
    let result = state.verification()?.verify_migration(query.details).await;
    Ok(Json(result))
}

/// GET /api/migration/missing-files
async fn missing_files(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let missing = state
        .verification()?
        .get_detailed_missing_files_list()
        .await
        .map_err(|e| ApiError::internal("Failed to get missing files", e))?;
    Ok(Json(json!({ "missingFiles": missing })))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

/// GET /api/migration/orphaned-files
async fn orphaned_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<impl IntoResponse> {
    let limit = query.limit.unwrap_or(100);
    let orphans = state
        .verification()?
        .get_orphaned_files_preview(limit)
        .await
        .map_err(|e| ApiError::internal("Failed to get orphaned files", e))?;
    Ok(Json(json!({
        "orphanedFiles": orphans,
        "totalShown": orphans.len(),
        "limit": limit,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RelationshipQuery {
    limit: Option<usize>,
    only_orphaned: bool,
    only_used: bool,
}

/// GET /api/migration/file-relationships
async fn file_relationships(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelationshipQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = RelationshipFilter::from_flags(query.only_orphaned, query.only_used);
    let report = state
        .verification()?
        .get_file_relationship_report(query.limit.unwrap_or(1000), filter)
        .await
        .map_err(|e| ApiError::internal("Failed to get file relationships", e))?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CleanupQuery {
    dry_run: bool,
    details: bool,
    confirm: bool,
}

impl Default for CleanupQuery {
    fn default() -> Self {
        CleanupQuery {
            dry_run: true,
            details: false,
            confirm: false,
        }
    }
}

/// POST /api/migration/cleanup
async fn cleanup(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CleanupQuery>,
) -> Response {
    // Checked before anything touches storage.
    if !query.dry_run && !query.confirm {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Actual file deletion requires explicit confirmation",
                "message": "Add ?confirm=true&dryRun=false to actually delete files",
            })),
        )
            .into_response();
    }
    let service = match state.verification() {
        Ok(service) => service,
        Err(e) => return e.into_response(),
    };

    let result = service
        .cleanup_orphaned_files(query.dry_run, query.details)
        .await;
    let status = match result.status {
        OperationStatus::Success => StatusCode::OK,
        OperationStatus::Partial => StatusCode::PARTIAL_CONTENT,
        OperationStatus::Error => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(result)).into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StorageFilesQuery {
    prefix: String,
    limit: Option<usize>,
    include_size: bool,
}

/// GET /api/migration/storage-files
async fn storage_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StorageFilesQuery>,
) -> ApiResult<impl IntoResponse> {
    let listing = state
        .verification()?
        .list_storage_files(&query.prefix, query.limit.unwrap_or(1000), query.include_size)
        .await
        .map_err(|e| ApiError::internal("Failed to list storage files", e))?;
    Ok(Json(listing))
}
