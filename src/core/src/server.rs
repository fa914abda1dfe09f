use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::backup::{BackupOutcome, BackupService, RemoteBackup, RestoreOutcome};
use crate::dest::DestinationKind;
use crate::error::BackupError;
use crate::storage::{ChatRecord, Store};
use crate::sync::{SyncReport, SyncRunner, ThreadSyncReport};

/// Shared state accessible by handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub store: Arc<dyn Store>,
    pub backups: Arc<BackupService>,
    pub sync: Arc<SyncRunner>,
}

/// Build the axum router for the local control API.
pub fn build_router(
    store: Arc<dyn Store>,
    backups: Arc<BackupService>,
    sync: Arc<SyncRunner>,
) -> Router {
    match store.all_conversations() {
        Ok(chats) => tracing::info!(chats = chats.len(), "serving local message mirror"),
        Err(e) => tracing::warn!("failed to read conversation count on startup: {e}"),
    }

    let state = AppState {
        store,
        backups,
        sync,
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/chats", get(chats))
        .route("/api/chats/{peer_id}/remark", post(set_remark))
        .route("/api/backup", post(backup_now))
        .route("/api/backups", get(list_backups))
        .route("/api/restore", post(restore))
        .route("/api/sync", post(sync_now))
        .route("/api/sync/{peer_id}", post(sync_peer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error wrapper turning [`BackupError`] kinds into HTTP statuses.
struct ApiError(BackupError);

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn storage(err: String) -> Self {
        Self(BackupError::Storage(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BackupError::Auth(_) => StatusCode::UNAUTHORIZED,
            BackupError::NotFound(_) => StatusCode::NOT_FOUND,
            BackupError::Conflict(_) => StatusCode::CONFLICT,
            BackupError::NotConfigured => StatusCode::PRECONDITION_FAILED,
            BackupError::Format(_) => StatusCode::UNPROCESSABLE_ENTITY,
            BackupError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BackupError::Network(_) => StatusCode::BAD_GATEWAY,
            BackupError::Storage(_) | BackupError::AllFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Serialize)]
struct DestinationStatus {
    kind: DestinationKind,
    configured: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    site: String,
    user_id: i64,
    chats: usize,
    last_backup_at: Option<i64>,
    sync_enabled: bool,
    sync_interval_secs: u64,
    destinations: Vec<DestinationStatus>,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let chats = state
        .store
        .all_conversations()
        .map_err(ApiError::storage)?
        .len();
    let last_backup_at = state.backups.last_backup_at().map_err(ApiError::storage)?;
    let (sync_enabled, sync_interval_secs) = {
        let config = state
            .backups
            .config()
            .lock()
            .map_err(|_| ApiError::storage("config lock poisoned".to_string()))?;
        (config.sync.enabled, config.sync.interval_secs)
    };
    let destinations = state
        .backups
        .destinations()
        .iter()
        .map(|dest| DestinationStatus {
            kind: dest.kind(),
            configured: dest.configured(),
        })
        .collect();

    Ok(Json(StatusResponse {
        site: state.backups.site_id().to_string(),
        user_id: state.backups.user_id(),
        chats,
        last_backup_at,
        sync_enabled,
        sync_interval_secs,
        destinations,
    }))
}

#[derive(Deserialize)]
struct ChatsQuery {
    /// When set, drop the rows still present upstream and show only the
    /// ones that fell out of the list (local history view).
    #[serde(default)]
    hide_latest: bool,
}

async fn chats(
    State(state): State<AppState>,
    Query(query): Query<ChatsQuery>,
) -> Result<Json<Vec<ChatRecord>>, ApiError> {
    let mut chats = state.store.all_conversations().map_err(ApiError::storage)?;
    if query.hide_latest {
        chats.retain(|chat| !chat.is_latest);
    }
    Ok(Json(chats))
}

#[derive(Deserialize)]
struct RemarkBody {
    remark: String,
}

async fn set_remark(
    State(state): State<AppState>,
    Path(peer_id): Path<i64>,
    Json(body): Json<RemarkBody>,
) -> Result<StatusCode, ApiError> {
    let known = state
        .store
        .set_remark(peer_id, &body.remark)
        .map_err(ApiError::storage)?;
    if !known {
        return Err(BackupError::NotFound(format!("no conversation with peer {peer_id}")).into());
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn backup_now(State(state): State<AppState>) -> Result<Json<BackupOutcome>, ApiError> {
    Ok(Json(state.backups.perform_backup().await?))
}

#[derive(Deserialize)]
struct BackupsQuery {
    destination: Option<DestinationKind>,
}

async fn list_backups(
    State(state): State<AppState>,
    Query(query): Query<BackupsQuery>,
) -> Result<Json<Vec<RemoteBackup>>, ApiError> {
    Ok(Json(state.backups.list_backups(query.destination).await?))
}

#[derive(Deserialize)]
struct RestoreBody {
    destination: DestinationKind,
    id: String,
}

async fn restore(
    State(state): State<AppState>,
    Json(body): Json<RestoreBody>,
) -> Result<Json<RestoreOutcome>, ApiError> {
    Ok(Json(
        state.backups.restore(body.destination, &body.id).await?,
    ))
}

async fn sync_now(State(state): State<AppState>) -> Result<Json<SyncReport>, ApiError> {
    Ok(Json(state.sync.sync_once().await?))
}

async fn sync_peer(
    State(state): State<AppState>,
    Path(peer_id): Path<i64>,
) -> Result<Json<ThreadSyncReport>, ApiError> {
    Ok(Json(state.sync.sync_thread(peer_id).await?))
}
