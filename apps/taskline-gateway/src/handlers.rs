//! REST fallback surface plus the internal dispatch endpoints used by the
//! task CRUD service. Every response wraps its payload in a `success`
//! envelope so polling clients and the push path share one shape.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use metrics::counter;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use taskline_proto::{NewNotification, Notification, NotificationId, TaskId, UserId};

use crate::auth::{bearer_token, AuthError};
use crate::server::AppState;
use crate::store::StoreError;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Forbidden,
    NotFound,
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::Forbidden => ApiError::Forbidden,
            StoreError::Unavailable(reason) => ApiError::Internal(reason),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "notification belongs to another user".to_string(),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "notification not found".to_string()),
            ApiError::Internal(reason) => {
                warn!(%reason, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, reason)
            }
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub success: bool,
    pub count: usize,
    pub data: Vec<Notification>,
}

#[derive(Debug, Serialize)]
pub struct ItemResponse {
    pub success: bool,
    pub data: Notification,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub success: bool,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    /// Whether at least one live session received the push. `false` is a
    /// normal outcome for an offline recipient; the row is persisted either
    /// way and reachable through the list endpoint.
    pub delivered: bool,
    pub data: Notification,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    /// How many sessions were watching the task room.
    pub delivered: usize,
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let token = bearer_token(headers)
        .ok_or_else(|| ApiError::Unauthorized("no credential supplied".to_string()))?;
    Ok(state.verifier.verify(token).await?)
}

/// The `/internal/*` surface is for the task CRUD service, not end users:
/// it shares the gateway's secret directly instead of presenting a user
/// token, so a reachable listener alone is not enough to forge pushes.
fn authorize_internal(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    match bearer_token(headers) {
        Some(secret) if secret == state.config.auth_secret => Ok(()),
        Some(_) => Err(ApiError::Unauthorized(
            "invalid service credential".to_string(),
        )),
        None => Err(ApiError::Unauthorized("no credential supplied".to_string())),
    }
}

/// `GET /api/notifications` - every notification for the caller, newest
/// first.
pub async fn list_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListResponse>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let data = state.store.list_for(&caller).await?;
    Ok(Json(ListResponse {
        success: true,
        count: data.len(),
        data,
    }))
}

/// `GET /api/notifications/unread-count`
pub async fn unread_count(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CountResponse>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let count = state.store.unread_count(&caller).await?;
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

/// `PUT /api/notifications/read-all` - returns how many rows flipped.
pub async fn mark_all_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CountResponse>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let count = state.store.mark_all_read(&caller).await?;
    Ok(Json(CountResponse {
        success: true,
        count,
    }))
}

/// `PUT /api/notifications/:id` - mark a single notification read. 404 for
/// an unknown id, 403 when it belongs to someone else.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ItemResponse>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let data = state
        .store
        .mark_read(&caller, &NotificationId::new(id))
        .await?;
    Ok(Json(ItemResponse {
        success: true,
        data,
    }))
}

/// `DELETE /api/notifications/:id`
pub async fn delete_notification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MessageResponse>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    state
        .store
        .delete(&caller, &NotificationId::new(id))
        .await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "notification deleted".to_string(),
    }))
}

/// `POST /internal/notifications` - persist a notification, then push it to
/// the recipient's live sessions. Called by the task CRUD service with the
/// shared service credential.
///
/// Persist-then-push: the durable row exists before any frame leaves, so a
/// skipped push (offline recipient) loses nothing.
pub async fn create_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(new): Json<NewNotification>,
) -> Result<Json<DispatchResponse>, ApiError> {
    authorize_internal(&state, &headers)?;
    let data = state.store.create(new).await?;
    let delivered = state.dispatcher.notify_user(&data.recipient, data.clone());
    counter!("gateway_internal_dispatches_total", 1);
    info!(
        notification = %data.id,
        recipient = %data.recipient,
        delivered,
        "notification persisted and dispatched"
    );
    Ok(Json(DispatchResponse {
        success: true,
        delivered,
        data,
    }))
}

/// `POST /internal/tasks/:id/updated` - broadcast a task snapshot to its
/// room. Ephemeral only: no durable record is written.
pub async fn broadcast_task_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(snapshot): Json<serde_json::Value>,
) -> Result<Json<BroadcastResponse>, ApiError> {
    authorize_internal(&state, &headers)?;
    let task_id = TaskId::new(id);
    let delivered = state.dispatcher.broadcast_task_update(&task_id, snapshot);
    Ok(Json(BroadcastResponse {
        success: true,
        delivered,
    }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}

/// `GET /debug/stats` - live identity/session counts.
pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let identities: Vec<serde_json::Value> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(identity, sessions)| json!({ "identity": identity, "sessions": sessions }))
        .collect();
    Json(json!({
        "identities_online": state.registry.identity_count(),
        "sessions_online": state.registry.session_count(),
        "identities": identities,
    }))
}
