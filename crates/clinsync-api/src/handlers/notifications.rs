//! Notification endpoints.
//!
//! These write through [`NotificationService`], so reads and receipts
//! stay user-scoped. Realtime `new_notification` frames are not sent
//! from here; the change feed picks up inserted rows and fans them out.
//!
//! [`NotificationService`]: clinsync_realtime::NotificationService

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{ApiError, AppState};

// ===== REQUEST TYPES =====

/// Body for marking a single notification read.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    /// Recipient whose notification is being acknowledged.
    pub user_id: Uuid,
}

/// Body for marking all of a user's notifications read.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReadAllRequest {
    pub user_id: Uuid,
}

/// Body for clearing a user's notifications.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClearRequest {
    pub user_id: Uuid,
}

/// Body for updating the processing status stored in notification metadata.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    pub status: String,
}

// ===== HANDLERS =====

/// List a user's notifications, newest first.
#[utoipa::path(get, path = "/api/notifications/{user_id}", tag = "Notifications",
    params(("user_id" = Uuid, Path, description = "Recipient user")),
    responses((status = 200, description = "Notifications for the user, newest first")))]
pub async fn list_notifications(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let notifications = state.notifications.list(user_id).await?;
    Ok(Json(json!({
        "success": true,
        "notifications": notifications,
    })))
}

/// Mark one notification read.
///
/// The update is scoped to the requesting user, so acknowledging
/// another user's notification silently matches nothing.
#[utoipa::path(post, path = "/api/notifications/{id}/read", tag = "Notifications",
    params(("id" = Uuid, Path, description = "Notification id")),
    request_body = MarkReadRequest,
    responses((status = 200, description = "Read receipt recorded")))]
pub async fn mark_notification_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = state.notifications.mark_read(id, req.user_id).await?;
    if !updated {
        debug!(%id, user_id = %req.user_id, "Read receipt matched no notification");
    }
    Ok(Json(json!({
        "success": true,
        "message": "Notification marked as read",
    })))
}

/// Mark all of a user's notifications read.
#[utoipa::path(post, path = "/api/notifications/read-all", tag = "Notifications",
    request_body = ReadAllRequest,
    responses((status = 200, description = "Count of notifications updated")))]
pub async fn mark_all_notifications_read(
    State(state): State<AppState>,
    Json(req): Json<ReadAllRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let updated = state.notifications.mark_all_read(req.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "All notifications marked as read successfully",
        "updatedCount": updated,
    })))
}

/// Delete all of a user's notifications.
#[utoipa::path(delete, path = "/api/notifications", tag = "Notifications",
    request_body = ClearRequest,
    responses((status = 200, description = "Count of notifications deleted")))]
pub async fn clear_notifications(
    State(state): State<AppState>,
    Json(req): Json<ClearRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.notifications.clear_all(req.user_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "All notifications cleared successfully",
        "deletedCount": deleted,
    })))
}

/// Update the processing status inside a notification's metadata.
///
/// Merges `status` into the stored `meta_data` object, preserving the
/// other keys. Processing services call this to reflect report
/// progress on an already-delivered notification.
#[utoipa::path(post, path = "/api/notifications/{id}/status", tag = "Notifications",
    params(("id" = Uuid, Path, description = "Notification id")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Status merged into metadata"),
        (status = 404, description = "Notification not found")
    ))]
pub async fn update_notification_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.notifications.set_meta_status(id, &req.status).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Notification status updated successfully",
        "notificationId": id,
        "status": req.status,
    })))
}
