//! Admin settings endpoints.
//!
//! Maintenance mode is a plain `app_setting` row. Writing it here
//! triggers the change feed, which broadcasts
//! `maintenance_mode_update` to every connected socket.

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use clinsync_core::defaults::MAINTENANCE_MODE_KEY;

use crate::{ApiError, AppState};

/// Body for toggling maintenance mode.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MaintenanceUpdateRequest {
    pub enabled: bool,
}

/// Read the current maintenance mode flag.
#[utoipa::path(get, path = "/api/admin/settings/maintenance", tag = "Admin",
    responses((status = 200, description = "Current maintenance mode")))]
pub async fn get_maintenance_mode(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let value = state.settings.get(MAINTENANCE_MODE_KEY).await?;
    let enabled = value.as_deref() == Some("true");
    Ok(Json(json!({
        "success": true,
        "maintenanceMode": enabled,
    })))
}

/// Toggle maintenance mode.
#[utoipa::path(put, path = "/api/admin/settings/maintenance", tag = "Admin",
    request_body = MaintenanceUpdateRequest,
    responses((status = 200, description = "Maintenance mode updated")))]
pub async fn set_maintenance_mode(
    State(state): State<AppState>,
    Json(req): Json<MaintenanceUpdateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let value = if req.enabled { "true" } else { "false" };
    state.settings.set(MAINTENANCE_MODE_KEY, value).await?;
    info!(enabled = req.enabled, "Maintenance mode updated");
    Ok(Json(json!({
        "success": true,
        "maintenanceMode": req.enabled,
        "message": "Maintenance mode updated successfully",
    })))
}
