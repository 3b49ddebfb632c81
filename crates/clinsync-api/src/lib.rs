//! HTTP and WebSocket surface for the clinsync realtime backend.
//!
//! The router exposes the REST endpoints for notifications, reports and
//! admin settings plus the `/ws` socket upgrade. Handlers never emit
//! socket events directly: they write to the stores, and the Postgres
//! change feed drives all realtime fan-out.

use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use clinsync_core::defaults::MAINTENANCE_MODE_KEY;

pub mod handlers;
pub mod state;
pub mod ws;

pub use state::AppState;

/// Imaging uploads (CBCT volumes) can be hundreds of megabytes.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

// =============================================================================
// REQUEST ID (UUIDv7)
// =============================================================================

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so request IDs sort chronologically
/// in logs.
#[derive(Clone, Default)]
struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

// =============================================================================
// CORS
// =============================================================================

/// Parses `ALLOWED_ORIGINS` (comma-separated) into CORS origin values.
fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());

    if origins_str.trim().is_empty() {
        return vec![HeaderValue::from_static("http://localhost:3000")];
    }

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

// =============================================================================
// ERROR TYPE
// =============================================================================

/// API error responses.
///
/// Every error renders as `{"success": false, "error": "..."}` with the
/// matching HTTP status, which is the envelope socket error events use
/// as well.
#[derive(Debug)]
pub enum ApiError {
    /// Store or pipeline failure surfaced as 500.
    Internal(clinsync_core::Error),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
}

impl From<clinsync_core::Error> for ApiError {
    fn from(err: clinsync_core::Error) -> Self {
        use clinsync_core::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::PatientNotFound(_) => ApiError::NotFound("Patient not found".to_string()),
            Error::ReportNotFound(_) => ApiError::NotFound("Report not found".to_string()),
            Error::NotificationNotFound(_) => {
                ApiError::NotFound("Notification not found".to_string())
            }
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Unauthorized(msg) => ApiError::Unauthorized(msg),
            Error::Forbidden(msg) => ApiError::Forbidden(msg),
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal error: {}", e),
                )
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };
        let body = Json(json!({
            "success": false,
            "error": message,
        }));
        (status, body).into_response()
    }
}

// =============================================================================
// OPENAPI DOCUMENTATION
// =============================================================================

#[derive(OpenApi)]
#[openapi(
    info(
        title = "ClinSync API",
        description = "Clinic realtime backend: reports, notifications and socket fan-out"
    ),
    paths(
        health_check,
        socket_status,
        handlers::notifications::list_notifications,
        handlers::notifications::mark_notification_read,
        handlers::notifications::mark_all_notifications_read,
        handlers::notifications::clear_notifications,
        handlers::notifications::update_notification_status,
        handlers::reports::create_report,
        handlers::reports::update_report_status,
        handlers::reports::delete_report,
        handlers::admin::get_maintenance_mode,
        handlers::admin::set_maintenance_mode,
    ),
    components(schemas(
        handlers::notifications::MarkReadRequest,
        handlers::notifications::ReadAllRequest,
        handlers::notifications::ClearRequest,
        handlers::notifications::StatusUpdateRequest,
        handlers::reports::ReportStatusRequest,
        handlers::admin::MaintenanceUpdateRequest,
    )),
    tags(
        (name = "System", description = "Health and socket diagnostics"),
        (name = "Notifications", description = "Durable per-user notifications"),
        (name = "Reports", description = "Imaging report lifecycle"),
        (name = "Admin", description = "Application settings"),
    )
)]
struct ApiDoc;

// =============================================================================
// SYSTEM HANDLERS
// =============================================================================

/// Health check endpoint.
///
/// The settings probe exercises the database connection in production;
/// a failing store reports `"database": "error"` without failing the
/// endpoint itself.
#[utoipa::path(get, path = "/health", tag = "System",
    responses((status = 200, description = "Service health report")))]
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = match state.settings.get(MAINTENANCE_MODE_KEY).await {
        Ok(_) => "connected",
        Err(e) => {
            warn!(error = %e, "Health check database probe failed");
            "error"
        }
    };
    Json(json!({
        "status": "ok",
        "service": "clinsync-api",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
    }))
}

/// Socket connection summary.
///
/// `connectedUsers` counts sockets that completed a login, while
/// `totalConnections` includes anonymous ones still pre-login.
#[utoipa::path(get, path = "/api/socket/status", tag = "System",
    responses((status = 200, description = "Connection counts")))]
async fn socket_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let total = state.registry.connection_count().await;
    let identified = state.registry.identified_connections().await.len();
    Json(json!({
        "success": true,
        "status": "online",
        "connectedUsers": identified,
        "totalConnections": total,
    }))
}

// =============================================================================
// ROUTER
// =============================================================================

/// Builds the full application router over the given state.
pub fn app(state: AppState) -> Router {
    Router::new()
        // OpenAPI / Swagger UI
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Health and diagnostics
        .route("/health", get(health_check))
        .route("/api/socket/status", get(socket_status))
        // Notifications
        .route(
            "/api/notifications/:user_id",
            get(handlers::notifications::list_notifications),
        )
        .route(
            "/api/notifications/:id/read",
            post(handlers::notifications::mark_notification_read),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::mark_all_notifications_read),
        )
        .route(
            "/api/notifications",
            delete(handlers::notifications::clear_notifications),
        )
        .route(
            "/api/notifications/:id/status",
            post(handlers::notifications::update_notification_status),
        )
        // Reports
        .route("/api/reports", post(handlers::reports::create_report))
        .route(
            "/api/reports/:id/status",
            patch(handlers::reports::update_report_status),
        )
        .route("/api/reports/:id", delete(handlers::reports::delete_report))
        // Admin settings
        .route(
            "/api/admin/settings/maintenance",
            get(handlers::admin::get_maintenance_mode).put(handlers::admin::set_maintenance_mode),
        )
        // WebSocket upgrade
        .route("/ws", get(ws::ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer({
            let allowed_origins = parse_allowed_origins();

            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .allow_credentials(true)
                .max_age(std::time::Duration::from_secs(3600))
        })
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES))
        .with_state(state)
}
