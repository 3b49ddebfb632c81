//! Shared server state handed to every handler.

use std::sync::Arc;

use clinsync_core::{
    PatientDirectory, ReportStore, RoleStore, SettingsStore, SocketHub,
};
use clinsync_realtime::{ConnectionRegistry, NotificationService, ReportProcessor};

/// Application state shared across HTTP handlers and socket sessions.
///
/// Stores are held as trait objects so the same router runs against
/// Postgres-backed repositories in production and in-memory fakes in
/// integration tests.
#[derive(Clone)]
pub struct AppState {
    /// Read-only patient lookups for enrichment and clinic resolution.
    pub patients: Arc<dyn PatientDirectory>,
    /// Report rows (create, status transitions, delete).
    pub reports: Arc<dyn ReportStore>,
    /// Clinic membership checks for report creation.
    pub roles: Arc<dyn RoleStore>,
    /// Application settings (maintenance mode).
    pub settings: Arc<dyn SettingsStore>,
    /// Durable notification writes and queries.
    pub notifications: Arc<NotificationService>,
    /// Broadcast hub feeding every connected socket.
    pub hub: SocketHub,
    /// Room membership for connected sockets.
    pub registry: Arc<ConnectionRegistry>,
    /// External processing service, absent when unconfigured.
    pub processor: Option<Arc<dyn ReportProcessor>>,
}
