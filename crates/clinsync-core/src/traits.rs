//! Core traits for clinsync abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// PATIENT DIRECTORY
// =============================================================================

/// Read-only patient lookups used by the realtime pipeline.
#[async_trait]
pub trait PatientDirectory: Send + Sync {
    /// Clinic and display name for a patient. `None` when the patient row
    /// is gone (e.g. deleted between feed event and lookup).
    async fn patient_ref(&self, patient_id: Uuid) -> Result<Option<PatientRef>>;

    /// Full context including creator and treating doctors, for durable
    /// notification targeting.
    async fn patient_details(&self, patient_id: Uuid) -> Result<Option<PatientDetails>>;
}

// =============================================================================
// REPORT STORE
// =============================================================================

/// Repository for report rows.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert a new report with status `processing`.
    async fn insert(&self, req: CreateReportRequest) -> Result<Report>;

    /// Fetch a report by ID.
    async fn fetch(&self, id: Uuid) -> Result<Option<Report>>;

    /// Set the status field only.
    async fn update_status(&self, id: Uuid, status: ReportStatus) -> Result<()>;

    /// Record a processing outcome: final status plus artifact URLs.
    async fn record_outcome(
        &self,
        id: Uuid,
        status: ReportStatus,
        report_url: Option<&str>,
        data_url: Option<&str>,
    ) -> Result<()>;

    /// Delete a report row.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Number of reports currently stored for a patient.
    async fn count_for_patient(&self, patient_id: Uuid) -> Result<i64>;
}

// =============================================================================
// NOTIFICATION STORE
// =============================================================================

/// Repository for durable notification rows.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert a notification, returning the stored row.
    async fn insert(&self, req: NewNotification) -> Result<Notification>;

    /// All notifications for a user, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>>;

    /// Flip is_read for one notification owned by the user. Returns whether
    /// a row was updated.
    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<bool>;

    /// Flip is_read on every unread notification for a user. Returns the
    /// number of rows updated.
    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64>;

    /// Delete every notification for a user. Returns the number of rows
    /// deleted.
    async fn clear_for_user(&self, user_id: Uuid) -> Result<u64>;

    /// Fetch the metadata object of one notification.
    async fn fetch_meta(&self, id: Uuid) -> Result<Option<JsonValue>>;

    /// Replace the metadata object of one notification.
    async fn update_meta(&self, id: Uuid, meta: JsonValue) -> Result<()>;
}

// =============================================================================
// ROLE STORE
// =============================================================================

/// Clinic membership and ownership lookups.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// The user's role in a clinic, if they are a member.
    async fn role_for(&self, user_id: Uuid, clinic_id: Uuid) -> Result<Option<ClinicRole>>;

    /// The user who created the clinic.
    async fn clinic_creator(&self, clinic_id: Uuid) -> Result<Option<Uuid>>;

    /// All members of a clinic with their roles.
    async fn members(&self, clinic_id: Uuid) -> Result<Vec<ClinicMember>>;

    /// Whether the user created the clinic.
    async fn is_clinic_creator(&self, user_id: Uuid, clinic_id: Uuid) -> Result<bool> {
        Ok(self
            .clinic_creator(clinic_id)
            .await?
            .map(|creator| creator == user_id)
            .unwrap_or(false))
    }
}

// =============================================================================
// SETTINGS STORE
// =============================================================================

/// Key/value application settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Upsert a setting value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

// =============================================================================
// CHANGE FEED
// =============================================================================

/// Kind of row change carried by a feed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "INSERT"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// One row change as delivered by the database change feed.
///
/// `new` carries the full row for INSERT/UPDATE. `old` is best-effort: the
/// feed trims it to a few identifying columns, which is exactly why the
/// report cache exists. Consumers must tolerate missing fields in `old`.
#[derive(Debug, Clone, Deserialize)]
pub struct TableChange {
    pub table: String,
    pub action: ChangeKind,
    #[serde(default)]
    pub new: Option<JsonValue>,
    #[serde(default)]
    pub old: Option<JsonValue>,
}

/// An open subscription yielding row changes in commit order.
#[async_trait]
pub trait ChangeFeedStream: Send {
    /// Next change. `Ok(None)` means the stream closed cleanly; `Err` means
    /// a channel error. Either way the caller is expected to re-subscribe.
    async fn next_change(&mut self) -> Result<Option<TableChange>>;
}

/// Source of database row-change events.
///
/// Abstracts the LISTEN/NOTIFY plumbing so the listener logic can be driven
/// by a scripted feed in tests.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription covering the given tables.
    async fn subscribe(&self, tables: &[&str]) -> Result<Box<dyn ChangeFeedStream>>;
}
