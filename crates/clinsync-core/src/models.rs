//! Core data models for clinsync.
//!
//! These types mirror the database rows and the wire payloads exchanged with
//! clients. Socket payload shapes are assembled in the realtime crate; the
//! structs here are the canonical row representations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// REPORTS
// =============================================================================

/// Kind of imaging report a clinic can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    /// Panoramic radiograph
    Pano,
    /// Cone-beam CT volume
    Cbct,
    /// Reconstructed 3D model
    #[serde(rename = "3dmodel")]
    ThreeDModel,
}

impl std::fmt::Display for ReportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pano => write!(f, "pano"),
            Self::Cbct => write!(f, "cbct"),
            Self::ThreeDModel => write!(f, "3dmodel"),
        }
    }
}

impl std::str::FromStr for ReportType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pano" => Ok(Self::Pano),
            "cbct" => Ok(Self::Cbct),
            "3dmodel" => Ok(Self::ThreeDModel),
            _ => Err(format!("Invalid report type: {}", s)),
        }
    }
}

/// Processing state of a report.
///
/// `Completed` and `Failed` are terminal: landing on either triggers durable
/// notifications to the patient's interested users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ReportStatus {
    /// Whether this status ends the report lifecycle and should notify
    /// interested users.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid report status: {}", s)),
        }
    }
}

/// A medical-imaging processing job, as stored in the `report` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub report_type: ReportType,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub last_upload: Option<DateTime<Utc>>,
    /// URL of the generated report artifact, set on completion.
    pub report_url: Option<String>,
    /// URL of the raw measurement data, set on completion.
    pub data_url: Option<String>,
}

/// Last-known view of a report held by the in-memory cache.
///
/// Built from feed rows on INSERT and enriched with patient/clinic context
/// once the lookup completes. `cached_at` drives expiry and is never touched
/// by later status updates, so an entry's lifetime is bounded by its first
/// sighting regardless of activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportSnapshot {
    pub report_id: Uuid,
    pub patient_id: Uuid,
    pub report_type: ReportType,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub report_url: Option<String>,
    pub data_url: Option<String>,
    /// Clinic resolved via the patient; absent until enrichment.
    pub clinic_id: Option<Uuid>,
    /// Display name resolved via the patient; absent until enrichment.
    pub patient_name: Option<String>,
    /// Public URL of the original uploaded image; absent until enrichment.
    pub image_url: Option<String>,
    pub cached_at: DateTime<Utc>,
}

impl ReportSnapshot {
    /// Snapshot of a bare report row, timestamped now. Patient and clinic
    /// context is filled in by `with_patient_context`.
    pub fn from_report(report: &Report) -> Self {
        Self {
            report_id: report.id,
            patient_id: report.patient_id,
            report_type: report.report_type,
            status: report.status,
            created_at: report.created_at,
            report_url: report.report_url.clone(),
            data_url: report.data_url.clone(),
            clinic_id: None,
            patient_name: None,
            image_url: None,
            cached_at: Utc::now(),
        }
    }

    /// Attach resolved patient/clinic context, preserving `cached_at`.
    pub fn with_patient_context(
        mut self,
        clinic_id: Uuid,
        patient_name: String,
        image_url: String,
    ) -> Self {
        self.clinic_id = Some(clinic_id);
        self.patient_name = Some(patient_name);
        self.image_url = Some(image_url);
        self
    }
}

/// Parameters for creating a report row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReportRequest {
    pub patient_id: Uuid,
    pub report_type: ReportType,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// A durable notification row owned by one user.
///
/// `kind` serializes as `type` on the wire; clients dispatch on it
/// ("report_completed", "report_failed", "Patient", "info", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub is_read: bool,
    pub token: Option<String>,
    pub meta_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a notification row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub token: Option<String>,
    pub meta_data: Option<serde_json::Value>,
}

// =============================================================================
// PATIENTS AND ROLES
// =============================================================================

/// Minimal patient lookup result: enough to resolve the clinic room and a
/// display name for payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRef {
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
}

impl PatientRef {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Full patient context needed for durable notification targeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientDetails {
    pub clinic_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    /// User who created the patient record; None for imported records.
    pub created_by: Option<Uuid>,
    /// Doctors assigned through active treatments.
    pub treating_doctor_ids: Vec<Uuid>,
}

impl PatientDetails {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Users who receive a durable notification when a report for this
    /// patient reaches a terminal status: the creator plus every treating
    /// doctor, deduplicated. The user who triggered the transition is NOT
    /// excluded here.
    pub fn interested_users(&self) -> Vec<Uuid> {
        let mut users = Vec::new();
        if let Some(creator) = self.created_by {
            users.push(creator);
        }
        for doctor in &self.treating_doctor_ids {
            if !users.contains(doctor) {
                users.push(*doctor);
            }
        }
        users
    }
}

/// A user's role within one clinic.
///
/// Roles form an open set in storage; only the listed ones carry meaning for
/// access checks. Unrecognized values are preserved for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClinicRole {
    Admin,
    FullAccess,
    ClinicAccess,
    Other(String),
}

impl ClinicRole {
    pub fn parse(s: &str) -> Self {
        match s {
            "admin" => Self::Admin,
            "full_access" => Self::FullAccess,
            "clinic_access" => Self::ClinicAccess,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "admin",
            Self::FullAccess => "full_access",
            Self::ClinicAccess => "clinic_access",
            Self::Other(s) => s,
        }
    }

    /// Whether this role alone (ignoring clinic ownership) permits viewing
    /// any patient in the clinic.
    pub fn grants_patient_access(&self) -> bool {
        matches!(self, Self::Admin | Self::FullAccess)
    }
}

impl std::fmt::Display for ClinicRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Membership row: one user's role in one clinic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClinicMember {
    pub user_id: Uuid,
    pub role: ClinicRole,
}

// =============================================================================
// SETTINGS
// =============================================================================

/// A key/value application setting row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSetting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Opaque identifier for one live socket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity bound to a connection after a successful `user_login`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub user_id: Uuid,
    pub clinic_id: Uuid,
    /// Patient currently selected on this connection, if any.
    pub current_patient_id: Option<Uuid>,
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(user_id: Uuid, clinic_id: Uuid) -> Self {
        Self {
            user_id,
            clinic_id,
            current_patient_id: None,
            connected_at: Utc::now(),
        }
    }
}
