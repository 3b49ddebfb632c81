//! In-memory fakes for the storage and feed traits.
//!
//! Note: Always compiled so integration tests (in tests/ and downstream
//! crates) can drive the pipeline without a database. Fakes mirror the
//! Postgres repositories' observable contracts: idempotent deletes, matched
//! counts from updates, and `NotificationNotFound` for missing rows.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use clinsync_core::models::*;
use clinsync_core::traits::*;
use clinsync_core::{new_v7, Error, Result};

// ============================================================================
// Patients
// ============================================================================

/// Patient directory backed by a map.
#[derive(Default)]
pub struct FakePatientDirectory {
    patients: RwLock<HashMap<Uuid, PatientDetails>>,
}

impl FakePatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_patient(&self, patient_id: Uuid, details: PatientDetails) {
        self.patients.write().await.insert(patient_id, details);
    }
}

#[async_trait]
impl PatientDirectory for FakePatientDirectory {
    async fn patient_ref(&self, patient_id: Uuid) -> Result<Option<PatientRef>> {
        Ok(self.patients.read().await.get(&patient_id).map(|d| PatientRef {
            clinic_id: d.clinic_id,
            first_name: d.first_name.clone(),
            last_name: d.last_name.clone(),
        }))
    }

    async fn patient_details(&self, patient_id: Uuid) -> Result<Option<PatientDetails>> {
        Ok(self.patients.read().await.get(&patient_id).cloned())
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Report store backed by a map; counts are derived from stored rows.
#[derive(Default)]
pub struct FakeReportStore {
    rows: RwLock<HashMap<Uuid, Report>>,
}

impl FakeReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing `insert`'s status defaulting.
    pub async fn add(&self, report: Report) {
        self.rows.write().await.insert(report.id, report);
    }
}

#[async_trait]
impl ReportStore for FakeReportStore {
    async fn insert(&self, req: CreateReportRequest) -> Result<Report> {
        let report = Report {
            id: new_v7(),
            patient_id: req.patient_id,
            report_type: req.report_type,
            status: ReportStatus::Processing,
            created_at: Utc::now(),
            last_upload: None,
            report_url: None,
            data_url: None,
        };
        self.rows.write().await.insert(report.id, report.clone());
        Ok(report)
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: ReportStatus) -> Result<()> {
        match self.rows.write().await.get_mut(&id) {
            Some(row) => {
                row.status = status;
                Ok(())
            }
            None => Err(Error::ReportNotFound(id)),
        }
    }

    async fn record_outcome(
        &self,
        id: Uuid,
        status: ReportStatus,
        report_url: Option<&str>,
        data_url: Option<&str>,
    ) -> Result<()> {
        match self.rows.write().await.get_mut(&id) {
            Some(row) => {
                row.status = status;
                if let Some(url) = report_url {
                    row.report_url = Some(url.to_string());
                }
                if let Some(url) = data_url {
                    row.data_url = Some(url.to_string());
                }
                row.last_upload = Some(Utc::now());
                Ok(())
            }
            None => Err(Error::ReportNotFound(id)),
        }
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.rows.write().await.remove(&id);
        Ok(())
    }

    async fn count_for_patient(&self, patient_id: Uuid) -> Result<i64> {
        let count = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.patient_id == patient_id)
            .count();
        Ok(count as i64)
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// Notification store recording inserts in order.
#[derive(Default)]
pub struct FakeNotificationStore {
    rows: RwLock<Vec<Notification>>,
}

impl FakeNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row inserted so far, in insertion order.
    pub async fn inserted(&self) -> Vec<Notification> {
        self.rows.read().await.clone()
    }
}

#[async_trait]
impl NotificationStore for FakeNotificationStore {
    async fn insert(&self, req: NewNotification) -> Result<Notification> {
        let row = Notification {
            id: new_v7(),
            user_id: req.user_id,
            title: req.title,
            message: req.message,
            kind: req.kind,
            is_read: false,
            token: req.token,
            meta_data: req.meta_data,
            created_at: Utc::now(),
        };
        self.rows.write().await.push(row.clone());
        Ok(row)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|n| n.id == id && n.user_id == user_id) {
            Some(row) => {
                row.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let mut updated = 0;
        for row in rows.iter_mut().filter(|n| n.user_id == user_id && !n.is_read) {
            row.is_read = true;
            updated += 1;
        }
        Ok(updated)
    }

    async fn clear_for_user(&self, user_id: Uuid) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|n| n.user_id != user_id);
        Ok((before - rows.len()) as u64)
    }

    async fn fetch_meta(&self, id: Uuid) -> Result<Option<JsonValue>> {
        let rows = self.rows.read().await;
        match rows.iter().find(|n| n.id == id) {
            Some(row) => Ok(row.meta_data.clone()),
            None => Err(Error::NotificationNotFound(id)),
        }
    }

    async fn update_meta(&self, id: Uuid, meta: JsonValue) -> Result<()> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|n| n.id == id) {
            Some(row) => {
                row.meta_data = Some(meta);
                Ok(())
            }
            None => Err(Error::NotificationNotFound(id)),
        }
    }
}

// ============================================================================
// Roles
// ============================================================================

/// Role store with explicit membership and creator maps.
#[derive(Default)]
pub struct FakeRoleStore {
    members: RwLock<HashMap<Uuid, Vec<ClinicMember>>>,
    creators: RwLock<HashMap<Uuid, Uuid>>,
}

impl FakeRoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, clinic_id: Uuid, user_id: Uuid, role: ClinicRole) {
        self.members
            .write()
            .await
            .entry(clinic_id)
            .or_default()
            .push(ClinicMember { user_id, role });
    }

    pub async fn set_creator(&self, clinic_id: Uuid, user_id: Uuid) {
        self.creators.write().await.insert(clinic_id, user_id);
    }
}

#[async_trait]
impl RoleStore for FakeRoleStore {
    async fn role_for(&self, user_id: Uuid, clinic_id: Uuid) -> Result<Option<ClinicRole>> {
        Ok(self
            .members
            .read()
            .await
            .get(&clinic_id)
            .and_then(|members| members.iter().find(|m| m.user_id == user_id))
            .map(|m| m.role.clone()))
    }

    async fn clinic_creator(&self, clinic_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self.creators.read().await.get(&clinic_id).copied())
    }

    async fn members(&self, clinic_id: Uuid) -> Result<Vec<ClinicMember>> {
        Ok(self
            .members
            .read()
            .await
            .get(&clinic_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Settings store backed by a map.
#[derive(Default)]
pub struct FakeSettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl FakeSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for FakeSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// Change feed
// ============================================================================

/// Change feed replaying scripted changes.
///
/// Each `subscribe` consumes the next script. A stream whose script runs out
/// yields `Ok(None)` (closed, forcing a resubscribe) unless it was the final
/// script, in which case it parks forever so a listener under test idles
/// instead of spinning through empty resubscriptions.
pub struct ScriptedFeed {
    scripts: Mutex<VecDeque<Vec<TableChange>>>,
    subscriptions: AtomicUsize,
}

impl ScriptedFeed {
    /// A feed with a single script.
    pub fn new(changes: Vec<TableChange>) -> Self {
        Self::with_scripts(vec![changes])
    }

    /// A feed delivering one script per subscription.
    pub fn with_scripts(scripts: Vec<Vec<TableChange>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// How many times `subscribe` has been called.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeFeed for ScriptedFeed {
    async fn subscribe(&self, _tables: &[&str]) -> Result<Box<dyn ChangeFeedStream>> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock().await;
        let changes = scripts.pop_front().unwrap_or_default();
        let park_when_done = scripts.is_empty();
        Ok(Box::new(ScriptedStream {
            changes: changes.into(),
            park_when_done,
        }))
    }
}

struct ScriptedStream {
    changes: VecDeque<TableChange>,
    park_when_done: bool,
}

#[async_trait]
impl ChangeFeedStream for ScriptedStream {
    async fn next_change(&mut self) -> Result<Option<TableChange>> {
        match self.changes.pop_front() {
            Some(change) => Ok(Some(change)),
            None if self.park_when_done => std::future::pending().await,
            None => Ok(None),
        }
    }
}

/// Builds the full dependency set for a listener under test and exposes the
/// individual fakes for assertions.
pub struct PipelineFixture {
    pub patients: Arc<FakePatientDirectory>,
    pub reports: Arc<FakeReportStore>,
    pub notifications: Arc<FakeNotificationStore>,
    pub roles: Arc<FakeRoleStore>,
}

impl PipelineFixture {
    pub fn new() -> Self {
        Self {
            patients: Arc::new(FakePatientDirectory::new()),
            reports: Arc::new(FakeReportStore::new()),
            notifications: Arc::new(FakeNotificationStore::new()),
            roles: Arc::new(FakeRoleStore::new()),
        }
    }
}

impl Default for PipelineFixture {
    fn default() -> Self {
        Self::new()
    }
}
