//! Change-feed listener: the database-driven half of the realtime pipeline.
//!
//! One listener owns one feed subscription covering the report, notification,
//! and app-setting tables. Every change is normalized and handed to the
//! fan-out path synchronously before the next event is polled, so per-table
//! commit order is preserved end to end. The feed's old rows are trimmed at
//! the source; the report snapshot cache fills the gaps, most importantly the
//! pre-update status (for dedup) and the identity of deleted rows.
//!
//! All handler errors are absorbed and logged. A broken subscription is
//! retried forever on a fixed delay; clients just miss updates while the
//! feed is down.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use clinsync_core::defaults::{
    APP_SETTING_TABLE, FEED_RETRY_DELAY_SECS, MAINTENANCE_MODE_KEY, NOTIFICATION_TABLE,
    REPORT_TABLE,
};
use clinsync_core::events::server_events;
use clinsync_core::models::{AppSetting, Notification, Report, ReportSnapshot};
use clinsync_core::traits::{ChangeFeed, ChangeKind, PatientDirectory, ReportStore, TableChange};
use clinsync_core::{Room, SocketHub, StorageUrls};

use crate::cache::ReportSnapshotCache;
use crate::fanout::{self, DeletionContext};
use crate::notify::NotificationService;

/// Feed DELETE payloads carry only identifying columns of the old row.
#[derive(Debug, Deserialize)]
struct DeletedReportRow {
    id: Uuid,
    #[serde(default)]
    patient_id: Option<Uuid>,
    #[serde(default)]
    report_type: Option<String>,
}

/// Consumes the database change feed and drives socket fan-out plus durable
/// notification writes.
pub struct ChangeFeedListener {
    feed: Arc<dyn ChangeFeed>,
    cache: Arc<ReportSnapshotCache>,
    hub: SocketHub,
    patients: Arc<dyn PatientDirectory>,
    reports: Arc<dyn ReportStore>,
    notifications: Arc<NotificationService>,
    storage: StorageUrls,
}

impl ChangeFeedListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        cache: Arc<ReportSnapshotCache>,
        hub: SocketHub,
        patients: Arc<dyn PatientDirectory>,
        reports: Arc<dyn ReportStore>,
        notifications: Arc<NotificationService>,
        storage: StorageUrls,
    ) -> Self {
        Self {
            feed,
            cache,
            hub,
            patients,
            reports,
            notifications,
            storage,
        }
    }

    /// Spawn the listener loop. It runs until the shutdown signal flips or
    /// the sender side is dropped.
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let listener = Arc::new(self);
        tokio::spawn(async move {
            listener.run(&mut shutdown).await;
        })
    }

    #[instrument(skip(self, shutdown))]
    async fn run(&self, shutdown: &mut watch::Receiver<bool>) {
        let tables = [REPORT_TABLE, NOTIFICATION_TABLE, APP_SETTING_TABLE];
        info!(?tables, "Change feed listener started");

        loop {
            match self.feed.subscribe(&tables).await {
                Ok(mut stream) => {
                    info!("Change feed subscription active");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => {
                                info!("Change feed listener received shutdown signal");
                                return;
                            }
                            next = stream.next_change() => match next {
                                Ok(Some(change)) => self.handle_change(change).await,
                                Ok(None) => {
                                    warn!("Change feed stream closed, resubscribing");
                                    break;
                                }
                                Err(e) => {
                                    warn!(error = %e, "Change feed stream error, resubscribing");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Change feed subscription failed");
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Change feed listener received shutdown signal");
                    return;
                }
                _ = sleep(Duration::from_secs(FEED_RETRY_DELAY_SECS)) => {}
            }
        }
    }

    /// Dispatch one normalized change. Public so tests can drive the
    /// pipeline without a feed subscription.
    pub async fn handle_change(&self, change: TableChange) {
        debug!(
            table = %change.table,
            action = %change.action,
            "Change feed event"
        );
        match (change.table.as_str(), change.action) {
            (REPORT_TABLE, ChangeKind::Insert) => self.on_report_insert(change.new).await,
            (REPORT_TABLE, ChangeKind::Update) => {
                self.on_report_update(change.new, change.old).await
            }
            (REPORT_TABLE, ChangeKind::Delete) => self.on_report_delete(change.old).await,
            (NOTIFICATION_TABLE, ChangeKind::Insert) => {
                self.on_notification_insert(change.new).await
            }
            (APP_SETTING_TABLE, ChangeKind::Update) => self.on_setting_update(change.new).await,
            (table, action) => {
                debug!(table, %action, "Ignoring change feed event")
            }
        }
    }

    async fn on_report_insert(&self, new: Option<JsonValue>) {
        let Some(new) = new else {
            warn!("Report INSERT without new row");
            return;
        };
        let report: Report = match serde_json::from_value(new) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Undecodable report row in INSERT");
                return;
            }
        };

        // Cache the bare row before any lookup so a racing delete can still
        // identify the report.
        self.cache.insert(ReportSnapshot::from_report(&report)).await;
        let cache_size = self.cache.len().await;
        debug!(report_id = %report.id, cache_size, "Report cached");

        let patient = match self.patients.patient_ref(report.patient_id).await {
            Ok(Some(patient)) => patient,
            Ok(None) => {
                warn!(
                    report_id = %report.id,
                    patient_id = %report.patient_id,
                    "Patient not found for created report"
                );
                return;
            }
            Err(e) => {
                warn!(error = %e, report_id = %report.id, "Patient lookup failed for created report");
                return;
            }
        };
        let patient_name = patient.full_name();
        let image_url = self.storage.report_image_url(
            patient.clinic_id,
            report.patient_id,
            report.report_type,
            report.id,
        );

        // Enrich the cached entry with the resolved context. The entry may
        // have been deleted meanwhile; that is fine.
        if let Some(snapshot) = self.cache.get(report.id).await {
            self.cache
                .insert(snapshot.with_patient_context(
                    patient.clinic_id,
                    patient_name.clone(),
                    image_url.clone(),
                ))
                .await;
        }

        let total_reports = self.patient_report_count(report.patient_id).await;
        let payload = fanout::created_payload(
            &report,
            patient.clinic_id,
            &patient_name,
            total_reports,
            Some(&image_url),
        );
        self.hub.to_room(
            Room::clinic(patient.clinic_id),
            server_events::REPORT_CREATED_REALTIME,
            payload.clone(),
        );
        self.hub.to_room(
            Room::patient(report.patient_id),
            server_events::REPORT_CREATED_REALTIME,
            payload,
        );
        info!(
            report_id = %report.id,
            clinic_id = %patient.clinic_id,
            "Report creation fan-out sent"
        );
    }

    async fn on_report_update(&self, new: Option<JsonValue>, old: Option<JsonValue>) {
        let Some(new) = new else {
            warn!("Report UPDATE without new row");
            return;
        };
        let report: Report = match serde_json::from_value(new) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Undecodable report row in UPDATE");
                return;
            }
        };

        // Read the cached view first: it holds the pre-update status. The
        // stored status is then brought current even if fan-out is skipped.
        let cached = self.cache.get(report.id).await;
        if cached.is_some() {
            self.cache.set_status(report.id, report.status).await;
        }

        let old_status = cached
            .as_ref()
            .map(|snapshot| snapshot.status.to_string())
            .or_else(|| {
                old.as_ref()
                    .and_then(|row| row.get("status"))
                    .and_then(|status| status.as_str())
                    .map(String::from)
            })
            .unwrap_or_else(|| "unknown".to_string());
        let new_status = report.status.to_string();

        if old_status == new_status {
            debug!(
                report_id = %report.id,
                status = %new_status,
                "Status unchanged, skipping fan-out"
            );
            return;
        }

        let patient = match self.patients.patient_ref(report.patient_id).await {
            Ok(Some(patient)) => patient,
            Ok(None) => {
                warn!(
                    report_id = %report.id,
                    patient_id = %report.patient_id,
                    "Patient not found for report update"
                );
                return;
            }
            Err(e) => {
                warn!(error = %e, report_id = %report.id, "Patient lookup failed for report update");
                return;
            }
        };
        let patient_name = patient.full_name();
        let total_reports = self.patient_report_count(report.patient_id).await;
        let image_url = self.storage.report_image_url(
            patient.clinic_id,
            report.patient_id,
            report.report_type,
            report.id,
        );

        let payload = fanout::status_changed_payload(
            &report,
            &old_status,
            &patient_name,
            total_reports,
            Some(&image_url),
        );
        self.hub.to_room(
            Room::clinic(patient.clinic_id),
            server_events::REPORT_STATUS_CHANGED_REALTIME,
            payload.clone(),
        );
        self.hub.to_room(
            Room::patient(report.patient_id),
            server_events::REPORT_STATUS_CHANGED_DETAILED_REALTIME,
            payload,
        );
        info!(
            report_id = %report.id,
            old_status = %old_status,
            new_status = %new_status,
            "Report status fan-out sent"
        );

        if report.status.is_terminal() {
            self.write_outcome_notifications(&report, patient.clinic_id, &patient_name)
                .await;
        }
    }

    /// Resolve interested users and write terminal-status notifications.
    /// Failures are logged and swallowed; fan-out already happened.
    async fn write_outcome_notifications(
        &self,
        report: &Report,
        clinic_id: Uuid,
        patient_name: &str,
    ) {
        let details = match self.patients.patient_details(report.patient_id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                warn!(
                    report_id = %report.id,
                    patient_id = %report.patient_id,
                    "Patient details missing for outcome notification"
                );
                return;
            }
            Err(e) => {
                warn!(error = %e, report_id = %report.id, "Patient details lookup failed for outcome notification");
                return;
            }
        };

        let targets = details.interested_users();
        if let Err(e) = self
            .notifications
            .report_outcome(report, clinic_id, patient_name, &targets)
            .await
        {
            warn!(error = %e, report_id = %report.id, "Failed to write report outcome notifications");
        }
    }

    async fn on_report_delete(&self, old: Option<JsonValue>) {
        let Some(old) = old else {
            warn!("Report DELETE without old row");
            return;
        };
        let row: DeletedReportRow = match serde_json::from_value(old.clone()) {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "Undecodable report row in DELETE");
                return;
            }
        };

        let cached = self.cache.remove(row.id).await;
        let (patient_id, report_type, deleted_report, patient_name, clinic_id) = match cached {
            Some(snapshot) => {
                debug!(report_id = %row.id, "Deleted report recovered from cache");
                let deleted_report = json!({
                    "id": snapshot.report_id,
                    "patient_id": snapshot.patient_id,
                    "report_type": snapshot.report_type,
                    "status": snapshot.status,
                    "report_url": snapshot.report_url,
                    "data_url": snapshot.data_url,
                });
                let name = snapshot
                    .patient_name
                    .clone()
                    .unwrap_or_else(|| "Unknown Patient".to_string());
                (
                    Some(snapshot.patient_id),
                    Some(snapshot.report_type.to_string()),
                    deleted_report,
                    Some(name),
                    snapshot.clinic_id,
                )
            }
            None => {
                debug!(report_id = %row.id, "Deleted report not cached, trying patient lookup");
                let mut name = None;
                let mut clinic = None;
                if let Some(patient_id) = row.patient_id {
                    match self.patients.patient_ref(patient_id).await {
                        Ok(Some(patient)) => {
                            name = Some(patient.full_name());
                            clinic = Some(patient.clinic_id);
                        }
                        Ok(None) => {
                            debug!(%patient_id, "Patient not found for deleted report")
                        }
                        Err(e) => {
                            debug!(error = %e, %patient_id, "Patient lookup failed for deleted report")
                        }
                    }
                }
                (row.patient_id, row.report_type.clone(), old, name, clinic)
            }
        };

        let total_reports = match patient_id {
            Some(patient_id) => Some(self.patient_report_count(patient_id).await),
            None => None,
        };

        let ctx = DeletionContext {
            report_id: row.id,
            patient_id,
            report_type,
            deleted_report,
            patient_name,
            clinic_id,
            total_reports,
        };
        let payload = fanout::deleted_payload(&ctx);

        match ctx.clinic_id {
            Some(clinic) => {
                self.hub.to_room(
                    Room::clinic(clinic),
                    server_events::REPORT_DELETED_REALTIME,
                    payload.clone(),
                );
                if let Some(patient_id) = ctx.patient_id {
                    self.hub.to_room(
                        Room::patient(patient_id),
                        server_events::REPORT_DELETED_DETAILED_REALTIME,
                        payload,
                    );
                }
                info!(
                    report_id = %ctx.report_id,
                    clinic_id = %clinic,
                    "Report deletion fan-out sent"
                );
            }
            None => {
                self.hub
                    .broadcast(server_events::REPORT_DELETED_REALTIME, payload);
                info!(report_id = %ctx.report_id, "Report deletion broadcast globally");
            }
        }
    }

    async fn on_notification_insert(&self, new: Option<JsonValue>) {
        let Some(new) = new else {
            warn!("Notification INSERT without new row");
            return;
        };
        let notification: Notification = match serde_json::from_value(new) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(error = %e, "Undecodable notification row in INSERT");
                return;
            }
        };

        self.hub.to_room(
            Room::user(notification.user_id),
            server_events::NEW_NOTIFICATION,
            fanout::new_notification_payload(&notification),
        );
        info!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            "Notification fan-out sent"
        );
    }

    async fn on_setting_update(&self, new: Option<JsonValue>) {
        let Some(new) = new else {
            warn!("App setting UPDATE without new row");
            return;
        };
        let setting: AppSetting = match serde_json::from_value(new) {
            Ok(setting) => setting,
            Err(e) => {
                warn!(error = %e, "Undecodable app setting row in UPDATE");
                return;
            }
        };
        if setting.key != MAINTENANCE_MODE_KEY {
            debug!(key = %setting.key, "Ignoring app setting update");
            return;
        }

        let enabled = setting.value == "true";
        self.hub.broadcast(
            server_events::MAINTENANCE_MODE_UPDATE,
            fanout::maintenance_payload(enabled),
        );
        info!(enabled, "Maintenance mode broadcast sent");
    }

    async fn patient_report_count(&self, patient_id: Uuid) -> i64 {
        match self.reports.count_for_patient(patient_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, %patient_id, "Failed to count patient reports");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PipelineFixture;
    use chrono::Utc;
    use clinsync_core::models::{PatientDetails, ReportStatus, ReportType};
    use tokio::sync::broadcast::error::TryRecvError;

    fn listener_with(
        fixture: &PipelineFixture,
        feed: Arc<dyn ChangeFeed>,
        hub: SocketHub,
        cache: Arc<ReportSnapshotCache>,
    ) -> ChangeFeedListener {
        let notifications = Arc::new(NotificationService::new(
            fixture.notifications.clone(),
            fixture.roles.clone(),
        ));
        ChangeFeedListener::new(
            feed,
            cache,
            hub,
            fixture.patients.clone(),
            fixture.reports.clone(),
            notifications,
            StorageUrls::new("http://localhost:54321/storage/v1/object/public"),
        )
    }

    fn report_row(report: &Report) -> JsonValue {
        serde_json::to_value(report).unwrap()
    }

    fn sample_report(patient_id: Uuid, status: ReportStatus) -> Report {
        Report {
            id: clinsync_core::new_v7(),
            patient_id,
            report_type: ReportType::Pano,
            status,
            created_at: Utc::now(),
            last_upload: None,
            report_url: None,
            data_url: None,
        }
    }

    fn details(clinic_id: Uuid, created_by: Option<Uuid>, doctors: Vec<Uuid>) -> PatientDetails {
        PatientDetails {
            clinic_id,
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            created_by,
            treating_doctor_ids: doctors,
        }
    }

    #[tokio::test]
    async fn test_insert_caches_enriches_and_fans_out() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();
        fixture
            .patients
            .add_patient(patient, details(clinic, None, vec![]))
            .await;

        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache.clone());
        let mut rx = hub.subscribe();

        let report = sample_report(patient, ReportStatus::Processing);
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Insert,
                new: Some(report_row(&report)),
                old: None,
            })
            .await;

        // Cache entry enriched with clinic context.
        let snapshot = cache.get(report.id).await.unwrap();
        assert_eq!(snapshot.clinic_id, Some(clinic));
        assert_eq!(snapshot.patient_name.as_deref(), Some("Jane Doe"));
        assert!(snapshot.image_url.as_deref().unwrap().contains("/reports/"));

        // Same payload to the clinic and patient rooms.
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.event, "report_created_realtime");
        assert_eq!(first.target, clinsync_core::Target::Room(Room::clinic(clinic)));
        assert_eq!(second.target, clinsync_core::Target::Room(Room::patient(patient)));
        assert_eq!(first.payload, second.payload);
        assert_eq!(first.payload["clinicId"], json!(clinic));
        assert_eq!(first.payload["messageKey"], "notifications.newReportCreated");
    }

    #[tokio::test]
    async fn test_insert_unknown_patient_drops_fanout_keeps_cache() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache.clone());
        let mut rx = hub.subscribe();

        let report = sample_report(Uuid::new_v4(), ReportStatus::Processing);
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Insert,
                new: Some(report_row(&report)),
                old: None,
            })
            .await;

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        // Bare entry survives for later deletion recovery.
        let snapshot = cache.get(report.id).await.unwrap();
        assert!(snapshot.clinic_id.is_none());
    }

    #[tokio::test]
    async fn test_update_uses_cached_old_status_and_dedups() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();
        fixture
            .patients
            .add_patient(patient, details(clinic, None, vec![]))
            .await;

        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache.clone());

        let mut report = sample_report(patient, ReportStatus::Processing);
        cache.insert(ReportSnapshot::from_report(&report)).await;

        let mut rx = hub.subscribe();
        report.status = ReportStatus::Completed;
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Update,
                new: Some(report_row(&report)),
                // Feed old row deliberately unhelpful; the cache must win.
                old: Some(json!({"id": report.id})),
            })
            .await;

        let clinic_msg = rx.try_recv().unwrap();
        let patient_msg = rx.try_recv().unwrap();
        assert_eq!(clinic_msg.event, "report_status_changed_realtime");
        assert_eq!(patient_msg.event, "report_status_changed_detailed_realtime");
        assert_eq!(clinic_msg.payload["oldStatus"], "processing");
        assert_eq!(clinic_msg.payload["newStatus"], "completed");
        assert!(clinic_msg.payload.get("clinicId").is_none());

        // Replay of the same terminal status: cache now says completed.
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Update,
                new: Some(report_row(&report)),
                old: None,
            })
            .await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_update_cold_cache_falls_back_to_feed_old_row() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();
        fixture
            .patients
            .add_patient(patient, details(clinic, None, vec![]))
            .await;

        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache.clone());
        let mut rx = hub.subscribe();

        let report = sample_report(patient, ReportStatus::Failed);
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Update,
                new: Some(report_row(&report)),
                old: Some(json!({"id": report.id, "status": "processing"})),
            })
            .await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.payload["oldStatus"], "processing");
        assert_eq!(msg.payload["newStatus"], "failed");
    }

    #[tokio::test]
    async fn test_update_no_old_info_uses_unknown() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();
        fixture
            .patients
            .add_patient(patient, details(clinic, None, vec![]))
            .await;

        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache.clone());
        let mut rx = hub.subscribe();

        let report = sample_report(patient, ReportStatus::Completed);
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Update,
                new: Some(report_row(&report)),
                old: None,
            })
            .await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.payload["oldStatus"], "unknown");
    }

    #[tokio::test]
    async fn test_terminal_update_writes_deduped_notifications() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let creator = Uuid::new_v4();
        let doctor = Uuid::new_v4();
        // Creator also appears as a treating doctor: must collapse to one row.
        fixture
            .patients
            .add_patient(patient, details(clinic, Some(creator), vec![creator, doctor]))
            .await;

        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache.clone());

        let report = sample_report(patient, ReportStatus::Completed);
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Update,
                new: Some(report_row(&report)),
                old: Some(json!({"id": report.id, "status": "processing"})),
            })
            .await;

        let rows = fixture.notifications.inserted().await;
        assert_eq!(rows.len(), 2);
        let users: Vec<Uuid> = rows.iter().map(|r| r.user_id).collect();
        assert!(users.contains(&creator));
        assert!(users.contains(&doctor));
        assert!(rows.iter().all(|r| r.kind == "report_completed"));
    }

    #[tokio::test]
    async fn test_non_terminal_update_writes_no_notifications() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();
        fixture
            .patients
            .add_patient(patient, details(clinic, Some(Uuid::new_v4()), vec![]))
            .await;

        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache.clone());

        let report = sample_report(patient, ReportStatus::Processing);
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Update,
                new: Some(report_row(&report)),
                old: Some(json!({"id": report.id, "status": "pending"})),
            })
            .await;

        assert!(fixture.notifications.inserted().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_with_cache_hit_uses_cached_context() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();

        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache.clone());

        let report = sample_report(patient, ReportStatus::Completed);
        cache
            .insert(ReportSnapshot::from_report(&report).with_patient_context(
                clinic,
                "Jane Doe".to_string(),
                "http://img".to_string(),
            ))
            .await;

        let mut rx = hub.subscribe();
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Delete,
                new: None,
                // Trimmed old row: id only. Context must come from the cache.
                old: Some(json!({"id": report.id})),
            })
            .await;

        let clinic_msg = rx.try_recv().unwrap();
        let patient_msg = rx.try_recv().unwrap();
        assert_eq!(clinic_msg.event, "report_deleted_realtime");
        assert_eq!(clinic_msg.target, clinsync_core::Target::Room(Room::clinic(clinic)));
        assert_eq!(patient_msg.event, "report_deleted_detailed_realtime");
        assert_eq!(clinic_msg.payload["patientName"], "Jane Doe");
        assert_eq!(clinic_msg.payload["clinicId"], json!(clinic));
        assert_eq!(clinic_msg.payload["deletedReport"]["status"], "completed");
        assert!(cache.get(report.id).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_cache_miss_unresolvable_broadcasts_minimal() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache);
        let mut rx = hub.subscribe();

        let report_id = clinsync_core::new_v7();
        listener
            .handle_change(TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Delete,
                new: None,
                old: Some(json!({
                    "id": report_id,
                    "patient_id": Uuid::new_v4(),
                    "report_type": "cbct",
                })),
            })
            .await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.target, clinsync_core::Target::Broadcast);
        assert_eq!(msg.event, "report_deleted_realtime");
        assert_eq!(msg.payload["reportId"], json!(report_id));
        assert_eq!(msg.payload["reportType"], "cbct");
        assert_eq!(msg.payload["messageKey"], "notifications.reportDeletedId");
        assert!(msg.payload.get("clinicId").is_none());
    }

    #[tokio::test]
    async fn test_notification_insert_targets_user_room() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache);
        let mut rx = hub.subscribe();

        let user = Uuid::new_v4();
        let row = json!({
            "id": clinsync_core::new_v7(),
            "user_id": user,
            "title": "Report Ready",
            "message": "The pano report for patient Jane Doe is ready now",
            "type": "report_completed",
            "is_read": false,
            "token": null,
            "meta_data": null,
            "created_at": Utc::now(),
        });
        listener
            .handle_change(TableChange {
                table: NOTIFICATION_TABLE.to_string(),
                action: ChangeKind::Insert,
                new: Some(row),
                old: None,
            })
            .await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.event, "new_notification");
        assert_eq!(msg.target, clinsync_core::Target::Room(Room::user(user)));
        assert_eq!(msg.payload["type"], "report_completed");
        assert_eq!(msg.payload["source"], "database_realtime");
    }

    #[tokio::test]
    async fn test_setting_update_filters_key_and_broadcasts() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub.clone(), cache);
        let mut rx = hub.subscribe();

        // Unrelated key: ignored.
        listener
            .handle_change(TableChange {
                table: APP_SETTING_TABLE.to_string(),
                action: ChangeKind::Update,
                new: Some(json!({"key": "theme", "value": "dark", "updated_at": Utc::now()})),
                old: None,
            })
            .await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        listener
            .handle_change(TableChange {
                table: APP_SETTING_TABLE.to_string(),
                action: ChangeKind::Update,
                new: Some(json!({
                    "key": MAINTENANCE_MODE_KEY,
                    "value": "true",
                    "updated_at": Utc::now(),
                })),
                old: None,
            })
            .await;

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.target, clinsync_core::Target::Broadcast);
        assert_eq!(msg.event, "maintenance_mode_update");
        assert_eq!(msg.payload["isEnabled"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_resubscribes_after_stream_close() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let clinic = Uuid::new_v4();
        let patient = Uuid::new_v4();
        fixture
            .patients
            .add_patient(patient, details(clinic, None, vec![]))
            .await;

        let report = sample_report(patient, ReportStatus::Processing);
        let feed = Arc::new(crate::testing::ScriptedFeed::with_scripts(vec![
            // First subscription closes immediately.
            vec![],
            // Second delivers the insert, then parks.
            vec![TableChange {
                table: REPORT_TABLE.to_string(),
                action: ChangeKind::Insert,
                new: Some(report_row(&report)),
                old: None,
            }],
        ]));
        let listener = listener_with(&fixture, feed.clone(), hub.clone(), cache);
        let mut rx = hub.subscribe();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = listener.start(shutdown_rx);

        // The insert arrives only after the retry delay and resubscription.
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.event, "report_created_realtime");
        assert_eq!(feed.subscription_count(), 2);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown_signal() {
        let fixture = PipelineFixture::new();
        let hub = SocketHub::new(32);
        let cache = Arc::new(ReportSnapshotCache::new());
        let feed: Arc<dyn ChangeFeed> = Arc::new(crate::testing::ScriptedFeed::new(vec![]));
        let listener = listener_with(&fixture, feed, hub, cache);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = listener.start(shutdown_rx);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
