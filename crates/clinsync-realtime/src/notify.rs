//! Durable notification service.
//!
//! Wraps the [`NotificationStore`] with the domain-level write patterns:
//! terminal report outcomes, patient assignment/update notices, and read
//! state management. The service only writes rows; delivery happens when the
//! notification INSERT comes back through the change feed and the listener
//! pushes `new_notification` to the owner's room. Writing and emitting are
//! never done by the same component.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, warn};
use uuid::Uuid;

use clinsync_core::models::{ClinicRole, NewNotification, Notification, Report, ReportStatus};
use clinsync_core::traits::{NotificationStore, RoleStore};
use clinsync_core::Result;

/// Notification kind for patient lifecycle notices.
const KIND_PATIENT: &str = "Patient";

/// Domain operations over the notification store.
///
/// Held behind an `Arc` and shared by the listener, socket sessions, and the
/// REST handlers.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    roles: Arc<dyn RoleStore>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, roles: Arc<dyn RoleStore>) -> Self {
        Self { store, roles }
    }

    /// Insert one notification row.
    pub async fn add(&self, req: NewNotification) -> Result<Notification> {
        let notification = self.store.insert(req).await?;
        debug!(
            subsystem = "notify",
            notification_id = %notification.id,
            user_id = %notification.user_id,
            kind = %notification.kind,
            "Notification stored"
        );
        Ok(notification)
    }

    /// Write the terminal-status notifications for a report: one row per
    /// target user. Targets are the patient's interested users (creator plus
    /// treating doctors); the user who drove the transition is NOT excluded.
    /// Returns the number of rows written.
    pub async fn report_outcome(
        &self,
        report: &Report,
        clinic_id: Uuid,
        patient_name: &str,
        targets: &[Uuid],
    ) -> Result<usize> {
        if targets.is_empty() {
            warn!(
                subsystem = "notify",
                report_id = %report.id,
                "No target users for report outcome notification"
            );
            return Ok(0);
        }

        let success = report.status == ReportStatus::Completed;
        let (title, kind, title_key, message_key) = if success {
            (
                "Report Ready",
                "report_completed",
                "notifications.reportReadyTitle",
                "notifications.reportReadyMessage",
            )
        } else {
            (
                "Report Failed",
                "report_failed",
                "notifications.reportFailedTitle",
                "notifications.reportFailedMessage",
            )
        };
        let message = if success {
            format!(
                "The {} report for patient {} is ready now",
                report.report_type, patient_name
            )
        } else {
            format!(
                "The {} report for patient {} failed to process",
                report.report_type, patient_name
            )
        };
        let meta = json!({
            "report_id": report.id,
            "patient_id": report.patient_id,
            "clinic_id": clinic_id,
            "status": report.status,
            "titleKey": title_key,
            "messageKey": message_key,
            "type": report.report_type,
            "patient": patient_name,
        });

        let writes = targets.iter().map(|&user_id| {
            self.store.insert(NewNotification {
                user_id,
                title: title.to_string(),
                message: message.clone(),
                kind: kind.to_string(),
                token: None,
                meta_data: Some(meta.clone()),
            })
        });
        let rows = try_join_all(writes).await?;

        info!(
            subsystem = "notify",
            report_id = %report.id,
            status = %report.status,
            notified = rows.len(),
            "Report outcome notifications written"
        );
        Ok(rows.len())
    }

    /// Notify newly assigned treating doctors about a patient. Doctor ids are
    /// validated against clinic membership and the assigning user is
    /// excluded. Returns the number of rows written.
    pub async fn notify_treating_doctors(
        &self,
        doctor_ids: &[Uuid],
        clinic_id: Uuid,
        patient_id: Uuid,
        patient_name: &str,
        clinic_name: Option<&str>,
        added_by: Uuid,
    ) -> Result<usize> {
        if doctor_ids.is_empty() {
            debug!(subsystem = "notify", "No treating doctors to notify");
            return Ok(0);
        }

        let members: HashSet<Uuid> = self
            .roles
            .members(clinic_id)
            .await?
            .into_iter()
            .map(|m| m.user_id)
            .collect();
        let valid: Vec<Uuid> = doctor_ids
            .iter()
            .copied()
            .filter(|id| members.contains(id))
            .collect();
        if valid.is_empty() {
            debug!(
                subsystem = "notify",
                clinic_id = %clinic_id,
                "No valid treating doctors found"
            );
            return Ok(0);
        }

        let clinic_label = clinic_name.unwrap_or("the clinic");
        let writes = valid
            .into_iter()
            .filter(|&doctor_id| doctor_id != added_by)
            .map(|doctor_id| {
                self.store.insert(NewNotification {
                    user_id: doctor_id,
                    title: "New Patient Assigned".to_string(),
                    message: format!(
                        "You have been assigned as treating doctor for {} in {}",
                        patient_name, clinic_label
                    ),
                    kind: KIND_PATIENT.to_string(),
                    token: None,
                    meta_data: Some(json!({
                        "patient_id": patient_id,
                        "clinic_id": clinic_id,
                        "patient_name": patient_name,
                        "added_by": added_by,
                        "action": "patient_assigned",
                        "is_treating_doctor": true,
                    })),
                })
            })
            .collect::<Vec<_>>();

        let rows = try_join_all(writes).await?;
        info!(
            subsystem = "notify",
            patient_id = %patient_id,
            notified = rows.len(),
            "Treating doctor notifications written"
        );
        Ok(rows.len())
    }

    /// Notify the clinic creator and full-access members that a patient
    /// record changed. The updating user is excluded. Returns the number of
    /// rows written.
    pub async fn notify_patient_update(
        &self,
        clinic_id: Uuid,
        patient_id: Uuid,
        patient_name: &str,
        clinic_name: Option<&str>,
        updated_by: Uuid,
        doctor_name: &str,
    ) -> Result<usize> {
        let members = self.roles.members(clinic_id).await?;
        if members.is_empty() {
            debug!(
                subsystem = "notify",
                clinic_id = %clinic_id,
                "No clinic members to notify"
            );
            return Ok(0);
        }
        let creator = self.roles.clinic_creator(clinic_id).await?;

        let targets: Vec<Uuid> = members
            .into_iter()
            .filter(|m| {
                m.user_id != updated_by
                    && (Some(m.user_id) == creator || m.role == ClinicRole::FullAccess)
            })
            .map(|m| m.user_id)
            .collect();
        if targets.is_empty() {
            debug!(
                subsystem = "notify",
                patient_id = %patient_id,
                "No users to notify about patient update"
            );
            return Ok(0);
        }

        let clinic_label = clinic_name.unwrap_or("the clinic");
        let writes = targets.into_iter().map(|user_id| {
            self.store.insert(NewNotification {
                user_id,
                title: "Patient Information Updated".to_string(),
                message: format!(
                    "Dr. {} updated information for patient {} in {}",
                    doctor_name, patient_name, clinic_label
                ),
                kind: KIND_PATIENT.to_string(),
                token: None,
                meta_data: Some(json!({
                    "patient_id": patient_id,
                    "clinic_id": clinic_id,
                    "patient_name": patient_name,
                    "updated_by": updated_by,
                    "doctor_name": doctor_name,
                    "action": "patient_updated",
                })),
            })
        });

        let rows = try_join_all(writes).await?;
        info!(
            subsystem = "notify",
            patient_id = %patient_id,
            notified = rows.len(),
            "Patient update notifications written"
        );
        Ok(rows.len())
    }

    /// All notifications for a user, newest first.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        self.store.list_for_user(user_id).await
    }

    /// Mark one notification read, scoped to its owner. Returns whether a
    /// row matched.
    pub async fn mark_read(&self, id: Uuid, user_id: Uuid) -> Result<bool> {
        self.store.mark_read(id, user_id).await
    }

    /// Mark every unread notification read for a user.
    pub async fn mark_all_read(&self, user_id: Uuid) -> Result<u64> {
        self.store.mark_all_read(user_id).await
    }

    /// Delete every notification for a user.
    pub async fn clear_all(&self, user_id: Uuid) -> Result<u64> {
        self.store.clear_for_user(user_id).await
    }

    /// Merge a status value into a notification's metadata, e.g. when an
    /// invitation is accepted or rejected. Existing metadata keys survive;
    /// a NULL metadata column becomes a fresh object.
    pub async fn set_meta_status(&self, id: Uuid, status: &str) -> Result<()> {
        let meta = self.store.fetch_meta(id).await?;

        let merged = match meta {
            Some(JsonValue::Object(mut map)) => {
                map.insert("status".to_string(), json!(status));
                JsonValue::Object(map)
            }
            _ => json!({"status": status}),
        };
        self.store.update_meta(id, merged).await
    }
}
