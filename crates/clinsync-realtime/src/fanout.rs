//! Wire payload construction for database-driven fan-out events.
//!
//! The listener resolves context (patient name, clinic, report counts, image
//! URLs) and these builders shape the JSON that goes over the socket. Key
//! names are a client contract: top-level keys are camelCase, the embedded
//! `report` object mirrors row column names, and `meta_data`/i18n keys ride
//! along so clients can re-render localized text. Builders are pure; nothing
//! here touches the database or the hub.

use chrono::Utc;
use serde_json::{json, Map, Value as JsonValue};
use uuid::Uuid;

use clinsync_core::models::{Notification, Report};

/// The embedded `report` object carried by created/status-changed payloads.
fn report_body(report: &Report, image_url: Option<&str>) -> JsonValue {
    json!({
        "id": report.id,
        "created_at": report.created_at,
        "report_type": report.report_type,
        "patient_id": report.patient_id,
        "status": report.status,
        "report_url": report.report_url,
        "data_url": report.data_url,
        "image_url": image_url,
    })
}

/// Payload for `report_status_changed_realtime` and its detailed twin. The
/// same body goes to the clinic room and the patient room.
pub fn status_changed_payload(
    report: &Report,
    old_status: &str,
    patient_name: &str,
    total_reports: i64,
    image_url: Option<&str>,
) -> JsonValue {
    json!({
        "reportId": report.id,
        "patientId": report.patient_id,
        "patientName": patient_name,
        "oldStatus": old_status,
        "newStatus": report.status,
        "reportType": report.report_type,
        "timestamp": Utc::now(),
        "source": "database_realtime",
        "totalReports": total_reports,
        "report": report_body(report, image_url),
    })
}

/// Payload for `report_created_realtime`, sent identically to the clinic and
/// patient rooms. Unlike the status-change payload this one carries the
/// clinic id and a human-readable message.
pub fn created_payload(
    report: &Report,
    clinic_id: Uuid,
    patient_name: &str,
    total_reports: i64,
    image_url: Option<&str>,
) -> JsonValue {
    json!({
        "reportId": report.id,
        "patientId": report.patient_id,
        "patientName": patient_name,
        "reportType": report.report_type,
        "status": report.status,
        "timestamp": Utc::now(),
        "source": "database_realtime",
        "totalReports": total_reports,
        "report": report_body(report, image_url),
        "clinicId": clinic_id,
        "message": format!(
            "A new {} report was created for patient {}",
            report.report_type, patient_name
        ),
        "messageKey": "notifications.newReportCreated",
        "meta_data": {
            "type": report.report_type,
            "patient": patient_name,
        },
    })
}

/// Everything the listener could recover about a deleted report. The feed's
/// old row is trimmed, so most fields are optional; `deleted_report` holds
/// the best surviving view of the row (cache snapshot or raw old row).
#[derive(Debug, Clone)]
pub struct DeletionContext {
    pub report_id: Uuid,
    pub patient_id: Option<Uuid>,
    /// String form so a missing type degrades to "unknown" on the wire.
    pub report_type: Option<String>,
    pub deleted_report: JsonValue,
    /// Present when the cache or a fallback lookup resolved the patient.
    pub patient_name: Option<String>,
    pub clinic_id: Option<Uuid>,
    /// Present when the patient id was known and the count query ran.
    pub total_reports: Option<i64>,
}

impl DeletionContext {
    /// Whether a clinic room can be targeted; otherwise the deletion is
    /// broadcast globally.
    pub fn clinic_scoped(&self) -> bool {
        self.clinic_id.is_some()
    }
}

/// Payload for `report_deleted_realtime` / `report_deleted_detailed_realtime`.
///
/// Two shapes share a base: when the patient was resolved the payload carries
/// name, clinic, and a localized deletion message; otherwise it degrades to
/// an id-only message. Optional keys are omitted rather than null.
pub fn deleted_payload(ctx: &DeletionContext) -> JsonValue {
    let report_type = ctx.report_type.as_deref().unwrap_or("unknown");

    let mut payload = Map::new();
    payload.insert("reportId".into(), json!(ctx.report_id));
    if let Some(patient_id) = ctx.patient_id {
        payload.insert("patientId".into(), json!(patient_id));
    }
    payload.insert("reportType".into(), json!(report_type));
    payload.insert("timestamp".into(), json!(Utc::now()));
    payload.insert("source".into(), json!("database_realtime"));
    payload.insert("deletedReport".into(), ctx.deleted_report.clone());

    match &ctx.patient_name {
        Some(patient_name) => {
            payload.insert("patientName".into(), json!(patient_name));
            if let Some(clinic_id) = ctx.clinic_id {
                payload.insert("clinicId".into(), json!(clinic_id));
            }
            payload.insert(
                "message".into(),
                json!(format!(
                    "The {} report for patient {} was deleted",
                    report_type, patient_name
                )),
            );
            payload.insert("messageKey".into(), json!("notifications.reportDeleted"));
            payload.insert(
                "meta_data".into(),
                json!({"type": report_type, "patient": patient_name}),
            );
        }
        None => {
            payload.insert(
                "message".into(),
                json!(format!("Report {} was deleted", ctx.report_id)),
            );
            payload.insert("messageKey".into(), json!("notifications.reportDeletedId"));
            payload.insert("meta_data".into(), json!({"id": ctx.report_id}));
        }
    }

    if let Some(total) = ctx.total_reports {
        payload.insert("totalReports".into(), json!(total));
    }

    JsonValue::Object(payload)
}

/// Payload for `new_notification`: the full stored row plus delivery
/// metadata. `kind` serializes back to `type` via the model.
pub fn new_notification_payload(notification: &Notification) -> JsonValue {
    json!({
        "id": notification.id,
        "user_id": notification.user_id,
        "title": notification.title,
        "message": notification.message,
        "type": notification.kind,
        "is_read": notification.is_read,
        "token": notification.token,
        "meta_data": notification.meta_data,
        "created_at": notification.created_at,
        "timestamp": Utc::now(),
        "source": "database_realtime",
    })
}

/// Payload for the global `maintenance_mode_update` broadcast. Fixed English
/// fallback text plus i18n keys, keyed off the setting value.
pub fn maintenance_payload(enabled: bool) -> JsonValue {
    json!({
        "isEnabled": enabled,
        "titleKey": "notifications.maintenanceModeTitle",
        "messageKey": if enabled {
            "notifications.maintenanceModeActive"
        } else {
            "notifications.maintenanceModeOffline"
        },
        "message": if enabled {
            "The system is currently undergoing maintenance treatment."
        } else {
            "Maintenance treatment has completed. System is online."
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clinsync_core::models::{ReportStatus, ReportType};

    fn sample_report() -> Report {
        Report {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            report_type: ReportType::Pano,
            status: ReportStatus::Completed,
            created_at: Utc::now(),
            last_upload: None,
            report_url: Some("https://store.example.com/r.pdf".into()),
            data_url: None,
        }
    }

    #[test]
    fn test_status_changed_payload_shape() {
        let report = sample_report();
        let payload = status_changed_payload(&report, "processing", "Jane Doe", 3, Some("img"));

        assert_eq!(payload["reportId"], json!(report.id));
        assert_eq!(payload["oldStatus"], "processing");
        assert_eq!(payload["newStatus"], "completed");
        assert_eq!(payload["patientName"], "Jane Doe");
        assert_eq!(payload["totalReports"], 3);
        assert_eq!(payload["source"], "database_realtime");
        assert_eq!(payload["report"]["image_url"], "img");
        assert_eq!(payload["report"]["report_type"], "pano");
        // Status-change payloads never carry the clinic id.
        assert!(payload.get("clinicId").is_none());
    }

    #[test]
    fn test_created_payload_has_clinic_and_message() {
        let report = sample_report();
        let clinic = Uuid::new_v4();
        let payload = created_payload(&report, clinic, "Jane Doe", 1, None);

        assert_eq!(payload["clinicId"], json!(clinic));
        assert_eq!(
            payload["message"],
            "A new pano report was created for patient Jane Doe"
        );
        assert_eq!(payload["messageKey"], "notifications.newReportCreated");
        assert_eq!(payload["meta_data"]["type"], "pano");
        assert_eq!(payload["meta_data"]["patient"], "Jane Doe");
        assert_eq!(payload["report"]["image_url"], JsonValue::Null);
    }

    #[test]
    fn test_deleted_payload_enriched() {
        let report_id = Uuid::new_v4();
        let patient_id = Uuid::new_v4();
        let clinic_id = Uuid::new_v4();
        let ctx = DeletionContext {
            report_id,
            patient_id: Some(patient_id),
            report_type: Some("cbct".into()),
            deleted_report: json!({"id": report_id, "status": "completed"}),
            patient_name: Some("Jane Doe".into()),
            clinic_id: Some(clinic_id),
            total_reports: Some(2),
        };

        let payload = deleted_payload(&ctx);
        assert!(ctx.clinic_scoped());
        assert_eq!(payload["patientName"], "Jane Doe");
        assert_eq!(payload["clinicId"], json!(clinic_id));
        assert_eq!(
            payload["message"],
            "The cbct report for patient Jane Doe was deleted"
        );
        assert_eq!(payload["messageKey"], "notifications.reportDeleted");
        assert_eq!(payload["meta_data"]["patient"], "Jane Doe");
        assert_eq!(payload["totalReports"], 2);
    }

    #[test]
    fn test_deleted_payload_minimal() {
        let report_id = Uuid::new_v4();
        let ctx = DeletionContext {
            report_id,
            patient_id: None,
            report_type: None,
            deleted_report: json!({"id": report_id}),
            patient_name: None,
            clinic_id: None,
            total_reports: None,
        };

        let payload = deleted_payload(&ctx);
        assert!(!ctx.clinic_scoped());
        assert_eq!(payload["reportId"], json!(report_id));
        assert_eq!(payload["reportType"], "unknown");
        assert_eq!(payload["message"], format!("Report {} was deleted", report_id));
        assert_eq!(payload["messageKey"], "notifications.reportDeletedId");
        assert_eq!(payload["meta_data"]["id"], json!(report_id));
        // Unresolvable context omits keys instead of sending nulls.
        assert!(payload.get("patientId").is_none());
        assert!(payload.get("patientName").is_none());
        assert!(payload.get("clinicId").is_none());
        assert!(payload.get("totalReports").is_none());
    }

    #[test]
    fn test_new_notification_payload_full_row() {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            title: "Report Ready".into(),
            message: "The pano report for patient Jane Doe is ready now".into(),
            kind: "report_completed".into(),
            is_read: false,
            token: None,
            meta_data: Some(json!({"titleKey": "notifications.reportReadyTitle"})),
            created_at: Utc::now(),
        };

        let payload = new_notification_payload(&notification);
        assert_eq!(payload["id"], json!(notification.id));
        assert_eq!(payload["type"], "report_completed");
        assert_eq!(payload["is_read"], false);
        assert_eq!(payload["source"], "database_realtime");
        assert_eq!(
            payload["meta_data"]["titleKey"],
            "notifications.reportReadyTitle"
        );
    }

    #[test]
    fn test_maintenance_payload_both_states() {
        let on = maintenance_payload(true);
        assert_eq!(on["isEnabled"], true);
        assert_eq!(on["messageKey"], "notifications.maintenanceModeActive");
        assert_eq!(
            on["message"],
            "The system is currently undergoing maintenance treatment."
        );

        let off = maintenance_payload(false);
        assert_eq!(off["isEnabled"], false);
        assert_eq!(off["messageKey"], "notifications.maintenanceModeOffline");
        assert_eq!(
            off["message"],
            "Maintenance treatment has completed. System is online."
        );
    }
}
