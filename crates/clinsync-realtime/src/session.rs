//! Per-connection socket session: event dispatch and direct fan-out.
//!
//! One session per WebSocket connection. The session owns the connection's
//! registry lifecycle (register on connect, deregister on disconnect) and
//! dispatches every client event. Direct report/patient/message events are
//! trusted mirrors of something the client already did through REST: they
//! re-derive room fan-out from the event payload alone, without consulting
//! the snapshot cache and without writing durable notifications. Those stay
//! the change-feed listener's job.
//!
//! Handler failures answer the acting connection with a named `*_error`
//! event or a log line; they never tear down the session or the process.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use clinsync_core::events::{
    server_events, ClientEvent, JoinNotificationRoom, MarkNotificationRead, PatientUpdated,
    ReportCreated, ReportDeleted, ReportStatusChanged, SelectPatient, SendMessage, Typing,
    UserActivity, UserLogin,
};
use clinsync_core::traits::{ReportStore, RoleStore};
use clinsync_core::{ConnectionId, Room, SocketHub};

use crate::notify::NotificationService;
use crate::registry::ConnectionRegistry;

const PATIENT_ACCESS_DENIED: &str =
    "Access Denied: You do not have permission to view this patient (Requires: Owner, Admin, or Full Access)";

/// State and collaborators for one live socket connection.
pub struct SocketSession {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    hub: SocketHub,
    roles: Arc<dyn RoleStore>,
    reports: Arc<dyn ReportStore>,
    notifications: Arc<NotificationService>,
}

impl SocketSession {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        hub: SocketHub,
        roles: Arc<dyn RoleStore>,
        reports: Arc<dyn ReportStore>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            registry,
            hub,
            roles,
            reports,
            notifications,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Register the connection. Must be called once before frames are
    /// dispatched.
    pub async fn connect(&self) {
        self.registry.register(self.id).await;
        info!(
            subsystem = "realtime",
            connection_id = %self.id,
            "Socket connected"
        );
    }

    /// Parse and dispatch one text frame. Malformed or unrecognized frames
    /// are logged and dropped; the connection stays up.
    pub async fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                warn!(
                    connection_id = %self.id,
                    error = %e,
                    "Dropping malformed socket frame"
                );
            }
        }
    }

    pub async fn handle_event(&self, event: ClientEvent) {
        debug!(
            connection_id = %self.id,
            event = event.event_name(),
            "Socket event received"
        );
        match event {
            ClientEvent::UserLogin(login) => self.on_user_login(login).await,
            ClientEvent::JoinNotificationRoom(join) => self.on_join_notification_room(join).await,
            ClientEvent::SelectPatient(select) => self.on_select_patient(select).await,
            ClientEvent::PatientUpdated(update) => self.on_patient_updated(update),
            ClientEvent::ReportCreated(created) => self.on_report_created(created).await,
            ClientEvent::ReportStatusChanged(change) => self.on_report_status_changed(change).await,
            ClientEvent::ReportDeleted(deleted) => self.on_report_deleted(deleted).await,
            ClientEvent::SendMessage(message) => self.on_send_message(message),
            ClientEvent::TypingStart(typing) => self.on_typing(typing, true),
            ClientEvent::TypingStop(typing) => self.on_typing(typing, false),
            ClientEvent::MarkNotificationRead(mark) => self.on_mark_notification_read(mark).await,
            ClientEvent::UserActivity(activity) => self.on_user_activity(activity),
        }
    }

    /// Drop the connection's memberships and announce the departure to the
    /// clinic it was logged into, if any.
    pub async fn disconnect(&self) {
        let departed = self.registry.deregister(self.id).await;
        if let Some(info) = departed {
            info!(
                subsystem = "realtime",
                user_id = %info.user_id,
                clinic_id = %info.clinic_id,
                "User disconnected from clinic"
            );
            self.hub.to_room_except(
                Room::clinic(info.clinic_id),
                self.id,
                server_events::USER_LEFT_CLINIC,
                json!({
                    "userId": info.user_id,
                    "clinicId": info.clinic_id,
                    "timestamp": Utc::now(),
                }),
            );
        }
        debug!(connection_id = %self.id, "Socket disconnected");
    }

    async fn on_user_login(&self, login: UserLogin) {
        let bound = self
            .registry
            .bind_user(self.id, login.user_id, login.clinic_id)
            .await;
        let joined = self
            .registry
            .join(self.id, Room::clinic(login.clinic_id))
            .await;
        if !bound || !joined {
            warn!(
                connection_id = %self.id,
                user_id = %login.user_id,
                "Login on unregistered connection"
            );
            self.hub.to_connection(
                self.id,
                server_events::LOGIN_ERROR,
                json!({"error": "Failed to connect to clinic"}),
            );
            return;
        }

        info!(
            subsystem = "realtime",
            user_id = %login.user_id,
            clinic_id = %login.clinic_id,
            "User joined clinic"
        );

        self.hub.to_room_except(
            Room::clinic(login.clinic_id),
            self.id,
            server_events::USER_JOINED_CLINIC,
            json!({
                "userId": login.user_id,
                "clinicId": login.clinic_id,
                "timestamp": Utc::now(),
            }),
        );
        self.hub.to_connection(
            self.id,
            server_events::LOGIN_SUCCESS,
            json!({
                "message": "Successfully connected to clinic",
                "clinicId": login.clinic_id,
                "userId": login.user_id,
            }),
        );
    }

    async fn on_join_notification_room(&self, join: JoinNotificationRoom) {
        if !self.registry.join(self.id, Room::user(join.user_id)).await {
            self.hub.to_connection(
                self.id,
                server_events::NOTIFICATION_ROOM_ERROR,
                json!({"error": "Failed to join notification room"}),
            );
            return;
        }

        info!(
            subsystem = "realtime",
            user_id = %join.user_id,
            "User joined notification room"
        );
        self.hub.to_connection(
            self.id,
            server_events::NOTIFICATION_ROOM_JOINED,
            json!({
                "message": "Successfully joined notification room",
                "userId": join.user_id,
            }),
        );
    }

    async fn on_select_patient(&self, select: SelectPatient) {
        let SelectPatient {
            user_id,
            clinic_id,
            patient_id,
        } = select;

        let is_creator = match self.roles.is_clinic_creator(user_id, clinic_id).await {
            Ok(is_creator) => is_creator,
            Err(e) => {
                warn!(
                    error = %e,
                    user_id = %user_id,
                    patient_id = %patient_id,
                    "Patient selection failed"
                );
                self.hub.to_connection(
                    self.id,
                    server_events::PATIENT_SELECTION_ERROR,
                    json!({"error": "Failed to select patient"}),
                );
                return;
            }
        };
        // A failed role lookup counts as no role, same as a missing
        // membership row.
        let has_access = is_creator
            || match self.roles.role_for(user_id, clinic_id).await {
                Ok(role) => role.map(|r| r.grants_patient_access()).unwrap_or(false),
                Err(e) => {
                    warn!(
                        error = %e,
                        user_id = %user_id,
                        "Role lookup failed during patient selection"
                    );
                    false
                }
            };

        if !has_access {
            warn!(
                user_id = %user_id,
                patient_id = %patient_id,
                "Patient selection denied"
            );
            self.hub.to_connection(
                self.id,
                server_events::PATIENT_SELECTION_ERROR,
                json!({"error": PATIENT_ACCESS_DENIED}),
            );
            return;
        }

        self.registry
            .set_current_patient(self.id, Some(patient_id))
            .await;
        self.registry.join(self.id, Room::patient(patient_id)).await;
        // Clinic-wide updates must keep reaching patient viewers.
        self.registry.join(self.id, Room::clinic(clinic_id)).await;

        info!(
            subsystem = "realtime",
            user_id = %user_id,
            patient_id = %patient_id,
            "User selected patient"
        );

        self.hub.to_room_except(
            Room::patient(patient_id),
            self.id,
            server_events::PATIENT_SELECTED,
            json!({
                "userId": user_id,
                "patientId": patient_id,
                "timestamp": Utc::now(),
            }),
        );
        self.hub.to_connection(
            self.id,
            server_events::PATIENT_SELECTION_SUCCESS,
            json!({
                "message": "Successfully connected to patient",
                "patientId": patient_id,
            }),
        );
    }

    fn on_patient_updated(&self, update: PatientUpdated) {
        let payload = json!({
            "patientId": update.patient_id,
            "updateType": update.update_type,
            "updatedBy": update.updated_by,
            "timestamp": Utc::now(),
        });
        self.hub.to_room_except(
            Room::clinic(update.clinic_id),
            self.id,
            server_events::PATIENT_UPDATED_NOTIFICATION,
            payload.clone(),
        );
        self.hub.to_room_except(
            Room::patient(update.patient_id),
            self.id,
            server_events::PATIENT_UPDATED_DETAILED,
            payload,
        );
    }

    async fn on_report_created(&self, created: ReportCreated) {
        let total_reports = self.patient_report_count(created.patient_id).await;
        self.hub.to_room_except(
            Room::clinic(created.clinic_id),
            self.id,
            server_events::REPORT_CREATED_NOTIFICATION,
            json!({
                "reportId": created.report_id,
                "patientId": created.patient_id,
                "reportType": created.report_type,
                "createdBy": created.created_by,
                "totalReports": total_reports,
                "timestamp": Utc::now(),
            }),
        );
    }

    async fn on_report_status_changed(&self, change: ReportStatusChanged) {
        let total_reports = self.patient_report_count(change.patient_id).await;
        let payload = json!({
            "reportId": change.report_id,
            "patientId": change.patient_id,
            "oldStatus": change.old_status,
            "newStatus": change.new_status,
            "updatedBy": change.updated_by,
            "totalReports": total_reports,
            "timestamp": Utc::now(),
        });
        self.hub.to_room_except(
            Room::clinic(change.clinic_id),
            self.id,
            server_events::REPORT_STATUS_CHANGED_NOTIFICATION,
            payload.clone(),
        );
        self.hub.to_room_except(
            Room::patient(change.patient_id),
            self.id,
            server_events::REPORT_STATUS_CHANGED_DETAILED,
            payload,
        );
    }

    async fn on_report_deleted(&self, deleted: ReportDeleted) {
        let total_reports = self.patient_report_count(deleted.patient_id).await;
        let payload = json!({
            "reportId": deleted.report_id,
            "patientId": deleted.patient_id,
            "reportType": deleted.report_type,
            "deletedBy": deleted.deleted_by,
            "totalReports": total_reports,
            "timestamp": Utc::now(),
            "source": "socket_event",
            "message": format!(
                "The {} report was deleted by {}",
                deleted.report_type, deleted.deleted_by
            ),
        });
        self.hub.to_room_except(
            Room::clinic(deleted.clinic_id),
            self.id,
            server_events::REPORT_DELETED_REALTIME,
            payload.clone(),
        );
        self.hub.to_room_except(
            Room::patient(deleted.patient_id),
            self.id,
            server_events::REPORT_DELETED_DETAILED_REALTIME,
            payload,
        );
    }

    fn on_send_message(&self, message: SendMessage) {
        let base = json!({
            "senderId": message.sender_id,
            "senderName": message.sender_name,
            "message": message.message,
            "timestamp": Utc::now(),
        });
        self.hub.to_room_except(
            Room::clinic(message.clinic_id),
            self.id,
            server_events::NEW_MESSAGE,
            base.clone(),
        );
        if let Some(patient_id) = message.patient_id {
            let mut detailed = base;
            detailed["patientId"] = json!(patient_id);
            self.hub.to_room_except(
                Room::patient(patient_id),
                self.id,
                server_events::NEW_PATIENT_MESSAGE,
                detailed,
            );
        }
    }

    fn on_typing(&self, typing: Typing, is_typing: bool) {
        match typing.patient_id {
            Some(patient_id) => self.hub.to_room_except(
                Room::patient(patient_id),
                self.id,
                server_events::USER_TYPING,
                json!({
                    "userId": typing.user_id,
                    "patientId": patient_id,
                    "isTyping": is_typing,
                }),
            ),
            None => self.hub.to_room_except(
                Room::clinic(typing.clinic_id),
                self.id,
                server_events::USER_TYPING,
                json!({
                    "userId": typing.user_id,
                    "isTyping": is_typing,
                }),
            ),
        }
    }

    async fn on_mark_notification_read(&self, mark: MarkNotificationRead) {
        match self
            .notifications
            .mark_read(mark.notification_id, mark.user_id)
            .await
        {
            Ok(_) => {
                debug!(
                    notification_id = %mark.notification_id,
                    "Notification marked as read"
                );
                self.hub.to_connection(
                    self.id,
                    server_events::NOTIFICATION_READ_SUCCESS,
                    json!({
                        "notificationId": mark.notification_id,
                        "timestamp": Utc::now(),
                    }),
                );
            }
            Err(e) => {
                warn!(
                    error = %e,
                    notification_id = %mark.notification_id,
                    "Failed to mark notification as read"
                );
                self.hub.to_connection(
                    self.id,
                    server_events::NOTIFICATION_READ_ERROR,
                    json!({"error": "Failed to mark notification as read"}),
                );
            }
        }
    }

    fn on_user_activity(&self, activity: UserActivity) {
        self.hub.to_room_except(
            Room::clinic(activity.clinic_id),
            self.id,
            server_events::USER_ACTIVITY_UPDATE,
            json!({
                "userId": activity.user_id,
                "activity": activity.activity,
                "timestamp": Utc::now(),
            }),
        );
    }

    async fn patient_report_count(&self, patient_id: Uuid) -> i64 {
        match self.reports.count_for_patient(patient_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    error = %e,
                    patient_id = %patient_id,
                    "Failed to count patient reports"
                );
                0
            }
        }
    }
}
