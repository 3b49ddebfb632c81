//! Socket event types, wire frames, and the room-aware socket hub.
//!
//! All realtime traffic flows through [`SocketHub`], a broadcast channel of
//! [`RoomMessage`]s. Producers (the change-feed listener, socket sessions,
//! REST handlers) publish room-targeted messages; every live WebSocket
//! connection subscribes once and filters against its own room memberships
//! at delivery time. Slow receivers that fall behind see a `Lagged` error and
//! miss messages, which is acceptable for a real-time stream where freshness
//! matters more than completeness.
//!
//! ## Wire Format
//!
//! Client → server frames: `{"event":"user_login","data":{"userId":"..."}}`.
//! Server → client frames: `{"event":"new_notification","data":{...}}`.
//! Payload keys are camelCase on the wire.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::ConnectionId;
use crate::rooms::Room;

// ============================================================================
// Server event names
// ============================================================================

/// Server→client event names. These are the stable wire contract; clients
/// register listeners by these exact strings.
pub mod server_events {
    pub const LOGIN_SUCCESS: &str = "login_success";
    pub const LOGIN_ERROR: &str = "login_error";
    pub const USER_JOINED_CLINIC: &str = "user_joined_clinic";
    pub const USER_LEFT_CLINIC: &str = "user_left_clinic";

    pub const NOTIFICATION_ROOM_JOINED: &str = "notification_room_joined";
    pub const NOTIFICATION_ROOM_ERROR: &str = "notification_room_error";
    pub const NEW_NOTIFICATION: &str = "new_notification";
    pub const NOTIFICATION_READ_SUCCESS: &str = "notification_read_success";
    pub const NOTIFICATION_READ_ERROR: &str = "notification_read_error";

    pub const PATIENT_SELECTION_SUCCESS: &str = "patient_selection_success";
    pub const PATIENT_SELECTION_ERROR: &str = "patient_selection_error";
    pub const PATIENT_SELECTED: &str = "patient_selected";
    pub const PATIENT_UPDATED_NOTIFICATION: &str = "patient_updated_notification";
    pub const PATIENT_UPDATED_DETAILED: &str = "patient_updated_detailed";

    pub const REPORT_CREATED_REALTIME: &str = "report_created_realtime";
    pub const REPORT_CREATED_NOTIFICATION: &str = "report_created_notification";
    pub const REPORT_STATUS_CHANGED_REALTIME: &str = "report_status_changed_realtime";
    pub const REPORT_STATUS_CHANGED_DETAILED_REALTIME: &str =
        "report_status_changed_detailed_realtime";
    pub const REPORT_STATUS_CHANGED_NOTIFICATION: &str = "report_status_changed_notification";
    pub const REPORT_STATUS_CHANGED_DETAILED: &str = "report_status_changed_detailed";
    pub const REPORT_DELETED_REALTIME: &str = "report_deleted_realtime";
    pub const REPORT_DELETED_DETAILED_REALTIME: &str = "report_deleted_detailed_realtime";

    pub const NEW_MESSAGE: &str = "new_message";
    pub const NEW_PATIENT_MESSAGE: &str = "new_patient_message";
    pub const USER_TYPING: &str = "user_typing";
    pub const USER_ACTIVITY_UPDATE: &str = "user_activity_update";

    pub const MAINTENANCE_MODE_UPDATE: &str = "maintenance_mode_update";
}

// ============================================================================
// Client → server events
// ============================================================================

/// Identity announcement after connecting; binds the socket to a user and
/// clinic and joins the clinic room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLogin {
    pub user_id: Uuid,
    pub clinic_id: Uuid,
}

/// Subscribes the socket to its user's personal notification room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinNotificationRoom {
    pub user_id: Uuid,
}

/// Requests access to a patient's room. Granted to the clinic creator and to
/// admin/full_access roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectPatient {
    pub user_id: Uuid,
    pub clinic_id: Uuid,
    pub patient_id: Uuid,
}

/// Broadcast that patient data changed, raised by the editing client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientUpdated {
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub update_type: String,
    pub updated_by: Uuid,
}

/// Client-attested report creation mirror. Status/type fields stay as raw
/// strings: these events are trusted echoes of what the client already did,
/// not validated state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCreated {
    pub report_id: Uuid,
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub report_type: String,
    pub created_by: Uuid,
}

/// Client-attested status change mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStatusChanged {
    pub report_id: Uuid,
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub old_status: String,
    pub new_status: String,
    pub updated_by: Uuid,
}

/// Client-attested deletion mirror.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportDeleted {
    pub report_id: Uuid,
    pub patient_id: Uuid,
    pub clinic_id: Uuid,
    pub report_type: String,
    pub deleted_by: Uuid,
}

/// Chat message to the clinic room, and to a patient room when scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub clinic_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<Uuid>,
    pub message: String,
    pub sender_id: Uuid,
    pub sender_name: String,
}

/// Typing indicator scope: the patient room when a patient is given,
/// otherwise the clinic room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub clinic_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<Uuid>,
    pub user_id: Uuid,
}

/// Marks one notification read for its owning user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkNotificationRead {
    pub notification_id: Uuid,
    pub user_id: Uuid,
}

/// Presence/activity ping relayed to clinic peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub user_id: Uuid,
    pub clinic_id: Uuid,
    pub activity: String,
}

/// All client→server socket events.
///
/// Deserialized from `{"event": "<name>", "data": {...}}` frames. Unknown
/// event names fail deserialization and are logged and dropped by the
/// session, never propagated as connection errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    UserLogin(UserLogin),
    JoinNotificationRoom(JoinNotificationRoom),
    SelectPatient(SelectPatient),
    PatientUpdated(PatientUpdated),
    ReportCreated(ReportCreated),
    ReportStatusChanged(ReportStatusChanged),
    ReportDeleted(ReportDeleted),
    SendMessage(SendMessage),
    TypingStart(Typing),
    TypingStop(Typing),
    MarkNotificationRead(MarkNotificationRead),
    UserActivity(UserActivity),
}

impl ClientEvent {
    /// Wire name of the event, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::UserLogin(_) => "user_login",
            ClientEvent::JoinNotificationRoom(_) => "join_notification_room",
            ClientEvent::SelectPatient(_) => "select_patient",
            ClientEvent::PatientUpdated(_) => "patient_updated",
            ClientEvent::ReportCreated(_) => "report_created",
            ClientEvent::ReportStatusChanged(_) => "report_status_changed",
            ClientEvent::ReportDeleted(_) => "report_deleted",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::TypingStart(_) => "typing_start",
            ClientEvent::TypingStop(_) => "typing_stop",
            ClientEvent::MarkNotificationRead(_) => "mark_notification_read",
            ClientEvent::UserActivity(_) => "user_activity",
        }
    }
}

// ============================================================================
// Server → client frames
// ============================================================================

/// A server→client frame as written to the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl OutboundFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

// ============================================================================
// Room messages and the hub
// ============================================================================

/// Delivery scope of a [`RoomMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every connection that joined the room.
    Room(Room),
    /// Every live connection, regardless of rooms.
    Broadcast,
    /// Exactly one connection (acks and error replies).
    Connection(ConnectionId),
}

/// One room-targeted emission travelling over the hub.
#[derive(Debug, Clone)]
pub struct RoomMessage {
    pub target: Target,
    /// Connection that raised the event, excluded from delivery. Reproduces
    /// the "everyone in the room except the sender" broadcast shape.
    pub exclude: Option<ConnectionId>,
    pub event: String,
    pub payload: serde_json::Value,
}

impl RoomMessage {
    /// The frame a receiving connection writes to its socket.
    pub fn to_frame(&self) -> OutboundFrame {
        OutboundFrame::new(self.event.clone(), self.payload.clone())
    }
}

/// Broadcast-based hub distributing room-targeted messages to socket tasks.
///
/// Room membership is NOT tracked here: each subscriber filters received
/// messages against the connection registry. The hub only guarantees that
/// every live subscriber sees every message exactly once (absent lag).
#[derive(Debug, Clone)]
pub struct SocketHub {
    tx: broadcast::Sender<RoomMessage>,
}

impl SocketHub {
    /// Create a new hub with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit to every member of a room.
    pub fn to_room(&self, room: Room, event: &str, payload: serde_json::Value) {
        self.send(RoomMessage {
            target: Target::Room(room),
            exclude: None,
            event: event.to_string(),
            payload,
        });
    }

    /// Emit to every member of a room except the raising connection.
    pub fn to_room_except(
        &self,
        room: Room,
        exclude: ConnectionId,
        event: &str,
        payload: serde_json::Value,
    ) {
        self.send(RoomMessage {
            target: Target::Room(room),
            exclude: Some(exclude),
            event: event.to_string(),
            payload,
        });
    }

    /// Emit to every live connection.
    pub fn broadcast(&self, event: &str, payload: serde_json::Value) {
        self.send(RoomMessage {
            target: Target::Broadcast,
            exclude: None,
            event: event.to_string(),
            payload,
        });
    }

    /// Emit to exactly one connection.
    pub fn to_connection(&self, connection: ConnectionId, event: &str, payload: serde_json::Value) {
        self.send(RoomMessage {
            target: Target::Connection(connection),
            exclude: None,
            event: event.to_string(),
            payload,
        });
    }

    fn send(&self, message: RoomMessage) {
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            event = %message.event,
            target = ?message.target,
            subscriber_count,
            "SocketHub emit"
        );
        // No subscribers means no connected clients; dropping is fine.
        let _ = self.tx.send(message);
    }

    /// Subscribe to the message stream. Each subscriber gets its own
    /// independent view.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomMessage> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
