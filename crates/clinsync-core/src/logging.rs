//! Structured logging schema and field name constants for clinsync.
//!
//! All crates use these constants for consistent structured logging fields.
//! This ensures log aggregation tools (Loki, Elasticsearch) can query by
//! standardized field names across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data (fan-out deliveries) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → feed event → notification.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "realtime", "feed", "processor"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "listener", "cache", "hub", "session", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "report_update", "select_patient", "notify_outcome"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// User UUID the event concerns.
pub const USER_ID: &str = "user_id";

/// Clinic UUID the event concerns.
pub const CLINIC_ID: &str = "clinic_id";

/// Patient UUID the event concerns.
pub const PATIENT_ID: &str = "patient_id";

/// Report UUID being operated on.
pub const REPORT_ID: &str = "report_id";

/// Notification UUID being created or delivered.
pub const NOTIFICATION_ID: &str = "notification_id";

/// Socket connection UUID.
pub const CONNECTION_ID: &str = "connection_id";

// ─── Realtime fields ───────────────────────────────────────────────────────

/// Wire name of the room a message targets (e.g. "clinic_<uuid>").
pub const ROOM: &str = "room";

/// Socket event name being emitted or handled.
pub const EVENT: &str = "event";

/// Source table of a change-feed payload.
pub const TABLE: &str = "table";

/// Change kind of a feed payload ("INSERT", "UPDATE", "DELETE").
pub const ACTION: &str = "action";

/// Report status before a transition.
pub const OLD_STATUS: &str = "old_status";

/// Report status after a transition.
pub const NEW_STATUS: &str = "new_status";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of entries currently held in the report cache.
pub const CACHE_SIZE: &str = "cache_size";

/// Number of live subscribers on the socket hub.
pub const SUBSCRIBER_COUNT: &str = "subscriber_count";

/// Number of notification rows written by a fan-out.
pub const NOTIFIED_COUNT: &str = "notified_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
