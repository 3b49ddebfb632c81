//! Centralized default constants for the clinsync system.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates should reference these constants instead of defining their own
//! magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// REPORT CACHE
// =============================================================================

/// Maximum age of a cached report snapshot before it is purged (24 hours).
/// Entries older than this are treated as absent even before the sweeper runs.
pub const MAX_CACHE_AGE_SECS: i64 = 24 * 60 * 60;

/// Interval between background cache sweeps (1 hour).
pub const CACHE_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

// =============================================================================
// CHANGE FEED
// =============================================================================

/// Fixed delay before re-subscribing after a feed channel error (5 seconds).
pub const FEED_RETRY_DELAY_SECS: u64 = 5;

/// Table carrying report rows, as named in change-feed payloads.
pub const REPORT_TABLE: &str = "report";

/// Table carrying notification rows, as named in change-feed payloads.
pub const NOTIFICATION_TABLE: &str = "notification";

/// Table carrying application settings, as named in change-feed payloads.
pub const APP_SETTING_TABLE: &str = "app_setting";

/// Settings key whose updates are broadcast to every connected client.
pub const MAINTENANCE_MODE_KEY: &str = "maintenance_mode";

// =============================================================================
// SOCKET HUB
// =============================================================================

/// Broadcast channel capacity for the socket hub. Slow consumers that fall
/// more than this many messages behind see a Lagged error and skip ahead.
pub const HUB_CAPACITY: usize = 256;

/// Interval between WebSocket keepalive pings.
pub const WS_PING_INTERVAL_SECS: u64 = 30;

// =============================================================================
// REPORT PROCESSING
// =============================================================================

/// Timeout for a full report processing request (10 minutes).
pub const PROCESSING_TIMEOUT_SECS: u64 = 600;

/// Timeout for a processing-service availability probe.
pub const PROCESSING_STATUS_TIMEOUT_SECS: u64 = 5;

// =============================================================================
// OBJECT STORAGE
// =============================================================================

/// Bucket holding report images and generated artifacts.
pub const REPORTS_BUCKET: &str = "reports";

/// Filename of the original uploaded image within a report's storage prefix.
pub const REPORT_ORIGINAL_IMAGE: &str = "original.png";

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 5000;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum connections in the PostgreSQL pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default connection acquire timeout in seconds.
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 30;
