//! # clinsync-realtime
//!
//! The realtime pipeline for clinsync.
//!
//! This crate provides:
//! - Database change-feed listener driving all socket fan-out
//! - In-memory report snapshot cache recovering pre-update state
//! - Connection registry and room-based message routing
//! - Per-connection socket sessions with direct client events
//! - Durable notification writes for terminal report outcomes
//! - Background report processing against an external HTTP service
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use clinsync_realtime::{
//!     ChangeFeedListener, ConnectionRegistry, NotificationService,
//!     ReportSnapshotCache, spawn_cache_sweeper,
//! };
//! use clinsync_core::{SocketHub, StorageUrls};
//!
//! let hub = SocketHub::new(256);
//! let registry = Arc::new(ConnectionRegistry::new());
//! let cache = Arc::new(ReportSnapshotCache::new());
//! let notifications = Arc::new(NotificationService::new(store, roles.clone()));
//!
//! let listener = ChangeFeedListener::new(
//!     feed, cache.clone(), hub.clone(), patients, reports,
//!     notifications.clone(), StorageUrls::from_env(),
//! );
//! let handle = listener.start(shutdown.clone());
//! let sweeper = spawn_cache_sweeper(cache, sweep_interval, shutdown);
//! ```

pub mod cache;
pub mod fanout;
pub mod listener;
pub mod notify;
pub mod processor;
pub mod registry;
pub mod session;
pub mod testing;

// Re-export core types
pub use clinsync_core::*;

// Re-export pipeline types
pub use cache::{spawn_cache_sweeper, ReportSnapshotCache};
pub use listener::ChangeFeedListener;
pub use notify::NotificationService;
pub use processor::{
    spawn_report_processing, HttpReportProcessor, ProcessingJob, ProcessingOutcome,
    ReportProcessor,
};
pub use registry::ConnectionRegistry;
pub use session::SocketSession;
