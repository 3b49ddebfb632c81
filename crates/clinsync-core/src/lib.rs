//! # clinsync-core
//!
//! Core types, traits, and abstractions for the clinsync backend.
//!
//! This crate provides the foundational data structures and trait definitions
//! that other clinsync crates depend on: domain models, the socket hub and
//! event wire types, room naming, and the change-feed abstraction.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod rooms;
pub mod storage;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{ClientEvent, OutboundFrame, RoomMessage, SocketHub, Target};
pub use models::*;
pub use rooms::Room;
pub use storage::StorageUrls;
pub use traits::*;

/// Generate a time-ordered UUIDv7, used for all row identifiers so primary
/// keys sort chronologically.
pub fn new_v7() -> uuid::Uuid {
    uuid::Uuid::now_v7()
}
