//! REST handlers, grouped by resource.

pub mod admin;
pub mod notifications;
pub mod reports;
