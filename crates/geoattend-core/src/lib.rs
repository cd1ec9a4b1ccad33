//! GeoAttend Core Library
//!
//! This crate provides the core functionality for GeoAttend, including:
//! - Session coordination (single live session, code rotation, expiry)
//! - Geofence validation (haversine distance, inclusive radius test)
//! - Device binding registry (1:1 student/device pairing)
//! - Attendance verification pipeline (ordered check-in validation)
//! - Storage (SQLite + JSONL export)
//! - Real-time channel protocol (JSON events, broadcast hub, dispatcher)

pub mod channel;
pub mod config;
pub mod domain;
pub mod error;
pub mod geo;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::channel::{ChannelDispatcher, EventHub};
    pub use crate::config::Config;
    pub use crate::domain::attendance::AttendancePipeline;
    pub use crate::domain::session::SessionCoordinator;
    pub use crate::error::{Error, Result};
}
