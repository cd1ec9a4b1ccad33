//! Attendance domain module
//!
//! # Architecture
//!
//! - **Entities**: `AttendanceRecord`, `AttendanceStatus`, `RecordSummary`
//! - **Repository**: `AttendanceRepository` for database operations,
//!   behind the `AttendanceStore` trait seam
//! - **Pipeline**: `AttendancePipeline`, the ordered check-in
//!   verification stages

pub mod pipeline;
pub mod record;
pub mod repository;

// Re-export main types
pub use pipeline::{AttendancePipeline, CheckInAccepted, CheckInAttempt, CheckInError};
pub use record::{AttendanceRecord, AttendanceStatus, RecordSummary};
pub use repository::{AttendanceRepository, AttendanceStore};
