//! Attendance record entity
//!
//! One record per accepted check-in. Records are append-only: they are
//! written exactly once by the pipeline and only ever removed by an
//! administrative delete.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;

/// How a check-in reached the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Checked in live against the active session
    Present,
    /// Buffered on the client while offline, replayed after reconnect
    SyncedOffline,
}

impl AttendanceStatus {
    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::SyncedOffline => "synced_offline",
        }
    }

    /// Parse the database representation
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "present" => Some(Self::Present),
            "synced_offline" => Some(Self::SyncedOffline),
            _ => None,
        }
    }

    /// Human-readable label shown to clients and in exports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::SyncedOffline => "Synced (Offline)",
        }
    }
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A single accepted check-in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    /// Unique record identifier
    pub id: Uuid,

    /// Student's display name as submitted
    pub student_name: String,

    /// Student identifier
    pub student_id: String,

    /// Class the session was started for
    pub class_name: String,

    /// Where the student checked in from
    pub location: Coordinate,

    /// Live or offline-synced
    pub status: AttendanceStatus,

    /// Session that accepted the check-in; scopes the uniqueness of
    /// one record per student per session
    pub session_id: Uuid,

    /// When the check-in happened. For offline replays this is the
    /// client's buffered timestamp, not the arrival time.
    pub check_in_time: DateTime<Utc>,
}

impl AttendanceRecord {
    /// Client-facing summary broadcast alongside count updates
    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            student_name: self.student_name.clone(),
            student_id: self.student_id.clone(),
            class_name: self.class_name.clone(),
            check_in_time: self.check_in_time,
            status: self.status.label().to_string(),
        }
    }
}

/// The slice of a record broadcast to channel subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub student_name: String,
    pub student_id: String,
    pub class_name: String,
    pub check_in_time: DateTime<Utc>,
    pub status: String,
}
