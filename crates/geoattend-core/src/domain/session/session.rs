//! Class session entity and related types
//!
//! A session is the unit of attendance taking: one class, one rotating
//! numeric code, one geofence, one membership set. At most one session
//! is live per process; starting a new one replaces the old wholesale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::Error;
use crate::geo::Coordinate;
use crate::Result;

/// Parameters a session is started with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Display name of the class being taught
    pub class_name: String,

    /// Current numeric attendance code, kept as a string so leading
    /// zeros survive ("0458" and "458" are different codes)
    pub code: String,

    /// Venue coordinate the geofence is centered on
    pub venue: Coordinate,

    /// Geofence radius in meters
    pub radius_meters: f64,

    /// Minutes until the session auto-closes
    pub lock_duration_minutes: u64,
}

impl SessionConfig {
    /// Reject configs that could never produce a valid session
    pub fn validate(&self) -> Result<()> {
        if self.class_name.trim().is_empty() {
            return Err(Error::InvalidInput("Class name must not be empty".to_string()));
        }
        if self.code.trim().is_empty() {
            return Err(Error::InvalidInput("Attendance code must not be empty".to_string()));
        }
        if !self.venue.is_finite() {
            return Err(Error::InvalidInput(
                "Venue coordinates must be finite numbers".to_string(),
            ));
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            return Err(Error::InvalidInput(
                "Radius must be a positive number of meters".to_string(),
            ));
        }
        if self.lock_duration_minutes == 0 {
            return Err(Error::InvalidInput(
                "Lock duration must be at least 1 minute".to_string(),
            ));
        }
        Ok(())
    }
}

/// A live attendance session with its membership set
#[derive(Debug, Clone)]
pub struct ActiveSession {
    /// Unique identifier, fresh for every start
    pub id: Uuid,

    /// Replacement counter used to fence stale expiry timers
    pub generation: u64,

    /// Parameters the session was started with
    pub config: SessionConfig,

    /// Student IDs that have checked in
    pub present: HashSet<String>,

    /// When the session was started
    pub started_at: DateTime<Utc>,
}

impl ActiveSession {
    /// Start a fresh session with an empty membership set
    pub fn new(config: SessionConfig, generation: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            config,
            present: HashSet::new(),
            started_at: Utc::now(),
        }
    }

    /// Whether a student has already checked in
    pub fn is_present(&self, student_id: &str) -> bool {
        self.present.contains(student_id)
    }

    /// Add a student to the membership set.
    ///
    /// Returns false when the student was already present.
    pub fn mark_present(&mut self, student_id: String) -> bool {
        self.present.insert(student_id)
    }

    /// Number of students checked in so far
    pub fn count(&self) -> usize {
        self.present.len()
    }

    /// Replace the attendance code without touching membership
    pub fn rotate_code(&mut self, new_code: String) {
        self.config.code = new_code;
    }

    /// Client-facing view of the session
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            class_name: self.config.class_name.clone(),
            code: self.config.code.clone(),
            count: self.count(),
            radius_meters: self.config.radius_meters,
            lock_duration_minutes: self.config.lock_duration_minutes,
        }
    }
}

/// The view of a live session sent to reconnecting clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub class_name: String,
    pub code: String,
    pub count: usize,
    pub radius_meters: f64,
    pub lock_duration_minutes: u64,
}
