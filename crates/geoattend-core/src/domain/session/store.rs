//! Shared session state with single-writer locking
//!
//! Every read and mutation of the live session takes the same mutex, so
//! a check-in's "read, validate, insert" sequence can never interleave
//! with a replacement, an expiry, or another check-in for the same
//! student. Critical sections are short and the lock is never held
//! across an await point.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::session::{ActiveSession, SessionConfig, SessionSnapshot};
use crate::geo::Coordinate;
use crate::Result;

/// Immutable copy of everything one check-in attempt validates against.
///
/// Taken in a single locked read so the attempt sees one consistent
/// session state, then validated outside the lock.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    /// Session the attempt was admitted against
    pub session_id: Uuid,

    /// Generation fencing the later membership commit
    pub generation: u64,

    /// Class name, carried into the persisted record
    pub class_name: String,

    /// Code value at the moment the attempt was admitted
    pub code: String,

    /// Geofence center
    pub venue: Coordinate,

    /// Geofence radius in meters
    pub radius_meters: f64,

    /// Lock duration reported back on success
    pub lock_duration_minutes: u64,

    /// Whether this student was already in the membership set
    pub already_present: bool,
}

/// Identity of a live session instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub generation: u64,
}

/// Result of committing a validated check-in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Student added; count is the membership size afterwards
    Inserted { count: usize },
    /// Another attempt for this student won the race
    AlreadyPresent,
    /// Session was replaced or ended while the attempt was in flight
    SessionGone,
}

#[derive(Debug, Default)]
struct StoreState {
    active: Option<ActiveSession>,
    generation: u64,
}

/// Single-writer owner of the live session
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    state: Arc<Mutex<StoreState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A poisoned lock only means some other thread panicked while
        // holding it; the session state itself is still coherent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace any live session with a fresh one.
    ///
    /// Membership starts empty regardless of what the previous session
    /// held; one class at a time.
    pub fn start(&self, config: SessionConfig) -> Result<SessionHandle> {
        config.validate()?;

        let mut state = self.lock();
        state.generation += 1;
        let session = ActiveSession::new(config, state.generation);
        let handle = SessionHandle {
            session_id: session.id,
            generation: session.generation,
        };
        state.active = Some(session);
        Ok(handle)
    }

    /// Deactivate the live session. Returns false when none was live.
    pub fn end(&self) -> bool {
        let mut state = self.lock();
        state.active.take().is_some()
    }

    /// Deactivate only the session instance the caller armed a timer for.
    ///
    /// An expiry timer for generation N must not take down the session
    /// that replaced it.
    pub fn expire(&self, generation: u64) -> bool {
        let mut state = self.lock();
        match &state.active {
            Some(session) if session.generation == generation => {
                state.active = None;
                true
            }
            _ => false,
        }
    }

    /// Replace the attendance code in place, keeping membership and
    /// expiry untouched. No-op when no session is live.
    pub fn rotate_code(&self, new_code: &str) -> bool {
        let mut state = self.lock();
        match state.active.as_mut() {
            Some(session) => {
                session.rotate_code(new_code.to_string());
                true
            }
            None => false,
        }
    }

    /// Client-facing view of the live session, if any
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.lock().active.as_ref().map(ActiveSession::snapshot)
    }

    /// Whether a session is currently live
    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    /// Whether a student is in the live membership set
    pub fn is_present(&self, student_id: &str) -> bool {
        self.lock()
            .active
            .as_ref()
            .map(|session| session.is_present(student_id))
            .unwrap_or(false)
    }

    /// Atomically copy the state a check-in attempt validates against.
    ///
    /// Returns None when no session is live.
    pub fn begin_attempt(&self, student_id: &str) -> Option<AttemptContext> {
        let state = self.lock();
        state.active.as_ref().map(|session| AttemptContext {
            session_id: session.id,
            generation: session.generation,
            class_name: session.config.class_name.clone(),
            code: session.config.code.clone(),
            venue: session.config.venue,
            radius_meters: session.config.radius_meters,
            lock_duration_minutes: session.config.lock_duration_minutes,
            already_present: session.is_present(student_id),
        })
    }

    /// Insert a student into the membership set of the session the
    /// attempt was validated against.
    ///
    /// The insert is add-if-absent under the lock, so of any number of
    /// concurrent attempts for one student exactly one sees `Inserted`.
    pub fn commit_attempt(&self, generation: u64, student_id: &str) -> CommitOutcome {
        let mut state = self.lock();
        match state.active.as_mut() {
            Some(session) if session.generation == generation => {
                if session.mark_present(student_id.to_string()) {
                    CommitOutcome::Inserted {
                        count: session.count(),
                    }
                } else {
                    CommitOutcome::AlreadyPresent
                }
            }
            _ => CommitOutcome::SessionGone,
        }
    }
}
