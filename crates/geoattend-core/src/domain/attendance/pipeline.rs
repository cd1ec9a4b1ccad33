//! Attendance verification pipeline
//!
//! One entry point, `submit`, runs a check-in attempt through ordered,
//! short-circuiting stages: payload sanity, active session, code match,
//! duplicate check, device binding, geofence. Stages that read session
//! state do so in a single locked copy, and the final membership insert
//! re-validates under the same lock, so concurrent attempts for one
//! student can never both succeed.
//!
//! Offline replays go through the same stages; the only difference is
//! that a buffered client timestamp becomes the recorded check-in time
//! and the record is marked as synced rather than live.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::record::{AttendanceRecord, AttendanceStatus};
use super::repository::AttendanceStore;
use crate::channel::{EventHub, ServerEvent};
use crate::domain::binding::{BindingOutcome, DeviceBindingRegistry};
use crate::domain::session::store::{CommitOutcome, SessionStore};
use crate::geo::{self, Coordinate};

/// Further insert attempts after a failed post-decision save
const RETRY_ATTEMPTS: u32 = 3;

/// Backoff before the first retry; doubles per attempt
const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(200);

/// One check-in attempt as submitted by an attendee client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInAttempt {
    /// Code the student entered
    pub code: String,

    /// Student's display name
    pub student_name: String,

    /// Student identifier
    pub student_id: String,

    /// Device GPS fix
    pub lat: f64,
    pub lon: f64,

    /// Stable device identifier
    pub device_id: String,

    /// When the client captured the attempt; honored only for offline
    /// replays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_timestamp: Option<DateTime<Utc>>,

    /// True when this attempt was buffered offline and replayed
    #[serde(default)]
    pub is_offline: bool,
}

/// Why a check-in attempt was rejected
#[derive(Debug, Error)]
pub enum CheckInError {
    #[error("No active class session.")]
    SessionInactive,

    #[error("Incorrect code.")]
    InvalidCode,

    #[error("Attendance already marked.")]
    AlreadyCheckedIn,

    #[error("{0}")]
    DeviceConflict(String),

    #[error("Too far! ({distance_meters}m away). Move closer.")]
    OutOfRange { distance_meters: u64 },

    #[error("Invalid check-in request.")]
    InvalidPayload,

    #[error("Could not verify attendance. Please try again.")]
    Internal(#[source] crate::Error),
}

/// A successfully verified check-in
#[derive(Debug, Clone)]
pub struct CheckInAccepted {
    /// The persisted (or retry-queued) record
    pub record: AttendanceRecord,

    /// Membership size after this check-in
    pub count: usize,

    /// Returned so the client can locally suppress repeat attempts
    pub lock_duration_minutes: u64,
}

/// Orchestrates one check-in attempt through the validation stages
#[derive(Clone)]
pub struct AttendancePipeline {
    sessions: SessionStore,
    bindings: DeviceBindingRegistry,
    records: Arc<dyn AttendanceStore>,
    hub: EventHub,
}

impl AttendancePipeline {
    /// Create a pipeline over the shared session store, binding
    /// registry, record store, and broadcast hub
    pub fn new(
        sessions: SessionStore,
        bindings: DeviceBindingRegistry,
        records: Arc<dyn AttendanceStore>,
        hub: EventHub,
    ) -> Self {
        Self {
            sessions,
            bindings,
            records,
            hub,
        }
    }

    /// Verify one check-in attempt.
    ///
    /// Validation errors go only to the submitting client; a success
    /// additionally broadcasts the updated count to all subscribers.
    pub async fn submit(&self, attempt: CheckInAttempt) -> Result<CheckInAccepted, CheckInError> {
        Self::check_payload(&attempt)?;

        // Stages 1-3 against one consistent copy of the session
        let ctx = self
            .sessions
            .begin_attempt(&attempt.student_id)
            .ok_or(CheckInError::SessionInactive)?;

        // String compare keeps leading zeros significant
        if attempt.code != ctx.code {
            return Err(CheckInError::InvalidCode);
        }
        if ctx.already_present {
            return Err(CheckInError::AlreadyCheckedIn);
        }

        match self
            .bindings
            .bind(&attempt.student_id, &attempt.device_id)
            .await
            .map_err(CheckInError::Internal)?
        {
            BindingOutcome::Conflict { message } => {
                return Err(CheckInError::DeviceConflict(message));
            }
            BindingOutcome::Bound | BindingOutcome::AlreadyBound => {}
        }

        let point = Coordinate::new(attempt.lat, attempt.lon);
        let distance = geo::distance_meters(ctx.venue, point);
        if !geo::within_radius(distance, ctx.radius_meters) {
            info!(
                student_id = %attempt.student_id,
                distance_meters = distance.round(),
                radius_meters = ctx.radius_meters,
                "Check-in rejected: outside geofence"
            );
            return Err(CheckInError::OutOfRange {
                distance_meters: distance.round() as u64,
            });
        }

        // Commit re-validates membership and generation under the lock;
        // an attempt that raced an expiry or a duplicate loses here
        let count = match self
            .sessions
            .commit_attempt(ctx.generation, &attempt.student_id)
        {
            CommitOutcome::Inserted { count } => count,
            CommitOutcome::AlreadyPresent => return Err(CheckInError::AlreadyCheckedIn),
            CommitOutcome::SessionGone => return Err(CheckInError::SessionInactive),
        };

        let record = Self::build_record(&attempt, ctx.session_id, &ctx.class_name);
        info!(
            student_id = %record.student_id,
            session_id = %record.session_id,
            count,
            status = %record.status,
            "Check-in accepted"
        );

        // The accept decision already happened under the lock; a failed
        // write is retried in the background and never surfaced
        if let Err(e) = self.records.save(&record).await {
            warn!(
                student_id = %record.student_id,
                error = %e,
                "Failed to persist attendance record, scheduling retries"
            );
            self.spawn_save_retry(record.clone());
        }

        self.hub.publish(ServerEvent::StatsUpdate {
            count,
            new_record: Some(record.summary()),
        });

        Ok(CheckInAccepted {
            record,
            count,
            lock_duration_minutes: ctx.lock_duration_minutes,
        })
    }

    /// Reject attempts no stage could make sense of
    fn check_payload(attempt: &CheckInAttempt) -> Result<(), CheckInError> {
        let blank = |s: &str| s.trim().is_empty();
        if blank(&attempt.code)
            || blank(&attempt.student_name)
            || blank(&attempt.student_id)
            || blank(&attempt.device_id)
            || !attempt.lat.is_finite()
            || !attempt.lon.is_finite()
        {
            return Err(CheckInError::InvalidPayload);
        }
        Ok(())
    }

    fn build_record(attempt: &CheckInAttempt, session_id: Uuid, class_name: &str) -> AttendanceRecord {
        // An offline replay keeps the moment the client captured the
        // attempt; everything else stamps server time
        let check_in_time = match (attempt.is_offline, attempt.client_timestamp) {
            (true, Some(ts)) => ts,
            _ => Utc::now(),
        };
        let status = if attempt.is_offline {
            AttendanceStatus::SyncedOffline
        } else {
            AttendanceStatus::Present
        };

        AttendanceRecord {
            id: Uuid::new_v4(),
            student_name: attempt.student_name.clone(),
            student_id: attempt.student_id.clone(),
            class_name: class_name.to_string(),
            location: Coordinate::new(attempt.lat, attempt.lon),
            status,
            session_id,
            check_in_time,
        }
    }

    /// Retry a failed save with doubling backoff.
    ///
    /// The insert is idempotent per (session, student), so a retry that
    /// races a write that actually landed cannot duplicate the record.
    fn spawn_save_retry(&self, record: AttendanceRecord) {
        let records = Arc::clone(&self.records);
        tokio::spawn(async move {
            let mut backoff = RETRY_INITIAL_BACKOFF;
            for attempt in 1..=RETRY_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                match records.save(&record).await {
                    Ok(()) => {
                        info!(
                            student_id = %record.student_id,
                            attempt,
                            "Attendance record persisted on retry"
                        );
                        return;
                    }
                    Err(e) => {
                        warn!(
                            student_id = %record.student_id,
                            attempt,
                            error = %e,
                            "Attendance record retry failed"
                        );
                    }
                }
                backoff *= 2;
            }
            error!(
                student_id = %record.student_id,
                session_id = %record.session_id,
                "Giving up persisting attendance record; client already saw success"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::attendance::repository::AttendanceRepository;
    use crate::domain::session::SessionConfig;
    use crate::storage::Database;
    use async_trait::async_trait;

    fn sample_attempt(student_id: &str, device_id: &str) -> CheckInAttempt {
        CheckInAttempt {
            code: "0458".to_string(),
            student_name: "Ada Lovelace".to_string(),
            student_id: student_id.to_string(),
            lat: 0.0,
            lon: 0.0,
            device_id: device_id.to_string(),
            client_timestamp: None,
            is_offline: false,
        }
    }

    fn sample_config(radius_meters: f64) -> SessionConfig {
        SessionConfig {
            class_name: "CS101".to_string(),
            code: "0458".to_string(),
            venue: Coordinate::new(0.0, 0.0),
            radius_meters,
            lock_duration_minutes: 120,
        }
    }

    struct TestRig {
        pipeline: AttendancePipeline,
        sessions: SessionStore,
        repository: AttendanceRepository,
        hub: EventHub,
    }

    async fn rig() -> TestRig {
        let db = Database::in_memory().await.unwrap();
        let sessions = SessionStore::new();
        let hub = EventHub::new(64);
        let repository = AttendanceRepository::new(db.pool().clone());
        let pipeline = AttendancePipeline::new(
            sessions.clone(),
            DeviceBindingRegistry::new(db.pool().clone()),
            Arc::new(repository.clone()),
            hub.clone(),
        );
        TestRig {
            pipeline,
            sessions,
            repository,
            hub,
        }
    }

    #[tokio::test]
    async fn test_rejects_when_no_session_active() {
        let rig = rig().await;
        let result = rig.pipeline.submit(sample_attempt("S001", "dev-1")).await;
        assert!(matches!(result, Err(CheckInError::SessionInactive)));
    }

    #[tokio::test]
    async fn test_code_comparison_is_string_equality() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        // "458" is not "0458"; leading zeros are significant
        let mut attempt = sample_attempt("S001", "dev-1");
        attempt.code = "458".to_string();

        let result = rig.pipeline.submit(attempt).await;
        assert!(matches!(result, Err(CheckInError::InvalidCode)));
    }

    #[tokio::test]
    async fn test_accepts_inside_geofence_and_persists() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        let accepted = rig
            .pipeline
            .submit(sample_attempt("S001", "dev-1"))
            .await
            .unwrap();

        assert_eq!(accepted.count, 1);
        assert_eq!(accepted.lock_duration_minutes, 120);
        assert_eq!(accepted.record.status, AttendanceStatus::Present);

        let records = rig.repository.list(None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].student_id, "S001");
    }

    #[tokio::test]
    async fn test_rejects_outside_geofence_with_rounded_distance() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        // (0, 0.0015) is ~167m from the origin
        let mut attempt = sample_attempt("S001", "dev-1");
        attempt.lon = 0.0015;

        match rig.pipeline.submit(attempt).await {
            Err(CheckInError::OutOfRange { distance_meters }) => {
                assert!((166..=168).contains(&distance_meters));
            }
            other => panic!("Expected OutOfRange, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_geofence_boundary_is_inclusive() {
        let rig = rig().await;

        let venue = Coordinate::new(0.0, 0.0);
        let point = Coordinate::new(0.0, 0.0009);
        let distance = geo::distance_meters(venue, point);

        // Radius exactly equal to the distance still accepts
        rig.sessions.start(sample_config(distance)).unwrap();
        let mut attempt = sample_attempt("S001", "dev-1");
        attempt.lon = 0.0009;

        assert!(rig.pipeline.submit(attempt).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_check_in_rejected() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        rig.pipeline
            .submit(sample_attempt("S001", "dev-1"))
            .await
            .unwrap();
        let result = rig.pipeline.submit(sample_attempt("S001", "dev-1")).await;

        assert!(matches!(result, Err(CheckInError::AlreadyCheckedIn)));
    }

    #[tokio::test]
    async fn test_device_bound_to_other_student_rejected() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        rig.pipeline
            .submit(sample_attempt("S001", "dev-1"))
            .await
            .unwrap();

        match rig.pipeline.submit(sample_attempt("S002", "dev-1")).await {
            Err(CheckInError::DeviceConflict(message)) => {
                assert!(message.contains("device"), "unexpected message: {message}");
            }
            other => panic!("Expected DeviceConflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_same_student_single_success() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pipeline = rig.pipeline.clone();
            handles.push(tokio::spawn(async move {
                pipeline.submit(sample_attempt("S001", "dev-1")).await
            }));
        }

        let mut successes = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(CheckInError::AlreadyCheckedIn) => duplicates += 1,
                Err(other) => panic!("Unexpected error: {other:?}"),
            }
        }

        assert_eq!(successes, 1, "Exactly one concurrent attempt may win");
        assert_eq!(duplicates, 11);
        assert_eq!(rig.repository.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_replay_keeps_client_timestamp() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        let buffered_at: DateTime<Utc> = "2025-03-01T09:00:00Z".parse().unwrap();
        let mut attempt = sample_attempt("S001", "dev-1");
        attempt.is_offline = true;
        attempt.client_timestamp = Some(buffered_at);

        let accepted = rig.pipeline.submit(attempt).await.unwrap();
        assert_eq!(accepted.record.status, AttendanceStatus::SyncedOffline);
        assert_eq!(accepted.record.check_in_time, buffered_at);

        let records = rig.repository.list(None).await.unwrap();
        assert_eq!(records[0].check_in_time, buffered_at);
        assert_eq!(records[0].status, AttendanceStatus::SyncedOffline);
    }

    #[tokio::test]
    async fn test_offline_without_timestamp_uses_server_time() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        let before = Utc::now();
        let mut attempt = sample_attempt("S001", "dev-1");
        attempt.is_offline = true;

        let accepted = rig.pipeline.submit(attempt).await.unwrap();
        assert!(accepted.record.check_in_time >= before);
        assert_eq!(accepted.record.status, AttendanceStatus::SyncedOffline);
    }

    #[tokio::test]
    async fn test_success_broadcasts_count_and_record() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();
        let mut events = rig.hub.subscribe();

        rig.pipeline
            .submit(sample_attempt("S001", "dev-1"))
            .await
            .unwrap();

        match events.recv().await.unwrap() {
            ServerEvent::StatsUpdate { count, new_record } => {
                assert_eq!(count, 1);
                assert_eq!(new_record.unwrap().student_id, "S001");
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_rejected() {
        let rig = rig().await;
        rig.sessions.start(sample_config(100.0)).unwrap();

        let mut nan_fix = sample_attempt("S001", "dev-1");
        nan_fix.lat = f64::NAN;
        assert!(matches!(
            rig.pipeline.submit(nan_fix).await,
            Err(CheckInError::InvalidPayload)
        ));

        let mut blank_id = sample_attempt("  ", "dev-1");
        blank_id.student_id = "  ".to_string();
        assert!(matches!(
            rig.pipeline.submit(blank_id).await,
            Err(CheckInError::InvalidPayload)
        ));
    }

    #[tokio::test]
    async fn test_expired_session_rejects_late_attempt() {
        let rig = rig().await;
        let coordinator = crate::domain::session::SessionCoordinator::with_minute_duration(
            rig.sessions.clone(),
            rig.hub.clone(),
            Duration::from_millis(10),
        );

        let mut config = sample_config(100.0);
        config.lock_duration_minutes = 1;
        coordinator.start_session(config).unwrap();

        // Let the expiry timer fire before the attempt lands
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(coordinator.current_state().is_none());

        let result = rig.pipeline.submit(sample_attempt("S001", "dev-1")).await;
        assert!(matches!(result, Err(CheckInError::SessionInactive)));
    }

    /// Store double whose saves always fail
    struct FailingStore;

    #[async_trait]
    impl AttendanceStore for FailingStore {
        async fn save(&self, _record: &AttendanceRecord) -> crate::Result<()> {
            Err(crate::Error::Other("disk on fire".to_string()))
        }
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_downgrade_success() {
        let db = Database::in_memory().await.unwrap();
        let sessions = SessionStore::new();
        sessions.start(sample_config(100.0)).unwrap();

        let pipeline = AttendancePipeline::new(
            sessions,
            DeviceBindingRegistry::new(db.pool().clone()),
            Arc::new(FailingStore),
            EventHub::new(16),
        );

        // The accept decision stands even though every save fails
        let accepted = pipeline.submit(sample_attempt("S001", "dev-1")).await.unwrap();
        assert_eq!(accepted.count, 1);
    }
}
