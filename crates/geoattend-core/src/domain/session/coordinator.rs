//! Session lifecycle coordination
//!
//! Wraps the `SessionStore` with the instructor-facing operations and
//! owns the expiry task. The task is fenced by the session generation:
//! aborting it on replace or end is an optimization, the generation
//! check in `SessionStore::expire` is what makes a stale timer harmless.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::session::{SessionConfig, SessionSnapshot};
use super::store::{SessionHandle, SessionStore};
use crate::channel::{EventHub, ServerEvent};
use crate::error::{Error, Result};

/// Orchestrates session lifecycle operations and the expiry timer
#[derive(Debug, Clone)]
pub struct SessionCoordinator {
    store: SessionStore,
    hub: EventHub,
    expiry_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Wall-clock length of one "minute" of lock duration. Production
    /// uses 60 s; timer tests shrink it to keep runs fast.
    minute: Duration,
}

impl SessionCoordinator {
    /// Create a coordinator over the given store and broadcast hub
    pub fn new(store: SessionStore, hub: EventHub) -> Self {
        Self::with_minute_duration(store, hub, Duration::from_secs(60))
    }

    /// Create a coordinator with a custom minute length.
    ///
    /// Intended for tests that need sub-second expiry.
    pub fn with_minute_duration(store: SessionStore, hub: EventHub, minute: Duration) -> Self {
        Self {
            store,
            hub,
            expiry_task: Arc::new(Mutex::new(None)),
            minute,
        }
    }

    /// The store this coordinator mutates
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Open a check-in window, replacing any live session wholesale.
    ///
    /// Prior membership is discarded; a stats update with count zero is
    /// broadcast so dashboards reset.
    pub fn start_session(&self, config: SessionConfig) -> Result<SessionHandle> {
        let lock_duration_minutes = config.lock_duration_minutes;
        let handle = self.store.start(config)?;
        self.arm_expiry(handle, lock_duration_minutes);

        info!(
            session_id = %handle.session_id,
            generation = handle.generation,
            "Session started"
        );
        self.hub.publish(ServerEvent::StatsUpdate {
            count: 0,
            new_record: None,
        });
        Ok(handle)
    }

    /// Close the check-in window. Returns false when none was open.
    pub fn end_session(&self) -> bool {
        self.cancel_expiry();
        let ended = self.store.end();
        if ended {
            info!("Session ended by instructor");
            self.hub.publish(ServerEvent::SessionExpired {
                message: "Class session has ended.".to_string(),
            });
        }
        ended
    }

    /// Replace the attendance code in place.
    ///
    /// No-op when no session is live; membership and the expiry timer
    /// are untouched either way.
    pub fn rotate_code(&self, new_code: &str) -> Result<bool> {
        if new_code.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Attendance code must not be empty".to_string(),
            ));
        }
        let rotated = self.store.rotate_code(new_code);
        if !rotated {
            warn!("Code rotation ignored: no active session");
        }
        Ok(rotated)
    }

    /// Live session state for a resynchronizing client
    pub fn current_state(&self) -> Option<SessionSnapshot> {
        self.store.snapshot()
    }

    /// Arm the expiry task for a freshly started session
    fn arm_expiry(&self, handle: SessionHandle, lock_duration_minutes: u64) {
        let minutes = u32::try_from(lock_duration_minutes).unwrap_or(u32::MAX);
        let lock_duration = self.minute.saturating_mul(minutes);

        let store = self.store.clone();
        let hub = self.hub.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(lock_duration).await;
            if store.expire(handle.generation) {
                info!(
                    session_id = %handle.session_id,
                    "Session expired after lock duration"
                );
                hub.publish(ServerEvent::SessionExpired {
                    message: "Class session has ended.".to_string(),
                });
            }
        });

        if let Some(previous) = self.set_expiry_task(Some(task)) {
            previous.abort();
        }
    }

    /// Cancel any pending expiry task
    fn cancel_expiry(&self) {
        if let Some(task) = self.set_expiry_task(None) {
            task.abort();
        }
    }

    fn set_expiry_task(&self, task: Option<JoinHandle<()>>) -> Option<JoinHandle<()>> {
        let mut slot = self
            .expiry_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;

    fn sample_config(lock_duration_minutes: u64) -> SessionConfig {
        SessionConfig {
            class_name: "CS101".to_string(),
            code: "0458".to_string(),
            venue: Coordinate::new(0.0, 0.0),
            radius_meters: 100.0,
            lock_duration_minutes,
        }
    }

    fn fast_coordinator(minute: Duration) -> SessionCoordinator {
        SessionCoordinator::with_minute_duration(SessionStore::new(), EventHub::new(16), minute)
    }

    #[tokio::test]
    async fn test_start_broadcasts_zero_count() {
        let hub = EventHub::new(16);
        let coordinator =
            SessionCoordinator::with_minute_duration(SessionStore::new(), hub.clone(), Duration::from_secs(60));
        let mut events = hub.subscribe();

        coordinator.start_session(sample_config(120)).unwrap();

        match events.recv().await.unwrap() {
            ServerEvent::StatsUpdate { count, new_record } => {
                assert_eq!(count, 0);
                assert!(new_record.is_none());
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_session_expires_after_lock_duration() {
        let coordinator = fast_coordinator(Duration::from_millis(10));
        let mut events = coordinator.hub.subscribe();

        coordinator.start_session(sample_config(2)).unwrap();
        assert!(coordinator.current_state().is_some());

        // First event is the start broadcast
        events.recv().await.unwrap();

        // Then the timer fires after ~20ms
        match tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("Expiry should broadcast")
            .unwrap()
        {
            ServerEvent::SessionExpired { message } => {
                assert!(message.contains("ended"));
            }
            other => panic!("Unexpected event: {other:?}"),
        }
        assert!(coordinator.current_state().is_none());
    }

    #[tokio::test]
    async fn test_restart_outruns_stale_timer() {
        let coordinator = fast_coordinator(Duration::from_millis(20));

        coordinator.start_session(sample_config(1)).unwrap();
        // Replace before the first timer fires; its generation is stale
        coordinator.start_session(sample_config(1000)).unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(
            coordinator.current_state().is_some(),
            "Replacement session must survive the replaced session's timer"
        );
    }

    #[tokio::test]
    async fn test_end_session_cancels_timer_and_broadcasts() {
        let coordinator = fast_coordinator(Duration::from_millis(20));
        let mut events = coordinator.hub.subscribe();

        assert!(!coordinator.end_session());

        coordinator.start_session(sample_config(1)).unwrap();
        assert!(coordinator.end_session());
        assert!(coordinator.current_state().is_none());

        events.recv().await.unwrap(); // start broadcast
        match events.recv().await.unwrap() {
            ServerEvent::SessionExpired { .. } => {}
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rotate_code_requires_active_session() {
        let coordinator = fast_coordinator(Duration::from_secs(60));

        assert!(!coordinator.rotate_code("9999").unwrap());
        assert!(coordinator.rotate_code("").is_err());

        coordinator.start_session(sample_config(120)).unwrap();
        assert!(coordinator.rotate_code("9999").unwrap());
        assert_eq!(coordinator.current_state().unwrap().code, "9999");
    }
}
