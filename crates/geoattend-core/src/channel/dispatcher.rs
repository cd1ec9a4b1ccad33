//! Routes decoded client events into the coordinator and pipeline
//!
//! The dispatcher returns the direct reply for the submitting client,
//! if any; broadcasts (stats updates, expiry notices) travel through
//! the hub instead. A malformed line or a failed lifecycle command
//! becomes an `error` reply, never a panic, so one bad client cannot
//! take the coordinator down for everyone else.

use tracing::warn;

use super::protocol::{ClientEvent, ServerEvent, StartSessionPayload};
use crate::config::SessionDefaults;
use crate::domain::attendance::AttendancePipeline;
use crate::domain::session::{SessionConfig, SessionCoordinator};

/// Wires channel events to session lifecycle and check-in verification
#[derive(Clone)]
pub struct ChannelDispatcher {
    coordinator: SessionCoordinator,
    pipeline: AttendancePipeline,
    defaults: SessionDefaults,
}

impl ChannelDispatcher {
    /// Create a dispatcher over the shared coordinator and pipeline
    pub fn new(
        coordinator: SessionCoordinator,
        pipeline: AttendancePipeline,
        defaults: SessionDefaults,
    ) -> Self {
        Self {
            coordinator,
            pipeline,
            defaults,
        }
    }

    /// Handle one client event; returns the direct reply, if any
    pub async fn dispatch(&self, event: ClientEvent) -> Option<ServerEvent> {
        match event {
            ClientEvent::StartSession(payload) => {
                let config = self.session_config(payload);
                match self.coordinator.start_session(config) {
                    Ok(_) => None,
                    Err(e) => Some(ServerEvent::Error {
                        message: e.to_string(),
                    }),
                }
            }

            ClientEvent::RotateCode { new_code } => {
                match self.coordinator.rotate_code(&new_code) {
                    Ok(_) => None,
                    Err(e) => Some(ServerEvent::Error {
                        message: e.to_string(),
                    }),
                }
            }

            ClientEvent::EndSession => {
                // The session-ended notice reaches the instructor via
                // the broadcast like everyone else
                self.coordinator.end_session();
                None
            }

            ClientEvent::RequestCurrentState => Some(match self.coordinator.current_state() {
                Some(snapshot) => ServerEvent::state_restored(snapshot),
                None => ServerEvent::state_idle(),
            }),

            ClientEvent::SubmitAttempt(attempt) => {
                let student_id = attempt.student_id.clone();
                Some(match self.pipeline.submit(attempt).await {
                    Ok(accepted) => ServerEvent::attempt_success(
                        &accepted.record.student_id,
                        accepted.lock_duration_minutes,
                    ),
                    Err(e) => ServerEvent::attempt_error(&student_id, e.to_string()),
                })
            }
        }
    }

    /// Decode a JSON line, dispatch it, and encode the reply.
    ///
    /// Malformed input yields an `error` event instead of propagating.
    pub async fn dispatch_json(&self, line: &str) -> Option<String> {
        let event: ClientEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed client event");
                return Self::encode(&ServerEvent::Error {
                    message: "Malformed request.".to_string(),
                });
            }
        };

        let reply = self.dispatch(event).await?;
        Self::encode(&reply)
    }

    fn encode(event: &ServerEvent) -> Option<String> {
        match serde_json::to_string(event) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!(error = %e, "Failed to encode server event");
                None
            }
        }
    }

    fn session_config(&self, payload: StartSessionPayload) -> SessionConfig {
        SessionConfig {
            class_name: payload.class_name,
            code: payload.code,
            venue: payload.venue,
            radius_meters: payload
                .radius_meters
                .unwrap_or(self.defaults.default_radius_meters),
            lock_duration_minutes: payload
                .lock_duration_minutes
                .unwrap_or(self.defaults.default_lock_duration_minutes),
        }
    }
}
