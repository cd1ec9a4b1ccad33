//! Wire protocol for the real-time channel
//!
//! Events travel as tagged JSON envelopes: `{"event": "...", "data": {...}}`
//! with snake_case event names and camelCase payload fields. Unknown
//! event names and malformed payloads fail decoding without panicking;
//! the dispatcher turns those failures into an `error` reply.

use serde::{Deserialize, Serialize};

use crate::domain::attendance::{CheckInAttempt, RecordSummary};
use crate::domain::session::SessionSnapshot;
use crate::geo::Coordinate;

/// Parameters for starting a session over the wire.
///
/// Radius and lock duration are optional; the dispatcher fills in the
/// configured defaults when a client leaves them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionPayload {
    pub class_name: String,
    pub code: String,
    pub venue: Coordinate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius_meters: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_duration_minutes: Option<u64>,
}

/// Events a client sends to the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Instructor opens (or replaces) the check-in window
    StartSession(StartSessionPayload),
    /// Instructor rotates the attendance code
    RotateCode {
        #[serde(rename = "newCode")]
        new_code: String,
    },
    /// Instructor closes the check-in window
    EndSession,
    /// Reconnecting client asks for the live session state
    RequestCurrentState,
    /// Attendee submits a check-in attempt
    SubmitAttempt(CheckInAttempt),
}

/// Events the core sends to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Outcome of one check-in attempt, sent only to the submitter
    AttemptResult {
        status: String,
        message: String,
        #[serde(rename = "studentId")]
        student_id: String,
        #[serde(rename = "lockDurationMinutes", skip_serializing_if = "Option::is_none")]
        lock_duration_minutes: Option<u64>,
    },
    /// Updated head count, broadcast to everyone
    StatsUpdate {
        count: usize,
        #[serde(rename = "newRecord", skip_serializing_if = "Option::is_none")]
        new_record: Option<RecordSummary>,
    },
    /// Reply to a state request; `active: false` means no live session
    StateRestored(StateRestoredPayload),
    /// Session closed, by the instructor or by the expiry timer
    SessionExpired { message: String },
    /// Malformed or undeliverable client event
    Error { message: String },
}

/// Reply body for a state request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRestoredPayload {
    pub active: bool,
    #[serde(flatten)]
    pub snapshot: Option<StateSnapshot>,
}

/// Wire form of a live session snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub class_name: String,
    pub code: String,
    pub count: usize,
    pub radius_meters: f64,
    pub lock_duration_minutes: u64,
}

impl From<SessionSnapshot> for StateSnapshot {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            class_name: snapshot.class_name,
            code: snapshot.code,
            count: snapshot.count,
            radius_meters: snapshot.radius_meters,
            lock_duration_minutes: snapshot.lock_duration_minutes,
        }
    }
}

impl ServerEvent {
    /// Success reply for an accepted check-in
    pub fn attempt_success(student_id: &str, lock_duration_minutes: u64) -> Self {
        Self::AttemptResult {
            status: "success".to_string(),
            message: "Marked Present!".to_string(),
            student_id: student_id.to_string(),
            lock_duration_minutes: Some(lock_duration_minutes),
        }
    }

    /// Error reply for a rejected check-in
    pub fn attempt_error(student_id: &str, message: String) -> Self {
        Self::AttemptResult {
            status: "error".to_string(),
            message,
            student_id: student_id.to_string(),
            lock_duration_minutes: None,
        }
    }

    /// State reply when a session is live
    pub fn state_restored(snapshot: SessionSnapshot) -> Self {
        Self::StateRestored(StateRestoredPayload {
            active: true,
            snapshot: Some(snapshot.into()),
        })
    }

    /// State reply when no session is live
    pub fn state_idle() -> Self {
        Self::StateRestored(StateRestoredPayload {
            active: false,
            snapshot: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_session_decodes_wire_names() {
        let json = r#"{
            "event": "start_session",
            "data": {
                "className": "CS101",
                "code": "0458",
                "venue": {"lat": 52.52, "lon": 13.405},
                "radiusMeters": 100.0,
                "lockDurationMinutes": 120
            }
        }"#;

        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::StartSession(payload) => {
                assert_eq!(payload.class_name, "CS101");
                assert_eq!(payload.code, "0458");
                assert_eq!(payload.radius_meters, Some(100.0));
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_start_session_optional_fields_default() {
        let json = r#"{
            "event": "start_session",
            "data": {
                "className": "CS101",
                "code": "0458",
                "venue": {"lat": 0.0, "lon": 0.0}
            }
        }"#;

        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::StartSession(payload) => {
                assert_eq!(payload.radius_meters, None);
                assert_eq!(payload.lock_duration_minutes, None);
            }
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unit_events_decode_without_data() {
        let end: ClientEvent = serde_json::from_str(r#"{"event": "end_session"}"#).unwrap();
        assert_eq!(end, ClientEvent::EndSession);

        let state: ClientEvent =
            serde_json::from_str(r#"{"event": "request_current_state"}"#).unwrap();
        assert_eq!(state, ClientEvent::RequestCurrentState);
    }

    #[test]
    fn test_unknown_event_fails_cleanly() {
        let result: Result<ClientEvent, _> =
            serde_json::from_str(r#"{"event": "reboot_universe"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_attempt_result_omits_lock_duration_on_error() {
        let event = ServerEvent::attempt_error("S001", "Incorrect code.".to_string());
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""status":"error""#));
        assert!(!json.contains("lockDurationMinutes"));
    }

    #[test]
    fn test_attempt_success_carries_lock_duration() {
        let event = ServerEvent::attempt_success("S001", 120);
        let json = serde_json::to_string(&event).unwrap();

        assert!(json.contains(r#""lockDurationMinutes":120"#));
        assert!(json.contains(r#""studentId":"S001""#));
    }

    #[test]
    fn test_state_restored_shapes() {
        let idle = serde_json::to_value(ServerEvent::state_idle()).unwrap();
        assert_eq!(idle["data"]["active"], false);
        assert!(idle["data"].get("className").is_none());

        let live = serde_json::to_value(ServerEvent::state_restored(SessionSnapshot {
            class_name: "CS101".to_string(),
            code: "0458".to_string(),
            count: 3,
            radius_meters: 100.0,
            lock_duration_minutes: 120,
        }))
        .unwrap();
        assert_eq!(live["data"]["active"], true);
        assert_eq!(live["data"]["className"], "CS101");
        assert_eq!(live["data"]["count"], 3);
    }
}
