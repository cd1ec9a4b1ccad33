//! Domain logic for attendance verification
//!
//! # Architecture
//!
//! - `session`: the single live session, its store, and the coordinator
//! - `binding`: 1:1 student/device pairing backed by the database
//! - `attendance`: check-in records and the ordered verification pipeline
//! - `tickets`: support ticket intake (thin CRUD)

pub mod attendance;
pub mod binding;
pub mod session;
pub mod tickets;
