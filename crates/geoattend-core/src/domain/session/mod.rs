//! Session domain module
//!
//! Owns the single live check-in session for the process.
//!
//! # Architecture
//!
//! - **Entities**: `SessionConfig`, `ActiveSession`, `SessionSnapshot`
//! - **Store**: `SessionStore`, the lock-guarded single writer over the
//!   live session, with generation fencing for expiry timers
//! - **Coordinator**: `SessionCoordinator` for lifecycle operations and
//!   the cancellable expiry task
//!
//! # Example
//!
//! ```ignore
//! use geoattend_core::domain::session::{SessionConfig, SessionCoordinator, SessionStore};
//!
//! let store = SessionStore::new();
//! let coordinator = SessionCoordinator::new(store.clone(), hub.clone());
//!
//! coordinator.start_session(config)?;
//! coordinator.rotate_code("4821")?;
//! let snapshot = coordinator.current_state();
//! coordinator.end_session();
//! ```

pub mod coordinator;
pub mod session;
pub mod store;

// Re-export main types
pub use coordinator::SessionCoordinator;
pub use session::{ActiveSession, SessionConfig, SessionSnapshot};
pub use store::{AttemptContext, CommitOutcome, SessionHandle, SessionStore};
