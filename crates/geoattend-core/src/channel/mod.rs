//! Real-time channel: protocol, broadcast hub, and dispatcher
//!
//! # Architecture
//!
//! - `protocol`: tagged JSON event envelopes exchanged with clients
//! - `hub`: broadcast fan-out of server events to all subscribers
//! - `dispatcher`: routes decoded client events into the coordinator
//!   and the verification pipeline

pub mod dispatcher;
pub mod hub;
pub mod protocol;

// Re-export main types
pub use dispatcher::ChannelDispatcher;
pub use hub::{EventHub, DEFAULT_CHANNEL_CAPACITY};
pub use protocol::{ClientEvent, ServerEvent, StartSessionPayload};
