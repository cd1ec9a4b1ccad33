//! Device binding domain module
//!
//! Enforces a 1:1 pairing between a student identity and a device
//! identifier: the first successful check-in pairs them, and neither
//! side can be re-paired afterwards. The database's unique indexes on
//! both columns are the correctness authority; the registry's lookups
//! are a fast path in front of them.

pub mod registry;

// Re-export main types
pub use registry::{BindingOutcome, DeviceBinding, DeviceBindingRegistry};
