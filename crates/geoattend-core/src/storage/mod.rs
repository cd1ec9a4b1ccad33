//! Storage layer - SQLite + JSONL export
//!
//! Provides database management and migrations for geoattend.
//!
//! # Architecture
//!
//! - `database`: Connection pool management and initialization
//! - `migrations`: Schema versioning and automatic migration
//! - `export`: JSONL export format for external reporting
//!
//! # Usage
//!
//! ```ignore
//! use geoattend_core::storage::Database;
//!
//! // Create an in-memory database for testing
//! let db = Database::in_memory().await?;
//! ```

pub mod database;
pub mod export;
pub mod migrations;

// Re-export commonly used types
pub use database::{default_database_path, Database, DatabaseConfig};
pub use export::{export_attendance, export_bindings, ExportResult};
pub use migrations::{migration_status, run_migrations, MigrationStatus, CURRENT_VERSION};
