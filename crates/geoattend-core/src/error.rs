//! Error types for GeoAttend

use thiserror::Error;

/// Result type alias using GeoAttend's Error
pub type Result<T> = std::result::Result<T, Error>;

/// GeoAttend error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Entity errors (E001-E099)
    #[error("Attendance record '{0}' not found. Run `geoattend records list` to see recent records.")]
    RecordNotFound(String),

    #[error("No device binding for student '{0}'. Run `geoattend devices list` to see all bindings.")]
    BindingNotFound(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Stored data is corrupt: {0}")]
    Parse(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
