//! Device binding registry backed by the database
//!
//! `bind` is check-then-insert: the two lookups reject obvious
//! conflicts early, and the unique indexes on `student_id` and
//! `device_id` close the race when two first-binds for the same pair
//! arrive concurrently. On a unique violation the registry re-reads
//! and classifies instead of failing.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};

/// An established student/device pairing
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DeviceBinding {
    /// Unique binding identifier
    pub id: Uuid,

    /// Student side of the pairing
    pub student_id: String,

    /// Device side of the pairing
    pub device_id: String,

    /// When the pairing was first established
    pub first_bound_at: DateTime<Utc>,
}

/// Result of a bind attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingOutcome {
    /// Fresh pairing was created
    Bound,
    /// Identical pairing already existed; treated as success
    AlreadyBound,
    /// One side is already paired elsewhere. The message says which.
    Conflict { message: String },
}

impl BindingOutcome {
    /// Whether the attempt may proceed (bound now or previously)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Conflict { .. })
    }
}

fn student_conflict() -> BindingOutcome {
    BindingOutcome::Conflict {
        message: "Your student ID is already registered to a different device.".to_string(),
    }
}

fn device_conflict() -> BindingOutcome {
    BindingOutcome::Conflict {
        message: "This device is already registered to a different student ID.".to_string(),
    }
}

/// Registry for student/device pairings
#[derive(Debug, Clone)]
pub struct DeviceBindingRegistry {
    pool: SqlitePool,
}

impl DeviceBindingRegistry {
    /// Create a new registry with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Pair a student with a device, or verify an existing pairing.
    ///
    /// Idempotent for an identical pairing; returns `Conflict` when
    /// either side is already paired with someone else.
    pub async fn bind(&self, student_id: &str, device_id: &str) -> Result<BindingOutcome> {
        // Fast path: reject conflicts visible before inserting
        if let Some(existing) = self.get_by_student(student_id).await? {
            return if existing.device_id == device_id {
                Ok(BindingOutcome::AlreadyBound)
            } else {
                debug!(student_id, "Student already bound to another device");
                Ok(student_conflict())
            };
        }
        if self.get_by_device(device_id).await?.is_some() {
            debug!(device_id, "Device already bound to another student");
            return Ok(device_conflict());
        }

        let result = sqlx::query(
            "INSERT INTO student_devices (id, student_id, device_id, first_bound_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(student_id)
        .bind(device_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(student_id, device_id, "Device bound to student");
                Ok(BindingOutcome::Bound)
            }
            // Lost a first-bind race; the winning row decides the outcome
            Err(e) if is_unique_violation(&e) => self.classify_after_race(student_id, device_id).await,
            Err(e) => Err(Error::DatabaseError(e)),
        }
    }

    /// Resolve a bind attempt that hit a unique constraint
    async fn classify_after_race(
        &self,
        student_id: &str,
        device_id: &str,
    ) -> Result<BindingOutcome> {
        if let Some(existing) = self.get_by_student(student_id).await? {
            return if existing.device_id == device_id {
                Ok(BindingOutcome::AlreadyBound)
            } else {
                Ok(student_conflict())
            };
        }
        if self.get_by_device(device_id).await?.is_some() {
            return Ok(device_conflict());
        }
        // The conflicting row vanished between insert and re-read;
        // surface it as a conflict so the client simply retries
        Ok(device_conflict())
    }

    /// Look up the binding for a student, if any
    pub async fn get_by_student(&self, student_id: &str) -> Result<Option<DeviceBinding>> {
        let row: Option<BindingRow> = sqlx::query_as(
            "SELECT id, student_id, device_id, first_bound_at \
             FROM student_devices WHERE student_id = ?",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(BindingRow::into_binding).transpose()
    }

    /// Look up the binding for a device, if any
    pub async fn get_by_device(&self, device_id: &str) -> Result<Option<DeviceBinding>> {
        let row: Option<BindingRow> = sqlx::query_as(
            "SELECT id, student_id, device_id, first_bound_at \
             FROM student_devices WHERE device_id = ?",
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(BindingRow::into_binding).transpose()
    }

    /// List all bindings, oldest pairing first
    pub async fn list(&self) -> Result<Vec<DeviceBinding>> {
        let rows: Vec<BindingRow> = sqlx::query_as(
            "SELECT id, student_id, device_id, first_bound_at \
             FROM student_devices ORDER BY first_bound_at, student_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(BindingRow::into_binding).collect()
    }

    /// Administrative release of a student's binding.
    ///
    /// Not part of the check-in path; the pairing is immutable from the
    /// core's perspective. Returns false when the student had none.
    pub async fn release(&self, student_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM student_devices WHERE student_id = ?")
            .bind(student_id)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!(student_id, "Device binding released");
        }
        Ok(removed)
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[derive(Debug, sqlx::FromRow)]
struct BindingRow {
    id: String,
    student_id: String,
    device_id: String,
    first_bound_at: DateTime<Utc>,
}

impl BindingRow {
    fn into_binding(self) -> Result<DeviceBinding> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Parse(format!("Invalid binding id '{}': {}", self.id, e)))?;
        Ok(DeviceBinding {
            id,
            student_id: self.student_id,
            device_id: self.device_id,
            first_bound_at: self.first_bound_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    async fn registry() -> DeviceBindingRegistry {
        let db = Database::in_memory().await.unwrap();
        DeviceBindingRegistry::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_first_bind_creates_pairing() {
        let registry = registry().await;

        let outcome = registry.bind("S001", "device-aaa").await.unwrap();
        assert_eq!(outcome, BindingOutcome::Bound);

        let binding = registry.get_by_student("S001").await.unwrap().unwrap();
        assert_eq!(binding.device_id, "device-aaa");
    }

    #[tokio::test]
    async fn test_identical_pairing_is_idempotent() {
        let registry = registry().await;

        registry.bind("S001", "device-aaa").await.unwrap();
        let outcome = registry.bind("S001", "device-aaa").await.unwrap();

        assert_eq!(outcome, BindingOutcome::AlreadyBound);
        assert!(outcome.is_success());
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_student_bound_elsewhere_conflicts() {
        let registry = registry().await;

        registry.bind("S001", "device-aaa").await.unwrap();
        let outcome = registry.bind("S001", "device-bbb").await.unwrap();

        match outcome {
            BindingOutcome::Conflict { message } => {
                assert!(message.contains("student ID"), "unexpected message: {message}");
            }
            other => panic!("Expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_device_bound_elsewhere_conflicts() {
        let registry = registry().await;

        registry.bind("S001", "device-aaa").await.unwrap();
        let outcome = registry.bind("S002", "device-aaa").await.unwrap();

        match outcome {
            BindingOutcome::Conflict { message } => {
                assert!(message.contains("device"), "unexpected message: {message}");
            }
            other => panic!("Expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_allows_fresh_pairing() {
        let registry = registry().await;

        registry.bind("S001", "device-aaa").await.unwrap();
        assert!(registry.release("S001").await.unwrap());
        assert!(!registry.release("S001").await.unwrap());

        // The freed device can pair with a different student now
        let outcome = registry.bind("S002", "device-aaa").await.unwrap();
        assert_eq!(outcome, BindingOutcome::Bound);
    }

    #[tokio::test]
    async fn test_concurrent_first_binds_single_row() {
        let db = Database::in_memory().await.unwrap();
        let registry = DeviceBindingRegistry::new(db.pool().clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.bind("S001", "device-aaa").await.unwrap()
            }));
        }

        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(outcome.is_success(), "identical pairs must never conflict");
        }
        assert_eq!(registry.list().await.unwrap().len(), 1);
    }
}
