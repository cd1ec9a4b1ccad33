//! Attendance persistence
//!
//! Handles all database interactions for attendance records. The
//! pipeline talks to storage through the `AttendanceStore` trait so
//! tests can substitute a failing or counting double.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::record::{AttendanceRecord, AttendanceStatus};
use crate::error::{Error, Result};
use crate::geo::Coordinate;

/// Storage seam the verification pipeline writes through
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Persist one accepted check-in.
    ///
    /// Must be idempotent per `(session_id, student_id)`: a retry that
    /// races an earlier successful write is a success, not a duplicate.
    async fn save(&self, record: &AttendanceRecord) -> Result<()>;
}

/// Repository for attendance database operations
#[derive(Debug, Clone)]
pub struct AttendanceRepository {
    pool: SqlitePool,
}

impl AttendanceRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List records, most recent check-in first
    pub async fn list(&self, limit: Option<i64>) -> Result<Vec<AttendanceRecord>> {
        let limit = limit.unwrap_or(i64::MAX);

        let rows: Vec<AttendanceRow> = sqlx::query_as(
            r#"
            SELECT id, student_name, student_id, class_name, lat, lon,
                   status, session_id, check_in_time
            FROM attendance_logs
            ORDER BY check_in_time DESC, id
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(AttendanceRow::into_record).collect()
    }

    /// Get a record by ID
    pub async fn get(&self, id: Uuid) -> Result<Option<AttendanceRecord>> {
        let row: Option<AttendanceRow> = sqlx::query_as(
            r#"
            SELECT id, student_name, student_id, class_name, lat, lon,
                   status, session_id, check_in_time
            FROM attendance_logs
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(AttendanceRow::into_record).transpose()
    }

    /// Count all records
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM attendance_logs")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;
        Ok(count)
    }

    /// Delete a record by ID. Returns false when no row matched.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM attendance_logs WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all records. Returns the number removed.
    pub async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM attendance_logs")
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AttendanceStore for AttendanceRepository {
    async fn save(&self, record: &AttendanceRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance_logs (
                id, student_name, student_id, class_name,
                lat, lon, status, session_id, check_in_time
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.student_name)
        .bind(&record.student_id)
        .bind(&record.class_name)
        .bind(record.location.lat)
        .bind(record.location.lon)
        .bind(record.status.as_str())
        .bind(record.session_id.to_string())
        .bind(record.check_in_time)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // A retry after a write that actually landed hits the
            // (session_id, student_id) unique index; that is success
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(
                    student_id = %record.student_id,
                    session_id = %record.session_id,
                    "Record already persisted, treating insert as idempotent success"
                );
                Ok(())
            }
            Err(e) => Err(Error::DatabaseError(e)),
        }
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

/// Database row shape; converted fallibly into the domain record
#[derive(Debug, sqlx::FromRow)]
struct AttendanceRow {
    id: String,
    student_name: String,
    student_id: String,
    class_name: String,
    lat: f64,
    lon: f64,
    status: String,
    session_id: String,
    check_in_time: DateTime<Utc>,
}

impl AttendanceRow {
    fn into_record(self) -> Result<AttendanceRecord> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Parse(format!("Invalid record id '{}': {}", self.id, e)))?;
        let session_id = Uuid::parse_str(&self.session_id).map_err(|e| {
            Error::Parse(format!("Invalid session id '{}': {}", self.session_id, e))
        })?;
        let status = AttendanceStatus::from_str(&self.status)
            .ok_or_else(|| Error::Parse(format!("Unknown attendance status '{}'", self.status)))?;

        Ok(AttendanceRecord {
            id,
            student_name: self.student_name,
            student_id: self.student_id,
            class_name: self.class_name,
            location: Coordinate::new(self.lat, self.lon),
            status,
            session_id,
            check_in_time: self.check_in_time,
        })
    }
}
