//! JSONL export for attendance reporting
//!
//! Writes one JSON record per line so exports diff cleanly and stream
//! into spreadsheet or grading tooling without loading the whole file.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::Result;

/// Attendance row as it appears in an export file
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceExportRecord {
    pub id: String,
    pub student_name: String,
    pub student_id: String,
    pub class_name: String,
    pub lat: f64,
    pub lon: f64,
    pub status: String,
    pub session_id: String,
    pub check_in_time: String,
}

/// Device binding row as it appears in an export file
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BindingExportRecord {
    pub id: String,
    pub student_id: String,
    pub device_id: String,
    pub first_bound_at: String,
}

/// Result of an export operation
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// File the export was written to
    pub path: PathBuf,
    /// Number of records written
    pub records: usize,
}

/// Export all attendance rows as JSONL, oldest first
pub async fn export_attendance<W: Write>(pool: &SqlitePool, writer: &mut W) -> Result<usize> {
    let rows: Vec<AttendanceExportRecord> = sqlx::query_as(
        r#"
        SELECT id, student_name, student_id, class_name, lat, lon, status, session_id, check_in_time
        FROM attendance_logs
        ORDER BY check_in_time, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let count = rows.len();
    for record in rows {
        serde_json::to_writer(&mut *writer, &record)
            .map_err(|e| Error::Other(format!("JSON serialization error: {}", e)))?;
        writeln!(writer).map_err(Error::Io)?;
    }
    Ok(count)
}

/// Export all device bindings as JSONL
pub async fn export_bindings<W: Write>(pool: &SqlitePool, writer: &mut W) -> Result<usize> {
    let rows: Vec<BindingExportRecord> = sqlx::query_as(
        r#"
        SELECT id, student_id, device_id, first_bound_at
        FROM student_devices
        ORDER BY student_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let count = rows.len();
    for record in rows {
        serde_json::to_writer(&mut *writer, &record)
            .map_err(|e| Error::Other(format!("JSON serialization error: {}", e)))?;
        writeln!(writer).map_err(Error::Io)?;
    }
    Ok(count)
}

/// Export attendance rows to a JSONL file at the given path
pub async fn export_attendance_to_file(pool: &SqlitePool, path: &Path) -> Result<ExportResult> {
    let file = File::create(path).map_err(Error::Io)?;
    let mut writer = BufWriter::new(file);
    let records = export_attendance(pool, &mut writer).await?;
    writer.flush().map_err(Error::Io)?;
    Ok(ExportResult {
        path: path.to_path_buf(),
        records,
    })
}

/// Export device bindings to a JSONL file at the given path
pub async fn export_bindings_to_file(pool: &SqlitePool, path: &Path) -> Result<ExportResult> {
    let file = File::create(path).map_err(Error::Io)?;
    let mut writer = BufWriter::new(file);
    let records = export_bindings(pool, &mut writer).await?;
    writer.flush().map_err(Error::Io)?;
    Ok(ExportResult {
        path: path.to_path_buf(),
        records,
    })
}
