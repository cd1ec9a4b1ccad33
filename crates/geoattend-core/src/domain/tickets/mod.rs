//! Support ticket intake
//!
//! Thin CRUD: tickets are appended by the intake flow and listed by the
//! CLI. No workflow beyond an open/resolved flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Ticket lifecycle flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    Resolved,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// An issue report from a student or instructor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportTicket {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub category: String,
    pub message: String,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}

impl SupportTicket {
    /// Create a fresh open ticket
    pub fn new(name: &str, email: &str, category: &str, message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: email.to_string(),
            category: category.to_string(),
            message: message.to_string(),
            status: TicketStatus::Open,
            created_at: Utc::now(),
        }
    }
}

/// Repository for support ticket database operations
#[derive(Debug, Clone)]
pub struct TicketRepository {
    pool: SqlitePool,
}

impl TicketRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a ticket
    pub async fn save(&self, ticket: &SupportTicket) -> Result<()> {
        sqlx::query(
            "INSERT INTO support_tickets (id, name, email, category, message, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(ticket.id.to_string())
        .bind(&ticket.name)
        .bind(&ticket.email)
        .bind(&ticket.category)
        .bind(&ticket.message)
        .bind(ticket.status.as_str())
        .bind(ticket.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        info!(ticket_id = %ticket.id, category = %ticket.category, "Support ticket saved");
        Ok(())
    }

    /// List tickets, newest first
    pub async fn list(&self) -> Result<Vec<SupportTicket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            "SELECT id, name, email, category, message, status, created_at \
             FROM support_tickets ORDER BY created_at DESC, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(TicketRow::into_ticket).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TicketRow {
    id: String,
    name: String,
    email: String,
    category: String,
    message: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TicketRow {
    fn into_ticket(self) -> Result<SupportTicket> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Parse(format!("Invalid ticket id '{}': {}", self.id, e)))?;
        let status = TicketStatus::from_str(&self.status)
            .ok_or_else(|| Error::Parse(format!("Unknown ticket status '{}'", self.status)))?;

        Ok(SupportTicket {
            id,
            name: self.name,
            email: self.email,
            category: self.category,
            message: self.message,
            status,
            created_at: self.created_at,
        })
    }
}
