use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub mod migrations;

use crate::analysis::{Material, RepairAnalysis, Tool};
use crate::config::DatabaseConfig;

/// Largest page `list_tickets_with_analysis` will return
pub const MAX_TICKET_PAGE: usize = 1000;

/// SQLite persistence for tickets, uploads, analyses and contact messages
pub struct StorageManager {
    connection: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Analyzed,
    Failed,
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TicketStatus::Pending => write!(f, "pending"),
            TicketStatus::Analyzed => write!(f, "analyzed"),
            TicketStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TicketStatus::Pending),
            "analyzed" => Ok(TicketStatus::Analyzed),
            "failed" => Ok(TicketStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid ticket status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub description: String,
}

/// Uploaded file attached to a ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub ticket_id: i64,
    pub path: String,
    pub original_name: String,
    pub mime: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Analysis row as stored; JSON columns are decoded leniently
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAnalysis {
    pub id: i64,
    pub ticket_id: i64,
    pub materials: Vec<Material>,
    pub tools: Vec<Tool>,
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likelihood: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketWithAnalysis {
    #[serde(flatten)]
    pub ticket: Ticket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_analysis: Option<StoredAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSubmission {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

fn decode_json<T: DeserializeOwned>(raw: Option<String>, column: &str) -> Option<T> {
    let raw = raw?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to decode {} column: {}", column, e);
            None
        }
    }
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: row.get(0)?,
        created_at: timestamp(row.get(1)?),
        status: row.get::<_, String>(2)?.parse().unwrap_or(TicketStatus::Pending),
        user_email: row.get(3)?,
        description: row.get(4)?,
    })
}

impl StorageManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Initializing storage manager with database: {}", config.path.display());

        if let Some(parent) = config.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let connection = Connection::open(&config.path)?;
        connection.execute("PRAGMA foreign_keys = ON", [])?;
        migrations::run_migrations(&connection)?;

        info!("Storage manager initialized");
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    pub async fn create_ticket(&self, description: &str, user_email: Option<&str>) -> Result<i64> {
        let conn = self.connection.lock().await;

        conn.execute(
            "INSERT INTO tickets (created_at, status, user_email, description) VALUES (?1, ?2, ?3, ?4)",
            params![Utc::now().timestamp(), TicketStatus::Pending.to_string(), user_email, description],
        )?;

        let id = conn.last_insert_rowid();
        info!("Created ticket: {}", id);
        Ok(id)
    }

    pub async fn get_ticket(&self, ticket_id: i64) -> Result<Option<Ticket>> {
        let conn = self.connection.lock().await;

        let ticket = conn
            .query_row(
                "SELECT id, created_at, status, user_email, description FROM tickets WHERE id = ?1",
                params![ticket_id],
                ticket_from_row,
            )
            .optional()?;

        Ok(ticket)
    }

    pub async fn create_asset(
        &self,
        ticket_id: i64,
        path: &str,
        original_name: &str,
        mime: &str,
        size_bytes: u64,
    ) -> Result<i64> {
        let conn = self.connection.lock().await;

        conn.execute(
            "INSERT INTO assets (ticket_id, path, original_name, mime, size_bytes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ticket_id,
                path,
                original_name,
                mime,
                size_bytes as i64,
                Utc::now().timestamp()
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Store the plan for a ticket. The youtube URL is the one actually shown to the user.
    pub async fn create_analysis(
        &self,
        ticket_id: i64,
        analysis: &RepairAnalysis,
        youtube_url: Option<&str>,
    ) -> Result<i64> {
        let materials = serde_json::to_string(&analysis.materials)?;
        let tools = serde_json::to_string(&analysis.tools)?;
        let steps = serde_json::to_string(&analysis.steps)?;
        let likelihood = analysis.likelihood.as_ref().map(serde_json::to_string).transpose()?;
        let safety = analysis.safety.as_ref().map(serde_json::to_string).transpose()?;

        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO analyses (ticket_id, materials, tools, steps, likelihood, safety, youtube_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                ticket_id,
                materials,
                tools,
                steps,
                likelihood,
                safety,
                youtube_url,
                Utc::now().timestamp()
            ],
        )?;

        let id = conn.last_insert_rowid();
        debug!("Stored analysis {} for ticket {}", id, ticket_id);
        Ok(id)
    }

    pub async fn update_ticket_status(&self, ticket_id: i64, status: TicketStatus) -> Result<()> {
        let conn = self.connection.lock().await;

        let updated = conn.execute(
            "UPDATE tickets SET status = ?1 WHERE id = ?2",
            params![status.to_string(), ticket_id],
        )?;

        if updated == 0 {
            return Err(anyhow::anyhow!("Ticket not found: {}", ticket_id));
        }

        debug!("Updated ticket {} status to {}", ticket_id, status);
        Ok(())
    }

    /// Newest tickets first, each with its most recent analysis.
    /// `limit` is clamped to 1..=1000.
    pub async fn list_tickets_with_analysis(&self, limit: usize) -> Result<Vec<TicketWithAnalysis>> {
        let limit = limit.clamp(1, MAX_TICKET_PAGE) as i64;
        let conn = self.connection.lock().await;

        let mut stmt = conn.prepare(
            "SELECT t.id, t.created_at, t.status, t.user_email, t.description,
                    a.id, a.materials, a.tools, a.steps, a.likelihood, a.safety, a.youtube_url, a.created_at
             FROM tickets t
             LEFT JOIN (
                 SELECT a1.*
                 FROM analyses a1
                 INNER JOIN (
                     SELECT ticket_id, MAX(id) AS max_id FROM analyses GROUP BY ticket_id
                 ) a2 ON a1.ticket_id = a2.ticket_id AND a1.id = a2.max_id
             ) a ON t.id = a.ticket_id
             ORDER BY t.created_at DESC, t.id DESC
             LIMIT ?1",
        )?;

        let tickets = stmt
            .query_map(params![limit], |row| {
                let ticket = ticket_from_row(row)?;
                let analysis_id: Option<i64> = row.get(5)?;

                let latest_analysis = match analysis_id {
                    Some(id) => Some(StoredAnalysis {
                        id,
                        ticket_id: ticket.id,
                        materials: decode_json(row.get(6)?, "materials").unwrap_or_default(),
                        tools: decode_json(row.get(7)?, "tools").unwrap_or_default(),
                        steps: decode_json(row.get(8)?, "steps").unwrap_or_default(),
                        likelihood: decode_json(row.get(9)?, "likelihood"),
                        safety: decode_json(row.get(10)?, "safety"),
                        youtube_url: row.get(11)?,
                        created_at: timestamp(row.get(12)?),
                    }),
                    None => None,
                };

                Ok(TicketWithAnalysis {
                    ticket,
                    latest_analysis,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(tickets)
    }

    pub async fn assets_for_ticket(&self, ticket_id: i64) -> Result<Vec<Asset>> {
        let conn = self.connection.lock().await;

        let mut stmt = conn.prepare(
            "SELECT id, ticket_id, path, original_name, mime, size_bytes, created_at
             FROM assets WHERE ticket_id = ?1 ORDER BY created_at ASC, id ASC",
        )?;

        let assets = stmt
            .query_map(params![ticket_id], |row| {
                Ok(Asset {
                    id: row.get(0)?,
                    ticket_id: row.get(1)?,
                    path: row.get(2)?,
                    original_name: row.get(3)?,
                    mime: row.get(4)?,
                    size_bytes: row.get(5)?,
                    created_at: timestamp(row.get(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(assets)
    }

    pub async fn create_contact_submission(&self, submission: &ContactSubmission) -> Result<i64> {
        let conn = self.connection.lock().await;

        conn.execute(
            "INSERT INTO contact_submissions (name, email, subject, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                submission.name,
                submission.email,
                submission.subject,
                submission.message,
                Utc::now().timestamp()
            ],
        )?;

        let id = conn.last_insert_rowid();
        info!("Stored contact submission {}", id);
        Ok(id)
    }

    /// Run raw SQL against the database, used by tests to break the schema
    #[cfg(test)]
    pub(crate) async fn execute_batch(&self, sql: &str) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }
}
