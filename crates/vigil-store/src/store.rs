use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use vigil_core::{AuditEvent, ParentSettings, Result, VigilError};

/// Durable policy state: list entries, appeal records, the parent settings
/// row, and the audit trail, all in one SQLite database.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct PolicyStore {
    pub(crate) db: Arc<Mutex<Connection>>,
}

pub(crate) fn storage_err(e: rusqlite::Error) -> VigilError {
    VigilError::Storage(e.to_string())
}

pub(crate) fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub(crate) fn bad_column(idx: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unknown {what} '{value}'").into(),
    )
}

impl PolicyStore {
    /// Open or create the policy database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        info!(?path, "opening policy store");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && path != Path::new(":memory:")
        {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(storage_err)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(storage_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS policy_entries (
                kind TEXT NOT NULL,
                identifier TEXT NOT NULL,
                list TEXT NOT NULL,
                added_at TEXT NOT NULL,
                reason TEXT NOT NULL,
                parental_reasoning TEXT,
                appeals_used INTEGER NOT NULL DEFAULT 0,
                screenshot_ref TEXT,
                PRIMARY KEY (kind, identifier)
            );

            CREATE TABLE IF NOT EXISTS appeals (
                approval_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                resource TEXT NOT NULL,
                resource_link TEXT NOT NULL,
                child_reason TEXT NOT NULL,
                state TEXT NOT NULL,
                ai_decision TEXT NOT NULL DEFAULT 'none',
                ai_reasoning TEXT,
                escalated_from_ai INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                resolved_at TEXT
            );

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                parent_email TEXT NOT NULL,
                monitoring_prompt TEXT NOT NULL,
                agent_can_auto_approve INTEGER NOT NULL,
                desktop_monitoring_enabled INTEGER NOT NULL,
                screenshot_interval_secs INTEGER NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                resource TEXT,
                details TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_entries_list ON policy_entries(kind, list);
            CREATE INDEX IF NOT EXISTS idx_appeals_resource ON appeals(kind, resource);
            CREATE INDEX IF NOT EXISTS idx_appeals_state ON appeals(state);
            CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_log(timestamp);
            ",
        )
        .map_err(storage_err)?;

        // First run: the settings row exists from the start with defaults.
        let defaults = ParentSettings::default();
        conn.execute(
            "INSERT OR IGNORE INTO settings
                (id, parent_email, monitoring_prompt, agent_can_auto_approve,
                 desktop_monitoring_enabled, screenshot_interval_secs, version, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                defaults.parent_email,
                defaults.monitoring_prompt,
                defaults.agent_can_auto_approve,
                defaults.desktop_monitoring_enabled,
                defaults.screenshot_interval_secs as i64,
                defaults.version as i64,
                defaults.updated_at.to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    /// Append an audit log entry.
    pub fn audit(&self, event_type: &str, resource: Option<&str>, details: Option<&str>) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        let db = self.db.lock();
        db.execute(
            "INSERT INTO audit_log (timestamp, event_type, resource, details) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![timestamp, event_type, resource, details],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    /// Read recent audit log entries, newest first.
    pub fn audit_log(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(
                "SELECT timestamp, event_type, resource, details
                 FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                let ts: String = row.get(0)?;
                Ok(AuditEvent {
                    timestamp: parse_time(0, &ts)?,
                    event_type: row.get(1)?,
                    resource: row.get(2)?,
                    details: row.get(3)?,
                })
            })
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(rows)
    }
}
