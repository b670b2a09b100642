//! Appeal records and the transactions that tie them to policy entries.

use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use vigil_core::{
    AiDecision, AppealRecord, AppealState, ApprovalId, ListKind, NewEntry, ResourceKind, Result,
    VigilError,
};

use crate::entries::{select_entry, upsert_entry_on};
use crate::store::{PolicyStore, bad_column, parse_time, storage_err};

const APPEAL_COLUMNS: &str = "approval_id, kind, resource, resource_link, child_reason, state, \
     ai_decision, ai_reasoning, escalated_from_ai, created_at, resolved_at";

/// States that still block a new submission for the same resource.
const OPEN_STATES: &str = "'submitted', 'ai_evaluating', 'ai_denied', 'escalated'";

fn row_to_appeal(row: &Row<'_>) -> rusqlite::Result<AppealRecord> {
    let id: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let state: String = row.get(5)?;
    let decision: String = row.get(6)?;
    let created_at: String = row.get(9)?;
    let resolved_at: Option<String> = row.get(10)?;
    Ok(AppealRecord {
        approval_id: Uuid::parse_str(&id).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        kind: ResourceKind::parse(&kind).ok_or_else(|| bad_column(1, "resource kind", &kind))?,
        resource: row.get(2)?,
        resource_link: row.get(3)?,
        child_reason: row.get(4)?,
        state: AppealState::parse(&state).ok_or_else(|| bad_column(5, "appeal state", &state))?,
        ai_decision: AiDecision::parse(&decision)
            .ok_or_else(|| bad_column(6, "ai decision", &decision))?,
        ai_reasoning: row.get(7)?,
        escalated_from_ai: row.get(8)?,
        created_at: parse_time(9, &created_at)?,
        resolved_at: resolved_at.map(|t| parse_time(10, &t)).transpose()?,
    })
}

fn select_appeal(conn: &Connection, id: &ApprovalId) -> rusqlite::Result<Option<AppealRecord>> {
    conn.query_row(
        &format!("SELECT {APPEAL_COLUMNS} FROM appeals WHERE approval_id = ?1"),
        rusqlite::params![id.to_string()],
        row_to_appeal,
    )
    .optional()
}

fn query_appeals(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<AppealRecord>> {
    let mut stmt = conn.prepare(sql).map_err(storage_err)?;
    let rows = stmt
        .query_map(params, row_to_appeal)
        .map_err(storage_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(storage_err)?;
    Ok(rows)
}

impl PolicyStore {
    /// Accept a new appeal: check the entry and limits, insert the record in
    /// `Submitted` and charge one appeal to the entry, all in one transaction.
    ///
    /// Returns the entry's `appeals_used` after the increment.
    pub fn begin_appeal(&self, record: &AppealRecord, max_per_resource: u32) -> Result<u32> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(storage_err)?;

        let entry = select_entry(&tx, record.kind, &record.resource)
            .map_err(storage_err)?
            .filter(|e| e.list == ListKind::Blacklist)
            .ok_or_else(|| VigilError::NotFound(format!("'{}' is not blocked", record.resource)))?;

        if entry.appeals_used >= max_per_resource {
            return Err(VigilError::Conflict(format!(
                "no appeals left for '{}'",
                record.resource
            )));
        }

        let open: i64 = tx
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM appeals
                     WHERE kind = ?1 AND resource = ?2 AND state IN ({OPEN_STATES})"
                ),
                rusqlite::params![record.kind.as_str(), record.resource],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        if open > 0 {
            return Err(VigilError::Conflict(format!(
                "an appeal for '{}' is already open",
                record.resource
            )));
        }

        tx.execute(
            &format!(
                "INSERT INTO appeals ({APPEAL_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                record.approval_id.to_string(),
                record.kind.as_str(),
                record.resource,
                record.resource_link,
                record.child_reason,
                record.state.as_str(),
                record.ai_decision.as_str(),
                record.ai_reasoning,
                record.escalated_from_ai,
                record.created_at.to_rfc3339(),
                record.resolved_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(storage_err)?;

        tx.execute(
            "UPDATE policy_entries SET appeals_used = appeals_used + 1
             WHERE kind = ?1 AND identifier = ?2",
            rusqlite::params![record.kind.as_str(), record.resource],
        )
        .map_err(storage_err)?;

        tx.commit().map_err(storage_err)?;
        Ok(entry.appeals_used + 1)
    }

    /// Persist a record's new state. When `whitelist` is given, the resource
    /// moves to the whitelist with that reason in the same transaction.
    pub fn save_appeal(&self, record: &AppealRecord, whitelist: Option<&str>) -> Result<()> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(storage_err)?;

        let rows = tx
            .execute(
                "UPDATE appeals SET
                    state = ?2,
                    ai_decision = ?3,
                    ai_reasoning = ?4,
                    escalated_from_ai = ?5,
                    resolved_at = ?6
                 WHERE approval_id = ?1",
                rusqlite::params![
                    record.approval_id.to_string(),
                    record.state.as_str(),
                    record.ai_decision.as_str(),
                    record.ai_reasoning,
                    record.escalated_from_ai,
                    record.resolved_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(storage_err)?;
        if rows == 0 {
            return Err(VigilError::NotFound(format!("appeal {}", record.approval_id)));
        }

        if let Some(reason) = whitelist {
            let entry = NewEntry::new(record.kind, &record.resource, ListKind::Whitelist, reason);
            upsert_entry_on(&tx, &entry).map_err(storage_err)?;
        }

        tx.commit().map_err(storage_err)?;
        Ok(())
    }

    pub fn get_appeal(&self, id: &ApprovalId) -> Result<Option<AppealRecord>> {
        let db = self.db.lock();
        select_appeal(&db, id).map_err(storage_err)
    }

    /// All appeal records, newest first, optionally for one resource identifier.
    pub fn list_appeals(&self, resource: Option<&str>) -> Result<Vec<AppealRecord>> {
        let db = self.db.lock();
        match resource {
            Some(r) => query_appeals(
                &db,
                &format!(
                    "SELECT {APPEAL_COLUMNS} FROM appeals WHERE resource = ?1
                     ORDER BY created_at DESC"
                ),
                rusqlite::params![r],
            ),
            None => query_appeals(
                &db,
                &format!("SELECT {APPEAL_COLUMNS} FROM appeals ORDER BY created_at DESC"),
                [],
            ),
        }
    }

    /// Appeals waiting for a parent verdict, oldest first.
    pub fn pending_appeals(&self) -> Result<Vec<AppealRecord>> {
        let db = self.db.lock();
        query_appeals(
            &db,
            &format!(
                "SELECT {APPEAL_COLUMNS} FROM appeals WHERE state = 'escalated'
                 ORDER BY created_at"
            ),
            [],
        )
    }

    /// Records left mid-review by a previous process.
    pub fn interrupted_appeals(&self) -> Result<Vec<AppealRecord>> {
        let db = self.db.lock();
        query_appeals(
            &db,
            &format!(
                "SELECT {APPEAL_COLUMNS} FROM appeals
                 WHERE state IN ('submitted', 'ai_evaluating')
                 ORDER BY created_at"
            ),
            [],
        )
    }
}
