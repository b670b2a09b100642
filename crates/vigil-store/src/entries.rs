//! Whitelist and blacklist entries.
//!
//! `(kind, identifier)` is the primary key, so an identifier sits in at most one
//! list. Moving an entry is an upsert that rewrites `list` and leaves
//! `appeals_used` alone.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};

use vigil_core::{ListKind, NewEntry, PolicyEntry, ResourceKind, Result};

use crate::store::{PolicyStore, bad_column, parse_time, storage_err};

const ENTRY_COLUMNS: &str =
    "kind, identifier, list, added_at, reason, parental_reasoning, appeals_used, screenshot_ref";

pub(crate) fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<PolicyEntry> {
    let kind: String = row.get(0)?;
    let list: String = row.get(2)?;
    let added_at: String = row.get(3)?;
    Ok(PolicyEntry {
        kind: ResourceKind::parse(&kind).ok_or_else(|| bad_column(0, "resource kind", &kind))?,
        identifier: row.get(1)?,
        list: ListKind::parse(&list).ok_or_else(|| bad_column(2, "list", &list))?,
        added_at: parse_time(3, &added_at)?,
        reason: row.get(4)?,
        parental_reasoning: row.get(5)?,
        appeals_used: row.get::<_, i64>(6)? as u32,
        screenshot_ref: row.get(7)?,
    })
}

pub(crate) fn select_entry(
    conn: &Connection,
    kind: ResourceKind,
    identifier: &str,
) -> rusqlite::Result<Option<PolicyEntry>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM policy_entries WHERE kind = ?1 AND identifier = ?2"),
        rusqlite::params![kind.as_str(), identifier],
        row_to_entry,
    )
    .optional()
}

/// Insert or move an entry. `appeals_used` survives the move.
pub(crate) fn upsert_entry_on(conn: &Connection, entry: &NewEntry) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO policy_entries
            (kind, identifier, list, added_at, reason, parental_reasoning, appeals_used, screenshot_ref)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
         ON CONFLICT(kind, identifier) DO UPDATE SET
            list = excluded.list,
            added_at = excluded.added_at,
            reason = excluded.reason,
            parental_reasoning = excluded.parental_reasoning,
            screenshot_ref = COALESCE(excluded.screenshot_ref, policy_entries.screenshot_ref)",
        rusqlite::params![
            entry.kind.as_str(),
            entry.identifier,
            entry.list.as_str(),
            Utc::now().to_rfc3339(),
            entry.reason,
            entry.parental_reasoning,
            entry.screenshot_ref,
        ],
    )?;
    Ok(())
}

impl PolicyStore {
    /// Look up the entry for an identifier, in whichever list it lives.
    pub fn get_entry(&self, kind: ResourceKind, identifier: &str) -> Result<Option<PolicyEntry>> {
        let db = self.db.lock();
        select_entry(&db, kind, identifier).map_err(storage_err)
    }

    /// All entries of one kind in one list, oldest first.
    pub fn list_entries(&self, kind: ResourceKind, list: ListKind) -> Result<Vec<PolicyEntry>> {
        let db = self.db.lock();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM policy_entries
                 WHERE kind = ?1 AND list = ?2
                 ORDER BY added_at, identifier"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(rusqlite::params![kind.as_str(), list.as_str()], row_to_entry)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        Ok(rows)
    }

    /// Add an entry, or move an existing one to `entry.list`.
    pub fn upsert_entry(&self, entry: &NewEntry) -> Result<PolicyEntry> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(storage_err)?;
        upsert_entry_on(&tx, entry).map_err(storage_err)?;
        let stored = select_entry(&tx, entry.kind, &entry.identifier)
            .map_err(storage_err)?
            .ok_or_else(|| vigil_core::VigilError::Storage("entry vanished after upsert".into()))?;
        tx.commit().map_err(storage_err)?;
        Ok(stored)
    }

    /// Insert an entry only when the identifier has none yet.
    ///
    /// Returns whatever entry exists afterwards and whether this call created it.
    pub fn insert_if_absent(&self, entry: &NewEntry) -> Result<(PolicyEntry, bool)> {
        let mut db = self.db.lock();
        let tx = db.transaction().map_err(storage_err)?;
        let inserted = tx
            .execute(
                "INSERT INTO policy_entries
                    (kind, identifier, list, added_at, reason, parental_reasoning, appeals_used, screenshot_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
                 ON CONFLICT(kind, identifier) DO NOTHING",
                rusqlite::params![
                    entry.kind.as_str(),
                    entry.identifier,
                    entry.list.as_str(),
                    Utc::now().to_rfc3339(),
                    entry.reason,
                    entry.parental_reasoning,
                    entry.screenshot_ref,
                ],
            )
            .map_err(storage_err)?
            > 0;
        let stored = select_entry(&tx, entry.kind, &entry.identifier)
            .map_err(storage_err)?
            .ok_or_else(|| vigil_core::VigilError::Storage("entry vanished after insert".into()))?;
        tx.commit().map_err(storage_err)?;
        Ok((stored, inserted))
    }

    /// Remove an identifier from `list`. Returns false if it was not in that list.
    pub fn remove_entry(&self, kind: ResourceKind, list: ListKind, identifier: &str) -> Result<bool> {
        let db = self.db.lock();
        let rows = db
            .execute(
                "DELETE FROM policy_entries WHERE kind = ?1 AND list = ?2 AND identifier = ?3",
                rusqlite::params![kind.as_str(), list.as_str(), identifier],
            )
            .map_err(storage_err)?;
        Ok(rows > 0)
    }
}
