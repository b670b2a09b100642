use rusqlite::{Connection, Row};

use vigil_core::{ParentSettings, Result, SettingsUpdate, VigilError};

use crate::store::{PolicyStore, parse_time, storage_err};

fn row_to_settings(row: &Row<'_>) -> rusqlite::Result<ParentSettings> {
    let updated_at: String = row.get(6)?;
    Ok(ParentSettings {
        parent_email: row.get(0)?,
        monitoring_prompt: row.get(1)?,
        agent_can_auto_approve: row.get(2)?,
        desktop_monitoring_enabled: row.get(3)?,
        screenshot_interval_secs: row.get::<_, i64>(4)? as u64,
        version: row.get::<_, i64>(5)? as u64,
        updated_at: parse_time(6, &updated_at)?,
    })
}

fn select_settings(conn: &Connection) -> rusqlite::Result<ParentSettings> {
    conn.query_row(
        "SELECT parent_email, monitoring_prompt, agent_can_auto_approve,
                desktop_monitoring_enabled, screenshot_interval_secs, version, updated_at
         FROM settings WHERE id = 1",
        [],
        row_to_settings,
    )
}

impl PolicyStore {
    /// Current parent settings. Always read from the database.
    pub fn settings(&self) -> Result<ParentSettings> {
        let db = self.db.lock();
        select_settings(&db).map_err(storage_err)
    }

    /// Validate and save a settings update.
    ///
    /// When the update carries `expected_version` and it no longer matches,
    /// the save is rejected with [`VigilError::Conflict`].
    pub fn save_settings(&self, update: &SettingsUpdate) -> Result<ParentSettings> {
        update.validate()?;

        let mut db = self.db.lock();
        let tx = db.transaction().map_err(storage_err)?;
        let current = select_settings(&tx).map_err(storage_err)?;

        if let Some(expected) = update.expected_version
            && expected != current.version
        {
            return Err(VigilError::Conflict(format!(
                "settings changed since version {expected} (now {})",
                current.version
            )));
        }

        let next = update.apply_to(&current);
        tx.execute(
            "UPDATE settings SET
                parent_email = ?1,
                monitoring_prompt = ?2,
                agent_can_auto_approve = ?3,
                desktop_monitoring_enabled = ?4,
                screenshot_interval_secs = ?5,
                version = ?6,
                updated_at = ?7
             WHERE id = 1",
            rusqlite::params![
                next.parent_email,
                next.monitoring_prompt,
                next.agent_can_auto_approve,
                next.desktop_monitoring_enabled,
                next.screenshot_interval_secs as i64,
                next.version as i64,
                next.updated_at.to_rfc3339(),
            ],
        )
        .map_err(storage_err)?;
        tx.commit().map_err(storage_err)?;
        Ok(next)
    }
}
