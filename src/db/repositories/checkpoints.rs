use anyhow::Result;
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, to_i64, to_u32, to_u64},
    models::ActiveCheckpoint,
};
use crate::models::SessionCounters;

fn row_to_checkpoint(row: &Row) -> Result<ActiveCheckpoint> {
    let start_time: String = row.get("start_time")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(ActiveCheckpoint {
        session_id: row.get("session_id")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        sample_interval_ms: to_u64(row.get("sample_interval_ms")?, "sample_interval_ms")?,
        counters: SessionCounters {
            total_ticks: to_u64(row.get("total_ticks")?, "total_ticks")?,
            effective_ticks: to_u64(row.get("effective_ticks")?, "effective_ticks")?,
            consecutive_failures: to_u32(row.get("consecutive_failures")?, "consecutive_failures")?,
        },
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn load_checkpoint(conn: &Connection) -> Result<Option<ActiveCheckpoint>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, start_time, sample_interval_ms, total_ticks, effective_ticks,
                consecutive_failures, updated_at
         FROM active_checkpoint
         WHERE slot = 1",
    )?;
    let mut rows = stmt.query([])?;
    let checkpoint = match rows.next()? {
        Some(row) => Some(row_to_checkpoint(row)?),
        None => None,
    };
    Ok(checkpoint)
}

impl Database {
    /// Overwrites the single active checkpoint.
    pub async fn save_checkpoint(&self, checkpoint: &ActiveCheckpoint) -> Result<()> {
        let checkpoint = checkpoint.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO active_checkpoint
                    (slot, session_id, start_time, sample_interval_ms, total_ticks,
                     effective_ticks, consecutive_failures, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    checkpoint.session_id,
                    format_datetime(&checkpoint.start_time),
                    to_i64(checkpoint.sample_interval_ms)?,
                    to_i64(checkpoint.counters.total_ticks)?,
                    to_i64(checkpoint.counters.effective_ticks)?,
                    checkpoint.counters.consecutive_failures,
                    format_datetime(&checkpoint.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn load_checkpoint(&self) -> Result<Option<ActiveCheckpoint>> {
        self.execute(|conn| load_checkpoint(conn)).await
    }

    /// Clears the checkpoint only if it still belongs to `session_id`, so a
    /// late clear from one session never wipes the next session's checkpoint.
    pub async fn clear_checkpoint(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM active_checkpoint WHERE session_id = ?1",
                params![session_id],
            )?;
            Ok(())
        })
        .await
    }
}
