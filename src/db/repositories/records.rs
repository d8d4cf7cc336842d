use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_date, parse_datetime, parse_status, to_i64, to_u64},
    models::{RecordUpdate, SessionRecord},
    repositories::labels::{ensure_label, normalize_label},
};

const RECORD_COLUMNS: &str = "id, date, start_time, end_time, total_ticks, effective_ticks, \
     sample_interval_ms, duration_minutes, total_elapsed_minutes, efficiency, label, status, \
     created_at, updated_at";

fn row_to_record(row: &Row) -> Result<SessionRecord> {
    let date: String = row.get("date")?;
    let start_time: String = row.get("start_time")?;
    let end_time: String = row.get("end_time")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let status: String = row.get("status")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        date: parse_date(&date, "date")?,
        start_time: parse_datetime(&start_time, "start_time")?,
        end_time: parse_datetime(&end_time, "end_time")?,
        total_ticks: to_u64(row.get("total_ticks")?, "total_ticks")?,
        effective_ticks: to_u64(row.get("effective_ticks")?, "effective_ticks")?,
        sample_interval_ms: to_u64(row.get("sample_interval_ms")?, "sample_interval_ms")?,
        duration_minutes: row.get("duration_minutes")?,
        total_elapsed_minutes: row.get("total_elapsed_minutes")?,
        efficiency: row.get("efficiency")?,
        label: row.get("label")?,
        status: parse_status(&status)?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn query_one(conn: &Connection, sql: &str, id: Option<&str>) -> Result<Option<SessionRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = match id {
        Some(id) => stmt.query(params![id])?,
        None => stmt.query([])?,
    };
    let record = match rows.next()? {
        Some(row) => Some(row_to_record(row)?),
        None => None,
    };
    Ok(record)
}

fn load_record(conn: &Connection, record_id: &str) -> Result<Option<SessionRecord>> {
    query_one(
        conn,
        &format!("SELECT {RECORD_COLUMNS} FROM session_records WHERE id = ?1"),
        Some(record_id),
    )
}

fn load_latest(conn: &Connection) -> Result<Option<SessionRecord>> {
    query_one(
        conn,
        &format!(
            "SELECT {RECORD_COLUMNS}
             FROM session_records
             ORDER BY start_time DESC, created_at DESC
             LIMIT 1"
        ),
        None,
    )
}

fn apply_update(conn: &Connection, record_id: &str, update: RecordUpdate) -> Result<SessionRecord> {
    let mut record = load_record(conn, record_id)?
        .ok_or_else(|| anyhow!("Session record {record_id} not found"))?;

    if let Some(minutes) = update.duration_minutes {
        if !minutes.is_finite() || minutes < 0.0 || minutes > record.total_elapsed_minutes {
            bail!(
                "duration {minutes} must lie within 0..={} minutes",
                record.total_elapsed_minutes
            );
        }
        record.duration_minutes = minutes;
    }

    if let Some(label) = update.label {
        record.label = match label {
            Some(name) => {
                let name = normalize_label(&name)?;
                ensure_label(conn, &name)?;
                Some(name)
            }
            None => None,
        };
    }

    record.updated_at = Utc::now();
    conn.execute(
        "UPDATE session_records
         SET label = ?1,
             duration_minutes = ?2,
             updated_at = ?3
         WHERE id = ?4",
        params![
            record.label,
            record.duration_minutes,
            format_datetime(&record.updated_at),
            record.id,
        ],
    )?;

    Ok(record)
}

impl Database {
    pub async fn insert_record(&self, record: &SessionRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            if let Some(label) = record.label.as_deref() {
                ensure_label(&tx, label)?;
            }
            tx.execute(
                &format!(
                    "INSERT INTO session_records ({RECORD_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
                ),
                params![
                    record.id,
                    record.date.format("%Y-%m-%d").to_string(),
                    format_datetime(&record.start_time),
                    format_datetime(&record.end_time),
                    to_i64(record.total_ticks)?,
                    to_i64(record.effective_ticks)?,
                    to_i64(record.sample_interval_ms)?,
                    record.duration_minutes,
                    record.total_elapsed_minutes,
                    record.efficiency,
                    record.label,
                    record.status.as_str(),
                    format_datetime(&record.created_at),
                    format_datetime(&record.updated_at),
                ],
            )
            .with_context(|| format!("failed to insert session record {}", record.id))?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_record(&self, record_id: &str) -> Result<Option<SessionRecord>> {
        let record_id = record_id.to_string();
        self.execute(move |conn| load_record(conn, &record_id)).await
    }

    pub async fn latest_record(&self) -> Result<Option<SessionRecord>> {
        self.execute(|conn| load_latest(conn)).await
    }

    /// Newest first.
    pub async fn list_records(&self, limit: usize, offset: usize) -> Result<Vec<SessionRecord>> {
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS}
                 FROM session_records
                 ORDER BY start_time DESC, created_at DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;

            let mut rows = stmt.query(params![limit, offset])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }

            Ok(records)
        })
        .await
    }

    /// Correct the label and/or duration of a persisted record.
    pub async fn update_record(&self, record_id: &str, update: RecordUpdate) -> Result<SessionRecord> {
        if update.is_empty() {
            bail!("No fields to update");
        }
        let record_id = record_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let record = apply_update(&tx, &record_id, update)?;
            tx.commit()?;
            Ok(record)
        })
        .await
    }

    /// Tag the most recent record. Returns `None` when there are no records.
    pub async fn label_latest(&self, label: String) -> Result<Option<SessionRecord>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let Some(latest) = load_latest(&tx)? else {
                return Ok(None);
            };
            let update = RecordUpdate {
                label: Some(Some(label)),
                duration_minutes: None,
            };
            let record = apply_update(&tx, &latest.id, update)?;
            tx.commit()?;
            Ok(Some(record))
        })
        .await
    }

    /// Returns whether a record was removed.
    pub async fn delete_record(&self, record_id: &str) -> Result<bool> {
        let record_id = record_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                "DELETE FROM session_records WHERE id = ?1",
                params![record_id],
            )?;
            Ok(rows_affected > 0)
        })
        .await
    }

    pub async fn delete_all_records(&self) -> Result<usize> {
        self.execute(|conn| Ok(conn.execute("DELETE FROM session_records", [])?))
            .await
    }

    /// End time of the most recently finished session.
    pub async fn last_finished_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.execute(|conn| {
            let raw: Option<String> = conn
                .query_row("SELECT MAX(end_time) FROM session_records", [], |row| row.get(0))
                .optional()?
                .flatten();
            raw.map(|value| parse_datetime(&value, "end_time")).transpose()
        })
        .await
    }
}
