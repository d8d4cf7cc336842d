use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, parse_optional_datetime},
    models::Label,
};

const LABEL_COLUMNS: &str = "id, name, order_index, created_at, updated_at, deleted_at";

fn row_to_label(row: &Row) -> Result<Label> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let deleted_at: Option<String> = row.get("deleted_at")?;

    Ok(Label {
        id: row.get("id")?,
        name: row.get("name")?,
        order_index: row.get("order_index")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
        deleted_at: parse_optional_datetime(deleted_at, "deleted_at")?,
    })
}

fn load_label(conn: &Connection, label_id: i64) -> Result<Label> {
    let mut stmt = conn.prepare(&format!("SELECT {LABEL_COLUMNS} FROM labels WHERE id = ?1"))?;
    let mut rows = stmt.query(params![label_id])?;
    let label = match rows.next()? {
        Some(row) => row_to_label(row)?,
        None => return Err(anyhow!("Label {label_id} not found")),
    };
    Ok(label)
}

fn find_live_label_id(conn: &Connection, name: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM labels WHERE name = ?1 AND deleted_at IS NULL",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Smallest unused order index among live labels.
fn next_order_index(conn: &Connection) -> Result<i64> {
    let mut stmt = conn.prepare(
        "SELECT order_index FROM labels WHERE deleted_at IS NULL ORDER BY order_index ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut next_index = 0i64;
    while let Some(row) = rows.next()? {
        let current: i64 = row.get(0)?;
        if current > next_index {
            break;
        }
        if current == next_index {
            next_index += 1;
        }
    }
    Ok(next_index)
}

fn insert_label(conn: &Connection, name: &str) -> Result<i64> {
    let now = format_datetime(&Utc::now());
    let order_index = next_order_index(conn)?;
    conn.execute(
        "INSERT INTO labels (name, order_index, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![name, order_index, now, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Registers `name` as a live label unless it already is one.
pub(crate) fn ensure_label(conn: &Connection, name: &str) -> Result<()> {
    if find_live_label_id(conn, name)?.is_none() {
        insert_label(conn, name)?;
    }
    Ok(())
}

pub(crate) fn normalize_label(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("label must not be empty");
    }
    Ok(trimmed.to_string())
}

impl Database {
    /// Create a new label. Fails if a live label with the same name exists.
    pub async fn create_label(&self, name: String) -> Result<Label> {
        let name = normalize_label(&name)?;
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            if find_live_label_id(&tx, &name)?.is_some() {
                bail!("Label '{name}' already exists");
            }
            let label_id = insert_label(&tx, &name)?;
            let label = load_label(&tx, label_id)?;
            tx.commit()?;
            Ok(label)
        })
        .await
    }

    /// All live labels, ordered by order_index.
    pub async fn list_labels(&self) -> Result<Vec<Label>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {LABEL_COLUMNS}
                 FROM labels
                 WHERE deleted_at IS NULL
                 ORDER BY order_index ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut labels = Vec::new();
            while let Some(row) = rows.next()? {
                labels.push(row_to_label(row)?);
            }

            Ok(labels)
        })
        .await
    }

    /// Soft delete a label. Records keep the text they were tagged with.
    pub async fn delete_label(&self, label_id: i64) -> Result<()> {
        self.execute(move |conn| {
            let now = format_datetime(&Utc::now());
            let rows_affected = conn.execute(
                "UPDATE labels
                 SET deleted_at = ?1, updated_at = ?2
                 WHERE id = ?3 AND deleted_at IS NULL",
                params![now, now, label_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow!("Label not found or already deleted"));
            }

            Ok(())
        })
        .await
    }
}
