use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime, to_i64, to_u64},
    },
    models::PauseInterval,
};

fn row_to_pause(row: &Row) -> Result<PauseInterval> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let duration_seconds: Option<i64> = row.get("duration_seconds")?;

    Ok(PauseInterval {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        duration_seconds: duration_seconds
            .map(|value| to_u64(value, "duration_seconds"))
            .transpose()?,
    })
}

pub(super) fn insert_pause_row(conn: &Connection, pause: &PauseInterval) -> Result<()> {
    conn.execute(
        "INSERT INTO capture_pauses (id, session_id, started_at, ended_at, duration_seconds)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            pause.id,
            pause.session_id,
            format_datetime(&pause.started_at),
            format_optional_datetime(pause.ended_at.as_ref()),
            pause.duration_seconds.map(to_i64).transpose()?,
        ],
    )
    .with_context(|| "failed to insert pause record")?;
    Ok(())
}

pub(super) fn close_pause_row(conn: &Connection, pause: &PauseInterval) -> Result<()> {
    conn.execute(
        "UPDATE capture_pauses
         SET ended_at = ?1,
             duration_seconds = ?2
         WHERE id = ?3",
        params![
            format_optional_datetime(pause.ended_at.as_ref()),
            pause.duration_seconds.map(to_i64).transpose()?,
            pause.id,
        ],
    )
    .with_context(|| "failed to finalize pause record")?;
    Ok(())
}

impl Database {
    pub async fn get_open_pause(&self, session_id: &str) -> Result<Option<PauseInterval>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, started_at, ended_at, duration_seconds
                 FROM capture_pauses
                 WHERE session_id = ?1 AND ended_at IS NULL
                 ORDER BY started_at DESC
                 LIMIT 1",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_pause(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_pauses(&self, session_id: &str) -> Result<Vec<PauseInterval>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, started_at, ended_at, duration_seconds
                 FROM capture_pauses
                 WHERE session_id = ?1
                 ORDER BY started_at ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut pauses = Vec::new();
            while let Some(row) = rows.next()? {
                pauses.push(row_to_pause(row)?);
            }
            Ok(pauses)
        })
        .await
    }
}
