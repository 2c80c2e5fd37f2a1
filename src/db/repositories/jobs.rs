use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_datetime, parse_datetime, parse_job_kind, to_i64, to_u32},
    },
    models::CaptureJob,
};

fn row_to_job(row: &Row) -> Result<CaptureJob> {
    let kind: String = row.get("kind")?;
    let run_at: String = row.get("run_at")?;

    Ok(CaptureJob {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        kind: parse_job_kind(&kind)?,
        run_at: parse_datetime(&run_at, "run_at")?,
        attempts: to_u32(row.get("attempts")?, "attempts")?,
        last_error: row.get("last_error")?,
    })
}

fn query_jobs(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<CaptureJob>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut jobs = Vec::new();
    while let Some(row) = rows.next()? {
        jobs.push(row_to_job(row)?);
    }
    Ok(jobs)
}

pub(super) fn insert_job_row(conn: &Connection, job: &CaptureJob) -> Result<()> {
    conn.execute(
        "INSERT INTO capture_jobs (id, session_id, kind, run_at, attempts, last_error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            job.id,
            job.session_id,
            job.kind.as_str(),
            format_datetime(&job.run_at),
            job.attempts,
            job.last_error,
        ],
    )
    .with_context(|| format!("failed to enqueue {} job for {}", job.kind, job.session_id))?;
    Ok(())
}

pub(super) fn delete_job_row(conn: &Connection, job_id: &str) -> Result<()> {
    conn.execute("DELETE FROM capture_jobs WHERE id = ?1", params![job_id])
        .with_context(|| format!("failed to complete job {job_id}"))?;
    Ok(())
}

impl Database {
    pub async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CaptureJob>> {
        let now = format_datetime(&now);
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            query_jobs(
                conn,
                "SELECT id, session_id, kind, run_at, attempts, last_error
                 FROM capture_jobs
                 WHERE run_at <= ?1
                 ORDER BY run_at ASC
                 LIMIT ?2",
                params![now, limit],
            )
        })
        .await
    }

    pub async fn pending_jobs(&self, session_id: &str) -> Result<Vec<CaptureJob>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            query_jobs(
                conn,
                "SELECT id, session_id, kind, run_at, attempts, last_error
                 FROM capture_jobs
                 WHERE session_id = ?1
                 ORDER BY run_at ASC",
                params![session_id],
            )
        })
        .await
    }

    pub async fn reschedule_job(&self, job: &CaptureJob) -> Result<()> {
        let job = job.clone();
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE capture_jobs
                 SET run_at = ?1,
                     attempts = ?2,
                     last_error = ?3
                 WHERE id = ?4",
                params![
                    format_datetime(&job.run_at),
                    job.attempts,
                    job.last_error,
                    job.id,
                ],
            )?;
            if changed == 0 {
                bail!("job {} does not exist", job.id);
            }
            Ok(())
        })
        .await
    }

    pub async fn complete_job(&self, job_id: &str) -> Result<()> {
        let job_id = job_id.to_string();
        self.execute(move |conn| delete_job_row(conn, &job_id)).await
    }
}
