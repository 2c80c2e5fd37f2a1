use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{
            format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime,
            parse_state, state_list, to_i64, to_u32, to_u64,
        },
    },
    models::{CaptureSession, SessionState},
    store::SessionUpdate,
};

use super::{
    jobs::{delete_job_row, insert_job_row},
    pauses::{close_pause_row, insert_pause_row},
};

const SESSION_COLUMNS: &str = "id, owner_id, project_id, state, settings, started_at, ended_at, \
     processing_started_at, duration_seconds, paused_seconds, frames_captured, frames_dropped, \
     file_size_bytes, output_path, error_message, assembly_attempts, performance, revision, \
     created_at, updated_at";

fn row_to_session(row: &Row) -> Result<CaptureSession> {
    let state: String = row.get("state")?;
    let settings: String = row.get("settings")?;
    let performance: String = row.get("performance")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let processing_started_at: Option<String> = row.get("processing_started_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(CaptureSession {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        project_id: row.get("project_id")?,
        state: parse_state(&state)?,
        settings: serde_json::from_str(&settings).context("failed to parse settings")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        processing_started_at: parse_optional_datetime(
            processing_started_at,
            "processing_started_at",
        )?,
        duration_seconds: to_u64(row.get("duration_seconds")?, "duration_seconds")?,
        paused_seconds: to_u64(row.get("paused_seconds")?, "paused_seconds")?,
        frames_captured: to_u64(row.get("frames_captured")?, "frames_captured")?,
        frames_dropped: to_u64(row.get("frames_dropped")?, "frames_dropped")?,
        file_size_bytes: to_u64(row.get("file_size_bytes")?, "file_size_bytes")?,
        output_path: row.get("output_path")?,
        error_message: row.get("error_message")?,
        assembly_attempts: to_u32(row.get("assembly_attempts")?, "assembly_attempts")?,
        performance: serde_json::from_str(&performance).context("failed to parse performance")?,
        revision: to_u64(row.get("revision")?, "revision")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn query_sessions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<CaptureSession>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

impl Database {
    pub async fn insert_session(&self, session: &CaptureSession) -> Result<()> {
        self.create_session_with_job(session, None).await
    }

    pub async fn create_session_with_job(
        &self,
        session: &CaptureSession,
        job: Option<crate::models::CaptureJob>,
    ) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "INSERT INTO capture_sessions ({SESSION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
                ),
                params![
                    record.id,
                    record.owner_id,
                    record.project_id,
                    record.state.as_str(),
                    serde_json::to_string(&record.settings)?,
                    format_datetime(&record.started_at),
                    format_optional_datetime(record.ended_at.as_ref()),
                    format_optional_datetime(record.processing_started_at.as_ref()),
                    to_i64(record.duration_seconds)?,
                    to_i64(record.paused_seconds)?,
                    to_i64(record.frames_captured)?,
                    to_i64(record.frames_dropped)?,
                    to_i64(record.file_size_bytes)?,
                    record.output_path,
                    record.error_message,
                    record.assembly_attempts,
                    serde_json::to_string(&record.performance)?,
                    to_i64(record.revision)?,
                    format_datetime(&record.created_at),
                    format_datetime(&record.updated_at),
                ],
            )
            .with_context(|| format!("failed to insert session {}", record.id))?;

            if let Some(job) = &job {
                insert_job_row(&tx, job)?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<CaptureSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut sessions = query_sessions(
                conn,
                &format!("SELECT {SESSION_COLUMNS} FROM capture_sessions WHERE id = ?1"),
                params![session_id],
            )?;
            Ok(sessions.pop())
        })
        .await
    }

    /// Writes the session row only if its revision is unchanged, together with
    /// the pause and job side effects, in one transaction.
    pub async fn apply_session_update(&self, update: &SessionUpdate) -> Result<bool> {
        let update = update.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let record = &update.session;

            let changed = tx
                .execute(
                    "UPDATE capture_sessions
                     SET state = ?1,
                         ended_at = ?2,
                         processing_started_at = ?3,
                         duration_seconds = ?4,
                         paused_seconds = ?5,
                         frames_captured = ?6,
                         frames_dropped = ?7,
                         file_size_bytes = ?8,
                         output_path = ?9,
                         error_message = ?10,
                         assembly_attempts = ?11,
                         performance = ?12,
                         revision = ?13,
                         updated_at = ?14
                     WHERE id = ?15 AND revision = ?16",
                    params![
                        record.state.as_str(),
                        format_optional_datetime(record.ended_at.as_ref()),
                        format_optional_datetime(record.processing_started_at.as_ref()),
                        to_i64(record.duration_seconds)?,
                        to_i64(record.paused_seconds)?,
                        to_i64(record.frames_captured)?,
                        to_i64(record.frames_dropped)?,
                        to_i64(record.file_size_bytes)?,
                        record.output_path,
                        record.error_message,
                        record.assembly_attempts,
                        serde_json::to_string(&record.performance)?,
                        to_i64(record.revision)?,
                        format_datetime(&record.updated_at),
                        record.id,
                        to_i64(update.expected_revision)?,
                    ],
                )
                .with_context(|| format!("failed to update session {}", record.id))?;

            if changed == 0 {
                let exists: Option<i64> = tx
                    .query_row(
                        "SELECT revision FROM capture_sessions WHERE id = ?1",
                        params![record.id],
                        |row| row.get(0),
                    )
                    .optional()?;
                return match exists {
                    Some(_) => Ok(false),
                    None => Err(anyhow!("session {} does not exist", record.id)),
                };
            }

            if let Some(pause) = &update.open_pause {
                insert_pause_row(&tx, pause)?;
            }
            if let Some(pause) = &update.close_pause {
                close_pause_row(&tx, pause)?;
            }
            for job in &update.enqueue {
                insert_job_row(&tx, job)?;
            }
            for job_id in &update.complete_jobs {
                delete_job_row(&tx, job_id)?;
            }

            tx.commit()?;
            Ok(true)
        })
        .await
    }

    pub async fn list_sessions_for_owner(&self, owner_id: &str) -> Result<Vec<CaptureSession>> {
        let owner_id = owner_id.to_string();
        self.execute(move |conn| {
            query_sessions(
                conn,
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM capture_sessions
                     WHERE owner_id = ?1
                     ORDER BY started_at DESC"
                ),
                params![owner_id],
            )
        })
        .await
    }

    pub async fn find_active_session(&self, owner_id: &str) -> Result<Option<CaptureSession>> {
        let owner_id = owner_id.to_string();
        self.execute(move |conn| {
            let mut sessions = query_sessions(
                conn,
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM capture_sessions
                     WHERE owner_id = ?1 AND state IN ({})
                     ORDER BY started_at DESC
                     LIMIT 1",
                    state_list(&SessionState::ACTIVE)
                ),
                params![owner_id],
            )?;
            Ok(sessions.pop())
        })
        .await
    }

    pub async fn list_sessions_in_states(
        &self,
        states: &[SessionState],
    ) -> Result<Vec<CaptureSession>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let states = state_list(states);
        self.execute(move |conn| {
            query_sessions(
                conn,
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM capture_sessions
                     WHERE state IN ({states})
                     ORDER BY started_at DESC"
                ),
                [],
            )
        })
        .await
    }
}
