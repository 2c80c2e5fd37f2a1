mod connection;
mod helpers;
mod migrations;
mod repositories;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{CaptureJob, CaptureSession, PauseInterval, SessionState},
    store::{SessionStore, SessionUpdate},
};

pub use connection::Database;

#[async_trait]
impl SessionStore for Database {
    async fn create_session(
        &self,
        session: &CaptureSession,
        job: Option<&CaptureJob>,
    ) -> Result<()> {
        self.create_session_with_job(session, job.cloned()).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<CaptureSession>> {
        Database::get_session(self, session_id).await
    }

    async fn update_session(&self, update: &SessionUpdate) -> Result<bool> {
        self.apply_session_update(update).await
    }

    async fn list_sessions_for_owner(&self, owner_id: &str) -> Result<Vec<CaptureSession>> {
        Database::list_sessions_for_owner(self, owner_id).await
    }

    async fn find_active_session(&self, owner_id: &str) -> Result<Option<CaptureSession>> {
        Database::find_active_session(self, owner_id).await
    }

    async fn list_sessions_in_states(
        &self,
        states: &[SessionState],
    ) -> Result<Vec<CaptureSession>> {
        Database::list_sessions_in_states(self, states).await
    }

    async fn get_open_pause(&self, session_id: &str) -> Result<Option<PauseInterval>> {
        Database::get_open_pause(self, session_id).await
    }

    async fn list_pauses(&self, session_id: &str) -> Result<Vec<PauseInterval>> {
        Database::list_pauses(self, session_id).await
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CaptureJob>> {
        Database::due_jobs(self, now, limit).await
    }

    async fn pending_jobs(&self, session_id: &str) -> Result<Vec<CaptureJob>> {
        Database::pending_jobs(self, session_id).await
    }

    async fn reschedule_job(&self, job: &CaptureJob) -> Result<()> {
        Database::reschedule_job(self, job).await
    }

    async fn complete_job(&self, job_id: &str) -> Result<()> {
        Database::complete_job(self, job_id).await
    }
}
