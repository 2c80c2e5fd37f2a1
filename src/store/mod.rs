//! Persistence seam for capture sessions.
//!
//! The coordinator only talks to [`SessionStore`]; `db::Database` is the
//! durable implementation and [`MemoryStore`] the volatile one used by tests.

mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{CaptureJob, CaptureSession, PauseInterval, SessionState};

pub use memory::MemoryStore;

/// One atomic write: the new session row plus its pause and outbox side effects.
#[derive(Debug, Clone)]
pub struct SessionUpdate {
    /// Session as it should be stored, revision already bumped.
    pub session: CaptureSession,
    pub expected_revision: u64,
    pub open_pause: Option<PauseInterval>,
    pub close_pause: Option<PauseInterval>,
    pub enqueue: Vec<CaptureJob>,
    pub complete_jobs: Vec<String>,
}

impl SessionUpdate {
    /// Prepares `session` for a compare-and-swap against its current revision.
    pub fn new(mut session: CaptureSession) -> Self {
        let expected_revision = session.revision;
        session.revision = expected_revision + 1;
        Self {
            session,
            expected_revision,
            open_pause: None,
            close_pause: None,
            enqueue: Vec::new(),
            complete_jobs: Vec::new(),
        }
    }

    pub fn enqueue(mut self, job: CaptureJob) -> Self {
        self.enqueue.push(job);
        self
    }

    pub fn completing(mut self, job_id: &str) -> Self {
        self.complete_jobs.push(job_id.to_string());
        self
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a new session and, atomically, the job that drives it forward.
    async fn create_session(&self, session: &CaptureSession, job: Option<&CaptureJob>)
        -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Option<CaptureSession>>;

    /// Applies `update` if the stored revision still equals `expected_revision`.
    /// Returns `false` without writing anything when the revision is stale.
    async fn update_session(&self, update: &SessionUpdate) -> Result<bool>;

    /// Sessions owned by `owner_id`, most recently started first.
    async fn list_sessions_for_owner(&self, owner_id: &str) -> Result<Vec<CaptureSession>>;

    async fn find_active_session(&self, owner_id: &str) -> Result<Option<CaptureSession>>;

    async fn list_sessions_in_states(&self, states: &[SessionState])
        -> Result<Vec<CaptureSession>>;

    async fn get_open_pause(&self, session_id: &str) -> Result<Option<PauseInterval>>;

    async fn list_pauses(&self, session_id: &str) -> Result<Vec<PauseInterval>>;

    /// Jobs whose `run_at` is at or before `now`, oldest first.
    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CaptureJob>>;

    async fn pending_jobs(&self, session_id: &str) -> Result<Vec<CaptureJob>>;

    /// Persists a job's new `run_at`, `attempts` and `last_error`.
    async fn reschedule_job(&self, job: &CaptureJob) -> Result<()>;

    async fn complete_job(&self, job_id: &str) -> Result<()>;
}
