use std::collections::HashMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::{CaptureJob, CaptureSession, PauseInterval, SessionState};

use super::{SessionStore, SessionUpdate};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, CaptureSession>,
    pauses: Vec<PauseInterval>,
    jobs: HashMap<String, CaptureJob>,
}

/// Volatile store with the same contract as the SQLite database.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(sessions: &mut [CaptureSession]) {
    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(
        &self,
        session: &CaptureSession,
        job: Option<&CaptureJob>,
    ) -> Result<()> {
        let mut state = self.inner.lock().await;
        if state.sessions.contains_key(&session.id) {
            bail!("session {} already exists", session.id);
        }
        if session.state.is_active()
            && state
                .sessions
                .values()
                .any(|s| s.owner_id == session.owner_id && s.state.is_active())
        {
            bail!("owner {} already has an active session", session.owner_id);
        }

        state.sessions.insert(session.id.clone(), session.clone());
        if let Some(job) = job {
            state.jobs.insert(job.id.clone(), job.clone());
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<CaptureSession>> {
        Ok(self.inner.lock().await.sessions.get(session_id).cloned())
    }

    async fn update_session(&self, update: &SessionUpdate) -> Result<bool> {
        let mut state = self.inner.lock().await;
        let current = match state.sessions.get(&update.session.id) {
            Some(session) => session,
            None => bail!("session {} does not exist", update.session.id),
        };
        if current.revision != update.expected_revision {
            return Ok(false);
        }

        state
            .sessions
            .insert(update.session.id.clone(), update.session.clone());

        if let Some(pause) = &update.open_pause {
            state.pauses.push(pause.clone());
        }
        if let Some(closed) = &update.close_pause {
            if let Some(stored) = state.pauses.iter_mut().find(|p| p.id == closed.id) {
                *stored = closed.clone();
            }
        }
        for job in &update.enqueue {
            state.jobs.insert(job.id.clone(), job.clone());
        }
        for job_id in &update.complete_jobs {
            state.jobs.remove(job_id);
        }
        Ok(true)
    }

    async fn list_sessions_for_owner(&self, owner_id: &str) -> Result<Vec<CaptureSession>> {
        let state = self.inner.lock().await;
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| s.owner_id == owner_id)
            .cloned()
            .collect();
        newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn find_active_session(&self, owner_id: &str) -> Result<Option<CaptureSession>> {
        let state = self.inner.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.owner_id == owner_id && s.state.is_active())
            .cloned())
    }

    async fn list_sessions_in_states(
        &self,
        states: &[SessionState],
    ) -> Result<Vec<CaptureSession>> {
        let state = self.inner.lock().await;
        let mut sessions: Vec<_> = state
            .sessions
            .values()
            .filter(|s| states.contains(&s.state))
            .cloned()
            .collect();
        newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn get_open_pause(&self, session_id: &str) -> Result<Option<PauseInterval>> {
        let state = self.inner.lock().await;
        Ok(state
            .pauses
            .iter()
            .filter(|p| p.session_id == session_id && p.ended_at.is_none())
            .max_by_key(|p| p.started_at)
            .cloned())
    }

    async fn list_pauses(&self, session_id: &str) -> Result<Vec<PauseInterval>> {
        let state = self.inner.lock().await;
        let mut pauses: Vec<_> = state
            .pauses
            .iter()
            .filter(|p| p.session_id == session_id)
            .cloned()
            .collect();
        pauses.sort_by_key(|p| p.started_at);
        Ok(pauses)
    }

    async fn due_jobs(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CaptureJob>> {
        let state = self.inner.lock().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|job| job.run_at <= now)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.run_at);
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn pending_jobs(&self, session_id: &str) -> Result<Vec<CaptureJob>> {
        let state = self.inner.lock().await;
        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|job| job.session_id == session_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.run_at);
        Ok(jobs)
    }

    async fn reschedule_job(&self, job: &CaptureJob) -> Result<()> {
        let mut state = self.inner.lock().await;
        match state.jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => bail!("job {} does not exist", job.id),
        }
    }

    async fn complete_job(&self, job_id: &str) -> Result<()> {
        self.inner.lock().await.jobs.remove(job_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CaptureSettings, JobKind};

    fn session(id: &str, owner: &str) -> CaptureSession {
        CaptureSession::new(
            id.into(),
            owner.into(),
            "project".into(),
            CaptureSettings::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn stale_revision_is_rejected() {
        let store = MemoryStore::new();
        let created = session("a", "owner");
        store.create_session(&created, None).await.unwrap();

        let first = SessionUpdate::new(created.clone());
        assert!(store.update_session(&first).await.unwrap());

        let stale = SessionUpdate::new(created);
        assert!(!store.update_session(&stale).await.unwrap());

        let stored = store.get_session("a").await.unwrap().unwrap();
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn second_active_session_for_owner_is_refused() {
        let store = MemoryStore::new();
        store.create_session(&session("a", "owner"), None).await.unwrap();
        assert!(store.create_session(&session("b", "owner"), None).await.is_err());
        store.create_session(&session("c", "other"), None).await.unwrap();
    }

    #[tokio::test]
    async fn update_moves_jobs_through_the_outbox() {
        let store = MemoryStore::new();
        let s = session("a", "owner");
        let activate = CaptureJob::new("a", JobKind::Activate, s.started_at);
        store.create_session(&s, Some(&activate)).await.unwrap();
        assert_eq!(store.due_jobs(Utc::now(), 10).await.unwrap().len(), 1);

        let update = SessionUpdate::new(s).completing(&activate.id);
        store.update_session(&update).await.unwrap();
        assert!(store.pending_jobs("a").await.unwrap().is_empty());
    }
}
