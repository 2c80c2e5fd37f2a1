use std::{sync::Arc, time::Duration as StdDuration};

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    capture::{
        backend::CaptureBackend,
        entitlement,
        locks::KeyedLocks,
        state::{self, Transition},
    },
    clock::Clock,
    error::{ActiveSessionRef, CaptureError, CaptureResult},
    metrics::SystemSample,
    models::{
        CaptureJob, CaptureSession, CaptureSettings, Caller, JobKind, PauseInterval, SessionState,
    },
    settings::CaptureConfig,
    store::{SessionStore, SessionUpdate},
};

/// Delays and retry policy for the background half of the lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleTimings {
    pub start_delay: Duration,
    pub processing_delay: Duration,
    pub processing_deadline: Duration,
    pub max_assembly_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub job_batch_size: usize,
}

impl Default for LifecycleTimings {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for LifecycleTimings {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            start_delay: millis(config.start_delay_ms),
            processing_delay: millis(config.processing_delay_ms),
            processing_deadline: seconds(config.processing_deadline_secs),
            max_assembly_attempts: config.max_assembly_attempts.max(1),
            backoff_base: millis(config.retry_backoff_base_ms),
            backoff_max: millis(config.retry_backoff_max_ms),
            job_batch_size: config.job_batch_size.max(1),
        }
    }
}

/// Upper bound for any configured delay; keeps `now + delay` representable.
const MAX_CONFIGURED_DELAY_DAYS: i64 = 365;

fn millis(value: u64) -> Duration {
    clamp_delay(Duration::from_std(StdDuration::from_millis(value)).ok())
}

fn seconds(value: u64) -> Duration {
    clamp_delay(i64::try_from(value).ok().and_then(Duration::try_seconds))
}

fn clamp_delay(value: Option<Duration>) -> Duration {
    let max = Duration::days(MAX_CONFIGURED_DELAY_DAYS);
    value.map_or(max, |delay| delay.min(max))
}

impl LifecycleTimings {
    /// Exponential backoff for the `attempt`-th retry (1-based), capped, with up to 25% jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_ms = self.backoff_base.num_milliseconds().max(0);
        let capped = base_ms
            .saturating_mul(1_i64 << exponent)
            .min(self.backoff_max.num_milliseconds().max(0));
        let jitter = if capped >= 4 {
            rand::thread_rng().gen_range(0..=capped / 4)
        } else {
            0
        };
        Duration::milliseconds(capped.saturating_sub(jitter))
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    /// Sessions whose driving job was missing and had to be enqueued again.
    pub requeued: Vec<String>,
    /// Jobs already past their `run_at` when the process came up.
    pub overdue_jobs: usize,
}

struct CoordinatorInner {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn CaptureBackend>,
    clock: Arc<dyn Clock>,
    timings: LifecycleTimings,
    session_locks: KeyedLocks,
    owner_locks: KeyedLocks,
}

/// Sequences session transitions for callers and for the background worker.
///
/// Every mutation of a session happens while holding that session's lock and
/// is written with a compare-and-swap on `revision`.
#[derive(Clone)]
pub struct CaptureCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl CaptureCoordinator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn CaptureBackend>,
        clock: Arc<dyn Clock>,
        timings: LifecycleTimings,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                backend,
                clock,
                timings,
                session_locks: KeyedLocks::new(),
                owner_locks: KeyedLocks::new(),
            }),
        }
    }

    fn store(&self) -> &dyn SessionStore {
        self.inner.store.as_ref()
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub async fn start(
        &self,
        caller: &Caller,
        project_id: &str,
        settings: CaptureSettings,
    ) -> CaptureResult<CaptureSession> {
        if project_id.trim().is_empty() {
            return Err(CaptureError::InvalidSettings("project id is required".into()));
        }
        settings.validate().map_err(CaptureError::InvalidSettings)?;
        entitlement::require(settings.quality, caller.subscription)?;

        let _owner_guard = self.inner.owner_locks.lock(&caller.owner_id).await;

        if let Some(active) = self.store().find_active_session(&caller.owner_id).await? {
            return Err(CaptureError::Conflict {
                active: ActiveSessionRef {
                    id: active.id,
                    project_id: active.project_id,
                    state: active.state,
                    started_at: active.started_at,
                },
            });
        }

        let now = self.now();
        let session = CaptureSession::new(
            Uuid::new_v4().to_string(),
            caller.owner_id.clone(),
            project_id.to_string(),
            settings,
            now,
        );
        let activate = CaptureJob::new(
            &session.id,
            JobKind::Activate,
            now + self.inner.timings.start_delay,
        );

        self.store()
            .create_session(&session, Some(&activate))
            .await
            .context("failed to create capture session")?;

        info!(
            "Capture session {} started for owner {} (project {}, {} @ {}fps)",
            session.id,
            session.owner_id,
            session.project_id,
            session.settings.quality,
            session.settings.fps
        );

        Ok(session)
    }

    pub async fn pause(&self, session_id: &str, owner_id: &str) -> CaptureResult<CaptureSession> {
        let _guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load_owned(session_id, owner_id).await?;
        let now = self.now();

        state::apply(&mut session, Transition::Pause, now)?;

        let mut update = SessionUpdate::new(session);
        update.open_pause = Some(PauseInterval::open(
            Uuid::new_v4().to_string(),
            session_id.to_string(),
            now,
        ));
        let session = self.commit(update).await?;

        info!("Capture session {} paused", session.id);
        Ok(session)
    }

    pub async fn resume(&self, session_id: &str, owner_id: &str) -> CaptureResult<CaptureSession> {
        let _guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load_owned(session_id, owner_id).await?;
        let now = self.now();

        state::apply(&mut session, Transition::Resume, now)?;

        let closed = self.close_open_pause(&mut session, now).await?;
        let mut update = SessionUpdate::new(session);
        update.close_pause = closed;
        let session = self.commit(update).await?;

        info!(
            "Capture session {} resumed ({}s paused so far)",
            session.id, session.paused_seconds
        );
        Ok(session)
    }

    pub async fn stop(&self, session_id: &str, owner_id: &str) -> CaptureResult<CaptureSession> {
        let _guard = self.inner.session_locks.lock(session_id).await;
        let mut session = self.load_owned(session_id, owner_id).await?;
        let now = self.now();

        state::apply(&mut session, Transition::Stop, now)?;

        let ended_at = session.ended_at.unwrap_or(now);
        let closed = self.close_open_pause(&mut session, ended_at).await?;
        let begin_processing = CaptureJob::new(
            session_id,
            JobKind::BeginProcessing,
            now + self.inner.timings.processing_delay,
        );

        let mut update = SessionUpdate::new(session).enqueue(begin_processing);
        update.close_pause = closed;
        let session = self.commit(update).await?;

        info!(
            "Capture session {} stopped after {}s ({}s paused)",
            session.id, session.duration_seconds, session.paused_seconds
        );
        Ok(session)
    }

    /// Current view of a session. Live sessions get their duration recomputed
    /// on every read; nothing is written back.
    pub async fn get(&self, session_id: &str, owner_id: &str) -> CaptureResult<CaptureSession> {
        let session = self.load_owned(session_id, owner_id).await?;
        self.with_live_duration(session).await
    }

    /// Every session of `owner_id`, most recently started first.
    pub async fn list(&self, owner_id: &str) -> CaptureResult<Vec<CaptureSession>> {
        let sessions = self.store().list_sessions_for_owner(owner_id).await?;
        let mut result = Vec::with_capacity(sessions.len());
        for session in sessions {
            result.push(self.with_live_duration(session).await?);
        }
        Ok(result)
    }

    pub async fn pauses(&self, session_id: &str, owner_id: &str) -> CaptureResult<Vec<PauseInterval>> {
        self.load_owned(session_id, owner_id).await?;
        Ok(self.store().list_pauses(session_id).await?)
    }

    async fn load_owned(&self, session_id: &str, owner_id: &str) -> CaptureResult<CaptureSession> {
        match self.store().get_session(session_id).await? {
            Some(session) if session.owner_id == owner_id => Ok(session),
            _ => Err(CaptureError::NotFound(session_id.to_string())),
        }
    }

    async fn with_live_duration(&self, mut session: CaptureSession) -> CaptureResult<CaptureSession> {
        if !session.state.is_live() {
            return Ok(session);
        }

        let now = self.now();
        session.duration_seconds = session.elapsed_seconds(now);
        if session.state == SessionState::Paused {
            if let Some(open) = self.store().get_open_pause(&session.id).await? {
                let open_seconds = (now - open.started_at).num_seconds().max(0) as u64;
                session.paused_seconds += open_seconds;
            }
        }
        Ok(session)
    }

    async fn close_open_pause(
        &self,
        session: &mut CaptureSession,
        ended_at: DateTime<Utc>,
    ) -> CaptureResult<Option<PauseInterval>> {
        let open = self.store().get_open_pause(&session.id).await?;
        Ok(open.map(|mut pause| {
            session.paused_seconds += pause.close(ended_at);
            pause
        }))
    }

    async fn commit(&self, update: SessionUpdate) -> CaptureResult<CaptureSession> {
        if self.store().update_session(&update).await? {
            Ok(update.session)
        } else {
            Err(CaptureError::StaleWrite {
                session_id: update.session.id,
                expected: update.expected_revision,
            })
        }
    }

    pub async fn due_jobs(&self) -> CaptureResult<Vec<CaptureJob>> {
        Ok(self
            .store()
            .due_jobs(self.now(), self.inner.timings.job_batch_size)
            .await?)
    }

    /// Runs every job that is due right now, one after another. Returns how many ran.
    pub async fn run_due_jobs(&self) -> CaptureResult<usize> {
        let jobs = self.due_jobs().await?;
        let count = jobs.len();
        for job in jobs {
            let job_id = job.id.clone();
            if let Err(err) = self.run_job(job).await {
                error!("Capture job {job_id} failed: {err:#}");
            }
        }
        Ok(count)
    }

    pub async fn run_job(&self, job: CaptureJob) -> CaptureResult<()> {
        let _guard = self.inner.session_locks.lock(&job.session_id).await;

        let session = match self.store().get_session(&job.session_id).await? {
            Some(session) => session,
            None => {
                warn!(
                    "Dropping {} job {} for missing session {}",
                    job.kind, job.id, job.session_id
                );
                self.store().complete_job(&job.id).await?;
                return Ok(());
            }
        };

        let expected = match job.kind {
            JobKind::Activate => SessionState::Starting,
            JobKind::BeginProcessing => SessionState::Stopped,
            JobKind::Assemble | JobKind::ProcessingDeadline => SessionState::Processing,
        };
        if session.state != expected {
            debug!(
                "Discarding {} job for session {} now in {}",
                job.kind, session.id, session.state
            );
            self.store().complete_job(&job.id).await?;
            return Ok(());
        }

        match job.kind {
            JobKind::Activate => self.activate(session, job).await,
            JobKind::BeginProcessing => self.begin_processing(session, job).await,
            JobKind::Assemble => self.assemble(session, job).await,
            JobKind::ProcessingDeadline => {
                let message = format!(
                    "processing deadline exceeded after {}s",
                    self.inner.timings.processing_deadline.num_seconds()
                );
                self.fail(session, &job, message).await
            }
        }
    }

    async fn activate(&self, mut session: CaptureSession, job: CaptureJob) -> CaptureResult<()> {
        if let Err(err) = self.inner.backend.begin(&session).await {
            let mut retry = job;
            retry.attempts += 1;
            retry.run_at = self.now() + self.inner.timings.backoff_for(retry.attempts);
            retry.last_error = Some(format!("{err:#}"));
            if retry.attempts >= self.inner.timings.max_assembly_attempts {
                // Starting has no exit but Recording, so the owner stays blocked until it confirms.
                error!(
                    "Recorder still has not confirmed session {} after {} attempts, owner {} is blocked: {err:#}",
                    session.id, retry.attempts, session.owner_id
                );
            } else {
                warn!(
                    "Recorder did not confirm session {} (attempt {}): {err:#}",
                    session.id, retry.attempts
                );
            }
            self.store().reschedule_job(&retry).await?;
            return Ok(());
        }

        state::apply(&mut session, Transition::Activate, self.now())?;
        let session = self
            .commit(SessionUpdate::new(session).completing(&job.id))
            .await?;
        info!("Capture session {} is recording", session.id);
        Ok(())
    }

    async fn begin_processing(&self, mut session: CaptureSession, job: CaptureJob) -> CaptureResult<()> {
        let now = self.now();
        state::apply(&mut session, Transition::BeginProcessing, now)?;

        let assemble = CaptureJob::new(&session.id, JobKind::Assemble, now);
        let deadline = CaptureJob::new(
            &session.id,
            JobKind::ProcessingDeadline,
            now + self.inner.timings.processing_deadline,
        );
        let update = SessionUpdate::new(session)
            .enqueue(assemble)
            .enqueue(deadline)
            .completing(&job.id);
        let session = self.commit(update).await?;

        info!("Capture session {} is processing", session.id);
        Ok(())
    }

    async fn assemble(&self, mut session: CaptureSession, job: CaptureJob) -> CaptureResult<()> {
        session.assembly_attempts += 1;
        let attempt = session.assembly_attempts;

        match self.inner.backend.assemble(&session).await {
            Ok(artifact) => {
                let now = self.now();
                state::apply(&mut session, Transition::Complete(artifact), now)?;
                let update = self.finishing(session, &job.id).await?;
                let session = self.commit(update).await?;
                info!(
                    "Capture session {} completed: {} ({} bytes, {} frames, {} dropped)",
                    session.id,
                    session.output_path.as_deref().unwrap_or_default(),
                    session.file_size_bytes,
                    session.frames_captured,
                    session.frames_dropped
                );
                Ok(())
            }
            Err(err) if attempt >= self.inner.timings.max_assembly_attempts => {
                error!(
                    "Assembly for session {} failed on final attempt {attempt}: {err:#}",
                    session.id
                );
                let message = format!("assembly failed after {attempt} attempts: {err:#}");
                self.fail(session, &job, message).await
            }
            Err(err) => {
                let delay = self.inner.timings.backoff_for(attempt);
                warn!(
                    "Assembly for session {} failed (attempt {attempt}), retrying in {}ms: {err:#}",
                    session.id,
                    delay.num_milliseconds()
                );
                let mut retry = CaptureJob::new(&session.id, JobKind::Assemble, self.now() + delay);
                retry.attempts = job.attempts + 1;
                retry.last_error = Some(format!("{err:#}"));

                session.updated_at = self.now();
                let update = SessionUpdate::new(session).enqueue(retry).completing(&job.id);
                self.commit(update).await?;
                Ok(())
            }
        }
    }

    async fn fail(&self, mut session: CaptureSession, job: &CaptureJob, message: String) -> CaptureResult<()> {
        state::apply(&mut session, Transition::Fail(message), self.now())?;
        let update = self.finishing(session, &job.id).await?;
        let session = self.commit(update).await?;
        warn!(
            "Capture session {} failed: {}",
            session.id,
            session.error_message.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    /// Terminal update that also clears every job still queued for the session.
    async fn finishing(&self, session: CaptureSession, job_id: &str) -> CaptureResult<SessionUpdate> {
        if !session.state.is_terminal() {
            return Err(anyhow::anyhow!(
                "session {} is {}, not finished",
                session.id,
                session.state
            )
            .into());
        }
        let pending = self.store().pending_jobs(&session.id).await?;
        let mut update = SessionUpdate::new(session).completing(job_id);
        for job in pending {
            if job.id != job_id {
                update = update.completing(&job.id);
            }
        }
        Ok(update)
    }

    /// Folds a process sample into every session that is currently recording.
    pub async fn record_heartbeat(&self, sample: &SystemSample) -> CaptureResult<usize> {
        let recording = self
            .store()
            .list_sessions_in_states(&[SessionState::Recording])
            .await?;

        let mut updated = 0;
        for candidate in recording {
            let _guard = self.inner.session_locks.lock(&candidate.id).await;
            let mut session = match self.store().get_session(&candidate.id).await? {
                Some(session) if session.state == SessionState::Recording => session,
                _ => continue,
            };

            let fps = session.settings.fps as f32;
            session
                .performance
                .record_sample(sample.cpu_percent, sample.memory_mb, fps);
            session.updated_at = self.now();
            self.commit(SessionUpdate::new(session)).await?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Makes sure every session that still has background work owns a job for it.
    pub async fn recover(&self) -> CaptureResult<RecoveryReport> {
        let now = self.now();
        let mut report = RecoveryReport::default();

        let stranded = self
            .store()
            .list_sessions_in_states(&[
                SessionState::Starting,
                SessionState::Stopped,
                SessionState::Processing,
            ])
            .await?;

        for candidate in stranded {
            let _guard = self.inner.session_locks.lock(&candidate.id).await;
            let session = match self.store().get_session(&candidate.id).await? {
                Some(session) => session,
                None => continue,
            };
            let pending = self.store().pending_jobs(&session.id).await?;
            let has = |kind: JobKind| pending.iter().any(|job| job.kind == kind);

            let mut missing = Vec::new();
            match session.state {
                SessionState::Starting if !has(JobKind::Activate) => {
                    missing.push(CaptureJob::new(&session.id, JobKind::Activate, now));
                }
                SessionState::Stopped if !has(JobKind::BeginProcessing) => {
                    missing.push(CaptureJob::new(&session.id, JobKind::BeginProcessing, now));
                }
                SessionState::Processing => {
                    if !has(JobKind::Assemble) {
                        missing.push(CaptureJob::new(&session.id, JobKind::Assemble, now));
                    }
                    if !has(JobKind::ProcessingDeadline) {
                        let started = session.processing_started_at.unwrap_or(now);
                        missing.push(CaptureJob::new(
                            &session.id,
                            JobKind::ProcessingDeadline,
                            started + self.inner.timings.processing_deadline,
                        ));
                    }
                }
                _ => {}
            }

            if missing.is_empty() {
                continue;
            }

            warn!(
                "Recovered session {} in {} state; re-enqueued {} job(s)",
                session.id,
                session.state,
                missing.len()
            );
            let id = session.id.clone();
            let mut update = SessionUpdate::new(session);
            update.enqueue = missing;
            self.commit(update).await?;
            report.requeued.push(id);
        }

        report.overdue_jobs = self
            .store()
            .due_jobs(now, usize::MAX >> 1)
            .await?
            .len();

        if report.overdue_jobs > 0 || !report.requeued.is_empty() {
            warn!(
                "Recovery: {} session(s) re-enqueued, {} job(s) overdue",
                report.requeued.len(),
                report.overdue_jobs
            );
        }
        Ok(report)
    }
}
