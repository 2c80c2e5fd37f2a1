use std::{collections::HashSet, time::Duration};

use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use tokio::{
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{metrics::PerformanceSampler, models::CaptureJob};

use super::coordinator::CaptureCoordinator;

/// Drives the background half of the lifecycle: due jobs and recording heartbeats.
pub struct CaptureWorker {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for CaptureWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureWorker {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        coordinator: CaptureCoordinator,
        sampler: PerformanceSampler,
        tick_interval: Duration,
        heartbeat_every: u32,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("capture worker already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(worker_loop(
            coordinator,
            sampler,
            tick_interval,
            heartbeat_every.max(1),
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Stops polling and waits for in-flight jobs to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("capture worker task failed to join")
        } else {
            Ok(())
        }
    }
}

async fn worker_loop(
    coordinator: CaptureCoordinator,
    sampler: PerformanceSampler,
    tick_interval: Duration,
    heartbeat_every: u32,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut running: JoinSet<String> = JoinSet::new();
    let mut in_flight: HashSet<String> = HashSet::new();
    let mut ticks: u64 = 0;

    info!(
        "Capture worker started (tick {}ms, heartbeat every {} ticks)",
        tick_interval.as_millis(),
        heartbeat_every
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ticks += 1;
                dispatch_due_jobs(&coordinator, &mut running, &mut in_flight).await;

                if ticks % heartbeat_every as u64 == 0 {
                    let sample = sampler.sample().await;
                    match coordinator.record_heartbeat(&sample).await {
                        Ok(0) => {}
                        Ok(count) => debug!(
                            "Heartbeat: cpu {:.1}% mem {:.1}MB across {count} recording session(s)",
                            sample.cpu_percent, sample.memory_mb
                        ),
                        Err(err) => warn!("Recording heartbeat failed: {err:#}"),
                    }
                }
            }
            Some(finished) = running.join_next(), if !running.is_empty() => {
                match finished {
                    Ok(job_id) => {
                        in_flight.remove(&job_id);
                    }
                    Err(err) => error!("Capture job task aborted: {err}"),
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Capture worker shutting down, waiting on {} job(s)", running.len());
                break;
            }
        }
    }

    while let Some(finished) = running.join_next().await {
        if let Err(err) = finished {
            error!("Capture job task aborted during shutdown: {err}");
        }
    }
}

async fn dispatch_due_jobs(
    coordinator: &CaptureCoordinator,
    running: &mut JoinSet<String>,
    in_flight: &mut HashSet<String>,
) {
    let jobs = match coordinator.due_jobs().await {
        Ok(jobs) => jobs,
        Err(err) => {
            error!("Failed to poll capture jobs: {err:#}");
            return;
        }
    };

    for job in jobs {
        if !in_flight.insert(job.id.clone()) {
            continue;
        }
        running.spawn(run_isolated(coordinator.clone(), job));
    }
}

/// Runs one job in its own task so a panic inside it still hands back the job id.
async fn run_isolated(coordinator: CaptureCoordinator, job: CaptureJob) -> String {
    let job_id = job.id.clone();
    let kind = job.kind;
    let session_id = job.session_id.clone();

    match tokio::spawn(async move { coordinator.run_job(job).await }).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("{kind} job {job_id} for session {session_id} failed: {err:#}"),
        Err(err) => error!("{kind} job {job_id} for session {session_id} aborted: {err}"),
    }
    job_id
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        capture::{
            backend::{Artifact, CaptureBackend, SimulatedBackend},
            coordinator::LifecycleTimings,
        },
        clock::SystemClock,
        models::{Caller, CaptureSession, CaptureSettings, SessionState, SubscriptionTier},
        store::{MemoryStore, SessionStore},
    };

    #[tokio::test]
    async fn worker_drives_a_session_to_completion() {
        let timings = LifecycleTimings {
            start_delay: chrono::Duration::milliseconds(20),
            processing_delay: chrono::Duration::milliseconds(20),
            ..LifecycleTimings::default()
        };
        let coordinator = CaptureCoordinator::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SimulatedBackend::new("/videos".into(), Duration::ZERO)),
            Arc::new(SystemClock),
            timings,
        );
        let caller = Caller::new("owner", SubscriptionTier::Pro);

        let mut worker = CaptureWorker::new();
        worker
            .start(
                coordinator.clone(),
                PerformanceSampler::new(),
                Duration::from_millis(10),
                1,
            )
            .unwrap();
        assert!(worker.start(
            coordinator.clone(),
            PerformanceSampler::new(),
            Duration::from_millis(10),
            1,
        )
        .is_err());

        let session = coordinator
            .start(&caller, "project", CaptureSettings::default())
            .await
            .unwrap();

        wait_for(&coordinator, &session.id, SessionState::Recording).await;
        coordinator.stop(&session.id, "owner").await.unwrap();
        wait_for(&coordinator, &session.id, SessionState::Completed).await;

        worker.stop().await.unwrap();
        assert!(!worker.is_running());
    }

    struct PanickingRecorder;

    #[async_trait::async_trait]
    impl CaptureBackend for PanickingRecorder {
        async fn begin(&self, _session: &CaptureSession) -> anyhow::Result<()> {
            panic!("recorder crashed");
        }

        async fn assemble(&self, _session: &CaptureSession) -> anyhow::Result<Artifact> {
            anyhow::bail!("nothing recorded")
        }
    }

    #[tokio::test]
    async fn panicking_job_hands_back_its_id() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = CaptureCoordinator::new(
            store.clone(),
            Arc::new(PanickingRecorder),
            Arc::new(SystemClock),
            LifecycleTimings::default(),
        );
        let session = coordinator
            .start(
                &Caller::new("owner", SubscriptionTier::Pro),
                "project",
                CaptureSettings::default(),
            )
            .await
            .unwrap();
        let job = store.pending_jobs(&session.id).await.unwrap().remove(0);

        let returned = run_isolated(coordinator.clone(), job.clone()).await;
        assert_eq!(returned, job.id);

        // The job is still queued, so it can be dispatched again.
        let pending = store.pending_jobs(&session.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, job.id);
    }

    async fn wait_for(coordinator: &CaptureCoordinator, id: &str, state: SessionState) {
        for _ in 0..200 {
            if coordinator.get(id, "owner").await.unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {id} never reached {state}");
    }
}
