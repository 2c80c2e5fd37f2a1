use std::{path::Path, sync::Arc, time::Duration as StdDuration};

use chrono::{Duration, Utc};
use dailydoco_capture_lib::{
    capture::{CaptureCoordinator, LifecycleTimings, SimulatedBackend},
    clock::{Clock, ManualClock},
    db::Database,
    error::CaptureError,
    models::{Caller, CaptureSettings, JobKind, Quality, SessionState, SubscriptionTier},
};

fn timings() -> LifecycleTimings {
    LifecycleTimings {
        start_delay: Duration::seconds(2),
        processing_delay: Duration::seconds(1),
        processing_deadline: Duration::minutes(15),
        max_assembly_attempts: 3,
        backoff_base: Duration::seconds(2),
        backoff_max: Duration::seconds(60),
        job_batch_size: 32,
    }
}

fn open(path: &Path, clock: Arc<ManualClock>) -> (CaptureCoordinator, Database) {
    let db = Database::new(path.join("capture.sqlite3")).unwrap();
    let coordinator = CaptureCoordinator::new(
        Arc::new(db.clone()),
        Arc::new(SimulatedBackend::new(path.join("videos"), StdDuration::ZERO)),
        clock,
        timings(),
    );
    (coordinator, db)
}

async fn drain(coordinator: &CaptureCoordinator) {
    while coordinator.run_due_jobs().await.unwrap() > 0 {}
}

#[tokio::test]
async fn full_lifecycle_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (coordinator, db) = open(dir.path(), clock.clone());
    let caller = Caller::new("owner-1", SubscriptionTier::Team);
    let settings = CaptureSettings {
        quality: Quality::Uhd4k,
        ..CaptureSettings::default()
    };

    let session = coordinator.start(&caller, "project-1", settings).await.unwrap();
    assert_eq!(session.state, SessionState::Starting);

    let err = coordinator
        .start(&caller, "project-2", CaptureSettings::default())
        .await
        .unwrap_err();
    match err {
        CaptureError::Conflict { active } => assert_eq!(active.id, session.id),
        other => panic!("expected conflict, got {other:?}"),
    }

    clock.advance(Duration::seconds(2));
    drain(&coordinator).await;
    clock.advance(Duration::seconds(4));
    coordinator.pause(&session.id, "owner-1").await.unwrap();
    clock.advance(Duration::seconds(6));
    coordinator.resume(&session.id, "owner-1").await.unwrap();
    clock.advance(Duration::seconds(8));
    let stopped = coordinator.stop(&session.id, "owner-1").await.unwrap();
    assert_eq!(stopped.duration_seconds, 20);
    assert_eq!(stopped.paused_seconds, 6);

    clock.advance(Duration::seconds(1));
    drain(&coordinator).await;

    let done = coordinator.get(&session.id, "owner-1").await.unwrap();
    assert_eq!(done.state, SessionState::Completed);
    assert!(done.output_path.unwrap().ends_with(&format!("{}.mp4", session.id)));
    assert_eq!(done.frames_captured + done.frames_dropped, 14 * 30);
    assert!(db.pending_jobs(&session.id).await.unwrap().is_empty());

    let pauses = db.list_pauses(&session.id).await.unwrap();
    assert_eq!(pauses.len(), 1);
    assert_eq!(pauses[0].duration_seconds, Some(6));

    // The slot is free again once the first session has left the active states.
    coordinator
        .start(&caller, "project-2", CaptureSettings::default())
        .await
        .unwrap();
    assert_eq!(coordinator.list("owner-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn restart_resumes_background_work() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let caller = Caller::new("owner-1", SubscriptionTier::Pro);

    let session_id = {
        let (coordinator, _db) = open(dir.path(), clock.clone());
        let session = coordinator
            .start(&caller, "project-1", CaptureSettings::default())
            .await
            .unwrap();
        clock.advance(Duration::seconds(2));
        drain(&coordinator).await;
        clock.advance(Duration::seconds(10));
        coordinator.stop(&session.id, "owner-1").await.unwrap();
        session.id
    };

    // Process went away before the processing delay elapsed.
    clock.advance(Duration::minutes(5));
    let (coordinator, db) = open(dir.path(), clock.clone());

    let stored = db.get_session(&session_id).await.unwrap().unwrap();
    assert_eq!(stored.state, SessionState::Stopped);
    let pending = db.pending_jobs(&session_id).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, JobKind::BeginProcessing);

    let report = coordinator.recover().await.unwrap();
    assert!(report.requeued.is_empty());
    assert_eq!(report.overdue_jobs, 1);

    drain(&coordinator).await;
    let done = coordinator.get(&session_id, "owner-1").await.unwrap();
    assert_eq!(done.state, SessionState::Completed);
    assert_eq!(done.duration_seconds, 12);
    assert!(done.processing_started_at.unwrap() >= clock.now() - Duration::seconds(1));
}

#[tokio::test]
async fn concurrent_starts_admit_exactly_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let (coordinator, db) = open(dir.path(), clock);

    let mut handles = Vec::new();
    for n in 0..8 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            let caller = Caller::new("owner-1", SubscriptionTier::Pro);
            coordinator
                .start(&caller, &format!("project-{n}"), CaptureSettings::default())
                .await
        }));
    }

    let mut started = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => started += 1,
            Err(err) => assert_eq!(err.kind(), "Conflict"),
        }
    }
    assert_eq!(started, 1);
    assert!(db.find_active_session("owner-1").await.unwrap().is_some());
}
