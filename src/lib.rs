pub mod capture;
pub mod clock;
pub mod commands;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod settings;
pub mod store;

use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::io::BufReader;

use capture::{CaptureCoordinator, CaptureWorker, LifecycleTimings, SimulatedBackend};
use clock::SystemClock;
use db::Database;
use metrics::PerformanceSampler;
use settings::{config_path, load_config};

pub struct AppState {
    pub coordinator: CaptureCoordinator,
    pub sampler: PerformanceSampler,
}

pub async fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = config_path();
    let config = load_config(&config_path)?;
    info!("Loaded config from {}", config_path.display());

    let db_path = config.database_path();
    let db = Database::new(db_path.clone())
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    info!("Database ready at {}", db.path().display());

    let output_dir = config.output_dir();
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

    let coordinator = CaptureCoordinator::new(
        Arc::new(db),
        Arc::new(SimulatedBackend::new(output_dir, config.assembly_time())),
        Arc::new(SystemClock),
        LifecycleTimings::from(&config),
    );

    let report = coordinator
        .recover()
        .await
        .context("failed to recover capture sessions")?;
    if !report.requeued.is_empty() {
        warn!("Resumed background work for {} session(s)", report.requeued.len());
    }

    let state = AppState {
        coordinator: coordinator.clone(),
        sampler: PerformanceSampler::new(),
    };

    let mut worker = CaptureWorker::new();
    worker.start(
        coordinator,
        state.sampler.clone(),
        config.tick_interval(),
        config.heartbeat_every_ticks,
    )?;

    let stdin = BufReader::new(tokio::io::stdin());
    let served = commands::serve(&state, stdin, tokio::io::stdout()).await;
    if let Err(err) = &served {
        error!("Command channel failed: {err:#}");
    }

    info!("Command channel closed, shutting down");
    let stopped = worker.stop().await;
    served.and(stopped)
}
