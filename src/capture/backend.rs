use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::models::CaptureSession;

const AUDIO_BITRATE_BPS: u64 = 128_000;

/// Output of a successful assembly run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub output_path: String,
    pub file_size_bytes: u64,
    pub frames_captured: u64,
    pub frames_dropped: u64,
}

/// The recorder and encoder a session drives. Errors from `assemble` are retried.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Resolves once the recorder confirms frames are flowing.
    async fn begin(&self, session: &CaptureSession) -> Result<()>;

    async fn assemble(&self, session: &CaptureSession) -> Result<Artifact>;
}

/// Stand-in recorder: waits a fixed time and sizes the artifact from the settings.
pub struct SimulatedBackend {
    output_dir: PathBuf,
    assembly_time: Duration,
}

impl SimulatedBackend {
    pub fn new(output_dir: PathBuf, assembly_time: Duration) -> Self {
        Self {
            output_dir,
            assembly_time,
        }
    }
}

#[async_trait]
impl CaptureBackend for SimulatedBackend {
    async fn begin(&self, session: &CaptureSession) -> Result<()> {
        debug!(
            "simulated recorder started for session {} at {} {}fps",
            session.id, session.settings.quality, session.settings.fps
        );
        Ok(())
    }

    async fn assemble(&self, session: &CaptureSession) -> Result<Artifact> {
        if session.ended_at.is_none() {
            bail!("session {} has no end timestamp", session.id);
        }

        if !self.assembly_time.is_zero() {
            tokio::time::sleep(self.assembly_time).await;
        }

        let active_seconds = session.active_seconds();
        let expected_frames = active_seconds.saturating_mul(u64::from(session.settings.fps));
        let frames_dropped = if expected_frames == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=expected_frames / 200)
        };

        let mut bitrate = session.settings.quality.bitrate_bps();
        if session.settings.include_audio {
            bitrate += AUDIO_BITRATE_BPS;
        }

        let output_path = self.output_dir.join(format!("{}.mp4", session.id));

        Ok(Artifact {
            output_path: output_path.to_string_lossy().into_owned(),
            file_size_bytes: bitrate.saturating_mul(active_seconds) / 8,
            frames_captured: expected_frames - frames_dropped,
            frames_dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use crate::models::{CaptureSettings, Quality};

    fn stopped_session(seconds: i64, paused: u64) -> CaptureSession {
        let start = Utc::now();
        let mut session = CaptureSession::new(
            "abc".into(),
            "owner".into(),
            "project".into(),
            CaptureSettings {
                quality: Quality::Hd720,
                fps: 30,
                include_audio: false,
                ..CaptureSettings::default()
            },
            start,
        );
        session.ended_at = Some(start + ChronoDuration::seconds(seconds));
        session.duration_seconds = seconds as u64;
        session.paused_seconds = paused;
        session
    }

    #[tokio::test]
    async fn sizes_artifact_from_active_time() {
        let backend = SimulatedBackend::new(PathBuf::from("/videos"), Duration::ZERO);
        let artifact = backend.assemble(&stopped_session(100, 40)).await.unwrap();

        assert_eq!(artifact.output_path, "/videos/abc.mp4");
        assert_eq!(artifact.file_size_bytes, 5_000_000 * 60 / 8);
        assert_eq!(artifact.frames_captured + artifact.frames_dropped, 60 * 30);
        assert!(artifact.frames_dropped <= 60 * 30 / 200);
    }

    #[tokio::test]
    async fn refuses_sessions_that_never_stopped() {
        let backend = SimulatedBackend::new(PathBuf::from("/videos"), Duration::ZERO);
        let mut session = stopped_session(10, 0);
        session.ended_at = None;
        assert!(backend.assemble(&session).await.is_err());
    }
}
