use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Starting,
    Recording,
    Paused,
    Stopped,
    Processing,
    Completed,
    Failed,
}

impl SessionState {
    pub const ALL: [SessionState; 7] = [
        SessionState::Starting,
        SessionState::Recording,
        SessionState::Paused,
        SessionState::Stopped,
        SessionState::Processing,
        SessionState::Completed,
        SessionState::Failed,
    ];

    /// States that count against the one-active-session-per-owner rule.
    pub const ACTIVE: [SessionState; 3] = [
        SessionState::Starting,
        SessionState::Recording,
        SessionState::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "Starting",
            SessionState::Recording => "Recording",
            SessionState::Paused => "Paused",
            SessionState::Stopped => "Stopped",
            SessionState::Processing => "Processing",
            SessionState::Completed => "Completed",
            SessionState::Failed => "Failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == value)
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    /// Whether the wall clock is still running for this session.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Recording | SessionState::Paused)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quality {
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    Hd1080,
    #[serde(rename = "1440p")]
    Qhd1440,
    #[serde(rename = "4k")]
    Uhd4k,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Hd1080
    }
}

impl Quality {
    pub const ALL: [Quality; 4] = [
        Quality::Hd720,
        Quality::Hd1080,
        Quality::Qhd1440,
        Quality::Uhd4k,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Hd720 => "720p",
            Quality::Hd1080 => "1080p",
            Quality::Qhd1440 => "1440p",
            Quality::Uhd4k => "4k",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|quality| quality.as_str() == value)
    }

    /// Nominal encoder bitrate, used to size assembled artifacts.
    pub fn bitrate_bps(&self) -> u64 {
        match self {
            Quality::Hd720 => 5_000_000,
            Quality::Hd1080 => 8_000_000,
            Quality::Qhd1440 => 16_000_000,
            Quality::Uhd4k => 35_000_000,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const MIN_FPS: u32 = 15;
pub const MAX_FPS: u32 = 60;
pub const MIN_REGION_EDGE: u32 = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    pub quality: Quality,
    pub fps: u32,
    pub include_audio: bool,
    pub enable_privacy_filter: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_region: Option<CaptureRegion>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            fps: 30,
            include_audio: true,
            enable_privacy_filter: true,
            capture_region: None,
        }
    }
}

impl CaptureSettings {
    /// Checks the bounds a recorder can honour. Returns a human readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_FPS..=MAX_FPS).contains(&self.fps) {
            return Err(format!(
                "fps must be between {MIN_FPS} and {MAX_FPS}, got {}",
                self.fps
            ));
        }

        if let Some(region) = &self.capture_region {
            if region.width < MIN_REGION_EDGE || region.height < MIN_REGION_EDGE {
                return Err(format!(
                    "capture region must be at least {MIN_REGION_EDGE}x{MIN_REGION_EDGE}, got {}x{}",
                    region.width, region.height
                ));
            }
        }

        Ok(())
    }
}

/// Running averages of process resource usage while recording.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceStats {
    pub avg_cpu_usage: f32,
    pub avg_memory_mb: f64,
    pub avg_fps: f32,
    pub samples: u32,
}

impl PerformanceStats {
    pub fn record_sample(&mut self, cpu_percent: f32, memory_mb: f64, fps: f32) {
        let n = self.samples as f64;
        let next = n + 1.0;
        self.avg_cpu_usage = ((self.avg_cpu_usage as f64 * n + cpu_percent as f64) / next) as f32;
        self.avg_memory_mb = (self.avg_memory_mb * n + memory_mb) / next;
        self.avg_fps = ((self.avg_fps as f64 * n + fps as f64) / next) as f32;
        self.samples = self.samples.saturating_add(1);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub id: String,
    pub owner_id: String,
    pub project_id: String,
    pub state: SessionState,
    pub settings: CaptureSettings,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub paused_seconds: u64,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub file_size_bytes: u64,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
    pub assembly_attempts: u32,
    pub performance: PerformanceStats,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaptureSession {
    pub fn new(
        id: String,
        owner_id: String,
        project_id: String,
        settings: CaptureSettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            project_id,
            state: SessionState::Starting,
            settings,
            started_at: now,
            ended_at: None,
            processing_started_at: None,
            duration_seconds: 0,
            paused_seconds: 0,
            frames_captured: 0,
            frames_dropped: 0,
            file_size_bytes: 0,
            output_path: None,
            error_message: None,
            assembly_attempts: 0,
            performance: PerformanceStats::default(),
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Wall-clock seconds between `started_at` and `until`, floored and never negative.
    pub fn elapsed_seconds(&self, until: DateTime<Utc>) -> u64 {
        (until - self.started_at).num_seconds().max(0) as u64
    }

    /// Recorded time with paused intervals removed.
    pub fn active_seconds(&self) -> u64 {
        self.duration_seconds.saturating_sub(self.paused_seconds)
    }
}
