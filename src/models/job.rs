use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deferred work that moves a session forward without a caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    /// Backend confirmation that recording began (Starting -> Recording).
    Activate,
    /// Stopped -> Processing.
    BeginProcessing,
    /// Artifact assembly (Processing -> Completed | Failed).
    Assemble,
    /// Fails a session that is still Processing when it fires.
    ProcessingDeadline,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Activate,
        JobKind::BeginProcessing,
        JobKind::Assemble,
        JobKind::ProcessingDeadline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Activate => "Activate",
            JobKind::BeginProcessing => "BeginProcessing",
            JobKind::Assemble => "Assemble",
            JobKind::ProcessingDeadline => "ProcessingDeadline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureJob {
    pub id: String,
    pub session_id: String,
    pub kind: JobKind,
    pub run_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl CaptureJob {
    pub fn new(session_id: &str, kind: JobKind, run_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            kind,
            run_at,
            attempts: 0,
            last_error: None,
        }
    }
}
