//! Legal lifecycle transitions for a capture session.
//!
//! ```text
//! Starting -> Recording <-> Paused
//!                 \          /
//!                  -> Stopped -> Processing -> Completed
//!                                          \-> Failed
//! ```
//!
//! Every mutation of `CaptureSession::state` goes through [`apply`], which also
//! stamps the fields that belong to the target state.

use chrono::{DateTime, Utc};

use crate::{
    capture::backend::Artifact,
    error::{CaptureError, CaptureResult},
    models::{CaptureSession, SessionState},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The capture backend confirmed that frames are flowing.
    Activate,
    Pause,
    Resume,
    Stop,
    BeginProcessing,
    Complete(Artifact),
    Fail(String),
}

impl Transition {
    pub fn action(&self) -> &'static str {
        match self {
            Transition::Activate => "activate",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Stop => "stop",
            Transition::BeginProcessing => "process",
            Transition::Complete(_) => "complete",
            Transition::Fail(_) => "fail",
        }
    }
}

/// Target state for `transition` out of `from`, or `None` when the edge does not exist.
pub fn next_state(from: SessionState, transition: &Transition) -> Option<SessionState> {
    use SessionState::*;

    match (from, transition) {
        (Starting, Transition::Activate) => Some(Recording),
        (Recording, Transition::Pause) => Some(Paused),
        (Paused, Transition::Resume) => Some(Recording),
        (Recording | Paused, Transition::Stop) => Some(Stopped),
        (Stopped, Transition::BeginProcessing) => Some(Processing),
        (Processing, Transition::Complete(_)) => Some(Completed),
        (Processing, Transition::Fail(_)) => Some(Failed),
        _ => None,
    }
}

pub fn apply(
    session: &mut CaptureSession,
    transition: Transition,
    now: DateTime<Utc>,
) -> CaptureResult<SessionState> {
    let target = next_state(session.state, &transition).ok_or_else(|| {
        CaptureError::InvalidState {
            session_id: session.id.clone(),
            state: session.state,
            action: transition.action(),
        }
    })?;

    match transition {
        Transition::Activate | Transition::Pause | Transition::Resume => {}
        Transition::Stop => {
            let ended_at = now.max(session.started_at);
            session.ended_at = Some(ended_at);
            session.duration_seconds = session.elapsed_seconds(ended_at);
        }
        Transition::BeginProcessing => {
            session.processing_started_at = Some(now);
        }
        Transition::Complete(artifact) => {
            session.output_path = Some(artifact.output_path);
            session.file_size_bytes = artifact.file_size_bytes;
            session.frames_captured = artifact.frames_captured;
            session.frames_dropped = artifact.frames_dropped;
        }
        Transition::Fail(message) => {
            session.error_message = Some(message);
        }
    }

    session.state = target;
    session.updated_at = now;
    Ok(target)
}
