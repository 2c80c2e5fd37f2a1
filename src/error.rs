use serde::Serialize;
use serde_json::{json, Value};

use crate::models::{Quality, SessionState, SubscriptionTier};

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Summary of the session that blocks a new start for the same owner.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSessionRef {
    pub id: String,
    pub project_id: String,
    pub state: SessionState,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Unknown session, or one that belongs to somebody else.
    #[error("capture session {0} not found")]
    NotFound(String),

    #[error("capture already in progress: session {} is {}", .active.id, .active.state)]
    Conflict { active: ActiveSessionRef },

    #[error("cannot {action} session {session_id} in {state} state")]
    InvalidState {
        session_id: String,
        state: SessionState,
        action: &'static str,
    },

    #[error("{requested} recording requires {required} subscription")]
    EntitlementDenied {
        requested: Quality,
        tier: SubscriptionTier,
        available: Vec<Quality>,
        required: &'static str,
    },

    #[error("invalid capture settings: {0}")]
    InvalidSettings(String),

    /// A concurrent writer bumped the revision first.
    #[error("session {session_id} was modified concurrently (expected revision {expected})")]
    StaleWrite { session_id: String, expected: u64 },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CaptureError {
    /// Stable code surfaced on the command channel.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::NotFound(_) => "NotFound",
            CaptureError::Conflict { .. } => "Conflict",
            CaptureError::InvalidState { .. } => "InvalidState",
            CaptureError::EntitlementDenied { .. } => "EntitlementDenied",
            CaptureError::InvalidSettings(_) => "InvalidSettings",
            CaptureError::StaleWrite { .. } => "StaleWrite",
            CaptureError::Internal(_) => "InternalFailure",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            CaptureError::Conflict { active } => Some(json!({ "activeSession": active })),
            CaptureError::InvalidState { state, action, .. } => {
                Some(json!({ "state": state, "action": action }))
            }
            CaptureError::EntitlementDenied {
                requested,
                tier,
                available,
                ..
            } => Some(json!({
                "requested": requested,
                "subscription": tier,
                "availableQualities": available,
            })),
            _ => None,
        }
    }
}
