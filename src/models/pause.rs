use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PauseInterval {
    pub id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<u64>,
}

impl PauseInterval {
    pub fn open(id: String, session_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            session_id,
            started_at,
            ended_at: None,
            duration_seconds: None,
        }
    }

    /// Closes the interval at `ended_at` and returns its length in whole seconds.
    pub fn close(&mut self, ended_at: DateTime<Utc>) -> u64 {
        let seconds = (ended_at - self.started_at).num_seconds().max(0) as u64;
        self.ended_at = Some(ended_at);
        self.duration_seconds = Some(seconds);
        seconds
    }
}
