use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemSample {
    pub sampled_at: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplerSnapshot {
    pub latest: Option<SystemSample>,
    pub recent: Vec<SystemSample>,
    pub sample_count: u64,
}
