mod types;

pub use types::{SamplerSnapshot, SystemSample};

use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

const MAX_RECENT_SAMPLES: usize = 20;

/// Samples this process's CPU and memory use for the recording heartbeat.
#[derive(Clone)]
pub struct PerformanceSampler {
    inner: Arc<Mutex<SamplerState>>,
}

struct SamplerState {
    recent: VecDeque<SystemSample>,
    sample_count: u64,
    system: System,
    pid: Pid,
}

impl Default for PerformanceSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // CPU usage is a delta between refreshes, so take the baseline now.
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(SamplerState {
                recent: VecDeque::with_capacity(MAX_RECENT_SAMPLES),
                sample_count: 0,
                system,
                pid,
            })),
        }
    }

    pub async fn sample(&self) -> SystemSample {
        let mut state = self.inner.lock().await;
        let pid = state.pid;
        state.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        let (cpu_percent, memory_mb) = match state.system.process(pid) {
            Some(process) => (
                process.cpu_usage(),
                process.memory() as f64 / 1024.0 / 1024.0,
            ),
            None => (0.0, 0.0),
        };

        let sample = SystemSample {
            sampled_at: Utc::now(),
            cpu_percent,
            memory_mb,
        };

        state.sample_count += 1;
        state.recent.push_back(sample.clone());
        if state.recent.len() > MAX_RECENT_SAMPLES {
            state.recent.pop_front();
        }

        sample
    }

    pub async fn snapshot(&self) -> SamplerSnapshot {
        let state = self.inner.lock().await;
        SamplerSnapshot {
            latest: state.recent.back().cloned(),
            recent: state.recent.iter().cloned().collect(),
            sample_count: state.sample_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_a_bounded_window_of_samples() {
        let sampler = PerformanceSampler::new();
        for _ in 0..(MAX_RECENT_SAMPLES + 5) {
            let sample = sampler.sample().await;
            assert!(sample.memory_mb >= 0.0);
        }

        let snapshot = sampler.snapshot().await;
        assert_eq!(snapshot.sample_count, (MAX_RECENT_SAMPLES + 5) as u64);
        assert_eq!(snapshot.recent.len(), MAX_RECENT_SAMPLES);
        assert!(snapshot.latest.is_some());
    }
}
