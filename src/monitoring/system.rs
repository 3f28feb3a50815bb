use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use sysinfo::{Pid, System};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MemoryUsage {
    pub used: u64,
    pub total: u64,
    /// used / total, 0 when total is unknown
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMemory {
    pub rss: u64,
    pub virtual_memory: u64,
}

/// Latest host and process resource readings. Replaced wholesale on every tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    /// Host CPU utilization in [0, 1]
    pub cpu: f64,
    pub memory: MemoryUsage,
    pub process_memory: ProcessMemory,
    /// Milliseconds since the sampler was created
    pub uptime_ms: u64,
    pub host_uptime_seconds: u64,
    pub sampled_at: DateTime<Utc>,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self {
            cpu: 0.0,
            memory: MemoryUsage::default(),
            process_memory: ProcessMemory::default(),
            uptime_ms: 0,
            host_uptime_seconds: 0,
            sampled_at: Utc::now(),
        }
    }
}

/// OS-level resource probe. CPU utilization is a delta between refreshes,
/// so the first sample after construction may read 0.
pub struct SystemSampler {
    system: System,
    pid: Option<Pid>,
    started: Instant,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system,
            pid: sysinfo::get_current_pid().ok(),
            started: Instant::now(),
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn sample(&mut self) -> SystemSnapshot {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpu = (self.system.global_cpu_info().cpu_usage() as f64 / 100.0).clamp(0.0, 1.0);

        let total = self.system.total_memory();
        let used = self.system.used_memory();
        let memory = MemoryUsage {
            used,
            total,
            percentage: if total > 0 { used as f64 / total as f64 } else { 0.0 },
        };

        let process_memory = self
            .pid
            .filter(|pid| self.system.refresh_process(*pid))
            .and_then(|pid| self.system.process(pid))
            .map(|process| ProcessMemory {
                rss: process.memory(),
                virtual_memory: process.virtual_memory(),
            })
            .unwrap_or_default();

        let snapshot = SystemSnapshot {
            cpu,
            memory,
            process_memory,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            host_uptime_seconds: System::uptime(),
            sampled_at: Utc::now(),
        };

        debug!(
            "System sampled: CPU={:.2}%, Memory={:.2}% ({}MB used)",
            snapshot.cpu * 100.0,
            snapshot.memory.percentage * 100.0,
            snapshot.memory.used / 1024 / 1024
        );

        snapshot
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_ranges() {
        let mut sampler = SystemSampler::new();
        let snapshot = sampler.sample();

        assert!((0.0..=1.0).contains(&snapshot.cpu));
        assert!((0.0..=1.0).contains(&snapshot.memory.percentage));
        assert!(snapshot.memory.used <= snapshot.memory.total);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let value = serde_json::to_value(SystemSnapshot::default()).unwrap();
        assert!(value.get("processMemory").is_some());
        assert!(value.get("uptimeMs").is_some());
    }
}
