use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Supervisor configuration, usually the `cluster` section of the app config.
///
/// ```yaml
/// cluster:
///   cpus: 4
///   workers:
///     auto_restart:
///       enabled: true
///       delay_ms: 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterSettings {
    /// Number of workers; host parallelism when unset.
    pub cpus: Option<usize>,
    pub workers: WorkerSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerSettings {
    pub auto_restart: AutoRestart,
}

/// Flat restart policy: every exit is followed by one respawn after `delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoRestart {
    pub enabled: bool,
    pub delay_ms: u64,
}

impl Default for AutoRestart {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 5000,
        }
    }
}

impl AutoRestart {
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl ClusterSettings {
    #[must_use]
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = Some(cpus);
        self
    }

    #[must_use]
    pub fn with_auto_restart(mut self, enabled: bool, delay_ms: u64) -> Self {
        self.workers.auto_restart = AutoRestart { enabled, delay_ms };
        self
    }

    /// Configured worker count, falling back to the host's logical core count.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.cpus.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
        })
    }

    #[must_use]
    pub fn auto_restart(&self) -> &AutoRestart {
        &self.workers.auto_restart
    }
}
