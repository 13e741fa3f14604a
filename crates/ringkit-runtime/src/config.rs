//! Runtime configuration

use ringkit_core::env::{env_get, env_get_duration_us};
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// Sizing of the timeout scheduler and the task scheduler.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Entries in the timeout ring (default: 64)
    pub timeout_slots: usize,

    /// Collector threads draining the ring (default: 1)
    pub timeout_collectors: usize,

    /// Upper bound on how long a collector sleeps between scans (default: 1ms)
    pub poll_interval: Duration,

    /// Task scheduler workers (defaults to CPU count, max 64)
    pub task_workers: usize,

    /// How long an idle task worker parks before rechecking (default: 10ms)
    pub task_idle_park: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            timeout_slots: 64,
            timeout_collectors: 1,
            poll_interval: Duration::from_millis(1),
            task_workers: cpus.min(64),
            task_idle_park: Duration::from_millis(10),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `RINGKIT_TIMEOUT_SLOTS`,
    /// `RINGKIT_TIMEOUT_COLLECTORS`, `RINGKIT_POLL_INTERVAL_US` and
    /// `RINGKIT_TASK_WORKERS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            timeout_slots: env_get("RINGKIT_TIMEOUT_SLOTS", d.timeout_slots),
            timeout_collectors: env_get("RINGKIT_TIMEOUT_COLLECTORS", d.timeout_collectors),
            poll_interval: env_get_duration_us("RINGKIT_POLL_INTERVAL_US", d.poll_interval),
            task_workers: env_get("RINGKIT_TASK_WORKERS", d.task_workers),
            task_idle_park: d.task_idle_park,
        }
    }

    pub fn timeout_slots(mut self, n: usize) -> Self {
        self.timeout_slots = n;
        self
    }

    pub fn timeout_collectors(mut self, n: usize) -> Self {
        self.timeout_collectors = n;
        self
    }

    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    pub fn task_workers(mut self, n: usize) -> Self {
        self.task_workers = n;
        self
    }

    pub fn task_idle_park(mut self, d: Duration) -> Self {
        self.task_idle_park = d;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_slots == 0 {
            return Err(SchedulerError::Config("timeout_slots must be at least 1"));
        }
        if self.timeout_collectors == 0 {
            return Err(SchedulerError::Config("timeout_collectors must be at least 1"));
        }
        if self.timeout_collectors > self.timeout_slots {
            return Err(SchedulerError::Config("more timeout collectors than ring slots"));
        }
        if self.task_workers == 0 {
            return Err(SchedulerError::Config("task_workers must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(SchedulerError::Config("poll_interval must be non-zero"));
        }
        Ok(())
    }
}
