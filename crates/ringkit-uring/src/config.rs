//! Ring configuration

use ringkit_core::env::{env_get, env_get_with};

use crate::error::{Result, RingError};

/// Which ring implementation drives the proactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// io_uring if the kernel allows it, threaded otherwise.
    Auto,
    IoUring,
    /// Blocking syscalls on a worker pool behind the same ring contract.
    Threaded,
}

impl BackendKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Some(BackendKind::Auto),
            "io_uring" | "iouring" | "uring" => Some(BackendKind::IoUring),
            "threaded" | "threads" | "pool" => Some(BackendKind::Threaded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Submission ring entries. Power of two (default: 256)
    pub entries: u32,

    pub backend: BackendKind,

    /// Worker threads of the threaded backend (default: min(8, nproc/2), at least 2)
    pub threaded_workers: usize,

    /// Completions reaped per `process()` call (default: 256)
    pub completion_batch: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            entries: 256,
            backend: BackendKind::Auto,
            threaded_workers: (cpus / 2).clamp(2, 8),
            completion_batch: 256,
        }
    }
}

impl RingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `RINGKIT_RING_ENTRIES`, `RINGKIT_BACKEND`,
    /// `RINGKIT_THREADED_WORKERS` and `RINGKIT_COMPLETION_BATCH`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            entries: env_get("RINGKIT_RING_ENTRIES", d.entries),
            backend: env_get_with("RINGKIT_BACKEND", d.backend, BackendKind::parse),
            threaded_workers: env_get("RINGKIT_THREADED_WORKERS", d.threaded_workers),
            completion_batch: env_get("RINGKIT_COMPLETION_BATCH", d.completion_batch),
        }
    }

    pub fn entries(mut self, n: u32) -> Self {
        self.entries = n;
        self
    }

    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    pub fn threaded_workers(mut self, n: usize) -> Self {
        self.threaded_workers = n;
        self
    }

    pub fn completion_batch(mut self, n: usize) -> Self {
        self.completion_batch = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries < 2 || !self.entries.is_power_of_two() {
            return Err(RingError::Config("entries must be a power of two >= 2"));
        }
        if self.entries > 32_768 {
            return Err(RingError::Config("entries exceeds 32768"));
        }
        if self.threaded_workers == 0 {
            return Err(RingError::Config("threaded_workers must be at least 1"));
        }
        if self.completion_batch == 0 {
            return Err(RingError::Config("completion_batch must be at least 1"));
        }
        Ok(())
    }
}
