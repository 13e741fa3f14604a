//! Scheduler errors.

use ringkit_core::Failure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Every ring entry was locked during one full scan. Retryable.
    #[error("no free slots in timeout ring")]
    NoFreeSlots,
    #[error("scheduler is shut down")]
    Shutdown,
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Config(&'static str),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

impl From<SchedulerError> for Failure {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::NoFreeSlots => Failure::NoFreeSlots,
            SchedulerError::Shutdown => Failure::Shutdown,
            other => Failure::Message(other.to_string()),
        }
    }
}
