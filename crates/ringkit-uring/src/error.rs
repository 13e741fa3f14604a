//! Ring backend errors.

use ringkit_core::Failure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RingError {
    /// Ring setup failed (errno).
    #[error("ring setup failed: errno {0}")]
    Setup(i32),
    /// Submission to the kernel failed (errno).
    #[error("ring submit failed: errno {0}")]
    Submit(i32),
    /// No free submission slot.
    #[error("submission ring full")]
    Full,
    #[error("opcode {0} not supported by this backend")]
    Unsupported(u8),
    #[error("ring closed")]
    Closed,
    #[error("invalid ring config: {0}")]
    Config(&'static str),
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, RingError>;

impl From<RingError> for Failure {
    fn from(e: RingError) -> Self {
        match e {
            RingError::Setup(errno) | RingError::Submit(errno) => Failure::native(errno),
            RingError::Closed => Failure::Shutdown,
            other => Failure::Message(other.to_string()),
        }
    }
}
