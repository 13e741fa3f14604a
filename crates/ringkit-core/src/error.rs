//! Failure taxonomy shared by every ringkit crate.
//!
//! Operations never unwind across the proactor boundary. A kernel error
//! arrives as a negative completion result and becomes
//! `Failure::Native(NativeError)`; everything downstream passes failures
//! along as values.

use nix::errno::Errno;
use thiserror::Error;

/// A positive errno value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeError(i32);

impl NativeError {
    #[inline]
    pub const fn new(errno: i32) -> Self {
        NativeError(errno)
    }

    /// Decode a negative completion result. Returns `None` for `res >= 0`.
    #[inline]
    pub const fn from_result(res: i32) -> Option<Self> {
        if res < 0 {
            Some(NativeError(-res))
        } else {
            None
        }
    }

    /// Current thread's errno.
    pub fn last() -> Self {
        NativeError(Errno::last_raw())
    }

    #[inline]
    pub const fn code(&self) -> i32 {
        self.0
    }

    pub fn errno(&self) -> Errno {
        Errno::from_raw(self.0)
    }

    pub fn describe(&self) -> &'static str {
        self.errno().desc()
    }
}

impl std::fmt::Display for NativeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (errno {})", self.describe(), self.0)
    }
}

impl std::error::Error for NativeError {}

impl From<Errno> for NativeError {
    fn from(e: Errno) -> Self {
        NativeError(e as i32)
    }
}

/// The failure half of every promise value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    #[error("native error: {0}")]
    Native(NativeError),
    #[error("timed out")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("no free slots")]
    NoFreeSlots,
    #[error("shut down")]
    Shutdown,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("{0}")]
    Message(String),
}

impl Failure {
    #[inline]
    pub fn native(errno: i32) -> Self {
        Failure::Native(NativeError::new(errno))
    }

    /// The errno carried by a native failure.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Failure::Native(e) => Some(e.code()),
            _ => None,
        }
    }

    pub fn message(msg: impl Into<String>) -> Self {
        Failure::Message(msg.into())
    }
}

impl From<NativeError> for Failure {
    fn from(e: NativeError) -> Self {
        Failure::Native(e)
    }
}

impl From<Errno> for Failure {
    fn from(e: Errno) -> Self {
        Failure::Native(e.into())
    }
}

/// Result type carried by promises.
pub type PromiseResult<T> = Result<T, Failure>;
