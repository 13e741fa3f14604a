//! # ringkit-uring
//!
//! The proactor and the rings it drives.
//!
//! ```text
//!   Proactor ── ops (read, write, socket, accept, connect, splice, ...)
//!      │
//!      ▼
//!   RingBackend ──┬── UringRing     (io_uring, Linux)
//!                 └── ThreadedRing  (blocking syscalls on a worker pool)
//! ```
//!
//! Build a [`Proactor`] from a [`RingConfig`], submit operations, and call
//! [`Proactor::process`] from the driving loop:
//!
//! ```ignore
//! let proactor = Proactor::new(&RingConfig::from_env())?;
//! let done = proactor.delay(Timeout::millis(100));
//! while !done.is_resolved() {
//!     proactor.process();
//! }
//! ```

pub mod config;
pub mod error;
pub mod ops;
pub mod proactor;
pub mod ring;
pub mod socket;
pub mod splice;

pub use config::{BackendKind, RingConfig};
pub use error::RingError;
pub use ops::{Accepted, CURRENT_POSITION};
pub use proactor::{Proactor, Progress, Submitted, Token};
pub use ring::{CompletionBatch, RingBackend, SqeImage, ThreadedRing};
pub use socket::{ServerConfig, ServerConnector, SocketFamily, SocketFlags, SocketOptions, SocketType};
pub use splice::{SpliceEnd, SpliceFlags, SpliceParams};

#[cfg(target_os = "linux")]
pub use ring::UringRing;
