//! # ringkit - proactor I/O runtime
//!
//! Submit reads, writes, accepts, splices and timers to a kernel ring and
//! get a [`Promise`] back; drive the ring with [`Proactor::process`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use ringkit::{Context, Proactor, RingConfig, RuntimeConfig, Timeout, OffHeapBuffer};
//!
//! let ctx = Context::new(RuntimeConfig::from_env())?;
//! let proactor = Proactor::new(&RingConfig::from_env())?;
//!
//! let buf = OffHeapBuffer::shared(4096)?;
//! let read = proactor.read(fd, &buf, ringkit::CURRENT_POSITION, None);
//! read.with_timeout(ctx.timeouts(), Timeout::seconds(1), Ok(0));
//!
//! while !read.is_resolved() {
//!     proactor.process();
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        proactor.read(), promise.map(), ctx.timeouts()       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Proactor                               │
//! │     object heap handles, backlog, submit/complete phases    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┴───────────────────┐
//!          ▼                                       ▼
//!    ┌───────────┐                          ┌─────────────┐
//!    │ io_uring  │                          │  Threaded   │
//!    │   ring    │                          │ worker ring │
//!    └───────────┘                          └─────────────┘
//!
//!    Promise ◄── TimeoutScheduler (collector threads)
//!            ◄── TaskScheduler    (worker threads)
//! ```

// Core types
pub use ringkit_core::{
    Address,
    Failure,
    FileStat,
    FileType,
    Handle,
    LockFreePool,
    NativeError,
    ObjectHeap,
    ObjectPool,
    OffHeapBuffer,
    OffHeapRegion,
    PoolLink,
    Poolable,
    Pooled,
    PromiseResult,
    StatFlags,
    StatMask,
    Timeout,
};

// Shapes and raw access for code that builds its own records
pub use ringkit_core::{raw, shape};

// Logging
pub use ringkit_core::{kdebug, kerror, kinfo, kprintln, ktrace, kwarn};
pub use ringkit_core::kprint::{init as init_logging, set_flush_enabled, set_log_level, LogLevel};

// Env helpers
pub use ringkit_core::env::{env_get, env_get_bool, env_get_opt};

// Runtime
pub use ringkit_runtime::{
    all,
    all_of,
    any,
    any_success,
    ActionableThreshold,
    Context,
    Promise,
    RuntimeConfig,
    SchedulerError,
    TaskScheduler,
    TimeoutScheduler,
};

// Proactor
pub use ringkit_uring::{
    Accepted,
    BackendKind,
    Proactor,
    Progress,
    RingConfig,
    RingError,
    ServerConfig,
    ServerConnector,
    SocketFamily,
    SocketFlags,
    SocketOptions,
    SocketType,
    SpliceEnd,
    SpliceFlags,
    SpliceParams,
    Submitted,
    Token,
    CURRENT_POSITION,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        Context, Failure, OffHeapBuffer, Proactor, Promise, PromiseResult, RingConfig,
        RuntimeConfig, Timeout,
    };
}
