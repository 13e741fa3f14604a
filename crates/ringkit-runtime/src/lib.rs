//! # ringkit-runtime
//!
//! The parts of ringkit that run on their own threads or hand values
//! between threads:
//!
//! - [`Promise`]: single-assignment future with callbacks and combinators
//! - [`TimeoutScheduler`]: sharded ring of timer buffers drained by
//!   collector threads
//! - [`TaskScheduler`]: fixed worker pool for blocking or CPU work
//! - [`Context`]: both schedulers, built from one [`RuntimeConfig`]

pub mod config;
pub mod context;
pub mod error;
pub mod promise;
pub mod task;
pub mod timeout;

pub use config::RuntimeConfig;
pub use context::Context;
pub use error::SchedulerError;
pub use promise::{all, all_of, any, any_success, ActionableThreshold, Join, Promise, Value};
pub use task::TaskScheduler;
pub use timeout::TimeoutScheduler;
