//! Runtime context: the schedulers an application shares, built once at
//! startup and handed to whoever needs them.

use std::sync::Arc;

use ringkit_core::kinfo;

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::task::TaskScheduler;
use crate::timeout::TimeoutScheduler;

#[derive(Clone)]
pub struct Context {
    config: RuntimeConfig,
    timeouts: Arc<TimeoutScheduler>,
    tasks: Arc<TaskScheduler>,
}

impl Context {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let timeouts = Arc::new(TimeoutScheduler::new(&config)?);
        let tasks = Arc::new(TaskScheduler::new(&config)?);
        kinfo!(
            "runtime context: {} timeout slots / {} collectors, {} task workers",
            config.timeout_slots,
            config.timeout_collectors,
            config.task_workers
        );
        Ok(Context { config, timeouts, tasks })
    }

    /// Context configured from `RINGKIT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(RuntimeConfig::from_env())
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn timeouts(&self) -> &Arc<TimeoutScheduler> {
        &self.timeouts
    }

    pub fn tasks(&self) -> &Arc<TaskScheduler> {
        &self.tasks
    }

    /// Stop both schedulers. Clones of the context see them shut down.
    pub fn shutdown(&self) {
        self.timeouts.shutdown();
        self.tasks.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::Promise;
    use ringkit_core::{Failure, Timeout};
    use std::time::Duration;

    #[test]
    fn test_context_wires_promises() {
        let ctx = Context::new(RuntimeConfig::new().task_workers(2)).unwrap();
        let p = Promise::async_task(ctx.tasks(), || Ok(40 + 2));
        assert_eq!(p.sync_wait_timeout(Duration::from_secs(5)), Ok(42));

        let slow = Promise::<u8>::new();
        slow.with_deadline(ctx.timeouts(), Timeout::millis(10));
        assert_eq!(slow.sync_wait(), Err(Failure::Timeout));

        ctx.shutdown();
        assert!(ctx.tasks().is_shutdown());
        let refused = Promise::async_task(ctx.tasks(), || Ok(1u8));
        assert_eq!(refused.peek(), Some(Err(Failure::Shutdown)));
    }
}
