//! Timeout scheduler
//!
//! Many producers, few collectors, no global lock:
//!
//! ```text
//!   producer ──request()──► [e0][e1][e2][e3][e4][e5]   RingBuffer
//!                              │   │   │   │   │   │
//!                 collector 0 ─┴───│───┴───│───┴───│   (even entries)
//!                 collector 1 ─────┴───────┴───────┘   (odd entries)
//!                       │
//!                       ▼
//!              BTreeMap<Instant, Vec<Task>>   (thread-local, per collector)
//! ```
//!
//! A producer locks any free entry (rotating start), appends the task and
//! releases. Each collector owns the entries `i` with
//! `i % collectors == id`, purges them into its own deadline map and runs
//! everything due. Tasks never fire before their deadline; ordering is
//! only guaranteed among tasks handled by the same collector.

mod ring;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ringkit_core::{kdebug, kerror, Timeout};

use crate::config::RuntimeConfig;
use crate::error::{Result, SchedulerError};
use ring::{RingBuffer, Task, TimedTask};

/// How many full ring scans `schedule()` attempts before giving up.
const SCHEDULE_ATTEMPTS: u32 = 1_000;

struct Shared {
    ring: RingBuffer,
    collectors: usize,
    poll_interval: Duration,
    shutdown: AtomicBool,
    scheduled: AtomicU64,
    fired: AtomicU64,
}

/// Fires one-shot callbacks no earlier than their deadline.
pub struct TimeoutScheduler {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TimeoutScheduler {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            ring: RingBuffer::new(config.timeout_slots),
            collectors: config.timeout_collectors,
            poll_interval: config.poll_interval,
            shutdown: AtomicBool::new(false),
            scheduled: AtomicU64::new(0),
            fired: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(config.timeout_collectors);
        for id in 0..config.timeout_collectors {
            let shared = Arc::clone(&shared);
            let name = format!("rk-timeout-{}", id);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || collector_loop(shared, id))
                .map_err(|source| SchedulerError::Spawn { name, source })?;
            handles.push(handle);
        }
        kdebug!(
            "timeout scheduler started: {} slots, {} collectors",
            config.timeout_slots,
            config.timeout_collectors
        );

        Ok(TimeoutScheduler {
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// One attempt: fails with `NoFreeSlots` if every entry is locked.
    pub fn try_schedule<F>(&self, timeout: Timeout, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.push(timeout.deadline(), Box::new(task))
    }

    /// Schedule, retrying with backoff while the ring is saturated.
    pub fn schedule<F>(&self, timeout: Timeout, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = timeout.deadline();
        let task: Task = Box::new(task);
        for attempt in 0..SCHEDULE_ATTEMPTS {
            if self.shared.shutdown.load(Ordering::Acquire) {
                return Err(SchedulerError::Shutdown);
            }
            match self.shared.ring.request() {
                Ok(mut entry) => {
                    entry.add(deadline, task);
                    self.shared.scheduled.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(_) if attempt < 16 => std::hint::spin_loop(),
                Err(_) => thread::yield_now(),
            }
        }
        Err(SchedulerError::NoFreeSlots)
    }

    fn push(&self, deadline: Instant, task: Task) -> Result<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        let mut entry = self.shared.ring.request()?;
        entry.add(deadline, task);
        self.shared.scheduled.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn slots(&self) -> usize {
        self.shared.ring.size()
    }

    pub fn collectors(&self) -> usize {
        self.shared.collectors
    }

    /// (scheduled, fired) counters.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.shared.scheduled.load(Ordering::Relaxed),
            self.shared.fired.load(Ordering::Relaxed),
        )
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop the collectors. Tasks that have not fired yet are dropped.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        for h in &handles {
            h.thread().unpark();
        }
        for h in handles {
            let _ = h.join();
        }
        kdebug!("timeout scheduler stopped");
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn collector_loop(shared: Arc<Shared>, id: usize) {
    let mut pending: BTreeMap<Instant, Vec<Task>> = BTreeMap::new();
    let shard: Vec<usize> = (id..shared.ring.size()).step_by(shared.collectors).collect();

    while !shared.shutdown.load(Ordering::Acquire) {
        for &index in &shard {
            if let Some(mut entry) = shared.ring.try_lock(index) {
                for TimedTask { deadline, task } in entry.purge() {
                    pending.entry(deadline).or_default().push(task);
                }
            }
        }

        let now = Instant::now();
        while let Some(entry) = pending.first_entry() {
            if *entry.key() > now {
                break;
            }
            for task in entry.remove() {
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    kerror!("timeout task panicked");
                }
                shared.fired.fetch_add(1, Ordering::Relaxed);
            }
        }

        let nap = pending
            .keys()
            .next()
            .map(|d| d.saturating_duration_since(Instant::now()))
            .unwrap_or(shared.poll_interval)
            .min(shared.poll_interval);
        if nap.is_zero() {
            thread::yield_now();
        } else {
            thread::park_timeout(nap);
        }
    }

    let dropped: usize = pending.values().map(Vec::len).sum();
    if dropped > 0 {
        kdebug!("collector {} dropping {} unfired tasks", id, dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn scheduler(slots: usize, collectors: usize) -> TimeoutScheduler {
        let config = RuntimeConfig::new()
            .timeout_slots(slots)
            .timeout_collectors(collectors)
            .task_workers(1);
        TimeoutScheduler::new(&config).unwrap()
    }

    #[test]
    fn test_fires_after_deadline() {
        let sched = scheduler(8, 1);
        let (tx, rx) = mpsc::channel();
        let start = Instant::now();
        sched
            .schedule(Timeout::millis(50), move || tx.send(Instant::now()).unwrap())
            .unwrap();
        let fired = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(fired.duration_since(start) >= Duration::from_millis(50));
        sched.shutdown();
    }

    #[test]
    fn test_single_collector_orders_by_deadline() {
        let sched = scheduler(4, 1);
        let (tx, rx) = mpsc::channel();
        for ms in [60u64, 20, 40] {
            let tx = tx.clone();
            sched.schedule(Timeout::millis(ms), move || tx.send(ms).unwrap()).unwrap();
        }
        let order: Vec<u64> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, vec![20, 40, 60]);
    }

    #[test]
    fn test_many_producers_all_fire() {
        let sched = Arc::new(scheduler(16, 2));
        let (tx, rx) = mpsc::channel();
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let sched = Arc::clone(&sched);
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..250u64 {
                        let tx = tx.clone();
                        sched.schedule(Timeout::micros(i * 10), move || tx.send(()).unwrap()).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        for _ in 0..1_000 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(sched.stats().0, 1_000);
    }

    #[test]
    fn test_panicking_task_does_not_kill_collector() {
        let sched = scheduler(4, 1);
        let (tx, rx) = mpsc::channel();
        sched.schedule(Timeout::ZERO, || panic!("boom")).unwrap();
        sched.schedule(Timeout::millis(5), move || tx.send(1).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_schedule_after_shutdown() {
        let sched = scheduler(2, 1);
        sched.shutdown();
        assert!(matches!(
            sched.schedule(Timeout::ZERO, || {}),
            Err(SchedulerError::Shutdown)
        ));
        assert!(matches!(
            sched.try_schedule(Timeout::ZERO, || {}),
            Err(SchedulerError::Shutdown)
        ));
    }
}
