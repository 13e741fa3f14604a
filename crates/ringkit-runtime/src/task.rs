//! `TaskScheduler`: fixed pool of worker threads for arbitrary work.
//!
//! Each worker owns an unbounded lock-free queue. `submit` picks the next
//! queue round-robin, pushes and unparks that worker. Idle workers park
//! with a timeout so a missed unpark costs at most one idle period.
//!
//! No dynamic scaling. On shutdown workers finish what is already queued,
//! then exit. Every `submit` that returned `Ok` runs: submits racing the
//! shutdown flag are counted in `submitting`, shutdown waits them out and
//! runs whatever is left after the join on its own thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use ringkit_core::{kdebug, kerror};

use crate::config::RuntimeConfig;
use crate::error::{Result, SchedulerError};

type Job = Box<dyn FnOnce() + Send>;

struct WorkerSlot {
    queue: SegQueue<Job>,
    thread: Mutex<Option<Thread>>,
}

struct Shared {
    workers: Box<[WorkerSlot]>,
    next: AtomicUsize,
    shutdown: AtomicBool,
    submitting: AtomicUsize,
    idle_park: Duration,
    completed: AtomicUsize,
}

pub struct TaskScheduler {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let n = config.task_workers;
        let shared = Arc::new(Shared {
            workers: (0..n)
                .map(|_| WorkerSlot { queue: SegQueue::new(), thread: Mutex::new(None) })
                .collect(),
            next: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            submitting: AtomicUsize::new(0),
            idle_park: config.task_idle_park,
            completed: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let inner = Arc::clone(&shared);
            let name = format!("rk-task-{}", worker_id);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(inner, worker_id))
                .map_err(|source| SchedulerError::Spawn { name, source })?;
            *shared.workers[worker_id].thread.lock() = Some(handle.thread().clone());
            handles.push(handle);
        }
        kdebug!("task scheduler started with {} workers", n);

        Ok(TaskScheduler {
            shared,
            handles: Mutex::new(handles),
        })
    }

    /// Queue `job` on the next worker.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &self.shared;
        shared.submitting.fetch_add(1, Ordering::SeqCst);
        if shared.shutdown.load(Ordering::SeqCst) {
            shared.submitting.fetch_sub(1, Ordering::SeqCst);
            return Err(SchedulerError::Shutdown);
        }
        let index = shared.next.fetch_add(1, Ordering::Relaxed) % shared.workers.len();
        let slot = &shared.workers[index];
        slot.queue.push(Box::new(job));
        if let Some(t) = slot.thread.lock().as_ref() {
            t.unpark();
        }
        shared.submitting.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Configured worker count.
    pub fn parallelism(&self) -> usize {
        self.shared.workers.len()
    }

    /// Jobs finished so far.
    pub fn completed(&self) -> usize {
        self.shared.completed.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Refuse new work, drain queued jobs, join the workers.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        // a submit that saw the flag clear finishes its push before we join
        while self.shared.submitting.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }
        let handles = std::mem::take(&mut *self.handles.lock());
        let me = thread::current().id();
        for h in &handles {
            h.thread().unpark();
        }
        for h in handles {
            // A job calling shutdown() must not join its own thread.
            if h.thread().id() != me {
                let _ = h.join();
            }
        }
        let stragglers: usize = (0..self.shared.workers.len())
            .map(|worker_id| run_queued(&self.shared, worker_id))
            .sum();
        kdebug!("task scheduler stopped ({} jobs run after join)", stragglers);
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_job(shared: &Shared, worker_id: usize, job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        kerror!("task panicked on worker {}", worker_id);
    }
    shared.completed.fetch_add(1, Ordering::Relaxed);
}

fn run_queued(shared: &Shared, worker_id: usize) -> usize {
    let mut ran = 0;
    while let Some(job) = shared.workers[worker_id].queue.pop() {
        run_job(shared, worker_id, job);
        ran += 1;
    }
    ran
}

fn worker_loop(shared: Arc<Shared>, worker_id: usize) {
    let slot = &shared.workers[worker_id];
    loop {
        match slot.queue.pop() {
            Some(job) => run_job(&shared, worker_id, job),
            None if shared.shutdown.load(Ordering::Acquire) => break,
            None => thread::park_timeout(shared.idle_park),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn pool(n: usize) -> TaskScheduler {
        TaskScheduler::new(&RuntimeConfig::new().task_workers(n)).unwrap()
    }

    #[test]
    fn test_runs_every_job() {
        let sched = pool(3);
        assert_eq!(sched.parallelism(), 3);
        let (tx, rx) = mpsc::channel();
        for i in 0..100 {
            let tx = tx.clone();
            sched.submit(move || tx.send(i).unwrap()).unwrap();
        }
        let mut got: Vec<i32> = (0..100)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        got.sort();
        assert_eq!(got, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_round_robin_spreads_work() {
        let sched = pool(4);
        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            sched
                .submit(move || tx.send(thread::current().name().map(String::from)).unwrap())
                .unwrap();
        }
        let mut names: Vec<_> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_shutdown_drains_then_refuses() {
        let sched = pool(1);
        let (tx, rx) = mpsc::channel();
        for _ in 0..10 {
            let tx = tx.clone();
            sched
                .submit(move || {
                    thread::sleep(Duration::from_millis(1));
                    tx.send(()).unwrap();
                })
                .unwrap();
        }
        sched.shutdown();
        assert_eq!(rx.try_iter().count(), 10);
        assert!(matches!(sched.submit(|| {}), Err(SchedulerError::Shutdown)));
    }

    #[test]
    fn test_submit_racing_shutdown_never_loses_jobs() {
        for _ in 0..50 {
            let sched = Arc::new(pool(2));
            let ran = Arc::new(AtomicUsize::new(0));
            let submitter = {
                let (sched, ran) = (Arc::clone(&sched), Arc::clone(&ran));
                thread::spawn(move || {
                    let mut accepted = 0;
                    loop {
                        let ran = Arc::clone(&ran);
                        match sched.submit(move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                        }) {
                            Ok(()) => accepted += 1,
                            Err(_) => return accepted,
                        }
                    }
                })
            };
            thread::sleep(Duration::from_micros(200));
            sched.shutdown();
            let accepted = submitter.join().unwrap();
            assert_eq!(ran.load(Ordering::SeqCst), accepted);
            assert_eq!(sched.completed(), accepted);
        }
    }

    #[test]
    fn test_panicking_job_keeps_worker() {
        let sched = pool(1);
        let (tx, rx) = mpsc::channel();
        sched.submit(|| panic!("job failure")).unwrap();
        sched.submit(move || tx.send(5).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 5);
    }
}
