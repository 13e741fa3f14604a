//! `ThreadedRing`: the ring contract on top of a fixed worker pool.
//!
//! Workers dequeue entries from a lock-free MPMC queue, execute them with
//! syscalls and push `(user_data, res, flags)` to a result queue that
//! `peek` drains. Opcodes that need no syscall are completed on the
//! calling thread:
//!
//! - `NOP` completes at submit
//! - `TIMEOUT` goes into a deadline map checked on every `peek`
//! - `ASYNC_CANCEL` looks its target up in the timer map, then the
//!   work registry
//! - `LINK_TIMEOUT` attaches to the linked entry before it and sets a
//!   deadline for it
//!
//! Readiness-driven entries (reads, writes, accept, splice) never block a
//! worker: it polls the descriptor for at most [`POLL_SLICE`] and puts an
//! entry that is not ready back on the queue. So idle descriptors cannot
//! starve the pool, and cancel or close take effect within one slice.
//!
//! ```text
//!   Queued ──pop──► Polling ──ready──► Executing ──► result
//!     ▲               │
//!     └──not ready────┘        cancel: Queued/Polling ─► Cancelled
//! ```
//!
//! No dynamic scaling. Work items are recycled through a [`LockFreePool`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use ringkit_core::shape::submission::opcode as op;
use ringkit_core::shape::{Shape, SubmissionEntry, TimeSpec};
use ringkit_core::{kdebug, ktrace, kwarn, LockFreePool, PoolLink, Poolable, Pooled};

use super::{syscall, CompletionBatch, ReadyQueue, RingBackend, SqeImage};
use crate::config::{BackendKind, RingConfig};
use crate::error::{Result, RingError};

/// How long an idle worker parks before re-checking the queue.
const IDLE_PARK: Duration = Duration::from_millis(1);

/// Longest single readiness wait before a worker moves on.
const POLL_SLICE: Duration = Duration::from_millis(2);

/// One entry on its way to a worker.
struct WorkItem {
    link: PoolLink,
    sqe: SqeImage,
    /// `(user_data, deadline)` of an attached `LINK_TIMEOUT`.
    link_timeout: Option<(u64, Instant)>,
}

impl Poolable for WorkItem {
    fn link(&self) -> &PoolLink {
        &self.link
    }

    fn reset(&mut self) {
        self.sqe = SqeImage::zeroed();
        self.link_timeout = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    Queued,
    Polling,
    Executing,
    Cancelled,
}

/// Shared state between the ring owner and the workers.
struct Shared {
    work: ArrayQueue<Pooled<WorkItem>>,
    results: ArrayQueue<(u64, i32, u32)>,
    registry: Mutex<HashMap<u64, ItemState>>,
    active: AtomicUsize,
    shutdown: AtomicBool,
}

impl Shared {
    fn post(&self, user_data: u64, res: i32) {
        let mut spins = 0u32;
        while self.results.push((user_data, res, 0)).is_err() {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            spins += 1;
            if spins < 64 {
                std::hint::spin_loop();
            } else {
                thread::park_timeout(IDLE_PARK);
            }
        }
    }

    /// Move `user_data` to `to`. Returns `false`, and forgets the entry,
    /// if it was cancelled meanwhile.
    fn transition(&self, user_data: u64, to: ItemState) -> bool {
        let mut registry = self.registry.lock();
        if registry.get(&user_data) == Some(&ItemState::Cancelled) {
            registry.remove(&user_data);
            return false;
        }
        registry.insert(user_data, to);
        true
    }

    fn finish(&self, user_data: u64, res: i32, link: Option<(u64, Instant)>, link_res: i32) {
        self.registry.lock().remove(&user_data);
        self.post(user_data, res);
        if let Some((link_ud, _)) = link {
            self.post(link_ud, link_res);
        }
    }
}

pub struct ThreadedRing {
    shared: Arc<Shared>,
    handles: Vec<thread::JoinHandle<()>>,
    items: Arc<LockFreePool<WorkItem>>,
    staged: Vec<Pooled<WorkItem>>,
    /// Slots used by staged entries; a link timeout takes one of its own.
    staged_slots: usize,
    timers: BTreeMap<(Instant, u64), u64>,
    timer_seq: u64,
    ready: ReadyQueue,
    capacity: usize,
    in_flight: usize,
    closed: bool,
}

impl ThreadedRing {
    pub fn new(config: &RingConfig) -> Result<Self> {
        let capacity = config.entries as usize;
        let shared = Arc::new(Shared {
            work: ArrayQueue::new(capacity),
            results: ArrayQueue::new(capacity * 2),
            registry: Mutex::new(HashMap::with_capacity(capacity)),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        let workers = config.threaded_workers.max(1);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let shared = Arc::clone(&shared);
            let name = format!("rk-ring-{}", id);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(shared))
                .map_err(|source| RingError::Spawn { name, source })?;
            handles.push(handle);
        }
        kdebug!("threaded ring: {} workers, {} entries", workers, capacity);

        Ok(ThreadedRing {
            shared,
            handles,
            items: LockFreePool::new(|| WorkItem {
                link: PoolLink::new(),
                sqe: SqeImage::zeroed(),
                link_timeout: None,
            }),
            staged: Vec::new(),
            staged_slots: 0,
            timers: BTreeMap::new(),
            timer_seq: 0,
            ready: ReadyQueue::default(),
            capacity,
            in_flight: 0,
            closed: false,
        })
    }

    /// Workers currently inside a syscall.
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    pub fn total_workers(&self) -> usize {
        self.handles.len()
    }

    fn complete(&mut self, user_data: u64, res: i32) {
        self.ready.push(user_data, res, 0);
        self.in_flight = self.in_flight.saturating_sub(1);
    }

    fn arm_timer(&mut self, sqe: &SubmissionEntry) {
        let limit = unsafe { TimeSpec::at(sqe.addr() as usize) }.duration();
        self.timer_seq += 1;
        self.timers
            .insert((Instant::now() + limit, self.timer_seq), sqe.user_data());
    }

    fn cancel(&mut self, cancel_ud: u64, target: u64) {
        let timer = self
            .timers
            .iter()
            .find(|(_, &ud)| ud == target)
            .map(|(&key, _)| key);
        if let Some(key) = timer {
            self.timers.remove(&key);
            self.complete(target, -libc::ECANCELED);
            self.complete(cancel_ud, 0);
            return;
        }

        let res = {
            let mut registry = self.shared.registry.lock();
            match registry.get(&target).copied() {
                Some(ItemState::Queued | ItemState::Polling) => {
                    registry.insert(target, ItemState::Cancelled);
                    0
                }
                Some(ItemState::Executing | ItemState::Cancelled) => -libc::EALREADY,
                None => -libc::ENOENT,
            }
        };
        self.complete(cancel_ud, res);
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        while let Some(entry) = self.timers.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let user_data = entry.remove();
            self.complete(user_data, -libc::ETIME);
        }
    }
}

impl RingBackend for ThreadedRing {
    fn kind(&self) -> BackendKind {
        BackendKind::Threaded
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn space_left(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.capacity
            .saturating_sub(self.staged_slots + self.in_flight)
    }

    fn push(&mut self, sqe: &SubmissionEntry) -> Result<()> {
        if self.closed {
            return Err(RingError::Closed);
        }
        if self.space_left() == 0 {
            return Err(RingError::Full);
        }

        if sqe.opcode() == op::LINK_TIMEOUT {
            let limit = unsafe { TimeSpec::at(sqe.addr() as usize) }.duration();
            let attached = match self.staged.last_mut() {
                Some(prev) if prev.sqe.is_linked() && prev.link_timeout.is_none() => {
                    prev.link_timeout = Some((sqe.user_data(), Instant::now() + limit));
                    true
                }
                _ => false,
            };
            if !attached {
                return Err(RingError::Unsupported(op::LINK_TIMEOUT));
            }
        } else {
            let mut item = self.items.alloc();
            sqe.copy_to(&item.sqe.view());
            self.staged.push(item);
        }
        self.staged_slots += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        if self.closed {
            return Err(RingError::Closed);
        }
        let accepted = self.staged_slots;
        self.in_flight += accepted;
        self.staged_slots = 0;

        let mut dispatched = false;
        for mut item in std::mem::take(&mut self.staged) {
            let sqe = item.sqe.view();
            let user_data = sqe.user_data();
            ktrace!("threaded submit {} ud={:#x}", op::name(sqe.opcode()), user_data);

            match sqe.opcode() {
                op::NOP => {
                    self.complete(user_data, 0);
                }
                op::TIMEOUT => self.arm_timer(&sqe),
                op::ASYNC_CANCEL => self.cancel(user_data, sqe.addr()),
                _ => {
                    self.shared
                        .registry
                        .lock()
                        .insert(user_data, ItemState::Queued);
                    let link = item.link_timeout;
                    if let Err(item) = self.shared.work.push(item) {
                        kwarn!("work queue full, failing ud={:#x}", user_data);
                        self.shared.registry.lock().remove(&user_data);
                        drop(item);
                        self.complete(user_data, -libc::EBUSY);
                        if let Some((link_ud, _)) = link {
                            self.complete(link_ud, -libc::ECANCELED);
                        }
                        continue;
                    }
                    dispatched = true;
                    continue;
                }
            }
            // inline opcodes never run a syscall, so an attached limit
            // can only lose the race
            if let Some((link_ud, _)) = item.link_timeout.take() {
                self.complete(link_ud, -libc::ECANCELED);
            }
        }

        if dispatched {
            for handle in &self.handles {
                handle.thread().unpark();
            }
        }
        Ok(accepted)
    }

    fn peek(&mut self, batch: &CompletionBatch) -> usize {
        while let Some((user_data, res, _flags)) = self.shared.results.pop() {
            self.complete(user_data, res);
        }
        self.fire_timers();
        self.ready.fill(batch)
    }

    fn advance(&mut self, count: usize) {
        self.ready.advance(count);
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn close(&mut self) -> bool {
        if self.closed {
            return true;
        }
        self.closed = true;
        self.shared.shutdown.store(true, Ordering::SeqCst);
        for handle in &self.handles {
            handle.thread().unpark();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        let dropped = self.shared.work.len() + self.timers.len() + self.staged.len();
        while self.shared.work.pop().is_some() {}
        self.timers.clear();
        self.staged.clear();
        kdebug!("threaded ring closed, {} entries dropped", dropped);
        // workers are joined: nothing touches entry memory any more
        true
    }
}

impl Drop for ThreadedRing {
    fn drop(&mut self) {
        self.close();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match shared.work.pop() {
            Some(item) => run_item(&shared, item),
            None => thread::park_timeout(IDLE_PARK),
        }
    }
}

/// One turn of one entry: execute it, time it out, or requeue it.
fn run_item(shared: &Shared, mut item: Pooled<WorkItem>) {
    let sqe = item.sqe.view();
    let user_data = sqe.user_data();
    let link = item.link_timeout;

    if !shared.transition(user_data, ItemState::Polling) {
        shared.finish(user_data, -libc::ECANCELED, link, -libc::ECANCELED);
        return;
    }

    let slice = match link {
        Some((_, deadline)) => deadline.saturating_duration_since(Instant::now()).min(POLL_SLICE),
        None => POLL_SLICE,
    };
    if !syscall::wait_ready(&sqe, slice) {
        if link.is_some_and(|(_, deadline)| Instant::now() >= deadline) {
            shared.finish(user_data, -libc::ECANCELED, link, -libc::ETIME);
            return;
        }
        if !shared.transition(user_data, ItemState::Queued) {
            shared.finish(user_data, -libc::ECANCELED, link, -libc::ECANCELED);
            return;
        }
        // queued + running entries never exceed the ring capacity
        if let Err(item) = shared.work.push(item) {
            kwarn!("work queue full on requeue, failing ud={:#x}", user_data);
            drop(item);
            shared.finish(user_data, -libc::EBUSY, link, -libc::ECANCELED);
        }
        return;
    }

    if !shared.transition(user_data, ItemState::Executing) {
        shared.finish(user_data, -libc::ECANCELED, link, -libc::ECANCELED);
        return;
    }
    shared.active.fetch_add(1, Ordering::Relaxed);
    let res = syscall::execute(&sqe);
    shared.active.fetch_sub(1, Ordering::Relaxed);
    shared.finish(user_data, res, link, -libc::ECANCELED);
}
