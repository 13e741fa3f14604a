//! Ring of independently lockable submission buffers.
//!
//! Producers `request()` an entry, append deadline tasks to it and drop
//! the guard. Collectors `try_lock()` the entries of their shard and purge
//! them. The lock is a bare CAS flag: holding it says nothing about
//! whether the entry has tasks.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use crate::error::{Result, SchedulerError};

pub(crate) type Task = Box<dyn FnOnce() + Send>;

/// A task with the instant it may fire at.
pub(crate) struct TimedTask {
    pub deadline: Instant,
    pub task: Task,
}

pub(crate) struct BufferEntry {
    locked: AtomicBool,
    tasks: UnsafeCell<Vec<TimedTask>>,
}

// Safety: `tasks` is only touched through an `EntryGuard`, which exists
// only while `locked` is held.
unsafe impl Sync for BufferEntry {}

impl BufferEntry {
    fn new() -> Self {
        BufferEntry {
            locked: AtomicBool::new(false),
            tasks: UnsafeCell::new(Vec::new()),
        }
    }

    fn try_lock(&self) -> Option<EntryGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| EntryGuard { entry: self })
    }
}

/// Exclusive access to one entry. Releases the entry on drop.
pub(crate) struct EntryGuard<'a> {
    entry: &'a BufferEntry,
}

impl EntryGuard<'_> {
    pub fn add(&mut self, deadline: Instant, task: Task) {
        self.tasks().push(TimedTask { deadline, task });
    }

    /// Take every queued task, leaving the entry empty.
    pub fn purge(&mut self) -> Vec<TimedTask> {
        std::mem::take(self.tasks())
    }

    pub fn len(&mut self) -> usize {
        self.tasks().len()
    }

    fn tasks(&mut self) -> &mut Vec<TimedTask> {
        // Safety: the guard holds the entry lock.
        unsafe { &mut *self.entry.tasks.get() }
    }
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        self.entry.locked.store(false, Ordering::Release);
    }
}

pub(crate) struct RingBuffer {
    entries: Box<[BufferEntry]>,
    sequence: AtomicUsize,
}

impl RingBuffer {
    pub fn new(size: usize) -> Self {
        RingBuffer {
            entries: (0..size.max(1)).map(|_| BufferEntry::new()).collect(),
            sequence: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Lock the first free entry, scanning at most one full lap from a
    /// rotating start position.
    pub fn request(&self) -> Result<EntryGuard<'_>> {
        let size = self.entries.len();
        let start = self.sequence.fetch_add(1, Ordering::Relaxed);
        (0..size)
            .find_map(|i| self.entries[(start + i) % size].try_lock())
            .ok_or(SchedulerError::NoFreeSlots)
    }

    pub fn try_lock(&self, index: usize) -> Option<EntryGuard<'_>> {
        self.entries.get(index)?.try_lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excess_requests_fail() {
        let ring = RingBuffer::new(4);
        let held: Vec<_> = (0..4).map(|_| ring.request().unwrap()).collect();
        assert!(matches!(ring.request(), Err(SchedulerError::NoFreeSlots)));
        assert!(matches!(ring.request(), Err(SchedulerError::NoFreeSlots)));
        drop(held);
        assert!(ring.request().is_ok());
    }

    #[test]
    fn test_released_slot_is_requestable_again() {
        let ring = RingBuffer::new(2);
        let a = ring.request().unwrap();
        let b = ring.request().unwrap();
        drop(a);
        let c = ring.request();
        assert!(c.is_ok());
        drop(b);
    }

    #[test]
    fn test_purge_requires_lock_and_empties() {
        let ring = RingBuffer::new(1);
        {
            let mut g = ring.request().unwrap();
            g.add(Instant::now(), Box::new(|| {}));
            g.add(Instant::now(), Box::new(|| {}));
        }
        let mut g = ring.try_lock(0).unwrap();
        assert!(ring.try_lock(0).is_none());
        assert_eq!(g.purge().len(), 2);
        assert_eq!(g.len(), 0);
        assert!(ring.try_lock(9).is_none());
    }
}
