//! Ring backends.
//!
//! The proactor talks to the kernel only through [`RingBackend`]:
//!
//! ```text
//!   open ─► space_left/push ─► submit ─► peek(batch) ─► advance(n) ─► close
//! ```
//!
//! Entries are handed over as [`SubmissionEntry`] views and come back as
//! [`CompletionEntry`] records written into an off-heap
//! [`CompletionBatch`]. Two implementations exist: [`UringRing`] over
//! io_uring, and [`ThreadedRing`], which executes the same entries with
//! blocking syscalls on a worker pool for kernels or sandboxes where
//! io_uring is unavailable.

mod syscall;
mod threaded;

use std::collections::VecDeque;

use ringkit_core::offheap::OffHeapRegion;
use ringkit_core::shape::submission::{layout, sqe_flags};
use ringkit_core::shape::{CompletionEntry, Shape, SubmissionEntry};
use ringkit_core::{kinfo, kwarn, Failure};

use crate::config::{BackendKind, RingConfig};
use crate::error::Result;

pub use threaded::ThreadedRing;

/// `user_data` whose completions the proactor drops unseen: linked
/// timeouts and a backend's own housekeeping entries.
pub(crate) const SILENT_USER_DATA: u64 = u64::MAX;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod uring;
        pub use uring::UringRing;
    }
}

/// One 64-byte submission entry, owned, aligned like a ring slot.
#[repr(C, align(64))]
#[derive(Clone, Copy)]
pub struct SqeImage([u8; 64]);

impl SqeImage {
    pub const fn zeroed() -> Self {
        SqeImage([0; 64])
    }

    /// Shape over this image.
    pub fn view(&mut self) -> SubmissionEntry {
        unsafe { SubmissionEntry::at(self.0.as_mut_ptr() as usize) }
    }

    pub fn is_linked(&self) -> bool {
        self.0[layout::FLAGS.offset] & sqe_flags::IO_LINK != 0
    }
}

impl Default for SqeImage {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Off-heap array of completion entries filled by [`RingBackend::peek`].
pub struct CompletionBatch {
    region: OffHeapRegion,
    capacity: usize,
}

impl CompletionBatch {
    pub fn new(capacity: usize) -> std::result::Result<Self, Failure> {
        let capacity = capacity.max(1);
        Ok(CompletionBatch {
            region: OffHeapRegion::allocate(capacity * CompletionEntry::SIZE)?,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entry(&self, index: usize) -> Option<CompletionEntry> {
        if index >= self.capacity {
            return None;
        }
        Some(unsafe { CompletionEntry::at(self.region.address() + index * CompletionEntry::SIZE) })
    }
}

/// Completions taken off the backend but not yet advanced past.
#[derive(Debug, Default)]
pub(crate) struct ReadyQueue {
    entries: VecDeque<(u64, i32, u32)>,
}

impl ReadyQueue {
    pub fn push(&mut self, user_data: u64, res: i32, flags: u32) {
        self.entries.push_back((user_data, res, flags));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Copy the oldest entries into `batch` without consuming them.
    pub fn fill(&self, batch: &CompletionBatch) -> usize {
        let mut n = 0;
        for &(user_data, res, flags) in &self.entries {
            match batch.entry(n) {
                Some(cqe) => cqe.set(user_data, res, flags),
                None => break,
            }
            n += 1;
        }
        n
    }

    pub fn advance(&mut self, count: usize) {
        let count = count.min(self.entries.len());
        self.entries.drain(..count);
    }
}

/// The platform boundary of the proactor.
pub trait RingBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Submission slots in total.
    fn capacity(&self) -> usize;

    /// Submission slots free right now.
    fn space_left(&mut self) -> usize;

    /// Stage one entry. Fails with `RingError::Full` if no slot is free.
    fn push(&mut self, sqe: &SubmissionEntry) -> Result<()>;

    /// Hand staged entries over. Returns how many were accepted.
    fn submit(&mut self) -> Result<usize>;

    /// Copy up to `batch.capacity()` ready completions into `batch`,
    /// oldest first. Entries stay visible until [`advance`](Self::advance).
    fn peek(&mut self, batch: &CompletionBatch) -> usize;

    /// Consume the first `count` completions returned by `peek`.
    fn advance(&mut self, count: usize);

    /// Submitted operations whose completion has not been peeked yet.
    fn in_flight(&self) -> usize;

    /// Stop accepting entries and cancel what is in flight. Completions
    /// produced while closing stay available to `peek`.
    ///
    /// Returns `true` once nothing outside the caller references memory
    /// that submitted entries point at. On `false` the caller must not
    /// free that memory.
    fn close(&mut self) -> bool;
}

/// Build the backend `config` asks for.
pub fn open(config: &RingConfig) -> Result<Box<dyn RingBackend>> {
    config.validate()?;
    match config.backend {
        BackendKind::IoUring => open_uring(config),
        BackendKind::Threaded => Ok(Box::new(ThreadedRing::new(config)?)),
        BackendKind::Auto => match open_uring(config) {
            Ok(ring) => {
                kinfo!("using io_uring backend ({} entries)", config.entries);
                Ok(ring)
            }
            Err(e) => {
                kwarn!("io_uring unavailable ({}), falling back to threaded backend", e);
                Ok(Box::new(ThreadedRing::new(config)?))
            }
        },
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn open_uring(config: &RingConfig) -> Result<Box<dyn RingBackend>> {
            Ok(Box::new(UringRing::new(config)?))
        }
    } else {
        use crate::error::RingError;

        fn open_uring(_config: &RingConfig) -> Result<Box<dyn RingBackend>> {
            Err(RingError::Setup(libc::ENOSYS))
        }
    }
}
