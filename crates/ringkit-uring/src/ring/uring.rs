//! `UringRing`: the io_uring backend.
//!
//! Wraps the `io-uring` crate. Each staged [`SubmissionEntry`] is
//! translated field by field into the crate's typed opcode builder, so
//! the proactor keeps one entry format for every backend. No SQPOLL, no
//! fixed files, no registered buffers.

use std::os::unix::io::{AsRawFd, RawFd};
use std::thread;
use std::time::{Duration, Instant};

use io_uring::{opcode, squeue, types, IoUring};
use ringkit_core::shape::submission::opcode as op;
use ringkit_core::shape::SubmissionEntry;
use ringkit_core::{kdebug, ktrace, kwarn};

use super::{CompletionBatch, ReadyQueue, RingBackend, SILENT_USER_DATA};
use crate::config::{BackendKind, RingConfig};
use crate::error::{Result, RingError};

/// How long `close` waits for cancelled entries to come back.
const CLOSE_DRAIN: Duration = Duration::from_secs(2);

pub struct UringRing {
    ring: IoUring,
    ready: ReadyQueue,
    staged: usize,
    in_flight: usize,
    closed: bool,
}

impl UringRing {
    pub fn new(config: &RingConfig) -> Result<Self> {
        let ring = IoUring::builder()
            .build(config.entries)
            .map_err(|e| RingError::Setup(e.raw_os_error().unwrap_or(-1)))?;
        kdebug!(
            "io_uring ready: sq={} cq={}",
            ring.params().sq_entries(),
            ring.params().cq_entries()
        );
        Ok(UringRing {
            ring,
            ready: ReadyQueue::default(),
            staged: 0,
            in_flight: 0,
            closed: false,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.ring.as_raw_fd()
    }

    /// Translate one entry into the crate's typed form.
    ///
    /// Field usage per opcode matches the way the proactor fills entries:
    /// `addr` carries the buffer/path/timespec/sockaddr pointer, `off` the
    /// file offset or a secondary pointer, `len` the length or mask.
    fn translate(sqe: &SubmissionEntry) -> Result<squeue::Entry> {
        let fd = types::Fd(sqe.fd());
        let addr = sqe.addr();
        let off = sqe.off();
        let len = sqe.len();
        let op_flags = sqe.op_flags();

        let entry = match sqe.opcode() {
            op::NOP => opcode::Nop::new().build(),

            // ── Plain and vectored I/O ──
            op::READ => opcode::Read::new(fd, addr as *mut u8, len).offset(off).build(),
            op::WRITE => opcode::Write::new(fd, addr as *const u8, len).offset(off).build(),
            op::READV => opcode::Readv::new(fd, addr as *const libc::iovec, len).offset(off).build(),
            op::WRITEV => opcode::Writev::new(fd, addr as *const libc::iovec, len).offset(off).build(),

            // ── Timers ──
            op::TIMEOUT => opcode::Timeout::new(addr as *const types::Timespec)
                .count(off as u32)
                .flags(types::TimeoutFlags::from_bits_truncate(op_flags))
                .build(),
            op::LINK_TIMEOUT => opcode::LinkTimeout::new(addr as *const types::Timespec)
                .flags(types::TimeoutFlags::from_bits_truncate(op_flags))
                .build(),

            // ── Sockets ──
            // accept: addr = sockaddr out, off = socklen_t in/out
            op::ACCEPT => opcode::Accept::new(fd, addr as *mut libc::sockaddr, off as *mut libc::socklen_t)
                .flags(op_flags as i32)
                .build(),
            // connect: addr = sockaddr, off = its length
            op::CONNECT => opcode::Connect::new(fd, addr as *const libc::sockaddr, off as libc::socklen_t).build(),

            // ── Splice ──
            // fd/off is the destination, splice_fd_in/splice_off_in the source
            op::SPLICE => opcode::Splice::new(
                types::Fd(sqe.splice_fd_in()),
                sqe.splice_off_in() as i64,
                fd,
                off as i64,
                len,
            )
            .flags(op_flags)
            .build(),

            // ── File lifecycle ──
            // statx: addr = path, len = mask, off = statx buffer
            op::STATX => opcode::Statx::new(fd, addr as *const libc::c_char, off as *mut types::statx)
                .flags(op_flags as i32)
                .mask(len)
                .build(),
            // openat: addr = path, op_flags = open flags, len = mode
            op::OPENAT => opcode::OpenAt::new(fd, addr as *const libc::c_char)
                .flags(op_flags as i32)
                .mode(len as libc::mode_t)
                .build(),
            op::CLOSE => opcode::Close::new(fd).build(),

            // addr = user_data of the target
            op::ASYNC_CANCEL => opcode::AsyncCancel::new(addr).build(),

            other => return Err(RingError::Unsupported(other)),
        };

        Ok(entry
            .flags(squeue::Flags::from_bits_truncate(sqe.flags()))
            .user_data(sqe.user_data()))
    }

    fn drain_kernel_cq(&mut self) {
        for cqe in self.ring.completion() {
            self.ready.push(cqe.user_data(), cqe.result(), cqe.flags());
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }
}

impl RingBackend for UringRing {
    fn kind(&self) -> BackendKind {
        BackendKind::IoUring
    }

    fn capacity(&self) -> usize {
        self.ring.params().sq_entries() as usize
    }

    fn space_left(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        let sq = self.ring.submission();
        sq.capacity() - sq.len()
    }

    fn push(&mut self, sqe: &SubmissionEntry) -> Result<()> {
        if self.closed {
            return Err(RingError::Closed);
        }
        let entry = Self::translate(sqe)?;
        // Safety: every pointer in the entry refers to memory the proactor
        // keeps alive until the matching completion is reaped.
        unsafe {
            self.ring
                .submission()
                .push(&entry)
                .map_err(|_| RingError::Full)?;
        }
        self.staged += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        if self.staged == 0 {
            return Ok(0);
        }
        let submitted = self
            .ring
            .submit()
            .map_err(|e| RingError::Submit(e.raw_os_error().unwrap_or(-1)))?;
        ktrace!("io_uring submit: staged={} accepted={}", self.staged, submitted);
        self.in_flight += submitted;
        self.staged -= submitted.min(self.staged);
        Ok(submitted)
    }

    fn peek(&mut self, batch: &CompletionBatch) -> usize {
        if self.ready.len() < batch.capacity() {
            self.drain_kernel_cq();
        }
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
            return self.in_flight == 0;
        }
        self.closed = true;
        if self.in_flight + self.staged == 0 {
            return true;
        }

        // One entry cancels everything in flight (5.19+). On older kernels
        // it fails with EINVAL and the drain below waits for natural
        // completions only.
        let cancel = opcode::AsyncCancel2::new(types::CancelBuilder::any())
            .build()
            .user_data(SILENT_USER_DATA);
        // Safety: the cancel entry carries no pointers.
        let mut queued = unsafe { self.ring.submission().push(&cancel).is_ok() };
        if !queued {
            let _ = self.submit();
            queued = unsafe { self.ring.submission().push(&cancel).is_ok() };
        }
        if queued {
            self.staged += 1;
        }
        if let Err(e) = self.submit() {
            kwarn!("io_uring close: cancel submit failed: {}", e);
        }

        let deadline = Instant::now() + CLOSE_DRAIN;
        loop {
            self.drain_kernel_cq();
            if self.in_flight == 0 || Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if self.in_flight > 0 {
            kwarn!("io_uring closed with {} entries still owned by the kernel", self.in_flight);
        } else {
            kdebug!("io_uring closed");
        }
        self.in_flight == 0
    }
}
