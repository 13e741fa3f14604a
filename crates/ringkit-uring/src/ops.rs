//! Typed operations on [`Proactor`].
//!
//! Each method validates its arguments, builds the off-heap records the
//! kernel reads or writes, fills one submission entry and returns the
//! operation's [`Submitted`] promise. Records are owned by the decode
//! closure, so they live exactly until the completion is seen.
//!
//! A negative completion result always resolves as
//! `Failure::Native(-res)`.

use std::ffi::CString;
use std::net::SocketAddr;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ringkit_core::shape::submission::opcode as op;
use ringkit_core::{
    Failure, FileStat, OffHeapBuffer, OffHeapFileStat, OffHeapIoVector, OffHeapSocketAddress,
    OffHeapTimeSpec, PromiseResult, StatFlags, StatMask, Timeout,
};

use crate::proactor::{Proactor, Submitted, Token};
use crate::socket::{self, ServerConfig, ServerConnector, SocketFamily, SocketFlags, SocketOptions, SocketType};
use crate::splice::SpliceParams;

/// Offset meaning "the descriptor's current position".
pub const CURRENT_POSITION: u64 = u64::MAX;

/// Directory descriptor meaning "relative to the working directory".
const AT_FDCWD: RawFd = libc::AT_FDCWD;

/// Result of a successful accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub fd: RawFd,
    /// `None` when the peer address family is not IPv4 or IPv6.
    pub peer: Option<SocketAddr>,
}

#[inline]
fn native(res: i32) -> PromiseResult<u32> {
    if res < 0 {
        Err(Failure::native(-res))
    } else {
        Ok(res as u32)
    }
}

fn c_path(path: &Path) -> Result<CString, Failure> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| Failure::InvalidArgument("path contains a NUL byte"))
}

fn io_len(len: usize) -> u32 {
    len.min(u32::MAX as usize) as u32
}

impl Proactor {
    /// Submit an operation that does nothing.
    pub fn nop(&self) -> Submitted<()> {
        self.submit_op(
            |sqe| sqe.prep_rw(op::NOP, -1, 0, 0, 0),
            None,
            |res| native(res).map(|_| ()),
        )
    }

    /// Resolve after `timeout` with the time actually elapsed.
    ///
    /// The timer counts no completions, so it only ends by expiring or by
    /// being cancelled.
    pub fn delay(&self, timeout: Timeout) -> Submitted<Duration> {
        let spec = match OffHeapTimeSpec::new(timeout.as_duration()) {
            Ok(spec) => spec,
            Err(f) => return Submitted::failed(f),
        };
        let addr = spec.address();
        let start = Instant::now();
        self.submit_op(
            |sqe| sqe.prep_rw(op::TIMEOUT, -1, addr, 1, 0),
            None,
            move |res| {
                drop(spec);
                if res == -libc::ETIME || res >= 0 {
                    Ok(start.elapsed())
                } else {
                    Err(Failure::native(-res))
                }
            },
        )
    }

    /// Read into `buf` at `offset` ([`CURRENT_POSITION`] for streams).
    /// On success the buffer's used length is the byte count.
    pub fn read(
        &self,
        fd: RawFd,
        buf: &Arc<OffHeapBuffer>,
        offset: u64,
        timeout: Option<Timeout>,
    ) -> Submitted<usize> {
        let buf = Arc::clone(buf);
        let (addr, len) = (buf.address(), io_len(buf.capacity()));
        self.submit_op(
            |sqe| sqe.prep_rw(op::READ, fd, addr, len, offset),
            timeout,
            move |res| {
                let n = native(res)? as usize;
                buf.set_used(n);
                Ok(n)
            },
        )
    }

    /// Write the used bytes of `buf`.
    pub fn write(
        &self,
        fd: RawFd,
        buf: &Arc<OffHeapBuffer>,
        offset: u64,
        timeout: Option<Timeout>,
    ) -> Submitted<usize> {
        let buf = Arc::clone(buf);
        let (addr, len) = (buf.address(), io_len(buf.used()));
        self.submit_op(
            |sqe| sqe.prep_rw(op::WRITE, fd, addr, len, offset),
            timeout,
            move |res| {
                drop(buf);
                Ok(native(res)? as usize)
            },
        )
    }

    /// Scatter read into `buffers`, filling them in order. Each buffer's
    /// used length is set to the bytes that landed in it.
    pub fn read_vector(
        &self,
        fd: RawFd,
        buffers: Vec<Arc<OffHeapBuffer>>,
        offset: u64,
        timeout: Option<Timeout>,
    ) -> Submitted<usize> {
        let iov = match OffHeapIoVector::for_read(buffers) {
            Ok(iov) => iov,
            Err(f) => return Submitted::failed(f),
        };
        let (addr, count) = (iov.address(), iov.count() as u32);
        self.submit_op(
            |sqe| sqe.prep_rw(op::READV, fd, addr, count, offset),
            timeout,
            move |res| {
                let n = native(res)? as usize;
                iov.distribute(n);
                Ok(n)
            },
        )
    }

    /// Gather write of the used bytes of every buffer.
    pub fn write_vector(
        &self,
        fd: RawFd,
        buffers: Vec<Arc<OffHeapBuffer>>,
        offset: u64,
        timeout: Option<Timeout>,
    ) -> Submitted<usize> {
        let iov = match OffHeapIoVector::for_write(buffers) {
            Ok(iov) => iov,
            Err(f) => return Submitted::failed(f),
        };
        let (addr, count) = (iov.address(), iov.count() as u32);
        self.submit_op(
            |sqe| sqe.prep_rw(op::WRITEV, fd, addr, count, offset),
            timeout,
            move |res| {
                drop(iov);
                Ok(native(res)? as usize)
            },
        )
    }

    /// Accept one connection on listening socket `fd`. `flags` are the
    /// `accept4` flags, e.g. `SOCK_CLOEXEC`.
    pub fn accept(&self, fd: RawFd, flags: i32) -> Submitted<Accepted> {
        let peer = match OffHeapSocketAddress::for_accept() {
            Ok(peer) => peer,
            Err(f) => return Submitted::failed(f),
        };
        let (addr, len_addr) = (peer.address(), peer.len_address());
        self.submit_op(
            |sqe| {
                sqe.prep_rw(op::ACCEPT, fd, addr, 0, len_addr as u64);
                sqe.set_op_flags(flags as u32);
            },
            None,
            move |res| {
                let fd = native(res)? as RawFd;
                Ok(Accepted { fd, peer: peer.socket_addr() })
            },
        )
    }

    pub fn connect(&self, fd: RawFd, to: SocketAddr, timeout: Option<Timeout>) -> Submitted<()> {
        let addr = match OffHeapSocketAddress::from_socket_addr(&to) {
            Ok(addr) => addr,
            Err(f) => return Submitted::failed(f),
        };
        let (ptr, len) = (addr.address(), addr.len());
        self.submit_op(
            |sqe| sqe.prep_rw(op::CONNECT, fd, ptr, 0, len as u64),
            timeout,
            move |res| {
                drop(addr);
                native(res).map(|_| ())
            },
        )
    }

    /// Create a socket and switch on `options`.
    ///
    /// The socket is created synchronously when the ring hands back the
    /// carrier `NOP`, so it resolves from `process()` like every other
    /// operation.
    pub fn socket(
        &self,
        family: SocketFamily,
        kind: SocketType,
        flags: SocketFlags,
        options: SocketOptions,
    ) -> Submitted<RawFd> {
        self.submit_op(
            |sqe| sqe.prep_rw(op::NOP, -1, 0, 0, 0),
            None,
            move |res| {
                native(res)?;
                Ok(socket::open_socket(family, kind, flags, options)?.into_raw_fd())
            },
        )
    }

    /// Create a socket bound to `config.address` and listening on it.
    pub fn server(&self, config: ServerConfig) -> Submitted<ServerConnector> {
        self.submit_op(
            |sqe| sqe.prep_rw(op::NOP, -1, 0, 0, 0),
            None,
            move |res| {
                native(res)?;
                socket::open_server(&config)
            },
        )
    }

    /// Move bytes between two descriptors inside the kernel. Resolves
    /// with the byte count; 0 means end of input.
    pub fn splice(&self, params: SpliceParams, timeout: Option<Timeout>) -> Submitted<usize> {
        if let Err(f) = params.validate() {
            return Submitted::failed(f);
        }
        self.submit_op(
            |sqe| {
                sqe.prep_rw(op::SPLICE, params.to.fd(), 0, params.len, params.to.wire_offset());
                sqe.set_splice_fd_in(params.from.fd());
                sqe.set_splice_off_in(params.from.wire_offset());
                sqe.set_op_flags(params.flags.bits());
            },
            timeout,
            |res| Ok(native(res)? as usize),
        )
    }

    /// `statx` on `path`, resolved against the working directory.
    pub fn stat_path(&self, path: &Path, flags: StatFlags, mask: StatMask) -> Submitted<FileStat> {
        let path = match c_path(path) {
            Ok(path) => path,
            Err(f) => return Submitted::failed(f),
        };
        self.stat(AT_FDCWD, path, flags.without(StatFlags::EMPTY_PATH), mask)
    }

    /// `statx` on an open descriptor.
    pub fn stat_fd(&self, fd: RawFd, flags: StatFlags, mask: StatMask) -> Submitted<FileStat> {
        self.stat(fd, CString::default(), flags.with(StatFlags::EMPTY_PATH), mask)
    }

    fn stat(&self, dirfd: RawFd, path: CString, flags: StatFlags, mask: StatMask) -> Submitted<FileStat> {
        let record = match OffHeapFileStat::new() {
            Ok(record) => record,
            Err(f) => return Submitted::failed(f),
        };
        let (path_addr, stat_addr) = (path.as_ptr() as usize, record.address());
        self.submit_op(
            |sqe| {
                sqe.prep_rw(op::STATX, dirfd, path_addr, mask.bits(), stat_addr as u64);
                sqe.set_op_flags(flags.bits());
            },
            None,
            move |res| {
                drop(path);
                native(res)?;
                Ok(record.decode())
            },
        )
    }

    /// Open `path` relative to the working directory. `flags` are
    /// `O_*` flags, `mode` applies when creating.
    pub fn open(&self, path: &Path, flags: i32, mode: u32, timeout: Option<Timeout>) -> Submitted<RawFd> {
        let path = match c_path(path) {
            Ok(path) => path,
            Err(f) => return Submitted::failed(f),
        };
        let path_addr = path.as_ptr() as usize;
        self.submit_op(
            |sqe| {
                sqe.prep_rw(op::OPENAT, AT_FDCWD, path_addr, mode, 0);
                sqe.set_op_flags(flags as u32);
            },
            timeout,
            move |res| {
                drop(path);
                Ok(native(res)? as RawFd)
            },
        )
    }

    pub fn close(&self, fd: RawFd, timeout: Option<Timeout>) -> Submitted<()> {
        self.submit_op(
            |sqe| sqe.prep_rw(op::CLOSE, fd, 0, 0, 0),
            timeout,
            |res| native(res).map(|_| ()),
        )
    }

    /// Ask the ring to cancel the operation behind `token`.
    ///
    /// Resolves once the cancel itself completes. The target still
    /// resolves on its own, usually with `ECANCELED`. Fails with `ENOENT`
    /// if the target is unknown and `EALREADY` if it is already running.
    pub fn cancel(&self, token: Token) -> Submitted<()> {
        if !token.is_valid() {
            return Submitted::failed(Failure::InvalidArgument("token of a failed request"));
        }
        self.submit_op(
            |sqe| {
                sqe.prep_rw(op::ASYNC_CANCEL, -1, 0, 0, 0);
                sqe.set_addr(token.user_data());
            },
            None,
            |res| native(res).map(|_| ()),
        )
    }
}
