//! Blocking execution of submission entries.
//!
//! Used by the threaded ring: each function reads the same SQE fields the
//! kernel would and returns a CQE-style result, the byte count or value on
//! success and `-errno` on failure.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use ringkit_core::shape::submission::opcode as op;
use ringkit_core::shape::SubmissionEntry;

/// `off` value meaning "use and advance the file position".
pub(crate) const CURRENT_POSITION: u64 = u64::MAX;

#[inline]
fn check(ret: isize) -> i32 {
    if ret < 0 {
        -Errno::last_raw()
    } else {
        ret.min(i32::MAX as isize) as i32
    }
}

#[inline]
fn offset_ptr(off: &mut u64) -> *mut libc::loff_t {
    if *off == CURRENT_POSITION {
        std::ptr::null_mut()
    } else {
        off as *mut u64 as *mut libc::loff_t
    }
}

/// Run `sqe` to completion on the calling thread.
pub(crate) fn execute(sqe: &SubmissionEntry) -> i32 {
    let fd = sqe.fd();
    let addr = sqe.addr();
    let off = sqe.off();
    let len = sqe.len();
    let op_flags = sqe.op_flags();

    // Safety: the proactor keeps every buffer, record and path referenced
    // by the entry alive until the completion is reaped.
    unsafe {
        match sqe.opcode() {
            op::NOP => 0,

            op::READ => check(if off == CURRENT_POSITION {
                libc::read(fd, addr as *mut libc::c_void, len as usize)
            } else {
                libc::pread(fd, addr as *mut libc::c_void, len as usize, off as libc::off_t)
            }),

            op::WRITE => check(if off == CURRENT_POSITION {
                libc::write(fd, addr as *const libc::c_void, len as usize)
            } else {
                libc::pwrite(fd, addr as *const libc::c_void, len as usize, off as libc::off_t)
            }),

            op::READV => check(if off == CURRENT_POSITION {
                libc::readv(fd, addr as *const libc::iovec, len as libc::c_int)
            } else {
                libc::preadv(fd, addr as *const libc::iovec, len as libc::c_int, off as libc::off_t)
            }),

            op::WRITEV => check(if off == CURRENT_POSITION {
                libc::writev(fd, addr as *const libc::iovec, len as libc::c_int)
            } else {
                libc::pwritev(fd, addr as *const libc::iovec, len as libc::c_int, off as libc::off_t)
            }),

            op::ACCEPT => {
                let (peer, peer_len) = if addr == 0 {
                    (std::ptr::null_mut(), std::ptr::null_mut())
                } else {
                    (addr as *mut libc::sockaddr, off as *mut libc::socklen_t)
                };
                check(libc::accept4(fd, peer, peer_len, op_flags as libc::c_int) as isize)
            }

            op::CONNECT => check(
                libc::connect(fd, addr as *const libc::sockaddr, off as libc::socklen_t) as isize,
            ),

            op::SPLICE => {
                let mut off_in = sqe.splice_off_in();
                let mut off_out = off;
                check(libc::splice(
                    sqe.splice_fd_in(),
                    offset_ptr(&mut off_in),
                    fd,
                    offset_ptr(&mut off_out),
                    len as usize,
                    op_flags as libc::c_uint,
                ))
            }

            op::STATX => check(libc::syscall(
                libc::SYS_statx,
                fd as libc::c_long,
                addr as libc::c_long,
                op_flags as libc::c_long,
                len as libc::c_long,
                off as libc::c_long,
            ) as isize),

            op::OPENAT => check(libc::openat(
                fd,
                addr as *const libc::c_char,
                op_flags as libc::c_int,
                len as libc::c_uint,
            ) as isize),

            op::CLOSE => check(libc::close(fd) as isize),

            _ => -libc::EINVAL,
        }
    }
}

/// The descriptor and poll event an entry blocks on, if it is
/// readiness-driven.
fn readiness(sqe: &SubmissionEntry) -> Option<(i32, libc::c_short)> {
    match sqe.opcode() {
        op::READ | op::READV | op::ACCEPT => Some((sqe.fd(), libc::POLLIN)),
        op::WRITE | op::WRITEV => Some((sqe.fd(), libc::POLLOUT)),
        op::SPLICE => Some((sqe.splice_fd_in(), libc::POLLIN)),
        _ => None,
    }
}

/// Wait up to `limit` for `sqe`'s descriptor to become ready.
///
/// Returns `false` only when the wait ran out. Entries that are not
/// readiness-driven, and poll errors, count as ready so that `execute`
/// reports the real outcome.
pub(crate) fn wait_ready(sqe: &SubmissionEntry, limit: Duration) -> bool {
    let Some((fd, events)) = readiness(sqe) else {
        return true;
    };
    let deadline = Instant::now() + limit;
    let mut pfd = libc::pollfd { fd, events, revents: 0 };
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        // round up so a sub-millisecond remainder still waits
        let ms = left.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as libc::c_int;
        let n = unsafe { libc::poll(&mut pfd, 1, ms) };
        match n {
            0 if Instant::now() >= deadline => return false,
            0 => continue,
            n if n > 0 => return true,
            _ if Errno::last() == Errno::EINTR => continue,
            _ => return true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::SqeImage;

    fn pipe() -> (i32, i32) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_read_write_pipe() {
        let (r, w) = pipe();
        let data = *b"hello";
        let mut out = [0u8; 8];

        let mut img = SqeImage::zeroed();
        let sqe = img.view();
        sqe.prep_rw(op::WRITE, w, data.as_ptr() as usize, 5, CURRENT_POSITION);
        assert_eq!(execute(&sqe), 5);

        sqe.prep_rw(op::READ, r, out.as_mut_ptr() as usize, 8, CURRENT_POSITION);
        assert_eq!(execute(&sqe), 5);
        assert_eq!(&out[..5], b"hello");

        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn test_errors_are_negative_errno() {
        let mut img = SqeImage::zeroed();
        let sqe = img.view();
        sqe.prep_rw(op::CLOSE, -1, 0, 0, 0);
        assert_eq!(execute(&sqe), -libc::EBADF);

        sqe.prep_rw(200, 0, 0, 0, 0);
        assert_eq!(execute(&sqe), -libc::EINVAL);
    }

    #[test]
    fn test_wait_ready_times_out_on_empty_pipe() {
        let (r, w) = pipe();
        let mut img = SqeImage::zeroed();
        let sqe = img.view();
        sqe.prep_rw(op::READ, r, 0, 0, CURRENT_POSITION);

        let start = Instant::now();
        assert!(!wait_ready(&sqe, Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));

        assert_eq!(unsafe { libc::write(w, b"x".as_ptr() as *const libc::c_void, 1) }, 1);
        assert!(wait_ready(&sqe, Duration::from_millis(20)));

        sqe.prep_rw(op::CLOSE, r, 0, 0, 0);
        assert!(wait_ready(&sqe, Duration::ZERO));
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }
}
