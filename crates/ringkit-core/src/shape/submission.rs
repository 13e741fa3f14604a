//! Submission queue entry (64 bytes).
//!
//! Offsets follow `struct io_uring_sqe` from `<linux/io_uring.h>`. Several
//! fields are unions in the kernel header; they get one `RawField` per
//! alias so call sites read in terms of the operation they prepare.

use super::{field, shape_view, RawField, Shape};
use crate::raw::{self, Address};

pub mod layout {
    use super::RawField;

    pub const SIZE: usize = 64;

    pub const OPCODE: RawField = RawField::new(0, 1);
    pub const FLAGS: RawField = RawField::new(1, 1);
    pub const IOPRIO: RawField = RawField::new(2, 2);
    pub const FD: RawField = RawField::new(4, 4);
    pub const OFF: RawField = RawField::new(8, 8);
    /// Alias of `OFF`.
    pub const ADDR2: RawField = RawField::new(8, 8);
    pub const ADDR: RawField = RawField::new(16, 8);
    /// Alias of `ADDR`.
    pub const SPLICE_OFF_IN: RawField = RawField::new(16, 8);
    pub const LEN: RawField = RawField::new(24, 4);
    /// rw_flags / timeout_flags / accept_flags / cancel_flags /
    /// open_flags / statx_flags / splice_flags.
    pub const OP_FLAGS: RawField = RawField::new(28, 4);
    pub const USER_DATA: RawField = RawField::new(32, 8);
    pub const BUF_INDEX: RawField = RawField::new(40, 2);
    pub const PERSONALITY: RawField = RawField::new(42, 2);
    pub const SPLICE_FD_IN: RawField = RawField::new(44, 4);
}

/// Opcodes used by the proactor.
pub mod opcode {
    pub const NOP: u8 = 0;
    pub const READV: u8 = 1;
    pub const WRITEV: u8 = 2;
    pub const TIMEOUT: u8 = 11;
    pub const ACCEPT: u8 = 13;
    pub const ASYNC_CANCEL: u8 = 14;
    pub const LINK_TIMEOUT: u8 = 15;
    pub const CONNECT: u8 = 16;
    pub const OPENAT: u8 = 18;
    pub const CLOSE: u8 = 19;
    pub const STATX: u8 = 21;
    pub const READ: u8 = 22;
    pub const WRITE: u8 = 23;
    pub const SPLICE: u8 = 30;

    pub fn name(op: u8) -> &'static str {
        match op {
            NOP => "nop",
            READV => "readv",
            WRITEV => "writev",
            TIMEOUT => "timeout",
            ACCEPT => "accept",
            ASYNC_CANCEL => "cancel",
            LINK_TIMEOUT => "link_timeout",
            CONNECT => "connect",
            OPENAT => "openat",
            CLOSE => "close",
            STATX => "statx",
            READ => "read",
            WRITE => "write",
            SPLICE => "splice",
            _ => "unknown",
        }
    }
}

/// `IOSQE_*` entry flags.
pub mod sqe_flags {
    pub const FIXED_FILE: u8 = 1 << 0;
    pub const IO_DRAIN: u8 = 1 << 1;
    pub const IO_LINK: u8 = 1 << 2;
    pub const IO_HARDLINK: u8 = 1 << 3;
    pub const ASYNC: u8 = 1 << 4;
}

shape_view!(
    /// View over one `io_uring_sqe`.
    SubmissionEntry,
    layout::SIZE
);

impl SubmissionEntry {
    field!(opcode, set_opcode, layout::OPCODE, u8, raw::get_u8, raw::put_u8);
    field!(flags, set_flags, layout::FLAGS, u8, raw::get_u8, raw::put_u8);
    field!(ioprio, set_ioprio, layout::IOPRIO, u16, raw::get_u16, raw::put_u16);
    field!(fd, set_fd, layout::FD, i32, raw::get_i32, raw::put_i32);
    field!(off, set_off, layout::OFF, u64, raw::get_u64, raw::put_u64);
    field!(addr2, set_addr2, layout::ADDR2, u64, raw::get_u64, raw::put_u64);
    field!(addr, set_addr, layout::ADDR, u64, raw::get_u64, raw::put_u64);
    field!(splice_off_in, set_splice_off_in, layout::SPLICE_OFF_IN, u64, raw::get_u64, raw::put_u64);
    field!(len, set_len, layout::LEN, u32, raw::get_u32, raw::put_u32);
    field!(op_flags, set_op_flags, layout::OP_FLAGS, u32, raw::get_u32, raw::put_u32);
    field!(user_data, set_user_data, layout::USER_DATA, u64, raw::get_u64, raw::put_u64);
    field!(buf_index, set_buf_index, layout::BUF_INDEX, u16, raw::get_u16, raw::put_u16);
    field!(personality, set_personality, layout::PERSONALITY, u16, raw::get_u16, raw::put_u16);
    field!(splice_fd_in, set_splice_fd_in, layout::SPLICE_FD_IN, i32, raw::get_i32, raw::put_i32);

    /// Zero the entry and fill the fields every read/write style opcode
    /// shares, the way `io_uring_prep_rw` does.
    pub fn prep_rw(&self, op: u8, fd: i32, addr: Address, len: u32, off: u64) {
        self.clear();
        self.set_opcode(op);
        self.set_fd(fd);
        self.set_off(off);
        self.set_addr(addr as u64);
        self.set_len(len);
    }

    /// Set bits in `flags`, keeping the existing ones.
    pub fn add_flags(&self, bits: u8) {
        self.set_flags(self.flags() | bits);
    }

    pub fn is_linked(&self) -> bool {
        self.flags() & sqe_flags::IO_LINK != 0
    }

    /// Copy the full 64-byte entry into `dst`.
    pub fn copy_to(&self, dst: &SubmissionEntry) {
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.address() as *const u8,
                dst.address() as *mut u8,
                Self::SIZE,
            )
        }
    }
}
