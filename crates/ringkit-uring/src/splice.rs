//! Splice parameters.

use std::os::unix::io::RawFd;

use ringkit_core::Failure;

/// `SPLICE_F_*` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpliceFlags(u32);

impl SpliceFlags {
    pub const NONE: SpliceFlags = SpliceFlags(0);
    pub const MOVE: SpliceFlags = SpliceFlags(1);
    pub const NONBLOCK: SpliceFlags = SpliceFlags(2);
    pub const MORE: SpliceFlags = SpliceFlags(4);
    pub const GIFT: SpliceFlags = SpliceFlags(8);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: SpliceFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for SpliceFlags {
    type Output = SpliceFlags;

    fn bitor(self, rhs: SpliceFlags) -> SpliceFlags {
        SpliceFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndKind {
    File,
    Pipe,
    Socket,
}

/// One side of a splice.
///
/// Only file ends carry an offset. Pipes and sockets are read or written
/// at their current position, which the kernel expects as offset `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceEnd {
    fd: RawFd,
    offset: u64,
    kind: EndKind,
}

impl SpliceEnd {
    pub const fn file(fd: RawFd, offset: u64) -> Self {
        SpliceEnd { fd, offset, kind: EndKind::File }
    }

    pub const fn pipe(fd: RawFd) -> Self {
        SpliceEnd { fd, offset: 0, kind: EndKind::Pipe }
    }

    pub const fn socket(fd: RawFd) -> Self {
        SpliceEnd { fd, offset: 0, kind: EndKind::Socket }
    }

    /// A socket or pipe end that claims an offset. Rejected by
    /// [`SpliceParams::validate`].
    pub const fn positioned(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset as written into the submission entry.
    pub(crate) const fn wire_offset(&self) -> u64 {
        match self.kind {
            EndKind::File => self.offset,
            EndKind::Pipe | EndKind::Socket => u64::MAX,
        }
    }
}

/// A validated kernel-space copy request: `len` bytes from `from` to `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceParams {
    pub from: SpliceEnd,
    pub to: SpliceEnd,
    pub len: u32,
    pub flags: SpliceFlags,
}

impl SpliceParams {
    pub fn new(from: SpliceEnd, to: SpliceEnd, len: u32) -> Self {
        SpliceParams { from, to, len, flags: SpliceFlags::NONE }
    }

    pub fn flags(mut self, flags: SpliceFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn validate(&self) -> Result<(), Failure> {
        for end in [&self.from, &self.to] {
            if end.kind != EndKind::File && end.offset != 0 {
                return Err(Failure::InvalidArgument("splice offset must be 0 for sockets and pipes"));
            }
            if end.fd < 0 {
                return Err(Failure::InvalidArgument("splice descriptor is negative"));
            }
        }
        if self.from.kind != EndKind::Pipe && self.to.kind != EndKind::Pipe {
            return Err(Failure::InvalidArgument("splice needs a pipe on one side"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_offset_rejected() {
        let bad = SpliceParams::new(SpliceEnd::socket(3).positioned(10), SpliceEnd::pipe(4), 64);
        assert!(matches!(bad.validate(), Err(Failure::InvalidArgument(_))));

        let ok = SpliceParams::new(SpliceEnd::socket(3), SpliceEnd::pipe(4), 64);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_needs_a_pipe() {
        let p = SpliceParams::new(SpliceEnd::file(3, 0), SpliceEnd::socket(4), 64);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_wire_offsets() {
        assert_eq!(SpliceEnd::file(3, 4096).wire_offset(), 4096);
        assert_eq!(SpliceEnd::pipe(3).wire_offset(), u64::MAX);
        assert_eq!(SpliceEnd::socket(3).wire_offset(), u64::MAX);
        let flags = SpliceFlags::MOVE | SpliceFlags::MORE;
        assert_eq!(flags.bits(), 5);
        assert!(flags.contains(SpliceFlags::MORE));
        assert!(!flags.contains(SpliceFlags::GIFT));
    }
}
