//! `struct statx` view (256 bytes) and its decoded form.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{field, shape_view, RawField};
use crate::raw;

pub mod layout {
    use super::RawField;

    pub const SIZE: usize = 256;

    pub const MASK: RawField = RawField::new(0, 4);
    pub const BLKSIZE: RawField = RawField::new(4, 4);
    pub const ATTRIBUTES: RawField = RawField::new(8, 8);
    pub const NLINK: RawField = RawField::new(16, 4);
    pub const UID: RawField = RawField::new(20, 4);
    pub const GID: RawField = RawField::new(24, 4);
    pub const MODE: RawField = RawField::new(28, 2);
    pub const INO: RawField = RawField::new(32, 8);
    pub const SIZE_FIELD: RawField = RawField::new(40, 8);
    pub const BLOCKS: RawField = RawField::new(48, 8);
    pub const ATTRIBUTES_MASK: RawField = RawField::new(56, 8);
    pub const ATIME: RawField = RawField::new(64, 16);
    pub const BTIME: RawField = RawField::new(80, 16);
    pub const CTIME: RawField = RawField::new(96, 16);
    pub const MTIME: RawField = RawField::new(112, 16);
    pub const RDEV_MAJOR: RawField = RawField::new(128, 4);
    pub const RDEV_MINOR: RawField = RawField::new(132, 4);
    pub const DEV_MAJOR: RawField = RawField::new(136, 4);
    pub const DEV_MINOR: RawField = RawField::new(140, 4);

    /// Within a `statx_timestamp`.
    pub const TS_SEC: RawField = RawField::new(0, 8);
    pub const TS_NSEC: RawField = RawField::new(8, 4);
}

macro_rules! bitset {
    ($(#[$meta:meta])* $name:ident { $($flag:ident = $value:expr),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(pub u32);

        impl $name {
            $(pub const $flag: $name = $name($value as u32);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn bits(&self) -> u32 {
                self.0
            }

            pub const fn contains(&self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn with(self, other: $name) -> Self {
                $name(self.0 | other.0)
            }

            pub const fn without(self, other: $name) -> Self {
                $name(self.0 & !other.0)
            }
        }

        impl core::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                self.with(rhs)
            }
        }
    };
}

bitset!(
    /// `STATX_*` field request mask.
    StatMask {
        TYPE = 0x0001,
        MODE = 0x0002,
        NLINK = 0x0004,
        UID = 0x0008,
        GID = 0x0010,
        ATIME = 0x0020,
        MTIME = 0x0040,
        CTIME = 0x0080,
        INO = 0x0100,
        SIZE = 0x0200,
        BLOCKS = 0x0400,
        BASIC_STATS = 0x07ff,
        BTIME = 0x0800,
        ALL = 0x0fff,
    }
);

bitset!(
    /// `AT_*` lookup flags accepted by statx.
    StatFlags {
        SYMLINK_NOFOLLOW = libc::AT_SYMLINK_NOFOLLOW,
        NO_AUTOMOUNT = libc::AT_NO_AUTOMOUNT,
        EMPTY_PATH = libc::AT_EMPTY_PATH,
        SYNC_AS_STAT = 0x0000,
        FORCE_SYNC = 0x2000,
        DONT_SYNC = 0x4000,
    }
);

/// File kind decoded from the `S_IFMT` bits of the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Unknown,
}

impl FileType {
    pub fn from_mode(mode: u16) -> Self {
        match mode as u32 & libc::S_IFMT {
            libc::S_IFREG => FileType::Regular,
            libc::S_IFDIR => FileType::Directory,
            libc::S_IFLNK => FileType::Symlink,
            libc::S_IFCHR => FileType::CharDevice,
            libc::S_IFBLK => FileType::BlockDevice,
            libc::S_IFIFO => FileType::Fifo,
            libc::S_IFSOCK => FileType::Socket,
            _ => FileType::Unknown,
        }
    }
}

/// Owned snapshot of a statx record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub mask: StatMask,
    pub file_type: FileType,
    /// Permission bits (`mode & 0o7777`).
    pub permissions: u32,
    pub block_size: u32,
    pub attributes: u64,
    pub links: u32,
    pub uid: u32,
    pub gid: u32,
    pub inode: u64,
    pub size: u64,
    pub blocks: u64,
    pub accessed: SystemTime,
    pub created: SystemTime,
    pub changed: SystemTime,
    pub modified: SystemTime,
    pub rdev: (u32, u32),
    pub dev: (u32, u32),
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_type == FileType::Regular
    }
}

shape_view!(
    /// View over a `struct statx`.
    Statx,
    layout::SIZE
);

impl Statx {
    field!(mask, set_mask, layout::MASK, u32, raw::get_u32, raw::put_u32);
    field!(blksize, set_blksize, layout::BLKSIZE, u32, raw::get_u32, raw::put_u32);
    field!(attributes, set_attributes, layout::ATTRIBUTES, u64, raw::get_u64, raw::put_u64);
    field!(nlink, set_nlink, layout::NLINK, u32, raw::get_u32, raw::put_u32);
    field!(uid, set_uid, layout::UID, u32, raw::get_u32, raw::put_u32);
    field!(gid, set_gid, layout::GID, u32, raw::get_u32, raw::put_u32);
    field!(mode, set_mode, layout::MODE, u16, raw::get_u16, raw::put_u16);
    field!(ino, set_ino, layout::INO, u64, raw::get_u64, raw::put_u64);
    field!(size, set_size, layout::SIZE_FIELD, u64, raw::get_u64, raw::put_u64);
    field!(blocks, set_blocks, layout::BLOCKS, u64, raw::get_u64, raw::put_u64);
    field!(rdev_major, set_rdev_major, layout::RDEV_MAJOR, u32, raw::get_u32, raw::put_u32);
    field!(rdev_minor, set_rdev_minor, layout::RDEV_MINOR, u32, raw::get_u32, raw::put_u32);
    field!(dev_major, set_dev_major, layout::DEV_MAJOR, u32, raw::get_u32, raw::put_u32);
    field!(dev_minor, set_dev_minor, layout::DEV_MINOR, u32, raw::get_u32, raw::put_u32);

    fn timestamp(&self, field: RawField) -> SystemTime {
        let base = field.at(self.base);
        let (sec, nsec) = unsafe {
            (
                raw::get_i64(layout::TS_SEC.at(base)),
                raw::get_u32(layout::TS_NSEC.at(base)),
            )
        };
        let offset = Duration::new(sec.unsigned_abs(), nsec.min(999_999_999));
        if sec >= 0 {
            UNIX_EPOCH + offset
        } else {
            UNIX_EPOCH - offset
        }
    }

    pub fn set_timestamp(&self, field: RawField, sec: i64, nsec: u32) {
        let base = field.at(self.base);
        unsafe {
            raw::put_i64(layout::TS_SEC.at(base), sec);
            raw::put_u32(layout::TS_NSEC.at(base), nsec);
        }
    }

    pub fn accessed(&self) -> SystemTime {
        self.timestamp(layout::ATIME)
    }

    pub fn created(&self) -> SystemTime {
        self.timestamp(layout::BTIME)
    }

    pub fn changed(&self) -> SystemTime {
        self.timestamp(layout::CTIME)
    }

    pub fn modified(&self) -> SystemTime {
        self.timestamp(layout::MTIME)
    }

    pub fn decode(&self) -> FileStat {
        let mode = self.mode();
        FileStat {
            mask: StatMask(self.mask()),
            file_type: FileType::from_mode(mode),
            permissions: mode as u32 & 0o7777,
            block_size: self.blksize(),
            attributes: self.attributes(),
            links: self.nlink(),
            uid: self.uid(),
            gid: self.gid(),
            inode: self.ino(),
            size: self.size(),
            blocks: self.blocks(),
            accessed: self.accessed(),
            created: self.created(),
            changed: self.changed(),
            modified: self.modified(),
            rdev: (self.rdev_major(), self.rdev_minor()),
            dev: (self.dev_major(), self.dev_minor()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    #[test]
    fn test_decode_synthetic_record() {
        let mut backing = [0u8; layout::SIZE];
        let stx = unsafe { Statx::at(backing.as_mut_ptr() as usize) };
        stx.set_mask(StatMask::BASIC_STATS.bits());
        stx.set_mode((libc::S_IFDIR | 0o755) as u16);
        stx.set_size(4096);
        stx.set_nlink(3);
        stx.set_timestamp(layout::MTIME, 1_700_000_000, 5);
        stx.set_dev_major(8);

        let st = stx.decode();
        assert!(st.is_dir());
        assert_eq!(st.permissions, 0o755);
        assert_eq!(st.size, 4096);
        assert_eq!(st.links, 3);
        assert_eq!(st.dev, (8, 0));
        assert_eq!(
            st.modified,
            UNIX_EPOCH + Duration::new(1_700_000_000, 5)
        );
        assert!(st.mask.contains(StatMask::SIZE));
    }

    #[test]
    fn test_flag_sets() {
        let flags = StatFlags::SYMLINK_NOFOLLOW | StatFlags::EMPTY_PATH;
        assert!(flags.contains(StatFlags::EMPTY_PATH));
        assert!(!flags.without(StatFlags::EMPTY_PATH).contains(StatFlags::EMPTY_PATH));
        assert_eq!(StatFlags::empty().bits(), 0);
    }
}
