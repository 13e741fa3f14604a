//! Off-heap structure layer.
//!
//! A *shape* is a typed view over a fixed-size byte record that follows a
//! kernel ABI. It is nothing but a base address plus a table of
//! [`RawField`]s; moving the view to another record is `reposition()`,
//! which is O(1) and allocates nothing.
//!
//! Shapes never own memory. Owned records live in [`crate::offheap`],
//! which allocates a region and hands out shapes over it.
//!
//! ```text
//!   SubmissionEntry.at(sqe_slot)          CompletionEntry.at(cqe_slot)
//!   ┌──────┬───────┬─────┬────┬────┐      ┌───────────┬─────┬───────┐
//!   │opcode│ flags │ ... │ fd │ .. │      │ user_data │ res │ flags │
//!   └──────┴───────┴─────┴────┴────┘      └───────────┴─────┴───────┘
//! ```

use crate::raw::Address;

pub mod completion;
pub mod iovec;
pub mod sockaddr;
pub mod statx;
pub mod submission;
pub mod timespec;

pub use completion::CompletionEntry;
pub use iovec::{IoVector, IoVectors};
pub use sockaddr::{SocketAddressIn, SocketAddressIn6, SOCKADDR_STORAGE_SIZE};
pub use statx::Statx;
pub use submission::SubmissionEntry;
pub use timespec::TimeSpec;

/// One field of a record: byte offset from the record base, byte width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawField {
    pub offset: usize,
    pub size: usize,
}

impl RawField {
    pub const fn new(offset: usize, size: usize) -> Self {
        RawField { offset, size }
    }

    /// First byte after the field.
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }

    #[inline(always)]
    pub const fn at(&self, base: Address) -> Address {
        base + self.offset
    }
}

/// A typed view over a `SIZE`-byte record.
pub trait Shape: Sized {
    const SIZE: usize;

    /// Bind a view to `address`.
    ///
    /// # Safety
    ///
    /// `address..address + SIZE` must stay valid for reads and writes while
    /// the view is used.
    unsafe fn at(address: Address) -> Self;

    fn address(&self) -> Address;

    /// Move the view onto another record.
    ///
    /// # Safety
    ///
    /// Same contract as [`Shape::at`].
    unsafe fn reposition(&mut self, address: Address);

    /// Zero the whole record.
    fn clear(&self) {
        unsafe { crate::raw::zero(self.address(), Self::SIZE) }
    }
}

/// Declare a view struct with its `Shape` impl.
macro_rules! shape_view {
    ($(#[$meta:meta])* $name:ident, $size:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            base: $crate::raw::Address,
        }

        impl $crate::shape::Shape for $name {
            const SIZE: usize = $size;

            #[inline(always)]
            unsafe fn at(address: $crate::raw::Address) -> Self {
                $name { base: address }
            }

            #[inline(always)]
            fn address(&self) -> $crate::raw::Address {
                self.base
            }

            #[inline(always)]
            unsafe fn reposition(&mut self, address: $crate::raw::Address) {
                self.base = address;
            }
        }
    };
}

/// Declare a getter/setter pair bound to a `RawField`.
macro_rules! field {
    ($get:ident, $set:ident, $field:expr, $ty:ty, $load:path, $store:path) => {
        #[inline(always)]
        pub fn $get(&self) -> $ty {
            unsafe { $load($field.at(self.base)) }
        }

        #[inline(always)]
        pub fn $set(&self, value: $ty) {
            unsafe { $store($field.at(self.base), value) }
        }
    };
}

pub(crate) use field;
pub(crate) use shape_view;
