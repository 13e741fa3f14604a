//! `struct iovec` view and a contiguous array of them.

use super::{field, shape_view, RawField, Shape};
use crate::raw::{self, Address};

pub mod layout {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const BASE: RawField = RawField::new(0, 8);
    pub const LEN: RawField = RawField::new(8, 8);
}

shape_view!(
    /// View over one `iovec`.
    IoVector,
    layout::SIZE
);

impl IoVector {
    field!(base, set_base, layout::BASE, u64, raw::get_u64, raw::put_u64);
    field!(len, set_len, layout::LEN, u64, raw::get_u64, raw::put_u64);

    pub fn set(&self, base: Address, len: usize) {
        self.set_base(base as u64);
        self.set_len(len as u64);
    }
}

/// `count` consecutive `iovec` records starting at one base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVectors {
    base: Address,
    count: usize,
}

impl IoVectors {
    /// # Safety
    ///
    /// `address` must point at `count * 16` valid bytes.
    pub unsafe fn at(address: Address, count: usize) -> Self {
        IoVectors { base: address, count }
    }

    pub fn address(&self) -> Address {
        self.base
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn byte_size(&self) -> usize {
        self.count * IoVector::SIZE
    }

    /// View over element `index`, `None` past the end.
    pub fn element(&self, index: usize) -> Option<IoVector> {
        if index >= self.count {
            return None;
        }
        Some(unsafe { IoVector::at(self.base + index * IoVector::SIZE) })
    }

    /// Sum of all element lengths.
    pub fn total_len(&self) -> u64 {
        (0..self.count)
            .filter_map(|i| self.element(i))
            .map(|v| v.len())
            .sum()
    }
}
