//! Raw memory access.
//!
//! Unchecked, unaligned loads and stores of fixed-width integers at
//! absolute addresses, plus the `calloc`/`free` pair backing off-heap
//! records. Nothing here validates an address: every accessor is `unsafe`
//! and the caller guarantees that `address..address + width` is mapped and
//! not concurrently written by Rust code holding a reference to it.
//!
//! Native-order accessors are the default. The `_be` variants store in
//! network byte order and are used for wire fields (ports, IPv4 addresses,
//! IPv6 flow info).

use core::ptr;

use crate::error::{Failure, NativeError};

/// An absolute address inside an off-heap region.
pub type Address = usize;

macro_rules! native_access {
    ($get:ident, $put:ident, $ty:ty) => {
        #[inline(always)]
        pub unsafe fn $get(address: Address) -> $ty {
            ptr::read_unaligned(address as *const $ty)
        }

        #[inline(always)]
        pub unsafe fn $put(address: Address, value: $ty) {
            ptr::write_unaligned(address as *mut $ty, value)
        }
    };
}

macro_rules! network_access {
    ($get:ident, $put:ident, $ty:ty) => {
        #[inline(always)]
        pub unsafe fn $get(address: Address) -> $ty {
            <$ty>::from_be(ptr::read_unaligned(address as *const $ty))
        }

        #[inline(always)]
        pub unsafe fn $put(address: Address, value: $ty) {
            ptr::write_unaligned(address as *mut $ty, value.to_be())
        }
    };
}

native_access!(get_u8, put_u8, u8);
native_access!(get_u16, put_u16, u16);
native_access!(get_u32, put_u32, u32);
native_access!(get_u64, put_u64, u64);
native_access!(get_i32, put_i32, i32);
native_access!(get_i64, put_i64, i64);

network_access!(get_u16_be, put_u16_be, u16);
network_access!(get_u32_be, put_u32_be, u32);

/// Copy `dst.len()` bytes starting at `address` into `dst`.
#[inline]
pub unsafe fn get_bytes(address: Address, dst: &mut [u8]) {
    ptr::copy_nonoverlapping(address as *const u8, dst.as_mut_ptr(), dst.len());
}

#[inline]
pub unsafe fn put_bytes(address: Address, src: &[u8]) {
    ptr::copy_nonoverlapping(src.as_ptr(), address as *mut u8, src.len());
}

#[inline]
pub unsafe fn zero(address: Address, len: usize) {
    ptr::write_bytes(address as *mut u8, 0, len);
}

/// Borrow `len` bytes at `address` as a slice.
#[inline]
pub unsafe fn slice<'a>(address: Address, len: usize) -> &'a [u8] {
    if len == 0 {
        return &[];
    }
    core::slice::from_raw_parts(address as *const u8, len)
}

/// Allocate `size` zeroed bytes outside the Rust allocator.
///
/// The region must be handed back through [`release`] exactly once.
pub fn allocate(size: usize) -> Result<Address, Failure> {
    // calloc(0) may legally return NULL; always ask for at least one byte
    let p = unsafe { libc::calloc(1, size.max(1)) };
    if p.is_null() {
        return Err(Failure::Native(NativeError::new(libc::ENOMEM)));
    }
    Ok(p as Address)
}

/// Free a region obtained from [`allocate`].
#[inline]
pub unsafe fn release(address: Address) {
    libc::free(address as *mut libc::c_void);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unaligned_round_trip() {
        let base = allocate(32).unwrap();
        unsafe {
            put_u64(base + 1, 0x0102_0304_0506_0708);
            assert_eq!(get_u64(base + 1), 0x0102_0304_0506_0708);
            put_i32(base + 13, -77);
            assert_eq!(get_i32(base + 13), -77);
            release(base);
        }
    }

    #[test]
    fn test_network_order_layout() {
        let base = allocate(8).unwrap();
        unsafe {
            put_u16_be(base, 8080);
            assert_eq!(slice(base, 2), &[0x1f, 0x90]);
            assert_eq!(get_u16_be(base), 8080);

            put_u32_be(base + 4, 0x7f00_0001);
            assert_eq!(slice(base + 4, 4), &[127, 0, 0, 1]);
            release(base);
        }
    }

    #[test]
    fn test_allocate_is_zeroed() {
        let base = allocate(64).unwrap();
        unsafe {
            assert!(slice(base, 64).iter().all(|b| *b == 0));
            put_bytes(base, b"ringkit");
            let mut out = [0u8; 7];
            get_bytes(base, &mut out);
            assert_eq!(&out, b"ringkit");
            zero(base, 64);
            assert_eq!(get_u8(base), 0);
            release(base);
        }
    }
}
