//! # ringkit-core
//!
//! Platform-neutral building blocks for the ringkit runtime:
//!
//! - [`raw`]: unchecked fixed-width loads/stores at absolute addresses
//! - [`shape`]: typed views over kernel-ABI records (SQE, CQE, sockaddr,
//!   statx, timespec, iovec)
//! - [`offheap`]: owned records backed by `calloc` regions
//! - [`heap`]: handle allocator correlating in-flight requests
//! - [`pool`] / [`lockfree`]: instance reuse, single-threaded and CAS-based
//! - [`Timeout`], [`Failure`]: values shared by every layer above
//! - [`kprint`], [`env`]: logging macros and environment config helpers

pub mod env;
pub mod error;
pub mod heap;
pub mod kprint;
pub mod lockfree;
pub mod offheap;
pub mod pool;
pub mod raw;
pub mod shape;
pub mod timeout;

pub use error::{Failure, NativeError, PromiseResult};
pub use heap::{Handle, ObjectHeap};
pub use lockfree::{LockFreePool, PoolLink, Poolable, Pooled};
pub use offheap::{
    OffHeapBuffer, OffHeapFileStat, OffHeapIoVector, OffHeapRegion, OffHeapSocketAddress,
    OffHeapTimeSpec,
};
pub use pool::ObjectPool;
pub use raw::Address;
pub use shape::statx::{FileStat, FileType, StatFlags, StatMask};
pub use timeout::Timeout;
