//! Off-heap owned records.
//!
//! Every type here owns one [`OffHeapRegion`] obtained from
//! [`raw::allocate`]. The region is freed by `dispose()` or on drop,
//! whichever comes first; a second `dispose()` does nothing. Using a record
//! after disposing it is a caller bug: no accessor checks the flag.
//!
//! Buffers are shared with the ring through `Arc` so the memory a pending
//! operation points at cannot be dropped before the completion is reaped.
//! The embedding layer only sees `used()`, `capacity()` and `export()`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Failure;
use crate::raw::{self, Address};
use crate::shape::{self, sockaddr, statx::FileStat, IoVectors, Shape, Statx, TimeSpec};

/// A zeroed `calloc` region with an idempotent release flag.
#[derive(Debug)]
pub struct OffHeapRegion {
    address: Address,
    size: usize,
    disposed: AtomicBool,
}

// Safety: the region is plain bytes; synchronisation of the contents is
// the owner's business.
unsafe impl Send for OffHeapRegion {}
unsafe impl Sync for OffHeapRegion {}

impl OffHeapRegion {
    pub fn allocate(size: usize) -> Result<Self, Failure> {
        Ok(OffHeapRegion {
            address: raw::allocate(size)?,
            size,
            disposed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn address(&self) -> Address {
        self.address
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Free the region. Returns `false` if it was already freed.
    pub fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return false;
        }
        unsafe { raw::release(self.address) };
        true
    }
}

impl Drop for OffHeapRegion {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Buffer ──

/// Byte buffer with a capacity and a separate used length.
#[derive(Debug)]
pub struct OffHeapBuffer {
    region: OffHeapRegion,
    used: AtomicUsize,
}

impl OffHeapBuffer {
    pub fn allocate(capacity: usize) -> Result<Self, Failure> {
        Ok(OffHeapBuffer {
            region: OffHeapRegion::allocate(capacity)?,
            used: AtomicUsize::new(0),
        })
    }

    /// Buffer sized to `data` with `used == data.len()`.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Failure> {
        let buf = Self::allocate(data.len())?;
        buf.write(data);
        Ok(buf)
    }

    /// Allocate straight into an `Arc`, the form operations take.
    pub fn shared(capacity: usize) -> Result<Arc<Self>, Failure> {
        Self::allocate(capacity).map(Arc::new)
    }

    #[inline]
    pub fn address(&self) -> Address {
        self.region.address()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Set the used length, clamped to capacity. Returns the stored value.
    pub fn set_used(&self, used: usize) -> usize {
        let used = used.min(self.capacity());
        self.used.store(used, Ordering::Release);
        used
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    /// Overwrite from offset zero. Bytes past capacity are dropped.
    pub fn write(&self, data: &[u8]) -> usize {
        let n = data.len().min(self.capacity());
        unsafe { raw::put_bytes(self.address(), &data[..n]) };
        self.set_used(n)
    }

    /// Append after the used bytes. Returns how many bytes fit.
    pub fn append(&self, data: &[u8]) -> usize {
        let used = self.used();
        let n = data.len().min(self.capacity() - used);
        unsafe { raw::put_bytes(self.address() + used, &data[..n]) };
        self.set_used(used + n);
        n
    }

    /// Copy of the used bytes.
    pub fn export(&self) -> Vec<u8> {
        unsafe { raw::slice(self.address(), self.used()) }.to_vec()
    }

    pub fn clear(&self) {
        self.used.store(0, Ordering::Release);
    }

    pub fn dispose(&self) -> bool {
        self.region.dispose()
    }
}

// ── Time spec ──

/// Owned kernel timespec, the operand of timeout submissions.
#[derive(Debug)]
pub struct OffHeapTimeSpec {
    region: OffHeapRegion,
}

impl OffHeapTimeSpec {
    pub fn new(d: Duration) -> Result<Self, Failure> {
        let ts = OffHeapTimeSpec {
            region: OffHeapRegion::allocate(TimeSpec::SIZE)?,
        };
        ts.view().set_duration(d);
        Ok(ts)
    }

    pub fn address(&self) -> Address {
        self.region.address()
    }

    pub fn view(&self) -> TimeSpec {
        unsafe { TimeSpec::at(self.address()) }
    }

    pub fn duration(&self) -> Duration {
        self.view().duration()
    }

    pub fn dispose(&self) -> bool {
        self.region.dispose()
    }
}

// ── Socket address ──

const SOCKLEN_OFFSET: usize = sockaddr::SOCKADDR_STORAGE_SIZE;

/// `sockaddr_storage` plus a trailing `socklen_t`, laid out so accept can
/// write both through pointers.
#[derive(Debug)]
pub struct OffHeapSocketAddress {
    region: OffHeapRegion,
}

impl OffHeapSocketAddress {
    fn allocate() -> Result<Self, Failure> {
        Ok(OffHeapSocketAddress {
            region: OffHeapRegion::allocate(SOCKLEN_OFFSET + 4)?,
        })
    }

    /// Empty storage with the length primed to the full storage size.
    pub fn for_accept() -> Result<Self, Failure> {
        let addr = Self::allocate()?;
        addr.set_len(sockaddr::SOCKADDR_STORAGE_SIZE as u32);
        Ok(addr)
    }

    pub fn from_socket_addr(addr: &SocketAddr) -> Result<Self, Failure> {
        let out = Self::allocate()?;
        let len = unsafe { sockaddr::encode(out.address(), addr) };
        out.set_len(len);
        Ok(out)
    }

    pub fn address(&self) -> Address {
        self.region.address()
    }

    pub fn len_address(&self) -> Address {
        self.region.address() + SOCKLEN_OFFSET
    }

    pub fn len(&self) -> u32 {
        unsafe { raw::get_u32(self.len_address()) }
    }

    pub fn set_len(&self, len: u32) {
        unsafe { raw::put_u32(self.len_address(), len) }
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        unsafe { sockaddr::decode(self.address()) }
    }

    pub fn dispose(&self) -> bool {
        self.region.dispose()
    }
}

// ── File stat ──

#[derive(Debug)]
pub struct OffHeapFileStat {
    region: OffHeapRegion,
}

impl OffHeapFileStat {
    pub fn new() -> Result<Self, Failure> {
        Ok(OffHeapFileStat {
            region: OffHeapRegion::allocate(Statx::SIZE)?,
        })
    }

    pub fn address(&self) -> Address {
        self.region.address()
    }

    pub fn view(&self) -> Statx {
        unsafe { Statx::at(self.address()) }
    }

    pub fn decode(&self) -> FileStat {
        self.view().decode()
    }

    pub fn dispose(&self) -> bool {
        self.region.dispose()
    }
}

// ── I/O vector ──

/// An `iovec` array whose elements point into a set of shared buffers.
#[derive(Debug)]
pub struct OffHeapIoVector {
    region: OffHeapRegion,
    buffers: Vec<Arc<OffHeapBuffer>>,
}

impl OffHeapIoVector {
    fn build(buffers: Vec<Arc<OffHeapBuffer>>, for_read: bool) -> Result<Self, Failure> {
        if buffers.is_empty() {
            return Err(Failure::InvalidArgument("empty buffer list"));
        }
        let region = OffHeapRegion::allocate(buffers.len() * shape::IoVector::SIZE)?;
        let vecs = unsafe { IoVectors::at(region.address(), buffers.len()) };
        for (i, buf) in buffers.iter().enumerate() {
            let len = if for_read { buf.capacity() } else { buf.used() };
            if let Some(v) = vecs.element(i) {
                v.set(buf.address(), len);
            }
        }
        Ok(OffHeapIoVector { region, buffers })
    }

    /// Elements span each buffer's full capacity.
    pub fn for_read(buffers: Vec<Arc<OffHeapBuffer>>) -> Result<Self, Failure> {
        Self::build(buffers, true)
    }

    /// Elements span each buffer's used bytes.
    pub fn for_write(buffers: Vec<Arc<OffHeapBuffer>>) -> Result<Self, Failure> {
        Self::build(buffers, false)
    }

    pub fn view(&self) -> IoVectors {
        unsafe { IoVectors::at(self.region.address(), self.buffers.len()) }
    }

    pub fn address(&self) -> Address {
        self.region.address()
    }

    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers(&self) -> &[Arc<OffHeapBuffer>] {
        &self.buffers
    }

    /// After a vectored read of `bytes`, set every buffer's used length to
    /// the share that landed in it, filling buffers in order.
    pub fn distribute(&self, mut bytes: usize) {
        for buf in &self.buffers {
            let n = bytes.min(buf.capacity());
            buf.set_used(n);
            bytes -= n;
        }
    }

    pub fn dispose(&self) -> bool {
        self.region.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_used_is_clamped() {
        let buf = OffHeapBuffer::allocate(8).unwrap();
        assert_eq!(buf.write(b"0123456789"), 8);
        assert_eq!(buf.used(), 8);
        assert_eq!(buf.export(), b"01234567");
        assert_eq!(buf.set_used(100), 8);
        buf.clear();
        assert_eq!(buf.append(b"ab"), 2);
        assert_eq!(buf.append(b"cdefghij"), 6);
        assert_eq!(buf.export(), b"abcdefgh");
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let buf = OffHeapBuffer::from_bytes(b"x").unwrap();
        assert!(buf.dispose());
        assert!(!buf.dispose());
        drop(buf);
    }

    #[test]
    fn test_socket_address_storage() {
        let accept = OffHeapSocketAddress::for_accept().unwrap();
        assert_eq!(accept.len(), 128);
        assert_eq!(accept.socket_addr(), None);

        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let conn = OffHeapSocketAddress::from_socket_addr(&addr).unwrap();
        assert_eq!(conn.len(), 16);
        assert_eq!(conn.socket_addr(), Some(addr));
        assert_eq!(conn.len_address() - conn.address(), 128);
    }

    #[test]
    fn test_io_vector_distribute() {
        let a = OffHeapBuffer::shared(4).unwrap();
        let b = OffHeapBuffer::shared(4).unwrap();
        let vec = OffHeapIoVector::for_read(vec![a.clone(), b.clone()]).unwrap();
        assert_eq!(vec.view().total_len(), 8);
        vec.distribute(6);
        assert_eq!(a.used(), 4);
        assert_eq!(b.used(), 2);

        b.write(b"z");
        let out = OffHeapIoVector::for_write(vec![a, b]).unwrap();
        assert_eq!(out.view().total_len(), 5);
        assert!(OffHeapIoVector::for_read(Vec::new()).is_err());
    }

    #[test]
    fn test_time_spec() {
        let ts = OffHeapTimeSpec::new(Duration::from_micros(1_500_001)).unwrap();
        assert_eq!(ts.view().seconds(), 1);
        assert_eq!(ts.view().nanos(), 500_001_000);
        assert_eq!(ts.duration(), Duration::from_micros(1_500_001));
    }
}
