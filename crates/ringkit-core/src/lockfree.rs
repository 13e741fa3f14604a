//! Lock-free pool of intrusively linked nodes.
//!
//! A Treiber stack: the head is a tagged pointer in one `AtomicU64`, the
//! low 48 bits hold the node address and the high 16 bits a counter that
//! is bumped on every swap, which defeats ABA on pop. Nodes carry their own
//! link ([`PoolLink`]) that is only meaningful while the node sits in the
//! pool.
//!
//! Nodes are never freed while the pool is alive: a loaned node holds an
//! `Arc` to the pool and returns itself on drop. So a racing `pop` can
//! always read the link of a node another thread just took.
//!
//! ```text
//!   head ──► [node c] ──► [node b] ──► [node a] ──► null
//!            tag:17
//! ```

use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicPtr, AtomicU64, AtomicUsize, Ordering};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

const PTR_BITS: u32 = 48;
const PTR_MASK: u64 = (1 << PTR_BITS) - 1;

/// The "next" slot a poolable node embeds.
#[derive(Debug, Default)]
pub struct PoolLink {
    next: AtomicPtr<()>,
}

impl PoolLink {
    pub const fn new() -> Self {
        PoolLink { next: AtomicPtr::new(ptr::null_mut()) }
    }
}

/// Capability of being linked into a [`LockFreePool`].
pub trait Poolable: Send + 'static {
    fn link(&self) -> &PoolLink;

    /// Called when a node comes back to the pool.
    fn reset(&mut self) {}
}

#[inline]
fn pack<T>(node: *mut T, tag: u16) -> u64 {
    let addr = node as u64;
    debug_assert_eq!(addr & !PTR_MASK, 0, "pointer does not fit in 48 bits");
    (addr & PTR_MASK) | ((tag as u64) << PTR_BITS)
}

#[inline]
fn unpack<T>(word: u64) -> (*mut T, u16) {
    ((word & PTR_MASK) as *mut T, (word >> PTR_BITS) as u16)
}

pub struct LockFreePool<T: Poolable> {
    head: AtomicU64,
    factory: Box<dyn Fn() -> T + Send + Sync>,
    created: AtomicUsize,
    pooled: AtomicUsize,
}

unsafe impl<T: Poolable> Send for LockFreePool<T> {}
unsafe impl<T: Poolable> Sync for LockFreePool<T> {}

impl<T: Poolable> LockFreePool<T> {
    pub fn new<F>(factory: F) -> Arc<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Arc::new(LockFreePool {
            head: AtomicU64::new(0),
            factory: Box::new(factory),
            created: AtomicUsize::new(0),
            pooled: AtomicUsize::new(0),
        })
    }

    /// Take a pooled node, or build a new one when the pool is empty.
    pub fn alloc(self: &Arc<Self>) -> Pooled<T> {
        let node = match self.pop() {
            Some(node) => node,
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                let boxed = Box::new((self.factory)());
                // Box::into_raw never returns null
                unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) }
            }
        };
        Pooled { pool: Arc::clone(self), node }
    }

    fn pop(&self) -> Option<NonNull<T>> {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let (node, tag) = unpack::<T>(current);
            let node = NonNull::new(node)?;
            // Safety: nodes stay allocated for the pool's lifetime.
            let next = unsafe { node.as_ref() }.link().next.load(Ordering::Relaxed) as *mut T;
            match self.head.compare_exchange_weak(
                current,
                pack(next, tag.wrapping_add(1)),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.pooled.fetch_sub(1, Ordering::Relaxed);
                    return Some(node);
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn push(&self, node: NonNull<T>) {
        let mut current = self.head.load(Ordering::Relaxed);
        loop {
            let (head, tag) = unpack::<T>(current);
            unsafe { node.as_ref() }.link().next.store(head as *mut (), Ordering::Relaxed);
            match self.head.compare_exchange_weak(
                current,
                pack(node.as_ptr(), tag.wrapping_add(1)),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    self.pooled.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Nodes built over the pool's lifetime.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Nodes currently sitting in the pool (racy snapshot).
    pub fn pooled(&self) -> usize {
        self.pooled.load(Ordering::Relaxed)
    }
}

impl<T: Poolable> Drop for LockFreePool<T> {
    fn drop(&mut self) {
        while let Some(node) = self.pop() {
            drop(unsafe { Box::from_raw(node.as_ptr()) });
        }
    }
}

/// A node on loan from a [`LockFreePool`]. Goes back on drop.
pub struct Pooled<T: Poolable> {
    pool: Arc<LockFreePool<T>>,
    node: NonNull<T>,
}

unsafe impl<T: Poolable> Send for Pooled<T> {}
unsafe impl<T: Poolable + Sync> Sync for Pooled<T> {}

impl<T: Poolable> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.node.as_ref() }
    }
}

impl<T: Poolable> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.node.as_mut() }
    }
}

impl<T: Poolable> Drop for Pooled<T> {
    fn drop(&mut self) {
        unsafe { self.node.as_mut() }.reset();
        self.pool.push(self.node);
    }
}

impl<T: Poolable + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        (**self).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Scratch {
        link: PoolLink,
        data: Vec<u8>,
    }

    impl Poolable for Scratch {
        fn link(&self) -> &PoolLink {
            &self.link
        }

        fn reset(&mut self) {
            self.data.clear();
        }
    }

    #[test]
    fn test_reuse_after_drop() {
        let pool = LockFreePool::new(Scratch::default);
        let mut a = pool.alloc();
        a.data.extend_from_slice(b"abc");
        let addr = &*a as *const Scratch;
        drop(a);
        assert_eq!(pool.pooled(), 1);

        let b = pool.alloc();
        assert_eq!(&*b as *const Scratch, addr);
        assert!(b.data.is_empty());
        assert_eq!(pool.created(), 1);
    }

    #[test]
    fn test_grows_when_empty() {
        let pool = LockFreePool::new(Scratch::default);
        let held: Vec<_> = (0..5).map(|_| pool.alloc()).collect();
        assert_eq!(pool.created(), 5);
        drop(held);
        assert_eq!(pool.pooled(), 5);
    }

    #[test]
    fn test_cross_thread_release() {
        let pool = LockFreePool::new(Scratch::default);
        let mut handles = Vec::new();
        for t in 0..4u8 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for i in 0..400u32 {
                    let mut node = pool.alloc();
                    assert!(node.data.is_empty());
                    node.data.push(t);
                    if i % 2 == 0 {
                        // Hand the node to another thread to release.
                        thread::spawn(move || drop(node)).join().unwrap();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.pooled(), pool.created());
    }
}
