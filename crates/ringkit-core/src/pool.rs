//! Object pool: reusable instances behind integer handles.
//!
//! Instances are built by a factory when capacity grows and are never
//! dropped until the pool is. `release` runs the cleanup hook, so the next
//! `alloc` that picks the instance up sees it reset. Capacity doubles when
//! every instance is in use.
//!
//! Single-threaded. For cross-thread reuse see [`crate::lockfree`].

use crate::heap::Handle;
use crate::kwarn;

type Factory<T> = Box<dyn Fn() -> T + Send>;
type Cleanup<T> = Box<dyn Fn(&mut T) + Send>;

pub struct ObjectPool<T> {
    items: Vec<T>,
    in_use: Vec<bool>,
    free: Vec<Handle>,
    used: usize,
    factory: Factory<T>,
    cleanup: Cleanup<T>,
}

impl<T> ObjectPool<T> {
    /// Pool of one instance that resets released instances with `cleanup`.
    pub fn new<F, C>(factory: F, cleanup: C) -> Self
    where
        F: Fn() -> T + Send + 'static,
        C: Fn(&mut T) + Send + 'static,
    {
        Self::with_size(1, factory, cleanup)
    }

    pub fn with_size<F, C>(size: usize, factory: F, cleanup: C) -> Self
    where
        F: Fn() -> T + Send + 'static,
        C: Fn(&mut T) + Send + 'static,
    {
        let mut pool = ObjectPool {
            items: Vec::new(),
            in_use: Vec::new(),
            free: Vec::new(),
            used: 0,
            factory: Box::new(factory),
            cleanup: Box::new(cleanup),
        };
        pool.grow_to(size.max(1));
        pool
    }

    fn grow_to(&mut self, size: usize) {
        let start = self.items.len();
        self.items.reserve_exact(size - start);
        for _ in start..size {
            self.items.push((self.factory)());
            self.in_use.push(false);
        }
        // Lowest handles come off the stack first.
        self.free.extend((start..size).rev().map(|i| i as Handle));
    }

    pub fn alloc(&mut self) -> Handle {
        if self.free.is_empty() {
            let size = self.items.len() * 2;
            self.grow_to(size);
        }
        // grow_to always leaves at least one free handle
        let handle = self.free.pop().unwrap_or_default();
        self.in_use[handle as usize] = true;
        self.used += 1;
        handle
    }

    /// Reset the instance behind `handle` and make it available again.
    /// Returns `false` for handles that are not currently allocated.
    pub fn release(&mut self, handle: Handle) -> bool {
        let index = handle as usize;
        if !self.in_use.get(index).copied().unwrap_or(false) {
            kwarn!("release of invalid pool handle {} (used {})", handle, self.used);
            return false;
        }
        (self.cleanup)(&mut self.items[index]);
        self.in_use[index] = false;
        self.free.push(handle);
        self.used -= 1;
        true
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let index = handle as usize;
        if self.in_use.get(index).copied().unwrap_or(false) {
            self.items.get(index)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let index = handle as usize;
        if self.in_use.get(index).copied().unwrap_or(false) {
            self.items.get_mut(index)
        } else {
            None
        }
    }

    /// Instances currently allocated.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Instances constructed so far.
    pub fn size(&self) -> usize {
        self.items.len()
    }
}

impl<T> std::fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectPool")
            .field("used", &self.used)
            .field("size", &self.items.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_pool() -> ObjectPool<String> {
        ObjectPool::new(String::new, |s: &mut String| s.clear())
    }

    #[test]
    fn test_growth_doubles() {
        let mut pool = string_pool();
        assert_eq!(pool.size(), 1);
        let a = pool.alloc();
        assert_eq!((pool.used(), pool.size()), (1, 1));
        let b = pool.alloc();
        assert_eq!((pool.used(), pool.size()), (2, 2));
        pool.alloc();
        assert_eq!((pool.used(), pool.size()), (3, 4));
        assert_ne!(a, b);
        assert!(pool.used() <= pool.size());
    }

    #[test]
    fn test_released_instance_is_reset() {
        let mut pool = string_pool();
        let h = pool.alloc();
        pool.get_mut(h).unwrap().push_str("request body");
        assert!(pool.release(h));
        assert_eq!(pool.get(h), None);

        let again = pool.alloc();
        assert_eq!(again, h);
        assert_eq!(pool.get(again).map(String::as_str), Some(""));
    }

    #[test]
    fn test_double_release_is_ignored() {
        let mut pool = string_pool();
        let a = pool.alloc();
        let _b = pool.alloc();
        assert!(pool.release(a));
        assert_eq!(pool.used(), 1);
        assert!(!pool.release(a));
        assert!(!pool.release(77));
        assert_eq!(pool.used(), 1);
    }
}
