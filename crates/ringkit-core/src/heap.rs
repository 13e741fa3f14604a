//! Object heap: small integer handles for arbitrary values.
//!
//! Freelist over an array. Free slots are threaded through the slot
//! array itself, so `alloc` and `release` are O(1) and a slot never moves
//! once allocated. When every slot is taken the backing storage doubles.
//!
//! The heap is single-writer: the proactor owns one and only touches it
//! from its driving thread.

use crate::kwarn;

/// Handle returned by [`ObjectHeap::alloc`].
pub type Handle = u32;

const NO_SLOT: u32 = u32::MAX;

#[derive(Debug)]
enum Slot<T> {
    Occupied(T),
    Free { next: u32 },
}

#[derive(Debug)]
pub struct ObjectHeap<T> {
    slots: Vec<Slot<T>>,
    first_free: u32,
    count: usize,
    capacity: usize,
}

impl<T> ObjectHeap<T> {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ObjectHeap {
            slots: Vec::with_capacity(capacity),
            first_free: NO_SLOT,
            count: 0,
            capacity,
        }
    }

    /// Store `value`, returning its handle.
    pub fn alloc(&mut self, value: T) -> Handle {
        self.count += 1;

        if self.first_free != NO_SLOT {
            let handle = self.first_free;
            let slot = &mut self.slots[handle as usize];
            if let Slot::Free { next } = *slot {
                self.first_free = next;
            }
            *slot = Slot::Occupied(value);
            return handle;
        }

        if self.slots.len() == self.capacity {
            self.capacity *= 2;
            self.slots.reserve_exact(self.capacity - self.slots.len());
        }
        self.slots.push(Slot::Occupied(value));
        (self.slots.len() - 1) as Handle
    }

    /// Take the value out of `handle` and free the slot.
    ///
    /// Out-of-range or already released handles return `None` and leave
    /// the heap untouched.
    pub fn release(&mut self, handle: Handle) -> Option<T> {
        let index = handle as usize;
        match self.slots.get(index) {
            Some(Slot::Occupied(_)) => {}
            _ => {
                kwarn!("release of invalid heap handle {} (count {})", handle, self.count);
                return None;
            }
        }

        let prev = std::mem::replace(&mut self.slots[index], Slot::Free { next: self.first_free });
        self.first_free = handle;
        self.count -= 1;
        match prev {
            Slot::Occupied(v) => Some(v),
            Slot::Free { .. } => None,
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle as usize) {
            Some(Slot::Occupied(v)) => Some(v),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle as usize) {
            Some(Slot::Occupied(v)) => Some(v),
            _ => None,
        }
    }

    /// Number of allocated, not yet released handles.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Release every live slot, yielding the values.
    pub fn drain(&mut self) -> Vec<T> {
        let slots = std::mem::take(&mut self.slots);
        self.first_free = NO_SLOT;
        self.count = 0;
        slots
            .into_iter()
            .filter_map(|s| match s {
                Slot::Occupied(v) => Some(v),
                Slot::Free { .. } => None,
            })
            .collect()
    }
}

impl<T> Default for ObjectHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_alloc_release_count() {
        let mut heap = ObjectHeap::with_capacity(2);
        let a = heap.alloc("a");
        let b = heap.alloc("b");
        assert_eq!(heap.count(), 2);
        assert_eq!(heap.release(a), Some("a"));
        assert_eq!(heap.count(), 1);
        assert_eq!(heap.get(b), Some(&"b"));
        assert_eq!(heap.get(a), None);
    }

    #[test]
    fn test_stale_and_out_of_range_release() {
        let mut heap = ObjectHeap::new();
        let h = heap.alloc(10);
        assert_eq!(heap.release(h), Some(10));
        assert_eq!(heap.release(h), None);
        assert_eq!(heap.release(9_999), None);
        assert_eq!(heap.count(), 0);

        // Freelist still intact after the bad releases.
        let again = heap.alloc(11);
        assert_eq!(again, h);
        assert_eq!(heap.count(), 1);
    }

    #[test]
    fn test_doubles_when_full() {
        let mut heap = ObjectHeap::with_capacity(4);
        for i in 0..5 {
            heap.alloc(i);
        }
        assert_eq!(heap.capacity(), 8);
        for i in 5..9 {
            heap.alloc(i);
        }
        assert_eq!(heap.capacity(), 16);
        assert_eq!(heap.count(), 9);
    }

    #[test]
    fn test_live_handles_never_reused() {
        let mut heap = ObjectHeap::with_capacity(1);
        let mut live = HashSet::new();
        let mut expected = 0usize;
        for round in 0..200u32 {
            if round % 3 == 2 {
                let victim = *live.iter().next().unwrap();
                live.remove(&victim);
                assert!(heap.release(victim).is_some());
                expected -= 1;
            } else {
                let h = heap.alloc(round);
                assert!(live.insert(h), "handle {} handed out twice", h);
                expected += 1;
            }
            assert_eq!(heap.count(), expected);
        }
    }

    #[test]
    fn test_drain() {
        let mut heap = ObjectHeap::new();
        let a = heap.alloc(1);
        heap.alloc(2);
        heap.release(a);
        assert_eq!(heap.drain(), vec![2]);
        assert!(heap.is_empty());
    }
}
