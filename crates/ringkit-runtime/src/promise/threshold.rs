//! Count-down latch that runs an action exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

type Action = Box<dyn FnOnce() + Send>;

/// Runs its action when the `threshold`-th event is registered. Extra
/// registrations are ignored.
pub struct ActionableThreshold {
    remaining: AtomicUsize,
    action: Mutex<Option<Action>>,
}

impl ActionableThreshold {
    pub fn new<F>(threshold: usize, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let latch = ActionableThreshold {
            remaining: AtomicUsize::new(threshold),
            action: Mutex::new(Some(Box::new(action))),
        };
        if threshold == 0 {
            latch.fire();
        }
        latch
    }

    /// Count one event. Returns `true` on the call that ran the action.
    pub fn register(&self) -> bool {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match prev {
            Ok(1) => {
                self.fire();
                true
            }
            _ => false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    fn fire(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fires_once_at_threshold() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let latch = ActionableThreshold::new(3, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!latch.register());
        assert!(!latch.register());
        assert!(latch.register());
        assert!(!latch.register());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(latch.remaining(), 0);
    }

    #[test]
    fn test_zero_threshold_fires_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _latch = ActionableThreshold::new(0, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
