//! Promise: a single-assignment value with callback subscription.
//!
//! ```text
//!   pending ──resolve(v)──► resolved(v)
//!      │                        ▲
//!      └── resolve(w) ──────────┘  (later writers are ignored)
//! ```
//!
//! A promise holds a `PromiseResult<T>`: failures are values, there is no
//! separate rejected state. The first `resolve` wins through an atomic
//! set; every subscriber then runs exactly once, on the resolving thread,
//! in subscription order. Subscribing to a resolved promise runs the
//! callback immediately on the subscribing thread, except while the
//! resolver is still running callbacks: then the late subscriber joins
//! the resolver's queue and runs after everything subscribed before it.
//!
//! Combinators (`map`, `flat_map`, `all`, ...) short-circuit on failure:
//! the mapper never sees a failure, it is passed through unchanged.

mod combine;
mod threshold;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use ringkit_core::{kerror, kwarn, Failure, PromiseResult, Timeout};

use crate::task::TaskScheduler;
use crate::timeout::TimeoutScheduler;

pub use combine::{all, all_of, any, any_success, Join};
pub use threshold::ActionableThreshold;

/// Bound shared by every promised value.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

type Callback<T> = Box<dyn FnOnce(&PromiseResult<T>) + Send>;

struct Waiters<T> {
    resolved: bool,
    /// The resolving thread is still running callbacks.
    draining: bool,
    callbacks: Vec<Callback<T>>,
}

struct Inner<T> {
    value: OnceLock<PromiseResult<T>>,
    waiters: Mutex<Waiters<T>>,
    done: Condvar,
}

/// Cloning a promise yields another handle to the same cell.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Value> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn run_callback<T>(cb: Callback<T>, value: &PromiseResult<T>) {
    if catch_unwind(AssertUnwindSafe(|| cb(value))).is_err() {
        kerror!("promise subscriber panicked");
    }
}

impl<T: Value> Promise<T> {
    pub fn new() -> Self {
        Promise {
            inner: Arc::new(Inner {
                value: OnceLock::new(),
                waiters: Mutex::new(Waiters { resolved: false, draining: false, callbacks: Vec::new() }),
                done: Condvar::new(),
            }),
        }
    }

    /// Already resolved with `value`.
    pub fn ready(value: T) -> Self {
        let p = Self::new();
        p.ok(value);
        p
    }

    /// Already resolved with `failure`.
    pub fn ready_fail(failure: Failure) -> Self {
        let p = Self::new();
        p.fail(failure);
        p
    }

    /// Set the value. Returns `false` (and drops `result`) if the promise
    /// was already resolved.
    pub fn resolve(&self, result: PromiseResult<T>) -> bool {
        if self.inner.value.set(result).is_err() {
            return false;
        }
        let mut callbacks = {
            let mut w = self.inner.waiters.lock();
            w.resolved = true;
            w.draining = true;
            std::mem::take(&mut w.callbacks)
        };
        self.inner.done.notify_all();

        let Some(value) = self.inner.value.get() else {
            return true;
        };
        loop {
            for cb in callbacks {
                run_callback(cb, value);
            }
            let mut w = self.inner.waiters.lock();
            if w.callbacks.is_empty() {
                w.draining = false;
                return true;
            }
            callbacks = std::mem::take(&mut w.callbacks);
        }
    }

    pub fn ok(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    pub fn fail(&self, failure: Failure) -> bool {
        self.resolve(Err(failure))
    }

    /// Resolve with `Failure::Cancelled` if still pending.
    pub fn cancel(&self) -> bool {
        self.fail(Failure::Cancelled)
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// Copy of the value, if resolved.
    pub fn peek(&self) -> Option<PromiseResult<T>> {
        self.inner.value.get().cloned()
    }

    /// Run `callback` once with the value.
    pub fn subscribe<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&PromiseResult<T>) + Send + 'static,
    {
        {
            let mut w = self.inner.waiters.lock();
            if !w.resolved || w.draining {
                w.callbacks.push(Box::new(callback));
                return self;
            }
        }
        if let Some(value) = self.inner.value.get() {
            run_callback(Box::new(callback), value);
        }
        self
    }

    pub fn on_success<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.subscribe(move |r| {
            if let Ok(v) = r {
                f(v)
            }
        })
    }

    pub fn on_failure<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&Failure) + Send + 'static,
    {
        self.subscribe(move |r| {
            if let Err(e) = r {
                f(e)
            }
        })
    }

    /// Run `f` on resolution, ignoring the value.
    pub fn then_do<F>(&self, f: F) -> &Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.subscribe(move |_| f())
    }

    /// Resolve `other` with whatever this promise resolves with.
    pub fn forward_to(&self, other: &Promise<T>) -> &Self {
        let other = other.clone();
        self.subscribe(move |r| {
            other.resolve(r.clone());
        })
    }

    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_result(move |r| r.map(f))
    }

    /// Map the whole result; the mapper also sees failures.
    pub fn map_result<U, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(PromiseResult<T>) -> PromiseResult<U> + Send + 'static,
    {
        let out = Promise::new();
        let target = out.clone();
        self.subscribe(move |r| {
            target.resolve(f(r.clone()));
        });
        out
    }

    /// Chain an operation producing another promise.
    pub fn flat_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Value,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let out = Promise::new();
        let target = out.clone();
        self.subscribe(move |r| match r {
            Ok(v) => {
                f(v.clone()).forward_to(&target);
            }
            Err(e) => {
                target.fail(e.clone());
            }
        });
        out
    }

    /// Race against a timer: if nothing resolves this promise within
    /// `timeout`, it resolves with `fallback`. Returns `self` for chaining.
    pub fn with_timeout(&self, timeouts: &TimeoutScheduler, timeout: Timeout, fallback: PromiseResult<T>) -> &Self {
        self.with_timeout_fn(timeouts, timeout, move || fallback)
    }

    /// Like [`with_timeout`](Self::with_timeout) but the fallback is only
    /// built when the timer wins.
    pub fn with_timeout_fn<F>(&self, timeouts: &TimeoutScheduler, timeout: Timeout, supplier: F) -> &Self
    where
        F: FnOnce() -> PromiseResult<T> + Send + 'static,
    {
        if self.is_resolved() {
            return self;
        }
        let target = self.clone();
        let scheduled = timeouts.schedule(timeout, move || {
            if !target.is_resolved() {
                target.resolve(supplier());
            }
        });
        if let Err(e) = scheduled {
            kwarn!("promise timeout not armed: {}", e);
        }
        self
    }

    /// Resolve with `Failure::Timeout` unless resolved within `timeout`.
    pub fn with_deadline(&self, timeouts: &TimeoutScheduler, timeout: Timeout) -> &Self {
        self.with_timeout(timeouts, timeout, Err(Failure::Timeout))
    }

    /// Build a promise whose value is computed by `work` on the task
    /// scheduler.
    pub fn async_task<F>(tasks: &TaskScheduler, work: F) -> Self
    where
        F: FnOnce() -> PromiseResult<T> + Send + 'static,
    {
        let out = Promise::new();
        let target = out.clone();
        if let Err(e) = tasks.submit(move || {
            target.resolve(work());
        }) {
            out.fail(e.into());
        }
        out
    }

    /// Block until resolved.
    pub fn sync_wait(&self) -> PromiseResult<T> {
        if let Some(v) = self.inner.value.get() {
            return v.clone();
        }
        let mut w = self.inner.waiters.lock();
        while !w.resolved {
            self.inner.done.wait(&mut w);
        }
        drop(w);
        self.peek().unwrap_or(Err(Failure::Cancelled))
    }

    /// Block until resolved or `timeout` elapses; `Failure::Timeout` in the
    /// latter case. The promise itself stays pending.
    pub fn sync_wait_timeout(&self, timeout: Duration) -> PromiseResult<T> {
        if let Some(v) = self.inner.value.get() {
            return v.clone();
        }
        let deadline = Instant::now() + timeout;
        let mut w = self.inner.waiters.lock();
        while !w.resolved {
            if self.inner.done.wait_until(&mut w, deadline).timed_out() {
                break;
            }
        }
        let resolved = w.resolved;
        drop(w);
        if resolved {
            self.peek().unwrap_or(Err(Failure::Cancelled))
        } else {
            Err(Failure::Timeout)
        }
    }
}

impl<T: Value + std::fmt::Debug> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.value.get() {
            Some(v) => write!(f, "Promise({:?})", v),
            None => write!(f, "Promise(<pending>)"),
        }
    }
}
