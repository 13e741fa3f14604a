//! Aggregate combinators.
//!
//! `all` waits for every input and only then looks at the values, so the
//! result does not depend on completion order. It succeeds when every
//! input succeeded and otherwise carries the first failure in argument
//! order.

use std::sync::Arc;

use ringkit_core::{Failure, PromiseResult};

use super::{ActionableThreshold, Promise, Value};

/// Tuples of promises that can be awaited together.
pub trait Join {
    type Output: Value;

    fn join(self) -> Promise<Self::Output>;
}

macro_rules! impl_join {
    ($($ty:ident $var:ident),+) => {
        impl<$($ty: Value),+> Join for ($(Promise<$ty>,)+) {
            type Output = ($($ty,)+);

            fn join(self) -> Promise<Self::Output> {
                let ($($var,)+) = self;
                let out = Promise::new();
                let target = out.clone();
                let inputs = ($($var.clone(),)+);
                let count = [$(stringify!($var)),+].len();
                let latch = Arc::new(ActionableThreshold::new(count, move || {
                    let ($($var,)+) = inputs;
                    let gather = || -> PromiseResult<($($ty,)+)> {
                        Ok(($($var.peek().unwrap_or(Err(Failure::Cancelled))?,)+))
                    };
                    target.resolve(gather());
                }));
                $(
                    let l = Arc::clone(&latch);
                    $var.then_do(move || {
                        l.register();
                    });
                )+
                out
            }
        }
    };
}

impl_join!(A a);
impl_join!(A a, B b);
impl_join!(A a, B b, C c);
impl_join!(A a, B b, C c, D d);
impl_join!(A a, B b, C c, D d, E e);
impl_join!(A a, B b, C c, D d, E e, F f);

/// Resolve once every promise in the tuple has resolved.
///
/// ```ignore
/// let (n, s) = all((read_len, name)).sync_wait()?;
/// ```
pub fn all<J: Join>(promises: J) -> Promise<J::Output> {
    promises.join()
}

/// Resolve with each input's individual result, in input order.
pub fn all_of<T: Value>(promises: Vec<Promise<T>>) -> Promise<Vec<PromiseResult<T>>> {
    let out = Promise::new();
    let target = out.clone();
    let inputs = promises.clone();
    let latch = Arc::new(ActionableThreshold::new(promises.len(), move || {
        let results = inputs
            .iter()
            .map(|p| p.peek().unwrap_or(Err(Failure::Cancelled)))
            .collect();
        target.ok(results);
    }));
    for p in &promises {
        let l = Arc::clone(&latch);
        p.then_do(move || {
            l.register();
        });
    }
    out
}

/// Resolve with whichever input resolves first, success or failure.
pub fn any<T: Value>(promises: Vec<Promise<T>>) -> Promise<T> {
    if promises.is_empty() {
        return Promise::ready_fail(Failure::InvalidArgument("any() of no promises"));
    }
    let out = Promise::new();
    for p in &promises {
        p.forward_to(&out);
    }
    out
}

/// Resolve with the first success. If every input fails, resolve with the
/// failure of the last one to fail.
pub fn any_success<T: Value>(promises: Vec<Promise<T>>) -> Promise<T> {
    if promises.is_empty() {
        return Promise::ready_fail(Failure::InvalidArgument("any_success() of no promises"));
    }
    let out = Promise::new();
    let failures = Arc::new(ActionableThreshold::new(promises.len(), || {}));
    for p in &promises {
        let target = out.clone();
        let failures = Arc::clone(&failures);
        p.subscribe(move |r| match r {
            Ok(v) => {
                target.ok(v.clone());
            }
            Err(e) => {
                if failures.register() {
                    target.fail(e.clone());
                }
            }
        });
    }
    out
}
