//! The proactor: typed submissions in, resolved promises out.
//!
//! ```text
//!   op()  ──► heap.alloc(pending) ──► backlog ──┐
//!                                                │ process()
//!   ┌────────────── submit phase ◄───────────────┘
//!   │  backlog ─► backend.push ... backend.submit
//!   │
//!   └─► completion phase
//!        backend.peek(batch) ─► heap.release(handle) ─► promise.resolve
//! ```
//!
//! Every request gets a handle from the object heap for its continuation.
//! The handle, tagged with a generation counter, is the submission's
//! `user_data`, so a completion routes to exactly one pending operation.
//! Requests always go through the backlog first; the submit phase moves
//! as many as the ring has room for, which gives backpressure without
//! ever failing a request for lack of slots.
//!
//! Continuations run after the state lock is dropped, so a callback can
//! submit further operations on the same proactor.

use std::collections::VecDeque;
use std::ops::Deref;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use ringkit_core::shape::submission::{opcode as op, sqe_flags};
use ringkit_core::shape::SubmissionEntry;
use ringkit_core::{
    kdebug, ktrace, kwarn, Failure, Handle, ObjectHeap, OffHeapTimeSpec, PromiseResult, Timeout,
};
use ringkit_runtime::{Promise, Value};

use crate::config::{BackendKind, RingConfig};
use crate::error::Result;
use crate::ring::{self, CompletionBatch, RingBackend, SqeImage};

/// `user_data` of linked timeout entries. Their completions are dropped.
const LINK_USER_DATA: u64 = ring::SILENT_USER_DATA;

const HANDLE_MASK: u64 = 0xffff_ffff;
const GENERATION_MASK: u32 = 0x7fff_ffff;

/// Correlation token of one submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    /// Token of a request that failed before it reached the ring.
    pub const INVALID: Token = Token(LINK_USER_DATA);

    pub const fn user_data(&self) -> u64 {
        self.0
    }

    pub const fn handle(&self) -> Handle {
        (self.0 & HANDLE_MASK) as Handle
    }

    pub const fn is_valid(&self) -> bool {
        self.0 != LINK_USER_DATA
    }
}

/// A submitted operation: its token plus the promise it resolves.
#[derive(Debug)]
pub struct Submitted<T: Value> {
    token: Token,
    promise: Promise<T>,
}

impl<T: Value> Submitted<T> {
    pub(crate) fn failed(failure: Failure) -> Self {
        Submitted { token: Token::INVALID, promise: Promise::ready_fail(failure) }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn promise(&self) -> &Promise<T> {
        &self.promise
    }

    pub fn into_promise(self) -> Promise<T> {
        self.promise
    }
}

impl<T: Value> Deref for Submitted<T> {
    type Target = Promise<T>;

    fn deref(&self) -> &Promise<T> {
        &self.promise
    }
}

/// Work done by one [`Proactor::process`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub submitted: usize,
    pub completed: usize,
}

impl Progress {
    pub fn is_idle(&self) -> bool {
        self.submitted == 0 && self.completed == 0
    }
}

/// How an operation ends for its continuation.
enum Finish {
    /// The ring produced a completion result.
    Result(i32),
    /// The ring may still reference the operation's memory: fail the
    /// promise but never free what the entry points at.
    Abandon,
}

type Completion = Box<dyn FnOnce(Finish) + Send>;

/// Continuation of one in-flight operation.
struct Pending {
    user_data: u64,
    complete: Completion,
    /// Keeps the linked timeout's timespec alive until the op completes.
    _link: Option<OffHeapTimeSpec>,
}

impl Pending {
    fn finish(self, res: i32) {
        (self.complete)(Finish::Result(res));
    }

    fn abandon(self) {
        let Pending { complete, _link: link, .. } = self;
        std::mem::forget(link);
        complete(Finish::Abandon);
    }
}

/// A request waiting in the backlog.
struct Request {
    sqe: SqeImage,
    link: Option<SqeImage>,
}

impl Request {
    fn slots(&self) -> usize {
        1 + self.link.is_some() as usize
    }

    fn user_data(&mut self) -> u64 {
        self.sqe.view().user_data()
    }
}

struct State {
    backend: Box<dyn RingBackend>,
    heap: ObjectHeap<Pending>,
    backlog: VecDeque<Request>,
    batch: CompletionBatch,
    generation: u32,
    closed: bool,
}

pub struct Proactor {
    state: Mutex<State>,
    kind: BackendKind,
}

impl Proactor {
    /// Open the backend `config` selects.
    pub fn new(config: &RingConfig) -> Result<Self> {
        let backend = ring::open(config)?;
        Self::with_backend(backend, config.completion_batch)
    }

    pub fn from_env() -> Result<Self> {
        Self::new(&RingConfig::from_env())
    }

    pub fn with_backend(backend: Box<dyn RingBackend>, completion_batch: usize) -> Result<Self> {
        let batch = CompletionBatch::new(completion_batch)
            .map_err(|_| crate::error::RingError::Config("completion batch allocation failed"))?;
        let kind = backend.kind();
        kdebug!("proactor up: {:?}, {} slots", kind, backend.capacity());
        Ok(Proactor {
            state: Mutex::new(State {
                backend,
                heap: ObjectHeap::new(),
                backlog: VecDeque::new(),
                batch,
                generation: 0,
                closed: false,
            }),
            kind,
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.kind
    }

    /// Operations submitted or queued whose completion has not been seen.
    pub fn pending(&self) -> usize {
        self.state.lock().heap.count()
    }

    /// Requests waiting for a free ring slot.
    pub fn queued(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// One submit phase followed by one completion phase.
    pub fn process(&self) -> Progress {
        let submitted = self.submit_phase();
        let completed = self.completion_phase();
        Progress { submitted, completed }
    }

    /// Move backlog requests into the ring and submit them.
    pub fn submit_phase(&self) -> usize {
        let mut failed = Vec::new();
        let submitted = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.closed {
                return 0;
            }

            loop {
                let need = match state.backlog.front() {
                    Some(req) => req.slots(),
                    None => break,
                };
                // a linked pair goes in together or not at all
                if state.backend.space_left() < need {
                    break;
                }
                let Some(mut req) = state.backlog.pop_front() else {
                    break;
                };
                let sqe = req.sqe.view();
                let pushed = state.backend.push(&sqe).and_then(|()| match req.link.as_mut() {
                    Some(link) => state.backend.push(&link.view()),
                    None => Ok(()),
                });
                if let Err(e) = pushed {
                    kwarn!("{} rejected by ring: {}", op::name(sqe.opcode()), e);
                    if let Some(pending) = take_pending(&mut state.heap, sqe.user_data()) {
                        failed.push(pending);
                    }
                }
            }

            match state.backend.submit() {
                Ok(n) => n,
                Err(e) => {
                    kwarn!("ring submit failed: {}", e);
                    0
                }
            }
        };

        for pending in failed {
            pending.finish(-libc::EINVAL);
        }
        submitted
    }

    /// Resolve up to one batch of ready completions.
    pub fn completion_phase(&self) -> usize {
        let mut ready = Vec::new();
        {
            let mut guard = self.state.lock();
            reap(&mut guard, &mut ready);
        }

        let completed = ready.len();
        for (pending, res) in ready {
            pending.finish(res);
        }
        completed
    }

    /// Drive `process` until `promise` resolves or `limit` passes.
    pub fn run_until<T: Value>(&self, promise: &Promise<T>, limit: Duration) -> PromiseResult<T> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(result) = promise.peek() {
                return result;
            }
            if Instant::now() >= deadline {
                return Err(Failure::Timeout);
            }
            if self.process().is_idle() {
                thread::sleep(Duration::from_micros(50));
            }
        }
    }

    /// Close the ring. Operations still pending fail with `ECANCELED`.
    ///
    /// Completions the ring delivers while closing resolve normally. If the
    /// backend cannot confirm that nothing references operation memory any
    /// more, the remaining operations still fail but their buffers and
    /// records are leaked instead of freed.
    pub fn shutdown(&self) {
        let mut ready = Vec::new();
        let (abandoned, quiescent) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.closed {
                return;
            }
            state.closed = true;

            for mut req in std::mem::take(&mut state.backlog) {
                if let Some(pending) = take_pending(&mut state.heap, req.user_data()) {
                    ready.push((pending, -libc::ECANCELED));
                }
            }
            let quiescent = state.backend.close();
            while reap(state, &mut ready) > 0 {}
            (state.heap.drain(), quiescent)
        };

        if !abandoned.is_empty() {
            kdebug!(
                "proactor closed with {} pending operations (quiescent: {})",
                abandoned.len(),
                quiescent
            );
        }
        for (pending, res) in ready {
            pending.finish(res);
        }
        for pending in abandoned {
            if quiescent {
                pending.finish(-libc::ECANCELED);
            } else {
                pending.abandon();
            }
        }
    }

    /// Queue one operation.
    ///
    /// `prepare` fills the entry; `decode` turns the completion result into
    /// the promise value and owns whatever memory the entry points at.
    pub(crate) fn submit_op<T, P, D>(&self, prepare: P, timeout: Option<Timeout>, decode: D) -> Submitted<T>
    where
        T: Value,
        P: FnOnce(&SubmissionEntry),
        D: FnOnce(i32) -> PromiseResult<T> + Send + 'static,
    {
        let link = match timeout.map(|t| OffHeapTimeSpec::new(t.as_duration())).transpose() {
            Ok(link) => link,
            Err(failure) => return Submitted::failed(failure),
        };
        let link_addr = link.as_ref().map(|spec| spec.address());

        let promise = Promise::new();
        let target = promise.clone();
        let complete: Completion = Box::new(move |finish| match finish {
            Finish::Result(res) => {
                target.resolve(decode(res));
            }
            Finish::Abandon => {
                std::mem::forget(decode);
                target.fail(Failure::native(libc::ECANCELED));
            }
        });

        let mut req = Request { sqe: SqeImage::zeroed(), link: None };
        let sqe = req.sqe.view();
        prepare(&sqe);

        let mut state = self.state.lock();
        if state.closed {
            return Submitted::failed(Failure::Shutdown);
        }
        state.generation = state.generation.wrapping_add(1) & GENERATION_MASK;
        let generation = state.generation as u64;
        let handle = state.heap.alloc(Pending { user_data: 0, complete, _link: link });
        let user_data = (generation << 32) | handle as u64;
        if let Some(pending) = state.heap.get_mut(handle) {
            pending.user_data = user_data;
        }

        sqe.set_user_data(user_data);
        if let Some(addr) = link_addr {
            sqe.add_flags(sqe_flags::IO_LINK);
            let mut image = SqeImage::zeroed();
            let entry = image.view();
            entry.prep_rw(op::LINK_TIMEOUT, -1, addr, 1, 0);
            entry.set_user_data(LINK_USER_DATA);
            req.link = Some(image);
        }
        ktrace!("queued {} token={:#x}", op::name(sqe.opcode()), user_data);
        state.backlog.push_back(req);

        Submitted { token: Token(user_data), promise }
    }
}

/// Take one batch of completions off the backend. Returns the number of
/// entries consumed, including ignored ones.
fn reap(state: &mut State, ready: &mut Vec<(Pending, i32)>) -> usize {
    let n = state.backend.peek(&state.batch);
    for i in 0..n {
        let Some(cqe) = state.batch.entry(i) else {
            break;
        };
        let user_data = cqe.user_data();
        if user_data == LINK_USER_DATA {
            continue;
        }
        match take_pending(&mut state.heap, user_data) {
            Some(pending) => ready.push((pending, cqe.res())),
            None => kwarn!("completion for unknown token {:#x}", user_data),
        }
    }
    state.backend.advance(n);
    n
}

/// Release the heap slot `user_data` names, if it still belongs to it.
fn take_pending(heap: &mut ObjectHeap<Pending>, user_data: u64) -> Option<Pending> {
    let handle = (user_data & HANDLE_MASK) as Handle;
    let owned = heap.get(handle).is_some_and(|pending| pending.user_data == user_data);
    if owned {
        heap.release(handle)
    } else {
        None
    }
}

impl Drop for Proactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;
    use ringkit_core::shape::submission::opcode;

    fn threaded(entries: u32) -> Proactor {
        Proactor::new(
            &RingConfig::new()
                .entries(entries)
                .backend(BackendKind::Threaded)
                .threaded_workers(2),
        )
        .unwrap()
    }

    fn nop(proactor: &Proactor) -> Submitted<()> {
        proactor.submit_op(
            |sqe| sqe.prep_rw(opcode::NOP, -1, 0, 0, 0),
            None,
            |res| if res < 0 { Err(Failure::native(-res)) } else { Ok(()) },
        )
    }

    #[test]
    fn test_token_layout() {
        let p = threaded(8);
        let a = nop(&p);
        let b = nop(&p);
        assert_ne!(a.token(), b.token());
        assert_eq!(a.token().handle(), 0);
        assert_eq!(b.token().handle(), 1);
        assert!(a.token().is_valid());
        assert!(!Token::INVALID.is_valid());
        assert_eq!(p.pending(), 2);
        assert_eq!(p.queued(), 2);
    }

    #[test]
    fn test_backlog_drains_in_batches() {
        let p = threaded(2);
        let ops: Vec<_> = (0..5).map(|_| nop(&p)).collect();
        assert_eq!(p.queued(), 5);

        let first = p.submit_phase();
        assert_eq!(first, 2);
        assert_eq!(p.queued(), 3);

        for op in &ops {
            assert_eq!(p.run_until(op, Duration::from_secs(5)), Ok(()));
        }
        assert_eq!(p.pending(), 0);
        assert_eq!(p.queued(), 0);
    }

    #[test]
    fn test_shutdown_fails_pending() {
        let p = threaded(8);
        let op = nop(&p);
        p.shutdown();
        assert_eq!(op.peek(), Some(Err(Failure::native(libc::ECANCELED))));
        let late = nop(&p);
        assert_eq!(late.peek(), Some(Err(Failure::Shutdown)));
        assert_eq!(late.token(), Token::INVALID);
    }

    #[test]
    fn test_reentrant_submit_from_callback() {
        let p = std::sync::Arc::new(threaded(8));
        let second = Promise::<()>::new();
        let (proactor, chained) = (std::sync::Arc::clone(&p), second.clone());
        nop(&p).on_success(move |_| {
            nop(&proactor).forward_to(&chained);
        });
        assert_eq!(p.run_until(&second, Duration::from_secs(5)), Ok(()));
    }

    /// Accepts every entry and never completes any.
    struct StuckRing {
        quiescent: bool,
        in_flight: usize,
    }

    impl RingBackend for StuckRing {
        fn kind(&self) -> BackendKind {
            BackendKind::Threaded
        }

        fn capacity(&self) -> usize {
            8
        }

        fn space_left(&mut self) -> usize {
            8 - self.in_flight
        }

        fn push(&mut self, _sqe: &SubmissionEntry) -> Result<()> {
            self.in_flight += 1;
            Ok(())
        }

        fn submit(&mut self) -> Result<usize> {
            Ok(self.in_flight)
        }

        fn peek(&mut self, _batch: &CompletionBatch) -> usize {
            0
        }

        fn advance(&mut self, _count: usize) {}

        fn in_flight(&self) -> usize {
            self.in_flight
        }

        fn close(&mut self) -> bool {
            self.quiescent
        }
    }

    fn stuck(quiescent: bool) -> Proactor {
        Proactor::with_backend(Box::new(StuckRing { quiescent, in_flight: 0 }), 8).unwrap()
    }

    /// An op whose continuation owns a clone of `held`.
    fn holding(proactor: &Proactor, held: &std::sync::Arc<()>) -> Submitted<()> {
        let held = std::sync::Arc::clone(held);
        proactor.submit_op(
            |sqe| sqe.prep_rw(opcode::READ, 0, 0, 0, 0),
            None,
            move |_| {
                drop(held);
                Ok(())
            },
        )
    }

    #[test]
    fn test_shutdown_keeps_memory_the_ring_may_still_use() {
        let p = stuck(false);
        let (submitted, queued) = (std::sync::Arc::new(()), std::sync::Arc::new(()));
        let in_ring = holding(&p, &submitted);
        p.process();
        let in_backlog = holding(&p, &queued);

        p.shutdown();
        assert_eq!(in_ring.peek(), Some(Err(Failure::native(libc::ECANCELED))));
        assert_eq!(in_backlog.peek(), Some(Err(Failure::native(libc::ECANCELED))));
        // the ring never returned the entry, so its memory stays alive
        assert_eq!(std::sync::Arc::strong_count(&submitted), 2);
        // never submitted, freed as usual
        assert_eq!(std::sync::Arc::strong_count(&queued), 1);
    }

    #[test]
    fn test_shutdown_frees_memory_of_quiescent_ring() {
        let p = stuck(true);
        let held = std::sync::Arc::new(());
        let op = holding(&p, &held);
        p.process();
        p.shutdown();
        assert_eq!(op.peek(), Some(Err(Failure::native(libc::ECANCELED))));
        assert_eq!(std::sync::Arc::strong_count(&held), 1);
        assert_eq!(p.pending(), 0);
    }
}
