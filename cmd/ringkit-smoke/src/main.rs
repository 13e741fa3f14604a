//! ringkit End-to-End Smoke Test
//!
//! Exercises the full stack:
//!   Part A - Off-heap records, object heap and pools
//!   Part B - Promises, timeout scheduler, task scheduler
//!   Part C - Proactor on the threaded ring: every operation family
//!   Part D - Proactor on io_uring (skipped when ring setup is refused)
//!
//! Run: ./target/release/ringkit-smoke
//! Env: RINGKIT_LOG_LEVEL=debug for backend and scheduler logs

use std::net::TcpListener;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ringkit::prelude::*;
use ringkit::{
    all, any_success, BackendKind, Handle, ObjectHeap, ObjectPool, SpliceEnd, SpliceParams,
    StatFlags, StatMask, CURRENT_POSITION,
};

const LIMIT: Duration = Duration::from_secs(5);

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    /// Record a promise outcome; returns the value on success.
    fn expect<T>(&mut self, name: &str, r: PromiseResult<T>) -> Option<T> {
        match r {
            Ok(v) => { self.pass(name); Some(v) }
            Err(e) => { self.fail(name, &e.to_string()); None }
        }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn pipe() -> Option<(RawFd, RawFd)> {
    let mut fds = [0; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == 0 { Some((fds[0], fds[1])) } else { None }
}

fn close_fd(fd: RawFd) {
    unsafe { libc::close(fd) };
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ringkit-smoke-{}-{}", std::process::id(), name))
}

// ════════════════════════════════════════════════════════════
// Part A: Off-heap records, heap, pools
// ════════════════════════════════════════════════════════════

fn test_memory(t: &mut TestRunner) {
    t.section("Part A: Off-heap records and pools");

    match OffHeapBuffer::allocate(8) {
        Ok(buf) => {
            let n = buf.write(b"0123456789");
            t.check("buffer write clamps to capacity", n == 8 && buf.used() == 8, "not clamped");
            t.check("buffer dispose is idempotent", buf.dispose() && !buf.dispose(), "double dispose");
        }
        Err(e) => t.fail("buffer allocate", &e.to_string()),
    }

    let mut heap: ObjectHeap<&str> = ObjectHeap::with_capacity(2);
    let handles: Vec<Handle> = ["a", "b", "c"].iter().map(|s| heap.alloc(*s)).collect();
    t.check("heap grows past capacity", heap.capacity() >= 3 && heap.count() == 3, "no growth");
    let first = heap.release(handles[0]);
    let again = heap.release(handles[0]);
    t.check(
        "heap double release is ignored",
        first == Some("a") && again.is_none() && heap.count() == 2,
        "counter corrupted",
    );

    let mut pool = ObjectPool::with_size(1, String::new, |s: &mut String| s.clear());
    let h = pool.alloc();
    if let Some(s) = pool.get_mut(h) {
        s.push_str("dirty");
    }
    pool.release(h);
    let h = pool.alloc();
    t.check(
        "pool cleans on release",
        pool.get(h).is_some_and(|s| s.is_empty()),
        "instance not reset",
    );
}

// ════════════════════════════════════════════════════════════
// Part B: Promises and schedulers
// ════════════════════════════════════════════════════════════

fn test_runtime(t: &mut TestRunner, ctx: &Context) {
    t.section("Part B: Promises and schedulers");

    let p = Promise::<i32>::new();
    p.ok(1);
    p.ok(2);
    t.check("first resolution wins", p.peek() == Some(Ok(1)), "second write won");

    let (a, b) = (Promise::<u32>::new(), Promise::<&str>::new());
    let joined = all((a.clone(), b.clone()));
    b.ok("two");
    a.ok(1u32);
    t.check(
        "all() keeps argument order",
        joined.peek() == Some(Ok((1u32, "two"))),
        "wrong tuple",
    );

    let slow = Promise::<u32>::new();
    slow.with_timeout(ctx.timeouts(), Timeout::millis(20), Ok(7));
    t.expect("with_timeout falls back", slow.sync_wait_timeout(LIMIT).and_then(|v| {
        if v == 7 { Ok(v) } else { Err(Failure::message("native value won")) }
    }));

    let fast = Promise::<u32>::new();
    fast.with_timeout(ctx.timeouts(), Timeout::seconds(1), Ok(7));
    fast.ok(3);
    t.check("native value beats timeout", fast.sync_wait_timeout(LIMIT) == Ok(3), "fallback won");

    let first_ok = any_success(vec![
        Promise::ready_fail(Failure::Timeout),
        Promise::ready(5u32),
    ]);
    t.check("any_success skips failures", first_ok.peek() == Some(Ok(5)), "wrong winner");

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ran);
    let task = Promise::async_task(ctx.tasks(), move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(42u32)
    });
    t.check(
        "task scheduler runs work",
        task.sync_wait_timeout(LIMIT) == Ok(42) && ran.load(Ordering::SeqCst) == 1,
        "task did not run",
    );
    println!("       task workers: {}", ctx.tasks().parallelism());
}

// ════════════════════════════════════════════════════════════
// Part C/D: Proactor
// ════════════════════════════════════════════════════════════

fn test_proactor(t: &mut TestRunner, p: &Proactor) {
    // no-op
    let nop = p.nop();
    p.process();
    p.process();
    t.check("nop resolves in two process() calls", nop.is_resolved(), "still pending");

    // delay
    let start = Instant::now();
    let delay = p.delay(Timeout::millis(100));
    if let Some(elapsed) = t.expect("delay 100ms", p.run_until(&delay, LIMIT)) {
        t.check(
            "delay waited >= 100ms",
            elapsed >= Duration::from_millis(100) && start.elapsed() >= Duration::from_millis(100),
            &format!("{:?}", elapsed),
        );
    }

    // file lifecycle
    let path = scratch("file");
    let flags = libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC | libc::O_CLOEXEC;
    if let Some(fd) = t.expect("open", p.run_until(&p.open(&path, flags, 0o644, None), LIMIT)) {
        if let Ok(data) = OffHeapBuffer::from_bytes(b"hello ringkit") {
            let data = Arc::new(data);
            t.expect("write", p.run_until(&p.write(fd, &data, 0, None), LIMIT));
        }
        if let Ok(buf) = OffHeapBuffer::shared(32) {
            let n = p.run_until(&p.read(fd, &buf, 6, None), LIMIT);
            t.check("read at offset", n == Ok(7) && buf.export() == b"ringkit", "wrong bytes");
        }
        let parts: Vec<_> = (0..2).filter_map(|_| OffHeapBuffer::shared(8).ok()).collect();
        let n = p.run_until(&p.read_vector(fd, parts.clone(), 0, None), LIMIT);
        t.check(
            "read_vector distributes",
            n == Ok(13) && parts.iter().map(|b| b.used()).collect::<Vec<_>>() == [8, 5],
            "wrong split",
        );
        match p.run_until(&p.stat_fd(fd, StatFlags::empty(), StatMask::BASIC_STATS), LIMIT) {
            Ok(st) => t.check("stat_fd size", st.size == 13 && st.is_file(), "wrong stat"),
            Err(e) => t.fail("stat_fd size", &e.to_string()),
        }
        t.expect("close", p.run_until(&p.close(fd, None), LIMIT));
    }
    let missing = p.run_until(&p.stat_path(&scratch("missing"), StatFlags::empty(), StatMask::ALL), LIMIT);
    t.check(
        "stat_path ENOENT",
        missing.err().and_then(|e| e.errno()) == Some(libc::ENOENT),
        "expected ENOENT",
    );
    let _ = std::fs::remove_file(&path);

    // linked timeout, cancel, splice over pipes
    if let Some((r, w)) = pipe() {
        if let Ok(buf) = OffHeapBuffer::shared(8) {
            let read = p.read(r, &buf, CURRENT_POSITION, Some(Timeout::millis(30)));
            let res = p.run_until(&read, LIMIT);
            t.check(
                "linked timeout cancels idle read",
                res.err().and_then(|e| e.errno()) == Some(libc::ECANCELED),
                "read was not cancelled",
            );
        }

        let long = p.delay(Timeout::minutes(1));
        p.process();
        let cancel = p.cancel(long.token());
        t.expect("cancel accepted", p.run_until(&cancel, LIMIT));
        t.check(
            "cancelled delay fails",
            p.run_until(&long, LIMIT).err().and_then(|e| e.errno()) == Some(libc::ECANCELED),
            "delay survived",
        );

        let spath = scratch("splice");
        if let Ok(file) = std::fs::File::create(&spath) {
            unsafe { libc::write(w, b"spliced".as_ptr() as *const libc::c_void, 7) };
            let params = SpliceParams::new(SpliceEnd::pipe(r), SpliceEnd::file(file.as_raw_fd(), 0), 7);
            let n = p.run_until(&p.splice(params, None), LIMIT);
            t.check(
                "splice pipe -> file",
                n == Ok(7) && std::fs::read(&spath).map(|b| b == b"spliced").unwrap_or(false),
                "wrong bytes",
            );
        }
        let _ = std::fs::remove_file(&spath);
        close_fd(r);
        close_fd(w);
    }

    // accept + connect on loopback
    if let Ok(listener) = TcpListener::bind("127.0.0.1:0") {
        if let Ok(target) = listener.local_addr() {
            let accepted = p.accept(listener.as_raw_fd(), libc::SOCK_CLOEXEC);
            let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
            let connected = p.connect(sock, target, Some(Timeout::seconds(2)));
            t.expect("connect loopback", p.run_until(&connected, LIMIT));
            match p.run_until(&accepted, LIMIT) {
                Ok(conn) => {
                    t.check("accept reports peer", conn.peer.is_some(), "no peer address");
                    close_fd(conn.fd);
                }
                Err(e) => t.fail("accept reports peer", &e.to_string()),
            }
            close_fd(sock);
        }
    }

    // fan-out: many reads, each lands in its own buffer
    let mut routed = true;
    let mut fds = Vec::new();
    let mut reads = Vec::new();
    for i in 0..32 {
        let (Some((r, w)), Ok(buf)) = (pipe(), OffHeapBuffer::shared(16)) else {
            routed = false;
            break;
        };
        let msg = format!("op-{}", i);
        unsafe { libc::write(w, msg.as_ptr() as *const libc::c_void, msg.len()) };
        reads.push((p.read(r, &buf, CURRENT_POSITION, None), buf, msg));
        fds.push((r, w));
    }
    for (read, buf, msg) in &reads {
        routed &= p.run_until(read, LIMIT) == Ok(msg.len()) && buf.export() == msg.as_bytes();
    }
    t.check("32 reads routed to their own promise", routed, "cross-wired completion");
    for (r, w) in fds {
        close_fd(r);
        close_fd(w);
    }

    t.check("no pending operations left", p.pending() == 0, &format!("{} pending", p.pending()));
}

fn main() {
    println!("=== ringkit End-to-End Smoke Test ===");
    let kver = std::fs::read_to_string("/proc/version").unwrap_or_default();
    println!("    kernel: {}", kver.trim().split(' ').nth(2).unwrap_or("?"));
    ringkit::init_logging();

    let mut t = TestRunner::new();

    test_memory(&mut t);

    let ctx = match Context::new(RuntimeConfig::from_env()) {
        Ok(ctx) => ctx,
        Err(e) => {
            println!("\nFATAL: Context::new failed: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };
    test_runtime(&mut t, &ctx);

    t.section("Part C: Proactor (threaded ring)");
    let config = RingConfig::from_env().backend(BackendKind::Threaded);
    match Proactor::new(&config) {
        Ok(p) => test_proactor(&mut t, &p),
        Err(e) => t.fail("threaded proactor", &e.to_string()),
    }

    t.section("Part D: Proactor (io_uring)");
    let config = RingConfig::from_env().backend(BackendKind::IoUring);
    match Proactor::new(&config) {
        Ok(p) => test_proactor(&mut t, &p),
        Err(e) => println!("       io_uring unavailable ({}), skipping", e),
    }

    ctx.shutdown();
    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
