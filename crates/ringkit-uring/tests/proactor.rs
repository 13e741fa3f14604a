//! End-to-end proactor tests on the threaded backend.
//!
//! The threaded ring runs everywhere, including containers that refuse
//! io_uring setup, so these tests never skip.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ringkit_core::{Failure, FileType, OffHeapBuffer, StatFlags, StatMask, Timeout};
use ringkit_runtime::{Context, RuntimeConfig};
use ringkit_uring::{
    BackendKind, Proactor, RingConfig, ServerConfig, SocketFamily, SocketFlags, SocketOptions,
    SocketType, SpliceEnd, SpliceParams, CURRENT_POSITION,
};

const LIMIT: Duration = Duration::from_secs(5);

fn proactor() -> Proactor {
    Proactor::new(
        &RingConfig::new()
            .entries(64)
            .backend(BackendKind::Threaded)
            .threaded_workers(4),
    )
    .unwrap()
}

fn proactor_with(workers: usize) -> Proactor {
    Proactor::new(
        &RingConfig::new()
            .entries(64)
            .backend(BackendKind::Threaded)
            .threaded_workers(workers),
    )
    .unwrap()
}

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

fn scratch(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ringkit-{}-{}", std::process::id(), name))
}

fn buffer(data: &[u8]) -> Arc<OffHeapBuffer> {
    Arc::new(OffHeapBuffer::from_bytes(data).unwrap())
}

#[test]
fn test_nop_resolves_after_two_process_calls() {
    let p = proactor();
    let op = p.nop();
    assert!(!op.is_resolved());

    p.process();
    p.process();

    assert!(op.is_resolved());
    assert_eq!(op.peek(), Some(Ok(())));
    assert_eq!(p.pending(), 0);
}

#[test]
fn test_delay_waits_at_least_its_timeout() {
    let p = proactor();
    let start = Instant::now();
    let op = p.delay(Timeout::millis(100));

    while !op.is_resolved() {
        p.process();
        std::thread::sleep(Duration::from_millis(1));
        assert!(start.elapsed() < LIMIT);
    }
    assert!(start.elapsed() >= Duration::from_millis(100));
    let elapsed = op.peek().unwrap().unwrap();
    assert!(elapsed >= Duration::from_millis(100));
}

#[test]
fn test_reads_route_to_their_own_promise() {
    const N: usize = 16;
    let p = proactor();

    let pipes: Vec<_> = (0..N).map(|_| pipe()).collect();
    let buffers: Vec<_> = (0..N).map(|_| OffHeapBuffer::shared(32).unwrap()).collect();
    let reads: Vec<_> = pipes
        .iter()
        .zip(&buffers)
        .map(|(&(r, _), buf)| p.read(r, buf, CURRENT_POSITION, None))
        .collect();

    // fill the pipes back to front
    for (i, &(_, w)) in pipes.iter().enumerate().rev() {
        let msg = format!("pipe-{}", i);
        let n = unsafe { libc::write(w, msg.as_ptr() as *const libc::c_void, msg.len()) };
        assert_eq!(n as usize, msg.len());
    }

    for (i, read) in reads.iter().enumerate() {
        let expected = format!("pipe-{}", i);
        assert_eq!(p.run_until(read, LIMIT), Ok(expected.len()));
        assert_eq!(buffers[i].export(), expected.as_bytes());
    }

    for (r, w) in pipes {
        close(r);
        close(w);
    }
}

#[test]
fn test_file_lifecycle() {
    let p = proactor();
    let path = scratch("lifecycle");

    let fd = p
        .run_until(
            &p.open(&path, libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC | libc::O_CLOEXEC, 0o644, None),
            LIMIT,
        )
        .unwrap();
    assert!(fd >= 0);

    let data = buffer(b"0123456789");
    assert_eq!(p.run_until(&p.write(fd, &data, 0, None), LIMIT), Ok(10));

    let tail = OffHeapBuffer::shared(16).unwrap();
    assert_eq!(p.run_until(&p.read(fd, &tail, 6, None), LIMIT), Ok(4));
    assert_eq!(tail.export(), b"6789");

    let by_fd = p
        .run_until(&p.stat_fd(fd, StatFlags::empty(), StatMask::BASIC_STATS), LIMIT)
        .unwrap();
    assert_eq!(by_fd.size, 10);
    assert_eq!(by_fd.file_type, FileType::Regular);

    let by_path = p
        .run_until(&p.stat_path(&path, StatFlags::empty(), StatMask::ALL), LIMIT)
        .unwrap();
    assert_eq!(by_path.inode, by_fd.inode);

    assert_eq!(p.run_until(&p.close(fd, None), LIMIT), Ok(()));
    let again = p.run_until(&p.close(fd, None), LIMIT);
    assert_eq!(again, Err(Failure::native(libc::EBADF)));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_stat_missing_path_is_enoent() {
    let p = proactor();
    let missing = scratch("does-not-exist");
    let res = p.run_until(&p.stat_path(&missing, StatFlags::empty(), StatMask::BASIC_STATS), LIMIT);
    assert_eq!(res.map(|_| ()), Err(Failure::native(libc::ENOENT)));
}

#[test]
fn test_vector_io_distributes_bytes() {
    let p = proactor();
    let path = scratch("vector");
    std::fs::write(&path, b"").unwrap();
    let fd = p
        .run_until(&p.open(&path, libc::O_RDWR | libc::O_CLOEXEC, 0, None), LIMIT)
        .unwrap();

    let parts = vec![buffer(b"abc"), buffer(b"defg"), buffer(b"hij")];
    assert_eq!(p.run_until(&p.write_vector(fd, parts, 0, None), LIMIT), Ok(10));

    let targets: Vec<_> = (0..3).map(|_| OffHeapBuffer::shared(4).unwrap()).collect();
    let n = p.run_until(&p.read_vector(fd, targets.clone(), 0, None), LIMIT);
    assert_eq!(n, Ok(10));
    assert_eq!(targets[0].export(), b"abcd");
    assert_eq!(targets[1].export(), b"efgh");
    assert_eq!(targets[2].export(), b"ij");

    let empty = p.read_vector(fd, Vec::new(), 0, None);
    assert!(matches!(empty.peek(), Some(Err(Failure::InvalidArgument(_)))));

    p.run_until(&p.close(fd, None), LIMIT).unwrap();
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_linked_timeout_cancels_idle_read() {
    let p = proactor();
    let (r, w) = pipe();
    let buf = OffHeapBuffer::shared(8).unwrap();

    let start = Instant::now();
    let read = p.read(r, &buf, CURRENT_POSITION, Some(Timeout::millis(30)));
    assert_eq!(p.run_until(&read, LIMIT), Err(Failure::native(libc::ECANCELED)));
    assert!(start.elapsed() >= Duration::from_millis(30));
    assert_eq!(p.pending(), 0);

    // the same pipe still works once data is there
    assert_eq!(unsafe { libc::write(w, b"ok".as_ptr() as *const libc::c_void, 2) }, 2);
    let read = p.read(r, &buf, CURRENT_POSITION, Some(Timeout::seconds(1)));
    assert_eq!(p.run_until(&read, LIMIT), Ok(2));
    assert_eq!(buf.export(), b"ok");

    close(r);
    close(w);
}

#[test]
fn test_cancel_pending_delay() {
    let p = proactor();
    let delay = p.delay(Timeout::minutes(1));
    p.process();

    let cancel = p.cancel(delay.token());
    assert_eq!(p.run_until(&cancel, LIMIT), Ok(()));
    assert_eq!(
        p.run_until(&delay, LIMIT).map(|_| ()),
        Err(Failure::native(libc::ECANCELED))
    );

    let stale = p.cancel(delay.token());
    assert_eq!(p.run_until(&stale, LIMIT), Err(Failure::native(libc::ENOENT)));
}

#[test]
fn test_splice_pipe_into_file() {
    let p = proactor();
    let path = scratch("splice");
    let file = std::fs::File::create(&path).unwrap();
    let (r, w) = pipe();
    assert_eq!(unsafe { libc::write(w, b"spliced".as_ptr() as *const libc::c_void, 7) }, 7);

    let params = SpliceParams::new(SpliceEnd::pipe(r), SpliceEnd::file(file.as_raw_fd(), 0), 7);
    assert_eq!(p.run_until(&p.splice(params, None), LIMIT), Ok(7));
    assert_eq!(std::fs::read(&path).unwrap(), b"spliced");

    let bad = SpliceParams::new(SpliceEnd::pipe(r), SpliceEnd::socket(w).positioned(4), 7);
    assert!(matches!(
        p.splice(bad, None).peek(),
        Some(Err(Failure::InvalidArgument(_)))
    ));

    close(r);
    close(w);
    drop(file);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn test_accept_and_connect_loopback() {
    let p = proactor();
    let server = p
        .run_until(&p.server(ServerConfig::tcp("127.0.0.1:0".parse().unwrap()).backlog(8)), LIMIT)
        .unwrap();
    assert_ne!(server.local.port(), 0);

    let accepted = p.accept(server.fd, libc::SOCK_CLOEXEC);
    let sock = p
        .run_until(
            &p.socket(
                SocketFamily::of(&server.local),
                SocketType::Stream,
                SocketFlags::CLOEXEC,
                SocketOptions::KEEPALIVE,
            ),
            LIMIT,
        )
        .unwrap();
    assert!(sock >= 0);
    let connected = p.connect(sock, server.local, Some(Timeout::seconds(2)));

    assert_eq!(p.run_until(&connected, LIMIT), Ok(()));
    let conn = p.run_until(&accepted, LIMIT).unwrap();
    assert!(conn.fd >= 0);
    let peer = conn.peer.unwrap();
    assert_eq!(peer.ip(), server.local.ip());

    // bytes written on one end arrive on the other
    let out = buffer(b"ping");
    assert_eq!(p.run_until(&p.write(sock, &out, CURRENT_POSITION, None), LIMIT), Ok(4));
    let inbox = OffHeapBuffer::shared(8).unwrap();
    assert_eq!(p.run_until(&p.read(conn.fd, &inbox, CURRENT_POSITION, None), LIMIT), Ok(4));
    assert_eq!(inbox.export(), b"ping");

    close(conn.fd);
    close(sock);
    close(server.fd);
}

#[test]
fn test_server_on_taken_address_fails() {
    let p = proactor();
    let first = p
        .run_until(&p.server(ServerConfig::tcp("127.0.0.1:0".parse().unwrap())), LIMIT)
        .unwrap();

    let again = ServerConfig::tcp(first.local).options(SocketOptions::NONE);
    assert_eq!(
        p.run_until(&p.server(again), LIMIT),
        Err(Failure::native(libc::EADDRINUSE))
    );

    // a std listener sees the same port as taken
    assert!(TcpListener::bind(first.local).is_err());
    close(first.fd);
}

#[test]
fn test_cancel_reaches_read_waiting_on_empty_pipe() {
    let p = proactor_with(1);
    let (r, w) = pipe();
    let buf = OffHeapBuffer::shared(8).unwrap();

    let read = p.read(r, &buf, CURRENT_POSITION, None);
    p.process();
    // give the only worker time to pick the read up
    std::thread::sleep(Duration::from_millis(20));
    assert!(!read.is_resolved());

    let cancel = p.cancel(read.token());
    assert_eq!(p.run_until(&cancel, LIMIT), Ok(()));
    assert_eq!(p.run_until(&read, LIMIT), Err(Failure::native(libc::ECANCELED)));

    // the worker is free again
    let (r2, w2) = pipe();
    let second = p.read(r2, &buf, CURRENT_POSITION, None);
    p.process();
    assert_eq!(unsafe { libc::write(w2, b"ok".as_ptr() as *const libc::c_void, 2) }, 2);
    assert_eq!(p.run_until(&second, LIMIT), Ok(2));

    for fd in [r, w, r2, w2] {
        close(fd);
    }
}

#[test]
fn test_shutdown_with_idle_reads_returns_promptly() {
    let p = proactor_with(1);
    let pipes: Vec<_> = (0..3).map(|_| pipe()).collect();
    let buf = OffHeapBuffer::shared(8).unwrap();
    let reads: Vec<_> = pipes
        .iter()
        .map(|&(r, _)| p.read(r, &buf, CURRENT_POSITION, None))
        .collect();
    p.process();
    std::thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    p.shutdown();
    assert!(start.elapsed() < Duration::from_secs(1));
    for read in &reads {
        assert_eq!(read.peek(), Some(Err(Failure::native(libc::ECANCELED))));
    }
    for (r, w) in pipes {
        close(r);
        close(w);
    }
}

#[test]
fn test_backpressure_queues_instead_of_failing() {
    let p = Proactor::new(
        &RingConfig::new()
            .entries(4)
            .backend(BackendKind::Threaded)
            .threaded_workers(2),
    )
    .unwrap();

    let delays: Vec<_> = (0..20).map(|_| p.delay(Timeout::millis(5))).collect();
    assert_eq!(p.queued(), 20);
    p.submit_phase();
    assert_eq!(p.queued(), 16);

    for d in &delays {
        assert!(p.run_until(d, LIMIT).is_ok());
    }
    assert_eq!(p.pending(), 0);
}

#[test]
fn test_promise_timeout_races_native_completion() {
    let ctx = Context::new(RuntimeConfig::new().timeout_slots(8).task_workers(2)).unwrap();
    let p = proactor();
    let (r, w) = pipe();
    let buf = OffHeapBuffer::shared(8).unwrap();

    let read = p.read(r, &buf, CURRENT_POSITION, None);
    read.with_timeout(ctx.timeouts(), Timeout::millis(20), Ok(usize::MAX));
    assert_eq!(p.run_until(&read, LIMIT), Ok(usize::MAX));

    // the native completion arrives later and is discarded
    assert_eq!(unsafe { libc::write(w, b"late".as_ptr() as *const libc::c_void, 4) }, 4);
    let deadline = Instant::now() + LIMIT;
    while p.pending() > 0 && Instant::now() < deadline {
        p.process();
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(p.pending(), 0);
    assert_eq!(read.peek(), Some(Ok(usize::MAX)));

    close(r);
    close(w);
    ctx.shutdown();
}

#[cfg(target_os = "linux")]
#[test]
fn test_io_uring_backend_when_available() {
    let config = RingConfig::new().entries(32).backend(BackendKind::IoUring);
    let p = match Proactor::new(&config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("io_uring unavailable, skipping: {}", e);
            return;
        }
    };
    assert_eq!(p.backend_kind(), BackendKind::IoUring);

    assert_eq!(p.run_until(&p.nop(), LIMIT), Ok(()));

    let start = Instant::now();
    assert!(p.run_until(&p.delay(Timeout::millis(50)), LIMIT).is_ok());
    assert!(start.elapsed() >= Duration::from_millis(50));

    let (r, w) = pipe();
    let buf = OffHeapBuffer::shared(8).unwrap();
    let read = p.read(r, &buf, CURRENT_POSITION, None);
    p.process();
    assert_eq!(unsafe { libc::write(w, b"uring".as_ptr() as *const libc::c_void, 5) }, 5);
    assert_eq!(p.run_until(&read, LIMIT), Ok(5));
    assert_eq!(buf.export(), b"uring");
    close(r);
    close(w);
}

#[cfg(target_os = "linux")]
#[test]
fn test_io_uring_shutdown_releases_kernel_accept() {
    let config = RingConfig::new().entries(32).backend(BackendKind::IoUring);
    let p = match Proactor::new(&config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("io_uring unavailable, skipping: {}", e);
            return;
        }
    };
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let target = listener.local_addr().unwrap();

    let accepted = p.accept(listener.as_raw_fd(), libc::SOCK_CLOEXEC);
    p.process();
    p.shutdown();
    assert_eq!(accepted.peek(), Some(Err(Failure::native(libc::ECANCELED))));

    // the cancelled kernel accept no longer competes for connections
    let _client = TcpStream::connect(target).unwrap();
    listener.set_nonblocking(true).unwrap();
    let deadline = Instant::now() + Duration::from_secs(1);
    loop {
        match listener.accept() {
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::WouldBlock && Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("connection was not delivered to the listener: {}", e),
        }
    }
}
