//! Socket creation and listening sockets.
//!
//! `socket(2)`, `setsockopt(2)`, `bind(2)` and `listen(2)` are synchronous
//! and never block, so the proactor runs them in the continuation of a
//! `NOP`: the caller still gets a promise that resolves from `process()`.

use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::sys::socket::{self as sock, sockopt, AddressFamily, Backlog, SockFlag, SockType, SockaddrStorage};
use ringkit_core::{kdebug, Failure};

/// Address family of a new socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketFamily {
    Inet,
    Inet6,
}

impl SocketFamily {
    pub fn of(addr: &SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(_) => SocketFamily::Inet,
            SocketAddr::V6(_) => SocketFamily::Inet6,
        }
    }

    fn raw(self) -> AddressFamily {
        match self {
            SocketFamily::Inet => AddressFamily::Inet,
            SocketFamily::Inet6 => AddressFamily::Inet6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream,
    Datagram,
    Raw,
    Rdm,
    SeqPacket,
}

impl SocketType {
    fn raw(self) -> SockType {
        match self {
            SocketType::Stream => SockType::Stream,
            SocketType::Datagram => SockType::Datagram,
            SocketType::Raw => SockType::Raw,
            SocketType::Rdm => SockType::Rdm,
            SocketType::SeqPacket => SockType::SeqPacket,
        }
    }
}

/// `SOCK_*` flags applied when the descriptor is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketFlags(i32);

impl SocketFlags {
    pub const NONE: SocketFlags = SocketFlags(0);
    pub const CLOEXEC: SocketFlags = SocketFlags(libc::SOCK_CLOEXEC);
    pub const NONBLOCK: SocketFlags = SocketFlags(libc::SOCK_NONBLOCK);

    pub const fn bits(&self) -> i32 {
        self.0
    }

    pub const fn contains(&self, other: SocketFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn raw(self) -> SockFlag {
        SockFlag::from_bits_truncate(self.0)
    }
}

impl core::ops::BitOr for SocketFlags {
    type Output = SocketFlags;

    fn bitor(self, rhs: SocketFlags) -> SocketFlags {
        SocketFlags(self.0 | rhs.0)
    }
}

/// Socket options switched on right after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SocketOptions(u32);

impl SocketOptions {
    pub const NONE: SocketOptions = SocketOptions(0);
    pub const KEEPALIVE: SocketOptions = SocketOptions(0x1);
    pub const REUSEADDR: SocketOptions = SocketOptions(0x2);
    pub const REUSEPORT: SocketOptions = SocketOptions(0x4);
    /// `SO_LINGER` with a zero linger time: close resets the connection.
    pub const LINGER: SocketOptions = SocketOptions(0x8);

    pub const fn reuse_all() -> SocketOptions {
        SocketOptions(Self::REUSEADDR.0 | Self::REUSEPORT.0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: SocketOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for SocketOptions {
    type Output = SocketOptions;

    fn bitor(self, rhs: SocketOptions) -> SocketOptions {
        SocketOptions(self.0 | rhs.0)
    }
}

/// A bound, listening socket ready for `accept`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConnector {
    pub fd: RawFd,
    /// The address actually bound, with the kernel-chosen port if the
    /// request asked for port 0.
    pub local: SocketAddr,
}

/// Everything `Proactor::server` needs, with the usual TCP defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub kind: SocketType,
    pub flags: SocketFlags,
    pub backlog: u32,
    pub options: SocketOptions,
}

impl ServerConfig {
    /// Stream socket, close-on-exec, address and port reuse, backlog 128.
    pub fn tcp(address: SocketAddr) -> Self {
        ServerConfig {
            address,
            kind: SocketType::Stream,
            flags: SocketFlags::CLOEXEC,
            backlog: 128,
            options: SocketOptions::reuse_all(),
        }
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    pub fn flags(mut self, flags: SocketFlags) -> Self {
        self.flags = flags;
        self
    }
}

fn apply_options(fd: &OwnedFd, options: SocketOptions) -> Result<(), Failure> {
    if options.contains(SocketOptions::KEEPALIVE) {
        sock::setsockopt(fd, sockopt::KeepAlive, &true)?;
    }
    if options.contains(SocketOptions::REUSEADDR) {
        sock::setsockopt(fd, sockopt::ReuseAddr, &true)?;
    }
    if options.contains(SocketOptions::REUSEPORT) {
        sock::setsockopt(fd, sockopt::ReusePort, &true)?;
    }
    if options.contains(SocketOptions::LINGER) {
        let linger = libc::linger { l_onoff: 1, l_linger: 0 };
        sock::setsockopt(fd, sockopt::Linger, &linger)?;
    }
    Ok(())
}

pub(crate) fn open_socket(
    family: SocketFamily,
    kind: SocketType,
    flags: SocketFlags,
    options: SocketOptions,
) -> Result<OwnedFd, Failure> {
    let fd = sock::socket(family.raw(), kind.raw(), flags.raw(), None)?;
    apply_options(&fd, options)?;
    Ok(fd)
}

fn local_addr(fd: RawFd) -> Result<SocketAddr, Failure> {
    let bound: SockaddrStorage = sock::getsockname(fd)?;
    if let Some(v4) = bound.as_sockaddr_in() {
        return Ok(SocketAddr::V4(SocketAddrV4::from(*v4)));
    }
    if let Some(v6) = bound.as_sockaddr_in6() {
        return Ok(SocketAddr::V6(SocketAddrV6::from(*v6)));
    }
    Err(Failure::InvalidArgument("bound address is not IPv4 or IPv6"))
}

pub(crate) fn open_server(config: &ServerConfig) -> Result<ServerConnector, Failure> {
    let fd = open_socket(
        SocketFamily::of(&config.address),
        config.kind,
        config.flags,
        config.options,
    )?;
    sock::bind(fd.as_raw_fd(), &SockaddrStorage::from(config.address))?;
    let backlog = if config.backlog >= libc::SOMAXCONN as u32 {
        Backlog::MAXCONN
    } else {
        Backlog::new(config.backlog as i32)?
    };
    sock::listen(&fd, backlog)?;
    let local = local_addr(fd.as_raw_fd())?;
    kdebug!("listening on {} (backlog {})", local, i32::from(backlog));
    Ok(ServerConnector { fd: fd.into_raw_fd(), local })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_and_flags_compose() {
        let opts = SocketOptions::KEEPALIVE | SocketOptions::LINGER;
        assert!(opts.contains(SocketOptions::LINGER));
        assert!(!opts.contains(SocketOptions::REUSEADDR));
        assert!(SocketOptions::reuse_all().contains(SocketOptions::REUSEPORT));
        assert_eq!(SocketOptions::NONE.bits(), 0);

        let flags = SocketFlags::CLOEXEC | SocketFlags::NONBLOCK;
        assert!(flags.contains(SocketFlags::NONBLOCK));
        assert_eq!(flags.bits(), libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK);
    }

    #[test]
    fn test_open_socket_applies_options() {
        let fd = open_socket(
            SocketFamily::Inet,
            SocketType::Stream,
            SocketFlags::CLOEXEC,
            SocketOptions::KEEPALIVE | SocketOptions::REUSEADDR | SocketOptions::LINGER,
        )
        .unwrap();
        assert!(sock::getsockopt(&fd, sockopt::KeepAlive).unwrap());
        assert!(sock::getsockopt(&fd, sockopt::ReuseAddr).unwrap());
        assert!(!sock::getsockopt(&fd, sockopt::ReusePort).unwrap());
        assert_eq!(sock::getsockopt(&fd, sockopt::Linger).unwrap().l_onoff, 1);
    }

    #[test]
    fn test_server_reports_chosen_port() {
        let config = ServerConfig::tcp("127.0.0.1:0".parse().unwrap()).backlog(16);
        let server = open_server(&config).unwrap();
        assert_ne!(server.local.port(), 0);
        assert_eq!(server.local.ip(), config.address.ip());

        // a second listener without port reuse cannot take the same port
        let clash = ServerConfig::tcp(server.local).options(SocketOptions::NONE);
        assert_eq!(open_server(&clash).unwrap_err(), Failure::native(libc::EADDRINUSE));
        unsafe { libc::close(server.fd) };
    }
}
