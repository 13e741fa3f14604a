//! `sockaddr_in` / `sockaddr_in6` views.
//!
//! Ports, IPv4 addresses and IPv6 flow info are network byte order; the
//! family and the IPv6 scope id are native order.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use super::{field, shape_view, RawField, Shape};
use crate::raw::{self, Address};

/// Bytes reserved for any socket address (`sizeof(struct sockaddr_storage)`).
pub const SOCKADDR_STORAGE_SIZE: usize = 128;

pub mod layout_in {
    use super::RawField;

    pub const SIZE: usize = 16;

    pub const FAMILY: RawField = RawField::new(0, 2);
    pub const PORT: RawField = RawField::new(2, 2);
    pub const ADDR: RawField = RawField::new(4, 4);
    pub const ZERO: RawField = RawField::new(8, 8);
}

pub mod layout_in6 {
    use super::RawField;

    pub const SIZE: usize = 28;

    pub const FAMILY: RawField = RawField::new(0, 2);
    pub const PORT: RawField = RawField::new(2, 2);
    pub const FLOWINFO: RawField = RawField::new(4, 4);
    pub const ADDR: RawField = RawField::new(8, 16);
    pub const SCOPE_ID: RawField = RawField::new(24, 4);
}

shape_view!(
    /// View over a `sockaddr_in`.
    SocketAddressIn,
    layout_in::SIZE
);

impl SocketAddressIn {
    field!(family, set_family, layout_in::FAMILY, u16, raw::get_u16, raw::put_u16);
    field!(port, set_port, layout_in::PORT, u16, raw::get_u16_be, raw::put_u16_be);

    pub fn ip(&self) -> Ipv4Addr {
        let mut octets = [0u8; 4];
        unsafe { raw::get_bytes(layout_in::ADDR.at(self.base), &mut octets) };
        Ipv4Addr::from(octets)
    }

    pub fn set_ip(&self, ip: Ipv4Addr) {
        unsafe { raw::put_bytes(layout_in::ADDR.at(self.base), &ip.octets()) };
    }

    pub fn store(&self, addr: &SocketAddrV4) {
        self.clear();
        self.set_family(libc::AF_INET as u16);
        self.set_port(addr.port());
        self.set_ip(*addr.ip());
    }

    pub fn load(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip(), self.port())
    }
}

shape_view!(
    /// View over a `sockaddr_in6`.
    SocketAddressIn6,
    layout_in6::SIZE
);

impl SocketAddressIn6 {
    field!(family, set_family, layout_in6::FAMILY, u16, raw::get_u16, raw::put_u16);
    field!(port, set_port, layout_in6::PORT, u16, raw::get_u16_be, raw::put_u16_be);
    field!(flowinfo, set_flowinfo, layout_in6::FLOWINFO, u32, raw::get_u32_be, raw::put_u32_be);
    field!(scope_id, set_scope_id, layout_in6::SCOPE_ID, u32, raw::get_u32, raw::put_u32);

    pub fn ip(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        unsafe { raw::get_bytes(layout_in6::ADDR.at(self.base), &mut octets) };
        Ipv6Addr::from(octets)
    }

    pub fn set_ip(&self, ip: Ipv6Addr) {
        unsafe { raw::put_bytes(layout_in6::ADDR.at(self.base), &ip.octets()) };
    }

    pub fn store(&self, addr: &SocketAddrV6) {
        self.clear();
        self.set_family(libc::AF_INET6 as u16);
        self.set_port(addr.port());
        self.set_flowinfo(addr.flowinfo());
        self.set_ip(*addr.ip());
        self.set_scope_id(addr.scope_id());
    }

    pub fn load(&self) -> SocketAddrV6 {
        SocketAddrV6::new(self.ip(), self.port(), self.flowinfo(), self.scope_id())
    }
}

/// Write `addr` at `address` and return the encoded length.
///
/// # Safety
///
/// `address` must point at [`SOCKADDR_STORAGE_SIZE`] writable bytes.
pub unsafe fn encode(address: Address, addr: &SocketAddr) -> u32 {
    match addr {
        SocketAddr::V4(v4) => {
            SocketAddressIn::at(address).store(v4);
            layout_in::SIZE as u32
        }
        SocketAddr::V6(v6) => {
            SocketAddressIn6::at(address).store(v6);
            layout_in6::SIZE as u32
        }
    }
}

/// Read the address at `address`, dispatching on the family field.
/// Families other than `AF_INET`/`AF_INET6` yield `None`.
///
/// # Safety
///
/// `address` must point at [`SOCKADDR_STORAGE_SIZE`] readable bytes.
pub unsafe fn decode(address: Address) -> Option<SocketAddr> {
    let family = raw::get_u16(address) as i32;
    if family == libc::AF_INET {
        Some(SocketAddr::V4(SocketAddressIn::at(address).load()))
    } else if family == libc::AF_INET6 {
        Some(SocketAddr::V6(SocketAddressIn6::at(address).load()))
    } else {
        None
    }
}
