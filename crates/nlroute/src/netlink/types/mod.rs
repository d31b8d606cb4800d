//! Fixed-size rtnetlink message headers.
//!
//! Each family carries one C struct right after the netlink header. The
//! structs here mirror the kernel layouts byte for byte so they can be read
//! and written with zerocopy.

pub mod addr;
pub mod link;
pub mod neigh;
pub mod route;

pub use addr::IfAddrMsg;
pub use link::IfInfoMsg;
pub use neigh::{NdMsg, NdUserOptMsg};
pub use route::RtMsg;

/// Request-only header for dump requests (struct rtgenmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, zerocopy::IntoBytes, zerocopy::Immutable)]
pub struct RtGenMsg {
    /// Address family to dump, or AF_UNSPEC for all.
    pub rtgen_family: u8,
}

/// Address families used on the wire.
pub mod family {
    pub const AF_UNSPEC: u8 = libc::AF_UNSPEC as u8;
    pub const AF_INET: u8 = libc::AF_INET as u8;
    pub const AF_INET6: u8 = libc::AF_INET6 as u8;
    pub const AF_BRIDGE: u8 = libc::AF_BRIDGE as u8;
}
