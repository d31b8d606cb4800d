//! Neighbor and neighbor-discovery user option message types.

use crate::netlink::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Neighbor message (struct ndmsg).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NdMsg {
    /// Address family.
    pub ndm_family: u8,
    /// Padding.
    pub ndm_pad1: u8,
    /// Padding.
    pub ndm_pad2: u16,
    /// Interface index.
    pub ndm_ifindex: i32,
    /// Neighbor state (NUD_*).
    pub ndm_state: u16,
    /// Neighbor flags (NTF_*).
    pub ndm_flags: u8,
    /// Neighbor type.
    pub ndm_type: u8,
}

impl NdMsg {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: Self::SIZE,
                actual: data.len(),
            })
    }
}

/// Neighbor-discovery user option message (struct nduseroptmsg).
///
/// Followed by `nduseropt_opts_len` bytes of raw ND options.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NdUserOptMsg {
    /// Address family (always AF_INET6 in practice).
    pub nduseropt_family: u8,
    /// Padding.
    pub nduseropt_pad1: u8,
    /// Total length of the options that follow.
    pub nduseropt_opts_len: u16,
    /// Interface index the option arrived on.
    pub nduseropt_ifindex: i32,
    /// ICMPv6 type of the carrying message.
    pub nduseropt_icmp_type: u8,
    /// ICMPv6 code of the carrying message.
    pub nduseropt_icmp_code: u8,
    /// Padding.
    pub nduseropt_pad2: u16,
    /// Padding.
    pub nduseropt_pad3: u32,
}

impl NdUserOptMsg {
    /// Size of this structure.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: Self::SIZE,
                actual: data.len(),
            })
    }
}

/// ND option: recursive DNS server (RFC 8106).
pub const ND_OPT_RDNSS: u8 = 25;
/// ND option: DNS search list (RFC 8106).
pub const ND_OPT_DNSSL: u8 = 31;

/// Size of the ND option header (type, length, reserved, lifetime).
pub const ND_OPT_HDRLEN: usize = 8;
