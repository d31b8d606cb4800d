//! Address parsing and prefix utilities.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Error type for address parsing.
#[derive(Debug, thiserror::Error)]
pub enum AddrError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid prefix length: {0}")]
    InvalidPrefix(String),

    #[error("invalid netmask: {0}")]
    InvalidNetmask(String),
}

pub type Result<T> = std::result::Result<T, AddrError>;

/// IP address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// The AF_* constant carried on the wire.
    pub fn af(self) -> u8 {
        match self {
            Self::V4 => libc::AF_INET as u8,
            Self::V6 => libc::AF_INET6 as u8,
        }
    }

    /// Map an AF_* constant back to a family.
    pub fn from_af(af: u8) -> Option<Self> {
        match af as i32 {
            libc::AF_INET => Some(Self::V4),
            libc::AF_INET6 => Some(Self::V6),
            _ => None,
        }
    }

    /// Family of an address.
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// Longest prefix for this family.
    pub fn max_prefix_len(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }

    /// The all-zeros address of this family.
    pub fn unspecified(self) -> IpAddr {
        match self {
            Self::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

/// An IP address with a prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpPrefix {
    address: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Create a prefix, rejecting lengths longer than the family allows.
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self> {
        let max = IpFamily::of(&address).max_prefix_len();
        if prefix_len > max {
            return Err(AddrError::InvalidPrefix(format!(
                "{} exceeds maximum {} for address family",
                prefix_len, max
            )));
        }
        Ok(Self {
            address,
            prefix_len,
        })
    }

    /// A host prefix (/32 or /128) for an address.
    pub fn host(address: IpAddr) -> Self {
        Self {
            address,
            prefix_len: IpFamily::of(&address).max_prefix_len(),
        }
    }

    /// The default prefix (`0.0.0.0/0` or `::/0`) of a family.
    pub fn default_for(family: IpFamily) -> Self {
        Self {
            address: family.unspecified(),
            prefix_len: 0,
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.address)
    }

    /// True when the address is all zeros, whatever the prefix length.
    pub fn is_default(&self) -> bool {
        self.address.is_unspecified()
    }

    /// Address bytes in network order.
    pub fn octets(&self) -> Vec<u8> {
        ip_octets(&self.address)
    }

    /// True when `other` is in the same family and lies inside the network
    /// of this prefix, so it can be reached on-link.
    pub fn can_reach(&self, other: &IpAddr) -> bool {
        match (self.address, other) {
            (IpAddr::V4(a), IpAddr::V4(b)) => ipv4_in_prefix(*b, a, self.prefix_len),
            (IpAddr::V6(a), IpAddr::V6(b)) => ipv6_in_prefix(*b, a, self.prefix_len),
            _ => false,
        }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self> {
        let (address, prefix_len) = parse_prefix(s)?;
        Self::new(address, prefix_len)
    }
}

/// Parse an IP address from string.
pub fn parse_addr(s: &str) -> Result<IpAddr> {
    s.parse()
        .map_err(|_| AddrError::InvalidAddress(s.to_string()))
}

/// Parse an IP address with prefix length (CIDR notation).
/// Returns (address, prefix_length); a bare address gets the host prefix.
pub fn parse_prefix(s: &str) -> Result<(IpAddr, u8)> {
    if let Some((addr_str, prefix_str)) = s.split_once('/') {
        let addr = parse_addr(addr_str)?;
        let prefix: u8 = prefix_str
            .parse()
            .map_err(|_| AddrError::InvalidPrefix(prefix_str.to_string()))?;

        let max_prefix = IpFamily::of(&addr).max_prefix_len();
        if prefix > max_prefix {
            return Err(AddrError::InvalidPrefix(format!(
                "{} exceeds maximum {} for address family",
                prefix, max_prefix
            )));
        }

        Ok((addr, prefix))
    } else {
        let addr = parse_addr(s)?;
        Ok((addr, IpFamily::of(&addr).max_prefix_len()))
    }
}

/// Convert a contiguous netmask (`255.255.255.0`) to a prefix length.
pub fn prefix_from_netmask(mask: &IpAddr) -> Result<u8> {
    let (ones, zeros) = match mask {
        IpAddr::V4(v4) => {
            let bits = u32::from(*v4);
            (bits.leading_ones(), bits.trailing_zeros())
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(*v6);
            (bits.leading_ones(), bits.trailing_zeros())
        }
    };
    let width = IpFamily::of(mask).max_prefix_len() as u32;
    if ones + zeros != width {
        return Err(AddrError::InvalidNetmask(mask.to_string()));
    }
    Ok(ones as u8)
}

/// Build an address from raw network-order bytes of the given AF_* family.
pub fn ip_from_bytes(af: u8, bytes: &[u8]) -> Option<IpAddr> {
    match IpFamily::from_af(af)? {
        IpFamily::V4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        IpFamily::V6 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
    }
}

/// Network-order bytes of an address.
pub fn ip_octets(addr: &IpAddr) -> Vec<u8> {
    match addr {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Check if an IPv4 address is in a given prefix.
pub fn ipv4_in_prefix(addr: Ipv4Addr, prefix_addr: Ipv4Addr, prefix_len: u8) -> bool {
    if prefix_len == 0 {
        return true;
    }
    if prefix_len > 32 {
        return false;
    }

    let mask = !0u32 << (32 - prefix_len);
    let addr_bits = u32::from(addr);
    let prefix_bits = u32::from(prefix_addr);

    (addr_bits & mask) == (prefix_bits & mask)
}

/// Check if an IPv6 address is in a given prefix.
pub fn ipv6_in_prefix(addr: Ipv6Addr, prefix_addr: Ipv6Addr, prefix_len: u8) -> bool {
    if prefix_len == 0 {
        return true;
    }
    if prefix_len > 128 {
        return false;
    }

    let addr_bits = u128::from(addr);
    let prefix_bits = u128::from(prefix_addr);
    let mask = !0u128 << (128 - prefix_len);

    (addr_bits & mask) == (prefix_bits & mask)
}
