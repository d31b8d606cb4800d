//! Shared utilities for nlroute.

pub mod addr;
pub mod ifname;

pub use addr::{IpFamily, IpPrefix, parse_addr, parse_prefix, prefix_from_netmask};
