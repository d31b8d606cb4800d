//! Routing table mirror.
//!
//! [`RoutingTable`] follows route events from an [`Rtnl`](crate::netlink::Rtnl)
//! and keeps an ordered list of [`RoutingTableEntry`] per interface. It also
//! programs routes: default routes with hitless metric changes, static
//! routes from a configuration, blackhole and link routes, and host routes
//! resolved by asking the kernel.

pub mod entry;
pub mod table;

pub use entry::{RouteTag, RoutingTableEntry};
pub use table::{
    IPV4_ROUTE_FLUSH_PATH, IPV6_ROUTE_FLUSH_PATH, PendingQuery, QueryCallback, RouteSpec,
    RoutingTable, RoutingTableConfig,
};
