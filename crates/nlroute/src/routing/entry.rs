//! Cached route entries.

use std::fmt;
use std::net::IpAddr;

use crate::netlink::types::route::{rt_scope, rt_table};
use crate::util::addr::{IpFamily, IpPrefix};

/// Tag used to group routes installed on behalf of one owner so they can be
/// flushed together.
pub type RouteTag = u32;

/// One route on one interface.
///
/// Two entries describe the same kernel route when destination, source,
/// gateway and scope agree; the metric may differ between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTableEntry {
    pub dst: IpPrefix,
    pub src: IpPrefix,
    /// All zeros when the route has no gateway.
    pub gateway: IpAddr,
    pub metric: u32,
    /// RT_SCOPE_*.
    pub scope: u8,
    /// Mirrored from a kernel notification rather than installed by us.
    pub from_rtnl: bool,
    pub table: u8,
    pub tag: Option<RouteTag>,
}

impl RoutingTableEntry {
    /// An untagged entry in the main table.
    pub fn new(
        dst: IpPrefix,
        src: IpPrefix,
        gateway: IpAddr,
        metric: u32,
        scope: u8,
        from_rtnl: bool,
    ) -> Self {
        Self {
            dst,
            src,
            gateway,
            metric,
            scope,
            from_rtnl,
            table: rt_table::MAIN,
            tag: None,
        }
    }

    /// A default route (`0.0.0.0/0` or `::/0`) through `gateway`.
    pub fn default_route(gateway: IpAddr, metric: u32, table: u8) -> Self {
        let family = IpFamily::of(&gateway);
        Self::new(
            IpPrefix::default_for(family),
            IpPrefix::default_for(family),
            gateway,
            metric,
            rt_scope::UNIVERSE,
            false,
        )
        .with_table(table)
    }

    pub fn with_table(mut self, table: u8) -> Self {
        self.table = table;
        self
    }

    pub fn with_tag(mut self, tag: RouteTag) -> Self {
        self.tag = Some(tag);
        self
    }

    pub fn family(&self) -> IpFamily {
        self.dst.family()
    }

    pub fn has_gateway(&self) -> bool {
        !self.gateway.is_unspecified()
    }

    /// A prefix-0 destination through a real gateway.
    ///
    /// Gateway-less defaults (`default dev X`) don't count: they carry no
    /// next hop for `set_default_route` to compare or move.
    pub fn is_default_route(&self) -> bool {
        self.dst.prefix_len() == 0 && self.has_gateway()
    }

    /// Whether both entries name the same kernel route, ignoring metric,
    /// provenance, table and tag.
    pub fn same_route(&self, other: &Self) -> bool {
        self.dst == other.dst
            && self.src == other.src
            && self.gateway == other.gateway
            && self.scope == other.scope
    }
}

impl fmt::Display for RoutingTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dst)?;
        if !self.src.is_default() {
            write!(f, " from {}", self.src)?;
        }
        if self.has_gateway() {
            write!(f, " via {}", self.gateway)?;
        }
        write!(f, " metric {} scope {} table {}", self.metric, self.scope, self.table)?;
        if let Some(tag) = self.tag {
            write!(f, " tag {}", tag)?;
        }
        Ok(())
    }
}
