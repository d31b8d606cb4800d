//! Per-interface route mirror and route programming.
//!
//! [`RoutingTable`] keeps, for every interface index, the routes it has
//! installed plus the `boot`-protocol routes the kernel reports. It builds
//! route requests itself and hands them to an [`Rtnl`] implementation, and
//! it resolves host-route queries against the kernel's `unspec` replies.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use super::entry::{RouteTag, RoutingTableEntry};
use crate::netlink::handler::{Rtnl, request_flags};
use crate::netlink::listener::RtnlListener;
use crate::netlink::message::{NLM_F_CREATE, NLM_F_EXCL, NLM_F_REPLACE, NLM_F_REQUEST};
use crate::netlink::rtnl_message::{MessageType, Mode, RouteStatus, RtnlMessage, Status};
use crate::netlink::types::route::{
    RTA_DST, RTA_GATEWAY, RTA_OIF, RTA_PRIORITY, RTA_SRC, rt_proto, rt_scope, rtn,
};
use crate::util::addr::{
    AddrError, IpFamily, IpPrefix, ip_from_bytes, ip_octets, parse_addr, prefix_from_netmask,
};

/// Kernel control file that flushes the IPv4 route cache.
pub const IPV4_ROUTE_FLUSH_PATH: &str = "/proc/sys/net/ipv4/route/flush";
/// Kernel control file that flushes the IPv6 route cache.
pub const IPV6_ROUTE_FLUSH_PATH: &str = "/proc/sys/net/ipv6/route/flush";

/// Routing table configuration.
#[derive(Debug, Clone)]
pub struct RoutingTableConfig {
    ipv4_flush_path: PathBuf,
    ipv6_flush_path: PathBuf,
}

impl RoutingTableConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ipv4_flush_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ipv4_flush_path = path.into();
        self
    }

    pub fn with_ipv6_flush_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ipv6_flush_path = path.into();
        self
    }

    pub fn ipv4_flush_path(&self) -> &Path {
        &self.ipv4_flush_path
    }

    pub fn ipv6_flush_path(&self) -> &Path {
        &self.ipv6_flush_path
    }
}

impl Default for RoutingTableConfig {
    fn default() -> Self {
        Self {
            ipv4_flush_path: PathBuf::from(IPV4_ROUTE_FLUSH_PATH),
            ipv6_flush_path: PathBuf::from(IPV6_ROUTE_FLUSH_PATH),
        }
    }
}

/// Invoked with the interface index and the resolved route once the kernel
/// answers a host-route query.
///
/// Capture owners weakly: the table may call this long after the request.
pub type QueryCallback = Box<dyn FnOnce(u32, &RoutingTableEntry)>;

/// A host-route query waiting for the kernel's reply.
pub struct PendingQuery {
    pub sequence: u32,
    pub tag: RouteTag,
    pub table_id: u8,
    callback: Option<QueryCallback>,
}

impl fmt::Debug for PendingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingQuery")
            .field("sequence", &self.sequence)
            .field("tag", &self.tag)
            .field("table_id", &self.table_id)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// One static route in textual form, as handed out by a DHCP lease or a
/// VPN configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RouteSpec {
    pub host: String,
    pub netmask: String,
    pub gateway: String,
}

impl RouteSpec {
    pub fn new(
        host: impl Into<String>,
        netmask: impl Into<String>,
        gateway: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            netmask: netmask.into(),
            gateway: gateway.into(),
        }
    }

    /// Destination prefix and gateway. All three addresses must share a
    /// family and the netmask must be contiguous.
    fn resolve(&self) -> Result<(IpPrefix, IpAddr), AddrError> {
        let host = parse_addr(&self.host)?;
        let gateway = parse_addr(&self.gateway)?;
        let netmask = parse_addr(&self.netmask)?;

        let family = IpFamily::of(&host);
        if IpFamily::of(&gateway) != family {
            return Err(AddrError::InvalidAddress(format!(
                "gateway {} does not match host {}",
                gateway, host
            )));
        }
        if IpFamily::of(&netmask) != family {
            return Err(AddrError::InvalidNetmask(self.netmask.clone()));
        }

        let prefix_len = prefix_from_netmask(&netmask)?;
        Ok((IpPrefix::new(host, prefix_len)?, gateway))
    }
}

/// A route message reduced to what the cache tracks.
struct RouteUpdate {
    interface_index: u32,
    protocol: u8,
    entry: RoutingTableEntry,
}

/// Route cache and route programming on top of an [`Rtnl`].
pub struct RoutingTable {
    rtnl: Rc<dyn Rtnl>,
    config: RoutingTableConfig,
    tables: RefCell<HashMap<u32, Vec<RoutingTableEntry>>>,
    queries: RefCell<VecDeque<PendingQuery>>,
    listener: RefCell<Option<RtnlListener>>,
}

impl RoutingTable {
    pub fn new(rtnl: Rc<dyn Rtnl>) -> Self {
        Self::with_config(rtnl, RoutingTableConfig::default())
    }

    pub fn with_config(rtnl: Rc<dyn Rtnl>, config: RoutingTableConfig) -> Self {
        Self {
            rtnl,
            config,
            tables: RefCell::new(HashMap::new()),
            queries: RefCell::new(VecDeque::new()),
            listener: RefCell::new(None),
        }
    }

    /// Subscribe to route events and request a route dump to fill the
    /// cache. Calling this again replaces the subscription.
    pub fn start(self: &Rc<Self>) {
        let table = Rc::downgrade(self);
        let listener = RtnlListener::new(self.rtnl.clone(), request_flags::ROUTE, move |msg| {
            if let Some(table) = table.upgrade() {
                table.handle_route_message(msg);
            }
        });
        *self.listener.borrow_mut() = Some(listener);
        self.rtnl.request_dump(request_flags::ROUTE);
        debug!("routing table started");
    }

    /// Stop following route events. The cache is left as it is.
    pub fn stop(&self) {
        self.listener.borrow_mut().take();
        debug!("routing table stopped");
    }

    /// The cached routes of one interface, in discovery order.
    pub fn routes(&self, interface_index: u32) -> Vec<RoutingTableEntry> {
        self.tables
            .borrow()
            .get(&interface_index)
            .cloned()
            .unwrap_or_default()
    }

    /// Every interface's routes, ordered by interface index.
    pub fn snapshot(&self) -> Vec<(u32, Vec<RoutingTableEntry>)> {
        let mut all: Vec<_> = self
            .tables
            .borrow()
            .iter()
            .map(|(index, entries)| (*index, entries.clone()))
            .collect();
        all.sort_by_key(|(index, _)| *index);
        all
    }

    /// Number of host-route queries still waiting for a reply.
    pub fn pending_queries(&self) -> usize {
        self.queries.borrow().len()
    }

    /// Install a route we own and record it in the cache.
    ///
    /// The cache is updated as soon as the request is sent, without
    /// waiting for the kernel to acknowledge it.
    pub fn add_route(&self, interface_index: u32, entry: &RoutingTableEntry) -> bool {
        if entry.from_rtnl {
            error!(
                "refusing to install kernel-reported route {} on interface {}",
                entry, interface_index
            );
            return false;
        }
        if !self.apply_route(interface_index, entry, Mode::Add, NLM_F_CREATE | NLM_F_EXCL) {
            return false;
        }

        debug!(interface_index, "added route {}", entry);
        self.tables
            .borrow_mut()
            .entry(interface_index)
            .or_default()
            .push(entry.clone());
        true
    }

    /// The first default route of `family` cached for an interface.
    ///
    /// Only routes with a gateway qualify (see
    /// [`RoutingTableEntry::is_default_route`]); a cached `default dev X`
    /// is never returned and never replaced by `set_default_route`.
    pub fn get_default_route(
        &self,
        interface_index: u32,
        family: IpFamily,
    ) -> Option<RoutingTableEntry> {
        self.tables
            .borrow()
            .get(&interface_index)?
            .iter()
            .find(|entry| IpFamily::of(&entry.gateway) == family && entry.is_default_route())
            .cloned()
    }

    /// Point the interface's default route for the gateway's family at
    /// `gateway`.
    pub fn set_default_route(
        &self,
        interface_index: u32,
        gateway: IpAddr,
        metric: u32,
        table_id: u8,
    ) -> bool {
        if let Some(current) = self.get_default_route(interface_index, IpFamily::of(&gateway)) {
            if current.gateway == gateway {
                if current.metric != metric {
                    self.replace_metric(interface_index, &current, metric);
                }
                return true;
            }
            // The old entry stays cached until the kernel reports its
            // removal.
            self.apply_route(interface_index, &current, Mode::Delete, 0);
        }

        self.add_route(
            interface_index,
            &RoutingTableEntry::default_route(gateway, metric, table_id),
        )
    }

    /// Move both default routes of an interface to `metric`.
    pub fn set_default_metric(&self, interface_index: u32, metric: u32) {
        for family in [IpFamily::V4, IpFamily::V6] {
            if let Some(entry) = self.get_default_route(interface_index, family)
                && entry.metric != metric
            {
                self.replace_metric(interface_index, &entry, metric);
            }
        }
    }

    /// Change a cached route's metric without a gap in connectivity: the
    /// route at the new metric is added before the old one is deleted.
    fn replace_metric(&self, interface_index: u32, entry: &RoutingTableEntry, metric: u32) {
        let mut replacement = entry.clone();
        replacement.metric = metric;

        self.apply_route(
            interface_index,
            &replacement,
            Mode::Add,
            NLM_F_CREATE | NLM_F_REPLACE,
        );
        self.apply_route(interface_index, entry, Mode::Delete, 0);

        let mut tables = self.tables.borrow_mut();
        if let Some(cached) = tables
            .get_mut(&interface_index)
            .and_then(|entries| entries.iter_mut().find(|e| **e == *entry))
        {
            cached.metric = metric;
        }
        debug!(interface_index, old = entry.metric, metric, "replaced route metric");
    }

    /// Install a list of static routes.
    ///
    /// Each route is tried independently. Returns false if any of them
    /// could not be parsed or sent.
    pub fn configure_routes(
        &self,
        interface_index: u32,
        routes: &[RouteSpec],
        metric: u32,
        table_id: u8,
    ) -> bool {
        let mut ok = true;

        for route in routes {
            let (dst, gateway) = match route.resolve() {
                Ok(resolved) => resolved,
                Err(e) => {
                    error!(
                        "skipping route {} {} via {}: {}",
                        route.host, route.netmask, route.gateway, e
                    );
                    ok = false;
                    continue;
                }
            };

            let entry = RoutingTableEntry::new(
                dst,
                IpPrefix::default_for(dst.family()),
                gateway,
                metric,
                rt_scope::UNIVERSE,
                false,
            )
            .with_table(table_id);
            if !self.add_route(interface_index, &entry) {
                ok = false;
            }
        }
        ok
    }

    /// Delete every cached route of an interface from the kernel and empty
    /// its cache.
    pub fn flush_routes(&self, interface_index: u32) {
        let entries = match self.tables.borrow_mut().get_mut(&interface_index) {
            Some(entries) => std::mem::take(entries),
            None => return,
        };

        for entry in &entries {
            self.apply_route(interface_index, entry, Mode::Delete, 0);
        }
        debug!(interface_index, count = entries.len(), "flushed routes");
    }

    /// Delete the routes carrying `tag`, on every interface.
    pub fn flush_routes_with_tag(&self, tag: RouteTag) {
        let mut removed = Vec::new();
        for (index, entries) in self.tables.borrow_mut().iter_mut() {
            entries.retain(|entry| {
                if entry.tag == Some(tag) {
                    removed.push((*index, entry.clone()));
                    false
                } else {
                    true
                }
            });
        }

        for (index, entry) in &removed {
            self.apply_route(*index, entry, Mode::Delete, 0);
        }
        debug!(tag, count = removed.len(), "flushed tagged routes");
    }

    /// Forget an interface's routes without touching the kernel, for
    /// interfaces that are already gone.
    pub fn reset_table(&self, interface_index: u32) {
        self.tables.borrow_mut().remove(&interface_index);
        trace!(interface_index, "routing table reset");
    }

    /// Ask the kernel which route it would use to reach `destination`.
    ///
    /// The answer is matched by sequence number. A reply with a gateway is
    /// installed as a route tagged with `tag` in `table_id`; `callback`
    /// runs once with the resolved entry.
    pub fn request_route_to_host(
        &self,
        destination: &IpPrefix,
        interface_index: Option<u32>,
        tag: RouteTag,
        callback: Option<QueryCallback>,
        table_id: u8,
    ) -> bool {
        // Make sure the reply is not served from a stale cached route.
        self.flush_cache();

        let mut msg = RtnlMessage::new(
            MessageType::Route,
            Mode::Query,
            NLM_F_REQUEST,
            0,
            0,
            0,
            destination.family().af(),
        );
        msg.status = Status::Route(RouteStatus::new(
            destination.prefix_len(),
            0,
            0,
            0,
            0,
            0,
            0,
        ));
        msg.set_attribute(RTA_DST, destination.octets());
        if let Some(index) = interface_index {
            msg.set_attribute(RTA_OIF, index.to_ne_bytes().to_vec());
        }

        if !self.rtnl.send_message(&mut msg) {
            return false;
        }

        debug!(seq = msg.seq, tag, "route to {} requested", destination);
        self.queries.borrow_mut().push_back(PendingQuery {
            sequence: msg.seq,
            tag,
            table_id,
            callback,
        });
        true
    }

    /// Add a route that drops all traffic of `family`.
    pub fn create_blackhole_route(
        &self,
        interface_index: u32,
        family: IpFamily,
        metric: u32,
        table_id: u8,
    ) -> bool {
        let mut msg = RtnlMessage::new(
            MessageType::Route,
            Mode::Add,
            NLM_F_REQUEST | NLM_F_CREATE | NLM_F_EXCL,
            0,
            0,
            0,
            family.af(),
        );
        msg.status = Status::Route(RouteStatus::new(
            0,
            0,
            table_id,
            rt_proto::BOOT,
            rt_scope::UNIVERSE,
            rtn::BLACKHOLE,
            0,
        ));
        msg.set_attribute(RTA_PRIORITY, metric.to_ne_bytes().to_vec());
        msg.set_attribute(RTA_OIF, interface_index.to_ne_bytes().to_vec());
        self.rtnl.send_message(&mut msg)
    }

    /// Add a link-scope host route to `remote` from `local`, for a gateway
    /// that is on-link even though the local netmask does not say so.
    ///
    /// `remote` must lie inside `local`'s network.
    pub fn create_link_route(
        &self,
        interface_index: u32,
        local: &IpPrefix,
        remote: IpAddr,
        table_id: u8,
    ) -> bool {
        if !local.can_reach(&remote) {
            error!("{} is not reachable from {}", remote, local);
            return false;
        }

        let entry = RoutingTableEntry::new(
            IpPrefix::host(remote),
            *local,
            local.family().unspecified(),
            0,
            rt_scope::LINK,
            false,
        )
        .with_table(table_id);
        self.add_route(interface_index, &entry)
    }

    /// Flush the kernel's IPv4 and IPv6 route caches.
    pub fn flush_cache(&self) -> bool {
        let mut ok = true;
        for path in [self.config.ipv4_flush_path(), self.config.ipv6_flush_path()] {
            if let Err(e) = fs::write(path, b"-1") {
                error!("cannot flush route cache through {}: {}", path.display(), e);
                ok = false;
            }
        }
        ok
    }

    /// Fold one route event into the cache or answer a pending query.
    pub fn handle_route_message(&self, msg: &RtnlMessage) {
        let Some(update) = parse_route_message(msg) else {
            trace!(seq = msg.seq, "ignoring route message");
            return;
        };

        match update.protocol {
            rt_proto::UNSPEC => self.resolve_query(msg.seq, update),
            rt_proto::BOOT => self.update_cache(msg.mode, update),
            _ => {}
        }
    }

    fn resolve_query(&self, seq: u32, update: RouteUpdate) {
        let query = {
            let mut queries = self.queries.borrow_mut();
            // Queries the kernel has already moved past will never be
            // answered.
            while let Some(front) = queries.front()
                && front.sequence.wrapping_sub(seq) > u32::MAX / 2
            {
                warn!(seq = front.sequence, tag = front.tag, "dropping unanswered route query");
                queries.pop_front();
            }
            match queries.front() {
                Some(front) if front.sequence == seq => queries.pop_front(),
                _ => None,
            }
        };
        let Some(query) = query else {
            return;
        };

        let mut entry = update.entry;
        entry.from_rtnl = false;
        entry.tag = Some(query.tag);
        entry.table = query.table_id;

        if entry.has_gateway() && !self.add_route(update.interface_index, &entry) {
            error!(seq, "could not install route {} for query", entry);
            return;
        }

        if let Some(callback) = query.callback {
            callback(update.interface_index, &entry);
        }
    }

    fn update_cache(&self, mode: Mode, update: RouteUpdate) {
        let mut tables = self.tables.borrow_mut();
        let entries = tables.entry(update.interface_index).or_default();

        if let Some(pos) = entries.iter().position(|e| e.same_route(&update.entry)) {
            match mode {
                Mode::Delete if entries[pos].metric == update.entry.metric => {
                    let removed = entries.remove(pos);
                    debug!(interface_index = update.interface_index, "route {} removed", removed);
                }
                Mode::Add => {
                    let cached = &mut entries[pos];
                    cached.from_rtnl = true;
                    cached.metric = update.entry.metric;
                }
                _ => {}
            }
            return;
        }

        if mode == Mode::Add {
            debug!(interface_index = update.interface_index, "route {} learned", update.entry);
            entries.push(update.entry);
        }
    }

    fn apply_route(
        &self,
        interface_index: u32,
        entry: &RoutingTableEntry,
        mode: Mode,
        flags: u16,
    ) -> bool {
        trace!(interface_index, "{:?} route {}", mode, entry);

        let mut msg = RtnlMessage::new(
            MessageType::Route,
            mode,
            NLM_F_REQUEST | flags,
            0,
            0,
            0,
            entry.family().af(),
        );
        msg.status = Status::Route(RouteStatus::new(
            entry.dst.prefix_len(),
            entry.src.prefix_len(),
            entry.table,
            rt_proto::BOOT,
            entry.scope,
            rtn::UNICAST,
            0,
        ));
        msg.set_attribute(RTA_DST, entry.dst.octets());
        if !entry.src.is_default() {
            msg.set_attribute(RTA_SRC, entry.src.octets());
        }
        if entry.has_gateway() {
            msg.set_attribute(RTA_GATEWAY, ip_octets(&entry.gateway));
        }
        msg.set_attribute(RTA_PRIORITY, entry.metric.to_ne_bytes().to_vec());
        msg.set_attribute(RTA_OIF, interface_index.to_ne_bytes().to_vec());

        self.rtnl.send_message(&mut msg)
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTable")
            .field("config", &self.config)
            .field("tables", &self.tables.borrow())
            .field("queries", &self.queries.borrow())
            .finish()
    }
}

/// Only unicast routes with an output interface and a known family are
/// tracked. Missing addresses are the family's all-zeros address and a
/// missing priority is metric 0.
fn parse_route_message(msg: &RtnlMessage) -> Option<RouteUpdate> {
    if msg.message_type() != MessageType::Route {
        return None;
    }
    let family = IpFamily::from_af(msg.family)?;
    let status = msg.route_status()?;
    if status.route_type != rtn::UNICAST {
        return None;
    }
    let interface_index = msg.attribute_u32(RTA_OIF)?;

    let dst = prefix_attribute(msg, RTA_DST, family, status.dst_prefix)?;
    let src = prefix_attribute(msg, RTA_SRC, family, status.src_prefix)?;
    let gateway = match msg.attribute(RTA_GATEWAY) {
        Some(bytes) => ip_from_bytes(family.af(), bytes)?,
        None => family.unspecified(),
    };
    let metric = msg.attribute_u32(RTA_PRIORITY).unwrap_or(0);

    Some(RouteUpdate {
        interface_index,
        protocol: status.protocol,
        entry: RoutingTableEntry::new(dst, src, gateway, metric, status.scope, true)
            .with_table(status.table),
    })
}

fn prefix_attribute(
    msg: &RtnlMessage,
    attr_type: u16,
    family: IpFamily,
    prefix_len: u8,
) -> Option<IpPrefix> {
    let address = match msg.attribute(attr_type) {
        Some(bytes) => ip_from_bytes(family.af(), bytes)?,
        None => family.unspecified(),
    };
    IpPrefix::new(address, prefix_len).ok()
}
