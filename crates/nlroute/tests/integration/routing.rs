//! Routing table integration tests.
//!
//! These run in a private network namespace: `lo` is brought up and used
//! as the output interface for TEST-NET-1 routes.

use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;

use nlroute::netlink::rtnetlink_groups::{self as groups, mask};
use nlroute::netlink::types::link::IFF_UP;
use nlroute::netlink::RtnlHandler;
use nlroute::netlink::types::route::{rt_scope, rt_table};
use nlroute::routing::{QueryCallback, RoutingTable, RoutingTableEntry};
use nlroute::util::addr::{IpFamily, IpPrefix};

use crate::common::{drive_until, in_new_netns, start_handler};

const LOOPBACK_INDEX: u32 = 1;
const TAG: u32 = 7;

/// Start a handler on route events and bring up `lo`.
async fn setup() -> Option<Rc<RtnlHandler>> {
    let handler = start_handler(mask(&[
        groups::RTNLGRP_LINK,
        groups::RTNLGRP_IPV4_ROUTE,
        groups::RTNLGRP_IPV6_ROUTE,
    ]))?;
    assert!(handler.set_interface_flags(LOOPBACK_INDEX, IFF_UP, IFF_UP));
    Some(handler)
}

fn link_route(dst: &str) -> RoutingTableEntry {
    RoutingTableEntry::new(
        dst.parse().unwrap(),
        IpPrefix::default_for(IpFamily::V4),
        IpFamily::V4.unspecified(),
        0,
        rt_scope::LINK,
        false,
    )
}

#[test]
fn test_installed_route_is_confirmed_by_kernel() {
    require_root!();

    in_new_netns(|| async {
        let Some(handler) = setup().await else {
            return;
        };
        let table = Rc::new(RoutingTable::new(handler.clone()));
        table.start();

        let entry = link_route("192.0.2.0/24");
        assert!(table.add_route(LOOPBACK_INDEX, &entry));
        assert!(!table.routes(LOOPBACK_INDEX)[0].from_rtnl);

        // The kernel's notification for our own route marks it as reported.
        let confirmed = drive_until(&handler, || {
            table
                .routes(LOOPBACK_INDEX)
                .iter()
                .any(|e| e.dst == entry.dst && e.from_rtnl)
        })
        .await;
        assert!(confirmed, "route not echoed: {:?}", table.routes(LOOPBACK_INDEX));
        assert_eq!(
            table
                .routes(LOOPBACK_INDEX)
                .iter()
                .filter(|e| e.dst == entry.dst)
                .count(),
            1
        );

        table.flush_routes(LOOPBACK_INDEX);
        assert!(table.routes(LOOPBACK_INDEX).is_empty());

        table.stop();
        handler.stop();
    });
}

#[test]
fn test_route_to_host_query() {
    require_root!();

    in_new_netns(|| async {
        let Some(handler) = setup().await else {
            return;
        };
        let table = Rc::new(RoutingTable::new(handler.clone()));
        table.start();

        assert!(table.add_route(LOOPBACK_INDEX, &link_route("192.0.2.0/24")));

        let answer = Rc::new(RefCell::new(None));
        let slot = answer.clone();
        let callback: QueryCallback = Box::new(move |index, entry| {
            *slot.borrow_mut() = Some((index, entry.clone()));
        });

        let host: IpAddr = "192.0.2.7".parse().unwrap();
        assert!(table.request_route_to_host(
            &IpPrefix::host(host),
            None,
            TAG,
            Some(callback),
            rt_table::MAIN,
        ));
        assert_eq!(table.pending_queries(), 1);

        let resolved = drive_until(&handler, || answer.borrow().is_some()).await;
        assert!(resolved, "no answer to route query");

        let (index, entry) = answer.borrow_mut().take().unwrap();
        assert_eq!(index, LOOPBACK_INDEX);
        assert_eq!(entry.dst, IpPrefix::host(host));
        assert_eq!(entry.tag, Some(TAG));
        assert!(!entry.has_gateway());
        assert_eq!(table.pending_queries(), 0);

        table.flush_routes(LOOPBACK_INDEX);
        table.stop();
        handler.stop();
    });
}
