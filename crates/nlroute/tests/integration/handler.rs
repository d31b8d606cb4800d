//! Handler integration tests.
//!
//! Tests for socket setup, dumps and link requests.

use std::cell::RefCell;
use std::rc::Rc;

use nlroute::netlink::rtnetlink_groups::{self as groups, mask};
use nlroute::netlink::types::link::{IFF_UP, IFLA_IFNAME};
use nlroute::netlink::{MessageType, Rtnl, RtnlListener, request_flags};

use crate::common::{drive_until, in_new_netns, start_handler};

const LOOPBACK_INDEX: u32 = 1;

fn link_name(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

#[tokio::test]
async fn test_link_dump_finds_loopback() {
    let Some(handler) = start_handler(0) else {
        return;
    };

    let links = Rc::new(RefCell::new(Vec::new()));
    let seen = links.clone();
    let _listener = RtnlListener::new(handler.clone(), request_flags::LINK, move |msg| {
        assert_eq!(msg.message_type(), MessageType::Link);
        if let Some(name) = msg.attribute(IFLA_IFNAME) {
            seen.borrow_mut().push((msg.interface_index, link_name(name)));
        }
    });
    handler.request_dump(request_flags::LINK);

    let found = drive_until(&handler, || {
        links
            .borrow()
            .iter()
            .any(|(index, name)| *index == LOOPBACK_INDEX && name == "lo")
    })
    .await;
    assert!(found, "loopback missing from link dump: {:?}", links.borrow());

    handler.stop();
}

#[tokio::test]
async fn test_dump_categories_run_in_sequence() {
    let Some(handler) = start_handler(0) else {
        return;
    };

    let types = Rc::new(RefCell::new(Vec::new()));
    let seen = types.clone();
    let _listener = RtnlListener::new(
        handler.clone(),
        request_flags::LINK | request_flags::ADDR,
        move |msg| seen.borrow_mut().push(msg.message_type()),
    );
    handler.request_dump(request_flags::ADDR | request_flags::LINK);

    // Addresses are dumped before links, and loopback always has a link.
    // Once one arrives the address dump is complete.
    let done = drive_until(&handler, || types.borrow().contains(&MessageType::Link)).await;
    assert!(done, "no link dumped");

    let types = types.borrow();
    let first_link = types
        .iter()
        .position(|t| *t == MessageType::Link)
        .unwrap();
    assert!(types[..first_link].iter().all(|t| *t == MessageType::Address));
    assert!(types[first_link..].iter().all(|t| *t == MessageType::Link));

    handler.stop();
}

#[test]
fn test_get_interface_index() {
    let handler = nlroute::RtnlHandler::default();
    assert_eq!(handler.get_interface_index("lo").unwrap(), LOOPBACK_INDEX);
    assert!(handler.get_interface_index("nlroute-none0").is_err());
}

#[test]
fn test_set_loopback_up() {
    require_root!();

    in_new_netns(|| async {
        let Some(handler) = start_handler(mask(&[groups::RTNLGRP_LINK])) else {
            return;
        };

        let flags = Rc::new(RefCell::new(None));
        let seen = flags.clone();
        let _listener = RtnlListener::new(handler.clone(), request_flags::LINK, move |msg| {
            if msg.interface_index == LOOPBACK_INDEX
                && let Some(status) = msg.link_status()
            {
                *seen.borrow_mut() = Some(status.flags);
            }
        });

        assert!(handler.set_interface_flags(LOOPBACK_INDEX, IFF_UP, IFF_UP));

        let up = drive_until(&handler, || {
            flags.borrow().is_some_and(|f| f & IFF_UP != 0)
        })
        .await;
        assert!(up, "no link event with IFF_UP for lo");

        handler.stop();
    });
}
