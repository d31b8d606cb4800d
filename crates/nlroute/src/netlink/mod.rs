//! Rtnetlink protocol implementation.
//!
//! The layering, leaves first:
//!
//! - [`message`], [`attr`], [`builder`] and [`types`] describe the wire format
//!   (netlink header, rtattr TLVs and the per-family fixed structs).
//! - [`RtnlMessage`] is the typed codec for link, address, route, neighbor
//!   and neighbor-discovery user option messages.
//! - [`RtnlHandler`] owns the socket, assigns sequence numbers, remembers
//!   which kernel errors each request expects, runs the dump state machine and
//!   dispatches decoded messages to [`RtnlListener`]s.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::rc::Rc;
//! use nlroute::netlink::{HandlerConfig, RtnlHandler, RtnlListener, Rtnl, request_flags};
//!
//! let handler = Rc::new(RtnlHandler::new(HandlerConfig::new()));
//! let _links = RtnlListener::new(handler.clone(), request_flags::LINK, |msg| {
//!     println!("link {} changed", msg.interface_index);
//! });
//! handler.request_dump(request_flags::LINK | request_flags::ADDR);
//! handler.start(0)?;
//! handler.try_run().await?;
//! ```

pub mod attr;
mod builder;
mod error;
pub mod error_mask;
pub mod handler;
pub mod listener;
pub mod message;
pub mod rtnl_message;
mod socket;
pub mod types;

pub use attr::{AttrIter, NlAttr};
pub use builder::MessageBuilder;
pub use error::{Error, Result};
pub use error_mask::{ERROR_WINDOW_SIZE, ErrorMask, ErrorMaskWindow};
pub use handler::{HandlerConfig, ListenerCallback, ListenerId, Rtnl, RtnlHandler, request_flags};
pub use listener::RtnlListener;
pub use message::{MessageIter, NLMSG_HDRLEN, NlMsgHdr, NlMsgType};
pub use rtnl_message::{
    AddressStatus, LinkStatus, MessageType, Mode, NeighborStatus, RdnssOption, RouteStatus,
    RtnlMessage, Status,
};
pub use socket::{RtnlSocket, Transport, rtnetlink_groups};
