//! Rtnetlink control plane for Linux connection managers.
//!
//! This crate speaks the NETLINK_ROUTE wire protocol to discover interfaces,
//! addresses, routes and neighbors, and to program address, route and link
//! changes into the kernel. On top of the transport it keeps an in-memory
//! mirror of per-interface routing state.
//!
//! # Features
//!
//! - `output` - JSON/text output formatting for cached routes and messages
//! - `integration` - Enables tests that talk to the running kernel
//!
//! # Example
//!
//! ```ignore
//! use std::rc::Rc;
//! use nlroute::netlink::{RtnlHandler, HandlerConfig, rtnetlink_groups};
//! use nlroute::routing::RoutingTable;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> nlroute::Result<()> {
//!     let handler = Rc::new(RtnlHandler::new(HandlerConfig::new()));
//!     handler.start(rtnetlink_groups::mask(&[
//!         rtnetlink_groups::RTNLGRP_LINK,
//!         rtnetlink_groups::RTNLGRP_IPV4_ROUTE,
//!     ]))?;
//!
//!     let table = Rc::new(RoutingTable::new(handler.clone()));
//!     table.start();
//!
//!     // Drive the socket. A read failure terminates the process.
//!     handler.run().await;
//!     Ok(())
//! }
//! ```

// Core modules (always available)
pub mod netlink;
pub mod routing;
pub mod util;

// Feature-gated modules
#[cfg(feature = "output")]
pub mod output;

// Re-export common types at crate root for convenience
pub use netlink::{Error, Result, RtnlHandler, RtnlMessage};
pub use routing::{RoutingTable, RoutingTableEntry};
