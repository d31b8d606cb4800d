//! Printable implementations for routing and message types.

mod message;
mod route;

pub use route::{protocol_name, scope_name, table_name};
