//! Scoped listener registration.

use std::rc::{Rc, Weak};

use super::handler::{ListenerId, Rtnl};
use super::rtnl_message::RtnlMessage;

/// A callback registered with a handler for as long as this value lives.
///
/// Holds only a weak reference to the handler, so a listener never keeps
/// the handler alive and dropping it after the handler is gone is a no-op.
///
/// # Example
///
/// ```ignore
/// let _routes = RtnlListener::new(handler.clone(), request_flags::ROUTE, |msg| {
///     println!("route event seq {}", msg.seq);
/// });
/// ```
pub struct RtnlListener {
    handler: Weak<dyn Rtnl>,
    id: ListenerId,
}

impl RtnlListener {
    /// Register `callback` for the message categories in `interest`.
    pub fn new<F>(handler: Rc<dyn Rtnl>, interest: u32, callback: F) -> Self
    where
        F: Fn(&RtnlMessage) + 'static,
    {
        let id = handler.add_listener(interest, Rc::new(callback));
        Self {
            handler: Rc::downgrade(&handler),
            id,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for RtnlListener {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.upgrade() {
            handler.remove_listener(self.id);
        }
    }
}

impl std::fmt::Debug for RtnlListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtnlListener").field("id", &self.id).finish()
    }
}
