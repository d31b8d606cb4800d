//! Rtnetlink request/reply handler.
//!
//! [`RtnlHandler`] owns the routing socket. It stamps outgoing requests with
//! sequence numbers, remembers which kernel errors each request expects,
//! walks pending dump categories one at a time and dispatches decoded
//! messages to registered listeners.
//!
//! The handler is single-threaded: all methods take `&self` and keep their
//! state in `Cell`/`RefCell`, and the whole thing lives on one event loop
//! behind an `Rc`.

use std::cell::{Cell, RefCell};
use std::future::poll_fn;
use std::net::IpAddr;
use std::rc::Rc;

use tracing::{debug, error, trace, warn};

use super::error::{Error, Result};
use super::error_mask::{ErrorMask, ErrorMaskWindow};
use super::message::{
    MessageIter, NLM_F_CREATE, NLM_F_ECHO, NLM_F_EXCL, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgError,
    NlMsgHdr, NlMsgType,
};
use super::rtnl_message::{AddressStatus, LinkStatus, MessageType, Mode, RtnlMessage, Status};
use super::socket::{RtnlSocket, Transport};
use super::types::addr::{IFA_ADDRESS, IFA_BROADCAST, IFA_LOCAL};
use super::types::family::{AF_BRIDGE, AF_UNSPEC};
use super::types::link::{ARPHRD_VOID, IFF_UP, IFLA_MTU};
use crate::util::addr::{IpFamily, IpPrefix, ip_octets};
use crate::util::ifname;

/// Categories for dump requests and listener interest masks.
pub mod request_flags {
    pub const LINK: u32 = 1;
    pub const ADDR: u32 = 2;
    pub const ROUTE: u32 = 4;
    pub const RDNSS: u32 = 8;
    pub const NEIGHBOR: u32 = 16;
    pub const BRIDGE_NEIGHBOR: u32 = 32;
}

/// Default receive buffer, large enough to absorb bursts of route churn.
pub const DEFAULT_RX_BUF_SIZE: usize = 512 * 1024;

/// Handler configuration.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    rx_buf_size: usize,
}

impl HandlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket receive buffer size in bytes.
    pub fn with_rx_buf_size(mut self, size: usize) -> Self {
        self.rx_buf_size = size;
        self
    }

    pub fn rx_buf_size(&self) -> usize {
        self.rx_buf_size
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            rx_buf_size: DEFAULT_RX_BUF_SIZE,
        }
    }
}

/// Callback invoked with each dispatched message.
pub type ListenerCallback = Rc<dyn Fn(&RtnlMessage)>;

/// Token identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// The operations consumers need from an rtnetlink handler.
///
/// [`RoutingTable`](crate::routing::RoutingTable) and [`RtnlListener`]
/// depend on this trait rather than on [`RtnlHandler`] directly.
///
/// [`RtnlListener`]: super::RtnlListener
pub trait Rtnl {
    /// Send with the default error mask for the message's mode and type.
    /// Stamps `msg.seq`.
    fn send_message(&self, msg: &mut RtnlMessage) -> bool;

    /// Send, suppressing logs for the kernel errors in `mask`.
    /// Stamps `msg.seq`.
    fn send_message_with_error_mask(&self, msg: &mut RtnlMessage, mask: ErrorMask) -> bool;

    /// Queue dump categories (`request_flags`).
    fn request_dump(&self, flags: u32);

    /// Register a callback for the categories in `interest`.
    fn add_listener(&self, interest: u32, callback: ListenerCallback) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// What happened to a kernel error frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorDisposition {
    Ack,
    Suppressed,
    Reported,
}

struct Listener {
    id: ListenerId,
    interest: u32,
    callback: ListenerCallback,
}

/// Rtnetlink transport and dispatcher.
pub struct RtnlHandler {
    config: HandlerConfig,
    transport: RefCell<Option<Rc<dyn Transport>>>,
    request_sequence: Cell<u32>,
    last_dump_sequence: Cell<u32>,
    request_flags: Cell<u32>,
    in_request: Cell<bool>,
    error_masks: RefCell<ErrorMaskWindow>,
    listeners: RefCell<Vec<Listener>>,
    next_listener_id: Cell<u64>,
}

impl RtnlHandler {
    pub fn new(config: HandlerConfig) -> Self {
        Self {
            config,
            transport: RefCell::new(None),
            // Kernel broadcasts carry sequence 0, so requests start above it.
            request_sequence: Cell::new(1),
            last_dump_sequence: Cell::new(0),
            request_flags: Cell::new(0),
            in_request: Cell::new(false),
            error_masks: RefCell::new(ErrorMaskWindow::new()),
            listeners: RefCell::new(Vec::new()),
            next_listener_id: Cell::new(1),
        }
    }

    /// Open the routing socket bound to the `groups` multicast mask and
    /// start working through queued dump requests.
    ///
    /// Calling this on a started handler does nothing. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, groups: u32) -> Result<()> {
        if self.is_started() {
            return Ok(());
        }
        let socket = RtnlSocket::open(groups, self.config.rx_buf_size).inspect_err(|e| {
            error!("failed to open rtnetlink socket: {}", e);
        })?;
        debug!(pid = socket.pid(), groups, "rtnetlink socket bound");
        self.start_with_transport(Rc::new(socket));
        Ok(())
    }

    /// Start on an already opened transport.
    pub fn start_with_transport(&self, transport: Rc<dyn Transport>) {
        if self.is_started() {
            return;
        }
        *self.transport.borrow_mut() = Some(transport);
        debug!("rtnetlink handler started");
        self.issue_next_dump();
    }

    /// Drop the socket and forget all request state. Safe to call at any
    /// time.
    pub fn stop(&self) {
        self.transport.borrow_mut().take();
        self.in_request.set(false);
        self.request_flags.set(0);
        self.error_masks.borrow_mut().clear();
        debug!("rtnetlink handler stopped");
    }

    pub fn is_started(&self) -> bool {
        self.transport.borrow().is_some()
    }

    /// Read and dispatch datagrams until the handler is stopped.
    ///
    /// Returns an error if the socket read fails.
    pub async fn try_run(&self) -> Result<()> {
        loop {
            let Some(transport) = self.transport.borrow().clone() else {
                return Ok(());
            };
            let data = poll_fn(|cx| transport.poll_recv(cx)).await?;
            self.handle_datagram(&data);
        }
    }

    /// Like [`try_run`](Self::try_run), but a read failure terminates the
    /// process: nothing works without this channel.
    pub async fn run(&self) {
        if let Err(e) = self.try_run().await {
            error!("rtnetlink socket read failed: {}", e);
            std::process::exit(1);
        }
    }

    /// Process one received datagram, which may hold several frames.
    pub fn handle_datagram(&self, data: &[u8]) {
        trace!(len = data.len(), "rtnetlink datagram");

        for item in MessageIter::new(data) {
            let (header, frame) = match item {
                Ok(item) => item,
                Err(e) => {
                    error!("dropping rest of datagram: {}", e);
                    break;
                }
            };

            match RtnlMessage::decode(frame) {
                Ok(msg) => self.dispatch(&msg),
                Err(_) => self.handle_control_frame(header, frame),
            }
        }
    }

    fn handle_control_frame(&self, header: &NlMsgHdr, frame: &[u8]) {
        match header.nlmsg_type {
            NlMsgType::NOOP | NlMsgType::OVERRUN => {}
            NlMsgType::DONE => {
                self.take_error_mask(header.nlmsg_seq);
                self.next_request(header.nlmsg_seq);
            }
            NlMsgType::ERROR => match NlMsgError::from_bytes(&frame[NLMSG_HDRLEN..]) {
                Ok(err) => {
                    self.handle_error(header.nlmsg_seq, err.errno());
                }
                Err(_) => {
                    error!(seq = header.nlmsg_seq, "invalid error message header");
                }
            },
            other => {
                warn!(seq = header.nlmsg_seq, "unknown netlink message type {}", other);
            }
        }
    }

    fn handle_error(&self, seq: u32, errno: i32) -> ErrorDisposition {
        let mask = self.take_error_mask(seq);
        if errno == 0 {
            debug!(seq, "request acknowledged");
            ErrorDisposition::Ack
        } else if mask.contains(&errno) {
            debug!(seq, errno, "expected kernel error suppressed");
            ErrorDisposition::Suppressed
        } else {
            error!(
                "sequence {} received error {} ({})",
                seq,
                errno,
                std::io::Error::from_raw_os_error(errno)
            );
            ErrorDisposition::Reported
        }
    }

    fn take_error_mask(&self, seq: u32) -> ErrorMask {
        self.error_masks
            .borrow_mut()
            .take(self.request_sequence.get(), seq)
    }

    fn dispatch(&self, msg: &RtnlMessage) {
        let flag = match msg.message_type() {
            MessageType::Link => request_flags::LINK,
            MessageType::Address => request_flags::ADDR,
            MessageType::Route => request_flags::ROUTE,
            MessageType::Rdnss => request_flags::RDNSS,
            MessageType::Neighbor if msg.family == AF_BRIDGE => {
                request_flags::NEIGHBOR | request_flags::BRIDGE_NEIGHBOR
            }
            MessageType::Neighbor => request_flags::NEIGHBOR,
            MessageType::Dnssl => {
                warn!(ifindex = msg.interface_index, "ignoring DNSSL option");
                return;
            }
            MessageType::Unknown => return,
        };

        // Listeners may send requests from their callbacks, so no borrow is
        // held while they run.
        let callbacks: Vec<ListenerCallback> = self
            .listeners
            .borrow()
            .iter()
            .filter(|l| l.interest & flag != 0)
            .map(|l| l.callback.clone())
            .collect();

        for callback in callbacks {
            callback(msg);
        }
    }

    /// Continue the dump sequence if `seq` answers the outstanding dump.
    fn next_request(&self, seq: u32) {
        if seq != self.last_dump_sequence.get() {
            return;
        }
        self.issue_next_dump();
    }

    fn issue_next_dump(&self) {
        let pending = self.request_flags.get();
        trace!(pending, "next dump request");

        let (flag, message_type, family) = if pending & request_flags::ADDR != 0 {
            (request_flags::ADDR, MessageType::Address, AF_UNSPEC)
        } else if pending & request_flags::ROUTE != 0 {
            (request_flags::ROUTE, MessageType::Route, AF_UNSPEC)
        } else if pending & request_flags::LINK != 0 {
            (request_flags::LINK, MessageType::Link, AF_UNSPEC)
        } else if pending & request_flags::NEIGHBOR != 0 {
            (request_flags::NEIGHBOR, MessageType::Neighbor, AF_UNSPEC)
        } else if pending & request_flags::BRIDGE_NEIGHBOR != 0 {
            (request_flags::BRIDGE_NEIGHBOR, MessageType::Neighbor, AF_BRIDGE)
        } else {
            debug!("dump requests complete");
            self.in_request.set(false);
            return;
        };

        let mut msg = RtnlMessage::new(message_type, Mode::Get, 0, 0, 0, 0, family);
        if !self.send_message(&mut msg) {
            // Keep the category queued; the next request_dump retries it.
            error!("failed to send {:?} dump request", message_type);
            self.in_request.set(false);
            return;
        }

        debug!(seq = msg.seq, "{:?} dump requested", message_type);
        self.last_dump_sequence.set(msg.seq);
        self.request_flags.set(pending & !flag);
        self.in_request.set(true);
    }

    fn default_error_mask(msg: &RtnlMessage) -> ErrorMask {
        let mut mask = ErrorMask::new();
        match msg.mode {
            Mode::Add => {
                mask.insert(libc::EEXIST);
            }
            Mode::Delete => {
                mask.insert(libc::ESRCH);
                mask.insert(libc::ENODEV);
                if msg.message_type() == MessageType::Address {
                    mask.insert(libc::EADDRNOTAVAIL);
                }
            }
            _ => {}
        }
        mask
    }

    /// Set an interface's IFF_* flags. Only bits in `change` are touched.
    pub fn set_interface_flags(&self, interface_index: u32, flags: u32, change: u32) -> bool {
        let mut msg = RtnlMessage::new(
            MessageType::Link,
            Mode::Add,
            NLM_F_REQUEST,
            0,
            0,
            interface_index,
            AF_UNSPEC,
        );
        msg.status = Status::Link(LinkStatus::new(ARPHRD_VOID, flags, change));

        // Taking down an interface that is already gone is not an error.
        let mut mask = ErrorMask::new();
        if flags & IFF_UP == 0 {
            mask.insert(libc::ENODEV);
        }
        self.send_message_with_error_mask(&mut msg, mask)
    }

    pub fn set_interface_mtu(&self, interface_index: u32, mtu: u32) -> bool {
        let mut msg = RtnlMessage::new(
            MessageType::Link,
            Mode::Add,
            NLM_F_REQUEST,
            0,
            0,
            interface_index,
            AF_UNSPEC,
        );
        msg.set_attribute(IFLA_MTU, mtu.to_ne_bytes().to_vec());
        self.send_message(&mut msg)
    }

    /// Add `local` to an interface, with optional broadcast and peer
    /// addresses of the same family.
    pub fn add_interface_address(
        &self,
        interface_index: u32,
        local: &IpPrefix,
        broadcast: Option<IpAddr>,
        peer: Option<IpAddr>,
    ) -> bool {
        let family = local.family();
        let mismatch = [broadcast, peer]
            .iter()
            .flatten()
            .any(|addr| IpFamily::of(addr) != family);
        if mismatch {
            error!(
                "address family mismatch adding {} to interface {}",
                local, interface_index
            );
            return false;
        }

        self.address_request(
            interface_index,
            Mode::Add,
            NLM_F_CREATE | NLM_F_EXCL | NLM_F_ECHO,
            local,
            broadcast,
            peer,
        )
    }

    pub fn remove_interface_address(&self, interface_index: u32, local: &IpPrefix) -> bool {
        self.address_request(interface_index, Mode::Delete, NLM_F_ECHO, local, None, None)
    }

    fn address_request(
        &self,
        interface_index: u32,
        mode: Mode,
        flags: u16,
        local: &IpPrefix,
        broadcast: Option<IpAddr>,
        peer: Option<IpAddr>,
    ) -> bool {
        let mut msg = RtnlMessage::new(
            MessageType::Address,
            mode,
            NLM_F_REQUEST | flags,
            0,
            0,
            interface_index,
            local.family().af(),
        );
        msg.status = Status::Address(AddressStatus::new(local.prefix_len(), 0, 0));
        msg.set_attribute(IFA_LOCAL, local.octets());
        if let Some(addr) = broadcast.filter(|a| !a.is_unspecified()) {
            msg.set_attribute(IFA_BROADCAST, ip_octets(&addr));
        }
        if let Some(addr) = peer.filter(|a| !a.is_unspecified()) {
            msg.set_attribute(IFA_ADDRESS, ip_octets(&addr));
        }
        self.send_message(&mut msg)
    }

    /// Delete a (virtual) interface.
    pub fn remove_interface(&self, interface_index: u32) -> bool {
        let mut msg = RtnlMessage::new(
            MessageType::Link,
            Mode::Delete,
            NLM_F_REQUEST,
            0,
            0,
            interface_index,
            AF_UNSPEC,
        );
        self.send_message(&mut msg)
    }

    /// Resolve an interface name through SIOCGIFINDEX.
    pub fn get_interface_index(&self, name: &str) -> Result<u32> {
        ifname::name_to_index(name).map_err(|e| match e {
            ifname::IfError::Io(io) => Error::Io(io),
            _ => Error::InterfaceNotFound {
                name: name.to_string(),
            },
        })
    }
}

impl Rtnl for RtnlHandler {
    fn send_message(&self, msg: &mut RtnlMessage) -> bool {
        let mask = Self::default_error_mask(msg);
        self.send_message_with_error_mask(msg, mask)
    }

    fn send_message_with_error_mask(&self, msg: &mut RtnlMessage, mask: ErrorMask) -> bool {
        // Every call consumes a sequence number, successful or not.
        let seq = self.request_sequence.get();
        msg.seq = seq;
        self.error_masks.borrow_mut().set(seq, seq, mask);
        self.request_sequence.set(seq.wrapping_add(1));

        let Some(transport) = self.transport.borrow().clone() else {
            error!(seq, "cannot send {:?} message: {}", msg.message_type(), Error::NotStarted);
            return false;
        };

        let data = match msg.encode() {
            Ok(data) => data,
            Err(e) => {
                error!(seq, "failed to encode message: {}", e);
                return false;
            }
        };

        trace!(seq, len = data.len(), "sending {:?} {:?}", msg.mode, msg.message_type());
        if let Err(e) = transport.send(&data) {
            error!(seq, "rtnetlink send failed: {}", e);
            return false;
        }
        true
    }

    fn request_dump(&self, flags: u32) {
        self.request_flags.set(self.request_flags.get() | flags);
        trace!(pending = self.request_flags.get(), "dump requested");

        if !self.in_request.get() && self.is_started() {
            self.issue_next_dump();
        }
    }

    fn add_listener(&self, interest: u32, callback: ListenerCallback) -> ListenerId {
        let id = ListenerId(self.next_listener_id.get());
        self.next_listener_id.set(id.0 + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            interest,
            callback,
        });
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|l| l.id != id);
    }
}

impl Default for RtnlHandler {
    fn default() -> Self {
        Self::new(HandlerConfig::default())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::netlink::builder::MessageBuilder;
    use crate::netlink::message::NLM_F_DUMP;
    use crate::netlink::types::family::{AF_INET, AF_INET6};
    use crate::netlink::types::IfInfoMsg;
    use crate::netlink::types::neigh::{ND_OPT_DNSSL, NdUserOptMsg};
    use std::task::{Context, Poll};
    use zerocopy::IntoBytes;

    /// Transport that records what it is asked to send.
    #[derive(Default)]
    pub(crate) struct RecordingTransport {
        pub(crate) sent: RefCell<Vec<Vec<u8>>>,
        pub(crate) fail: Cell<bool>,
    }

    impl RecordingTransport {
        pub(crate) fn sent_messages(&self) -> Vec<RtnlMessage> {
            self.sent
                .borrow()
                .iter()
                .map(|b| RtnlMessage::decode(b).unwrap())
                .collect()
        }
    }

    impl Transport for RecordingTransport {
        fn send(&self, data: &[u8]) -> Result<()> {
            if self.fail.get() {
                return Err(std::io::Error::from_raw_os_error(libc::ENOBUFS).into());
            }
            self.sent.borrow_mut().push(data.to_vec());
            Ok(())
        }

        fn poll_recv(&self, _cx: &mut Context<'_>) -> Poll<Result<Vec<u8>>> {
            Poll::Pending
        }
    }

    fn started() -> (RtnlHandler, Rc<RecordingTransport>) {
        let handler = RtnlHandler::default();
        let transport = Rc::new(RecordingTransport::default());
        handler.start_with_transport(transport.clone());
        (handler, transport)
    }

    pub(crate) fn done_frame(seq: u32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NlMsgType::DONE, 0);
        builder.append_bytes(&0i32.to_ne_bytes());
        builder.set_seq(seq);
        builder.finish()
    }

    pub(crate) fn error_frame(seq: u32, errno: i32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NlMsgType::ERROR, 0);
        builder.append_bytes(&(-errno).to_ne_bytes());
        builder.append(&NlMsgHdr::new(NlMsgType::RTM_NEWROUTE, NLM_F_REQUEST));
        builder.set_seq(seq);
        builder.finish()
    }

    fn link_frame(ifindex: i32) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWLINK, 0);
        builder.append(&IfInfoMsg {
            ifi_index: ifindex,
            ..Default::default()
        });
        builder.finish()
    }

    fn recorder(handler: &RtnlHandler, interest: u32) -> Rc<RefCell<Vec<RtnlMessage>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        handler.add_listener(
            interest,
            Rc::new(move |msg: &RtnlMessage| sink.borrow_mut().push(msg.clone())),
        );
        seen
    }

    #[test]
    fn test_dump_priority_order() {
        let handler = RtnlHandler::default();
        handler.request_dump(request_flags::LINK | request_flags::ROUTE | request_flags::ADDR);
        assert!(!handler.in_request.get());

        let transport = Rc::new(RecordingTransport::default());
        handler.start_with_transport(transport.clone());

        let expected = [
            MessageType::Address,
            MessageType::Route,
            MessageType::Link,
        ];
        for (i, message_type) in expected.iter().enumerate() {
            let sent = transport.sent_messages();
            assert_eq!(sent.len(), i + 1);
            let msg = sent.last().unwrap();
            assert_eq!(msg.message_type(), *message_type);
            assert_eq!(msg.mode, Mode::Get);
            assert_eq!(msg.flags, NLM_F_REQUEST | NLM_F_DUMP);
            assert!(handler.in_request.get());

            // A DONE for some other sequence does not advance the dump.
            handler.handle_datagram(&done_frame(msg.seq.wrapping_add(100)));
            assert_eq!(transport.sent.borrow().len(), i + 1);

            handler.handle_datagram(&done_frame(msg.seq));
        }

        assert_eq!(transport.sent.borrow().len(), 3);
        assert!(!handler.in_request.get());
        assert_eq!(handler.request_flags.get(), 0);
    }

    #[test]
    fn test_one_dump_outstanding() {
        let (handler, transport) = started();

        handler.request_dump(request_flags::BRIDGE_NEIGHBOR);
        handler.request_dump(request_flags::NEIGHBOR | request_flags::ROUTE);
        assert_eq!(transport.sent.borrow().len(), 1);

        let first = transport.sent_messages().remove(0);
        assert_eq!(first.message_type(), MessageType::Neighbor);
        assert_eq!(first.family, AF_BRIDGE);

        handler.handle_datagram(&done_frame(first.seq));
        let second = transport.sent_messages().remove(1);
        assert_eq!(second.message_type(), MessageType::Route);

        handler.handle_datagram(&done_frame(second.seq));
        let third = transport.sent_messages().remove(2);
        assert_eq!(third.message_type(), MessageType::Neighbor);
        assert_eq!(third.family, AF_UNSPEC);
    }

    #[test]
    fn test_failed_dump_send_stays_queued() {
        let (handler, transport) = started();
        transport.fail.set(true);
        handler.request_dump(request_flags::LINK);
        assert!(!handler.in_request.get());
        assert_eq!(handler.request_flags.get(), request_flags::LINK);

        transport.fail.set(false);
        handler.request_dump(0);
        assert_eq!(transport.sent_messages()[0].message_type(), MessageType::Link);
        assert_eq!(handler.request_flags.get(), 0);
    }

    #[test]
    fn test_sequence_advances_on_failure() {
        let (handler, transport) = started();
        let mut seqs = Vec::new();

        for fail in [false, true, false, true] {
            transport.fail.set(fail);
            let mut msg = RtnlMessage::new(MessageType::Link, Mode::Delete, NLM_F_REQUEST, 0, 0, 1, 0);
            assert_eq!(handler.send_message(&mut msg), !fail);
            seqs.push(msg.seq);
        }

        // Not encodable still consumes a sequence.
        let mut rdnss = RtnlMessage::new(MessageType::Rdnss, Mode::Add, 0, 0, 0, 1, AF_INET6);
        assert!(!handler.send_message(&mut rdnss));
        seqs.push(rdnss.seq);

        for pair in seqs.windows(2) {
            assert_eq!(pair[1], pair[0].wrapping_add(1));
        }
    }

    #[test]
    fn test_send_before_start() {
        let handler = RtnlHandler::default();
        let mut msg = RtnlMessage::new(MessageType::Link, Mode::Delete, NLM_F_REQUEST, 0, 0, 1, 0);
        assert!(!handler.send_message(&mut msg));
        assert_eq!(handler.request_sequence.get(), msg.seq + 1);
    }

    #[test]
    fn test_error_mask_suppression() {
        let (handler, _transport) = started();

        let mut msg = RtnlMessage::new(MessageType::Route, Mode::Add, NLM_F_REQUEST, 0, 0, 0, AF_INET);
        assert!(handler.send_message(&mut msg));

        assert_eq!(handler.handle_error(msg.seq, libc::EEXIST), ErrorDisposition::Suppressed);
        // The mask was consumed.
        assert_eq!(handler.handle_error(msg.seq, libc::EEXIST), ErrorDisposition::Reported);
        assert_eq!(handler.handle_error(msg.seq, 0), ErrorDisposition::Ack);
    }

    #[test]
    fn test_default_error_masks() {
        let (handler, _transport) = started();

        let mut del_addr = RtnlMessage::new(MessageType::Address, Mode::Delete, NLM_F_REQUEST, 0, 0, 1, AF_INET);
        assert!(handler.send_message(&mut del_addr));
        assert_eq!(handler.handle_error(del_addr.seq, libc::EADDRNOTAVAIL), ErrorDisposition::Suppressed);

        let mut del_link = RtnlMessage::new(MessageType::Link, Mode::Delete, NLM_F_REQUEST, 0, 0, 1, 0);
        assert!(handler.send_message(&mut del_link));
        assert_eq!(handler.handle_error(del_link.seq, libc::EADDRNOTAVAIL), ErrorDisposition::Reported);

        let mut query = RtnlMessage::new(MessageType::Route, Mode::Query, NLM_F_REQUEST, 0, 0, 0, AF_INET);
        assert!(handler.send_message(&mut query));
        assert_eq!(handler.handle_error(query.seq, libc::EEXIST), ErrorDisposition::Reported);
    }

    #[test]
    fn test_error_window_expires() {
        let (handler, _transport) = started();

        let mut first = RtnlMessage::new(MessageType::Route, Mode::Add, NLM_F_REQUEST, 0, 0, 0, AF_INET);
        handler.send_message(&mut first);
        for _ in 0..16 {
            let mut msg = RtnlMessage::new(MessageType::Link, Mode::Query, NLM_F_REQUEST, 0, 0, 1, 0);
            handler.send_message(&mut msg);
        }
        assert_eq!(handler.handle_error(first.seq, libc::EEXIST), ErrorDisposition::Reported);
    }

    fn bare_frame(msg_type: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut builder = MessageBuilder::new(msg_type, 0);
        builder.append_bytes(payload);
        builder.set_seq(seq);
        builder.finish()
    }

    #[test]
    fn test_noop_and_overrun_are_ignored() {
        let (handler, transport) = started();
        let seen = recorder(&handler, u32::MAX);

        let mut msg = RtnlMessage::new(MessageType::Route, Mode::Add, NLM_F_REQUEST, 0, 0, 0, AF_INET);
        assert!(handler.send_message(&mut msg));

        let mut datagram = bare_frame(NlMsgType::NOOP, msg.seq, &[]);
        datagram.extend(bare_frame(NlMsgType::OVERRUN, msg.seq, &[0; 4]));
        handler.handle_datagram(&datagram);

        assert!(seen.borrow().is_empty());
        assert_eq!(transport.sent.borrow().len(), 1);
        // Neither frame touched the sequence's mask.
        assert_eq!(handler.handle_error(msg.seq, libc::EEXIST), ErrorDisposition::Suppressed);
    }

    #[test]
    fn test_done_clears_error_mask() {
        let (handler, _transport) = started();

        let mut msg = RtnlMessage::new(MessageType::Route, Mode::Add, NLM_F_REQUEST, 0, 0, 0, AF_INET);
        assert!(handler.send_message(&mut msg));

        handler.handle_datagram(&done_frame(msg.seq));
        assert_eq!(handler.handle_error(msg.seq, libc::EEXIST), ErrorDisposition::Reported);
    }

    #[test]
    fn test_truncated_error_frame_is_dropped() {
        let (handler, _transport) = started();
        let seen = recorder(&handler, request_flags::LINK);

        let mut msg = RtnlMessage::new(MessageType::Route, Mode::Add, NLM_F_REQUEST, 0, 0, 0, AF_INET);
        assert!(handler.send_message(&mut msg));

        // An ERROR frame too short to hold an nlmsgerr, followed by a link.
        let mut datagram = bare_frame(NlMsgType::ERROR, msg.seq, &[0xff, 0xff]);
        datagram.extend(link_frame(3));
        handler.handle_datagram(&datagram);

        assert_eq!(seen.borrow().len(), 1);
        assert_eq!(seen.borrow()[0].interface_index, 3);
        // The malformed frame did not consume the mask.
        assert_eq!(handler.handle_error(msg.seq, libc::EEXIST), ErrorDisposition::Suppressed);
    }

    #[test]
    fn test_error_frame_consumes_mask() {
        let (handler, _transport) = started();
        let mut msg = RtnlMessage::new(MessageType::Route, Mode::Add, NLM_F_REQUEST, 0, 0, 0, AF_INET);
        handler.send_message(&mut msg);

        handler.handle_datagram(&error_frame(msg.seq, libc::EEXIST));
        assert!(handler.take_error_mask(msg.seq).is_empty());
    }

    #[test]
    fn test_dispatch_by_interest() {
        let (handler, _transport) = started();
        let links = recorder(&handler, request_flags::LINK);
        let routes = recorder(&handler, request_flags::ROUTE | request_flags::ADDR);

        let mut datagram = link_frame(3);
        datagram.extend(link_frame(4));
        datagram.extend(done_frame(999));
        handler.handle_datagram(&datagram);

        let seen: Vec<u32> = links.borrow().iter().map(|m| m.interface_index).collect();
        assert_eq!(seen, vec![3, 4]);
        assert!(routes.borrow().is_empty());
    }

    #[test]
    fn test_dispatch_stops_at_bad_frame() {
        let (handler, _transport) = started();
        let links = recorder(&handler, request_flags::LINK);

        let mut datagram = link_frame(3);
        let mut bad = link_frame(4);
        bad[..4].copy_from_slice(&200u32.to_ne_bytes());
        datagram.extend(bad);
        handler.handle_datagram(&datagram);

        assert_eq!(links.borrow().len(), 1);
    }

    #[test]
    fn test_bridge_neighbor_dispatch() {
        let (handler, _transport) = started();
        let neighbors = recorder(&handler, request_flags::NEIGHBOR);
        let bridge = recorder(&handler, request_flags::BRIDGE_NEIGHBOR);

        let mut msg = RtnlMessage::new(MessageType::Neighbor, Mode::Add, 0, 0, 0, 2, AF_BRIDGE);
        msg.set_attribute(2, vec![2, 0, 0, 0, 0, 1]);
        handler.handle_datagram(&msg.encode().unwrap());

        msg.family = AF_INET;
        handler.handle_datagram(&msg.encode().unwrap());

        assert_eq!(neighbors.borrow().len(), 2);
        assert_eq!(bridge.borrow().len(), 1);
    }

    #[test]
    fn test_dnssl_not_dispatched() {
        let (handler, _transport) = started();
        let all = recorder(&handler, u32::MAX);

        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWNDUSEROPT, 0);
        let mut body = NdUserOptMsg {
            nduseropt_family: AF_INET6,
            nduseropt_opts_len: 8,
            nduseropt_ifindex: 2,
            ..Default::default()
        }
        .as_bytes()
        .to_vec();
        body.extend_from_slice(&[ND_OPT_DNSSL, 1, 0, 0, 0, 0, 0, 60]);
        builder.append_bytes(&body);
        handler.handle_datagram(&builder.finish());

        assert!(all.borrow().is_empty());
    }

    #[test]
    fn test_remove_listener() {
        let (handler, _transport) = started();
        let seen = Rc::new(Cell::new(0));
        let counter = seen.clone();
        let id = handler.add_listener(
            request_flags::LINK,
            Rc::new(move |_: &RtnlMessage| counter.set(counter.get() + 1)),
        );

        handler.handle_datagram(&link_frame(1));
        handler.remove_listener(id);
        handler.handle_datagram(&link_frame(1));
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn test_listener_may_send() {
        let handler = Rc::new(RtnlHandler::default());
        let transport = Rc::new(RecordingTransport::default());
        handler.start_with_transport(transport.clone());

        let weak = Rc::downgrade(&handler);
        handler.add_listener(
            request_flags::LINK,
            Rc::new(move |msg: &RtnlMessage| {
                if let Some(handler) = weak.upgrade() {
                    handler.set_interface_mtu(msg.interface_index, 1280);
                }
            }),
        );
        handler.handle_datagram(&link_frame(6));

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].attribute_u32(IFLA_MTU), Some(1280));
    }

    #[test]
    fn test_set_interface_flags() {
        let (handler, transport) = started();

        assert!(handler.set_interface_flags(5, 0, IFF_UP));
        let down = transport.sent_messages().remove(0);
        assert_eq!(down.mode, Mode::Add);
        assert_eq!(down.interface_index, 5);
        assert_eq!(down.link_status(), Some(&LinkStatus::new(ARPHRD_VOID, 0, IFF_UP)));
        assert_eq!(handler.handle_error(down.seq, libc::ENODEV), ErrorDisposition::Suppressed);

        assert!(handler.set_interface_flags(5, IFF_UP, IFF_UP));
        let up = transport.sent_messages().remove(1);
        assert_eq!(handler.handle_error(up.seq, libc::ENODEV), ErrorDisposition::Reported);
    }

    #[test]
    fn test_add_interface_address() {
        let (handler, transport) = started();
        let local: IpPrefix = "192.168.1.2/24".parse().unwrap();

        assert!(handler.add_interface_address(
            7,
            &local,
            Some("192.168.1.255".parse().unwrap()),
            None
        ));
        let msg = transport.sent_messages().remove(0);
        assert_eq!(msg.mode, Mode::Add);
        assert_eq!(msg.flags, NLM_F_REQUEST | NLM_F_CREATE | NLM_F_EXCL | NLM_F_ECHO);
        assert_eq!(msg.family, AF_INET);
        assert_eq!(msg.address_status(), Some(&AddressStatus::new(24, 0, 0)));
        assert_eq!(msg.attribute(IFA_LOCAL), Some(&[192u8, 168, 1, 2][..]));
        assert_eq!(msg.attribute(IFA_BROADCAST), Some(&[192u8, 168, 1, 255][..]));
        assert!(!msg.has_attribute(IFA_ADDRESS));

        // Peer of another family.
        assert!(!handler.add_interface_address(7, &local, None, Some("fe80::1".parse().unwrap())));
        assert_eq!(transport.sent.borrow().len(), 1);

        assert!(handler.remove_interface_address(7, &local));
        let del = transport.sent_messages().remove(1);
        assert_eq!(del.mode, Mode::Delete);
        assert_eq!(del.flags, NLM_F_REQUEST | NLM_F_ECHO);
        assert!(!del.has_attribute(IFA_BROADCAST));
    }

    #[test]
    fn test_remove_interface() {
        let (handler, transport) = started();
        assert!(handler.remove_interface(9));
        let msg = transport.sent_messages().remove(0);
        assert_eq!(msg.message_type(), MessageType::Link);
        assert_eq!(msg.mode, Mode::Delete);
        assert_eq!(msg.interface_index, 9);
    }

    #[test]
    fn test_stop_clears_state() {
        let (handler, transport) = started();
        handler.request_dump(request_flags::LINK | request_flags::ADDR);
        assert!(handler.in_request.get());

        handler.stop();
        assert!(!handler.is_started());
        assert!(!handler.in_request.get());
        assert_eq!(handler.request_flags.get(), 0);

        let mut msg = RtnlMessage::new(MessageType::Link, Mode::Delete, NLM_F_REQUEST, 0, 0, 1, 0);
        assert!(!handler.send_message(&mut msg));
        assert_eq!(transport.sent.borrow().len(), 1);

        // Stopping twice is fine.
        handler.stop();
    }
}
