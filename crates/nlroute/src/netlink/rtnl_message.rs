//! Typed rtnetlink messages.
//!
//! [`RtnlMessage`] is the value type exchanged between the handler and its
//! listeners. It decodes link, address, route and neighbor messages plus the
//! neighbor-discovery user options (RDNSS, DNSSL) the kernel forwards from
//! router advertisements, and encodes the first four kinds back to the wire.
//!
//! Attributes are kept as raw bytes keyed by their rtattr type; typed access
//! goes through [`RtnlMessage::attribute_u32`] and
//! [`RtnlMessage::attribute_address`].

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};

use bytes::Bytes;
use winnow::binary::{be_u8, be_u16, be_u32};
use winnow::combinator::repeat;
use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::take;

use super::attr::{get, parse_attrs};
use super::builder::MessageBuilder;
use super::error::{Error, Result};
use super::message::{
    NLM_F_DUMP, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgHdr, NlMsgType, nlmsg_align, nlmsg_length,
};
use super::types::family::AF_INET6;
use super::types::neigh::{ND_OPT_DNSSL, ND_OPT_HDRLEN, ND_OPT_RDNSS};
use super::types::{IfAddrMsg, IfInfoMsg, NdMsg, NdUserOptMsg, RtGenMsg, RtMsg};
use crate::util::addr::ip_from_bytes;

type PResult<T> = std::result::Result<T, ErrMode<ContextError>>;

/// Kind of rtnetlink message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
#[cfg_attr(feature = "output", serde(rename_all = "lowercase"))]
pub enum MessageType {
    Unknown,
    Link,
    Address,
    Route,
    Neighbor,
    Rdnss,
    Dnssl,
}

/// What a message asks for or reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
#[cfg_attr(feature = "output", serde(rename_all = "lowercase"))]
pub enum Mode {
    #[default]
    Unknown,
    /// Dump request for a whole category.
    Get,
    /// Object created or changed.
    Add,
    /// Object removed.
    Delete,
    /// Single-object lookup.
    Query,
}

/// Fixed fields of a link message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct LinkStatus {
    /// Device type (ARPHRD_*).
    pub link_type: u16,
    /// Device flags (IFF_*).
    pub flags: u32,
    /// Mask of flags to change.
    pub change: u32,
}

impl LinkStatus {
    pub fn new(link_type: u16, flags: u32, change: u32) -> Self {
        Self {
            link_type,
            flags,
            change,
        }
    }
}

/// Fixed fields of an address message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct AddressStatus {
    pub prefix_len: u8,
    /// Address flags (IFA_F_*).
    pub flags: u8,
    pub scope: u8,
}

impl AddressStatus {
    pub fn new(prefix_len: u8, flags: u8, scope: u8) -> Self {
        Self {
            prefix_len,
            flags,
            scope,
        }
    }
}

/// Fixed fields of a route message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct RouteStatus {
    pub dst_prefix: u8,
    pub src_prefix: u8,
    pub table: u8,
    /// Origin of the route (RTPROT_*).
    pub protocol: u8,
    pub scope: u8,
    /// Route type (RTN_*).
    pub route_type: u8,
    /// Route flags (RTM_F_*).
    pub flags: u32,
}

impl RouteStatus {
    pub fn new(
        dst_prefix: u8,
        src_prefix: u8,
        table: u8,
        protocol: u8,
        scope: u8,
        route_type: u8,
        flags: u32,
    ) -> Self {
        Self {
            dst_prefix,
            src_prefix,
            table,
            protocol,
            scope,
            route_type,
            flags,
        }
    }
}

/// Fixed fields of a neighbor message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct NeighborStatus {
    /// Neighbor state (NUD_*).
    pub state: u16,
    /// Neighbor flags (NTF_*).
    pub flags: u8,
    pub neighbor_type: u8,
}

impl NeighborStatus {
    pub fn new(state: u16, flags: u8, neighbor_type: u8) -> Self {
        Self {
            state,
            flags,
            neighbor_type,
        }
    }
}

/// Recursive DNS server option from a router advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
pub struct RdnssOption {
    /// Lifetime in seconds; `u32::MAX` means infinite.
    pub lifetime: u32,
    pub addresses: Vec<Ipv6Addr>,
}

/// Type-specific payload of a message.
///
/// The variant determines the message type, so the two cannot disagree.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "output", derive(serde::Serialize))]
#[cfg_attr(feature = "output", serde(untagged))]
pub enum Status {
    #[default]
    Unknown,
    Link(LinkStatus),
    Address(AddressStatus),
    Route(RouteStatus),
    Neighbor(NeighborStatus),
    Rdnss(RdnssOption),
    /// DNS search list; recognized but not decoded.
    Dnssl,
}

impl Status {
    /// Zeroed payload for a message type.
    pub fn default_for(message_type: MessageType) -> Self {
        match message_type {
            MessageType::Unknown => Self::Unknown,
            MessageType::Link => Self::Link(LinkStatus::default()),
            MessageType::Address => Self::Address(AddressStatus::default()),
            MessageType::Route => Self::Route(RouteStatus::default()),
            MessageType::Neighbor => Self::Neighbor(NeighborStatus::default()),
            MessageType::Rdnss => Self::Rdnss(RdnssOption::default()),
            MessageType::Dnssl => Self::Dnssl,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Unknown => MessageType::Unknown,
            Self::Link(_) => MessageType::Link,
            Self::Address(_) => MessageType::Address,
            Self::Route(_) => MessageType::Route,
            Self::Neighbor(_) => MessageType::Neighbor,
            Self::Rdnss(_) => MessageType::Rdnss,
            Self::Dnssl => MessageType::Dnssl,
        }
    }
}

/// Wire family selected by the netlink message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Body {
    Link,
    Address,
    Route,
    Neighbor,
    NdUserOpt,
}

impl Body {
    fn message_type(self) -> MessageType {
        match self {
            Self::Link => MessageType::Link,
            Self::Address => MessageType::Address,
            Self::Route => MessageType::Route,
            Self::Neighbor => MessageType::Neighbor,
            Self::NdUserOpt => MessageType::Unknown,
        }
    }
}

/// One rtnetlink message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RtnlMessage {
    pub mode: Mode,
    /// Netlink header flags (NLM_F_*).
    pub flags: u16,
    pub seq: u32,
    pub pid: u32,
    /// Interface index; always 0 for route messages, which carry RTA_OIF.
    pub interface_index: u32,
    /// Address family (AF_*).
    pub family: u8,
    pub status: Status,
    attributes: BTreeMap<u16, Bytes>,
}

impl RtnlMessage {
    /// Create a message with a zeroed payload for `message_type`.
    ///
    /// `rtmsg` has no interface field: route messages must pass 0 and carry
    /// the output interface as an RTA_OIF attribute. [`encode`](Self::encode)
    /// rejects a route message with a non-zero `interface_index`.
    pub fn new(
        message_type: MessageType,
        mode: Mode,
        flags: u16,
        seq: u32,
        pid: u32,
        interface_index: u32,
        family: u8,
    ) -> Self {
        Self {
            mode,
            flags,
            seq,
            pid,
            interface_index,
            family,
            status: Status::default_for(message_type),
            attributes: BTreeMap::new(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        self.status.message_type()
    }

    pub fn link_status(&self) -> Option<&LinkStatus> {
        match &self.status {
            Status::Link(s) => Some(s),
            _ => None,
        }
    }

    pub fn address_status(&self) -> Option<&AddressStatus> {
        match &self.status {
            Status::Address(s) => Some(s),
            _ => None,
        }
    }

    pub fn route_status(&self) -> Option<&RouteStatus> {
        match &self.status {
            Status::Route(s) => Some(s),
            _ => None,
        }
    }

    pub fn neighbor_status(&self) -> Option<&NeighborStatus> {
        match &self.status {
            Status::Neighbor(s) => Some(s),
            _ => None,
        }
    }

    pub fn rdnss_option(&self) -> Option<&RdnssOption> {
        match &self.status {
            Status::Rdnss(s) => Some(s),
            _ => None,
        }
    }

    /// Raw bytes of an attribute.
    pub fn attribute(&self, attr_type: u16) -> Option<&[u8]> {
        self.attributes.get(&attr_type).map(|b| b.as_ref())
    }

    pub fn has_attribute(&self, attr_type: u16) -> bool {
        self.attributes.contains_key(&attr_type)
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attribute(&mut self, attr_type: u16, value: impl Into<Bytes>) {
        self.attributes.insert(attr_type, value.into());
    }

    /// Attributes in ascending type order.
    pub fn attributes(&self) -> impl Iterator<Item = (u16, &[u8])> {
        self.attributes.iter().map(|(t, v)| (*t, v.as_ref()))
    }

    /// An attribute read as a native-endian u32. The payload must be exactly
    /// four bytes.
    pub fn attribute_u32(&self, attr_type: u16) -> Option<u32> {
        self.attribute(attr_type)
            .and_then(|data| get::u32_ne(data).ok())
    }

    /// An attribute read as an address of this message's family.
    pub fn attribute_address(&self, attr_type: u16) -> Option<IpAddr> {
        self.attribute(attr_type)
            .and_then(|data| ip_from_bytes(self.family, data))
    }

    /// Decode one frame.
    ///
    /// `buf` must hold at least the length the header declares; bytes past
    /// that length are ignored. Either a fully populated message comes back
    /// or an error, never a partial message.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = NlMsgHdr::from_bytes(buf)?;
        let total = header.nlmsg_len as usize;
        if total < NLMSG_HDRLEN || total > buf.len() {
            return Err(Error::Truncated {
                expected: total.max(NLMSG_HDRLEN),
                actual: buf.len(),
            });
        }
        let frame = &buf[..total];
        let (body, mode) = classify(header.nlmsg_type, header.nlmsg_flags)?;

        let mut msg = RtnlMessage {
            mode,
            flags: header.nlmsg_flags,
            seq: header.nlmsg_seq,
            pid: header.nlmsg_pid,
            ..Default::default()
        };

        let attr_offset = match (body, mode) {
            (Body::NdUserOpt, _) => {
                msg.decode_nd_user_option(frame)?;
                None
            }
            (_, Mode::Get) => Some(msg.decode_dump_request(body, frame)?),
            (Body::Link, _) => Some(msg.decode_link(frame)?),
            (Body::Address, _) => Some(msg.decode_address(frame)?),
            (Body::Route, _) => Some(msg.decode_route(frame)?),
            (Body::Neighbor, _) => Some(msg.decode_neighbor(frame)?),
        };

        if let Some(offset) = attr_offset {
            for (attr_type, value) in parse_attrs(&frame[offset.min(total)..])? {
                msg.attributes
                    .insert(attr_type, Bytes::copy_from_slice(value));
            }
        }

        Ok(msg)
    }

    fn decode_dump_request(&mut self, body: Body, frame: &[u8]) -> Result<usize> {
        let family = frame.get(NLMSG_HDRLEN).copied().ok_or(Error::Truncated {
            expected: nlmsg_length(std::mem::size_of::<RtGenMsg>()),
            actual: frame.len(),
        })?;
        self.family = family;
        self.status = Status::default_for(body.message_type());
        Ok(NLMSG_HDRLEN + nlmsg_align(std::mem::size_of::<RtGenMsg>()))
    }

    fn decode_link(&mut self, frame: &[u8]) -> Result<usize> {
        let hdr = IfInfoMsg::from_bytes(&frame[NLMSG_HDRLEN..])?;
        self.family = hdr.ifi_family;
        self.interface_index = hdr.ifi_index as u32;
        self.status = Status::Link(LinkStatus::new(hdr.ifi_type, hdr.ifi_flags, hdr.ifi_change));
        Ok(NLMSG_HDRLEN + nlmsg_align(IfInfoMsg::SIZE))
    }

    fn decode_address(&mut self, frame: &[u8]) -> Result<usize> {
        let hdr = IfAddrMsg::from_bytes(&frame[NLMSG_HDRLEN..])?;
        self.family = hdr.ifa_family;
        self.interface_index = hdr.ifa_index;
        self.status = Status::Address(AddressStatus::new(
            hdr.ifa_prefixlen,
            hdr.ifa_flags,
            hdr.ifa_scope,
        ));
        Ok(NLMSG_HDRLEN + nlmsg_align(IfAddrMsg::SIZE))
    }

    fn decode_route(&mut self, frame: &[u8]) -> Result<usize> {
        let hdr = RtMsg::from_bytes(&frame[NLMSG_HDRLEN..])?;
        self.family = hdr.rtm_family;
        self.status = Status::Route(RouteStatus::new(
            hdr.rtm_dst_len,
            hdr.rtm_src_len,
            hdr.rtm_table,
            hdr.rtm_protocol,
            hdr.rtm_scope,
            hdr.rtm_type,
            hdr.rtm_flags,
        ));
        Ok(NLMSG_HDRLEN + nlmsg_align(RtMsg::SIZE))
    }

    fn decode_neighbor(&mut self, frame: &[u8]) -> Result<usize> {
        let hdr = NdMsg::from_bytes(&frame[NLMSG_HDRLEN..])?;
        self.family = hdr.ndm_family;
        self.interface_index = hdr.ndm_ifindex as u32;
        self.status = Status::Neighbor(NeighborStatus::new(
            hdr.ndm_state,
            hdr.ndm_flags,
            hdr.ndm_type,
        ));
        Ok(NLMSG_HDRLEN + nlmsg_align(NdMsg::SIZE))
    }

    fn decode_nd_user_option(&mut self, frame: &[u8]) -> Result<()> {
        let hdr = NdUserOptMsg::from_bytes(&frame[NLMSG_HDRLEN..])?;
        if hdr.nduseropt_family != AF_INET6 {
            return Err(Error::InvalidMessage(format!(
                "ND user option for family {}",
                hdr.nduseropt_family
            )));
        }

        let opts_len = hdr.nduseropt_opts_len as usize;
        if opts_len < ND_OPT_HDRLEN {
            return Err(Error::InvalidMessage(format!(
                "ND user option of {} bytes",
                opts_len
            )));
        }

        let start = NLMSG_HDRLEN + NdUserOptMsg::SIZE;
        let mut options = frame
            .get(start..start + opts_len)
            .ok_or(Error::Truncated {
                expected: start + opts_len,
                actual: frame.len(),
            })?;

        let (opt_type, opt_units, lifetime) = nd_option_header
            .parse_next(&mut options)
            .map_err(|_| Error::InvalidMessage("malformed ND option header".into()))?;
        if opt_units as usize * 8 != opts_len {
            return Err(Error::InvalidMessage(format!(
                "ND option length {} x 8 does not match {} bytes",
                opt_units, opts_len
            )));
        }

        self.family = hdr.nduseropt_family;
        self.interface_index = hdr.nduseropt_ifindex as u32;
        self.status = match opt_type {
            ND_OPT_RDNSS => {
                if options.len() % 16 != 0 {
                    return Err(Error::InvalidMessage(format!(
                        "RDNSS payload of {} bytes is not a list of addresses",
                        options.len()
                    )));
                }
                let addresses = rdnss_servers
                    .parse_next(&mut options)
                    .map_err(|_| Error::InvalidMessage("malformed RDNSS option".into()))?;
                Status::Rdnss(RdnssOption {
                    lifetime,
                    addresses,
                })
            }
            ND_OPT_DNSSL => Status::Dnssl,
            other => {
                return Err(Error::InvalidMessage(format!(
                    "unsupported ND user option {}",
                    other
                )));
            }
        };
        Ok(())
    }

    /// Encode to wire bytes.
    ///
    /// Only link, address, route and neighbor messages are encodable. In
    /// [`Mode::Get`] the message becomes a dump request carrying just the
    /// family, and `flags`, payload and attributes are ignored.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let (types, fixed): ([u16; 3], Vec<u8>) = match &self.status {
            Status::Link(s) => (
                [
                    NlMsgType::RTM_NEWLINK,
                    NlMsgType::RTM_DELLINK,
                    NlMsgType::RTM_GETLINK,
                ],
                IfInfoMsg {
                    ifi_family: self.family,
                    ifi_pad: 0,
                    ifi_type: s.link_type,
                    ifi_index: self.interface_index as i32,
                    ifi_flags: s.flags,
                    ifi_change: s.change,
                }
                .as_bytes()
                .to_vec(),
            ),
            Status::Address(s) => (
                [
                    NlMsgType::RTM_NEWADDR,
                    NlMsgType::RTM_DELADDR,
                    NlMsgType::RTM_GETADDR,
                ],
                IfAddrMsg {
                    ifa_family: self.family,
                    ifa_prefixlen: s.prefix_len,
                    ifa_flags: s.flags,
                    ifa_scope: s.scope,
                    ifa_index: self.interface_index,
                }
                .as_bytes()
                .to_vec(),
            ),
            Status::Route(_) if self.interface_index != 0 => {
                return Err(Error::NotEncodable(format!(
                    "route message with interface index {}; use RTA_OIF",
                    self.interface_index
                )));
            }
            Status::Route(s) => (
                [
                    NlMsgType::RTM_NEWROUTE,
                    NlMsgType::RTM_DELROUTE,
                    NlMsgType::RTM_GETROUTE,
                ],
                RtMsg {
                    rtm_family: self.family,
                    rtm_dst_len: s.dst_prefix,
                    rtm_src_len: s.src_prefix,
                    rtm_tos: 0,
                    rtm_table: s.table,
                    rtm_protocol: s.protocol,
                    rtm_scope: s.scope,
                    rtm_type: s.route_type,
                    rtm_flags: s.flags,
                }
                .as_bytes()
                .to_vec(),
            ),
            Status::Neighbor(s) => (
                [
                    NlMsgType::RTM_NEWNEIGH,
                    NlMsgType::RTM_DELNEIGH,
                    NlMsgType::RTM_GETNEIGH,
                ],
                NdMsg {
                    ndm_family: self.family,
                    ndm_pad1: 0,
                    ndm_pad2: 0,
                    ndm_ifindex: self.interface_index as i32,
                    ndm_state: s.state,
                    ndm_flags: s.flags,
                    ndm_type: s.neighbor_type,
                }
                .as_bytes()
                .to_vec(),
            ),
            Status::Rdnss(_) | Status::Dnssl | Status::Unknown => {
                return Err(Error::NotEncodable(format!(
                    "{:?} messages are receive-only",
                    self.message_type()
                )));
            }
        };
        let [new_type, del_type, get_type] = types;

        let mut builder = match self.mode {
            Mode::Get => {
                let mut builder = MessageBuilder::new(get_type, NLM_F_REQUEST | NLM_F_DUMP);
                builder.append(&RtGenMsg {
                    rtgen_family: self.family,
                });
                builder.set_seq(self.seq);
                builder.set_pid(self.pid);
                return Ok(builder.finish());
            }
            Mode::Add => MessageBuilder::new(new_type, self.flags),
            Mode::Delete => MessageBuilder::new(del_type, self.flags),
            Mode::Query => MessageBuilder::new(get_type, self.flags),
            Mode::Unknown => {
                return Err(Error::NotEncodable("message mode is unknown".into()));
            }
        };
        builder.set_seq(self.seq);
        builder.set_pid(self.pid);
        builder.append_bytes(&fixed);

        for (attr_type, value) in &self.attributes {
            builder.append_attr(*attr_type, value);
        }

        Ok(builder.finish())
    }
}

/// Map a netlink message type to its wire family and mode.
fn classify(nlmsg_type: u16, flags: u16) -> Result<(Body, Mode)> {
    let get_mode = if flags & NLM_F_DUMP == NLM_F_DUMP {
        Mode::Get
    } else {
        Mode::Query
    };
    let classified = match nlmsg_type {
        NlMsgType::RTM_NEWLINK => (Body::Link, Mode::Add),
        NlMsgType::RTM_DELLINK => (Body::Link, Mode::Delete),
        NlMsgType::RTM_GETLINK => (Body::Link, get_mode),
        NlMsgType::RTM_NEWADDR => (Body::Address, Mode::Add),
        NlMsgType::RTM_DELADDR => (Body::Address, Mode::Delete),
        NlMsgType::RTM_GETADDR => (Body::Address, get_mode),
        NlMsgType::RTM_NEWROUTE => (Body::Route, Mode::Add),
        NlMsgType::RTM_DELROUTE => (Body::Route, Mode::Delete),
        NlMsgType::RTM_GETROUTE => (Body::Route, get_mode),
        NlMsgType::RTM_NEWNEIGH => (Body::Neighbor, Mode::Add),
        NlMsgType::RTM_DELNEIGH => (Body::Neighbor, Mode::Delete),
        NlMsgType::RTM_GETNEIGH => (Body::Neighbor, get_mode),
        NlMsgType::RTM_NEWNDUSEROPT => (Body::NdUserOpt, Mode::Add),
        other => return Err(Error::UnknownType(other)),
    };
    Ok(classified)
}

/// ND option header: type, length in 8-octet units, reserved, lifetime.
fn nd_option_header(input: &mut &[u8]) -> PResult<(u8, u8, u32)> {
    let opt_type = be_u8.parse_next(input)?;
    let units = be_u8.parse_next(input)?;
    let _reserved = be_u16.parse_next(input)?;
    let lifetime = be_u32.parse_next(input)?;
    Ok((opt_type, units, lifetime))
}

fn rdnss_servers(input: &mut &[u8]) -> PResult<Vec<Ipv6Addr>> {
    repeat(
        0..,
        take(16usize).map(|raw: &[u8]| {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            Ipv6Addr::from(octets)
        }),
    )
    .parse_next(input)
}
