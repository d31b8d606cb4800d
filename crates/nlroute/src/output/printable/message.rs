//! Printable implementation for RtnlMessage.

use std::io::Write;

use crate::netlink::rtnl_message::{Mode, RtnlMessage, Status};
use crate::netlink::types::addr::{IFA_ADDRESS, IFA_LOCAL};
use crate::netlink::types::route::{RTA_DST, RTA_GATEWAY, RTA_OIF, RTA_PRIORITY};
use crate::output::{OutputOptions, Printable};

use super::route::{protocol_name, scope_name};

fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Unknown => "unknown",
        Mode::Get => "get",
        Mode::Add => "add",
        Mode::Delete => "del",
        Mode::Query => "query",
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

impl Printable for RtnlMessage {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
        write!(w, "{} ", mode_name(self.mode))?;

        match &self.status {
            Status::Link(link) => {
                write!(
                    w,
                    "link {} type {} flags {:#x}",
                    self.interface_index, link.link_type, link.flags
                )?;
            }
            Status::Address(addr) => {
                write!(w, "address")?;
                if let Some(local) = self
                    .attribute_address(IFA_LOCAL)
                    .or_else(|| self.attribute_address(IFA_ADDRESS))
                {
                    write!(w, " {}/{}", local, addr.prefix_len)?;
                }
                write!(w, " dev {} scope {}", self.interface_index, scope_name(addr.scope))?;
            }
            Status::Route(route) => {
                write!(w, "route")?;
                match self.attribute_address(RTA_DST) {
                    Some(dst) => write!(w, " {}/{}", dst, route.dst_prefix)?,
                    None => write!(w, " default")?,
                }
                if let Some(gateway) = self.attribute_address(RTA_GATEWAY) {
                    write!(w, " via {}", gateway)?;
                }
                if let Some(oif) = self.attribute_u32(RTA_OIF) {
                    write!(w, " dev {}", oif)?;
                }
                write!(
                    w,
                    " proto {} scope {}",
                    protocol_name(route.protocol),
                    scope_name(route.scope)
                )?;
                if let Some(metric) = self.attribute_u32(RTA_PRIORITY) {
                    write!(w, " metric {}", metric)?;
                }
            }
            Status::Neighbor(neigh) => {
                write!(
                    w,
                    "neighbor dev {} family {} state {:#x}",
                    self.interface_index, self.family, neigh.state
                )?;
            }
            Status::Rdnss(rdnss) => {
                write!(w, "rdnss dev {} lifetime {}", self.interface_index, rdnss.lifetime)?;
                for server in &rdnss.addresses {
                    write!(w, " {}", server)?;
                }
            }
            Status::Dnssl => write!(w, "dnssl dev {}", self.interface_index)?,
            Status::Unknown => write!(w, "unknown")?,
        }

        if opts.details {
            write!(w, " seq {} pid {}", self.seq, self.pid)?;
            for (attr_type, data) in self.attributes() {
                write!(w, " [{}: {}]", attr_type, hex(data))?;
            }
        }

        writeln!(w)?;

        Ok(())
    }

    fn to_json(&self) -> serde_json::Value {
        let attributes: serde_json::Map<String, serde_json::Value> = self
            .attributes()
            .map(|(attr_type, data)| (attr_type.to_string(), serde_json::json!(hex(data))))
            .collect();

        serde_json::json!({
            "type": self.message_type(),
            "mode": self.mode,
            "seq": self.seq,
            "pid": self.pid,
            "family": self.family,
            "ifindex": self.interface_index,
            "status": self.status,
            "attributes": attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::rtnl_message::{MessageType, RdnssOption, RouteStatus};
    use crate::netlink::types::family::{AF_INET, AF_INET6};
    use crate::netlink::types::route::{rt_proto, rt_scope, rtn};

    fn route() -> RtnlMessage {
        let mut msg = RtnlMessage::new(MessageType::Route, Mode::Add, 0, 9, 0, 0, AF_INET);
        msg.status = Status::Route(RouteStatus::new(
            0,
            0,
            254,
            rt_proto::BOOT,
            rt_scope::UNIVERSE,
            rtn::UNICAST,
            0,
        ));
        msg.set_attribute(RTA_DST, vec![0, 0, 0, 0]);
        msg.set_attribute(RTA_GATEWAY, vec![192, 168, 1, 254]);
        msg.set_attribute(RTA_OIF, 3u32.to_ne_bytes().to_vec());
        msg.set_attribute(RTA_PRIORITY, 10u32.to_ne_bytes().to_vec());
        msg
    }

    #[test]
    fn test_route_text() {
        let mut out = Vec::new();
        route().print_text(&mut out, &OutputOptions::default()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "add route 0.0.0.0/0 via 192.168.1.254 dev 3 proto boot scope global metric 10\n"
        );
    }

    #[test]
    fn test_route_json() {
        let json = route().to_json();
        assert_eq!(json["type"], "route");
        assert_eq!(json["mode"], "add");
        assert_eq!(json["seq"], 9);
        assert_eq!(json["status"]["table"], 254);
        assert_eq!(json["status"]["protocol"], rt_proto::BOOT);
        assert_eq!(json["attributes"]["5"], "c0a801fe");
    }

    #[test]
    fn test_rdnss_text() {
        let mut msg = RtnlMessage::new(MessageType::Rdnss, Mode::Add, 0, 0, 0, 2, AF_INET6);
        msg.status = Status::Rdnss(RdnssOption {
            lifetime: 600,
            addresses: vec!["2001:db8::53".parse().unwrap()],
        });

        let mut out = Vec::new();
        msg.print_text(&mut out, &OutputOptions::default()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "add rdnss dev 2 lifetime 600 2001:db8::53\n"
        );
    }
}
