//! Printable implementation for RoutingTableEntry.

use std::borrow::Cow;
use std::io::Write;

use crate::netlink::types::route::{rt_proto, rt_scope, rt_table};
use crate::output::{OutputOptions, Printable};
use crate::routing::RoutingTableEntry;

/// Name of an RT_SCOPE_* value, or the number.
pub fn scope_name(scope: u8) -> Cow<'static, str> {
    match scope {
        rt_scope::UNIVERSE => "global".into(),
        rt_scope::SITE => "site".into(),
        rt_scope::LINK => "link".into(),
        rt_scope::HOST => "host".into(),
        rt_scope::NOWHERE => "nowhere".into(),
        other => other.to_string().into(),
    }
}

/// Name of an RTPROT_* value, or the number.
pub fn protocol_name(protocol: u8) -> Cow<'static, str> {
    match protocol {
        rt_proto::UNSPEC => "unspec".into(),
        rt_proto::REDIRECT => "redirect".into(),
        rt_proto::KERNEL => "kernel".into(),
        rt_proto::BOOT => "boot".into(),
        rt_proto::STATIC => "static".into(),
        other => other.to_string().into(),
    }
}

/// Name of a well-known routing table, or the number.
pub fn table_name(table: u8) -> Cow<'static, str> {
    match table {
        rt_table::UNSPEC => "unspec".into(),
        rt_table::DEFAULT => "default".into(),
        rt_table::MAIN => "main".into(),
        rt_table::LOCAL => "local".into(),
        other => other.to_string().into(),
    }
}

impl Printable for RoutingTableEntry {
    fn print_text<W: Write>(&self, w: &mut W, opts: &OutputOptions) -> std::io::Result<()> {
        if self.dst.prefix_len() == 0 {
            write!(w, "default")?;
        } else {
            write!(w, "{}", self.dst)?;
        }

        if !self.src.is_default() {
            write!(w, " from {}", self.src)?;
        }

        if self.has_gateway() {
            write!(w, " via {}", self.gateway)?;
        }

        if self.table != rt_table::MAIN {
            write!(w, " table {}", table_name(self.table))?;
        }

        if self.scope != rt_scope::UNIVERSE {
            write!(w, " scope {}", scope_name(self.scope))?;
        }

        write!(w, " metric {}", self.metric)?;

        if let Some(tag) = self.tag {
            write!(w, " tag {}", tag)?;
        }

        if opts.details {
            write!(w, " {}", if self.from_rtnl { "kernel" } else { "local" })?;
        }

        writeln!(w)?;

        Ok(())
    }

    fn to_json(&self) -> serde_json::Value {
        let dst = if self.dst.prefix_len() == 0 {
            "default".to_string()
        } else {
            self.dst.to_string()
        };
        let mut obj = serde_json::json!({
            "dst": dst,
            "metric": self.metric,
            "scope": scope_name(self.scope),
            "table": table_name(self.table),
            "from_kernel": self.from_rtnl,
        });

        if !self.src.is_default() {
            obj["src"] = serde_json::json!(self.src.to_string());
        }

        if self.has_gateway() {
            obj["gateway"] = serde_json::json!(self.gateway.to_string());
        }

        if let Some(tag) = self.tag {
            obj["tag"] = serde_json::json!(tag);
        }

        obj
    }
}
