//! rtmon routes / route-to - routing table inspection.

use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Args;
use nlroute::netlink::rtnetlink_groups::{self as groups, mask};
use nlroute::netlink::RtnlHandler;
use nlroute::netlink::types::route::rt_table;
use nlroute::output::{OutputFormat, OutputOptions, Printable, write_timestamp};
use nlroute::routing::{QueryCallback, RouteTag, RoutingTable, RoutingTableEntry};
use nlroute::util::addr::IpPrefix;
use tokio::sync::oneshot;

#[derive(Args)]
pub struct RoutesCmd {
    /// Only show routes of this interface.
    #[arg(long)]
    dev: Option<String>,

    /// How long to collect the route dump, in milliseconds.
    #[arg(long, default_value_t = 500)]
    wait_ms: u64,
}

impl RoutesCmd {
    pub async fn run(
        &self,
        handler: &Rc<RtnlHandler>,
        format: OutputFormat,
        opts: OutputOptions,
    ) -> anyhow::Result<()> {
        let only = match &self.dev {
            Some(name) => Some(handler.get_interface_index(name)?),
            None => None,
        };

        handler
            .start(mask(&[groups::RTNLGRP_IPV4_ROUTE, groups::RTNLGRP_IPV6_ROUTE]))
            .context("failed to open rtnetlink socket")?;

        let table = Rc::new(RoutingTable::new(handler.clone()));
        table.start();

        tokio::select! {
            res = handler.try_run() => res.context("rtnetlink socket read failed")?,
            _ = tokio::time::sleep(Duration::from_millis(self.wait_ms)) => {}
        }
        table.stop();

        let mut stdout = std::io::stdout().lock();
        for (index, entries) in table.snapshot() {
            if only.is_some_and(|only| only != index) {
                continue;
            }
            for entry in &entries {
                print_entry(&mut stdout, index, entry, format, &opts)?;
            }
        }

        Ok(())
    }
}

#[derive(Args)]
pub struct RouteToCmd {
    /// Destination address or prefix.
    destination: String,

    /// Restrict the lookup to this output interface.
    #[arg(long)]
    dev: Option<String>,

    /// Tag for the installed route.
    #[arg(long, default_value_t = 1)]
    tag: RouteTag,

    /// Table the resolved route is installed in.
    #[arg(long, default_value_t = rt_table::MAIN)]
    table: u8,

    /// How long to wait for the kernel's answer, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,

    /// Leave the installed route in place on exit.
    #[arg(long)]
    keep: bool,
}

impl RouteToCmd {
    pub async fn run(
        &self,
        handler: &Rc<RtnlHandler>,
        format: OutputFormat,
        opts: OutputOptions,
    ) -> anyhow::Result<()> {
        let destination = parse_destination(&self.destination)?;
        let interface_index = match &self.dev {
            Some(name) => Some(handler.get_interface_index(name)?),
            None => None,
        };

        handler.start(0).context("failed to open rtnetlink socket")?;

        let table = Rc::new(RoutingTable::new(handler.clone()));
        table.start();

        let (tx, rx) = oneshot::channel::<(u32, RoutingTableEntry)>();
        let callback: QueryCallback = Box::new(move |index, entry| {
            let _ = tx.send((index, entry.clone()));
        });

        if !table.request_route_to_host(
            &destination,
            interface_index,
            self.tag,
            Some(callback),
            self.table,
        ) {
            bail!("failed to send route query for {}", destination);
        }

        let (index, entry) = tokio::select! {
            res = handler.try_run() => {
                res.context("rtnetlink socket read failed")?;
                bail!("rtnetlink handler stopped before the route was resolved");
            }
            answer = tokio::time::timeout(Duration::from_millis(self.timeout_ms), rx) => {
                answer
                    .context("timed out waiting for the kernel's answer")?
                    .context("route query was dropped without an answer")?
            }
        };

        print_entry(&mut std::io::stdout().lock(), index, &entry, format, &opts)?;

        if !self.keep {
            table.flush_routes_with_tag(self.tag);
        }
        table.stop();

        Ok(())
    }
}

/// Parse an address or prefix; a bare address is a host prefix.
fn parse_destination(s: &str) -> anyhow::Result<IpPrefix> {
    s.parse::<IpPrefix>()
        .with_context(|| format!("invalid destination \"{}\"", s))
}

fn print_entry<W: Write>(
    w: &mut W,
    index: u32,
    entry: &RoutingTableEntry,
    format: OutputFormat,
    opts: &OutputOptions,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            write_timestamp(w, opts)?;
            write!(w, "{}: ", index)?;
            entry.print_text(w, opts)?;
        }
        OutputFormat::Json => {
            let mut json = entry.to_json();
            json["ifindex"] = serde_json::json!(index);
            if opts.pretty {
                serde_json::to_writer_pretty(&mut *w, &json)?;
            } else {
                serde_json::to_writer(&mut *w, &json)?;
            }
            writeln!(w)?;
        }
    }
    Ok(())
}
