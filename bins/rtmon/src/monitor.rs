//! rtmon monitor - dump and follow rtnetlink events.

use std::rc::Rc;

use anyhow::Context;
use clap::{Args, ValueEnum};
use nlroute::netlink::rtnetlink_groups::{self as groups, mask};
use nlroute::netlink::{Rtnl, RtnlHandler, RtnlListener, request_flags};
use nlroute::output::{OutputFormat, OutputOptions, Printable};

/// Event categories that can be monitored.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Object {
    /// Interfaces created, changed or removed.
    Link,
    /// Addresses added or removed.
    Address,
    /// Routes added or removed.
    Route,
    /// ARP/NDP cache changes, including bridge FDB entries.
    Neigh,
    /// DNS servers from router advertisements.
    Rdnss,
    /// Everything above.
    All,
}

impl Object {
    /// Multicast groups carrying this category.
    fn groups(self) -> Vec<u32> {
        match self {
            Self::Link => vec![groups::RTNLGRP_LINK],
            Self::Address => vec![groups::RTNLGRP_IPV4_IFADDR, groups::RTNLGRP_IPV6_IFADDR],
            Self::Route => vec![groups::RTNLGRP_IPV4_ROUTE, groups::RTNLGRP_IPV6_ROUTE],
            Self::Neigh => vec![groups::RTNLGRP_NEIGH],
            Self::Rdnss => vec![groups::RTNLGRP_ND_USEROPT],
            Self::All => [Self::Link, Self::Address, Self::Route, Self::Neigh, Self::Rdnss]
                .iter()
                .flat_map(|o| o.groups())
                .collect(),
        }
    }

    /// Listener interest for this category.
    fn interest(self) -> u32 {
        match self {
            Self::Link => request_flags::LINK,
            Self::Address => request_flags::ADDR,
            Self::Route => request_flags::ROUTE,
            Self::Neigh => request_flags::NEIGHBOR | request_flags::BRIDGE_NEIGHBOR,
            Self::Rdnss => request_flags::RDNSS,
            Self::All => u32::MAX,
        }
    }

    /// Dump categories for the initial state. RDNSS has no dump.
    fn dump(self) -> u32 {
        match self {
            Self::Rdnss => 0,
            Self::All => {
                request_flags::LINK
                    | request_flags::ADDR
                    | request_flags::ROUTE
                    | request_flags::NEIGHBOR
            }
            other => other.interest(),
        }
    }
}

#[derive(Args)]
pub struct MonitorCmd {
    /// Event categories to monitor.
    #[arg(default_value = "all")]
    objects: Vec<Object>,

    /// Skip the initial dump and only show changes.
    #[arg(long)]
    no_dump: bool,
}

impl MonitorCmd {
    pub async fn run(
        &self,
        handler: &Rc<RtnlHandler>,
        format: OutputFormat,
        opts: OutputOptions,
    ) -> anyhow::Result<()> {
        let group_list: Vec<u32> = self.objects.iter().flat_map(|o| o.groups()).collect();
        let interest = self.objects.iter().fold(0, |acc, o| acc | o.interest());
        let dump = self.objects.iter().fold(0, |acc, o| acc | o.dump());

        let _listener = RtnlListener::new(handler.clone(), interest, move |msg| {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = msg.print(&mut stdout, format, &opts) {
                tracing::warn!("failed to write event: {}", e);
            }
        });

        handler
            .start(mask(&group_list))
            .context("failed to open rtnetlink socket")?;
        if !self.no_dump {
            handler.request_dump(dump);
        }

        eprintln!("Monitoring rtnetlink events (Ctrl+C to stop)...");

        tokio::select! {
            res = handler.try_run() => res.context("rtnetlink socket read failed")?,
            _ = tokio::signal::ctrl_c() => {}
        }

        Ok(())
    }
}
