//! rtmon - rtnetlink event monitor and routing table inspector.

mod monitor;
mod routes;

use std::rc::Rc;

use clap::{Parser, Subcommand};
use nlroute::netlink::{HandlerConfig, RtnlHandler};
use nlroute::output::{OutputFormat, OutputOptions};

#[derive(Parser)]
#[command(name = "rtmon", version, about = "Rtnetlink monitor and routing table inspector")]
struct Cli {
    /// Output JSON.
    #[arg(short = 'j', long, global = true)]
    json: bool,

    /// Pretty print JSON.
    #[arg(short = 'p', long, global = true)]
    pretty: bool,

    /// Show details.
    #[arg(short = 'd', long, global = true)]
    details: bool,

    /// Label text lines with timestamps.
    #[arg(short = 't', long, global = true)]
    timestamp: bool,

    /// Socket receive buffer size in bytes.
    #[arg(long, global = true)]
    rx_buf_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dump and follow rtnetlink events.
    #[command(visible_alias = "m", visible_alias = "mon")]
    Monitor(monitor::MonitorCmd),

    /// Show the routes the routing table mirrors.
    #[command(visible_alias = "r")]
    Routes(routes::RoutesCmd),

    /// Ask the kernel for the route to a host.
    RouteTo(routes::RouteToCmd),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let opts = OutputOptions {
        details: cli.details,
        pretty: cli.pretty,
        timestamp: cli.timestamp,
    };

    let mut config = HandlerConfig::new();
    if let Some(size) = cli.rx_buf_size {
        config = config.with_rx_buf_size(size);
    }
    let handler = Rc::new(RtnlHandler::new(config));

    let result = match cli.command {
        Command::Monitor(cmd) => cmd.run(&handler, format, opts).await,
        Command::Routes(cmd) => cmd.run(&handler, format, opts).await,
        Command::RouteTo(cmd) => cmd.run(&handler, format, opts).await,
    };
    handler.stop();

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
