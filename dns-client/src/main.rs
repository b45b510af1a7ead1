//! Command line front end: one query, answers printed one per line.
//!
//! `RUST_LOG=debug` shows the transport exchange.

use anyhow::{Context, Result};
use clap::Parser;
use dns_client::{Client, ClientConfig, RecordType, Resolver, DNS_PORT};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Query a DNS server: UDP first, TCP when the answer is truncated.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Name to query, or an address with --reverse.
    name: String,

    /// Record type (A, AAAA, MX, TXT, TYPE65, ...).
    #[arg(default_value = "A")]
    record_type: RecordType,

    /// Server to ask, `ip` or `ip:port`.
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Give up after this many milliseconds.
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Skip UDP and query over TCP only.
    #[arg(long)]
    tcp: bool,

    /// Look up the PTR name for an address.
    #[arg(short, long)]
    reverse: bool,
}

fn parse_server(server: &str) -> Result<SocketAddr> {
    if let Ok(addr) = server.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let ip: IpAddr = server
        .parse()
        .with_context(|| format!("invalid server address: {server}"))?;
    Ok(SocketAddr::new(ip, DNS_PORT))
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = ClientConfig {
        server: parse_server(&cli.server)?,
        timeout: cli.timeout_ms.map(Duration::from_millis),
        resolver: if cli.tcp {
            Resolver::Tcp
        } else {
            Resolver::default()
        },
    };
    log::info!("Querying {} via {:?}", config.server, config.resolver);
    let client = Client::from_config(config);

    if cli.reverse {
        let ip: IpAddr = cli
            .name
            .parse()
            .with_context(|| format!("invalid address: {}", cli.name))?;
        println!("{}", client.reverse(ip)?);
        return Ok(());
    }

    let response = client.resolve(&cli.name, cli.record_type)?;
    for record in response.answers() {
        println!("{}", record);
    }
    Ok(())
}
