use anyhow::{Context, Result, bail};
use clap::Parser;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::runtime::Builder;
use tracing::{info, warn};

use rip_sim::{Packet, SimulationConfig, Topology, TopologyFile, format_table};

#[derive(Parser)]
#[command(name = "rip-sim", about = "Simulate routers exchanging RIP updates")]
struct Cli {
    /// JSON topology file; without it a chain of routers is built
    #[arg(long)]
    topology: Option<String>,

    /// Length of the default chain (10.0.0.1, 10.0.0.2, ...)
    #[arg(long, default_value_t = 3)]
    chain: u32,

    /// JSON simulation config (timers, mailbox size)
    #[arg(long)]
    config: Option<String>,

    /// Seconds to let routes converge before sending traffic
    #[arg(long, default_value_t = 10)]
    settle: u64,

    /// Traffic to inject, as FROM:TO (TO may be 255.255.255.255)
    #[arg(long = "send", value_parser = parse_flow)]
    sends: Vec<(Ipv4Addr, Ipv4Addr)>,

    #[arg(long, default_value = "data")]
    message: String,

    #[arg(long, default_value_t = 80)]
    port: u16,

    /// Routers to pause right after start
    #[arg(long = "pause")]
    paused: Vec<Ipv4Addr>,
}

fn parse_flow(value: &str) -> Result<(Ipv4Addr, Ipv4Addr), String> {
    let (from, to) = value
        .split_once(':')
        .ok_or_else(|| format!("expected FROM:TO, got {value:?}"))?;
    let from = from.parse::<Ipv4Addr>().map_err(|e| format!("bad source {from:?}: {e}"))?;
    let to = to.parse::<Ipv4Addr>().map_err(|e| format!("bad destination {to:?}: {e}"))?;
    Ok((from, to))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SimulationConfig::load(path).with_context(|| format!("loading config {path}"))?,
        None => SimulationConfig::default(),
    };
    let file = match &cli.topology {
        Some(path) => TopologyFile::load(path).with_context(|| format!("loading topology {path}"))?,
        None => TopologyFile::chain(cli.chain),
    };

    let rt = Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(cli, config, file))
}

async fn run(cli: Cli, config: SimulationConfig, file: TopologyFile) -> Result<()> {
    let topology = Topology::from_file(&file, config)?;

    for router in topology.routers() {
        let address = router.address();
        router.add_receive_listener(move |packet| {
            info!(router = %address, from = %packet.sender, port = packet.port, "Packet received");
        });
        router.add_forward_listener(move |packet| {
            info!(router = %address, to = %packet.destination, "Packet forwarded");
        });
    }

    topology.start_all();
    for address in &cli.paused {
        let Some(router) = topology.router(*address) else {
            bail!("cannot pause unknown router {}", address);
        };
        router.set_accepting(false);
    }

    info!("Letting routes settle for {}s", cli.settle);
    tokio::time::sleep(Duration::from_secs(cli.settle)).await;

    for (from, to) in &cli.sends {
        let Some(router) = topology.router(*from) else {
            bail!("cannot send from unknown router {}", from);
        };
        let packet = Packet::data(*to, cli.port, cli.message.as_bytes());
        if router.send(packet).await {
            info!(%from, %to, "Packet sent");
        } else {
            warn!(%from, %to, "No route, packet not sent");
        }
    }

    // one more tick so injected traffic shows up in the log before the tables
    tokio::time::sleep(topology.config().tick()).await;

    for status in topology.statuses().await {
        print!("{}", format_table(&status));
    }

    Ok(())
}
