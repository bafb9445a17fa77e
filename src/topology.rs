use anyhow::{Result, bail};
use std::net::Ipv4Addr;
use tracing::{debug, info};

use crate::config::{SimulationConfig, TopologyFile};
use crate::packet::SINGLE_MASK;
use crate::router::{self, Router, RouterStatus};

/// One simulation: the routers that exist and the links between them.
///
/// This is the only registry; routers themselves know nothing beyond their
/// direct neighbors.
#[derive(Debug)]
pub struct Topology {
    config: SimulationConfig,
    routers: Vec<Router>,
    links: Vec<(Ipv4Addr, Ipv4Addr)>,
}

impl Topology {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            routers: Vec::new(),
            links: Vec::new(),
        }
    }

    pub fn from_file(file: &TopologyFile, config: SimulationConfig) -> Result<Self> {
        let mut topology = Self::new(config);
        for spec in &file.routers {
            topology.add_router(spec.name.clone(), spec.address, spec.mask)?;
        }
        for [a, b] in &file.links {
            topology.connect(*a, *b)?;
        }
        info!(routers = topology.routers.len(), links = topology.links.len(), "Topology built");
        Ok(topology)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn add_router(&mut self, name: impl Into<String>, address: Ipv4Addr, mask: Ipv4Addr) -> Result<Router> {
        if self.router(address).is_some() {
            bail!("a router with address {} already exists", address);
        }
        let router = Router::new(name, address, mask, &self.config);
        debug!(%address, "Router added");
        self.routers.push(router.clone());
        Ok(router)
    }

    /// Adds a host-mask router at the address following the highest one in use.
    pub fn add_next_router(&mut self) -> Result<Router> {
        let next = self
            .routers
            .iter()
            .map(|r| u32::from(r.address()))
            .max()
            .map_or(Some(1), |highest| highest.checked_add(1));
        let Some(address) = next.map(Ipv4Addr::from) else {
            bail!("address space exhausted");
        };
        self.add_router(address.to_string(), address, SINGLE_MASK)
    }

    pub fn router(&self, address: Ipv4Addr) -> Option<&Router> {
        self.routers.iter().find(|r| r.address() == address)
    }

    pub fn routers(&self) -> &[Router] {
        &self.routers
    }

    pub fn links(&self) -> &[(Ipv4Addr, Ipv4Addr)] {
        &self.links
    }

    pub fn is_connected(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        self.links.contains(&link_key(a, b))
    }

    /// Links two known routers. Returns `false` when they already were.
    pub fn connect(&mut self, a: Ipv4Addr, b: Ipv4Addr) -> Result<bool> {
        if a == b {
            bail!("cannot connect router {} to itself", a);
        }
        if self.is_connected(a, b) {
            return Ok(false);
        }
        let (Some(first), Some(second)) = (self.router(a), self.router(b)) else {
            bail!("cannot connect {} and {}: unknown router", a, b);
        };
        router::connect(first, second);
        self.links.push(link_key(a, b));
        debug!(%a, %b, "Link added");
        Ok(true)
    }

    pub fn start_all(&self) {
        for router in &self.routers {
            router.start();
        }
    }

    /// Starts a stopped router, otherwise flips whether it accepts packets.
    /// Returns the resulting accepting state.
    pub async fn toggle(&self, address: Ipv4Addr) -> Result<bool> {
        let Some(router) = self.router(address) else {
            bail!("unknown router {}", address);
        };
        let Some(status) = router.status().await else {
            bail!("router {} is no longer running", address);
        };
        if !status.running {
            router.start();
            return Ok(true);
        }
        router.set_accepting(!status.accepting);
        Ok(!status.accepting)
    }

    pub async fn statuses(&self) -> Vec<RouterStatus> {
        let mut statuses = Vec::with_capacity(self.routers.len());
        for router in &self.routers {
            if let Some(status) = router.status().await {
                statuses.push(status);
            }
        }
        statuses
    }
}

fn link_key(a: Ipv4Addr, b: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Renders a router's table as `destination [metric] next-hop` lines.
pub fn format_table(status: &RouterStatus) -> String {
    let state = match (status.running, status.accepting) {
        (false, _) => "stopped",
        (true, true) => "accepting",
        (true, false) => "paused",
    };
    let mut output = format!("{} ({}, {}):\n", status.address, status.name, state);
    if status.table.is_empty() {
        output.push_str("  (no routes)\n");
    }
    for entry in &status.table {
        let destination = entry
            .network()
            .map_or_else(|| entry.destination.to_string(), |network| network.to_string());
        output.push_str(&format!("  {:<18} [{:>2}]  {}\n", destination, entry.metric, entry.next_hop));
    }
    output
}
