use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::packet::SINGLE_MASK;

/// Timing and sizing shared by every router of a simulation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub tick_millis: u64,
    /// Ticks between two full-table broadcasts, before jitter.
    pub update_interval: u32,
    /// Extra random ticks added to each countdown, drawn from `0..update_jitter`.
    pub update_jitter: u32,
    pub mailbox_capacity: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            update_interval: 2,
            update_jitter: 2,
            mailbox_capacity: 256,
        }
    }
}

impl SimulationConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: SimulationConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_millis == 0 {
            anyhow::bail!("tick_millis must be positive");
        }
        if self.mailbox_capacity == 0 {
            anyhow::bail!("mailbox_capacity must be positive");
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    /// Silence after which a neighbor's routes are set to infinity.
    pub fn expiry_threshold(&self) -> Duration {
        self.tick() * (2 * self.update_interval + self.update_jitter)
    }

    /// Fresh countdown, in ticks, until the next full-table broadcast.
    pub fn next_countdown(&self) -> u32 {
        let jitter = if self.update_jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..self.update_jitter)
        };
        self.update_interval + jitter
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouterSpec {
    pub name: String,
    pub address: Ipv4Addr,
    #[serde(default = "default_mask")]
    pub mask: Ipv4Addr,
}

fn default_mask() -> Ipv4Addr {
    SINGLE_MASK
}

/// Routers and undirected links to build a [`crate::topology::Topology`] from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopologyFile {
    pub routers: Vec<RouterSpec>,
    #[serde(default)]
    pub links: Vec<[Ipv4Addr; 2]>,
}

impl TopologyFile {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let topology: TopologyFile = serde_json::from_str(&content)?;
        Ok(topology)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// A line of `count` routers at 10.0.0.1, 10.0.0.2, ...
    pub fn chain(count: u32) -> Self {
        let addresses: Vec<Ipv4Addr> = (1..=count)
            .map(|n| Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 0)) + n))
            .collect();
        let routers = addresses
            .iter()
            .map(|address| RouterSpec {
                name: format!("r{}", address.octets()[3]),
                address: *address,
                mask: SINGLE_MASK,
            })
            .collect();
        let links = addresses.windows(2).map(|pair| [pair[0], pair[1]]).collect();
        Self { routers, links }
    }
}
