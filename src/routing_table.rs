use ipnet::Ipv4Net;
use log::debug;
use std::net::Ipv4Addr;

use crate::protocol::RouteAdvertisement;

/// Hop count meaning "unreachable".
pub const INFINITY: u32 = 16;

/// Highest metric that still counts as a usable route.
pub const MAX_METRIC: u32 = INFINITY - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub metric: u32,
    pub next_hop: Ipv4Addr,
}

impl RouteEntry {
    pub fn is_reachable(&self) -> bool {
        self.metric <= MAX_METRIC
    }

    /// Destination and mask as a network, `None` for non-contiguous masks.
    pub fn network(&self) -> Option<Ipv4Net> {
        Ipv4Net::with_netmask(self.destination, self.mask).ok()
    }
}

/// Distance-vector table owned by a single router.
///
/// Entries keep their insertion order and are never removed; an expired route
/// stays in place at [`INFINITY`].
#[derive(Debug, Clone)]
pub struct RoutingTable {
    owner: Ipv4Addr,
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn new(owner: Ipv4Addr) -> Self {
        Self {
            owner,
            entries: Vec::new(),
        }
    }

    /// Merges a candidate route and reports whether the table changed.
    ///
    /// A strictly lower metric always wins. A candidate coming from the
    /// entry's current next hop overwrites the metric even when it is worse,
    /// which is how routes get invalidated by the neighbor that announced
    /// them. Anything else is ignored.
    pub fn add_entry(&mut self, destination: Ipv4Addr, mask: Ipv4Addr, metric: u32, next_hop: Ipv4Addr) -> bool {
        if destination == self.owner {
            return false;
        }
        let metric = metric.min(INFINITY);

        if let Some(entry) = self.entries.iter_mut().find(|e| e.destination == destination) {
            if metric < entry.metric {
                debug!("{}: route to {} improved {} -> {} via {}",
                       self.owner, destination, entry.metric, metric, next_hop);
                entry.metric = metric;
                entry.next_hop = next_hop;
                return true;
            }
            if entry.next_hop == next_hop && entry.metric != metric {
                debug!("{}: route to {} via {} now at metric {}",
                       self.owner, destination, next_hop, metric);
                entry.metric = metric;
                return true;
            }
            return false;
        }

        debug!("{}: new route to {} via {} metric {}", self.owner, destination, next_hop, metric);
        self.entries.push(RouteEntry {
            destination,
            mask,
            metric,
            next_hop,
        });
        true
    }

    /// Next hop towards `destination`, if a usable route exists.
    pub fn find_next_hop(&self, destination: Ipv4Addr) -> Option<Ipv4Addr> {
        self.get(destination)
            .filter(|entry| entry.is_reachable())
            .map(|entry| entry.next_hop)
    }

    /// Sets every route through `neighbor` to [`INFINITY`], returning how many
    /// were still reachable.
    pub fn invalidate_via(&mut self, neighbor: Ipv4Addr) -> usize {
        let mut invalidated = 0;
        for entry in self.entries.iter_mut().filter(|e| e.next_hop == neighbor) {
            if entry.metric != INFINITY {
                invalidated += 1;
            }
            entry.metric = INFINITY;
        }
        invalidated
    }

    pub fn advertisements(&self) -> impl Iterator<Item = RouteAdvertisement> + '_ {
        self.entries
            .iter()
            .map(|entry| RouteAdvertisement::new(entry.destination, entry.mask, entry.metric))
    }

    pub fn get(&self, destination: Ipv4Addr) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.destination == destination)
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
