pub mod config;
pub mod packet;
pub mod protocol;
pub mod router;
pub mod routing_table;
pub mod topology;

pub use config::{RouterSpec, SimulationConfig, TopologyFile};
pub use packet::{BROADCAST, DEFAULT_HOP_BUDGET, Packet, Payload, RIP_PORT, SINGLE_MASK};
pub use protocol::{Command, RipMessage, RouteAdvertisement};
pub use router::{PacketListener, Router, RouterStatus, connect};
pub use routing_table::{INFINITY, RouteEntry, RoutingTable};
pub use topology::{Topology, format_table};
