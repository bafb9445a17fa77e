use std::net::Ipv4Addr;

use crate::protocol::RipMessage;

pub const RIP_PORT: u16 = 520;
pub const BROADCAST: Ipv4Addr = Ipv4Addr::BROADCAST;
pub const SINGLE_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// Hop budget given to every freshly built packet.
pub const DEFAULT_HOP_BUDGET: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Rip(RipMessage),
    Data(Vec<u8>),
}

/// Envelope moved between router mailboxes.
///
/// `sender` is rewritten by whichever router originates or re-floods the
/// packet, so callers never need to fill it in themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub port: u16,
    pub destination: Ipv4Addr,
    pub sender: Ipv4Addr,
    pub hop_budget: u32,
    pub payload: Payload,
}

impl Packet {
    pub fn new(payload: Payload, destination: Ipv4Addr, port: u16) -> Self {
        Self {
            port,
            destination,
            sender: Ipv4Addr::UNSPECIFIED,
            hop_budget: DEFAULT_HOP_BUDGET,
            payload,
        }
    }

    pub fn rip(message: RipMessage, destination: Ipv4Addr) -> Self {
        Self::new(Payload::Rip(message), destination, RIP_PORT)
    }

    pub fn data(destination: Ipv4Addr, port: u16, data: impl Into<Vec<u8>>) -> Self {
        Self::new(Payload::Data(data.into()), destination, port)
    }

    pub fn with_hop_budget(mut self, hop_budget: u32) -> Self {
        self.hop_budget = hop_budget;
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST
    }

    pub fn is_protocol(&self) -> bool {
        self.port == RIP_PORT
    }

    pub fn rip_message(&self) -> Option<&RipMessage> {
        match &self.payload {
            Payload::Rip(message) => Some(message),
            Payload::Data(_) => None,
        }
    }

    pub fn data_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Data(data) => Some(data),
            Payload::Rip(_) => None,
        }
    }
}
