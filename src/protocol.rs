use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::routing_table::INFINITY;

/// Most advertisements a single message may carry.
pub const MAX_ENTRIES: usize = 25;

pub const RIP_VERSION: u8 = 2;
pub const ADDRESS_FAMILY_INET: u16 = 2;

const HEADER_LEN: usize = 4;
const ENTRY_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Request = 1,
    Response = 2,
}

impl TryFrom<u8> for Command {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Command::Request),
            2 => Ok(Command::Response),
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteAdvertisement {
    pub family: u16,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub metric: u32,
}

impl RouteAdvertisement {
    pub fn new(address: Ipv4Addr, mask: Ipv4Addr, metric: u32) -> Self {
        Self {
            family: ADDRESS_FAMILY_INET,
            address,
            mask,
            metric,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("message shorter than the 4 byte header ({0} bytes)")]
    Truncated(usize),
    #[error("unknown command {0}")]
    UnknownCommand(u8),
    #[error("unsupported version {0}")]
    UnsupportedVersion(u8),
    #[error("entry section of {0} bytes is not a multiple of 20")]
    RaggedEntries(usize),
    #[error("{0} entries exceed the limit of 25")]
    TooManyEntries(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipMessage {
    pub command: Command,
    entries: Vec<RouteAdvertisement>,
}

impl RipMessage {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            entries: Vec::new(),
        }
    }

    /// The "send me your whole table" request: one family-0 entry at infinity.
    pub fn whole_table_request() -> Self {
        let mut message = Self::new(Command::Request);
        message.push(RouteAdvertisement {
            family: 0,
            address: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            metric: INFINITY,
        });
        message
    }

    /// Splits advertisements into Response messages of at most
    /// [`MAX_ENTRIES`] each. Nothing to advertise yields no messages.
    pub fn responses<I>(advertisements: I) -> Vec<RipMessage>
    where
        I: IntoIterator<Item = RouteAdvertisement>,
    {
        let mut messages: Vec<RipMessage> = Vec::new();
        for advertisement in advertisements {
            if messages.last().is_none_or(RipMessage::is_full) {
                messages.push(RipMessage::new(Command::Response));
            }
            if let Some(current) = messages.last_mut() {
                current.push(advertisement);
            }
        }
        messages
    }

    /// Appends an advertisement, refusing it once the message is full.
    pub fn push(&mut self, advertisement: RouteAdvertisement) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(advertisement);
        true
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_ENTRIES
    }

    pub fn entries(&self) -> &[RouteAdvertisement] {
        &self.entries
    }

    pub fn is_whole_table_request(&self) -> bool {
        self.command == Command::Request
            && self.entries.len() == 1
            && self.entries[0].family == 0
            && self.entries[0].metric > 15
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + ENTRY_LEN * self.entries.len());
        buf.put_u8(self.command as u8);
        buf.put_u8(RIP_VERSION);
        buf.put_u16(0);
        for entry in &self.entries {
            buf.put_u16(entry.family);
            buf.put_u16(0); // route tag
            buf.put_u32(u32::from(entry.address));
            buf.put_u32(u32::from(entry.mask));
            buf.put_u32(0); // next hop: the sender itself
            buf.put_u32(entry.metric);
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < HEADER_LEN {
            return Err(WireError::Truncated(data.len()));
        }
        let mut buf = data;
        let command = Command::try_from(buf.get_u8())?;
        let version = buf.get_u8();
        if !(1..=RIP_VERSION).contains(&version) {
            return Err(WireError::UnsupportedVersion(version));
        }
        buf.advance(2);

        if buf.remaining() % ENTRY_LEN != 0 {
            return Err(WireError::RaggedEntries(buf.remaining()));
        }
        let count = buf.remaining() / ENTRY_LEN;
        if count > MAX_ENTRIES {
            return Err(WireError::TooManyEntries(count));
        }

        let mut message = RipMessage::new(command);
        for _ in 0..count {
            let family = buf.get_u16();
            buf.advance(2);
            let address = Ipv4Addr::from(buf.get_u32());
            let mask = Ipv4Addr::from(buf.get_u32());
            buf.advance(4);
            let metric = buf.get_u32();
            message.push(RouteAdvertisement {
                family,
                address,
                mask,
                metric,
            });
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement(n: u32) -> RouteAdvertisement {
        RouteAdvertisement::new(Ipv4Addr::from(0x0a00_0000 + n), Ipv4Addr::BROADCAST, n % 16)
    }

    #[test]
    fn forty_routes_need_two_responses() {
        let messages = RipMessage::responses((1..=40).map(advertisement));
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].entries().len(), 25);
        assert_eq!(messages[1].entries().len(), 15);
        assert!(messages.iter().all(|m| m.command == Command::Response));
        assert_eq!(messages[1].entries()[0], advertisement(26));
    }

    #[test]
    fn exactly_full_table_fits_one_response() {
        let messages = RipMessage::responses((1..=25).map(advertisement));
        assert_eq!(messages.len(), 1);
        assert!(RipMessage::responses(std::iter::empty()).is_empty());
    }

    #[test]
    fn push_refuses_the_twenty_sixth_entry() {
        let mut message = RipMessage::new(Command::Response);
        for n in 0..25 {
            assert!(message.push(advertisement(n)));
        }
        assert!(!message.push(advertisement(99)));
        assert_eq!(message.entries().len(), MAX_ENTRIES);
    }

    #[test]
    fn whole_table_sentinel_is_recognised() {
        assert!(RipMessage::whole_table_request().is_whole_table_request());

        let mut partial = RipMessage::new(Command::Request);
        partial.push(advertisement(3));
        assert!(!partial.is_whole_table_request());

        let mut low_metric = RipMessage::new(Command::Request);
        low_metric.push(RouteAdvertisement {
            family: 0,
            address: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            metric: 15,
        });
        assert!(!low_metric.is_whole_table_request());

        let mut response = RipMessage::whole_table_request();
        response.command = Command::Response;
        assert!(!response.is_whole_table_request());
    }

    #[test]
    fn request_encodes_to_rfc_layout() {
        let bytes = RipMessage::whole_table_request().encode();
        assert_eq!(
            &bytes[..],
            &[
                1, 2, 0, 0, // header
                0, 0, 0, 0, // family, tag
                0, 0, 0, 0, // address
                0, 0, 0, 0, // mask
                0, 0, 0, 0, // next hop
                0, 0, 0, 16, // metric
            ]
        );
    }

    #[test]
    fn response_decodes_back() {
        let mut message = RipMessage::new(Command::Response);
        message.push(RouteAdvertisement::new(
            Ipv4Addr::new(10, 0, 0, 3),
            Ipv4Addr::new(255, 255, 255, 0),
            4,
        ));
        let bytes = message.encode();
        assert_eq!(bytes.len(), HEADER_LEN + ENTRY_LEN);
        assert_eq!(RipMessage::decode(&bytes), Ok(message));
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert_eq!(RipMessage::decode(&[2, 2]), Err(WireError::Truncated(2)));
        assert_eq!(RipMessage::decode(&[9, 2, 0, 0]), Err(WireError::UnknownCommand(9)));
        assert_eq!(RipMessage::decode(&[2, 7, 0, 0]), Err(WireError::UnsupportedVersion(7)));
        assert_eq!(
            RipMessage::decode(&[2, 2, 0, 0, 1, 2, 3]),
            Err(WireError::RaggedEntries(3))
        );

        let mut oversized = vec![2u8, 2, 0, 0];
        oversized.extend(vec![0u8; ENTRY_LEN * 26]);
        assert_eq!(RipMessage::decode(&oversized), Err(WireError::TooManyEntries(26)));
    }
}
