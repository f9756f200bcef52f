//! Outbound IPv6 datagrams as seen by the neighbor cache

use std::net::Ipv6Addr;

/// An IPv6 datagram handed to the resolver for transmission.
///
/// The header fields the cache needs are kept alongside the raw bytes so
/// that an unreachable report can be built from this packet's own
/// addressing, never from some other packet held on the same entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv6Packet {
    pub source: Ipv6Addr,
    pub destination: Ipv6Addr,
    pub next_header: u8,
    /// Full datagram including the IPv6 header.
    pub data: Vec<u8>,
}

impl Ipv6Packet {
    pub fn new(source: Ipv6Addr, destination: Ipv6Addr, next_header: u8, data: Vec<u8>) -> Self {
        Self {
            source,
            destination,
            next_header,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
