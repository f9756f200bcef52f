//! Addressing and packet types consumed by the ND engine
//!
//! Wire encoding of ICMPv6 messages lives outside this crate; only the
//! fields the cache acts upon are modelled here.

pub mod packet;
pub mod types;

pub use packet::Ipv6Packet;
pub use types::*;
