//! Side effects requested by the engine
//!
//! The engine never transmits or calls out while mutating its tables. Each
//! operation returns the actions it wants performed, and the caller carries
//! them out afterwards.

use crate::nd::routing::RouteFlags;
use crate::protocol::{IfIndex, Ipv6Packet, MacAddr};
use std::net::Ipv6Addr;

/// Why a held packet could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreachableReason {
    /// Address resolution failed (ICMPv6 type 1 code 3)
    AddressUnreachable,
}

/// Kind of routing table change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    Add,
    Delete,
}

/// Result of an engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NdAction {
    /// Send a Neighbor Solicitation
    SendSolicitation {
        ifindex: IfIndex,
        /// Source address hint (source of the packet that triggered it)
        source: Option<Ipv6Addr>,
        target: Ipv6Addr,
        /// Unicast link destination for NUD probes, `None` for the
        /// solicited-node multicast group.
        link_dst: Option<MacAddr>,
    },
    /// Send a Neighbor Advertisement
    SendAdvertisement {
        ifindex: IfIndex,
        dst: Ipv6Addr,
        target: Ipv6Addr,
        router: bool,
        solicited: bool,
        override_flag: bool,
    },
    /// Hand a datagram to the link layer
    Transmit {
        ifindex: IfIndex,
        /// `None` on links without link-layer addressing
        link_dst: Option<MacAddr>,
        packet: Ipv6Packet,
    },
    /// Report a datagram as undeliverable to the upper layer
    ReportUnreachable {
        ifindex: IfIndex,
        packet: Ipv6Packet,
        reason: UnreachableReason,
    },
    /// Join a multicast group on an interface
    JoinMulticast { ifindex: IfIndex, group: Ipv6Addr },
    /// Leave a multicast group on an interface
    LeaveMulticast { ifindex: IfIndex, group: Ipv6Addr },
    /// Routing table changed (routing socket notification)
    RouteChanged {
        change: RouteChange,
        destination: Ipv6Addr,
        prefix_len: u8,
        gateway: Option<Ipv6Addr>,
        ifindex: IfIndex,
        flags: RouteFlags,
    },
}

impl NdAction {
    /// Interface the action applies to.
    pub fn ifindex(&self) -> IfIndex {
        match self {
            NdAction::SendSolicitation { ifindex, .. }
            | NdAction::SendAdvertisement { ifindex, .. }
            | NdAction::Transmit { ifindex, .. }
            | NdAction::ReportUnreachable { ifindex, .. }
            | NdAction::JoinMulticast { ifindex, .. }
            | NdAction::LeaveMulticast { ifindex, .. }
            | NdAction::RouteChanged { ifindex, .. } => *ifindex,
        }
    }
}
