//! Neighbor cache entries - RFC 4861 Section 7.3.2

use crate::nd::routing::RouteId;
use crate::protocol::{IfIndex, Ipv6Packet, MacAddr};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::Ipv6Addr;
use std::time::Instant;

/// Neighbor entry state.
///
/// The ordering is meaningful: everything above `Incomplete` has a usable
/// link-layer address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NeighborState {
    /// Marked for prompt removal
    Purge,
    /// Freshly created, not yet classified
    NoState,
    /// Address resolution in progress, waiting for NA
    Incomplete,
    /// Recently confirmed reachability
    Reachable,
    /// Reachability is unknown, will probe on next use
    Stale,
    /// Used while stale, waiting before probing
    Delay,
    /// Unicast solicitation outstanding
    Probe,
}

impl NeighborState {
    /// Whether the entry holds a link-layer address that may be used for
    /// transmission.
    pub fn is_resolved(&self) -> bool {
        *self > NeighborState::Incomplete
    }
}

/// Stable handle to a neighbor entry.
///
/// The generation makes a handle to a freed entry fail to resolve even if
/// its arena slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    pub(crate) index: usize,
    pub(crate) generation: u64,
}

/// Bounded FIFO of packets awaiting address resolution.
#[derive(Debug, Default)]
pub struct HoldQueue {
    packets: VecDeque<Ipv6Packet>,
}

impl HoldQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `packet`, dropping from the front until at most `max`
    /// packets remain. Returns the dropped packets.
    pub fn push(&mut self, packet: Ipv6Packet, max: usize) -> Vec<Ipv6Packet> {
        self.packets.push_back(packet);
        let excess = self.packets.len().saturating_sub(max.max(1));
        self.packets.drain(..excess).collect()
    }

    /// Removes and returns all held packets, oldest first.
    pub fn take(&mut self) -> Vec<Ipv6Packet> {
        self.packets.drain(..).collect()
    }

    pub fn front(&self) -> Option<&Ipv6Packet> {
        self.packets.front()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// One neighbor cache entry.
#[derive(Debug)]
pub struct NeighborEntry {
    pub addr: Ipv6Addr,
    pub ifindex: IfIndex,
    pub state: NeighborState,
    pub link_addr: Option<MacAddr>,
    pub is_router: bool,
    /// Administrative entries are never aged or collected.
    pub permanent: bool,
    /// Solicitations sent in the current Incomplete/Probe round.
    pub asked: u32,
    /// Upper-layer reachability hints accepted since the last confirmation.
    pub by_hint: u32,
    /// Deadline of the pending timer, mirrored for introspection.
    pub expire: Option<Instant>,
    pub hold: HoldQueue,
    /// Host route owning this entry.
    pub route: RouteId,
}

impl NeighborEntry {
    /// Entry created on first use of a route.
    pub fn new(addr: Ipv6Addr, ifindex: IfIndex, route: RouteId) -> Self {
        Self {
            addr,
            ifindex,
            state: NeighborState::NoState,
            link_addr: None,
            is_router: false,
            permanent: false,
            asked: 0,
            by_hint: 0,
            expire: None,
            hold: HoldQueue::new(),
            route,
        }
    }

    /// Entry installed by administrative action. Starts reachable and is
    /// excluded from aging.
    pub fn permanent(
        addr: Ipv6Addr,
        ifindex: IfIndex,
        route: RouteId,
        link_addr: Option<MacAddr>,
    ) -> Self {
        Self {
            state: NeighborState::Reachable,
            link_addr,
            permanent: true,
            ..Self::new(addr, ifindex, route)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(n: u8) -> Ipv6Packet {
        Ipv6Packet::new(
            "2001:db8::1".parse().unwrap(),
            "2001:db8::2".parse().unwrap(),
            17,
            vec![n],
        )
    }

    #[test]
    fn test_state_ordering() {
        assert!(NeighborState::NoState < NeighborState::Incomplete);
        assert!(!NeighborState::Purge.is_resolved());
        assert!(!NeighborState::Incomplete.is_resolved());
        assert!(NeighborState::Reachable.is_resolved());
        assert!(NeighborState::Probe.is_resolved());
    }

    #[test]
    fn test_hold_queue_drops_oldest() {
        let mut queue = HoldQueue::new();
        assert!(queue.push(packet(1), 2).is_empty());
        assert!(queue.push(packet(2), 2).is_empty());

        let dropped = queue.push(packet(3), 2);
        assert_eq!(dropped, vec![packet(1)]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.front(), Some(&packet(2)));

        assert_eq!(queue.take(), vec![packet(2), packet(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_hold_queue_default_single_slot() {
        let mut queue = HoldQueue::new();
        queue.push(packet(1), 1);
        let dropped = queue.push(packet(2), 1);
        assert_eq!(dropped, vec![packet(1)]);
        assert_eq!(queue.take(), vec![packet(2)]);
    }

    #[test]
    fn test_permanent_entry() {
        let addr: Ipv6Addr = "fe80::1".parse().unwrap();
        let mac = MacAddr([0x02, 0, 0, 0, 0, 1]);
        let entry = NeighborEntry::permanent(addr, 1, RouteId(4), Some(mac));
        assert_eq!(entry.state, NeighborState::Reachable);
        assert_eq!(entry.asked, 0);
        assert!(entry.permanent);
        assert_eq!(entry.link_addr, Some(mac));
    }
}
