//! Next-hop resolution and output - RFC 4861 Section 7.2.2 and 7.3.3

use crate::error::{Error, Result};
use crate::nd::action::NdAction;
use crate::nd::engine::NdEngine;
use crate::nd::neighbor::{EntryId, NeighborState};
use crate::nd::routing::{RouteFlags, RouteId};
use crate::protocol::{IfIndex, Ipv6Packet, LinkKind, MacAddr};
use std::net::Ipv6Addr;
use std::time::Instant;
use tracing::{debug, trace};

/// Outcome of next-hop determination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextHop {
    /// Send without resolution (gateway not a neighbor on a p2p link)
    Direct,
    /// Resolve `nexthop` through `route`
    Resolve { route: RouteId, nexthop: Ipv6Addr },
}

impl NdEngine {
    /// Sends `packet` out of `ifindex`.
    ///
    /// # Arguments
    /// * `route` - Route selected for the destination by the caller, if any.
    ///   Its gateway (when gatewayed) is the address that gets resolved.
    ///
    /// # Returns
    /// The actions to perform: a `Transmit` when the next hop is resolved,
    /// or a solicitation when the packet had to be queued. An empty list
    /// means the packet is held.
    pub fn output(
        &mut self,
        now: Instant,
        ifindex: IfIndex,
        packet: Ipv6Packet,
        route: Option<RouteId>,
    ) -> Result<Vec<NdAction>> {
        self.output_packet(now, ifindex, packet, route)?;
        Ok(self.take_actions())
    }

    pub(crate) fn output_packet(
        &mut self,
        now: Instant,
        ifindex: IfIndex,
        packet: Ipv6Packet,
        route: Option<RouteId>,
    ) -> Result<()> {
        let iface = self
            .interfaces
            .get(&ifindex)
            .ok_or(Error::InterfaceNotFound { ifindex })?;
        let (kind, p2p, performs_nud, retrans) = (
            iface.kind,
            iface.is_point_to_point(),
            iface.nd.performs_nud(),
            iface.nd.retrans_timer,
        );

        if packet.destination.is_multicast() {
            let link_dst = match kind {
                LinkKind::Ethernet => Some(MacAddr::from_ipv6_multicast(&packet.destination)),
                _ => None,
            };
            return self.transmit(ifindex, link_dst, packet);
        }
        if !kind.needs_cache() {
            return self.transmit(ifindex, None, packet);
        }

        let mut nexthop = packet.destination;
        let mut resolved_route = None;
        if let Some(route) = route {
            match self.determine_nexthop(now, ifindex, &packet.destination, route)? {
                NextHop::Direct => return self.transmit(ifindex, None, packet),
                NextHop::Resolve { route, nexthop: hop } => {
                    resolved_route = Some(route);
                    nexthop = hop;
                }
            }
        }

        let llinfo_route = resolved_route
            .and_then(|rid| self.routes.get(rid))
            .filter(|r| r.flags.contains(RouteFlags::LLINFO));
        let entry = match llinfo_route {
            Some(r) => r.llinfo,
            None if self.is_addr_neighbor(&nexthop, ifindex) => {
                self.lookup_entry(now, &nexthop, ifindex, true)
            }
            None => None,
        };

        let Some(id) = entry else {
            if p2p {
                return self.transmit(ifindex, None, packet);
            }
            if !performs_nud {
                debug!(dst = %nexthop, ifindex, "no neighbor entry and NUD disabled");
                return Err(Error::ResolutionUnavailable {
                    ifindex,
                    dst: nexthop,
                });
            }
            return Err(Error::HostUnreachable { dst: nexthop });
        };

        self.cache.touch(id);

        if p2p && self.state_of(id) < Some(NeighborState::Reachable) {
            self.make_stale(now, id);
        }
        if self.state_of(id) == Some(NeighborState::Stale) {
            if let Some(entry) = self.cache.get_mut(id) {
                entry.asked = 0;
            }
            self.set_state(id, NeighborState::Delay);
            self.set_entry_timer(now, id, self.params.delay_first_probe);
        }

        let Some(entry) = self.cache.get_mut(id) else {
            return Err(Error::HostUnreachable { dst: nexthop });
        };
        if entry.state.is_resolved() {
            let link_dst = entry.link_addr;
            return self.transmit(ifindex, link_dst, packet);
        }

        if entry.state == NeighborState::NoState {
            entry.state = NeighborState::Incomplete;
        }
        let dropped = entry.hold.push(packet, self.params.max_queue_len);
        trace!(neighbor = %entry.addr, held = entry.hold.len(), "packet held for resolution");
        let first = !entry.permanent && entry.asked == 0;
        if first {
            entry.asked = 1;
        }
        if !dropped.is_empty() {
            self.metrics.queue_drops.add(dropped.len() as u64);
        }
        if let Some(name) = self.interfaces.get(&ifindex).map(|i| i.name.as_str()) {
            self.metrics.with_interface(name, |s| s.held.inc());
        }

        if first {
            self.set_entry_timer(now, id, retrans);
            self.solicit(id, false);
        }
        Ok(())
    }

    /// Picks the route whose neighbor entry the packet is resolved through.
    pub(crate) fn determine_nexthop(
        &mut self,
        now: Instant,
        ifindex: IfIndex,
        dst: &Ipv6Addr,
        route: RouteId,
    ) -> Result<NextHop> {
        let unreachable = || Error::HostUnreachable { dst: *dst };

        let mut rt = route;
        if !self.routes.get(rt).is_some_and(|r| r.is_up()) {
            rt = self
                .allocate_route(now, dst, ifindex, true)
                .ok_or_else(unreachable)?;
            if self.routes.get(rt).map(|r| r.ifindex) != Some(ifindex) {
                return Err(unreachable());
            }
        }

        let r = self.routes.get(rt).ok_or_else(unreachable)?;
        if !r.flags.contains(RouteFlags::GATEWAY) {
            return Ok(NextHop::Resolve {
                route: rt,
                nexthop: *dst,
            });
        }
        let gateway = r.inet_gateway().ok_or_else(unreachable)?;
        let cached = r.gwroute;

        // A gateway that is not a neighbor, or is our own address, is only
        // usable on a point-to-point link.
        if !self.is_addr_neighbor(&gateway, ifindex) || self.own_address(ifindex, &gateway).is_some() {
            let p2p = self
                .interfaces
                .get(&ifindex)
                .is_some_and(|i| i.is_point_to_point());
            if !p2p {
                return Err(unreachable());
            }
            return Ok(NextHop::Direct);
        }

        if let Some(gwroute) = cached {
            if self.routes.get(gwroute).is_some_and(|g| g.is_up()) {
                return Ok(NextHop::Resolve {
                    route: gwroute,
                    nexthop: gateway,
                });
            }
        }

        let gwroute = self.allocate_route(now, &gateway, ifindex, true);
        if let Some(r) = self.routes.get_mut(rt) {
            r.gwroute = gwroute;
        }
        let Some(gwroute) = gwroute else {
            return Err(unreachable());
        };
        let usable = self
            .routes
            .get(gwroute)
            .is_some_and(|g| !g.flags.contains(RouteFlags::GATEWAY) && g.ifindex == ifindex);
        if !usable {
            if let Some(r) = self.routes.get_mut(rt) {
                r.gwroute = None;
            }
            return Err(unreachable());
        }
        Ok(NextHop::Resolve {
            route: gwroute,
            nexthop: gateway,
        })
    }

    /// Sends every packet held on the entry back through output.
    pub(crate) fn release_held(&mut self, now: Instant, id: EntryId) {
        let Some(entry) = self.cache.get_mut(id) else {
            return;
        };
        let packets = entry.hold.take();
        let (ifindex, route) = (entry.ifindex, entry.route);
        for packet in packets {
            if let Err(e) = self.output_packet(now, ifindex, packet, Some(route)) {
                debug!(ifindex, error = %e, "held packet not sent");
            }
        }
    }

    fn transmit(&mut self, ifindex: IfIndex, link_dst: Option<MacAddr>, packet: Ipv6Packet) -> Result<()> {
        let disabled = self
            .interfaces
            .get(&ifindex)
            .is_some_and(|i| i.nd.is_disabled());
        if disabled {
            return Err(Error::NetworkDown { ifindex });
        }
        self.emit(NdAction::Transmit {
            ifindex,
            link_dst,
            packet,
        });
        Ok(())
    }

    fn state_of(&self, id: EntryId) -> Option<NeighborState> {
        self.cache.get(id).map(|e| e.state)
    }
}
