//! IPv6 routing table
//!
//! Only what the neighbor cache needs: longest-prefix match, host routes
//! carrying a neighbor entry, cloning interface routes and a cached
//! gateway route per gatewayed route.

use crate::nd::neighbor::EntryId;
use crate::protocol::{prefix_matches, IfIndex, MacAddr};
use bitflags::bitflags;
use std::collections::BTreeMap;
use std::net::Ipv6Addr;

bitflags! {
    /// Route flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RouteFlags: u32 {
        /// Route usable
        const UP = 1 << 0;
        /// Destination is reached through a gateway
        const GATEWAY = 1 << 1;
        /// Host route (full-length prefix)
        const HOST = 1 << 2;
        /// Lookups clone a host route from this one
        const CLONING = 1 << 3;
        /// Created by cloning
        const CLONED = 1 << 4;
        /// Installed administratively
        const STATIC = 1 << 5;
        /// Answer solicitations for this address (proxy ND)
        const ANNOUNCE = 1 << 6;
        /// Carries link-layer resolution state
        const LLINFO = 1 << 7;
        /// Destination is one of our own addresses
        const LOCAL = 1 << 8;
    }
}

/// Stable route handle. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteId(pub(crate) u64);

/// Where a route sends traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gateway {
    /// Directly attached; holds the resolved link-layer address once known.
    Link(Option<MacAddr>),
    /// Via an IPv6 next hop.
    Inet(Ipv6Addr),
}

/// Route entry
#[derive(Debug, Clone)]
pub struct Route {
    pub destination: Ipv6Addr,
    pub prefix_len: u8,
    pub gateway: Gateway,
    pub ifindex: IfIndex,
    pub flags: RouteFlags,
    /// Route metric (lower preferred on equal prefix length)
    pub metric: u32,
    /// Neighbor entry owned by this route
    pub llinfo: Option<EntryId>,
    /// Cached route to the gateway of a gatewayed route
    pub gwroute: Option<RouteId>,
}

impl Route {
    /// Directly connected network route that clones host routes on lookup.
    pub fn interface(prefix: Ipv6Addr, prefix_len: u8, ifindex: IfIndex) -> Self {
        Self {
            destination: prefix,
            prefix_len,
            gateway: Gateway::Link(None),
            ifindex,
            flags: RouteFlags::UP | RouteFlags::CLONING,
            metric: 0,
            llinfo: None,
            gwroute: None,
        }
    }

    /// Route through `gateway`.
    pub fn via(prefix: Ipv6Addr, prefix_len: u8, gateway: Ipv6Addr, ifindex: IfIndex) -> Self {
        Self {
            destination: prefix,
            prefix_len,
            gateway: Gateway::Inet(gateway),
            ifindex,
            flags: RouteFlags::UP | RouteFlags::GATEWAY,
            metric: 0,
            llinfo: None,
            gwroute: None,
        }
    }

    /// Host route with link-layer info.
    pub fn host(addr: Ipv6Addr, ifindex: IfIndex, link_addr: Option<MacAddr>) -> Self {
        Self {
            destination: addr,
            prefix_len: 128,
            gateway: Gateway::Link(link_addr),
            ifindex,
            flags: RouteFlags::UP | RouteFlags::HOST | RouteFlags::LLINFO,
            metric: 0,
            llinfo: None,
            gwroute: None,
        }
    }

    pub fn with_flags(mut self, flags: RouteFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn is_up(&self) -> bool {
        self.flags.contains(RouteFlags::UP)
    }

    pub fn inet_gateway(&self) -> Option<Ipv6Addr> {
        match self.gateway {
            Gateway::Inet(gw) => Some(gw),
            Gateway::Link(_) => None,
        }
    }

    fn matches(&self, addr: &Ipv6Addr) -> bool {
        prefix_matches(&self.destination, self.prefix_len, addr)
    }
}

/// Routing table using longest prefix match
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: BTreeMap<RouteId, Route>,
    next_id: u64,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route, replacing any route with the same destination, prefix
    /// length and interface. Returns the new id and the replaced route.
    pub fn add(&mut self, route: Route) -> (RouteId, Option<(RouteId, Route)>) {
        let replaced = self
            .find_exact(&route.destination, route.prefix_len, route.ifindex)
            .and_then(|id| self.routes.remove(&id).map(|r| (id, r)));
        self.next_id += 1;
        let id = RouteId(self.next_id);
        self.routes.insert(id, route);
        (id, replaced)
    }

    pub fn remove(&mut self, id: RouteId) -> Option<Route> {
        self.routes.remove(&id)
    }

    pub fn get(&self, id: RouteId) -> Option<&Route> {
        self.routes.get(&id)
    }

    pub fn get_mut(&mut self, id: RouteId) -> Option<&mut Route> {
        self.routes.get_mut(&id)
    }

    /// Lookup route using longest prefix match.
    pub fn lookup(&self, addr: &Ipv6Addr) -> Option<RouteId> {
        self.routes
            .iter()
            .filter(|(_, r)| r.is_up() && r.matches(addr))
            .max_by(|(a_id, a), (b_id, b)| {
                a.prefix_len
                    .cmp(&b.prefix_len)
                    .then(b.metric.cmp(&a.metric))
                    .then(b_id.cmp(a_id))
            })
            .map(|(id, _)| *id)
    }

    /// Longest prefix match restricted to routes on `ifindex`. Used for
    /// link-local destinations, which are only meaningful per interface.
    pub fn lookup_on(&self, addr: &Ipv6Addr, ifindex: IfIndex) -> Option<RouteId> {
        self.routes
            .iter()
            .filter(|(_, r)| r.ifindex == ifindex && r.is_up() && r.matches(addr))
            .max_by(|(a_id, a), (b_id, b)| {
                a.prefix_len
                    .cmp(&b.prefix_len)
                    .then(b.metric.cmp(&a.metric))
                    .then(b_id.cmp(a_id))
            })
            .map(|(id, _)| *id)
    }

    pub fn find_exact(&self, dst: &Ipv6Addr, prefix_len: u8, ifindex: IfIndex) -> Option<RouteId> {
        self.routes
            .iter()
            .find(|(_, r)| {
                r.destination == *dst && r.prefix_len == prefix_len && r.ifindex == ifindex
            })
            .map(|(id, _)| *id)
    }

    /// Ids of all routes satisfying `f`.
    pub fn ids_where<F: Fn(&Route) -> bool>(&self, f: F) -> Vec<RouteId> {
        self.routes
            .iter()
            .filter(|(_, r)| f(r))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RouteId, &Route)> {
        self.routes.iter().map(|(id, r)| (*id, r))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_match() {
        let mut table = RoutingTable::new();

        let (default, _) = table.add(Route::via(
            Ipv6Addr::UNSPECIFIED,
            0,
            "fe80::1".parse().unwrap(),
            1,
        ));
        let (lan, _) = table.add(Route::interface("2001:db8:1::".parse().unwrap(), 64, 2));

        assert_eq!(table.lookup(&"2001:db8:1::5".parse().unwrap()), Some(lan));
        assert_eq!(table.lookup(&"2001:db8:9::5".parse().unwrap()), Some(default));
    }

    #[test]
    fn test_host_route_wins() {
        let mut table = RoutingTable::new();
        let addr: Ipv6Addr = "2001:db8:1::5".parse().unwrap();
        table.add(Route::interface("2001:db8:1::".parse().unwrap(), 64, 2));
        let (host, _) = table.add(Route::host(addr, 2, None));

        assert_eq!(table.lookup(&addr), Some(host));
        assert!(table.get(host).unwrap().flags.contains(RouteFlags::LLINFO));
    }

    #[test]
    fn test_metric_breaks_ties() {
        let mut table = RoutingTable::new();
        let mut slow = Route::via(Ipv6Addr::UNSPECIFIED, 0, "fe80::1".parse().unwrap(), 1);
        slow.metric = 100;
        table.add(slow);
        let (fast, _) = table.add(Route::via(
            Ipv6Addr::UNSPECIFIED,
            0,
            "fe80::2".parse().unwrap(),
            2,
        ));

        assert_eq!(table.lookup(&"2001:db8::1".parse().unwrap()), Some(fast));
    }

    #[test]
    fn test_add_replaces_same_destination() {
        let mut table = RoutingTable::new();
        let prefix: Ipv6Addr = "2001:db8:1::".parse().unwrap();
        let (first, _) = table.add(Route::interface(prefix, 64, 1));
        let (second, replaced) = table.add(Route::interface(prefix, 64, 1));

        assert_ne!(first, second);
        assert_eq!(replaced.map(|(id, _)| id), Some(first));
        assert_eq!(table.len(), 1);
        assert!(table.get(first).is_none());
    }

    #[test]
    fn test_down_route_not_matched() {
        let mut table = RoutingTable::new();
        let (id, _) = table.add(Route::interface("2001:db8:1::".parse().unwrap(), 64, 1));
        table.get_mut(id).unwrap().flags.remove(RouteFlags::UP);

        assert_eq!(table.lookup(&"2001:db8:1::5".parse().unwrap()), None);
    }

    #[test]
    fn test_lookup_on_interface() {
        let mut table = RoutingTable::new();
        let ll: Ipv6Addr = "fe80::".parse().unwrap();
        let (eth0, _) = table.add(Route::interface(ll, 64, 1));
        let (eth1, _) = table.add(Route::interface(ll, 64, 2));
        let peer: Ipv6Addr = "fe80::9".parse().unwrap();

        assert_eq!(table.lookup_on(&peer, 1), Some(eth0));
        assert_eq!(table.lookup_on(&peer, 2), Some(eth1));
        assert_eq!(table.lookup_on(&peer, 3), None);
    }
}
