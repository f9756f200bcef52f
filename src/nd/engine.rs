//! Neighbor Discovery engine
//!
//! [`NdEngine`] is the single owner of the neighbor cache and of the tables
//! the cache consults: routes, default routers, prefixes, interface
//! addresses and per-interface ND state. All operations are synchronous,
//! take the current time explicitly and return the side effects to perform
//! as [`NdAction`]s, so the engine itself never blocks or does I/O.
//!
//! The operations are split across modules by concern:
//! - this module: entry lifecycle, route hooks, lookups, timer dispatch
//! - [`output`](super::output): next-hop resolution and transmission
//! - [`update`](super::update): inbound protocol events
//! - [`sweep`](super::sweep): periodic expiration
//! - [`defrouter`](super::defrouter): default routers and prefixes
//! - [`info`](super::info): read-only snapshots

use crate::error::{Error, Result};
use crate::nd::action::{NdAction, RouteChange, UnreachableReason};
use crate::nd::address::{link_local_from_mac, AddrFlags, InterfaceAddress};
use crate::nd::cache::NeighborCache;
use crate::nd::interface::{IfFlags, Interface, InterfaceParams};
use crate::nd::neighbor::{EntryId, NeighborEntry, NeighborState};
use crate::nd::params::{NdParams, FORCED_GC_SCAN, MIN_REARM_INTERVAL, SLOW_TICK_INTERVAL};
use crate::nd::prefix_list::PrefixList;
use crate::nd::router_list::RouterList;
use crate::nd::routing::{Gateway, Route, RouteFlags, RouteId, RoutingTable};
use crate::nd::timer::{deadline_after, TimerWheel};
use crate::protocol::{is_link_local, prefix_matches, solicited_node, IfIndex, MacAddr};
use crate::telemetry::MetricsRegistry;
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Timers owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerId {
    /// Per-entry state timer
    Neighbor(EntryId),
    /// Expiration sweep
    Prune,
    /// Reachable time recomputation countdown
    SlowTick,
}

/// Why an entry is being freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeReason {
    /// Garbage collection of an unused entry
    Gc,
    /// Resolution or unreachability detection failed
    Failure,
}

/// Result of [`NdEngine::free_entry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeOutcome {
    /// The entry was kept alive and its timer rearmed
    Rescheduled,
    /// The entry and its route are gone
    Deleted,
}

/// Route hook request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RtRequest {
    /// Route installed explicitly
    Add,
    /// Route cloned on lookup
    Resolve,
}

/// IPv6 Neighbor Discovery engine.
#[derive(Debug)]
pub struct NdEngine {
    pub(crate) params: NdParams,
    pub(crate) interfaces: BTreeMap<IfIndex, Interface>,
    pub(crate) addresses: Vec<InterfaceAddress>,
    pub(crate) cache: NeighborCache,
    pub(crate) routes: RoutingTable,
    pub(crate) routers: RouterList,
    pub(crate) prefixes: PrefixList,
    pub(crate) timers: TimerWheel<TimerId>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    outbox: Vec<NdAction>,
}

impl NdEngine {
    /// Creates an engine and arms the periodic timers relative to `now`.
    pub fn new(params: NdParams, metrics: Arc<MetricsRegistry>, now: Instant) -> Self {
        let mut timers = TimerWheel::new();
        timers.schedule(now, params.prune_interval, TimerId::Prune);
        timers.schedule(now, SLOW_TICK_INTERVAL, TimerId::SlowTick);

        Self {
            params,
            interfaces: BTreeMap::new(),
            addresses: Vec::new(),
            cache: NeighborCache::new(),
            routes: RoutingTable::new(),
            routers: RouterList::new(),
            prefixes: PrefixList::new(),
            timers,
            metrics,
            outbox: Vec::new(),
        }
    }

    pub fn params(&self) -> &NdParams {
        &self.params
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn set_forwarding(&mut self, forwarding: bool) {
        self.params.forwarding = forwarding;
    }

    /// Sets the interface assumed on-link when no default router is known.
    pub fn set_default_interface(&mut self, ifindex: Option<IfIndex>) -> Result<()> {
        if let Some(ifindex) = ifindex {
            if !self.interfaces.contains_key(&ifindex) {
                return Err(Error::InterfaceNotFound { ifindex });
            }
        }
        self.params.default_interface = ifindex;
        Ok(())
    }

    /// Drains actions produced so far. Operations that fail part way may
    /// leave actions behind; they are returned by the next call.
    pub fn take_actions(&mut self) -> Vec<NdAction> {
        std::mem::take(&mut self.outbox)
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Runs every timer that is due at `now`.
    pub fn handle_timers(&mut self, now: Instant) -> Vec<NdAction> {
        while let Some(timer) = self.timers.pop_expired(now) {
            match timer {
                TimerId::Neighbor(id) => self.entry_timer(now, id),
                TimerId::Prune => {
                    self.prune(now);
                    let interval = self.params.prune_interval.max(MIN_REARM_INTERVAL);
                    self.timers.schedule(now, interval, TimerId::Prune);
                }
                TimerId::SlowTick => {
                    self.slow_tick();
                    self.timers
                        .schedule(now, SLOW_TICK_INTERVAL, TimerId::SlowTick);
                }
            }
        }
        self.take_actions()
    }

    // Interfaces

    /// Attaches an interface. A link-local address is configured when the
    /// interface asks for one and has a link-layer address.
    pub fn add_interface(&mut self, now: Instant, mut iface: Interface) -> Vec<NdAction> {
        iface.nd.recalc_countdown = self.params.recalc_reachable_interval;
        self.metrics.register_interface(&iface.name);
        info!(
            interface = %iface.name,
            ifindex = iface.ifindex,
            kind = ?iface.kind,
            "interface attached"
        );

        let ifindex = iface.ifindex;
        let mac = iface.mac;
        let auto_linklocal = iface.nd.flags.contains(IfFlags::AUTO_LINKLOCAL)
            && iface.needs_cache()
            && !mac.is_zero();
        self.interfaces.insert(ifindex, iface);

        if auto_linklocal {
            let addr = InterfaceAddress::manual(link_local_from_mac(&mac), 64, ifindex);
            self.configure_address(now, addr);
        }
        self.take_actions()
    }

    pub fn interface(&self, ifindex: IfIndex) -> Option<&Interface> {
        self.interfaces.get(&ifindex)
    }

    /// Updates per-interface ND parameters.
    pub fn set_interface_params(
        &mut self,
        now: Instant,
        ifindex: IfIndex,
        params: InterfaceParams,
    ) -> Result<Vec<NdAction>> {
        let iface = self
            .interfaces
            .get_mut(&ifindex)
            .ok_or(Error::InterfaceNotFound { ifindex })?;

        if let Some(base) = params.base_reachable_time {
            if base != iface.nd.base_reachable_time {
                iface.nd.set_base_reachable_time(base);
            }
        }
        if let Some(retrans) = params.retrans_timer {
            iface.nd.retrans_timer = retrans;
        }
        if let Some(hop_limit) = params.hop_limit {
            iface.nd.hop_limit = hop_limit;
        }
        let mut reselect = false;
        if let Some(flags) = params.flags {
            reselect = flags.contains(IfFlags::ACCEPT_RTADV)
                != iface.nd.flags.contains(IfFlags::ACCEPT_RTADV);
            iface.nd.flags = flags;
        }
        debug!(interface = %iface.name, nd = ?iface.nd, "interface parameters updated");

        if reselect && !self.params.forwarding {
            self.pick_default_router(now);
        }
        Ok(self.take_actions())
    }

    // Addresses

    /// Assigns an address to an interface.
    ///
    /// Installs the interface route for its prefix (if missing) and a local
    /// host route whose neighbor entry answers for the address, and joins
    /// the solicited-node group.
    pub fn add_address(&mut self, now: Instant, addr: InterfaceAddress) -> Result<Vec<NdAction>> {
        if !self.interfaces.contains_key(&addr.ifindex) {
            return Err(Error::InterfaceNotFound {
                ifindex: addr.ifindex,
            });
        }
        self.configure_address(now, addr);
        Ok(self.take_actions())
    }

    /// Removes an address and the routes that exist only for it.
    pub fn remove_address(&mut self, addr: &Ipv6Addr, ifindex: IfIndex) -> Vec<NdAction> {
        if let Some(index) = self
            .addresses
            .iter()
            .position(|a| a.addr == *addr && a.ifindex == ifindex)
        {
            self.purge_address(index);
        }
        self.take_actions()
    }

    pub fn addresses(&self) -> &[InterfaceAddress] {
        &self.addresses
    }

    pub(crate) fn configure_address(&mut self, now: Instant, addr: InterfaceAddress) {
        let Some(mac) = self.interfaces.get(&addr.ifindex).map(|i| i.mac) else {
            return;
        };
        if let Some(existing) = self
            .addresses
            .iter_mut()
            .find(|a| a.addr == addr.addr && a.ifindex == addr.ifindex)
        {
            *existing = addr;
            return;
        }

        let ifindex = addr.ifindex;
        let prefix = addr.prefix();
        let prefix_len = addr.prefix_len;
        let local = addr.addr;
        if addr.flags.contains(AddrFlags::AUTOCONF) {
            if let Some(pr) = self.prefixes.lookup_mut(&prefix, prefix_len, ifindex) {
                pr.refcount += 1;
            }
        }
        debug!(addr = %local, prefix_len, ifindex, flags = ?addr.flags, "address added");
        self.addresses.push(addr);

        if prefix_len < 128 && self.routes.find_exact(&prefix, prefix_len, ifindex).is_none() {
            self.add_route(now, Route::interface(prefix, prefix_len, ifindex), RtRequest::Add);
        }
        let host = Route::host(local, ifindex, Some(mac)).with_flags(RouteFlags::STATIC);
        self.add_route(now, host, RtRequest::Add);
        self.emit(NdAction::JoinMulticast {
            ifindex,
            group: solicited_node(&local),
        });
    }

    pub(crate) fn purge_address(&mut self, index: usize) {
        let addr = self.addresses.remove(index);
        debug!(addr = %addr.addr, ifindex = addr.ifindex, "address removed");

        if let Some(rid) = self.routes.find_exact(&addr.addr, 128, addr.ifindex) {
            self.unlink_route(rid);
        }
        self.emit(NdAction::LeaveMulticast {
            ifindex: addr.ifindex,
            group: solicited_node(&addr.addr),
        });

        let prefix = addr.prefix();
        if addr.flags.contains(AddrFlags::AUTOCONF) {
            if let Some(pr) = self.prefixes.lookup_mut(&prefix, addr.prefix_len, addr.ifindex) {
                pr.refcount = pr.refcount.saturating_sub(1);
            }
        }

        let still_used = self.addresses.iter().any(|a| a.same_prefix(&addr))
            || self
                .prefixes
                .lookup(&prefix, addr.prefix_len, addr.ifindex)
                .is_some_and(|p| p.is_onlink_active());
        if !still_used && addr.prefix_len < 128 {
            if let Some(rid) = self.routes.find_exact(&prefix, addr.prefix_len, addr.ifindex) {
                self.unlink_route(rid);
            }
        }
    }

    /// Our address `addr` on `ifindex`, if assigned.
    pub(crate) fn own_address(&self, ifindex: IfIndex, addr: &Ipv6Addr) -> Option<&InterfaceAddress> {
        self.addresses
            .iter()
            .find(|a| a.ifindex == ifindex && a.addr == *addr)
    }

    // Routes

    /// Installs a route, creating its neighbor entry when it carries
    /// link-layer information.
    pub fn install_route(&mut self, now: Instant, route: Route) -> (RouteId, Vec<NdAction>) {
        let id = self.add_route(now, route, RtRequest::Add);
        (id, self.take_actions())
    }

    /// Deletes a route and the neighbor entry it owns.
    pub fn delete_route(&mut self, id: RouteId) -> Vec<NdAction> {
        self.unlink_route(id);
        self.take_actions()
    }

    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    pub(crate) fn add_route(&mut self, now: Instant, route: Route, req: RtRequest) -> RouteId {
        let (id, replaced) = self.routes.add(route);
        if let Some((_, old)) = replaced {
            self.detach_entry(&old);
        }
        self.attach_entry(now, id, req);

        if let Some(route) = self.routes.get(id) {
            if !route.flags.contains(RouteFlags::CLONED) {
                let action = route_changed(RouteChange::Add, route);
                self.emit(action);
            }
        }
        self.metrics.set_route_count(self.routes.len());
        id
    }

    /// Removes a route. Deleting a cloning route also removes its clones.
    pub(crate) fn unlink_route(&mut self, id: RouteId) -> Option<Route> {
        let route = self.routes.remove(id)?;
        self.detach_entry(&route);

        if route.flags.contains(RouteFlags::CLONING) {
            let clones = self.routes.ids_where(|r| {
                r.flags.contains(RouteFlags::CLONED)
                    && r.ifindex == route.ifindex
                    && prefix_matches(&route.destination, route.prefix_len, &r.destination)
            });
            for clone in clones {
                self.unlink_route(clone);
            }
        }
        if !route.flags.contains(RouteFlags::CLONED) {
            self.emit(route_changed(RouteChange::Delete, &route));
        }
        self.metrics.set_route_count(self.routes.len());
        Some(route)
    }

    /// Longest-prefix match honoring the interface scope of link-local
    /// destinations.
    pub(crate) fn route_lookup(&self, addr: &Ipv6Addr, ifindex: IfIndex) -> Option<RouteId> {
        if is_link_local(addr) {
            self.routes.lookup_on(addr, ifindex)
        } else {
            self.routes.lookup(addr)
        }
    }

    /// Looks up the route for `dst`, cloning a host route from a cloning
    /// route when `create` is set.
    pub(crate) fn allocate_route(
        &mut self,
        now: Instant,
        dst: &Ipv6Addr,
        ifindex: IfIndex,
        create: bool,
    ) -> Option<RouteId> {
        let id = self.route_lookup(dst, ifindex)?;
        let route = self.routes.get(id)?;
        if !create || !route.flags.contains(RouteFlags::CLONING) || route.prefix_len == 128 {
            return Some(id);
        }
        let mut clone = Route::host(*dst, route.ifindex, None).with_flags(RouteFlags::CLONED);
        clone.metric = route.metric;
        Some(self.add_route(now, clone, RtRequest::Resolve))
    }

    /// Route hook run when a route is added or cloned. Creates the neighbor
    /// entry of host routes that carry link-layer information.
    pub(crate) fn attach_entry(&mut self, now: Instant, rid: RouteId, req: RtRequest) -> Option<EntryId> {
        let route = self.routes.get(rid)?;
        let (flags, dst, ifindex, gateway, existing) = (
            route.flags,
            route.destination,
            route.ifindex,
            route.gateway,
            route.llinfo,
        );
        let iface = self.interfaces.get(&ifindex)?;
        let (needs_cache, p2p, own_mac) = (iface.needs_cache(), iface.is_point_to_point(), iface.mac);

        if flags.contains(RouteFlags::GATEWAY) {
            return None;
        }
        if !needs_cache && !flags.contains(RouteFlags::HOST) {
            return None;
        }
        if req == RtRequest::Resolve && (!needs_cache || !self.is_addr_neighbor(&dst, ifindex)) {
            if let Some(route) = self.routes.get_mut(rid) {
                route.flags.remove(RouteFlags::LLINFO);
            }
            return None;
        }

        let mut gateway = gateway;
        if req == RtRequest::Add
            && (flags.contains(RouteFlags::CLONING)
                || (flags.contains(RouteFlags::LLINFO) && existing.is_none()))
        {
            if let Gateway::Inet(_) = gateway {
                gateway = Gateway::Link(None);
                if let Some(route) = self.routes.get_mut(rid) {
                    route.gateway = gateway;
                }
            }
            if flags.contains(RouteFlags::CLONING) {
                return None;
            }
        }

        if needs_cache && !p2p && !matches!(gateway, Gateway::Link(_)) {
            debug!(ifindex, dst = %dst, "bad gateway value for neighbor route");
            return None;
        }
        if existing.is_some() {
            return existing;
        }

        if self.params.max_entries > 0 && self.cache.len() >= self.params.max_entries {
            warn!(
                neighbor = %dst,
                ifindex,
                limit = self.params.max_entries,
                "neighbor cache full, entry not allocated"
            );
            self.metrics.alloc_failures.inc();
            return None;
        }

        let link_addr = match gateway {
            Gateway::Link(mac) => mac,
            Gateway::Inet(_) => None,
        };
        let entry = match req {
            RtRequest::Add => NeighborEntry::permanent(dst, ifindex, rid, link_addr),
            RtRequest::Resolve => NeighborEntry::new(dst, ifindex, rid),
        };
        let id = self.cache.insert(entry);
        if let Some(route) = self.routes.get_mut(rid) {
            route.flags.insert(RouteFlags::LLINFO);
            route.llinfo = Some(id);
        }
        self.metrics.record_allocation();
        self.metrics.set_entries(self.cache.len());
        trace!(neighbor = %dst, ifindex, ?req, "neighbor entry allocated");

        if self.params.gc_threshold > 0 && self.cache.len() >= self.params.gc_threshold {
            self.force_gc(now, id);
        }

        if self.own_address(ifindex, &dst).is_some() {
            if let Some(entry) = self.cache.get_mut(id) {
                entry.state = NeighborState::Reachable;
                entry.permanent = true;
                entry.by_hint = 0;
                entry.link_addr = Some(own_mac);
            }
            self.clear_entry_timer(id);
            if let Some(route) = self.routes.get_mut(rid) {
                route.gateway = Gateway::Link(Some(own_mac));
                route.flags.insert(RouteFlags::LOCAL);
            }
        } else if flags.contains(RouteFlags::ANNOUNCE) {
            if let Some(entry) = self.cache.get_mut(id) {
                entry.state = NeighborState::Reachable;
                entry.permanent = true;
                entry.by_hint = 0;
                entry.link_addr.get_or_insert(own_mac);
            }
            self.clear_entry_timer(id);
            self.emit(NdAction::JoinMulticast {
                ifindex,
                group: solicited_node(&dst),
            });
        }
        Some(id)
    }

    /// Pushes up to [`FORCED_GC_SCAN`] least recently used entries towards
    /// collection. Nothing is freed here; the zero-delay timers do it.
    fn force_gc(&mut self, now: Instant, new: EntryId) {
        for _ in 0..FORCED_GC_SCAN {
            let Some(tail) = self.cache.oldest() else {
                break;
            };
            if tail == new {
                break;
            }
            self.cache.touch(tail);
            let Some(entry) = self.cache.get_mut(tail) else {
                continue;
            };
            if entry.permanent {
                continue;
            }
            entry.state = if entry.state.is_resolved() {
                NeighborState::Stale
            } else {
                NeighborState::Purge
            };
            debug!(neighbor = %entry.addr, state = ?entry.state, "forced collection");
            self.metrics.forced_gc.inc();
            self.set_entry_timer(now, tail, Duration::ZERO);
        }
    }

    /// Route hook run when a route goes away.
    fn detach_entry(&mut self, route: &Route) {
        let Some(id) = route.llinfo else {
            return;
        };
        if route.flags.contains(RouteFlags::ANNOUNCE) {
            self.emit(NdAction::LeaveMulticast {
                ifindex: route.ifindex,
                group: solicited_node(&route.destination),
            });
        }
        self.timers.cancel(&TimerId::Neighbor(id));
        if let Some(entry) = self.cache.remove(id) {
            debug!(
                neighbor = %entry.addr,
                ifindex = entry.ifindex,
                state = ?entry.state,
                dropped = entry.hold.len(),
                "neighbor entry removed"
            );
            self.metrics.entries_freed.inc();
        }
        self.metrics.set_entries(self.cache.len());
    }

    // Lookup

    /// Finds the neighbor entry for `addr` on `ifindex` without creating one.
    pub fn lookup(&self, addr: &Ipv6Addr, ifindex: IfIndex) -> Option<EntryId> {
        let rid = self.find_route(addr, ifindex, false)?;
        self.routes.get(rid)?.llinfo
    }

    pub fn entry(&self, id: EntryId) -> Option<&NeighborEntry> {
        self.cache.get(id)
    }

    /// Non-creating lookup of the neighbor route for `addr`.
    ///
    /// With `cloning` set, a cloning or cloned route on the interface is
    /// accepted as well, which is what the on-link test wants.
    pub(crate) fn find_route(&self, addr: &Ipv6Addr, ifindex: IfIndex, cloning: bool) -> Option<RouteId> {
        let rid = self.route_lookup(addr, ifindex)?;
        self.validate_route(rid, ifindex, cloning)
    }

    /// Looks up the neighbor route for `addr`, creating a route and entry
    /// if `create` is set and none exists.
    pub(crate) fn lookup_route(
        &mut self,
        now: Instant,
        addr: &Ipv6Addr,
        ifindex: IfIndex,
        create: bool,
    ) -> Option<RouteId> {
        if !create {
            return self.find_route(addr, ifindex, false);
        }

        let found = self
            .allocate_route(now, addr, ifindex, true)
            .filter(|rid| {
                self.routes
                    .get(*rid)
                    .is_some_and(|r| r.flags.contains(RouteFlags::LLINFO))
            });
        let rid = match found {
            Some(rid) => {
                let retry = self.routes.get(rid).is_some_and(|r| {
                    r.llinfo.is_none() && r.ifindex == ifindex && !r.flags.contains(RouteFlags::GATEWAY)
                });
                if retry {
                    self.attach_entry(now, rid, RtRequest::Resolve);
                }
                rid
            }
            None => {
                // Neighbor outside every on-link prefix: give it its own
                // host route on the interface.
                if !self.addresses.iter().any(|a| a.ifindex == ifindex) {
                    return None;
                }
                let rid = self.add_route(now, Route::host(*addr, ifindex, None), RtRequest::Add);
                let route = self.routes.get(rid)?;
                if !route.flags.contains(RouteFlags::LOCAL) {
                    if let Some(entry) = route.llinfo.and_then(|id| self.cache.get_mut(id)) {
                        entry.state = NeighborState::NoState;
                        entry.permanent = false;
                    }
                }
                rid
            }
        };

        let validated = self.validate_route(rid, ifindex, false);
        if validated.is_none() {
            debug!(neighbor = %addr, ifindex, "failed to look up neighbor entry");
        }
        validated
    }

    fn validate_route(&self, rid: RouteId, ifindex: IfIndex, cloning: bool) -> Option<RouteId> {
        let route = self.routes.get(rid)?;
        if cloning
            && route.flags.intersects(RouteFlags::CLONING | RouteFlags::CLONED)
            && route.ifindex == ifindex
        {
            return Some(rid);
        }
        if route.flags.contains(RouteFlags::GATEWAY)
            || !route.flags.contains(RouteFlags::LLINFO)
            || !matches!(route.gateway, Gateway::Link(_))
            || route.llinfo.is_none()
            || route.ifindex != ifindex
        {
            return None;
        }
        Some(rid)
    }

    /// Neighbor entry for `addr`, created if missing.
    pub(crate) fn lookup_entry(
        &mut self,
        now: Instant,
        addr: &Ipv6Addr,
        ifindex: IfIndex,
        create: bool,
    ) -> Option<EntryId> {
        let rid = self.lookup_route(now, addr, ifindex, create)?;
        self.routes.get(rid)?.llinfo
    }

    /// Whether `addr` is on-link for `ifindex` (RFC 4861 Section 5.2).
    pub fn is_addr_neighbor(&self, addr: &Ipv6Addr, ifindex: IfIndex) -> bool {
        if is_link_local(addr) {
            return true;
        }
        if self
            .prefixes
            .iter()
            .any(|p| p.ifindex == ifindex && p.is_onlink_active() && p.contains(addr))
        {
            return true;
        }
        if !self.params.forwarding
            && self.routers.is_empty()
            && self.params.default_interface == Some(ifindex)
        {
            return true;
        }
        self.find_route(addr, ifindex, true).is_some()
    }

    // Administrative entries

    /// Installs a permanent neighbor entry (`ndp -s`).
    pub fn add_static_neighbor(
        &mut self,
        now: Instant,
        addr: Ipv6Addr,
        ifindex: IfIndex,
        mac: MacAddr,
    ) -> Result<Vec<NdAction>> {
        let route = Route::host(addr, ifindex, Some(mac)).with_flags(RouteFlags::STATIC);
        self.add_admin_route(now, route)
    }

    /// Installs a proxy entry answering solicitations for `addr` with our
    /// own link-layer address.
    pub fn add_proxy_neighbor(
        &mut self,
        now: Instant,
        addr: Ipv6Addr,
        ifindex: IfIndex,
    ) -> Result<Vec<NdAction>> {
        let route = Route::host(addr, ifindex, None)
            .with_flags(RouteFlags::STATIC | RouteFlags::ANNOUNCE);
        self.add_admin_route(now, route)
    }

    fn add_admin_route(&mut self, now: Instant, route: Route) -> Result<Vec<NdAction>> {
        let ifindex = route.ifindex;
        if !self.interfaces.contains_key(&ifindex) {
            return Err(Error::InterfaceNotFound { ifindex });
        }
        let rid = self.add_route(now, route, RtRequest::Add);
        if self.routes.get(rid).and_then(|r| r.llinfo).is_none() {
            self.unlink_route(rid);
            self.take_actions();
            return Err(Error::CacheExhausted {
                limit: self.params.max_entries,
            });
        }
        Ok(self.take_actions())
    }

    /// Deletes the entry for `addr` together with its route.
    pub fn remove_neighbor(&mut self, addr: &Ipv6Addr, ifindex: IfIndex) -> Vec<NdAction> {
        if let Some(route) = self.lookup(addr, ifindex).and_then(|id| self.cache.get(id)).map(|e| e.route) {
            self.unlink_route(route);
        }
        self.take_actions()
    }

    // Entry lifecycle

    /// Deletes an entry, unless it belongs to a default router that is
    /// still valid and this is only garbage collection.
    pub fn free_entry(&mut self, now: Instant, id: EntryId, reason: FreeReason) -> FreeOutcome {
        let Some(entry) = self.cache.get(id) else {
            return FreeOutcome::Deleted;
        };
        let (addr, ifindex, state, is_router, route) =
            (entry.addr, entry.ifindex, entry.state, entry.is_router, entry.route);
        self.clear_entry_timer(id);

        if !self.params.forwarding {
            let router_expire = self.routers.lookup(&addr, ifindex).map(|dr| dr.expire);

            if let Some(Some(expire)) = router_expire {
                if state == NeighborState::Stale && reason == FreeReason::Gc {
                    let after = if expire > now {
                        expire - now
                    } else {
                        self.params.gc_timer.max(MIN_REARM_INTERVAL)
                    };
                    debug!(neighbor = %addr, ifindex, ?after, "keeping default router entry");
                    self.set_entry_timer(now, id, after);
                    return FreeOutcome::Rescheduled;
                }
            }

            if is_router || router_expire.is_some() {
                self.flush_via(&addr, ifindex);
            }
            if router_expire.is_some() {
                // Not probably reachable any more for the checks below.
                if let Some(entry) = self.cache.get_mut(id) {
                    entry.state = NeighborState::Incomplete;
                }
                self.onlink_check(now);
                self.pick_default_router(now);
            }
        }

        debug!(neighbor = %addr, ifindex, ?reason, "freeing neighbor entry");
        if self.unlink_route(route).is_none() {
            // Owning route already gone; drop the orphan.
            self.cache.remove(id);
            self.metrics.set_entries(self.cache.len());
        }
        FreeOutcome::Deleted
    }

    pub(crate) fn set_entry_timer(&mut self, now: Instant, id: EntryId, after: Duration) {
        let deadline = deadline_after(now, after);
        self.timers.schedule_at(deadline, TimerId::Neighbor(id));
        if let Some(entry) = self.cache.get_mut(id) {
            entry.expire = Some(deadline);
        }
    }

    pub(crate) fn clear_entry_timer(&mut self, id: EntryId) {
        self.timers.cancel(&TimerId::Neighbor(id));
        if let Some(entry) = self.cache.get_mut(id) {
            entry.expire = None;
        }
    }

    pub(crate) fn set_state(&mut self, id: EntryId, state: NeighborState) {
        if let Some(entry) = self.cache.get_mut(id) {
            if entry.state != state {
                debug!(
                    neighbor = %entry.addr,
                    ifindex = entry.ifindex,
                    from = ?entry.state,
                    to = ?state,
                    "neighbor state change"
                );
                entry.state = state;
            }
        }
    }

    /// Moves an entry to Stale and arms the collection timer.
    pub(crate) fn make_stale(&mut self, now: Instant, id: EntryId) {
        self.set_state(id, NeighborState::Stale);
        self.set_entry_timer(now, id, self.params.gc_timer);
    }

    fn entry_timer(&mut self, now: Instant, id: EntryId) {
        let Some(entry) = self.cache.get_mut(id) else {
            return;
        };
        entry.expire = None;
        let (state, asked, permanent, ifindex) =
            (entry.state, entry.asked, entry.permanent, entry.ifindex);
        let Some(iface) = self.interfaces.get(&ifindex) else {
            return;
        };
        let retrans = iface.nd.retrans_timer;
        let performs_nud = iface.nd.performs_nud();

        match state {
            NeighborState::NoState => {}
            NeighborState::Incomplete => {
                if asked < self.params.max_multicast_solicit {
                    if let Some(entry) = self.cache.get_mut(id) {
                        entry.asked += 1;
                    }
                    self.set_entry_timer(now, id, retrans);
                    self.solicit(id, false);
                } else {
                    let held = self
                        .cache
                        .get_mut(id)
                        .map(|e| e.hold.take())
                        .unwrap_or_default();
                    for packet in held {
                        self.emit(NdAction::ReportUnreachable {
                            ifindex,
                            packet,
                            reason: UnreachableReason::AddressUnreachable,
                        });
                    }
                    self.free_entry(now, id, FreeReason::Failure);
                }
            }
            NeighborState::Reachable => {
                if !permanent {
                    self.make_stale(now, id);
                }
            }
            NeighborState::Stale | NeighborState::Purge => {
                if !permanent {
                    self.free_entry(now, id, FreeReason::Gc);
                }
            }
            NeighborState::Delay => {
                if performs_nud {
                    if let Some(entry) = self.cache.get_mut(id) {
                        entry.asked = 1;
                    }
                    self.set_state(id, NeighborState::Probe);
                    self.set_entry_timer(now, id, retrans);
                    self.solicit(id, true);
                } else {
                    self.make_stale(now, id);
                }
            }
            NeighborState::Probe => {
                if asked < self.params.max_unicast_solicit {
                    if let Some(entry) = self.cache.get_mut(id) {
                        entry.asked += 1;
                    }
                    self.set_entry_timer(now, id, retrans);
                    self.solicit(id, true);
                } else {
                    self.free_entry(now, id, FreeReason::Failure);
                }
            }
        }
    }

    /// Requests a solicitation for the entry's address. Multicast to the
    /// solicited-node group unless `unicast`, in which case it goes to the
    /// cached link-layer address.
    pub(crate) fn solicit(&mut self, id: EntryId, unicast: bool) {
        let Some(entry) = self.cache.get(id) else {
            return;
        };
        let source = entry
            .hold
            .front()
            .map(|p| p.source)
            .filter(|src| self.own_address(entry.ifindex, src).is_some());
        let action = NdAction::SendSolicitation {
            ifindex: entry.ifindex,
            source,
            target: entry.addr,
            link_dst: if unicast { entry.link_addr } else { None },
        };
        self.emit(action);
    }

    /// Queues an action, accounting for it in the metrics.
    pub(crate) fn emit(&mut self, action: NdAction) {
        let name = self
            .interfaces
            .get(&action.ifindex())
            .map(|i| i.name.as_str())
            .unwrap_or_default();
        match &action {
            NdAction::SendSolicitation { link_dst, .. } => {
                if link_dst.is_some() {
                    self.metrics.solicitations_unicast.inc();
                } else {
                    self.metrics.solicitations_multicast.inc();
                }
                self.metrics.with_interface(name, |s| s.solicitations.inc());
            }
            NdAction::SendAdvertisement { .. } => {
                self.metrics.advertisements_sent.inc();
                self.metrics.with_interface(name, |s| s.advertisements.inc());
            }
            NdAction::Transmit { packet, .. } => {
                self.metrics.record_tx(name, packet.len());
            }
            NdAction::ReportUnreachable { .. } => {
                self.metrics.unreachable_reported.inc();
                self.metrics.with_interface(name, |s| s.unreachable.inc());
            }
            _ => {}
        }
        self.outbox.push(action);
    }
}

fn route_changed(change: RouteChange, route: &Route) -> NdAction {
    NdAction::RouteChanged {
        change,
        destination: route.destination,
        prefix_len: route.prefix_len,
        gateway: route.inet_gateway(),
        ifindex: route.ifindex,
        flags: route.flags,
    }
}
