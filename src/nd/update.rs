//! Cache updates from inbound ND messages - RFC 4861 Section 7.2.3-7.2.5
//!
//! Parsing and validating the packets themselves is the caller's job; these
//! operations take the fields that matter to the cache.

use crate::nd::action::NdAction;
use crate::nd::address::AddrFlags;
use crate::nd::engine::{FreeReason, NdEngine};
use crate::nd::neighbor::{EntryId, NeighborState};
use crate::nd::routing::{Gateway, RouteFlags};
use crate::protocol::{IfIndex, MacAddr, ALL_NODES};
use std::net::Ipv6Addr;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Message that carried a link-layer address option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdMessage {
    NeighborSolicit,
    RouterSolicit,
    RouterAdvert,
    /// `to_router` is set when the redirect target is a better router
    /// rather than the destination itself.
    Redirect { to_router: bool },
}

/// Fields of a received Neighbor Solicitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborSolicitation {
    pub target: Ipv6Addr,
    /// Source link-layer address option
    pub link_addr: Option<MacAddr>,
}

/// Fields of a received Neighbor Advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborAdvertisement {
    pub target: Ipv6Addr,
    /// Target link-layer address option
    pub link_addr: Option<MacAddr>,
    pub router: bool,
    pub solicited: bool,
    pub override_flag: bool,
}

impl NdEngine {
    /// Records the link-layer address a neighbor told us about.
    ///
    /// # Arguments
    /// * `from` - Source address of the message
    /// * `lladdr` - Source (or target, for redirects) link-layer address option
    /// * `msg` - Message type, which decides how the router flag changes
    pub fn cache_lladdr(
        &mut self,
        now: Instant,
        ifindex: IfIndex,
        from: &Ipv6Addr,
        lladdr: Option<MacAddr>,
        msg: NdMessage,
    ) -> Vec<NdAction> {
        self.learn_lladdr(now, ifindex, from, lladdr, msg);
        self.take_actions()
    }

    pub(crate) fn learn_lladdr(
        &mut self,
        now: Instant,
        ifindex: IfIndex,
        from: &Ipv6Addr,
        lladdr: Option<MacAddr>,
        msg: NdMessage,
    ) {
        if from.is_unspecified() {
            return;
        }
        if from.is_multicast() || lladdr.is_some_and(|mac| mac.is_multicast()) {
            debug!(neighbor = %from, ifindex, ?lladdr, "malformed link-layer update ignored");
            self.metrics.malformed_updates.inc();
            return;
        }

        let (id, is_new) = match self.lookup(from, ifindex) {
            Some(id) => (id, false),
            None => match self.lookup_entry(now, from, ifindex, true) {
                Some(id) => (id, true),
                None => return,
            },
        };
        let Some(entry) = self.cache.get(id) else {
            return;
        };
        let (current, permanent) = (entry.link_addr, entry.permanent);
        let Some(route_flags) = self.routes.get(entry.route).map(|r| r.flags) else {
            return;
        };
        if route_flags.contains(RouteFlags::STATIC) || permanent {
            return;
        }
        if route_flags.contains(RouteFlags::GATEWAY) || !route_flags.contains(RouteFlags::LLINFO) {
            self.free_entry(now, id, FreeReason::Failure);
            return;
        }

        let had_lladdr = current.is_some();
        let changed = lladdr.is_some() && current != lladdr;
        if let Some(mac) = lladdr {
            self.record_link_addr(id, mac);
        }

        let new_state = if is_new {
            Some(if lladdr.is_some() {
                NeighborState::Stale
            } else {
                NeighborState::NoState
            })
        } else if lladdr.is_some() && (!had_lladdr || changed) {
            Some(NeighborState::Stale)
        } else {
            None
        };
        let updated = new_state.is_some();
        match new_state {
            Some(NeighborState::Stale) => {
                self.make_stale(now, id);
                self.release_held(now, id);
            }
            Some(state) => self.set_state(id, state),
            None => {}
        }

        let Some(entry) = self.cache.get_mut(id) else {
            return;
        };
        match msg {
            NdMessage::NeighborSolicit => {
                if is_new {
                    entry.is_router = false;
                }
            }
            NdMessage::RouterSolicit => entry.is_router = false,
            NdMessage::RouterAdvert => {
                if (!is_new && (had_lladdr || lladdr.is_some())) || (is_new && lladdr.is_some()) {
                    entry.is_router = true;
                }
            }
            NdMessage::Redirect { to_router } => {
                if to_router {
                    entry.is_router = true;
                } else if is_new {
                    entry.is_router = false;
                }
            }
        }
        trace!(neighbor = %from, ifindex, ?msg, is_new, updated, "link-layer address cached");

        let accepts = self
            .interfaces
            .get(&ifindex)
            .is_some_and(|i| i.nd.accepts_rtadv());
        if updated && entry.is_router && !self.params.forwarding && accepts {
            self.pick_default_router(now);
        }
    }

    /// Processes a Neighbor Advertisement (RFC 4861 Section 7.2.5).
    pub fn process_neighbor_advertisement(
        &mut self,
        now: Instant,
        ifindex: IfIndex,
        na: &NeighborAdvertisement,
    ) -> Vec<NdAction> {
        let target = na.target;
        if target.is_multicast() || na.link_addr.is_some_and(|mac| mac.is_multicast()) {
            debug!(target = %target, ifindex, "malformed neighbor advertisement ignored");
            self.metrics.malformed_updates.inc();
            return self.take_actions();
        }
        if self.own_address(ifindex, &target).is_some() {
            warn!(
                target = %target,
                ifindex,
                link_addr = ?na.link_addr,
                "duplicate address: advertisement for our own address"
            );
            return self.take_actions();
        }
        let Some(id) = self.lookup(&target, ifindex) else {
            return self.take_actions();
        };
        let Some(entry) = self.cache.get(id) else {
            return self.take_actions();
        };
        if entry.permanent || entry.state == NeighborState::NoState {
            return self.take_actions();
        }
        let (state, current, was_router) = (entry.state, entry.link_addr, entry.is_router);

        if state == NeighborState::Incomplete {
            let Some(mac) = na.link_addr else {
                return self.take_actions();
            };
            self.record_link_addr(id, mac);
            if na.solicited {
                self.confirm_reachable(now, id);
            } else {
                self.make_stale(now, id);
            }
            if let Some(entry) = self.cache.get_mut(id) {
                entry.is_router = na.router;
            }
            if na.router {
                self.onlink_check(now);
            }
            if self.routers.lookup(&target, ifindex).is_some() && !self.params.forwarding {
                self.pick_default_router(now);
            }
        } else {
            let changed = na.link_addr.is_some() && na.link_addr != current;
            if !na.override_flag && changed {
                // Keep the cached address but stop trusting it
                if state == NeighborState::Reachable {
                    self.make_stale(now, id);
                }
                return self.take_actions();
            }
            if let Some(mac) = na.link_addr {
                self.record_link_addr(id, mac);
            }
            if na.solicited {
                self.confirm_reachable(now, id);
            } else if changed {
                self.make_stale(now, id);
            }

            if was_router && !na.router {
                debug!(neighbor = %target, ifindex, "neighbor is no longer a router");
                if self.routers.lookup(&target, ifindex).is_some() {
                    self.drop_default_router(now, &target, ifindex);
                } else if !self.params.forwarding {
                    self.flush_via(&target, ifindex);
                }
            }
            if let Some(entry) = self.cache.get_mut(id) {
                entry.is_router = na.router;
            }
        }

        if let Some(entry) = self.cache.get_mut(id) {
            entry.asked = 0;
        }
        self.release_held(now, id);
        self.take_actions()
    }

    /// Processes a Neighbor Solicitation (RFC 4861 Section 7.2.3) and
    /// answers it when the target is ours or proxied by us.
    pub fn process_neighbor_solicitation(
        &mut self,
        now: Instant,
        ifindex: IfIndex,
        src: Ipv6Addr,
        ns: &NeighborSolicitation,
    ) -> Vec<NdAction> {
        if !self.interfaces.contains_key(&ifindex) {
            return self.take_actions();
        }
        if ns.target.is_multicast() || (src.is_unspecified() && ns.link_addr.is_some()) {
            debug!(src = %src, target = %ns.target, ifindex, "malformed neighbor solicitation ignored");
            self.metrics.malformed_updates.inc();
            return self.take_actions();
        }

        let (anycast, proxy) = match self.own_address(ifindex, &ns.target) {
            Some(addr) => {
                if addr.flags.contains(AddrFlags::TENTATIVE) {
                    debug!(target = %ns.target, ifindex, "solicitation for tentative address ignored");
                    return self.take_actions();
                }
                (addr.flags.contains(AddrFlags::ANYCAST), false)
            }
            None if self.is_proxied(&ns.target, ifindex) => (false, true),
            None => return self.take_actions(),
        };
        let override_flag = !(anycast || proxy);
        let router = self.params.forwarding;

        if src.is_unspecified() {
            // Duplicate address detection probe
            self.emit(NdAction::SendAdvertisement {
                ifindex,
                dst: ALL_NODES,
                target: ns.target,
                router,
                solicited: false,
                override_flag,
            });
            return self.take_actions();
        }

        self.learn_lladdr(now, ifindex, &src, ns.link_addr, NdMessage::NeighborSolicit);
        self.emit(NdAction::SendAdvertisement {
            ifindex,
            dst: src,
            target: ns.target,
            router,
            solicited: true,
            override_flag,
        });
        self.take_actions()
    }

    /// Upper-layer confirmation that `addr` is reachable.
    ///
    /// Without `force`, only `max_nud_hint` consecutive hints are honored
    /// before real probing is required again.
    pub fn nud_hint(&mut self, now: Instant, addr: &Ipv6Addr, ifindex: IfIndex, force: bool) -> Vec<NdAction> {
        let Some(id) = self.lookup(addr, ifindex) else {
            return self.take_actions();
        };
        let max = self.params.max_nud_hint;
        let Some(entry) = self.cache.get_mut(id) else {
            return self.take_actions();
        };
        if entry.state < NeighborState::Reachable {
            return self.take_actions();
        }
        if !force {
            entry.by_hint += 1;
            if entry.by_hint > max {
                return self.take_actions();
            }
        }
        let permanent = entry.permanent;
        self.set_state(id, NeighborState::Reachable);
        if !permanent {
            self.arm_reachable_timer(now, id);
        }
        self.take_actions()
    }

    /// Reachability confirmed by a solicited advertisement.
    fn confirm_reachable(&mut self, now: Instant, id: EntryId) {
        let Some(entry) = self.cache.get_mut(id) else {
            return;
        };
        entry.by_hint = 0;
        let permanent = entry.permanent;
        self.set_state(id, NeighborState::Reachable);
        if !permanent {
            self.arm_reachable_timer(now, id);
        }
    }

    fn arm_reachable_timer(&mut self, now: Instant, id: EntryId) {
        let Some(reachable) = self
            .cache
            .get(id)
            .and_then(|e| self.interfaces.get(&e.ifindex))
            .map(|i| i.nd.reachable_time)
        else {
            return;
        };
        self.set_entry_timer(now, id, reachable);
    }

    fn record_link_addr(&mut self, id: EntryId, mac: MacAddr) {
        let Some(entry) = self.cache.get_mut(id) else {
            return;
        };
        entry.link_addr = Some(mac);
        let route = entry.route;
        if let Some(route) = self.routes.get_mut(route) {
            route.gateway = Gateway::Link(Some(mac));
        }
    }

    /// Whether a proxy entry on `ifindex` answers for `target`.
    fn is_proxied(&self, target: &Ipv6Addr, ifindex: IfIndex) -> bool {
        self.route_lookup(target, ifindex)
            .and_then(|id| self.routes.get(id))
            .is_some_and(|r| {
                r.ifindex == ifindex
                    && r.flags.contains(RouteFlags::ANNOUNCE)
                    && matches!(r.gateway, Gateway::Link(_))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nd::address::InterfaceAddress;
    use crate::nd::engine::tests::*;
    use crate::nd::params::NdParams;
    use crate::nd::timer::FAR_FUTURE;
    use std::time::Duration;

    const OTHER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x42]);

    fn addr(s: &str) -> Ipv6Addr {
        s.parse().unwrap()
    }

    fn state(engine: &NdEngine, a: &str) -> Option<NeighborState> {
        engine
            .lookup(&addr(a), ETH0)
            .and_then(|id| engine.entry(id))
            .map(|e| e.state)
    }

    /// Entry with a link address in the given state.
    fn resolved(engine: &mut NdEngine, now: Instant, a: &str, st: NeighborState) -> EntryId {
        let id = engine.lookup_entry(now, &addr(a), ETH0, true).unwrap();
        engine.record_link_addr(id, PEER_MAC);
        engine.cache.get_mut(id).unwrap().state = st;
        id
    }

    fn installed(engine: &NdEngine) -> Option<Ipv6Addr> {
        engine.routers.installed().map(|dr| dr.address)
    }

    fn na(target: &str, link_addr: Option<MacAddr>) -> NeighborAdvertisement {
        NeighborAdvertisement {
            target: addr(target),
            link_addr,
            router: false,
            solicited: true,
            override_flag: true,
        }
    }

    // Link-layer address caching

    #[test]
    fn test_new_entry_with_lladdr_is_stale() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.cache_lladdr(now, ETH0, &addr("fe80::99"), Some(PEER_MAC), NdMessage::NeighborSolicit);

        let id = engine.lookup(&addr("fe80::99"), ETH0).unwrap();
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Stale);
        assert_eq!(entry.link_addr, Some(PEER_MAC));
        assert_eq!(entry.expire, Some(now + secs(86400)));
        assert!(!entry.is_router);
        let route = engine.routes().get(entry.route).unwrap();
        assert_eq!(route.gateway, Gateway::Link(Some(PEER_MAC)));
    }

    #[test]
    fn test_huge_gc_timer_is_clamped() {
        let now = Instant::now();
        let params = NdParams {
            gc_timer: Duration::from_secs(u64::MAX),
            ..Default::default()
        };
        let mut engine = engine_with(params, now);
        engine.cache_lladdr(now, ETH0, &addr("fe80::99"), Some(PEER_MAC), NdMessage::NeighborSolicit);

        let id = engine.lookup(&addr("fe80::99"), ETH0).unwrap();
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Stale);
        assert_eq!(entry.expire, Some(now + FAR_FUTURE));
        engine.handle_timers(now + secs(86400 * 365));
        assert_eq!(engine.entry(id).unwrap().state, NeighborState::Stale);
    }

    #[test]
    fn test_new_entry_without_lladdr_nostate() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.cache_lladdr(now, ETH0, &addr("fe80::99"), None, NdMessage::NeighborSolicit);
        assert_eq!(state(&engine, "fe80::99"), Some(NeighborState::NoState));
    }

    #[test]
    fn test_changed_lladdr_goes_stale() {
        let now = Instant::now();
        let mut engine = engine(now);
        let id = resolved(&mut engine, now, "fe80::99", NeighborState::Reachable);

        // Same address: nothing changes
        engine.cache_lladdr(now, ETH0, &addr("fe80::99"), Some(PEER_MAC), NdMessage::NeighborSolicit);
        assert_eq!(engine.entry(id).unwrap().state, NeighborState::Reachable);

        // No option: nothing changes
        engine.cache_lladdr(now, ETH0, &addr("fe80::99"), None, NdMessage::NeighborSolicit);
        assert_eq!(engine.entry(id).unwrap().state, NeighborState::Reachable);

        engine.cache_lladdr(now, ETH0, &addr("fe80::99"), Some(OTHER_MAC), NdMessage::NeighborSolicit);
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Stale);
        assert_eq!(entry.link_addr, Some(OTHER_MAC));
    }

    #[test]
    fn test_first_lladdr_flushes_hold_queue() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.output(now, ETH0, packet("2001:db8:1::5"), None).unwrap();
        assert_eq!(state(&engine, "2001:db8:1::5"), Some(NeighborState::Incomplete));

        let actions = engine.cache_lladdr(
            now,
            ETH0,
            &addr("2001:db8:1::5"),
            Some(PEER_MAC),
            NdMessage::NeighborSolicit,
        );
        assert_eq!(
            actions,
            vec![NdAction::Transmit {
                ifindex: ETH0,
                link_dst: Some(PEER_MAC),
                packet: packet("2001:db8:1::5"),
            }]
        );
        // Use of the stale entry starts the delay
        let id = engine.lookup(&addr("2001:db8:1::5"), ETH0).unwrap();
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Delay);
        assert_eq!(entry.expire, Some(now + secs(5)));
        assert!(entry.hold.is_empty());
    }

    #[test]
    fn test_malformed_updates_counted() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.cache_lladdr(now, ETH0, &addr("ff02::1"), Some(PEER_MAC), NdMessage::NeighborSolicit);
        let multicast_mac = MacAddr([0x33, 0x33, 0, 0, 0, 1]);
        engine.cache_lladdr(now, ETH0, &addr("fe80::99"), Some(multicast_mac), NdMessage::RouterAdvert);

        assert_eq!(engine.metrics().malformed_updates.get(), 2);
        assert!(engine.lookup(&addr("fe80::99"), ETH0).is_none());
    }

    #[test]
    fn test_unspecified_source_ignored() {
        let now = Instant::now();
        let mut engine = engine(now);
        let before = engine.cache.len();
        engine.cache_lladdr(now, ETH0, &Ipv6Addr::UNSPECIFIED, Some(PEER_MAC), NdMessage::NeighborSolicit);
        assert_eq!(engine.cache.len(), before);
        assert_eq!(engine.metrics().malformed_updates.get(), 0);
    }

    #[test]
    fn test_static_entry_not_updated() {
        let now = Instant::now();
        let mut engine = engine(now);
        let a = addr("2001:db8:1::20");
        engine.add_static_neighbor(now, a, ETH0, PEER_MAC).unwrap();

        engine.cache_lladdr(now, ETH0, &a, Some(OTHER_MAC), NdMessage::NeighborSolicit);
        let entry = engine.entry(engine.lookup(&a, ETH0).unwrap()).unwrap();
        assert_eq!(entry.link_addr, Some(PEER_MAC));
        assert_eq!(entry.state, NeighborState::Reachable);
    }

    #[test]
    fn test_router_flag_by_message() {
        let now = Instant::now();
        let mut engine = engine(now);
        let a = addr("fe80::99");
        let is_router = |engine: &NdEngine| engine.entry(engine.lookup(&a, ETH0).unwrap()).unwrap().is_router;

        engine.cache_lladdr(now, ETH0, &a, Some(PEER_MAC), NdMessage::RouterAdvert);
        assert!(is_router(&engine));

        // NS leaves an existing entry alone
        engine.cache_lladdr(now, ETH0, &a, Some(PEER_MAC), NdMessage::NeighborSolicit);
        assert!(is_router(&engine));

        engine.cache_lladdr(now, ETH0, &a, None, NdMessage::RouterSolicit);
        assert!(!is_router(&engine));

        engine.cache_lladdr(now, ETH0, &a, None, NdMessage::Redirect { to_router: true });
        assert!(is_router(&engine));

        engine.cache_lladdr(now, ETH0, &a, None, NdMessage::Redirect { to_router: false });
        assert!(is_router(&engine));
    }

    #[test]
    fn test_router_advert_reselects_router() {
        let now = Instant::now();
        let mut engine = engine(now);
        let (r1, r2) = (addr("fe80::1"), addr("fe80::2"));
        engine.add_default_router(now, r1, ETH0, 0, secs(1800));
        engine.add_default_router(now, r2, ETH0, 0, secs(1800));
        // Neither reachable: round robin moved on to r2
        assert_eq!(installed(&engine), Some(r2));

        engine.cache_lladdr(now, ETH0, &r1, Some(PEER_MAC), NdMessage::RouterAdvert);
        assert_eq!(installed(&engine), Some(r1));
    }

    // Neighbor advertisements

    #[test]
    fn test_solicited_na_completes_resolution() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.output(now, ETH0, packet("2001:db8:1::5"), None).unwrap();

        let actions = engine.process_neighbor_advertisement(now, ETH0, &na("2001:db8:1::5", Some(PEER_MAC)));
        assert_eq!(
            actions,
            vec![NdAction::Transmit {
                ifindex: ETH0,
                link_dst: Some(PEER_MAC),
                packet: packet("2001:db8:1::5"),
            }]
        );
        let id = engine.lookup(&addr("2001:db8:1::5"), ETH0).unwrap();
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Reachable);
        assert_eq!(entry.asked, 0);
        assert_eq!(entry.expire, Some(now + secs(30)));

        // Reachable times out to stale
        engine.handle_timers(now + secs(30));
        assert_eq!(state(&engine, "2001:db8:1::5"), Some(NeighborState::Stale));
    }

    #[test]
    fn test_unsolicited_na_incomplete_goes_stale() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.output(now, ETH0, packet("2001:db8:1::5"), None).unwrap();

        let advert = NeighborAdvertisement {
            solicited: false,
            router: true,
            ..na("2001:db8:1::5", Some(PEER_MAC))
        };
        engine.process_neighbor_advertisement(now, ETH0, &advert);
        let id = engine.lookup(&addr("2001:db8:1::5"), ETH0).unwrap();
        let entry = engine.entry(id).unwrap();
        // The held packet went out and moved it on to Delay
        assert_eq!(entry.state, NeighborState::Delay);
        assert!(entry.is_router);
    }

    #[test]
    fn test_na_without_lladdr_ignored_when_incomplete() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.output(now, ETH0, packet("2001:db8:1::5"), None).unwrap();

        let actions = engine.process_neighbor_advertisement(now, ETH0, &na("2001:db8:1::5", None));
        assert!(actions.is_empty());
        let id = engine.lookup(&addr("2001:db8:1::5"), ETH0).unwrap();
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Incomplete);
        assert_eq!(entry.hold.len(), 1);
    }

    #[test]
    fn test_na_without_override_keeps_lladdr() {
        let now = Instant::now();
        let mut engine = engine(now);
        let id = resolved(&mut engine, now, "2001:db8:1::5", NeighborState::Reachable);

        let advert = NeighborAdvertisement {
            override_flag: false,
            ..na("2001:db8:1::5", Some(OTHER_MAC))
        };
        engine.process_neighbor_advertisement(now, ETH0, &advert);
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Stale);
        assert_eq!(entry.link_addr, Some(PEER_MAC));
    }

    #[test]
    fn test_na_override_replaces_lladdr() {
        let now = Instant::now();
        let mut engine = engine(now);
        let id = resolved(&mut engine, now, "2001:db8:1::5", NeighborState::Reachable);

        let advert = NeighborAdvertisement {
            solicited: false,
            ..na("2001:db8:1::5", Some(OTHER_MAC))
        };
        engine.process_neighbor_advertisement(now, ETH0, &advert);
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Stale);
        assert_eq!(entry.link_addr, Some(OTHER_MAC));
        assert_eq!(entry.expire, Some(now + secs(86400)));
    }

    #[test]
    fn test_solicited_na_confirms_stale_entry() {
        let now = Instant::now();
        let mut engine = engine(now);
        let id = resolved(&mut engine, now, "2001:db8:1::5", NeighborState::Probe);
        engine.cache.get_mut(id).unwrap().by_hint = 3;

        let advert = NeighborAdvertisement {
            override_flag: false,
            ..na("2001:db8:1::5", None)
        };
        engine.process_neighbor_advertisement(now, ETH0, &advert);
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Reachable);
        assert_eq!(entry.link_addr, Some(PEER_MAC));
        assert_eq!(entry.by_hint, 0);
    }

    #[test]
    fn test_router_clearing_flag_is_removed() {
        let now = Instant::now();
        let mut engine = engine(now);
        let r1 = addr("fe80::1");
        engine.add_default_router(now, r1, ETH0, 0, secs(1800));
        engine.cache_lladdr(now, ETH0, &r1, Some(PEER_MAC), NdMessage::RouterAdvert);
        assert_eq!(installed(&engine), Some(r1));

        engine.process_neighbor_advertisement(now, ETH0, &na("fe80::1", Some(PEER_MAC)));
        assert!(engine.lookup_default_router(&r1, ETH0).is_none());
        assert_eq!(installed(&engine), None);
        let entry = engine.entry(engine.lookup(&r1, ETH0).unwrap()).unwrap();
        assert!(!entry.is_router);
    }

    #[test]
    fn test_na_for_own_or_unknown_address_ignored() {
        let now = Instant::now();
        let mut engine = engine(now);
        let actions = engine.process_neighbor_advertisement(now, ETH0, &na("2001:db8:1::1", Some(OTHER_MAC)));
        assert!(actions.is_empty());
        let local = engine.entry(engine.lookup(&addr("2001:db8:1::1"), ETH0).unwrap()).unwrap();
        assert_eq!(local.link_addr, Some(MAC0));

        engine.process_neighbor_advertisement(now, ETH0, &na("2001:db8:1::5", Some(PEER_MAC)));
        assert!(engine.lookup(&addr("2001:db8:1::5"), ETH0).is_none());
    }

    // Neighbor solicitations

    #[test]
    fn test_ns_for_own_address_answered() {
        let now = Instant::now();
        let mut engine = engine(now);
        let ns = NeighborSolicitation {
            target: addr("2001:db8:1::1"),
            link_addr: Some(PEER_MAC),
        };
        let actions = engine.process_neighbor_solicitation(now, ETH0, addr("fe80::99"), &ns);
        assert_eq!(
            actions,
            vec![NdAction::SendAdvertisement {
                ifindex: ETH0,
                dst: addr("fe80::99"),
                target: addr("2001:db8:1::1"),
                router: false,
                solicited: true,
                override_flag: true,
            }]
        );
        assert_eq!(state(&engine, "fe80::99"), Some(NeighborState::Stale));
        assert_eq!(engine.metrics().advertisements_sent.get(), 1);
    }

    #[test]
    fn test_ns_from_unspecified_source() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.set_forwarding(true);
        let ns = NeighborSolicitation {
            target: addr("2001:db8:1::1"),
            link_addr: None,
        };
        let before = engine.cache.len();
        let actions = engine.process_neighbor_solicitation(now, ETH0, Ipv6Addr::UNSPECIFIED, &ns);
        assert_eq!(
            actions,
            vec![NdAction::SendAdvertisement {
                ifindex: ETH0,
                dst: ALL_NODES,
                target: addr("2001:db8:1::1"),
                router: true,
                solicited: false,
                override_flag: true,
            }]
        );
        assert_eq!(engine.cache.len(), before);

        // Source link-layer option is not allowed with an unspecified source
        let bad = NeighborSolicitation {
            link_addr: Some(PEER_MAC),
            ..ns
        };
        assert!(engine
            .process_neighbor_solicitation(now, ETH0, Ipv6Addr::UNSPECIFIED, &bad)
            .is_empty());
        assert_eq!(engine.metrics().malformed_updates.get(), 1);
    }

    #[test]
    fn test_ns_for_anycast_and_proxy_no_override() {
        let now = Instant::now();
        let mut engine = engine(now);
        let anycast = InterfaceAddress {
            flags: AddrFlags::ANYCAST,
            ..InterfaceAddress::manual(addr("2001:db8:1::"), 64, ETH0)
        };
        engine.add_address(now, anycast).unwrap();
        engine.add_proxy_neighbor(now, addr("2001:db8:1::77"), ETH0).unwrap();

        for target in ["2001:db8:1::", "2001:db8:1::77"] {
            let ns = NeighborSolicitation {
                target: addr(target),
                link_addr: Some(PEER_MAC),
            };
            let actions = engine.process_neighbor_solicitation(now, ETH0, addr("fe80::99"), &ns);
            assert!(matches!(
                actions.as_slice(),
                [NdAction::SendAdvertisement { override_flag: false, solicited: true, .. }]
            ));
        }
    }

    #[test]
    fn test_ns_not_answered() {
        let now = Instant::now();
        let mut engine = engine(now);
        let tentative = InterfaceAddress {
            flags: AddrFlags::TENTATIVE,
            ..InterfaceAddress::manual(addr("2001:db8:1::2"), 64, ETH0)
        };
        engine.add_address(now, tentative).unwrap();

        for target in ["2001:db8:1::2", "2001:db8:1::55"] {
            let ns = NeighborSolicitation {
                target: addr(target),
                link_addr: Some(PEER_MAC),
            };
            let actions = engine.process_neighbor_solicitation(now, ETH0, addr("fe80::99"), &ns);
            assert!(actions.is_empty());
        }
        assert!(engine.lookup(&addr("fe80::99"), ETH0).is_none());
    }

    // Upper-layer hints

    #[test]
    fn test_nud_hint_ignored_by_default() {
        let now = Instant::now();
        let mut engine = engine(now);
        let id = resolved(&mut engine, now, "2001:db8:1::5", NeighborState::Stale);

        engine.nud_hint(now, &addr("2001:db8:1::5"), ETH0, false);
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Stale);
        assert_eq!(entry.by_hint, 1);

        // Forced hints bypass the limit
        engine.nud_hint(now, &addr("2001:db8:1::5"), ETH0, true);
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Reachable);
        assert_eq!(entry.expire, Some(now + secs(30)));
    }

    #[test]
    fn test_nud_hint_limit() {
        let now = Instant::now();
        let params = NdParams {
            max_nud_hint: 2,
            ..NdParams::default()
        };
        let mut engine = engine_with(params, now);
        let id = resolved(&mut engine, now, "2001:db8:1::5", NeighborState::Stale);

        for _ in 0..2 {
            engine.cache.get_mut(id).unwrap().state = NeighborState::Stale;
            engine.nud_hint(now, &addr("2001:db8:1::5"), ETH0, false);
            assert_eq!(engine.entry(id).unwrap().state, NeighborState::Reachable);
        }
        engine.cache.get_mut(id).unwrap().state = NeighborState::Stale;
        engine.nud_hint(now, &addr("2001:db8:1::5"), ETH0, false);
        assert_eq!(engine.entry(id).unwrap().state, NeighborState::Stale);
    }

    #[test]
    fn test_nud_hint_unresolved_ignored() {
        let now = Instant::now();
        let mut engine = engine(now);
        engine.output(now, ETH0, packet("2001:db8:1::5"), None).unwrap();

        engine.nud_hint(now + Duration::from_millis(10), &addr("2001:db8:1::5"), ETH0, true);
        let id = engine.lookup(&addr("2001:db8:1::5"), ETH0).unwrap();
        let entry = engine.entry(id).unwrap();
        assert_eq!(entry.state, NeighborState::Incomplete);
        assert_eq!(entry.by_hint, 0);
    }
}
