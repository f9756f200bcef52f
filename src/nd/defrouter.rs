//! Default router and prefix list maintenance - RFC 4861 Section 6.3.4-6.3.6
//!
//! The lists themselves are plain containers; everything that touches the
//! routing table or the neighbor cache when they change lives here.

use crate::nd::action::NdAction;
use crate::nd::address::AddrFlags;
use crate::nd::engine::{FreeReason, NdEngine, RtRequest};
use crate::nd::prefix_list::{Prefix, PrefixState};
use crate::nd::router_list::{DefaultRouter, RouterPreference};
use crate::nd::routing::{Route, RouteFlags};
use crate::protocol::{is_link_local, IfIndex, ALL_NODES};
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};
use tracing::{debug, info};

impl NdEngine {
    // Default routers

    /// Adds or refreshes a router learned from a Router Advertisement.
    ///
    /// # Arguments
    /// * `flags` - RA flags byte; the preference is taken from its Prf bits
    /// * `lifetime` - Router lifetime. Zero removes the router.
    pub fn add_default_router(
        &mut self,
        now: Instant,
        addr: Ipv6Addr,
        ifindex: IfIndex,
        flags: u8,
        lifetime: Duration,
    ) -> Vec<NdAction> {
        if lifetime.is_zero() {
            if self.routers.lookup(&addr, ifindex).is_some() {
                self.drop_default_router(now, &addr, ifindex);
            }
            return self.take_actions();
        }

        let router = DefaultRouter {
            flags,
            preference: RouterPreference::from_ra_flags(flags),
            ..DefaultRouter::new(addr, ifindex, lifetime, now)
        };
        if self.routers.upsert(router) {
            info!(router = %addr, ifindex, ?lifetime, "default router added");
        }
        if !self.params.forwarding {
            self.pick_default_router(now);
        }
        self.take_actions()
    }

    pub fn lookup_default_router(&self, addr: &Ipv6Addr, ifindex: IfIndex) -> Option<&DefaultRouter> {
        self.routers.lookup(addr, ifindex)
    }

    /// Removes a default router, its default route and the host routes
    /// through it.
    pub fn delete_default_router(
        &mut self,
        now: Instant,
        addr: &Ipv6Addr,
        ifindex: IfIndex,
    ) -> Vec<NdAction> {
        self.drop_default_router(now, addr, ifindex);
        self.take_actions()
    }

    /// Re-runs default router selection.
    pub fn select_default_router(&mut self, now: Instant) -> Vec<NdAction> {
        self.pick_default_router(now);
        self.take_actions()
    }

    /// Removes every default router.
    pub fn flush_default_routers(&mut self, now: Instant) -> Vec<NdAction> {
        let installed: Vec<_> = self
            .routers
            .iter()
            .filter(|dr| dr.installed)
            .map(|dr| (dr.address, dr.ifindex))
            .collect();
        for (addr, ifindex) in installed {
            self.uninstall_default_route(&addr, ifindex);
        }
        for (addr, ifindex) in self.routers.keys() {
            self.drop_default_router(now, &addr, ifindex);
        }
        self.pick_default_router(now);
        self.take_actions()
    }

    pub(crate) fn drop_default_router(&mut self, now: Instant, addr: &Ipv6Addr, ifindex: IfIndex) {
        let Some(router) = self.routers.lookup(addr, ifindex) else {
            return;
        };
        let installed = router.installed;
        let accepts = self
            .interfaces
            .get(&ifindex)
            .is_some_and(|i| i.nd.accepts_rtadv());

        if !self.params.forwarding && accepts {
            self.flush_via(addr, ifindex);
        }
        if installed {
            self.uninstall_default_route(addr, ifindex);
        }
        self.routers.remove(addr, ifindex);
        info!(router = %addr, ifindex, "default router removed");

        for prefix in self.prefixes.iter_mut() {
            if prefix.ifindex == ifindex {
                prefix.advertising_routers.retain(|r| r != addr);
            }
        }
        self.onlink_check(now);
        if installed {
            self.pick_default_router(now);
        }
    }

    /// Default router selection (RFC 4861 Section 6.3.6, RFC 4191).
    ///
    /// Prefers the first probably reachable router, keeping the installed
    /// one unless the new choice has strictly higher preference. With no
    /// reachable router the installed one rotates round-robin.
    pub(crate) fn pick_default_router(&mut self, now: Instant) {
        let candidates: Vec<_> = self
            .routers
            .iter()
            .filter(|dr| {
                self.interfaces
                    .get(&dr.ifindex)
                    .is_some_and(|i| i.nd.accepts_rtadv())
            })
            .map(|dr| (dr.address, dr.ifindex, dr.preference, dr.installed))
            .collect();

        let installed = self
            .routers
            .iter()
            .find(|dr| dr.installed)
            .map(|dr| (dr.address, dr.ifindex));

        let reachable = candidates
            .iter()
            .find(|(addr, ifindex, ..)| self.is_router_reachable(addr, *ifindex));
        let selected = match reachable {
            Some(&(addr, ifindex, preference, _)) => {
                let keep = candidates
                    .iter()
                    .find(|(a, i, _, inst)| *inst && self.is_router_reachable(a, *i))
                    .filter(|(_, _, installed_pref, _)| *installed_pref >= preference);
                Some(keep.map_or((addr, ifindex), |&(a, i, ..)| (a, i)))
            }
            None => {
                let current = candidates.iter().position(|(.., inst)| *inst);
                let next = match current {
                    Some(pos) if pos + 1 < candidates.len() => candidates.get(pos + 1),
                    _ => candidates.first(),
                };
                next.map(|&(a, i, ..)| (a, i))
            }
        };

        if installed == selected {
            return;
        }
        if let Some((addr, ifindex)) = installed {
            self.uninstall_default_route(&addr, ifindex);
        }
        if let Some((addr, ifindex)) = selected {
            self.install_default_route(now, &addr, ifindex);
        }
    }

    /// Whether the router's neighbor entry has a usable link address.
    pub(crate) fn is_router_reachable(&self, addr: &Ipv6Addr, ifindex: IfIndex) -> bool {
        self.lookup(addr, ifindex)
            .and_then(|id| self.cache.get(id))
            .is_some_and(|entry| entry.state.is_resolved())
    }

    fn install_default_route(&mut self, now: Instant, addr: &Ipv6Addr, ifindex: IfIndex) {
        let route = Route::via(Ipv6Addr::UNSPECIFIED, 0, *addr, ifindex);
        self.add_route(now, route, RtRequest::Add);
        if let Some(router) = self.routers.lookup_mut(addr, ifindex) {
            router.installed = true;
        }
        debug!(router = %addr, ifindex, "default route installed");
    }

    fn uninstall_default_route(&mut self, addr: &Ipv6Addr, ifindex: IfIndex) {
        let ids = self.routes.ids_where(|r| {
            r.prefix_len == 0
                && r.ifindex == ifindex
                && r.flags.contains(RouteFlags::GATEWAY)
                && r.inet_gateway() == Some(*addr)
        });
        for id in ids {
            self.unlink_route(id);
        }
        if let Some(router) = self.routers.lookup_mut(addr, ifindex) {
            router.installed = false;
        }
        debug!(router = %addr, ifindex, "default route removed");
    }

    /// Deletes the dynamically learned host routes through `gateway`.
    pub fn flush_routes_via(&mut self, gateway: &Ipv6Addr, ifindex: IfIndex) -> Vec<NdAction> {
        self.flush_via(gateway, ifindex);
        self.take_actions()
    }

    pub(crate) fn flush_via(&mut self, gateway: &Ipv6Addr, ifindex: IfIndex) {
        // Only link-local next hops are unambiguous per interface
        if !is_link_local(gateway) {
            return;
        }
        let ids = self.routes.ids_where(|r| {
            r.ifindex == ifindex
                && r.inet_gateway() == Some(*gateway)
                && r.flags.contains(RouteFlags::HOST)
                && !r.flags.contains(RouteFlags::STATIC)
        });
        if !ids.is_empty() {
            debug!(gateway = %gateway, ifindex, count = ids.len(), "flushing routes via gateway");
        }
        for id in ids {
            self.unlink_route(id);
        }
    }

    // Prefixes

    /// Adds or refreshes a prefix. An on-link prefix gets its interface
    /// route.
    pub fn add_prefix(&mut self, now: Instant, prefix: Prefix) -> Vec<NdAction> {
        let key = (prefix.prefix, prefix.prefix_len, prefix.ifindex);
        let on_link = prefix.on_link;
        if self.prefixes.upsert(prefix) {
            info!(prefix = %key.0, len = key.1, ifindex = key.2, "prefix added");
        }
        let onlink_state = self
            .prefixes
            .lookup(&key.0, key.1, key.2)
            .map(|p| p.state)
            .unwrap_or_default();
        if on_link && !onlink_state.contains(PrefixState::ONLINK) {
            self.prefix_onlink(now, &key.0, key.1, key.2);
        }
        self.onlink_check(now);
        self.take_actions()
    }

    /// Takes a prefix off-link and removes it. A prefix still referenced by
    /// autoconfigured addresses keeps its record with zero lifetimes.
    pub fn remove_prefix(
        &mut self,
        now: Instant,
        prefix: &Ipv6Addr,
        prefix_len: u8,
        ifindex: IfIndex,
    ) -> Vec<NdAction> {
        self.unlink_prefix(now, prefix, prefix_len, ifindex, false);
        self.take_actions()
    }

    /// Removes all non link-local prefixes and the addresses formed from
    /// them.
    pub fn flush_prefixes(&mut self, now: Instant) -> Vec<NdAction> {
        for (prefix, len, ifindex) in self.prefixes.keys() {
            if is_link_local(&prefix) {
                continue;
            }
            while let Some(index) = self.addresses.iter().position(|a| {
                a.flags.contains(AddrFlags::AUTOCONF)
                    && a.ifindex == ifindex
                    && a.prefix_len == len
                    && a.prefix() == prefix
            }) {
                self.purge_address(index);
            }
            self.unlink_prefix(now, &prefix, len, ifindex, false);
        }
        self.take_actions()
    }

    pub(crate) fn unlink_prefix(
        &mut self,
        now: Instant,
        prefix: &Ipv6Addr,
        prefix_len: u8,
        ifindex: IfIndex,
        force: bool,
    ) {
        let Some(pr) = self.prefixes.lookup_mut(prefix, prefix_len, ifindex) else {
            return;
        };
        pr.valid_lifetime = Some(Duration::ZERO);
        pr.preferred_lifetime = Some(Duration::ZERO);
        if force {
            pr.refcount = 0;
        }
        let (onlink, refcount) = (pr.state.contains(PrefixState::ONLINK), pr.refcount);

        if onlink {
            self.prefix_offlink(prefix, prefix_len, ifindex);
        }
        if refcount > 0 {
            debug!(prefix = %prefix, len = prefix_len, ifindex, refcount, "prefix still referenced");
            return;
        }
        self.prefixes.remove(prefix, prefix_len, ifindex);
        info!(prefix = %prefix, len = prefix_len, ifindex, "prefix removed");
        self.onlink_check(now);
    }

    fn prefix_onlink(&mut self, now: Instant, prefix: &Ipv6Addr, prefix_len: u8, ifindex: IfIndex) {
        if self.routes.find_exact(prefix, prefix_len, ifindex).is_none() {
            self.add_route(now, Route::interface(*prefix, prefix_len, ifindex), RtRequest::Add);
        }
        if let Some(pr) = self.prefixes.lookup_mut(prefix, prefix_len, ifindex) {
            pr.state.insert(PrefixState::ONLINK);
        }
        debug!(prefix = %prefix, len = prefix_len, ifindex, "prefix on-link");
    }

    fn prefix_offlink(&mut self, prefix: &Ipv6Addr, prefix_len: u8, ifindex: IfIndex) {
        if let Some(rid) = self.routes.find_exact(prefix, prefix_len, ifindex) {
            self.unlink_route(rid);
        }
        if let Some(pr) = self.prefixes.lookup_mut(prefix, prefix_len, ifindex) {
            pr.state.remove(PrefixState::ONLINK);
        }
        debug!(prefix = %prefix, len = prefix_len, ifindex, "prefix off-link");
    }

    fn has_reachable_router(&self, prefix: &Prefix) -> bool {
        prefix
            .advertising_routers
            .iter()
            .any(|r| self.is_router_reachable(r, prefix.ifindex))
    }

    /// Re-evaluates on-link state of all prefixes.
    pub fn recheck_onlink_prefixes(&mut self, now: Instant) -> Vec<NdAction> {
        self.onlink_check(now);
        self.take_actions()
    }

    /// While some advertised prefix has a reachable router, prefixes without
    /// one are detached and lose their interface route. Otherwise every
    /// prefix is attached. Autoconfigured addresses follow their prefix.
    pub(crate) fn onlink_check(&mut self, now: Instant) {
        let reach: Vec<_> = self
            .prefixes
            .iter()
            .map(|p| {
                (
                    (p.prefix, p.prefix_len, p.ifindex),
                    p.on_link,
                    self.has_reachable_router(p),
                )
            })
            .collect();

        let any_reachable = reach.iter().any(|(_, on_link, r)| *on_link && *r);
        let unadvertised = !self.routers.is_empty()
            && self.prefixes.iter().all(|p| p.advertising_routers.is_empty());

        if any_reachable || unadvertised {
            for ((prefix, len, ifindex), on_link, reachable) in &reach {
                if is_link_local(prefix) || !on_link {
                    continue;
                }
                if let Some(pr) = self.prefixes.lookup_mut(prefix, *len, *ifindex) {
                    pr.state.set(PrefixState::DETACHED, !reachable);
                }
            }
        } else {
            for pr in self.prefixes.iter_mut() {
                pr.state.remove(PrefixState::DETACHED);
            }
        }

        let states: Vec<_> = self
            .prefixes
            .iter()
            .filter(|p| !is_link_local(&p.prefix) && p.on_link)
            .map(|p| ((p.prefix, p.prefix_len, p.ifindex), p.state))
            .collect();
        for ((prefix, len, ifindex), state) in states {
            let detached = state.contains(PrefixState::DETACHED);
            let onlink = state.contains(PrefixState::ONLINK);
            if detached && onlink {
                self.prefix_offlink(&prefix, len, ifindex);
            } else if !detached && !onlink {
                self.prefix_onlink(now, &prefix, len, ifindex);
            }
        }

        // Addresses formed from the prefixes
        let address_reach: Vec<Option<bool>> = self
            .addresses
            .iter()
            .map(|a| {
                if !a.flags.contains(AddrFlags::AUTOCONF) {
                    return None;
                }
                self.prefixes
                    .lookup(&a.prefix(), a.prefix_len, a.ifindex)
                    .map(|p| self.has_reachable_router(p))
            })
            .collect();
        let any_address_reachable = address_reach.iter().any(|r| *r == Some(true));

        for (addr, reach) in self.addresses.iter_mut().zip(address_reach) {
            if !addr.flags.contains(AddrFlags::AUTOCONF) {
                continue;
            }
            let attach = match (any_address_reachable, reach) {
                (false, _) => true,
                (true, Some(reachable)) => reachable,
                (true, None) => continue,
            };
            if !attach {
                addr.flags.insert(AddrFlags::DETACHED);
            } else if addr.flags.contains(AddrFlags::DETACHED) {
                addr.flags.remove(AddrFlags::DETACHED);
                // Needs duplicate address detection again
                addr.flags.insert(AddrFlags::TENTATIVE);
            }
        }
    }

    // Interfaces

    /// Forgets everything learned on an interface: its default routers,
    /// prefixes and neighbor entries.
    pub fn purge_interface(&mut self, now: Instant, ifindex: IfIndex) -> Vec<NdAction> {
        let (installed, others): (Vec<_>, Vec<_>) = self
            .routers
            .iter()
            .filter(|dr| dr.ifindex == ifindex)
            .map(|dr| (dr.address, dr.installed))
            .partition(|(_, installed)| *installed);
        for (addr, _) in others.into_iter().chain(installed) {
            self.drop_default_router(now, &addr, ifindex);
        }

        for (prefix, len, index) in self.prefixes.keys() {
            if index == ifindex {
                self.unlink_prefix(now, &prefix, len, index, true);
            }
        }

        let accepts = self
            .interfaces
            .get(&ifindex)
            .is_some_and(|i| i.nd.accepts_rtadv());
        if accepts && !self.params.forwarding {
            self.pick_default_router(now);
        }

        let entries: Vec<_> = self
            .cache
            .iter()
            .filter(|(_, e)| e.ifindex == ifindex)
            .map(|(id, _)| id)
            .collect();
        for id in entries {
            self.free_entry(now, id, FreeReason::Failure);
        }
        info!(ifindex, "interface purged");
        self.take_actions()
    }

    /// Unsolicited Neighbor Advertisement for one of our addresses to
    /// all-nodes (RFC 4861 Section 7.2.6).
    pub fn announce_address(&mut self, addr: &Ipv6Addr, ifindex: IfIndex) -> Vec<NdAction> {
        let Some(own) = self.own_address(ifindex, addr) else {
            debug!(addr = %addr, ifindex, "not our address, not announced");
            return self.take_actions();
        };
        let anycast = own.flags.contains(AddrFlags::ANYCAST);
        self.emit(NdAction::SendAdvertisement {
            ifindex,
            dst: ALL_NODES,
            target: *addr,
            router: self.params.forwarding,
            solicited: false,
            override_flag: !anycast,
        });
        self.take_actions()
    }
}
