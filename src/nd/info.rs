//! Read-only snapshots of the engine tables
//!
//! These are what `ndp -r`, `ndp -p`, `ndp -a` and `ndp -i` would show.
//! Deadlines are converted to whole seconds remaining at `now`.

use crate::nd::engine::NdEngine;
use crate::nd::neighbor::NeighborState;
use crate::nd::prefix_list::PrefixState;
use crate::nd::router_list::RouterPreference;
use crate::protocol::{IfIndex, LinkKind, MacAddr};
use serde::Serialize;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterInfo {
    pub address: Ipv6Addr,
    pub ifindex: IfIndex,
    pub flags: u8,
    pub preference: RouterPreference,
    pub lifetime_secs: u64,
    /// `None` = never expires
    pub expires_in_secs: Option<u64>,
    pub installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdvertisingRouter {
    pub address: Ipv6Addr,
    pub reachable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefixInfo {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub ifindex: IfIndex,
    pub on_link: bool,
    pub autonomous: bool,
    pub valid_lifetime_secs: Option<u64>,
    pub preferred_lifetime_secs: Option<u64>,
    pub expires_in_secs: Option<u64>,
    pub refcount: u32,
    /// Interface route installed
    pub onlink: bool,
    pub detached: bool,
    pub advertising_routers: Vec<AdvertisingRouter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NeighborInfo {
    pub address: Ipv6Addr,
    pub ifindex: IfIndex,
    pub state: NeighborState,
    pub link_addr: Option<MacAddr>,
    pub is_router: bool,
    pub asked: u32,
    pub permanent: bool,
    pub expires_in_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub ifindex: IfIndex,
    pub name: String,
    pub kind: LinkKind,
    pub mac: MacAddr,
    pub perform_nud: bool,
    pub accept_rtadv: bool,
    pub disabled: bool,
    pub base_reachable_time_ms: u64,
    pub reachable_time_ms: u64,
    pub retrans_timer_ms: u64,
    pub hop_limit: u8,
    pub addresses: Vec<Ipv6Addr>,
}

impl NdEngine {
    /// Default router list in selection order.
    pub fn default_routers(&self, now: Instant) -> Vec<RouterInfo> {
        self.routers
            .iter()
            .map(|dr| RouterInfo {
                address: dr.address,
                ifindex: dr.ifindex,
                flags: dr.flags,
                preference: dr.preference,
                lifetime_secs: dr.lifetime.as_secs(),
                expires_in_secs: remaining(now, dr.expire),
                installed: dr.installed,
            })
            .collect()
    }

    pub fn prefixes(&self, now: Instant) -> Vec<PrefixInfo> {
        self.prefixes
            .iter()
            .map(|pr| PrefixInfo {
                prefix: pr.prefix,
                prefix_len: pr.prefix_len,
                ifindex: pr.ifindex,
                on_link: pr.on_link,
                autonomous: pr.autonomous,
                valid_lifetime_secs: pr.valid_lifetime.map(|d| d.as_secs()),
                preferred_lifetime_secs: pr.preferred_lifetime.map(|d| d.as_secs()),
                expires_in_secs: remaining(now, pr.expire()),
                refcount: pr.refcount,
                onlink: pr.state.contains(PrefixState::ONLINK),
                detached: pr.state.contains(PrefixState::DETACHED),
                advertising_routers: pr
                    .advertising_routers
                    .iter()
                    .map(|addr| AdvertisingRouter {
                        address: *addr,
                        reachable: self.is_router_reachable(addr, pr.ifindex),
                    })
                    .collect(),
            })
            .collect()
    }

    /// State of the entry for `addr` on `ifindex`, if one exists.
    pub fn neighbor_info(&self, now: Instant, addr: &Ipv6Addr, ifindex: IfIndex) -> Option<NeighborInfo> {
        let id = self.lookup(addr, ifindex)?;
        self.cache.get(id).map(|entry| NeighborInfo {
            address: entry.addr,
            ifindex: entry.ifindex,
            state: entry.state,
            link_addr: entry.link_addr,
            is_router: entry.is_router,
            asked: entry.asked,
            permanent: entry.permanent,
            expires_in_secs: remaining(now, entry.expire),
        })
    }

    /// Every cache entry, most recently used first.
    pub fn neighbors(&self, now: Instant) -> Vec<NeighborInfo> {
        self.cache
            .iter()
            .map(|(_, entry)| NeighborInfo {
                address: entry.addr,
                ifindex: entry.ifindex,
                state: entry.state,
                link_addr: entry.link_addr,
                is_router: entry.is_router,
                asked: entry.asked,
                permanent: entry.permanent,
                expires_in_secs: remaining(now, entry.expire),
            })
            .collect()
    }

    pub fn interface_info(&self, ifindex: IfIndex) -> Option<InterfaceInfo> {
        let iface = self.interfaces.get(&ifindex)?;
        Some(InterfaceInfo {
            ifindex,
            name: iface.name.clone(),
            kind: iface.kind,
            mac: iface.mac,
            perform_nud: iface.nd.performs_nud(),
            accept_rtadv: iface.nd.accepts_rtadv(),
            disabled: iface.nd.is_disabled(),
            base_reachable_time_ms: millis(iface.nd.base_reachable_time),
            reachable_time_ms: millis(iface.nd.reachable_time),
            retrans_timer_ms: millis(iface.nd.retrans_timer),
            hop_limit: iface.nd.hop_limit,
            addresses: self
                .addresses
                .iter()
                .filter(|a| a.ifindex == ifindex)
                .map(|a| a.addr)
                .collect(),
        })
    }
}

fn remaining(now: Instant, deadline: Option<Instant>) -> Option<u64> {
    deadline.map(|t| t.saturating_duration_since(now).as_secs())
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nd::address::link_local_from_mac;
    use crate::nd::engine::tests::*;
    use crate::nd::prefix_list::Prefix;
    use crate::nd::update::NdMessage;

    #[test]
    fn test_default_routers_snapshot() {
        let now = Instant::now();
        let mut engine = engine(now);
        let router: Ipv6Addr = "fe80::1".parse().unwrap();
        engine.add_default_router(now, router, ETH0, 0x08, secs(1800));

        let routers = engine.default_routers(now + secs(100));
        assert_eq!(
            routers,
            vec![RouterInfo {
                address: router,
                ifindex: ETH0,
                flags: 0x08,
                preference: RouterPreference::High,
                lifetime_secs: 1800,
                expires_in_secs: Some(1700),
                installed: true,
            }]
        );
    }

    #[test]
    fn test_prefixes_snapshot() {
        let now = Instant::now();
        let mut engine = engine(now);
        let router: Ipv6Addr = "fe80::1".parse().unwrap();
        engine.add_default_router(now, router, ETH0, 0, secs(1800));
        engine.cache_lladdr(now, ETH0, &router, Some(PEER_MAC), NdMessage::RouterAdvert);
        engine.add_prefix(
            now,
            Prefix {
                valid_lifetime: Some(secs(600)),
                advertising_routers: vec![router],
                ..Prefix::new("2001:db8:7::".parse().unwrap(), 64, ETH0, now)
            },
        );

        let prefixes = engine.prefixes(now + secs(60));
        assert_eq!(prefixes.len(), 1);
        let pr = &prefixes[0];
        assert_eq!(pr.valid_lifetime_secs, Some(600));
        assert_eq!(pr.preferred_lifetime_secs, None);
        assert_eq!(pr.expires_in_secs, Some(540));
        assert!(pr.onlink);
        assert!(!pr.detached);
        assert_eq!(
            pr.advertising_routers,
            vec![AdvertisingRouter {
                address: router,
                reachable: true,
            }]
        );
    }

    #[test]
    fn test_neighbor_info() {
        let now = Instant::now();
        let mut engine = engine(now);
        let addr: Ipv6Addr = "2001:db8:1::5".parse().unwrap();
        assert!(engine.neighbor_info(now, &addr, ETH0).is_none());

        engine.output(now, ETH0, packet("2001:db8:1::5"), None).unwrap();
        let info = engine.neighbor_info(now, &addr, ETH0).unwrap();
        assert_eq!(info.state, NeighborState::Incomplete);
        assert_eq!(info.asked, 1);
        assert_eq!(info.link_addr, None);
        assert!(!info.permanent);
        assert_eq!(info.expires_in_secs, Some(1));

        // Most recently used first
        let all = engine.neighbors(now);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].address, addr);
        assert!(all[1..].iter().all(|n| n.permanent));
    }

    #[test]
    fn test_interface_info() {
        let now = Instant::now();
        let engine = engine(now);
        let info = engine.interface_info(ETH0).unwrap();
        assert_eq!(info.name, "eth0");
        assert_eq!(info.kind, LinkKind::Ethernet);
        assert!(info.perform_nud);
        assert!(info.accept_rtadv);
        assert!(!info.disabled);
        assert_eq!(info.reachable_time_ms, 30_000);
        assert_eq!(info.retrans_timer_ms, 1000);
        assert_eq!(info.hop_limit, 64);
        assert_eq!(
            info.addresses,
            vec![link_local_from_mac(&MAC0), "2001:db8:1::1".parse().unwrap()]
        );
        assert!(engine.interface_info(9).is_none());
    }
}
