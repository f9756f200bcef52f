//! Default router list - RFC 4861 Section 6.3.6, RFC 4191 preferences

use crate::protocol::IfIndex;
use serde::Serialize;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

/// Default router preference (RFC 4191 Section 2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterPreference {
    Low,
    #[default]
    Medium,
    High,
}

impl RouterPreference {
    /// Decodes the Prf field of an RA flags byte. The reserved value is
    /// treated as medium.
    pub fn from_ra_flags(flags: u8) -> Self {
        match (flags >> 3) & 0x03 {
            0b01 => RouterPreference::High,
            0b11 => RouterPreference::Low,
            _ => RouterPreference::Medium,
        }
    }
}

/// A router known from Router Advertisements.
#[derive(Debug, Clone)]
pub struct DefaultRouter {
    pub address: Ipv6Addr,
    pub ifindex: IfIndex,
    /// RA flags byte as advertised
    pub flags: u8,
    pub preference: RouterPreference,
    pub lifetime: Duration,
    /// `None` when the router never expires
    pub expire: Option<Instant>,
    /// Currently holds the default route
    pub installed: bool,
}

impl DefaultRouter {
    pub fn new(address: Ipv6Addr, ifindex: IfIndex, lifetime: Duration, now: Instant) -> Self {
        Self {
            address,
            ifindex,
            flags: 0,
            preference: RouterPreference::Medium,
            lifetime,
            expire: now.checked_add(lifetime),
            installed: false,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire.is_some_and(|expire| expire < now)
    }
}

/// Ordered list of default routers. Insertion order is the selection order.
#[derive(Debug, Default)]
pub struct RouterList {
    routers: Vec<DefaultRouter>,
}

impl RouterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, address: &Ipv6Addr, ifindex: IfIndex) -> Option<&DefaultRouter> {
        self.position(address, ifindex).map(|i| &self.routers[i])
    }

    pub fn lookup_mut(&mut self, address: &Ipv6Addr, ifindex: IfIndex) -> Option<&mut DefaultRouter> {
        self.position(address, ifindex)
            .map(move |i| &mut self.routers[i])
    }

    /// Inserts or refreshes a router. Returns true for a new router.
    ///
    /// The list stays in descending preference order, arrival order within
    /// one preference. A known router keeps its position and installed flag
    /// unless its preference changed, in which case it is re-inserted.
    pub fn upsert(&mut self, router: DefaultRouter) -> bool {
        match self.position(&router.address, router.ifindex) {
            Some(i) if self.routers[i].preference == router.preference => {
                let installed = self.routers[i].installed;
                self.routers[i] = DefaultRouter { installed, ..router };
                false
            }
            Some(i) => {
                let installed = self.routers.remove(i).installed;
                self.insert_ordered(DefaultRouter { installed, ..router });
                false
            }
            None => {
                self.insert_ordered(router);
                true
            }
        }
    }

    pub fn remove(&mut self, address: &Ipv6Addr, ifindex: IfIndex) -> Option<DefaultRouter> {
        self.position(address, ifindex)
            .map(|i| self.routers.remove(i))
    }

    pub fn installed(&self) -> Option<&DefaultRouter> {
        self.routers.iter().find(|r| r.installed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DefaultRouter> {
        self.routers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DefaultRouter> {
        self.routers.iter_mut()
    }

    /// (address, ifindex) of every router, in list order.
    pub fn keys(&self) -> Vec<(Ipv6Addr, IfIndex)> {
        self.routers.iter().map(|r| (r.address, r.ifindex)).collect()
    }

    pub fn len(&self) -> usize {
        self.routers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routers.is_empty()
    }

    fn insert_ordered(&mut self, router: DefaultRouter) {
        let at = self
            .routers
            .iter()
            .position(|r| router.preference > r.preference)
            .unwrap_or(self.routers.len());
        self.routers.insert(at, router);
    }

    fn position(&self, address: &Ipv6Addr, ifindex: IfIndex) -> Option<usize> {
        self.routers
            .iter()
            .position(|r| r.address == *address && r.ifindex == ifindex)
    }
}
