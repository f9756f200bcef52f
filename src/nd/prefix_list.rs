//! Prefix list - RFC 4861 Section 6.3.4

use crate::protocol::{prefix_matches, IfIndex};
use bitflags::bitflags;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

bitflags! {
    /// Prefix state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PrefixState: u8 {
        /// Interface route for the prefix is installed
        const ONLINK = 1 << 0;
        /// No reachable router advertises this prefix
        const DETACHED = 1 << 1;
    }
}

/// A prefix known from Router Advertisements or configuration.
#[derive(Debug, Clone)]
pub struct Prefix {
    pub prefix: Ipv6Addr,
    pub prefix_len: u8,
    pub ifindex: IfIndex,
    /// L flag
    pub on_link: bool,
    /// A flag
    pub autonomous: bool,
    /// `None` = infinite
    pub valid_lifetime: Option<Duration>,
    /// `None` = infinite
    pub preferred_lifetime: Option<Duration>,
    pub last_update: Instant,
    /// Addresses derived from this prefix
    pub refcount: u32,
    pub advertising_routers: Vec<Ipv6Addr>,
    pub state: PrefixState,
}

impl Prefix {
    pub fn new(prefix: Ipv6Addr, prefix_len: u8, ifindex: IfIndex, now: Instant) -> Self {
        Self {
            prefix: crate::protocol::mask_prefix(&prefix, prefix_len),
            prefix_len,
            ifindex,
            on_link: true,
            autonomous: true,
            valid_lifetime: None,
            preferred_lifetime: None,
            last_update: now,
            refcount: 0,
            advertising_routers: Vec::new(),
            state: PrefixState::empty(),
        }
    }

    /// Whether the valid lifetime has elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.valid_lifetime
            .is_some_and(|vltime| now.saturating_duration_since(self.last_update) > vltime)
    }

    /// Absolute expiry, if the lifetime is finite and representable.
    pub fn expire(&self) -> Option<Instant> {
        self.valid_lifetime
            .and_then(|vltime| self.last_update.checked_add(vltime))
    }

    pub fn contains(&self, addr: &Ipv6Addr) -> bool {
        prefix_matches(&self.prefix, self.prefix_len, addr)
    }

    /// Participates in on-link determination.
    pub fn is_onlink_active(&self) -> bool {
        self.state.contains(PrefixState::ONLINK)
    }
}

/// List of known prefixes.
#[derive(Debug, Default)]
pub struct PrefixList {
    prefixes: Vec<Prefix>,
}

impl PrefixList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, prefix: &Ipv6Addr, len: u8, ifindex: IfIndex) -> Option<&Prefix> {
        self.position(prefix, len, ifindex).map(|i| &self.prefixes[i])
    }

    pub fn lookup_mut(&mut self, prefix: &Ipv6Addr, len: u8, ifindex: IfIndex) -> Option<&mut Prefix> {
        self.position(prefix, len, ifindex)
            .map(move |i| &mut self.prefixes[i])
    }

    /// Inserts or replaces a prefix, preserving the reference count and
    /// merging the advertising routers of an existing record.
    pub fn upsert(&mut self, mut prefix: Prefix) -> bool {
        match self.position(&prefix.prefix, prefix.prefix_len, prefix.ifindex) {
            Some(i) => {
                let old = &self.prefixes[i];
                prefix.refcount = old.refcount;
                prefix.state = old.state;
                for rtr in &old.advertising_routers {
                    if !prefix.advertising_routers.contains(rtr) {
                        prefix.advertising_routers.push(*rtr);
                    }
                }
                self.prefixes[i] = prefix;
                false
            }
            None => {
                self.prefixes.push(prefix);
                true
            }
        }
    }

    pub fn remove(&mut self, prefix: &Ipv6Addr, len: u8, ifindex: IfIndex) -> Option<Prefix> {
        self.position(prefix, len, ifindex)
            .map(|i| self.prefixes.remove(i))
    }

    /// Longest matching prefix for `addr` on `ifindex`.
    pub fn find_containing(&self, addr: &Ipv6Addr, ifindex: IfIndex) -> Option<&Prefix> {
        self.prefixes
            .iter()
            .filter(|p| p.ifindex == ifindex && p.contains(addr))
            .max_by_key(|p| p.prefix_len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prefix> {
        self.prefixes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Prefix> {
        self.prefixes.iter_mut()
    }

    /// (prefix, len, ifindex) of every entry, in list order.
    pub fn keys(&self) -> Vec<(Ipv6Addr, u8, IfIndex)> {
        self.prefixes
            .iter()
            .map(|p| (p.prefix, p.prefix_len, p.ifindex))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    fn position(&self, prefix: &Ipv6Addr, len: u8, ifindex: IfIndex) -> Option<usize> {
        self.prefixes
            .iter()
            .position(|p| p.prefix == *prefix && p.prefix_len == len && p.ifindex == ifindex)
    }
}
