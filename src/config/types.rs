//! Configuration types

use crate::nd::interface::{IfFlags, Interface, DEFAULT_HOP_LIMIT, REACHABLE_TIME, RETRANS_TIMER};
use crate::nd::{InterfaceAddress, NdParams};
use crate::protocol::{IfIndex, LinkKind, MacAddr};
use crate::telemetry::LogConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv6Addr;
use std::time::Duration;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub nd: NdConfig,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceConfig>,
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
    #[serde(default)]
    pub logging: LogConfig,
}

/// `[nd]`: engine-wide tunables. Unset values take the RFC 4861 defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NdConfig {
    pub prune_interval_secs: Option<u64>,
    pub delay_first_probe_secs: Option<u64>,
    pub max_unicast_solicit: Option<u32>,
    pub max_multicast_solicit: Option<u32>,
    pub max_nud_hint: Option<u32>,
    pub max_queue_len: Option<usize>,
    pub gc_timer_secs: Option<u64>,
    pub gc_threshold: Option<usize>,
    pub max_entries: Option<usize>,
    pub forwarding: Option<bool>,
    pub use_tempaddr: Option<bool>,
    pub temp_valid_lifetime_secs: Option<u64>,
    pub temp_preferred_lifetime_secs: Option<u64>,
    pub recalc_reachable_interval_secs: Option<u64>,
    /// Interface name
    pub default_interface: Option<String>,
}

/// `[interfaces.<name>]`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceConfig {
    /// Assigned in name order when omitted
    pub ifindex: Option<IfIndex>,
    #[serde(default)]
    pub link: LinkKind,
    /// Read from the system at startup when omitted
    pub mac: Option<String>,
    /// `addr/len`
    #[serde(default)]
    pub addresses: Vec<String>,
    pub base_reachable_time_ms: Option<u64>,
    pub retrans_timer_ms: Option<u64>,
    pub hop_limit: Option<u8>,
    pub perform_nud: Option<bool>,
    pub accept_rtadv: Option<bool>,
    pub auto_linklocal: Option<bool>,
}

/// `[[neighbors]]`: a static (`ndp -s`) or proxy entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NeighborConfig {
    pub address: String,
    pub interface: String,
    pub mac: Option<String>,
    #[serde(default)]
    pub proxy: bool,
}

// ============================================================================
// Lock file types (generated, includes all defaults)
// ============================================================================

/// Generated lock file with all defaults filled in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigLock {
    pub generated_at: String,
    pub nd: NdLock,
    pub interfaces: BTreeMap<String, InterfaceLock>,
    #[serde(default)]
    pub neighbors: Vec<NeighborLock>,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdLock {
    pub prune_interval_secs: u64,
    pub delay_first_probe_secs: u64,
    pub max_unicast_solicit: u32,
    pub max_multicast_solicit: u32,
    pub max_nud_hint: u32,
    pub max_queue_len: usize,
    pub gc_timer_secs: u64,
    pub gc_threshold: usize,
    pub max_entries: usize,
    pub forwarding: bool,
    pub use_tempaddr: bool,
    pub temp_valid_lifetime_secs: u64,
    pub temp_preferred_lifetime_secs: u64,
    pub recalc_reachable_interval_secs: u64,
    pub default_interface: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceLock {
    pub ifindex: IfIndex,
    pub link: LinkKind,
    /// `"auto"` or a MAC address
    pub mac: String,
    pub addresses: Vec<String>,
    pub base_reachable_time_ms: u64,
    pub retrans_timer_ms: u64,
    pub hop_limit: u8,
    pub perform_nud: bool,
    pub accept_rtadv: bool,
    pub auto_linklocal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborLock {
    pub address: String,
    pub interface: String,
    pub mac: Option<String>,
    pub proxy: bool,
}

/// An interface ready to hand to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub name: String,
    pub ifindex: IfIndex,
    pub kind: LinkKind,
    /// `None`: look it up on the host
    pub mac: Option<MacAddr>,
    pub flags: IfFlags,
    pub base_reachable_time: Duration,
    pub retrans_timer: Duration,
    pub hop_limit: u8,
    pub addresses: Vec<(Ipv6Addr, u8)>,
}

impl InterfaceSpec {
    /// Builds the engine interface with `mac` as its link-layer address.
    pub fn interface(&self, mac: MacAddr) -> Interface {
        let mut iface = Interface::new(self.ifindex, self.name.clone(), self.kind, mac);
        iface.nd.flags = self.flags;
        iface.nd.set_base_reachable_time(self.base_reachable_time);
        iface.nd.retrans_timer = self.retrans_timer;
        iface.nd.hop_limit = self.hop_limit;
        iface
    }

    pub fn interface_addresses(&self) -> Vec<InterfaceAddress> {
        self.addresses
            .iter()
            .map(|(addr, len)| InterfaceAddress::manual(*addr, *len, self.ifindex))
            .collect()
    }
}

/// Administrative neighbor entry to install at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeighborSpec {
    Static {
        address: Ipv6Addr,
        ifindex: IfIndex,
        mac: MacAddr,
    },
    Proxy {
        address: Ipv6Addr,
        ifindex: IfIndex,
    },
}

impl ConfigLock {
    pub fn from_config(config: &Config) -> Self {
        let defaults = NdParams::default();
        let nd = &config.nd;
        let nd = NdLock {
            prune_interval_secs: nd
                .prune_interval_secs
                .unwrap_or(defaults.prune_interval.as_secs()),
            delay_first_probe_secs: nd
                .delay_first_probe_secs
                .unwrap_or(defaults.delay_first_probe.as_secs()),
            max_unicast_solicit: nd.max_unicast_solicit.unwrap_or(defaults.max_unicast_solicit),
            max_multicast_solicit: nd
                .max_multicast_solicit
                .unwrap_or(defaults.max_multicast_solicit),
            max_nud_hint: nd.max_nud_hint.unwrap_or(defaults.max_nud_hint),
            max_queue_len: nd.max_queue_len.unwrap_or(defaults.max_queue_len),
            gc_timer_secs: nd.gc_timer_secs.unwrap_or(defaults.gc_timer.as_secs()),
            gc_threshold: nd.gc_threshold.unwrap_or(defaults.gc_threshold),
            max_entries: nd.max_entries.unwrap_or(defaults.max_entries),
            forwarding: nd.forwarding.unwrap_or(defaults.forwarding),
            use_tempaddr: nd.use_tempaddr.unwrap_or(defaults.use_tempaddr),
            temp_valid_lifetime_secs: nd
                .temp_valid_lifetime_secs
                .unwrap_or(defaults.temp_valid_lifetime.as_secs()),
            temp_preferred_lifetime_secs: nd
                .temp_preferred_lifetime_secs
                .unwrap_or(defaults.temp_preferred_lifetime.as_secs()),
            recalc_reachable_interval_secs: nd
                .recalc_reachable_interval_secs
                .unwrap_or(defaults.recalc_reachable_interval.as_secs()),
            default_interface: nd.default_interface.clone(),
        };

        let mut next_ifindex = config
            .interfaces
            .values()
            .filter_map(|i| i.ifindex)
            .max()
            .unwrap_or(0)
            + 1;
        let interfaces = config
            .interfaces
            .iter()
            .map(|(name, iface)| {
                let ifindex = iface.ifindex.unwrap_or_else(|| {
                    next_ifindex += 1;
                    next_ifindex - 1
                });
                (
                    name.clone(),
                    InterfaceLock {
                        ifindex,
                        link: iface.link,
                        mac: iface.mac.clone().unwrap_or_else(|| "auto".to_string()),
                        addresses: iface.addresses.clone(),
                        base_reachable_time_ms: iface
                            .base_reachable_time_ms
                            .unwrap_or(REACHABLE_TIME.as_millis() as u64),
                        retrans_timer_ms: iface
                            .retrans_timer_ms
                            .unwrap_or(RETRANS_TIMER.as_millis() as u64),
                        hop_limit: iface.hop_limit.unwrap_or(DEFAULT_HOP_LIMIT),
                        perform_nud: iface.perform_nud.unwrap_or(true),
                        accept_rtadv: iface.accept_rtadv.unwrap_or(true),
                        auto_linklocal: iface.auto_linklocal.unwrap_or(true),
                    },
                )
            })
            .collect();

        let neighbors = config
            .neighbors
            .iter()
            .map(|n| NeighborLock {
                address: n.address.clone(),
                interface: n.interface.clone(),
                mac: n.mac.clone(),
                proxy: n.proxy,
            })
            .collect();

        ConfigLock {
            generated_at: chrono::Utc::now().to_rfc3339(),
            nd,
            interfaces,
            neighbors,
            logging: config.logging.clone(),
        }
    }

    fn ifindex_of(&self, name: &str) -> Result<IfIndex> {
        self.interfaces
            .get(name)
            .map(|i| i.ifindex)
            .ok_or_else(|| Error::Config(format!("interface '{}' not defined", name)))
    }

    /// Engine parameters.
    pub fn nd_params(&self) -> Result<NdParams> {
        let nd = &self.nd;
        let default_interface = nd
            .default_interface
            .as_deref()
            .map(|name| self.ifindex_of(name))
            .transpose()?;
        Ok(NdParams {
            prune_interval: Duration::from_secs(nd.prune_interval_secs),
            delay_first_probe: Duration::from_secs(nd.delay_first_probe_secs),
            max_unicast_solicit: nd.max_unicast_solicit,
            max_multicast_solicit: nd.max_multicast_solicit,
            max_nud_hint: nd.max_nud_hint,
            max_queue_len: nd.max_queue_len,
            gc_timer: Duration::from_secs(nd.gc_timer_secs),
            gc_threshold: nd.gc_threshold,
            max_entries: nd.max_entries,
            forwarding: nd.forwarding,
            use_tempaddr: nd.use_tempaddr,
            temp_valid_lifetime: Duration::from_secs(nd.temp_valid_lifetime_secs),
            temp_preferred_lifetime: Duration::from_secs(nd.temp_preferred_lifetime_secs),
            recalc_reachable_interval: Duration::from_secs(nd.recalc_reachable_interval_secs),
            default_interface,
        })
    }

    /// Interfaces in ifindex order.
    pub fn interface_specs(&self) -> Result<Vec<InterfaceSpec>> {
        let mut specs = self
            .interfaces
            .iter()
            .map(|(name, iface)| {
                let mac = match iface.mac.as_str() {
                    "auto" => None,
                    s => Some(parse_mac(s)?),
                };
                let mut flags = IfFlags::empty();
                flags.set(IfFlags::PERFORM_NUD, iface.perform_nud);
                flags.set(IfFlags::ACCEPT_RTADV, iface.accept_rtadv);
                flags.set(IfFlags::AUTO_LINKLOCAL, iface.auto_linklocal);
                Ok(InterfaceSpec {
                    name: name.clone(),
                    ifindex: iface.ifindex,
                    kind: iface.link,
                    mac,
                    flags,
                    base_reachable_time: Duration::from_millis(iface.base_reachable_time_ms),
                    retrans_timer: Duration::from_millis(iface.retrans_timer_ms),
                    hop_limit: iface.hop_limit,
                    addresses: iface
                        .addresses
                        .iter()
                        .map(|a| parse_prefix(a))
                        .collect::<Result<_>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        specs.sort_by_key(|s| s.ifindex);
        Ok(specs)
    }

    pub fn neighbor_specs(&self) -> Result<Vec<NeighborSpec>> {
        self.neighbors
            .iter()
            .map(|n| {
                let address: Ipv6Addr = n
                    .address
                    .parse()
                    .map_err(|_| Error::Parse(format!("invalid IPv6 address: {}", n.address)))?;
                let ifindex = self.ifindex_of(&n.interface)?;
                if n.proxy {
                    return Ok(NeighborSpec::Proxy { address, ifindex });
                }
                let mac = n.mac.as_deref().ok_or_else(|| {
                    Error::Config(format!("neighbor {}: static entry requires mac", n.address))
                })?;
                Ok(NeighborSpec::Static {
                    address,
                    ifindex,
                    mac: parse_mac(mac)?,
                })
            })
            .collect()
    }
}

/// Parses `addr/len`.
pub fn parse_prefix(s: &str) -> Result<(Ipv6Addr, u8)> {
    let (addr, len) = s
        .split_once('/')
        .ok_or_else(|| Error::Parse(format!("missing prefix length: {}", s)))?;
    let addr: Ipv6Addr = addr
        .parse()
        .map_err(|_| Error::Parse(format!("invalid IPv6 address: {}", addr)))?;
    let len: u8 = len
        .parse()
        .map_err(|_| Error::Parse(format!("invalid prefix length: {}", len)))?;
    if len > 128 {
        return Err(Error::Parse(format!("prefix length out of range: {}", len)));
    }
    Ok((addr, len))
}

pub fn parse_mac(s: &str) -> Result<MacAddr> {
    s.parse().map_err(|e| Error::Parse(format!("{}", e)))
}
