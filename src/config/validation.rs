//! Configuration validation

use super::{parse_mac, parse_prefix, Config};
use crate::telemetry::is_valid_level;
use std::collections::HashMap;
use std::net::Ipv6Addr;

/// Longest timer accepted from the config (the 32-bit lifetime range of RAs).
const MAX_TIMER_SECS: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_nd(config, &mut result);
    validate_interfaces(config, &mut result);
    validate_neighbors(config, &mut result);
    validate_logging(config, &mut result);

    result
}

fn validate_nd(config: &Config, result: &mut ValidationResult) {
    let nd = &config.nd;

    if nd.prune_interval_secs == Some(0) {
        result.error("nd.prune_interval_secs: must be at least 1");
    }
    if nd.gc_timer_secs == Some(0) {
        result.error("nd.gc_timer_secs: must be at least 1");
    }
    let timers = [
        ("prune_interval_secs", nd.prune_interval_secs),
        ("delay_first_probe_secs", nd.delay_first_probe_secs),
        ("gc_timer_secs", nd.gc_timer_secs),
        ("temp_valid_lifetime_secs", nd.temp_valid_lifetime_secs),
        ("temp_preferred_lifetime_secs", nd.temp_preferred_lifetime_secs),
        ("recalc_reachable_interval_secs", nd.recalc_reachable_interval_secs),
    ];
    for (field, value) in timers {
        if let Some(secs) = value.filter(|&secs| secs > MAX_TIMER_SECS) {
            result.error(format!(
                "nd.{}: {} exceeds the maximum of {}",
                field, secs, MAX_TIMER_SECS
            ));
        }
    }
    if nd.max_multicast_solicit == Some(0) {
        result.warn("nd.max_multicast_solicit: 0 gives up after the first solicitation");
    }
    if let (Some(preferred), Some(valid)) =
        (nd.temp_preferred_lifetime_secs, nd.temp_valid_lifetime_secs)
    {
        if preferred > valid {
            result.error(format!(
                "nd: temp_preferred_lifetime_secs ({}) exceeds temp_valid_lifetime_secs ({})",
                preferred, valid
            ));
        }
    }
    if let (Some(threshold), Some(max)) = (nd.gc_threshold, nd.max_entries) {
        if max > 0 && threshold > max {
            result.warn(format!(
                "nd: gc_threshold ({}) above max_entries ({}), forced collection never runs",
                threshold, max
            ));
        }
    }
    if let Some(name) = &nd.default_interface {
        if !config.interfaces.contains_key(name) {
            result.error(format!("nd.default_interface: interface '{}' not defined", name));
        }
    }
}

fn validate_interfaces(config: &Config, result: &mut ValidationResult) {
    let forwarding = config.nd.forwarding.unwrap_or(false);
    let mut ifindexes: HashMap<u32, &str> = HashMap::new();

    for (name, iface) in &config.interfaces {
        if let Some(ifindex) = iface.ifindex {
            if ifindex == 0 {
                result.error(format!("interfaces.{}: ifindex 0 is reserved", name));
            }
            if let Some(other) = ifindexes.insert(ifindex, name) {
                result.error(format!(
                    "interfaces.{}: ifindex {} already used by '{}'",
                    name, ifindex, other
                ));
            }
        }

        match &iface.mac {
            None => result.warn(format!(
                "interfaces.{}: mac not specified, reading it from the system at startup",
                name
            )),
            Some(mac) => {
                if let Err(e) = parse_mac(mac) {
                    result.error(format!("interfaces.{}: {}", name, e));
                }
            }
        }

        for addr in &iface.addresses {
            if let Err(e) = parse_prefix(addr) {
                result.error(format!("interfaces.{}.addresses: {}", name, e));
            }
        }

        if iface.retrans_timer_ms == Some(0) {
            result.error(format!("interfaces.{}: retrans_timer_ms must be positive", name));
        }
        if iface.base_reachable_time_ms == Some(0) {
            result.error(format!(
                "interfaces.{}: base_reachable_time_ms must be positive",
                name
            ));
        }
        let timers = [
            ("retrans_timer_ms", iface.retrans_timer_ms),
            ("base_reachable_time_ms", iface.base_reachable_time_ms),
        ];
        for (field, value) in timers {
            if let Some(ms) = value.filter(|&ms| ms / 1000 > MAX_TIMER_SECS) {
                result.error(format!("interfaces.{}: {} ({}) is too large", name, field, ms));
            }
        }
        if forwarding && iface.accept_rtadv == Some(true) {
            result.warn(format!(
                "interfaces.{}: accept_rtadv has no effect on default routes while forwarding",
                name
            ));
        }
    }
}

fn validate_neighbors(config: &Config, result: &mut ValidationResult) {
    for (i, neighbor) in config.neighbors.iter().enumerate() {
        if !config.interfaces.contains_key(&neighbor.interface) {
            result.error(format!(
                "neighbors[{}]: interface '{}' not defined",
                i, neighbor.interface
            ));
        }

        match neighbor.address.parse::<Ipv6Addr>() {
            Ok(addr) if addr.is_multicast() || addr.is_unspecified() => {
                result.error(format!(
                    "neighbors[{}]: '{}' is not a unicast address",
                    i, neighbor.address
                ));
            }
            Ok(_) => {}
            Err(_) => result.error(format!(
                "neighbors[{}]: invalid IPv6 address '{}'",
                i, neighbor.address
            )),
        }

        match (&neighbor.mac, neighbor.proxy) {
            (None, false) => {
                result.error(format!("neighbors[{}]: static entry requires mac", i));
            }
            (Some(_), true) => {
                result.warn(format!(
                    "neighbors[{}]: mac ignored for proxy entry, the interface address is used",
                    i
                ));
            }
            (Some(mac), false) => {
                if let Err(e) = parse_mac(mac) {
                    result.error(format!("neighbors[{}]: {}", i, e));
                }
            }
            (None, true) => {}
        }
    }
}

fn validate_logging(config: &Config, result: &mut ValidationResult) {
    if !is_valid_level(&config.logging.level) {
        result.warn(format!(
            "logging.level: unknown level '{}', using info",
            config.logging.level
        ));
    }
    for directive in config.logging.invalid_directives() {
        result.warn(format!("logging.directives: ignoring '{}'", directive));
    }
}
