//! Metrics collection for the neighbor discovery engine.
//!
//! Thread-safe counters shared between the engine task and whoever exports
//! them, at both the global and per-interface level.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

/// Atomic counter for thread-safe increment operations.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds a value to the counter.
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Gets the current value of the counter.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-interface ND statistics.
#[derive(Debug, Default)]
pub struct InterfaceStats {
    /// Neighbor Solicitations requested.
    pub solicitations: Counter,
    /// Neighbor Advertisements requested.
    pub advertisements: Counter,
    /// Datagrams handed to the link layer.
    pub tx_packets: Counter,
    pub tx_bytes: Counter,
    /// Datagrams parked waiting for resolution.
    pub held: Counter,
    /// Datagrams reported unreachable.
    pub unreachable: Counter,
}

impl InterfaceStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a transmitted datagram.
    pub fn record_tx(&self, bytes: usize) {
        self.tx_packets.inc();
        self.tx_bytes.add(bytes as u64);
    }
}

/// Global metrics registry for the ND engine.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Per-interface statistics, keyed by interface name.
    interfaces: RwLock<HashMap<String, InterfaceStats>>,

    // Solicitation metrics
    /// Multicast (address resolution) solicitations.
    pub solicitations_multicast: Counter,
    /// Unicast (unreachability probe) solicitations.
    pub solicitations_unicast: Counter,
    pub advertisements_sent: Counter,

    // Delivery metrics
    /// Datagrams reported unreachable after resolution failed.
    pub unreachable_reported: Counter,
    /// Datagrams dropped from a full hold queue.
    pub queue_drops: Counter,

    // Cache maintenance
    /// Entries forced to Stale/Purge by the LRU scan.
    pub forced_gc: Counter,
    /// Entries deleted.
    pub entries_freed: Counter,
    /// Entry allocations refused by the allocation limit.
    pub alloc_failures: Counter,
    /// Updates ignored because they were malformed.
    pub malformed_updates: Counter,

    // Expiration sweep
    pub routers_expired: Counter,
    pub prefixes_expired: Counter,
    pub addresses_expired: Counter,

    // Table size gauges (using AtomicU64 for gauges)
    /// Current number of neighbor entries.
    pub entries_in_use: AtomicU64,
    /// Entries allocated since start.
    pub entries_allocated: AtomicU64,
    /// Current number of routing table entries.
    pub route_count: AtomicU64,
}

impl MetricsRegistry {
    /// Creates a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interface for statistics tracking.
    pub fn register_interface(&self, name: &str) {
        let mut interfaces = self
            .interfaces
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        interfaces.entry(name.to_string()).or_default();
    }

    /// Runs `f` against the stats of `interface` if it is registered.
    pub fn with_interface<F: FnOnce(&InterfaceStats)>(&self, interface: &str, f: F) {
        let interfaces = self
            .interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(stats) = interfaces.get(interface) {
            f(stats);
        }
    }

    /// Records a transmitted datagram on an interface.
    pub fn record_tx(&self, interface: &str, bytes: usize) {
        self.with_interface(interface, |stats| stats.record_tx(bytes));
    }

    /// Updates the neighbor entry gauges.
    pub fn set_entries(&self, in_use: usize) {
        self.entries_in_use.store(in_use as u64, Ordering::Relaxed);
    }

    pub fn record_allocation(&self) {
        self.entries_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Updates the route count gauge.
    pub fn set_route_count(&self, count: usize) {
        self.route_count.store(count as u64, Ordering::Relaxed);
    }

    /// Exports all metrics as key-value pairs.
    ///
    /// This format is designed to be easily convertible to Prometheus format
    /// in the future.
    pub fn export(&self) -> Vec<(String, u64)> {
        let mut result = vec![
            (
                "solicitations_multicast".into(),
                self.solicitations_multicast.get(),
            ),
            (
                "solicitations_unicast".into(),
                self.solicitations_unicast.get(),
            ),
            ("advertisements_sent".into(), self.advertisements_sent.get()),
            ("unreachable_reported".into(), self.unreachable_reported.get()),
            ("queue_drops".into(), self.queue_drops.get()),
            ("forced_gc".into(), self.forced_gc.get()),
            ("entries_freed".into(), self.entries_freed.get()),
            ("alloc_failures".into(), self.alloc_failures.get()),
            ("malformed_updates".into(), self.malformed_updates.get()),
            ("routers_expired".into(), self.routers_expired.get()),
            ("prefixes_expired".into(), self.prefixes_expired.get()),
            ("addresses_expired".into(), self.addresses_expired.get()),
            (
                "entries_in_use".into(),
                self.entries_in_use.load(Ordering::Relaxed),
            ),
            (
                "entries_allocated".into(),
                self.entries_allocated.load(Ordering::Relaxed),
            ),
            (
                "route_count".into(),
                self.route_count.load(Ordering::Relaxed),
            ),
        ];

        // Per-interface metrics
        let interfaces = self
            .interfaces
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (name, stats) in interfaces.iter() {
            result.extend([
                (format!("{}_solicitations", name), stats.solicitations.get()),
                (format!("{}_advertisements", name), stats.advertisements.get()),
                (format!("{}_tx_packets", name), stats.tx_packets.get()),
                (format!("{}_tx_bytes", name), stats.tx_bytes.get()),
                (format!("{}_held", name), stats.held.get()),
                (format!("{}_unreachable", name), stats.unreachable.get()),
            ]);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.add(10);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_interface_stats() {
        let stats = InterfaceStats::new();

        stats.record_tx(100);
        stats.record_tx(60);
        stats.solicitations.inc();

        assert_eq!(stats.tx_packets.get(), 2);
        assert_eq!(stats.tx_bytes.get(), 160);
        assert_eq!(stats.solicitations.get(), 1);
    }

    #[test]
    fn test_metrics_registry() {
        let registry = MetricsRegistry::new();

        registry.register_interface("eth0");
        registry.record_tx("eth0", 200);
        registry.record_tx("eth9", 200);
        registry.with_interface("eth0", |s| s.held.inc());

        registry.solicitations_multicast.add(3);
        registry.set_entries(7);
        registry.record_allocation();

        let metrics = registry.export();

        assert!(metrics.contains(&("solicitations_multicast".into(), 3)));
        assert!(metrics.contains(&("entries_in_use".into(), 7)));
        assert!(metrics.contains(&("entries_allocated".into(), 1)));
        assert!(metrics.contains(&("eth0_tx_packets".into(), 1)));
        assert!(metrics.contains(&("eth0_held".into(), 1)));
        assert!(!metrics.iter().any(|(k, _)| k.starts_with("eth9")));
    }
}
