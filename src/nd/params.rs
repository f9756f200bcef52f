//! Engine-wide ND tunables

use crate::protocol::IfIndex;
use std::time::Duration;

/// Interval of the slow timer that counts down reachable-time recomputation.
pub const SLOW_TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shortest delay when a timer rearms itself from its own expiry.
pub const MIN_REARM_INTERVAL: Duration = Duration::from_secs(1);

/// Entries examined by one forced garbage collection pass.
pub const FORCED_GC_SCAN: usize = 10;

/// Global ND parameters. Per-interface values live in
/// [`InterfaceNdState`](crate::nd::interface::InterfaceNdState).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdParams {
    /// Period of the expiration sweep
    pub prune_interval: Duration,
    /// DELAY_FIRST_PROBE_TIME
    pub delay_first_probe: Duration,
    /// MAX_UNICAST_SOLICIT
    pub max_unicast_solicit: u32,
    /// MAX_MULTICAST_SOLICIT
    pub max_multicast_solicit: u32,
    /// Upper-layer hints accepted before NUD is forced again
    pub max_nud_hint: u32,
    /// Packets held per unresolved entry
    pub max_queue_len: usize,
    /// Lifetime of a stale entry
    pub gc_timer: Duration,
    /// Entry count at which forced collection starts (0 = never)
    pub gc_threshold: usize,
    /// Hard allocation limit (0 = unlimited)
    pub max_entries: usize,
    /// Acting as a router: no default router list is used
    pub forwarding: bool,
    /// Generate temporary addresses (RFC 4941)
    pub use_tempaddr: bool,
    pub temp_valid_lifetime: Duration,
    pub temp_preferred_lifetime: Duration,
    /// How often the randomized reachable time is re-drawn
    pub recalc_reachable_interval: Duration,
    /// Interface treated as on-link for everything when no router is known
    pub default_interface: Option<IfIndex>,
}

impl Default for NdParams {
    fn default() -> Self {
        Self {
            prune_interval: Duration::from_secs(1),
            delay_first_probe: Duration::from_secs(5),
            max_unicast_solicit: 3,
            max_multicast_solicit: 3,
            max_nud_hint: 0,
            max_queue_len: 1,
            gc_timer: Duration::from_secs(60 * 60 * 24),
            gc_threshold: 2048,
            max_entries: 0,
            forwarding: false,
            use_tempaddr: false,
            temp_valid_lifetime: Duration::from_secs(60 * 60 * 24 * 7),
            temp_preferred_lifetime: Duration::from_secs(60 * 60 * 24),
            recalc_reachable_interval: Duration::from_secs(60 * 60 * 2),
            default_interface: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = NdParams::default();
        assert_eq!(params.delay_first_probe, Duration::from_secs(5));
        assert_eq!(params.max_multicast_solicit, 3);
        assert_eq!(params.max_queue_len, 1);
        assert_eq!(params.gc_timer, Duration::from_secs(86400));
        assert_eq!(params.gc_threshold, 2048);
        assert_eq!(params.max_nud_hint, 0);
    }
}
