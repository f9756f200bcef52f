//! Per-interface ND state - RFC 4861 Section 6.3.2

use crate::protocol::{IfIndex, LinkKind, MacAddr};
use bitflags::bitflags;
use rand::Rng;
use std::time::Duration;

/// RFC 4861 Section 10: REACHABLE_TIME
pub const REACHABLE_TIME: Duration = Duration::from_secs(30);
/// RFC 4861 Section 10: RETRANS_TIMER
pub const RETRANS_TIMER: Duration = Duration::from_secs(1);
/// Default Cur Hop Limit
pub const DEFAULT_HOP_LIMIT: u8 = 64;

const MIN_RANDOM_FACTOR: f64 = 0.5;
const MAX_RANDOM_FACTOR: f64 = 1.5;

bitflags! {
    /// Interface ND flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IfFlags: u8 {
        /// Run neighbor unreachability detection
        const PERFORM_NUD = 1 << 0;
        /// Accept Router Advertisements
        const ACCEPT_RTADV = 1 << 1;
        /// Configure a link-local address automatically
        const AUTO_LINKLOCAL = 1 << 2;
        /// IPv6 administratively disabled
        const IFDISABLED = 1 << 3;
    }
}

/// Tunable ND parameters of one interface.
#[derive(Debug, Clone)]
pub struct InterfaceNdState {
    pub flags: IfFlags,
    pub base_reachable_time: Duration,
    /// Randomized from the base, see [`compute_reachable_time`]
    pub reachable_time: Duration,
    pub retrans_timer: Duration,
    pub hop_limit: u8,
    /// Time left until `reachable_time` is re-randomized
    pub recalc_countdown: Duration,
}

impl InterfaceNdState {
    pub fn new(recalc_interval: Duration) -> Self {
        Self {
            flags: IfFlags::PERFORM_NUD | IfFlags::ACCEPT_RTADV | IfFlags::AUTO_LINKLOCAL,
            base_reachable_time: REACHABLE_TIME,
            reachable_time: compute_reachable_time(REACHABLE_TIME),
            retrans_timer: RETRANS_TIMER,
            hop_limit: DEFAULT_HOP_LIMIT,
            recalc_countdown: recalc_interval,
        }
    }

    pub fn performs_nud(&self) -> bool {
        self.flags.contains(IfFlags::PERFORM_NUD)
    }

    pub fn accepts_rtadv(&self) -> bool {
        self.flags.contains(IfFlags::ACCEPT_RTADV)
    }

    pub fn is_disabled(&self) -> bool {
        self.flags.contains(IfFlags::IFDISABLED)
    }

    /// Sets the base reachable time and re-randomizes the derived value.
    pub fn set_base_reachable_time(&mut self, base: Duration) {
        self.base_reachable_time = base;
        self.reachable_time = compute_reachable_time(base);
    }
}

/// Changes applied by [`NdEngine::set_interface_params`]. `None` keeps the
/// current value.
///
/// [`NdEngine::set_interface_params`]: crate::nd::NdEngine::set_interface_params
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceParams {
    pub base_reachable_time: Option<Duration>,
    pub retrans_timer: Option<Duration>,
    pub hop_limit: Option<u8>,
    pub flags: Option<IfFlags>,
}

/// Uniformly random value in `[0.5, 1.5) * base` (RFC 4861 Section 6.3.2).
pub fn compute_reachable_time(base: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(MIN_RANDOM_FACTOR..MAX_RANDOM_FACTOR);
    Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// An interface the engine resolves neighbors on.
#[derive(Debug, Clone)]
pub struct Interface {
    pub ifindex: IfIndex,
    pub name: String,
    pub kind: LinkKind,
    pub mac: MacAddr,
    pub nd: InterfaceNdState,
}

impl Interface {
    pub fn new(ifindex: IfIndex, name: impl Into<String>, kind: LinkKind, mac: MacAddr) -> Self {
        Self {
            ifindex,
            name: name.into(),
            kind,
            mac,
            nd: InterfaceNdState::new(Duration::from_secs(2 * 60 * 60)),
        }
    }

    pub fn needs_cache(&self) -> bool {
        self.kind.needs_cache()
    }

    pub fn is_point_to_point(&self) -> bool {
        self.kind.is_point_to_point()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_time_bounds() {
        let base = Duration::from_secs(30);
        for _ in 0..100 {
            let t = compute_reachable_time(base);
            assert!(t >= Duration::from_secs(15));
            assert!(t < Duration::from_secs(45));
        }
    }

    #[test]
    fn test_reachable_time_saturates() {
        let t = compute_reachable_time(Duration::from_millis(u64::MAX));
        assert!(t >= Duration::from_millis(u64::MAX / 2));
    }

    #[test]
    fn test_defaults() {
        let iface = Interface::new(1, "eth0", LinkKind::Ethernet, MacAddr([0x02, 0, 0, 0, 0, 1]));
        assert!(iface.nd.performs_nud());
        assert!(iface.nd.accepts_rtadv());
        assert!(!iface.nd.is_disabled());
        assert_eq!(iface.nd.retrans_timer, Duration::from_secs(1));
        assert_eq!(iface.nd.hop_limit, 64);
        assert!(iface.needs_cache());
    }

    #[test]
    fn test_link_kinds() {
        let ppp = Interface::new(2, "ppp0", LinkKind::PointToPoint, MacAddr::ZERO);
        assert!(ppp.needs_cache());
        assert!(ppp.is_point_to_point());

        let lo = Interface::new(3, "lo", LinkKind::Loopback, MacAddr::ZERO);
        assert!(!lo.needs_cache());
        assert!(!lo.is_point_to_point());
    }
}
