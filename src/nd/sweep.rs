//! Periodic expiration of routers, addresses and prefixes

use crate::error::{Error, Result};
use crate::nd::address::{random_temporary, AddrFlags, InterfaceAddress};
use crate::nd::engine::NdEngine;
use crate::nd::interface::compute_reachable_time;
use crate::nd::params::SLOW_TICK_INTERVAL;
use crate::nd::timer::deadline_after;
use crate::protocol::IfIndex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

impl NdEngine {
    /// Expiration sweep, run every `prune_interval`.
    pub(crate) fn prune(&mut self, now: Instant) {
        let expired: Vec<_> = self
            .routers
            .iter()
            .filter(|dr| dr.is_expired(now))
            .map(|dr| (dr.address, dr.ifindex))
            .collect();
        for (addr, ifindex) in expired {
            debug!(router = %addr, ifindex, "default router expired");
            self.drop_default_router(now, &addr, ifindex);
            self.metrics.routers_expired.inc();
        }

        self.expire_addresses(now);

        let expired: Vec<_> = self
            .prefixes
            .iter()
            .filter(|p| p.is_expired(now))
            .map(|p| (p.prefix, p.prefix_len, p.ifindex))
            .collect();
        for (prefix, len, ifindex) in expired {
            debug!(prefix = %prefix, len, ifindex, "prefix expired");
            self.unlink_prefix(now, &prefix, len, ifindex, true);
            self.metrics.prefixes_expired.inc();
        }
    }

    fn expire_addresses(&mut self, now: Instant) {
        let use_tempaddr = self.params.use_tempaddr;
        // Regeneration changes the list; scan again from the start after it.
        'scan: loop {
            let mut i = 0;
            while i < self.addresses.len() {
                let addr = &self.addresses[i];
                let temporary = addr.is_temporary();

                if addr.is_invalid(now) {
                    let regen = use_tempaddr && temporary && self.regen_temporary(now, i);
                    debug!(addr = %self.addresses[i].addr, "address expired");
                    self.purge_address(i);
                    self.metrics.addresses_expired.inc();
                    if regen {
                        continue 'scan;
                    }
                    continue;
                }

                if addr.is_deprecated_at(now) {
                    let newly = !addr.flags.contains(AddrFlags::DEPRECATED);
                    self.addresses[i].flags.insert(AddrFlags::DEPRECATED);
                    if use_tempaddr && temporary && newly && self.regen_temporary(now, i) {
                        continue 'scan;
                    }
                } else {
                    self.addresses[i].flags.remove(AddrFlags::DEPRECATED);
                }
                i += 1;
            }
            break;
        }
    }

    /// Creates a new temporary address to replace the one at `index`, from
    /// a still preferred public address with the same prefix (RFC 4941
    /// Section 3.5). Nothing is created while another preferred temporary
    /// address covers the prefix.
    fn regen_temporary(&mut self, now: Instant, index: usize) -> bool {
        let Some(expiring) = self.addresses.get(index) else {
            return false;
        };
        let mut public = None;
        for addr in &self.addresses {
            if !addr.flags.contains(AddrFlags::AUTOCONF) || !addr.same_prefix(expiring) {
                continue;
            }
            if addr.is_deprecated_at(now) {
                continue;
            }
            if addr.is_temporary() {
                return false;
            }
            public = Some(addr.clone());
        }
        let Some(public) = public else {
            return false;
        };

        let valid = deadline_after(now, self.params.temp_valid_lifetime);
        let preferred = deadline_after(now, self.params.temp_preferred_lifetime);
        let temporary = InterfaceAddress {
            addr: random_temporary(&public),
            prefix_len: public.prefix_len,
            ifindex: public.ifindex,
            flags: AddrFlags::AUTOCONF | AddrFlags::TEMPORARY,
            valid_until: Some(public.valid_until.map_or(valid, |t| t.min(valid))),
            preferred_until: Some(public.preferred_until.map_or(preferred, |t| t.min(preferred))),
        };
        info!(addr = %temporary.addr, public = %public.addr, "temporary address regenerated");
        self.configure_address(now, temporary);
        true
    }

    /// Slow timer: counts down each interface towards re-randomizing its
    /// reachable time.
    pub(crate) fn slow_tick(&mut self) {
        let interval = self.params.recalc_reachable_interval;
        for iface in self.interfaces.values_mut() {
            if iface.nd.base_reachable_time.is_zero() {
                continue;
            }
            iface.nd.recalc_countdown = iface.nd.recalc_countdown.saturating_sub(SLOW_TICK_INTERVAL);
            if iface.nd.recalc_countdown.is_zero() {
                iface.nd.recalc_countdown = interval;
                iface.nd.reachable_time = compute_reachable_time(iface.nd.base_reachable_time);
                debug!(
                    interface = %iface.name,
                    reachable_time = ?iface.nd.reachable_time,
                    "reachable time recomputed"
                );
            }
        }
    }

    /// Re-randomizes the reachable time of an interface now.
    pub fn recompute_reachable_time(&mut self, ifindex: IfIndex) -> Result<Duration> {
        let iface = self
            .interfaces
            .get_mut(&ifindex)
            .ok_or(Error::InterfaceNotFound { ifindex })?;
        iface.nd.reachable_time = compute_reachable_time(iface.nd.base_reachable_time);
        iface.nd.recalc_countdown = self.params.recalc_reachable_interval;
        Ok(iface.nd.reachable_time)
    }
}
