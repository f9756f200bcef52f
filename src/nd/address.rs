//! Interface addresses and their lifetimes (RFC 4862, RFC 4941)

use crate::protocol::{mask_prefix, IfIndex, MacAddr};
use bitflags::bitflags;
use rand::Rng;
use std::net::Ipv6Addr;
use std::time::Instant;

bitflags! {
    /// Address flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AddrFlags: u16 {
        /// Formed by stateless autoconfiguration
        const AUTOCONF = 1 << 0;
        /// Privacy address
        const TEMPORARY = 1 << 1;
        /// Preferred lifetime elapsed
        const DEPRECATED = 1 << 2;
        const ANYCAST = 1 << 3;
        /// Duplicate address detection in progress
        const TENTATIVE = 1 << 4;
        /// Owning prefix has no reachable advertising router
        const DETACHED = 1 << 5;
    }
}

/// An address assigned to one of our interfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub addr: Ipv6Addr,
    pub prefix_len: u8,
    pub ifindex: IfIndex,
    pub flags: AddrFlags,
    /// `None` = infinite
    pub valid_until: Option<Instant>,
    /// `None` = infinite
    pub preferred_until: Option<Instant>,
}

impl InterfaceAddress {
    /// Statically configured address with infinite lifetimes.
    pub fn manual(addr: Ipv6Addr, prefix_len: u8, ifindex: IfIndex) -> Self {
        Self {
            addr,
            prefix_len,
            ifindex,
            flags: AddrFlags::empty(),
            valid_until: None,
            preferred_until: None,
        }
    }

    pub fn is_invalid(&self, now: Instant) -> bool {
        self.valid_until.is_some_and(|t| t < now)
    }

    pub fn is_deprecated_at(&self, now: Instant) -> bool {
        self.preferred_until.is_some_and(|t| t < now)
    }

    pub fn is_temporary(&self) -> bool {
        self.flags.contains(AddrFlags::TEMPORARY)
    }

    pub fn prefix(&self) -> Ipv6Addr {
        mask_prefix(&self.addr, self.prefix_len)
    }

    pub fn same_prefix(&self, other: &InterfaceAddress) -> bool {
        self.ifindex == other.ifindex
            && self.prefix_len == other.prefix_len
            && self.prefix() == other.prefix()
    }
}

/// Link-local address with a modified EUI-64 identifier (RFC 4291 Appendix A).
pub fn link_local_from_mac(mac: &MacAddr) -> Ipv6Addr {
    let m = mac.0;
    Ipv6Addr::from([
        0xfe, 0x80, 0, 0, 0, 0, 0, 0,
        m[0] ^ 0x02, m[1], m[2], 0xff, 0xfe, m[3], m[4], m[5],
    ])
}

/// Builds a temporary address under the prefix of `public` with a random
/// interface identifier (RFC 4941 Section 3.2.1). The universal/local bit
/// is cleared.
pub fn random_temporary(public: &InterfaceAddress) -> Ipv6Addr {
    let mut rng = rand::thread_rng();
    let prefix = u128::from(public.prefix());
    let host_bits = 128 - u32::from(public.prefix_len.min(128));
    let host_mask = if host_bits == 0 {
        0
    } else {
        u128::MAX >> (128 - host_bits)
    };
    let mut iid = rng.gen::<u128>() & host_mask;
    iid &= !(0x0200u128 << 48);
    if iid == 0 {
        iid = 1;
    }
    Ipv6Addr::from(prefix | iid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lifetimes() {
        let now = Instant::now();
        let mut addr = InterfaceAddress::manual("2001:db8::10".parse().unwrap(), 64, 1);
        assert!(!addr.is_invalid(now));
        assert!(!addr.is_deprecated_at(now));

        addr.preferred_until = Some(now + Duration::from_secs(5));
        addr.valid_until = Some(now + Duration::from_secs(10));
        assert!(addr.is_deprecated_at(now + Duration::from_secs(6)));
        assert!(!addr.is_invalid(now + Duration::from_secs(6)));
        assert!(addr.is_invalid(now + Duration::from_secs(11)));
    }

    #[test]
    fn test_random_temporary_keeps_prefix() {
        let public = InterfaceAddress::manual("2001:db8:1::aa".parse().unwrap(), 64, 1);
        for _ in 0..16 {
            let tmp = random_temporary(&public);
            assert_eq!(mask_prefix(&tmp, 64), public.prefix());
            assert_ne!(tmp, public.prefix());
            assert_eq!(tmp.octets()[8] & 0x02, 0);
        }
    }

    #[test]
    fn test_same_prefix() {
        let a = InterfaceAddress::manual("2001:db8:1::1".parse().unwrap(), 64, 1);
        let b = InterfaceAddress::manual("2001:db8:1::2".parse().unwrap(), 64, 1);
        let c = InterfaceAddress::manual("2001:db8:2::1".parse().unwrap(), 64, 1);
        assert!(a.same_prefix(&b));
        assert!(!a.same_prefix(&c));
    }

    #[test]
    fn test_link_local_from_mac() {
        let mac = MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let expected: Ipv6Addr = "fe80::211:22ff:fe33:4455".parse().unwrap();
        assert_eq!(link_local_from_mac(&mac), expected);
    }
}
