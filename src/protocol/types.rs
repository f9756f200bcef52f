//! Link-layer and addressing types shared by the ND engine

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;

/// Interface index, as assigned by the host stack.
pub type IfIndex = u32;

/// MAC address (6 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Ethernet destination for an IPv6 multicast group (RFC 2464 Section 7).
    pub fn from_ipv6_multicast(group: &Ipv6Addr) -> Self {
        let o = group.octets();
        MacAddr([0x33, 0x33, o[12], o[13], o[14], o[15]])
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error type for MAC address parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid MAC address: {input:?}")]
pub struct ParseMacAddrError {
    input: String,
}

impl FromStr for MacAddr {
    type Err = ParseMacAddrError;

    /// Accepts "00:11:22:33:44:55" or "00-11-22-33-44-55".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseMacAddrError {
            input: s.to_string(),
        };
        let mut out = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in out.iter_mut() {
            let part = parts.next().ok_or_else(err)?;
            if part.len() != 2 {
                return Err(err());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| err())?;
        }
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(MacAddr(out))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of link an interface is attached to.
///
/// Determines whether the interface needs a neighbor cache at all and
/// whether next-hop resolution may bypass the gateway checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    #[default]
    Ethernet,
    /// Point-to-point link (PPP, tunnels).
    PointToPoint,
    Loopback,
}

impl LinkKind {
    /// Whether address resolution is performed on this kind of link.
    pub fn needs_cache(&self) -> bool {
        !matches!(self, LinkKind::Loopback)
    }

    pub fn is_point_to_point(&self) -> bool {
        matches!(self, LinkKind::PointToPoint)
    }
}

/// All-nodes link-local multicast group (ff02::1)
pub const ALL_NODES: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// Solicited-node multicast address for `target` (RFC 4291 Section 2.7.1).
pub fn solicited_node(target: &Ipv6Addr) -> Ipv6Addr {
    let o = target.octets();
    Ipv6Addr::new(
        0xff02,
        0,
        0,
        0,
        0,
        1,
        0xff00 | o[13] as u16,
        u16::from_be_bytes([o[14], o[15]]),
    )
}

pub fn is_link_local(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xffc0 == 0xfe80
}

/// Checks whether `addr` falls within `prefix/len`.
pub fn prefix_matches(prefix: &Ipv6Addr, len: u8, addr: &Ipv6Addr) -> bool {
    let mask = prefix_mask(len);
    u128::from(*prefix) & mask == u128::from(*addr) & mask
}

/// Zeroes the host bits of `addr` beyond `len`.
pub fn mask_prefix(addr: &Ipv6Addr, len: u8) -> Ipv6Addr {
    Ipv6Addr::from(u128::from(*addr) & prefix_mask(len))
}

fn prefix_mask(len: u8) -> u128 {
    match len {
        0 => 0,
        l if l >= 128 => u128::MAX,
        l => u128::MAX << (128 - l as u32),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_addr_parse() {
        let mac: MacAddr = "00:11:22:33:44:55".parse().unwrap();
        assert_eq!(mac, MacAddr([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]));

        let mac: MacAddr = "AA-BB-CC-DD-EE-FF".parse().unwrap();
        assert_eq!(mac, MacAddr([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]));
    }

    #[test]
    fn test_mac_addr_parse_invalid() {
        assert!("00:11:22:33:44".parse::<MacAddr>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddr>().is_err());
        assert!("00:11:22:33:44:gg".parse::<MacAddr>().is_err());
        assert!("001:1:22:33:44:55".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_mac_addr_display() {
        let mac = MacAddr([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01]);
        assert_eq!(mac.to_string(), "02:00:5e:10:00:01");
    }

    #[test]
    fn test_multicast_mapping() {
        let group: Ipv6Addr = "ff02::1:ff12:3456".parse().unwrap();
        let mac = MacAddr::from_ipv6_multicast(&group);
        assert_eq!(mac, MacAddr([0x33, 0x33, 0xff, 0x12, 0x34, 0x56]));
        assert!(mac.is_multicast());
    }

    #[test]
    fn test_solicited_node() {
        let target: Ipv6Addr = "2001:db8::aa:bb12:3456".parse().unwrap();
        let expected: Ipv6Addr = "ff02::1:ff12:3456".parse().unwrap();
        assert_eq!(solicited_node(&target), expected);
    }

    #[test]
    fn test_prefix_matches() {
        let prefix: Ipv6Addr = "2001:db8:1::".parse().unwrap();
        assert!(prefix_matches(&prefix, 48, &"2001:db8:1::42".parse().unwrap()));
        assert!(!prefix_matches(&prefix, 48, &"2001:db8:2::42".parse().unwrap()));
        assert!(prefix_matches(&prefix, 0, &"::1".parse().unwrap()));
        assert_eq!(
            mask_prefix(&"2001:db8:1::42".parse().unwrap(), 64),
            "2001:db8:1::".parse::<Ipv6Addr>().unwrap()
        );
    }

    #[test]
    fn test_link_local() {
        assert!(is_link_local(&"fe80::1".parse().unwrap()));
        assert!(!is_link_local(&"2001:db8::1".parse().unwrap()));
    }
}
