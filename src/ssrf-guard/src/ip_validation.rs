//! IP address classification for SSRF protection.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

/// Network category of a literal IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RangeName {
    /// Globally routable.
    Unicast,
    Unspecified,
    Broadcast,
    Multicast,
    LinkLocal,
    Loopback,
    CarrierGradeNat,
    Private,
    Reserved,
    As112,
    Amt,
    UniqueLocal,
    Ipv4Mapped,
    Rfc6145,
    Rfc6052,
    #[serde(rename = "6to4")]
    SixToFour,
    Teredo,
    Benchmarking,
    Discard,
    Deprecated,
    Orchid2,
    /// Not a syntactically valid address.
    Invalid,
}

impl RangeName {
    /// All names accepted in `blocked_range_names`.
    pub const ALL: &'static [RangeName] = &[
        RangeName::Unicast,
        RangeName::Unspecified,
        RangeName::Broadcast,
        RangeName::Multicast,
        RangeName::LinkLocal,
        RangeName::Loopback,
        RangeName::CarrierGradeNat,
        RangeName::Private,
        RangeName::Reserved,
        RangeName::As112,
        RangeName::Amt,
        RangeName::UniqueLocal,
        RangeName::Ipv4Mapped,
        RangeName::Rfc6145,
        RangeName::Rfc6052,
        RangeName::SixToFour,
        RangeName::Teredo,
        RangeName::Benchmarking,
        RangeName::Discard,
        RangeName::Deprecated,
        RangeName::Orchid2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeName::Unicast => "unicast",
            RangeName::Unspecified => "unspecified",
            RangeName::Broadcast => "broadcast",
            RangeName::Multicast => "multicast",
            RangeName::LinkLocal => "linkLocal",
            RangeName::Loopback => "loopback",
            RangeName::CarrierGradeNat => "carrierGradeNat",
            RangeName::Private => "private",
            RangeName::Reserved => "reserved",
            RangeName::As112 => "as112",
            RangeName::Amt => "amt",
            RangeName::UniqueLocal => "uniqueLocal",
            RangeName::Ipv4Mapped => "ipv4Mapped",
            RangeName::Rfc6145 => "rfc6145",
            RangeName::Rfc6052 => "rfc6052",
            RangeName::SixToFour => "6to4",
            RangeName::Teredo => "teredo",
            RangeName::Benchmarking => "benchmarking",
            RangeName::Discard => "discard",
            RangeName::Deprecated => "deprecated",
            RangeName::Orchid2 => "orchid2",
            RangeName::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for RangeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RangeName {
    type Err = String;

    /// Case-insensitive; `invalid` is not a configurable name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        RangeName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("Unknown range name: {}", s))
    }
}

// First match wins, so the more specific blocks come first.
const IPV4_RANGES: &[([u8; 4], u8, RangeName)] = &[
    ([0, 0, 0, 0], 8, RangeName::Unspecified),
    ([255, 255, 255, 255], 32, RangeName::Broadcast),
    ([224, 0, 0, 0], 4, RangeName::Multicast),
    ([169, 254, 0, 0], 16, RangeName::LinkLocal),
    ([127, 0, 0, 0], 8, RangeName::Loopback),
    ([100, 64, 0, 0], 10, RangeName::CarrierGradeNat),
    ([10, 0, 0, 0], 8, RangeName::Private),
    ([172, 16, 0, 0], 12, RangeName::Private),
    ([192, 168, 0, 0], 16, RangeName::Private),
    ([192, 0, 0, 0], 24, RangeName::Reserved), // IETF protocol assignments
    ([192, 0, 2, 0], 24, RangeName::Reserved), // TEST-NET-1
    ([192, 88, 99, 0], 24, RangeName::Reserved), // 6to4 relay anycast
    ([198, 18, 0, 0], 15, RangeName::Reserved), // benchmarking
    ([198, 51, 100, 0], 24, RangeName::Reserved), // TEST-NET-2
    ([203, 0, 113, 0], 24, RangeName::Reserved), // TEST-NET-3
    ([240, 0, 0, 0], 4, RangeName::Reserved),
    ([192, 175, 48, 0], 24, RangeName::As112),
    ([192, 31, 196, 0], 24, RangeName::As112),
    ([192, 52, 193, 0], 24, RangeName::Amt),
];

const IPV6_RANGES: &[([u16; 8], u8, RangeName)] = &[
    ([0, 0, 0, 0, 0, 0, 0, 0], 128, RangeName::Unspecified),
    ([0xfe80, 0, 0, 0, 0, 0, 0, 0], 10, RangeName::LinkLocal),
    ([0xff00, 0, 0, 0, 0, 0, 0, 0], 8, RangeName::Multicast),
    ([0, 0, 0, 0, 0, 0, 0, 1], 128, RangeName::Loopback),
    ([0xfc00, 0, 0, 0, 0, 0, 0, 0], 7, RangeName::UniqueLocal),
    ([0, 0, 0, 0, 0, 0xffff, 0, 0], 96, RangeName::Ipv4Mapped),
    ([0x0100, 0, 0, 0, 0, 0, 0, 0], 64, RangeName::Discard),
    ([0, 0, 0, 0, 0xffff, 0, 0, 0], 96, RangeName::Rfc6145),
    ([0x64, 0xff9b, 0, 0, 0, 0, 0, 0], 96, RangeName::Rfc6052),
    ([0x2002, 0, 0, 0, 0, 0, 0, 0], 16, RangeName::SixToFour),
    ([0x2001, 0, 0, 0, 0, 0, 0, 0], 32, RangeName::Teredo),
    ([0x2001, 0x2, 0, 0, 0, 0, 0, 0], 48, RangeName::Benchmarking),
    ([0x2001, 0x3, 0, 0, 0, 0, 0, 0], 32, RangeName::Amt),
    ([0x2001, 0x4, 0x112, 0, 0, 0, 0, 0], 48, RangeName::As112),
    ([0x2620, 0x4f, 0x8000, 0, 0, 0, 0, 0], 48, RangeName::As112),
    ([0x2001, 0x10, 0, 0, 0, 0, 0, 0], 28, RangeName::Deprecated),
    ([0x2001, 0x20, 0, 0, 0, 0, 0, 0], 28, RangeName::Orchid2),
    ([0x2001, 0, 0, 0, 0, 0, 0, 0], 23, RangeName::Reserved),
    ([0x2001, 0xdb8, 0, 0, 0, 0, 0, 0], 32, RangeName::Reserved), // documentation
];

/// Classify an address into its network range.
pub fn classify(ip: IpAddr) -> RangeName {
    match ip {
        IpAddr::V4(ip) => classify_ipv4(ip),
        IpAddr::V6(ip) => classify_ipv6(ip),
    }
}

/// Classify an address given as text. IPv6 brackets are accepted.
///
/// Returns [`RangeName::Invalid`] for anything that is not a literal address.
pub fn classify_str(ip: &str) -> RangeName {
    let trimmed = ip.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);

    match unbracketed.parse::<IpAddr>() {
        Ok(ip) => classify(ip),
        Err(_) => RangeName::Invalid,
    }
}

fn classify_ipv4(ip: Ipv4Addr) -> RangeName {
    IPV4_RANGES
        .iter()
        .find(|(base, prefix, _)| ipv4_in_cidr(ip, *base, *prefix))
        .map(|(_, _, name)| *name)
        .unwrap_or(RangeName::Unicast)
}

fn classify_ipv6(ip: Ipv6Addr) -> RangeName {
    IPV6_RANGES
        .iter()
        .find(|(base, prefix, _)| ipv6_in_cidr(ip, *base, *prefix))
        .map(|(_, _, name)| *name)
        .unwrap_or(RangeName::Unicast)
}

/// Whether `ip` may be fetched as far as range classification goes.
///
/// With `blocked` set, every range not listed is acceptable (caller-defined
/// policy). Without it, only `unicast` is.
pub fn is_public_unicast(ip: IpAddr, blocked: Option<&HashSet<RangeName>>) -> bool {
    let range = classify(ip);
    match blocked {
        Some(blocked) => !blocked.contains(&range),
        None => range == RangeName::Unicast,
    }
}

/// The IPv4 address carried in an IPv4-mapped IPv6 address
/// (`::ffff:a.b.c.d`). Any other address is returned as is.
pub fn unmap_ipv4(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        IpAddr::V4(_) => ip,
    }
}

/// Prefix match against a CIDR network. Families never cross-match.
pub fn in_cidr(ip: IpAddr, network: &IpNet) -> bool {
    network.contains(&ip)
}

/// Check if IPv4 is in a CIDR range.
fn ipv4_in_cidr(ip: Ipv4Addr, base: [u8; 4], prefix: u8) -> bool {
    let ip = u32::from(ip);
    let base = u32::from(Ipv4Addr::from(base));
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    (ip & mask) == (base & mask)
}

/// Check if IPv6 is in a CIDR range.
fn ipv6_in_cidr(ip: Ipv6Addr, base: [u16; 8], prefix: u8) -> bool {
    let ip = u128::from(ip);
    let base = u128::from(Ipv6Addr::from(base));
    let mask = if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix)
    };
    (ip & mask) == (base & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(ip: &str) -> RangeName {
        classify_str(ip)
    }

    #[test]
    fn test_classify_ipv4() {
        assert_eq!(range("127.0.0.1"), RangeName::Loopback);
        assert_eq!(range("127.255.255.255"), RangeName::Loopback);
        assert_eq!(range("10.0.0.1"), RangeName::Private);
        assert_eq!(range("172.16.0.1"), RangeName::Private);
        assert_eq!(range("172.31.255.255"), RangeName::Private);
        assert_eq!(range("192.168.1.1"), RangeName::Private);
        assert_eq!(range("169.254.169.254"), RangeName::LinkLocal);
        assert_eq!(range("100.64.0.1"), RangeName::CarrierGradeNat);
        assert_eq!(range("0.0.0.0"), RangeName::Unspecified);
        assert_eq!(range("224.0.0.1"), RangeName::Multicast);
        assert_eq!(range("255.255.255.255"), RangeName::Broadcast);
        assert_eq!(range("240.0.0.1"), RangeName::Reserved);
        assert_eq!(range("192.0.2.1"), RangeName::Reserved);
        assert_eq!(range("198.51.100.1"), RangeName::Reserved);
        assert_eq!(range("203.0.113.1"), RangeName::Reserved);
        assert_eq!(range("192.175.48.1"), RangeName::As112);
        assert_eq!(range("192.52.193.1"), RangeName::Amt);

        assert_eq!(range("8.8.8.8"), RangeName::Unicast);
        assert_eq!(range("1.1.1.1"), RangeName::Unicast);
        assert_eq!(range("172.32.0.1"), RangeName::Unicast);
    }

    #[test]
    fn test_classify_ipv6() {
        assert_eq!(range("::"), RangeName::Unspecified);
        assert_eq!(range("::1"), RangeName::Loopback);
        assert_eq!(range("[::1]"), RangeName::Loopback);
        assert_eq!(range("fe80::1"), RangeName::LinkLocal);
        assert_eq!(range("fc00::1"), RangeName::UniqueLocal);
        assert_eq!(range("fd12:3456::1"), RangeName::UniqueLocal);
        assert_eq!(range("ff02::1"), RangeName::Multicast);
        assert_eq!(range("::ffff:127.0.0.1"), RangeName::Ipv4Mapped);
        assert_eq!(range("64:ff9b::808:808"), RangeName::Rfc6052);
        assert_eq!(range("2002::1"), RangeName::SixToFour);
        assert_eq!(range("2001::1"), RangeName::Teredo);
        assert_eq!(range("2001:db8::1"), RangeName::Reserved);
        assert_eq!(range("100::1"), RangeName::Discard);

        assert_eq!(range("2001:4860:4860::8888"), RangeName::Unicast);
        assert_eq!(range("2606:4700::1"), RangeName::Unicast);
    }

    #[test]
    fn test_classify_invalid() {
        assert_eq!(range("example.com"), RangeName::Invalid);
        assert_eq!(range("256.0.0.1"), RangeName::Invalid);
        assert_eq!(range(""), RangeName::Invalid);
        assert_eq!(range("0x7f000001"), RangeName::Invalid);
    }

    #[test]
    fn test_is_public_unicast_default() {
        assert!(is_public_unicast("1.1.1.1".parse().unwrap(), None));
        assert!(!is_public_unicast("127.0.0.1".parse().unwrap(), None));
        assert!(!is_public_unicast("fc00::1".parse().unwrap(), None));
        assert!(!is_public_unicast("10.1.2.3".parse().unwrap(), None));
    }

    #[test]
    fn test_is_public_unicast_custom_ranges() {
        let blocked: HashSet<RangeName> = [RangeName::Loopback].into_iter().collect();

        // Only loopback is blocked by this policy
        assert!(!is_public_unicast("127.0.0.1".parse().unwrap(), Some(&blocked)));
        assert!(is_public_unicast("10.0.0.1".parse().unwrap(), Some(&blocked)));
        assert!(is_public_unicast("8.8.8.8".parse().unwrap(), Some(&blocked)));
    }

    #[test]
    fn test_in_cidr() {
        let v4: IpNet = "127.0.0.0/8".parse().unwrap();
        let v6: IpNet = "fc00::/7".parse().unwrap();

        assert!(in_cidr("127.0.0.1".parse().unwrap(), &v4));
        assert!(!in_cidr("128.0.0.1".parse().unwrap(), &v4));
        assert!(in_cidr("fd00::1".parse().unwrap(), &v6));

        // No cross-family matches
        assert!(!in_cidr("::ffff:127.0.0.1".parse().unwrap(), &v4));
        assert!(!in_cidr("127.0.0.1".parse().unwrap(), &v6));
    }

    #[test]
    fn test_range_name_from_str() {
        assert_eq!("linkLocal".parse::<RangeName>().unwrap(), RangeName::LinkLocal);
        assert_eq!("LINKLOCAL".parse::<RangeName>().unwrap(), RangeName::LinkLocal);
        assert_eq!("6to4".parse::<RangeName>().unwrap(), RangeName::SixToFour);
        assert!("invalid".parse::<RangeName>().is_err());
        assert!("intranet".parse::<RangeName>().is_err());
    }

    #[test]
    fn test_unmap_ipv4() {
        let mapped: IpAddr = "::ffff:169.254.169.254".parse().unwrap();
        assert_eq!(unmap_ipv4(mapped), "169.254.169.254".parse::<IpAddr>().unwrap());
        assert_eq!(classify(unmap_ipv4(mapped)), RangeName::LinkLocal);

        // Only the ::ffff:0:0/96 form carries an IPv4 address.
        for ip in ["::1", "::7f00:1", "2001:db8::1", "10.0.0.1"] {
            let ip: IpAddr = ip.parse().unwrap();
            assert_eq!(unmap_ipv4(ip), ip);
        }
    }
}
