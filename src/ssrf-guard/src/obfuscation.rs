//! Canonicalization of obfuscated IPv4 literals.
//!
//! A host token such as `0x7f000001`, `2130706433`, `0177.0.0.1` or `127.1`
//! names the same address as `127.0.0.1`. Every such form is rewritten to
//! dotted-decimal before any range or list check, so an encoding can never
//! smuggle a forbidden address past the classifier.
//!
//! Recognized forms, in order of attempt:
//! 1. A pure decimal integer in `[0, 2^32 - 1]`.
//! 2. A pure hex integer (`0x` prefix, case-insensitive) in the same range.
//! 3. One to four dot-separated components, each decimal, leading-`0` octal,
//!    or `0x` hex, packed the way `inet_aton` packs them: the last component
//!    fills all remaining low-order bits, every earlier one is a single byte.
//!
//! Anything else is "not an IPv4 literal", which is a normal outcome.

use std::net::Ipv4Addr;

/// Canonicalize `token` to dotted-decimal text, if it is an IPv4 literal.
pub fn try_canonicalize_ipv4(token: &str) -> Option<String> {
    canonicalize_ipv4(token).map(|ip| ip.to_string())
}

/// Canonicalize `token` to an [`Ipv4Addr`], if it is an IPv4 literal in any
/// of the recognized encodings.
pub fn canonicalize_ipv4(token: &str) -> Option<Ipv4Addr> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    parse_decimal_integer(token)
        .or_else(|| parse_hex_integer(token))
        .or_else(|| parse_dotted(token))
}

fn parse_decimal_integer(token: &str) -> Option<Ipv4Addr> {
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    parse_radix(token, 10).and_then(to_ipv4)
}

fn parse_hex_integer(token: &str) -> Option<Ipv4Addr> {
    let digits = strip_hex_prefix(token)?;
    parse_radix(digits, 16).and_then(to_ipv4)
}

fn parse_dotted(token: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.is_empty() || parts.len() > 4 {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        values.push(parse_component(part)?);
    }

    let (last, leading) = values.split_last()?;

    // Each leading component is one byte; the last one takes the rest.
    let mut address: u64 = 0;
    for (index, value) in leading.iter().enumerate() {
        if *value > 0xff {
            return None;
        }
        address |= value << (24 - 8 * index);
    }

    let remaining_bits = 32 - 8 * leading.len() as u32;
    let last_max = (1u64 << remaining_bits) - 1;
    if *last > last_max {
        return None;
    }
    address |= last;

    to_ipv4(address)
}

/// Parse one dotted component: `0x..` hex, `0..` octal, otherwise decimal.
fn parse_component(part: &str) -> Option<u64> {
    if part.is_empty() {
        return None;
    }

    if let Some(digits) = strip_hex_prefix(part) {
        return parse_radix(digits, 16);
    }

    if part.len() > 1 && part.starts_with('0') {
        return parse_radix(&part[1..], 8);
    }

    parse_radix(part, 10)
}

fn strip_hex_prefix(token: &str) -> Option<&str> {
    token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .filter(|digits| !digits.is_empty())
}

/// Parse unsigned digits in `radix`, tolerating any amount of zero padding.
/// Values too large for `u64` are rejected rather than wrapped.
fn parse_radix(digits: &str, radix: u32) -> Option<u64> {
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }

    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(significant, radix).ok()
}

fn to_ipv4(value: u64) -> Option<Ipv4Addr> {
    u32::try_from(value).ok().map(Ipv4Addr::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(token: &str) -> Option<String> {
        try_canonicalize_ipv4(token)
    }

    #[test]
    fn test_decimal_integer() {
        assert_eq!(canon("2130706433").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("0").as_deref(), Some("0.0.0.0"));
        assert_eq!(canon("4294967295").as_deref(), Some("255.255.255.255"));
        assert_eq!(canon("16843009").as_deref(), Some("1.1.1.1"));
    }

    #[test]
    fn test_hex_integer() {
        assert_eq!(canon("0x7f000001").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("0X7F000001").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("0x0000007f000001").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("0xffffffff").as_deref(), Some("255.255.255.255"));
    }

    #[test]
    fn test_dotted_four_components() {
        assert_eq!(canon("127.0.0.1").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("0177.0.0.1").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("0x7f.0.0.1").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("0x7f.0x0.00.0x1").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("010.0.0.1").as_deref(), Some("8.0.0.1"));
    }

    #[test]
    fn test_dotted_short_forms() {
        // 8.8.16
        assert_eq!(canon("127.0.1").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("10.1.515").as_deref(), Some("10.1.2.3"));
        // 8.24
        assert_eq!(canon("127.1").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("127.0x1").as_deref(), Some("127.0.0.1"));
        assert_eq!(canon("10.16777215").as_deref(), Some("10.255.255.255"));
        // single component in octal falls through to dotted packing
        assert_eq!(canon("017700000001").as_deref(), Some("127.0.0.1"));
    }

    #[test]
    fn test_out_of_range_components() {
        assert_eq!(canon("256.0.0.1"), None);
        assert_eq!(canon("1.2.3.256"), None);
        assert_eq!(canon("1.2.65536"), None);
        assert_eq!(canon("1.16777216"), None);
        assert_eq!(canon("4294967296"), None);
        assert_eq!(canon("0x100000000"), None);
        assert_eq!(canon("99999999999999999999999"), None);
    }

    #[test]
    fn test_not_ipv4() {
        assert_eq!(canon(""), None);
        assert_eq!(canon("example.com"), None);
        assert_eq!(canon("1.2.3.4.5"), None);
        assert_eq!(canon("1..2.3"), None);
        assert_eq!(canon("127.0.0.1."), None);
        assert_eq!(canon("0x"), None);
        assert_eq!(canon("08.0.0.1"), None);
        assert_eq!(canon("0xg1"), None);
        assert_eq!(canon("::1"), None);
        assert_eq!(canon("-1"), None);
    }
}
