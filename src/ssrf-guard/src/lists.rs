//! Allow and deny lists of hostnames, literal IPs and CIDR networks.
//!
//! Entries are normalized once, when a list is built. Lookups never fail.
//! Allow and deny are independent [`RuleSet`]s; the evaluator decides which
//! one wins.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;

use crate::host::{Host, normalize_host};
use crate::ip_validation::in_cidr;
use crate::obfuscation::canonicalize_ipv4;
use crate::{Result, SsrfGuardError};

/// One classified list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEntry {
    Host(String),
    Ip(IpAddr),
    Cidr(IpNet),
}

impl ListEntry {
    /// Classify an entry by its syntax: a `/` means CIDR, a parseable
    /// address means IP, anything else is a hostname.
    pub fn sniff(entry: &str) -> Result<Self> {
        let entry = entry.trim();
        if entry.contains('/') {
            return parse_cidr(entry).map(ListEntry::Cidr);
        }
        if let Ok(ip) = parse_ip(entry) {
            return Ok(ListEntry::Ip(ip));
        }
        let host = Host::parse(entry)
            .map_err(|e| SsrfGuardError::InvalidListSource(format!("{entry:?}: {e}")))?;
        Ok(ListEntry::Host(host.into_string()))
    }
}

/// Parse a literal IP, accepting IPv6 brackets and obfuscated IPv4 forms.
pub(crate) fn parse_ip(entry: &str) -> Result<IpAddr> {
    let normalized = normalize_host(entry);
    if let Ok(ip) = normalized.parse() {
        return Ok(ip);
    }
    canonicalize_ipv4(&normalized)
        .map(IpAddr::V4)
        .ok_or_else(|| SsrfGuardError::InvalidListSource(format!("invalid IP address: {entry:?}")))
}

/// Parse `network/prefix`, accepting a bracketed IPv6 network.
pub(crate) fn parse_cidr(entry: &str) -> Result<IpNet> {
    let invalid = || SsrfGuardError::InvalidListSource(format!("invalid CIDR: {entry:?}"));

    let (network, prefix) = entry.trim().split_once('/').ok_or_else(invalid)?;
    let network = parse_ip(network).map_err(|_| invalid())?;
    let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;

    IpNet::new(network, prefix).map_err(|_| invalid())
}

/// One direction (allow or deny) of host, IP and CIDR rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    hosts: HashSet<String>,
    ips: HashSet<IpAddr>,
    cidrs: Vec<IpNet>,
}

impl RuleSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a classified entry.
    pub fn add(&mut self, entry: ListEntry) {
        match entry {
            ListEntry::Host(host) => {
                self.hosts.insert(host);
            }
            ListEntry::Ip(ip) => {
                self.ips.insert(ip);
            }
            ListEntry::Cidr(net) => {
                if !self.cidrs.contains(&net) {
                    self.cidrs.push(net);
                }
            }
        }
    }

    /// Add a hostname rule.
    pub fn add_host(&mut self, host: &str) -> Result<()> {
        let host = Host::parse(host)
            .map_err(|e| SsrfGuardError::InvalidListSource(format!("{host:?}: {e}")))?;
        self.hosts.insert(host.into_string());
        Ok(())
    }

    /// Add a literal IP rule.
    pub fn add_ip(&mut self, ip: &str) -> Result<()> {
        self.ips.insert(parse_ip(ip)?);
        Ok(())
    }

    /// Add a CIDR rule.
    pub fn add_cidr(&mut self, cidr: &str) -> Result<()> {
        let net = parse_cidr(cidr)?;
        self.add(ListEntry::Cidr(net));
        Ok(())
    }

    /// Merge another set into this one.
    pub fn extend(&mut self, other: RuleSet) {
        self.hosts.extend(other.hosts);
        self.ips.extend(other.ips);
        for net in other.cidrs {
            self.add(ListEntry::Cidr(net));
        }
    }

    /// Check if a (normalized) hostname is listed.
    pub fn lookup_host(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Check if an address is listed literally.
    pub fn lookup_ip(&self, ip: IpAddr) -> bool {
        self.ips.contains(&ip)
    }

    /// Check if an address falls inside a listed network.
    pub fn lookup_cidr(&self, ip: IpAddr) -> bool {
        self.cidrs.iter().any(|net| in_cidr(ip, net))
    }

    /// Check if an address matches either IP or CIDR rules.
    pub fn matches_address(&self, ip: IpAddr) -> bool {
        self.lookup_ip(ip) || self.lookup_cidr(ip)
    }

    /// Whether any IP or CIDR rule exists.
    pub fn has_address_rules(&self) -> bool {
        !self.ips.is_empty() || !self.cidrs.is_empty()
    }

    /// Whether any hostname rule exists.
    pub fn has_host_rules(&self) -> bool {
        !self.hosts.is_empty()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.ips.is_empty() && self.cidrs.is_empty()
    }

    /// Number of host, IP and CIDR rules.
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.hosts.len(), self.ips.len(), self.cidrs.len())
    }
}

/// The active allow and deny sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyLists {
    pub allow: RuleSet,
    pub deny: RuleSet,
}

/// Parse a line-oriented list.
///
/// One entry per line; blank lines and lines starting with `#` are skipped.
/// `origin` is only used in error messages.
pub fn parse_list(content: &str, origin: &Path) -> Result<RuleSet> {
    let mut rules = RuleSet::new();

    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let entry = ListEntry::sniff(line).map_err(|e| SsrfGuardError::InvalidListLine {
            path: origin.to_path_buf(),
            line: index + 1,
            reason: e.to_string(),
        })?;
        rules.add(entry);
    }

    Ok(rules)
}

/// Read and parse a list file.
pub fn load_list_file(path: &Path) -> Result<RuleSet> {
    let content = std::fs::read_to_string(path).map_err(|source| SsrfGuardError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_list(&content, path)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_sniff() {
        assert_eq!(
            ListEntry::sniff("10.0.0.0/8").unwrap(),
            ListEntry::Cidr("10.0.0.0/8".parse().unwrap())
        );
        assert_eq!(
            ListEntry::sniff("[fc00::]/7").unwrap(),
            ListEntry::Cidr("fc00::/7".parse().unwrap())
        );
        assert_eq!(
            ListEntry::sniff("13.54.97.2").unwrap(),
            ListEntry::Ip("13.54.97.2".parse().unwrap())
        );
        assert_eq!(
            ListEntry::sniff("[::1]").unwrap(),
            ListEntry::Ip("::1".parse().unwrap())
        );
        assert_eq!(
            ListEntry::sniff("0x7f000001").unwrap(),
            ListEntry::Ip("127.0.0.1".parse().unwrap())
        );
        assert_eq!(
            ListEntry::sniff("Evil.COM.").unwrap(),
            ListEntry::Host("evil.com".to_string())
        );
    }

    #[test]
    fn test_sniff_rejects_bad_cidr() {
        assert!(ListEntry::sniff("10.0.0.0/33").is_err());
        assert!(ListEntry::sniff("10.0.0/8/1").is_err());
        assert!(ListEntry::sniff("evil.com/8").is_err());
        assert!(ListEntry::sniff("10.0.0.0/").is_err());
    }

    #[test]
    fn test_rule_set_lookups() {
        let mut rules = RuleSet::new();
        rules.add_host("Evil.com").unwrap();
        rules.add_ip("[2001:db8::1]").unwrap();
        rules.add_cidr("10.0.0.0/8").unwrap();

        assert!(rules.lookup_host("evil.com"));
        assert!(!rules.lookup_host("good.com"));
        assert!(rules.lookup_ip("2001:db8::1".parse().unwrap()));
        assert!(rules.lookup_cidr("10.9.8.7".parse().unwrap()));
        assert!(!rules.lookup_cidr("11.0.0.1".parse().unwrap()));
        assert!(rules.has_address_rules());
        assert_eq!(rules.counts(), (1, 1, 1));
    }

    #[test]
    fn test_cidr_with_host_bits_matches_network() {
        let mut rules = RuleSet::new();
        rules.add_cidr("10.1.2.3/8").unwrap();
        assert!(rules.lookup_cidr("10.200.0.1".parse().unwrap()));
    }

    #[test]
    fn test_rule_set_rejects_invalid() {
        let mut rules = RuleSet::new();
        assert!(rules.add_ip("not-an-ip").is_err());
        assert!(rules.add_cidr("300.0.0.0/8").is_err());
        assert!(rules.add_host("  ").is_err());
        assert!(rules.is_empty());
    }

    #[test]
    fn test_parse_list() {
        let content = "\
# denylist
evil.com

13.54.97.2
10.0.0.0/8
  fc00::/7
";
        let rules = parse_list(content, Path::new("deny.txt")).unwrap();
        assert!(rules.lookup_host("evil.com"));
        assert!(rules.lookup_ip("13.54.97.2".parse().unwrap()));
        assert!(rules.lookup_cidr("10.1.1.1".parse().unwrap()));
        assert!(rules.lookup_cidr("fd00::1".parse().unwrap()));
        assert_eq!(rules.counts(), (1, 1, 2));
    }

    #[test]
    fn test_parse_list_reports_line() {
        let content = "evil.com\n# ok\n10.0.0.0/99\n";
        let err = parse_list(content, Path::new("deny.txt")).unwrap_err();
        match err {
            SsrfGuardError::InvalidListLine { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_list_file_crlf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "evil.com\r\n1.2.3.4\r\n").unwrap();

        let rules = load_list_file(file.path()).unwrap();
        assert!(rules.lookup_host("evil.com"));
        assert!(rules.lookup_ip("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_list_file(Path::new("/nonexistent/ssrf/list.txt")).unwrap_err();
        assert!(matches!(err, SsrfGuardError::Io { .. }));
        assert!(err.is_list_error());
    }
}
