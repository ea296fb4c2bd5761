//! Guard configuration.
//!
//! [`GuardConfig`] is the raw, serializable form (TOML file or builder).
//! [`PolicyConfig`] is what it compiles into: normalized, validated and
//! immutable. Compilation is all-or-nothing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ip_validation::RangeName;
use crate::lists::{PolicyLists, RuleSet, load_list_file};
use crate::{Result, SsrfGuardError};

/// Entries for one list dimension: inline values or a list file.
///
/// In TOML either `deny_hosts = ["evil.com"]` or
/// `deny_hosts = { file = "deny.txt" }`. File lines are classified by
/// syntax, so a file may mix hosts, IPs and CIDRs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListSource {
    Entries(Vec<String>),
    File { file: PathBuf },
}

impl Default for ListSource {
    fn default() -> Self {
        ListSource::Entries(Vec::new())
    }
}

impl ListSource {
    /// Check if the source has no inline entries and no file.
    pub fn is_empty(&self) -> bool {
        matches!(self, ListSource::Entries(entries) if entries.is_empty())
    }

    fn resolve_relative(&mut self, base: &Path) {
        if let ListSource::File { file } = self {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
    }
}

/// Configuration for a policy engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Hostnames that are always denied.
    #[serde(default)]
    pub deny_hosts: ListSource,

    /// Literal IPs that are always denied.
    #[serde(default)]
    pub deny_ips: ListSource,

    /// Networks that are always denied.
    #[serde(default)]
    pub deny_cidrs: ListSource,

    /// If non-empty, the only hostnames allowed.
    #[serde(default)]
    pub allow_hosts: ListSource,

    /// Literal IPs allowed even if private/reserved.
    #[serde(default)]
    pub allow_ips: ListSource,

    /// Networks allowed even if private/reserved.
    #[serde(default)]
    pub allow_cidrs: ListSource,

    /// Mixed deny list files (hosts, IPs and CIDRs, one per line).
    #[serde(default)]
    pub deny_files: Vec<PathBuf>,

    /// Mixed allow list files.
    #[serde(default)]
    pub allow_files: Vec<PathBuf>,

    /// Return the full URL (true) or only `scheme://host[:port]` (false).
    #[serde(default = "default_return_with_path")]
    pub return_with_path: bool,

    /// Ranges to block. Absent means every range except `unicast`.
    #[serde(default)]
    pub blocked_range_names: Option<Vec<String>>,

    /// Ports that may be fetched. Absent means any port.
    #[serde(default)]
    pub allowed_ports: Option<Vec<u16>>,

    /// DNS lookup timeout for the system resolver, in milliseconds.
    #[serde(default = "default_dns_timeout_ms")]
    pub dns_timeout_ms: u64,
}

fn default_return_with_path() -> bool {
    true
}

fn default_dns_timeout_ms() -> u64 {
    5_000
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            deny_hosts: ListSource::default(),
            deny_ips: ListSource::default(),
            deny_cidrs: ListSource::default(),
            allow_hosts: ListSource::default(),
            allow_ips: ListSource::default(),
            allow_cidrs: ListSource::default(),
            deny_files: Vec::new(),
            allow_files: Vec::new(),
            return_with_path: default_return_with_path(),
            blocked_range_names: None,
            allowed_ports: None,
            dns_timeout_ms: default_dns_timeout_ms(),
        }
    }
}

impl GuardConfig {
    /// Create a new default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuration.
    pub fn builder() -> GuardConfigBuilder {
        GuardConfigBuilder::new()
    }

    /// Parse a TOML document. Relative list paths stay as written.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| SsrfGuardError::ConfigError(e.to_string()))
    }

    /// Load a TOML file. Relative list paths are resolved against the
    /// directory containing the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SsrfGuardError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::from_toml_str(&content).map_err(|e| {
            SsrfGuardError::ConfigError(format!("{}: {}", path.display(), e))
        })?;

        if let Some(base) = path.parent() {
            config.resolve_relative_paths(base);
        }
        Ok(config)
    }

    fn resolve_relative_paths(&mut self, base: &Path) {
        for source in [
            &mut self.deny_hosts,
            &mut self.deny_ips,
            &mut self.deny_cidrs,
            &mut self.allow_hosts,
            &mut self.allow_ips,
            &mut self.allow_cidrs,
        ] {
            source.resolve_relative(base);
        }

        for file in self.deny_files.iter_mut().chain(self.allow_files.iter_mut()) {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
    }
}

/// Builder for GuardConfig.
#[derive(Debug, Default)]
pub struct GuardConfigBuilder {
    config: GuardConfig,
}

/// Push an inline entry. A file-backed source keeps its file by moving it to
/// the mixed file list, which is read the same way.
fn push_entry(source: &mut ListSource, files: &mut Vec<PathBuf>, entry: String) {
    match source {
        ListSource::Entries(entries) => entries.push(entry),
        ListSource::File { file } => {
            files.push(std::mem::take(file));
            *source = ListSource::Entries(vec![entry]);
        }
    }
}

macro_rules! list_methods {
    ($(#[$doc:meta])* $one:ident, $many:ident, $field:ident, $files:ident) => {
        $(#[$doc])*
        pub fn $one(mut self, entry: impl Into<String>) -> Self {
            push_entry(&mut self.config.$field, &mut self.config.$files, entry.into());
            self
        }

        $(#[$doc])*
        pub fn $many(mut self, entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
            for entry in entries {
                push_entry(&mut self.config.$field, &mut self.config.$files, entry.into());
            }
            self
        }
    };
}

impl GuardConfigBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: GuardConfig::new(),
        }
    }

    list_methods!(
        /// Deny hostname(s).
        deny_host, deny_hosts, deny_hosts, deny_files
    );
    list_methods!(
        /// Deny literal IP(s).
        deny_ip, deny_ips, deny_ips, deny_files
    );
    list_methods!(
        /// Deny CIDR network(s).
        deny_cidr, deny_cidrs, deny_cidrs, deny_files
    );
    list_methods!(
        /// Restrict to hostname(s).
        allow_host, allow_hosts, allow_hosts, allow_files
    );
    list_methods!(
        /// Allow literal IP(s) even if private/reserved.
        allow_ip, allow_ips, allow_ips, allow_files
    );
    list_methods!(
        /// Allow CIDR network(s) even if private/reserved.
        allow_cidr, allow_cidrs, allow_cidrs, allow_files
    );

    /// Add a mixed deny list file.
    pub fn deny_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.deny_files.push(path.into());
        self
    }

    /// Add a mixed allow list file.
    pub fn allow_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.allow_files.push(path.into());
        self
    }

    /// Return the full URL or only the origin.
    pub fn return_with_path(mut self, with_path: bool) -> Self {
        self.config.return_with_path = with_path;
        self
    }

    /// Block exactly these ranges instead of everything but `unicast`.
    pub fn blocked_range_names(
        mut self,
        names: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.config.blocked_range_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Only allow these ports.
    pub fn allowed_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.config.allowed_ports = Some(ports.into_iter().collect());
        self
    }

    /// Set the system resolver timeout.
    pub fn dns_timeout(mut self, timeout: Duration) -> Self {
        self.config.dns_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Build the config.
    pub fn build(self) -> GuardConfig {
        self.config
    }
}

/// Normalized, validated, immutable policy data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyConfig {
    lists: PolicyLists,
    return_with_path: bool,
    blocked_range_names: Option<HashSet<RangeName>>,
    allowed_ports: Option<HashSet<u16>>,
    dns_timeout: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            lists: PolicyLists::default(),
            return_with_path: true,
            blocked_range_names: None,
            allowed_ports: None,
            dns_timeout: Duration::from_millis(default_dns_timeout_ms()),
        }
    }
}

impl PolicyConfig {
    /// Compile a raw config. Reads any referenced list files.
    pub fn compile(config: &GuardConfig) -> Result<Self> {
        let mut deny = RuleSet::new();
        add_source(&mut deny, &config.deny_hosts, RuleSet::add_host)?;
        add_source(&mut deny, &config.deny_ips, RuleSet::add_ip)?;
        add_source(&mut deny, &config.deny_cidrs, RuleSet::add_cidr)?;
        for file in &config.deny_files {
            deny.extend(load_list_file(file)?);
        }

        let mut allow = RuleSet::new();
        add_source(&mut allow, &config.allow_hosts, RuleSet::add_host)?;
        add_source(&mut allow, &config.allow_ips, RuleSet::add_ip)?;
        add_source(&mut allow, &config.allow_cidrs, RuleSet::add_cidr)?;
        for file in &config.allow_files {
            allow.extend(load_list_file(file)?);
        }

        let blocked_range_names = match &config.blocked_range_names {
            Some(names) => Some(
                names
                    .iter()
                    .map(|name| {
                        name.parse::<RangeName>()
                            .map_err(|_| SsrfGuardError::InvalidRangeName(name.clone()))
                    })
                    .collect::<Result<HashSet<_>>>()?,
            ),
            None => None,
        };

        if config.dns_timeout_ms == 0 {
            return Err(SsrfGuardError::ConfigError(
                "dns_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            lists: PolicyLists { allow, deny },
            return_with_path: config.return_with_path,
            blocked_range_names,
            allowed_ports: config
                .allowed_ports
                .as_ref()
                .map(|ports| ports.iter().copied().collect()),
            dns_timeout: Duration::from_millis(config.dns_timeout_ms),
        })
    }

    pub fn lists(&self) -> &PolicyLists {
        &self.lists
    }

    pub fn allow(&self) -> &RuleSet {
        &self.lists.allow
    }

    pub fn deny(&self) -> &RuleSet {
        &self.lists.deny
    }

    pub fn return_with_path(&self) -> bool {
        self.return_with_path
    }

    pub fn blocked_range_names(&self) -> Option<&HashSet<RangeName>> {
        self.blocked_range_names.as_ref()
    }

    pub fn allowed_ports(&self) -> Option<&HashSet<u16>> {
        self.allowed_ports.as_ref()
    }

    pub fn dns_timeout(&self) -> Duration {
        self.dns_timeout
    }
}

fn add_source(
    rules: &mut RuleSet,
    source: &ListSource,
    add: fn(&mut RuleSet, &str) -> Result<()>,
) -> Result<()> {
    match source {
        ListSource::Entries(entries) => {
            for entry in entries {
                add(rules, entry)?;
            }
        }
        ListSource::File { file } => rules.extend(load_list_file(file)?),
    }
    Ok(())
}

impl TryFrom<&GuardConfig> for PolicyConfig {
    type Error = SsrfGuardError;

    fn try_from(config: &GuardConfig) -> Result<Self> {
        Self::compile(config)
    }
}
