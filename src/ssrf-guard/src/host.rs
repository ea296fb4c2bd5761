//! Host normalization and validation.

use super::SsrfGuardError;

/// A normalized host string for policy evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Host(String);

impl Host {
    /// Parse and normalize a host string.
    pub fn parse(input: &str) -> Result<Self, SsrfGuardError> {
        let normalized = normalize_host(input);
        if normalized.is_empty() {
            return Err(SsrfGuardError::InvalidHost("host is empty".to_string()));
        }
        if normalized.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(SsrfGuardError::InvalidHost(format!(
                "host contains invalid characters: {}",
                input.trim()
            )));
        }
        Ok(Self(normalized))
    }

    /// Get the normalized host string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the normalized string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Host {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Host {
    type Err = SsrfGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Normalize a host string so list entries and URL hosts compare equal.
/// - Lowercase
/// - Strip brackets from IPv6
/// - Remove trailing dots
/// - Internationalized names to their ASCII form
pub fn normalize_host(input: &str) -> String {
    let mut host = input.trim().to_lowercase();

    // Strip IPv6 brackets
    if host.starts_with('[') && host.ends_with(']') {
        host = host[1..host.len() - 1].to_string();
    }

    // Remove trailing dots (FQDN normalization)
    while host.ends_with('.') {
        host.pop();
    }

    if !host.is_ascii()
        && let Ok(url::Host::Domain(ascii)) = url::Host::parse(&host)
    {
        host = ascii;
    }

    host
}
