//! Host patterns and hostname checks shared by upstreams, redirects and virtual hosts.
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::OptionsError;

/// A virtual host pattern such as `*`, `*.example.com` or `api.example.*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host(String);

impl Host {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn wildcard() -> Self {
        Self("*".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `*` alone, a wildcard only at the start or only at the end, or a plain hostname.
    pub fn validate(&self) -> Result<(), OptionsError> {
        let pattern = self.0.as_str();
        if pattern == "*" {
            return Ok(());
        }

        let stars = pattern.matches('*').count();
        let remainder = match stars {
            0 => pattern,
            1 if pattern.starts_with("*.") => &pattern[2..],
            1 if pattern.starts_with('*') => &pattern[1..],
            1 if pattern.ends_with(".*") => &pattern[..pattern.len() - 2],
            1 if pattern.ends_with('*') => &pattern[..pattern.len() - 1],
            _ => {
                return Err(OptionsError::invalid(
                    "hosts",
                    format!("{pattern}: wildcard is allowed only at the start or the end"),
                ));
            }
        };

        if is_valid_hostname(remainder) {
            Ok(())
        } else {
            Err(OptionsError::invalid(
                "hosts",
                format!("{pattern}: not a valid host pattern"),
            ))
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Host {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Accepts IP addresses and DNS names (a trailing root dot is allowed).
pub fn is_valid_hostname(host: &str) -> bool {
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }

    let name = host.strip_suffix('.').unwrap_or(host);
    if name.is_empty() || name.len() > 253 {
        return false;
    }

    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_patterns() {
        for ok in ["*", "*.example.com", "example.*", "api.example.com", "10.0.0.1"] {
            assert!(Host::from(ok).validate().is_ok(), "{ok} should be valid");
        }
        for bad in ["a.*.com", "*.*", "exa mple.com", "-bad.com", ""] {
            assert!(Host::from(bad).validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_hostname_trailing_dot() {
        assert!(is_valid_hostname("svc.ns.svc.cluster.local."));
        assert!(!is_valid_hostname("."));
    }
}
