//! Where an operation sends its traffic: a proxied upstream or an HTTP redirect.
use regex::Regex;
use serde::Deserialize;

use super::OptionsError;
use super::host::is_valid_hostname;

const SERVICE_DOMAIN_SUFFIX: &str = "svc.cluster.local.";
const REDIRECT_CODES: [u16; 5] = [301, 302, 303, 307, 308];

/// Upstream and redirect are mutually exclusive, so a scope carries at most one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Upstream(UpstreamOptions),
    Redirect(RedirectOptions),
}

impl Backend {
    pub fn validate(&self) -> Result<(), OptionsError> {
        match self {
            Self::Upstream(upstream) => upstream.validate(),
            Self::Redirect(redirect) => redirect.validate(),
        }
    }

    pub fn upstream(&self) -> Option<&UpstreamOptions> {
        match self {
            Self::Upstream(upstream) => Some(upstream),
            Self::Redirect(_) => None,
        }
    }

    pub fn redirect(&self) -> Option<&RedirectOptions> {
        match self {
            Self::Redirect(redirect) => Some(redirect),
            Self::Upstream(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawUpstreamOptions")]
pub struct UpstreamOptions {
    pub target: UpstreamTarget,
    /// Regex rewrite applied to the path before it is forwarded.
    pub rewrite: Option<RewriteRegex>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUpstreamOptions {
    host: Option<UpstreamHost>,
    service: Option<UpstreamService>,
    rewrite: Option<RewriteRegex>,
}

impl TryFrom<RawUpstreamOptions> for UpstreamOptions {
    type Error = OptionsError;

    fn try_from(raw: RawUpstreamOptions) -> Result<Self, Self::Error> {
        let target = match (raw.host, raw.service) {
            (Some(host), None) => UpstreamTarget::Host(host),
            (None, Some(service)) => UpstreamTarget::Service(service),
            (Some(_), Some(_)) => return Err(OptionsError::UpstreamTargetConflict),
            (None, None) => return Err(OptionsError::MissingUpstreamTarget),
        };
        Ok(Self {
            target,
            rewrite: raw.rewrite.filter(RewriteRegex::is_set),
        })
    }
}

impl UpstreamOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        self.target.validate()?;
        if let Some(rewrite) = &self.rewrite {
            rewrite.validate("upstream.rewrite")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamTarget {
    Host(UpstreamHost),
    Service(UpstreamService),
}

impl UpstreamTarget {
    /// The DNS name and port the proxy connects to.
    pub fn host_port(&self) -> (String, u16) {
        match self {
            Self::Host(host) => (host.hostname.clone(), host.port),
            Self::Service(service) => (
                format!(
                    "{}.{}.{SERVICE_DOMAIN_SUFFIX}",
                    service.name, service.namespace
                ),
                service.port,
            ),
        }
    }

    fn validate(&self) -> Result<(), OptionsError> {
        match self {
            Self::Host(host) => {
                if !is_valid_hostname(&host.hostname) {
                    return Err(OptionsError::invalid(
                        "upstream.host.hostname",
                        format!("{} is not a valid hostname", host.hostname),
                    ));
                }
                validate_port("upstream.host.port", host.port)
            }
            Self::Service(service) => {
                if service.name.is_empty() {
                    return Err(OptionsError::invalid("upstream.service.name", "is empty"));
                }
                if service.namespace.is_empty() {
                    return Err(OptionsError::invalid(
                        "upstream.service.namespace",
                        "is empty",
                    ));
                }
                validate_port("upstream.service.port", service.port)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamHost {
    pub hostname: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamService {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_service_port")]
    pub port: u16,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_service_port() -> u16 {
    80
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteRegex {
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub substitution: String,
}

impl RewriteRegex {
    pub fn is_set(&self) -> bool {
        !self.pattern.is_empty()
    }

    fn validate(&self, field: &str) -> Result<(), OptionsError> {
        Regex::new(&self.pattern)
            .map(|_| ())
            .map_err(|e| OptionsError::invalid(format!("{field}.pattern"), e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectOptions {
    pub scheme_redirect: Option<String>,
    pub host_redirect: Option<String>,
    pub port_redirect: Option<u16>,
    pub path_redirect: Option<String>,
    pub rewrite_regex: Option<RewriteRegex>,
    pub response_code: Option<u16>,
    pub strip_query: Option<bool>,
}

impl RedirectOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        if let Some(scheme) = &self.scheme_redirect
            && scheme != "http"
            && scheme != "https"
        {
            return Err(OptionsError::invalid(
                "redirect.scheme_redirect",
                format!("{scheme} is not one of http, https"),
            ));
        }
        if let Some(host) = &self.host_redirect
            && !is_valid_hostname(host)
        {
            return Err(OptionsError::invalid(
                "redirect.host_redirect",
                format!("{host} is not a valid hostname"),
            ));
        }
        if let Some(port) = self.port_redirect {
            validate_port("redirect.port_redirect", port)?;
        }
        if let Some(code) = self.response_code
            && !REDIRECT_CODES.contains(&code)
        {
            return Err(OptionsError::invalid(
                "redirect.response_code",
                format!("{code} is not one of 301, 302, 303, 307, 308"),
            ));
        }

        let rewrite = self.rewrite_regex.as_ref().filter(|r| r.is_set());
        match (&self.path_redirect, rewrite) {
            (Some(_), Some(_)) => Err(OptionsError::RedirectPathConflict),
            (None, Some(rewrite)) => rewrite.validate("redirect.rewrite_regex"),
            (Some(path), None) if !path.starts_with('/') => Err(OptionsError::invalid(
                "redirect.path_redirect",
                "must start with /",
            )),
            _ => Ok(()),
        }
    }

    pub fn response_code(&self) -> u16 {
        self.response_code.unwrap_or(301)
    }
}

fn validate_port(field: &str, port: u16) -> Result<(), OptionsError> {
    if port == 0 {
        Err(OptionsError::invalid(field, "port must be between 1 and 65535"))
    } else {
        Ok(())
    }
}
