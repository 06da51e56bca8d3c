//! Proxy configuration resources as they are shipped to fleet nodes.
//!
//! The shapes follow the Envoy v3 API closely enough for a node side agent to translate them
//! one to one, while staying plain serde data here.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const LISTENER_NAME: &str = "listener_0";
pub const LISTENER_ADDRESS: &str = "0.0.0.0";
pub const LISTENER_PORT: u16 = 8080;
pub const ROUTE_CONFIG_NAME: &str = "local_route";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    LogicalDns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LbPolicy {
    RoundRobin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsLookupFamily {
    #[serde(rename = "V4_ONLY")]
    V4Only,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub connect_timeout_secs: u64,
    pub discovery_type: DiscoveryType,
    pub lb_policy: LbPolicy,
    pub dns_lookup_family: DnsLookupFamily,
    pub endpoint: SocketAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_socket: Option<UpstreamTlsContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAddress {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTlsContext {
    pub sni: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherKind {
    Exact,
    Regex,
    Prefix,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatcher {
    Path(String),
    SafeRegex(String),
    Prefix(String),
}

impl PathMatcher {
    pub fn kind(&self) -> MatcherKind {
        match self {
            Self::Path(_) => MatcherKind::Exact,
            Self::SafeRegex(_) => MatcherKind::Regex,
            Self::Prefix(_) => MatcherKind::Prefix,
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Self::Path(p) | Self::SafeRegex(p) | Self::Prefix(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringMatch {
    Exact(String),
    SafeRegex(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatcher {
    pub name: String,
    pub string_match: StringMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMatch {
    pub path: PathMatcher,
    #[serde(default)]
    pub headers: Vec<HeaderMatcher>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderValue {
    pub key: String,
    pub value: String,
}

impl HeaderValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsPolicy {
    pub allow_origin_string_match: Vec<StringMatch>,
    pub allow_methods: String,
    pub allow_headers: String,
    pub expose_headers: String,
    pub max_age: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexRewrite {
    pub pattern: String,
    pub substitution: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub retry_on: String,
    pub num_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardAction {
    pub cluster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_rewrite: Option<RegexRewrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upgrade_configs: Vec<String>,
}

impl ForwardAction {
    pub fn to_cluster(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            cors: None,
            regex_rewrite: None,
            timeout_secs: None,
            idle_timeout_secs: None,
            retry_policy: None,
            upgrade_configs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathRewrite {
    PathRedirect(String),
    RegexRewrite(RegexRewrite),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_redirect: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_rewrite: Option<PathRewrite>,
    pub response_code: u16,
    pub strip_query: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectResponseAction {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    Route(ForwardAction),
    Redirect(RedirectAction),
    DirectResponse(DirectResponseAction),
}

impl RouteAction {
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Self::Route(forward) => Some(&forward.cluster),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBucket {
    pub max_tokens: u32,
    pub tokens_per_fill: u32,
    pub fill_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeFractionalPercent {
    pub runtime_key: String,
    pub default_percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRateLimit {
    pub stat_prefix: String,
    pub token_bucket: TokenBucket,
    pub filter_enabled: RuntimeFractionalPercent,
    pub filter_enforced: RuntimeFractionalPercent,
    pub status_code: u16,
    pub local_rate_limit_per_downstream_connection: bool,
}

/// Per-route configuration for a listener filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOverride {
    /// Turns on a filter that is disabled on the listener by default.
    Enabled,
    LocalRateLimit(LocalRateLimit),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub name: String,
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    pub action: RouteAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_headers_to_add: Vec<HeaderValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response_headers_to_add: Vec<HeaderValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub typed_per_filter_config: BTreeMap<String, FilterOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtAuthz {
    pub cluster: String,
    pub uri: String,
    pub path_prefix: String,
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers_to_add: Vec<HeaderValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2Filter {
    pub token_endpoint: HttpUri,
    pub authorization_endpoint: String,
    pub client_id: String,
    pub token_secret: String,
    pub hmac_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_names: Option<OAuth2CookieNames>,
    pub redirect_uri: String,
    pub redirect_path_matcher: String,
    pub signout_path: String,
    pub forward_bearer_token: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub auth_scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pass_through_matcher: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuth2CookieNames {
    pub bearer_token: Option<String>,
    pub oauth_hmac: Option<String>,
    pub oauth_expires: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpUri {
    pub uri: String,
    pub cluster: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtProviderConfig {
    pub issuer: String,
    #[serde(default)]
    pub audiences: Vec<String>,
    pub remote_jwks: HttpUri,
    pub cache_duration_secs: u64,
    pub forward: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtRequirementRule {
    pub path: String,
    pub provider_name: String,
    #[serde(default)]
    pub audiences: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtAuthentication {
    pub providers: BTreeMap<String, JwtProviderConfig>,
    /// Provider name to the provider it requires.
    pub requirement_map: BTreeMap<String, String>,
    pub rules: Vec<JwtRequirementRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterConfig {
    Cors,
    ExtAuthz(ExtAuthz),
    OAuth2(Box<OAuth2Filter>),
    JwtAuthn(JwtAuthentication),
    LocalRateLimit { stat_prefix: String },
    Router,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFilter {
    pub name: String,
    /// Disabled filters only run on routes that enable them.
    #[serde(default)]
    pub disabled: bool,
    pub config: FilterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConnectionManager {
    pub stat_prefix: String,
    pub route_config_name: String,
    pub http_filters: Vec<HttpFilter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub address: SocketAddress,
    pub http_connection_manager: HttpConnectionManager,
}

/// Opaque secret material referenced by name from filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    pub generic_secret: String,
}

/// Everything a proxy node needs, versioned as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub clusters: Vec<Cluster>,
    pub route_configuration: RouteConfiguration,
    pub listener: Listener,
    #[serde(default)]
    pub secrets: Vec<Secret>,
}
