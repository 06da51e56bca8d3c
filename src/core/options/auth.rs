//! Authentication options: one request-authorizing scheme plus optional JWT verification.
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use url::Url;

use super::OptionsError;
use super::host::is_valid_hostname;

/// `custom`, `cloudentity` and `oauth2` are mutually exclusive; `jwt` composes with any of them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawAuthOptions")]
pub struct AuthOptions {
    pub scheme: Option<AuthScheme>,
    pub path_prefix: Option<String>,
    pub jwt: Option<JwtOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// Forwards the request context to a user supplied authorization endpoint.
    Custom(AuthUpstream),
    /// Routes through the internal authorization service, tagged with the API group.
    Cloudentity(AuthUpstream),
    OAuth2(OAuth2Options),
}

impl AuthScheme {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Custom(_) => "custom",
            Self::Cloudentity(_) => "cloudentity",
            Self::OAuth2(_) => "oauth2",
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAuthOptions {
    custom: Option<AuthUpstream>,
    cloudentity: Option<AuthUpstream>,
    oauth2: Option<OAuth2Options>,
    path_prefix: Option<String>,
    jwt: Option<JwtOptions>,
}

impl TryFrom<RawAuthOptions> for AuthOptions {
    type Error = OptionsError;

    fn try_from(raw: RawAuthOptions) -> Result<Self, Self::Error> {
        let mut schemes = [
            raw.custom.map(AuthScheme::Custom),
            raw.cloudentity.map(AuthScheme::Cloudentity),
            raw.oauth2.map(AuthScheme::OAuth2),
        ]
        .into_iter()
        .flatten();

        let scheme = schemes.next();
        if let (Some(first), Some(second)) = (&scheme, schemes.next()) {
            return Err(OptionsError::AuthSchemeConflict {
                first: first.name(),
                second: second.name(),
            });
        }

        Ok(Self {
            scheme,
            path_prefix: raw.path_prefix,
            jwt: raw.jwt,
        })
    }
}

impl AuthOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        match &self.scheme {
            Some(AuthScheme::Custom(upstream)) => upstream.validate("auth.custom")?,
            Some(AuthScheme::Cloudentity(upstream)) => upstream.validate("auth.cloudentity")?,
            Some(AuthScheme::OAuth2(oauth2)) => oauth2.validate()?,
            None => {}
        }
        if let Some(jwt) = &self.jwt {
            jwt.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthUpstream {
    pub host: AuthUpstreamHost,
    pub path_prefix: Option<String>,
}

impl AuthUpstream {
    fn validate(&self, field: &str) -> Result<(), OptionsError> {
        if !is_valid_hostname(&self.host.hostname) {
            return Err(OptionsError::invalid(
                format!("{field}.host.hostname"),
                format!("{} is not a valid hostname", self.host.hostname),
            ));
        }
        if self.host.port == 0 {
            return Err(OptionsError::invalid(
                format!("{field}.host.port"),
                "port must be between 1 and 65535",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthUpstreamHost {
    pub hostname: String,
    pub port: u16,
    pub path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuth2Options {
    pub token_endpoint: String,
    pub authorization_endpoint: String,
    pub credentials: OAuth2Credentials,
    pub redirect_uri: String,
    pub redirect_path_matcher: String,
    pub signout_path: String,
    #[serde(default)]
    pub forward_bearer_token: bool,
    #[serde(default)]
    pub auth_scopes: Vec<String>,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub pass_through_matcher: Vec<String>,
}

impl OAuth2Options {
    fn validate(&self) -> Result<(), OptionsError> {
        for (field, endpoint) in [
            ("auth.oauth2.token_endpoint", &self.token_endpoint),
            ("auth.oauth2.authorization_endpoint", &self.authorization_endpoint),
        ] {
            Url::parse(endpoint).map_err(|e| OptionsError::invalid(field, e.to_string()))?;
        }
        for (field, value) in [
            ("auth.oauth2.redirect_uri", &self.redirect_uri),
            ("auth.oauth2.redirect_path_matcher", &self.redirect_path_matcher),
            ("auth.oauth2.signout_path", &self.signout_path),
        ] {
            if value.is_empty() {
                return Err(OptionsError::invalid(field, "is required"));
            }
        }
        if self.credentials.client_id.is_empty() {
            return Err(OptionsError::invalid(
                "auth.oauth2.credentials.client_id",
                "is required",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawOAuth2Credentials")]
pub struct OAuth2Credentials {
    pub client_id: String,
    pub client_secret: ClientSecret,
    pub hmac_secret: Option<String>,
    pub cookie_names: Option<CookieNames>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientSecret {
    Inline(String),
    /// A secret held by the cluster; resolving it is the caller's business.
    Reference(ClientSecretRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSecretRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CookieNames {
    pub bearer_token: Option<String>,
    pub oauth_hmac: Option<String>,
    pub oauth_expires: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOAuth2Credentials {
    client_id: String,
    client_secret: Option<String>,
    client_secret_ref: Option<ClientSecretRef>,
    hmac_secret: Option<String>,
    cookie_names: Option<CookieNames>,
}

impl TryFrom<RawOAuth2Credentials> for OAuth2Credentials {
    type Error = OptionsError;

    fn try_from(raw: RawOAuth2Credentials) -> Result<Self, Self::Error> {
        let client_secret = match (raw.client_secret, raw.client_secret_ref) {
            (Some(secret), None) => ClientSecret::Inline(secret),
            (None, Some(reference)) => ClientSecret::Reference(reference),
            (Some(_), Some(_)) => return Err(OptionsError::ClientSecretConflict),
            (None, None) => return Err(OptionsError::MissingClientSecret),
        };
        Ok(Self {
            client_id: raw.client_id,
            client_secret,
            hmac_secret: raw.hmac_secret.filter(|s| !s.is_empty()),
            cookie_names: raw.cookie_names,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JwtOptions {
    #[serde(rename = "jwtProviders")]
    pub providers: Vec<JwtProvider>,
}

impl JwtOptions {
    fn validate(&self) -> Result<(), OptionsError> {
        if self.providers.is_empty() {
            return Err(OptionsError::invalid(
                "auth.jwt.jwtProviders",
                "at least one provider is required",
            ));
        }
        for provider in &self.providers {
            if provider.name.is_empty() {
                return Err(OptionsError::invalid("auth.jwt.jwtProviders.name", "is required"));
            }
            provider.remote_jwks.endpoint()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JwtProvider {
    pub name: String,
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub audiences: Vec<String>,
    #[serde(rename = "remoteJWKS")]
    pub remote_jwks: RemoteJwks,
    #[serde(rename = "forwardJWT", default)]
    pub forward_jwt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteJwks {
    pub uri: String,
    #[serde(default = "default_jwks_timeout", deserialize_with = "humantime_duration")]
    pub timeout: Duration,
    #[serde(
        rename = "cacheDuration",
        default = "default_jwks_cache_duration",
        deserialize_with = "humantime_duration"
    )]
    pub cache_duration: Duration,
}

impl RemoteJwks {
    /// Host and port of the JWKS endpoint; the port defaults to 443.
    pub fn endpoint(&self) -> Result<(String, u16), OptionsError> {
        https_endpoint("auth.jwt.remoteJWKS.uri", &self.uri)
    }
}

/// Parses an absolute URL into the host and port a TLS cluster should target.
pub fn https_endpoint(field: &str, uri: &str) -> Result<(String, u16), OptionsError> {
    let url = Url::parse(uri).map_err(|e| OptionsError::invalid(field, e.to_string()))?;
    let host = url
        .host_str()
        .ok_or_else(|| OptionsError::invalid(field, format!("{uri} has no host")))?;
    Ok((host.to_string(), url.port_or_known_default().unwrap_or(443)))
}

fn default_jwks_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_jwks_cache_duration() -> Duration {
    Duration::from_secs(300)
}

fn humantime_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}
