//! Authentication filters: external authorization, OAuth2 and JWT verification.
//!
//! Listener wide filters are registered disabled and switched on per route, so that routes of
//! one document never inherit the authentication of another.
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;
use uuid::Uuid;

use crate::core::options::{
    AuthOptions, AuthScheme, AuthUpstream, ClientSecret, JwtOptions, OAuth2Options,
    https_endpoint,
};

use super::BuildError;
use super::cluster::cluster_name;
use super::configuration::EnvoyConfiguration;
use super::resources::{
    ExtAuthz, FilterConfig, FilterOverride, HeaderValue, HttpFilter, HttpUri, JwtProviderConfig,
    JwtRequirementRule, OAuth2CookieNames, OAuth2Filter, Secret,
};

pub const EXT_AUTHZ_FILTER: &str = "envoy.filters.http.ext_authz";
pub const OAUTH2_FILTER: &str = "envoy.filters.http.oauth2";

pub const CLOUDENTITY_HOST: &str = "kusk-gateway-auth-service.kusk-system.svc.cluster.local.";
pub const CLOUDENTITY_PORT: u16 = 19000;
pub const HEADER_AUTHORIZER_URL: &str = "X-Kusk-Authorizer-URL";
pub const HEADER_API_GROUP: &str = "X-Kusk-API-Group";

const EXT_AUTHZ_TIMEOUT_SECS: u64 = 60;
const OAUTH2_TOKEN_TIMEOUT_SECS: u64 = 3;

/// The route an auth scheme is attached to.
pub struct AuthTarget<'a> {
    /// API (document or static route set) name, used as the authorization group.
    pub api_name: &'a str,
    pub route_path: &'a str,
}

/// Registers the filters, clusters and secrets `auth` needs and returns the per-route filter
/// overrides that switch them on for `target`.
pub fn apply_auth(
    config: &mut EnvoyConfiguration,
    auth: &AuthOptions,
    target: &AuthTarget<'_>,
) -> Result<Vec<(String, FilterOverride)>, BuildError> {
    let mut overrides = Vec::new();

    match &auth.scheme {
        Some(AuthScheme::Custom(upstream)) => {
            let name = custom_ext_authz(config, upstream, auth.path_prefix.as_deref())?;
            overrides.push((name, FilterOverride::Enabled));
        }
        Some(AuthScheme::Cloudentity(upstream)) => {
            let name = cloudentity_ext_authz(config, upstream, auth.path_prefix.as_deref(), target)?;
            overrides.push((name, FilterOverride::Enabled));
        }
        Some(AuthScheme::OAuth2(oauth2)) => {
            let name = oauth2_filter(config, oauth2)?;
            overrides.push((name, FilterOverride::Enabled));
        }
        None => {}
    }

    if let Some(jwt) = &auth.jwt {
        jwt_requirements(config, jwt, target.route_path)?;
    }

    Ok(overrides)
}

fn path_prefix(upstream: &AuthUpstream, scope_prefix: Option<&str>) -> String {
    upstream
        .path_prefix
        .as_deref()
        .or(scope_prefix)
        .or(upstream.host.path.as_deref())
        .unwrap_or_default()
        .to_string()
}

fn custom_ext_authz(
    config: &mut EnvoyConfiguration,
    upstream: &AuthUpstream,
    scope_prefix: Option<&str>,
) -> Result<String, BuildError> {
    let host = &upstream.host;
    let cluster = cluster_name(&host.hostname, host.port);
    if !config.cluster_exist(&cluster) {
        config.add_cluster(&cluster, &host.hostname, host.port);
    }

    let name = format!("{EXT_AUTHZ_FILTER}.{cluster}");
    config.add_http_filter(HttpFilter {
        name: name.clone(),
        disabled: true,
        config: FilterConfig::ExtAuthz(ExtAuthz {
            uri: format!("http://{}:{}", host.hostname, host.port),
            cluster,
            path_prefix: path_prefix(upstream, scope_prefix),
            timeout_secs: EXT_AUTHZ_TIMEOUT_SECS,
            headers_to_add: Vec::new(),
        }),
    })?;
    Ok(name)
}

fn cloudentity_ext_authz(
    config: &mut EnvoyConfiguration,
    upstream: &AuthUpstream,
    scope_prefix: Option<&str>,
    target: &AuthTarget<'_>,
) -> Result<String, BuildError> {
    let host = &upstream.host;
    let cluster = cluster_name(CLOUDENTITY_HOST, CLOUDENTITY_PORT);
    if !config.cluster_exist(&cluster) {
        config.add_cluster(&cluster, CLOUDENTITY_HOST, CLOUDENTITY_PORT);
    }

    let name = format!("{EXT_AUTHZ_FILTER}.cloudentity.{}", target.api_name);
    config.add_http_filter(HttpFilter {
        name: name.clone(),
        disabled: true,
        config: FilterConfig::ExtAuthz(ExtAuthz {
            uri: format!("http://{CLOUDENTITY_HOST}:{CLOUDENTITY_PORT}"),
            cluster,
            path_prefix: path_prefix(upstream, scope_prefix),
            timeout_secs: EXT_AUTHZ_TIMEOUT_SECS,
            headers_to_add: vec![
                HeaderValue::new(
                    HEADER_AUTHORIZER_URL,
                    format!("https://{}:{}", host.hostname, host.port),
                ),
                HeaderValue::new(HEADER_API_GROUP, target.api_name),
            ],
        }),
    })?;
    Ok(name)
}

fn oauth2_filter(
    config: &mut EnvoyConfiguration,
    oauth2: &OAuth2Options,
) -> Result<String, BuildError> {
    let (host, port) = https_endpoint("auth.oauth2.token_endpoint", &oauth2.token_endpoint)?;
    let cluster = cluster_name(&host, port);
    let name = format!(
        "{OAUTH2_FILTER}.{}.{cluster}",
        oauth2.credentials.client_id
    );

    let client_secret = match &oauth2.credentials.client_secret {
        ClientSecret::Inline(secret) => secret.clone(),
        ClientSecret::Reference(reference) => {
            return Err(BuildError::UnresolvedSecretRef {
                name: reference.name.clone(),
                namespace: reference.namespace.clone(),
            });
        }
    };

    // Routes sharing one OAuth2 setup share its secrets as well.
    let (token_secret, hmac_secret) = match config.http_filter(&name).map(|f| &f.config) {
        Some(FilterConfig::OAuth2(existing)) => {
            (existing.token_secret.clone(), existing.hmac_secret.clone())
        }
        _ => {
            let id = Uuid::new_v4();
            let token_secret = format!("token-secret-{id}");
            let hmac_secret = format!("hmac-secret-{id}");
            let hmac = oauth2
                .credentials
                .hmac_secret
                .clone()
                .unwrap_or_else(|| STANDARD.encode(rand::random::<[u8; 32]>()));

            config.add_secret(Secret {
                name: token_secret.clone(),
                generic_secret: client_secret,
            });
            config.add_secret(Secret {
                name: hmac_secret.clone(),
                generic_secret: hmac,
            });
            (token_secret, hmac_secret)
        }
    };

    if !config.cluster_exist(&cluster) {
        config.add_cluster_with_tls(&cluster, &host, port);
    }

    let filter = OAuth2Filter {
        token_endpoint: HttpUri {
            uri: oauth2.token_endpoint.clone(),
            cluster,
            timeout_secs: OAUTH2_TOKEN_TIMEOUT_SECS,
        },
        authorization_endpoint: oauth2.authorization_endpoint.clone(),
        client_id: oauth2.credentials.client_id.clone(),
        token_secret,
        hmac_secret,
        cookie_names: oauth2
            .credentials
            .cookie_names
            .as_ref()
            .map(|names| OAuth2CookieNames {
                bearer_token: names.bearer_token.clone(),
                oauth_hmac: names.oauth_hmac.clone(),
                oauth_expires: names.oauth_expires.clone(),
            }),
        redirect_uri: format!(
            "%REQ(x-forwarded-proto)%://%REQ(:authority)%{}",
            oauth2.redirect_uri
        ),
        redirect_path_matcher: oauth2.redirect_path_matcher.clone(),
        signout_path: oauth2.signout_path.clone(),
        forward_bearer_token: oauth2.forward_bearer_token,
        auth_scopes: oauth2.auth_scopes.clone(),
        resources: oauth2.resources.clone(),
        pass_through_matcher: oauth2.pass_through_matcher.clone(),
    };

    config.add_http_filter(HttpFilter {
        name: name.clone(),
        disabled: true,
        config: FilterConfig::OAuth2(Box::new(filter)),
    })?;
    Ok(name)
}

fn jwt_requirements(
    config: &mut EnvoyConfiguration,
    jwt: &JwtOptions,
    route_path: &str,
) -> Result<(), BuildError> {
    for provider in &jwt.providers {
        let jwks = &provider.remote_jwks;
        let (host, port) = jwks.endpoint()?;
        let cluster = cluster_name(&host, port);
        if !config.cluster_exist(&cluster) {
            debug!(provider = %provider.name, cluster = %cluster, "adding JWKS cluster");
            config.add_cluster_with_tls(&cluster, &host, port);
        }

        config.add_jwt_provider(
            &provider.name,
            JwtProviderConfig {
                issuer: provider.issuer.clone(),
                audiences: provider.audiences.clone(),
                remote_jwks: HttpUri {
                    uri: jwks.uri.clone(),
                    cluster,
                    timeout_secs: jwks.timeout.as_secs(),
                },
                cache_duration_secs: jwks.cache_duration.as_secs(),
                forward: provider.forward_jwt,
            },
        )?;
        config.add_jwt_rule(JwtRequirementRule {
            path: route_path.to_string(),
            provider_name: provider.name.clone(),
            audiences: provider.audiences.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(yaml: &str) -> AuthOptions {
        serde_yaml::from_str(yaml).unwrap()
    }

    const TARGET: AuthTarget<'static> = AuthTarget {
        api_name: "todos",
        route_path: "/todos",
    };

    #[test]
    fn test_custom_auth_registers_disabled_filter() {
        let mut config = EnvoyConfiguration::new();
        let overrides = apply_auth(
            &mut config,
            &auth("custom:\n  host: {hostname: authz.local, port: 9002}\npath_prefix: /check\n"),
            &TARGET,
        )
        .unwrap();

        let (name, _) = &overrides[0];
        assert_eq!(name, "envoy.filters.http.ext_authz.authz.local-9002");
        let filter = config.http_filter(name).unwrap();
        assert!(filter.disabled);
        match &filter.config {
            FilterConfig::ExtAuthz(authz) => assert_eq!(authz.path_prefix, "/check"),
            other => panic!("unexpected filter {other:?}"),
        }
        assert!(config.cluster_exist("authz.local-9002"));
    }

    #[test]
    fn test_cloudentity_headers() {
        let mut config = EnvoyConfiguration::new();
        let overrides = apply_auth(
            &mut config,
            &auth("cloudentity:\n  host: {hostname: ce.example.com, port: 8443}\n"),
            &TARGET,
        )
        .unwrap();

        let filter = config.http_filter(&overrides[0].0).unwrap();
        let FilterConfig::ExtAuthz(authz) = &filter.config else {
            panic!("expected ext_authz");
        };
        assert_eq!(authz.cluster, cluster_name(CLOUDENTITY_HOST, CLOUDENTITY_PORT));
        assert_eq!(
            authz.headers_to_add,
            vec![
                HeaderValue::new(HEADER_AUTHORIZER_URL, "https://ce.example.com:8443"),
                HeaderValue::new(HEADER_API_GROUP, "todos"),
            ]
        );
    }

    const OAUTH2: &str = r#"
oauth2:
  token_endpoint: https://idp.example.com/oauth/token
  authorization_endpoint: https://idp.example.com/authorize
  credentials:
    client_id: app
    client_secret: s3cret
  redirect_uri: /oauth2/callback
  redirect_path_matcher: /oauth2/callback
  signout_path: /oauth2/signout
  forward_bearer_token: true
"#;

    #[test]
    fn test_oauth2_secrets_are_shared_between_routes() {
        let mut config = EnvoyConfiguration::new();
        let options = auth(OAUTH2);
        let first = apply_auth(&mut config, &options, &TARGET).unwrap();
        let second = apply_auth(
            &mut config,
            &options,
            &AuthTarget {
                api_name: "todos",
                route_path: "/other",
            },
        )
        .unwrap();
        assert_eq!(first[0].0, second[0].0);

        let FilterConfig::OAuth2(filter) = &config.http_filter(&first[0].0).unwrap().config else {
            panic!("expected oauth2");
        };
        assert!(filter.token_secret.starts_with("token-secret-"));
        assert!(filter.hmac_secret.starts_with("hmac-secret-"));
        assert_eq!(
            filter.redirect_uri,
            "%REQ(x-forwarded-proto)%://%REQ(:authority)%/oauth2/callback"
        );
        assert!(config.cluster_exist("idp.example.com-443"));

        let snapshot = {
            config.add_virtual_host("*");
            config.generate_snapshot().unwrap()
        };
        assert_eq!(snapshot.payload.secrets.len(), 2);
        let hmac = snapshot
            .payload
            .secrets
            .iter()
            .find(|s| s.name.starts_with("hmac-secret-"))
            .unwrap();
        assert_eq!(STANDARD.decode(&hmac.generic_secret).unwrap().len(), 32);
    }

    #[test]
    fn test_client_secret_ref_is_not_resolved_here() {
        let yaml = OAUTH2.replace(
            "client_secret: s3cret",
            "client_secret_ref: {name: oauth, namespace: default}",
        );
        let mut config = EnvoyConfiguration::new();
        let err = apply_auth(&mut config, &auth(&yaml), &TARGET).unwrap_err();
        assert!(matches!(err, BuildError::UnresolvedSecretRef { .. }));
    }

    #[test]
    fn test_jwt_rules_per_path() {
        let mut config = EnvoyConfiguration::new();
        let options = auth(
            r#"
jwt:
  jwtProviders:
    - name: main
      issuer: https://issuer.example.com
      audiences: [api]
      remoteJWKS:
        uri: https://issuer.example.com/.well-known/jwks.json
"#,
        );
        assert!(apply_auth(&mut config, &options, &TARGET).unwrap().is_empty());
        apply_auth(&mut config, &options, &TARGET).unwrap();
        config.add_virtual_host("*");
        let snapshot = config.generate_snapshot().unwrap();

        let filters = &snapshot.payload.listener.http_connection_manager.http_filters;
        let jwt = filters
            .iter()
            .find_map(|f| match &f.config {
                FilterConfig::JwtAuthn(jwt) => Some(jwt),
                _ => None,
            })
            .unwrap();
        assert_eq!(jwt.rules.len(), 1);
        assert_eq!(jwt.rules[0].path, "/todos");
        assert_eq!(jwt.providers["main"].remote_jwks.timeout_secs, 1);
        assert_eq!(jwt.providers["main"].cache_duration_secs, 300);
        assert!(config.cluster_exist("issuer.example.com-443"));
    }
}
