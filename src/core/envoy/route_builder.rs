//! Compiles finalized options into routes, clusters and filters.
//!
//! One route is generated per operation and host. When options combine several behaviours the
//! first applicable one wins: redirect, then mock, then validate-and-proxy, then proxy.
use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::core::mocking::{MockConfig, generate_mock_response, mock_id};
use crate::core::options::{Host, Options, OptionsError, StaticOptions, SubOptions};
use crate::core::spec::{OpenApiDocument, ParamSchema, post_processed};

use super::BuildError;
use super::auth::{AuthTarget, apply_auth};
use super::cluster::cluster_name;
use super::configuration::EnvoyConfiguration;
use super::cors::cors_policy;
use super::matcher::{route_match, route_name, route_path};
use super::rate_limit::{LOCAL_RATE_LIMIT_FILTER, local_rate_limit, stat_prefix};
use super::redirect::redirect_action;
use super::resources::{
    DirectResponseAction, FilterOverride, ForwardAction, HeaderMatcher, HeaderValue,
    PathMatcher, RegexRewrite, RetryPolicy, Route, RouteAction, RouteMatch, StringMatch,
};

pub const MOCK_AGENT_HOST: &str = "127.0.0.1";
pub const MOCK_AGENT_PORT: u16 = 8090;
pub const VALIDATOR_HOST: &str = "kusk-gateway-validator-service.kusk-system.svc.cluster.local.";
pub const VALIDATOR_PORT: u16 = 17000;

pub const HEADER_MOCK_ID: &str = "X-Kusk-Mock-ID";
pub const HEADER_SERVICE_ID: &str = "X-Kusk-Service-ID";
pub const HEADER_OPERATION_ID: &str = "X-Kusk-Operation-ID";

const RETRY_ON: &str = "5xx";
const WEBSOCKET_UPGRADE: &str = "websocket";

/// One operation ready to be turned into routes.
#[derive(Debug, Clone)]
pub struct RouteSpec<'a> {
    /// Upper-case HTTP method.
    pub method: String,
    /// Path template as declared, before any prefix is applied.
    pub template: &'a str,
    /// Path the proxy matches on.
    pub path: String,
    pub operation_id: &'a str,
    pub params: BTreeMap<String, ParamSchema>,
    pub options: &'a SubOptions,
}

impl<'a> RouteSpec<'a> {
    pub fn new(method: &str, template: &'a str, operation_id: &'a str, options: &'a SubOptions) -> Self {
        let prefix = options.path.as_ref().map(|p| p.prefix.as_str()).unwrap_or_default();
        Self {
            method: method.to_ascii_uppercase(),
            template,
            path: route_path(prefix, template),
            operation_id,
            params: BTreeMap::new(),
            options,
        }
    }

    pub fn with_params(mut self, params: BTreeMap<String, ParamSchema>) -> Self {
        self.params = params;
        self
    }

    pub fn name(&self) -> String {
        route_name(&self.path, &self.method)
    }

    pub fn mock_id(&self) -> String {
        mock_id(&self.path, &self.method, self.operation_id)
    }
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

fn forward_action(spec: &RouteSpec<'_>, cluster: String) -> Result<ForwardAction, BuildError> {
    let options = spec.options;
    let mut action = ForwardAction::to_cluster(cluster);

    action.cors = options.cors.as_ref().map(cors_policy).transpose()?;
    action.regex_rewrite = options
        .upstream()
        .and_then(|u| u.rewrite.as_ref())
        .filter(|r| r.is_set())
        .map(|r| RegexRewrite {
            pattern: r.pattern.clone(),
            substitution: r.substitution.clone(),
        });

    if let Some(qos) = options.qos {
        action.timeout_secs = (qos.request_timeout > 0).then_some(qos.request_timeout);
        action.idle_timeout_secs = (qos.idle_timeout > 0).then_some(qos.idle_timeout);
        action.retry_policy = (qos.retries > 0).then(|| RetryPolicy {
            retry_on: RETRY_ON.to_string(),
            num_retries: qos.retries,
        });
    }
    if options.websocket_enabled() {
        action.upgrade_configs.push(WEBSOCKET_UPGRADE.to_string());
    }
    Ok(action)
}

/// Chooses the route action and the request headers that go with it, registering clusters on
/// the way.
fn route_action(
    config: &mut EnvoyConfiguration,
    spec: &RouteSpec<'_>,
) -> Result<(RouteAction, Vec<HeaderValue>), BuildError> {
    let options = spec.options;

    if let Some(redirect) = options.redirect() {
        return Ok((RouteAction::Redirect(redirect_action(redirect)?), Vec::new()));
    }

    if options.mocking_enabled() {
        let cluster = cluster_name(MOCK_AGENT_HOST, MOCK_AGENT_PORT);
        if !config.cluster_exist(&cluster) {
            config.add_cluster(&cluster, MOCK_AGENT_HOST, MOCK_AGENT_PORT);
        }
        let mut action = ForwardAction::to_cluster(cluster);
        action.cors = options.cors.as_ref().map(cors_policy).transpose()?;
        return Ok((
            RouteAction::Route(action),
            vec![HeaderValue::new(HEADER_MOCK_ID, spec.mock_id())],
        ));
    }

    let Some(upstream) = options.upstream() else {
        return Err(OptionsError::MissingBackend {
            operation: spec.name(),
        }
        .into());
    };

    let (host, port) = upstream.target.host_port();
    let cluster = cluster_name(&host, port);
    if !config.cluster_exist(&cluster) {
        config.add_cluster(&cluster, &host, port);
    }

    if options.validation_enabled() {
        let validator = cluster_name(VALIDATOR_HOST, VALIDATOR_PORT);
        if !config.cluster_exist(&validator) {
            config.add_cluster(&validator, VALIDATOR_HOST, VALIDATOR_PORT);
        }
        let headers = vec![
            HeaderValue::new(HEADER_SERVICE_ID, sha256_hex(&format!("{host}:{port}"))),
            HeaderValue::new(
                HEADER_OPERATION_ID,
                sha256_hex(&format!("{}:{}", spec.method, spec.template)),
            ),
        ];
        return Ok((RouteAction::Route(forward_action(spec, validator)?), headers));
    }

    Ok((RouteAction::Route(forward_action(spec, cluster)?), Vec::new()))
}

/// Builds the route of `spec` for one virtual host.
pub fn build_route(
    config: &mut EnvoyConfiguration,
    spec: &RouteSpec<'_>,
    host: &Host,
    api_name: &str,
) -> Result<Route, BuildError> {
    let options = spec.options;
    let (action, request_headers_to_add) = route_action(config, spec)?;

    let mut response_headers_to_add = Vec::new();
    if let Some(max_age) = options.cache.as_ref().and_then(|c| c.max_age_if_enabled()) {
        response_headers_to_add.push(HeaderValue::new("Cache-Control", format!("max-age={max_age}")));
    }

    let mut typed_per_filter_config = BTreeMap::new();
    if let Some(rate_limit) = &options.rate_limit {
        let prefix = stat_prefix(host.as_str(), &spec.path, &spec.method, spec.operation_id);
        typed_per_filter_config.insert(
            LOCAL_RATE_LIMIT_FILTER.to_string(),
            FilterOverride::LocalRateLimit(local_rate_limit(rate_limit, prefix)),
        );
    }
    if let Some(auth) = &options.auth {
        let target = AuthTarget {
            api_name,
            route_path: &spec.path,
        };
        typed_per_filter_config.extend(apply_auth(config, auth, &target)?);
    }

    Ok(Route {
        name: spec.name(),
        route_match: route_match(&spec.path, &spec.method, &spec.params, options.cors.is_some()),
        action,
        request_headers_to_add,
        response_headers_to_add,
        typed_per_filter_config,
    })
}

fn add_routes(
    config: &mut EnvoyConfiguration,
    hosts: &[Host],
    spec: &RouteSpec<'_>,
    api_name: &str,
) -> Result<(), BuildError> {
    for host in hosts {
        let route = build_route(config, spec, host, api_name)?;
        debug!(
            route = %route.name,
            vhost = host.as_str(),
            kind = ?route.route_match.path.kind(),
            "adding route"
        );
        config.add_route_to_vhost(host.as_str(), route)?;
    }
    Ok(())
}

/// Adds every enabled operation of an annotated document; mocked operations also get their
/// canned response registered in `mocks`.
pub fn update_config_from_api(
    config: &mut EnvoyConfiguration,
    mocks: &mut MockConfig,
    api_name: &str,
    options: &Options,
    doc: &OpenApiDocument,
) -> Result<(), BuildError> {
    for host in &options.hosts {
        config.add_virtual_host(host.as_str());
    }

    let mut routes = 0usize;
    for (path, item) in &doc.paths {
        for (method, operation) in item.operations() {
            let Some(op_options) = options.operation(method, path) else {
                continue;
            };
            if op_options.is_disabled() {
                continue;
            }

            let spec = RouteSpec::new(method, path, &operation.operation_id, op_options)
                .with_params(item.parameters_for(operation));

            if op_options.mocking_enabled() && op_options.redirect().is_none() {
                let response = generate_mock_response(operation)?;
                mocks.add(spec.mock_id(), response)?;
            }

            add_routes(config, &options.hosts, &spec, api_name)?;
            routes += 1;
        }
    }

    if let Some(openapi_path) = &options.openapi_path {
        let body = post_processed(doc, options).to_string();
        for host in &options.hosts {
            config.add_route_to_vhost(host.as_str(), openapi_route(openapi_path, body.clone()))?;
        }
    }

    info!(api = api_name, operations = routes, "compiled api");
    Ok(())
}

fn openapi_route(path: &str, body: String) -> Route {
    Route {
        name: route_name(path, "GET"),
        route_match: RouteMatch {
            path: PathMatcher::Path(path.to_string()),
            headers: vec![HeaderMatcher {
                name: ":method".to_string(),
                string_match: StringMatch::Exact("GET".to_string()),
            }],
        },
        action: RouteAction::DirectResponse(DirectResponseAction { status: 200, body }),
        request_headers_to_add: Vec::new(),
        response_headers_to_add: vec![HeaderValue::new("Content-Type", "application/json")],
        typed_per_filter_config: BTreeMap::new(),
    }
}

/// Adds the routes of a static route document.
pub fn update_config_from_static(
    config: &mut EnvoyConfiguration,
    name: &str,
    options: &StaticOptions,
) -> Result<(), BuildError> {
    for host in &options.hosts {
        config.add_virtual_host(host.as_str());
    }

    for (path, methods) in &options.paths {
        for (method, op_options) in methods {
            if op_options.is_disabled() {
                continue;
            }
            let spec = RouteSpec::new(method, path, "", op_options);
            if op_options.mocking_enabled() && op_options.redirect().is_none() {
                return Err(OptionsError::invalid(
                    "mocking",
                    format!("{}: static routes have no examples to mock", spec.name()),
                )
                .into());
            }
            add_routes(config, &options.hosts, &spec, name)?;
        }
    }

    info!(static_routes = name, "compiled static routes");
    Ok(())
}
