//! Fleet wide configuration registry: clusters, virtual hosts, filters and secrets.
use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::debug;

use crate::core::snapshot::{ConsistencyCheck, Snapshot, SnapshotError};

use super::BuildError;
use super::cluster::{plain_cluster, tls_cluster};
use super::listener::{HcmBuilder, listener};
use super::resources::{
    Cluster, FilterConfig, HttpFilter, JwtAuthentication, JwtProviderConfig, JwtRequirementRule,
    MatcherKind, ProxyConfig, ROUTE_CONFIG_NAME, Route, RouteConfiguration, Secret, VirtualHost,
};

pub const JWT_FILTER: &str = "envoy.filters.http.jwt_authn";

/// Accumulates everything one apply produces; it is rebuilt from scratch on every apply.
#[derive(Debug, Default)]
pub struct EnvoyConfiguration {
    clusters: BTreeMap<String, Cluster>,
    vhosts: Vec<VirtualHost>,
    secrets: BTreeMap<String, Secret>,
    hcm: HcmBuilder,
    jwt: JwtAuthentication,
}

impl EnvoyConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster_exist(&self, name: &str) -> bool {
        self.clusters.contains_key(name)
    }

    /// Idempotent by name: the first registration under a name wins.
    pub fn add_cluster(&mut self, name: &str, host: &str, port: u16) {
        if !self.cluster_exist(name) {
            debug!(cluster = name, host, port, "adding cluster");
            self.clusters
                .insert(name.to_string(), plain_cluster(name, host, port));
        }
    }

    pub fn add_cluster_with_tls(&mut self, name: &str, host: &str, port: u16) {
        if !self.cluster_exist(name) {
            debug!(cluster = name, host, port, "adding TLS cluster");
            self.clusters
                .insert(name.to_string(), tls_cluster(name, host, port));
        }
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub fn virtual_host(&self, name: &str) -> Option<&VirtualHost> {
        self.vhosts.iter().find(|vh| vh.name == name)
    }

    /// Creates a virtual host whose only domain is its name. No-op if it exists.
    pub fn add_virtual_host(&mut self, name: &str) {
        if self.virtual_host(name).is_none() {
            self.vhosts.push(VirtualHost {
                name: name.to_string(),
                domains: vec![name.to_string()],
                routes: Vec::new(),
            });
        }
    }

    pub fn add_route_to_vhost(&mut self, vhost: &str, route: Route) -> Result<(), BuildError> {
        let vh = self
            .vhosts
            .iter_mut()
            .find(|vh| vh.name == vhost)
            .ok_or_else(|| BuildError::VirtualHostNotFound(vhost.to_string()))?;

        if vh.routes.iter().any(|r| r.name == route.name) {
            return Err(BuildError::DuplicateRoute {
                route: route.name,
                vhost: vhost.to_string(),
            });
        }
        vh.routes.push(route);
        Ok(())
    }

    pub fn add_secret(&mut self, secret: Secret) {
        self.secrets.insert(secret.name.clone(), secret);
    }

    pub fn add_http_filter(&mut self, filter: HttpFilter) -> Result<(), BuildError> {
        self.hcm.add_filter(filter)
    }

    pub fn http_filter(&self, name: &str) -> Option<&HttpFilter> {
        self.hcm.filter(name)
    }

    /// Registers a JWT provider; the same name may only ever describe the same provider.
    pub fn add_jwt_provider(
        &mut self,
        name: &str,
        provider: JwtProviderConfig,
    ) -> Result<(), BuildError> {
        match self.jwt.providers.get(name) {
            Some(existing) if *existing != provider => Err(BuildError::filter(
                JWT_FILTER,
                format!("provider {name} is configured twice with different settings"),
            )),
            Some(_) => Ok(()),
            None => {
                self.jwt.providers.insert(name.to_string(), provider);
                self.jwt
                    .requirement_map
                    .insert(name.to_string(), name.to_string());
                Ok(())
            }
        }
    }

    pub fn add_jwt_rule(&mut self, rule: JwtRequirementRule) {
        if !self.jwt.rules.contains(&rule) {
            self.jwt.rules.push(rule);
        }
    }

    /// Virtual hosts with their routes in first-match-wins order.
    pub fn sorted_virtual_hosts(&self) -> Vec<VirtualHost> {
        self.vhosts
            .iter()
            .cloned()
            .map(|mut vh| {
                sort_routes(&mut vh.routes);
                vh
            })
            .collect()
    }

    fn proxy_config(&self) -> Result<ProxyConfig, BuildError> {
        let mut hcm = self.hcm.clone();
        if !self.jwt.providers.is_empty() {
            hcm.add_filter(HttpFilter {
                name: JWT_FILTER.to_string(),
                disabled: false,
                config: FilterConfig::JwtAuthn(self.jwt.clone()),
            })?;
        }

        Ok(ProxyConfig {
            clusters: self.clusters.values().cloned().collect(),
            route_configuration: RouteConfiguration {
                name: ROUTE_CONFIG_NAME.to_string(),
                virtual_hosts: self.sorted_virtual_hosts(),
            },
            listener: listener(hcm.build()),
            secrets: self.secrets.values().cloned().collect(),
        })
    }

    /// Assembles the snapshot; nothing is returned unless the result is consistent.
    pub fn generate_snapshot(&self) -> Result<Snapshot<ProxyConfig>, BuildError> {
        let config = self.proxy_config()?;
        Ok(Snapshot::new(config)?)
    }
}

/// Exact routes keep insertion order, then regex routes by descending pattern length, then
/// prefix routes by descending prefix length.
pub fn sort_routes(routes: &mut Vec<Route>) {
    let mut exact = Vec::new();
    let mut regexes = Vec::new();
    let mut prefixes = Vec::new();
    for route in routes.drain(..) {
        match route.route_match.path.kind() {
            MatcherKind::Exact => exact.push(route),
            MatcherKind::Regex => regexes.push(route),
            MatcherKind::Prefix => prefixes.push(route),
        }
    }

    let pattern_len = |route: &Route| route.route_match.path.pattern().len();
    regexes.sort_by_key(|r| std::cmp::Reverse(pattern_len(r)));
    prefixes.sort_by_key(|r| std::cmp::Reverse(pattern_len(r)));

    routes.extend(exact);
    routes.extend(regexes);
    routes.extend(prefixes);
}

impl ConsistencyCheck for ProxyConfig {
    fn check_consistency(&self) -> Result<(), SnapshotError> {
        let clusters: HashSet<&str> = self.clusters.iter().map(|c| c.name.as_str()).collect();
        let secrets: HashSet<&str> = self.secrets.iter().map(|s| s.name.as_str()).collect();

        for vh in &self.route_configuration.virtual_hosts {
            let mut names = BTreeSet::new();
            for route in &vh.routes {
                if !names.insert(route.name.as_str()) {
                    return Err(SnapshotError::DuplicateRoute {
                        vhost: vh.name.clone(),
                        route: route.name.clone(),
                    });
                }
                if let Some(cluster) = route.action.cluster()
                    && !clusters.contains(cluster)
                {
                    return Err(SnapshotError::DanglingCluster {
                        vhost: vh.name.clone(),
                        route: route.name.clone(),
                        cluster: cluster.to_string(),
                    });
                }
            }
        }

        for filter in &self.listener.http_connection_manager.http_filters {
            let (filter_clusters, filter_secrets) = filter_references(&filter.config);
            if let Some(cluster) = filter_clusters.into_iter().find(|c| !clusters.contains(c)) {
                return Err(SnapshotError::DanglingFilterCluster {
                    filter: filter.name.clone(),
                    cluster: cluster.to_string(),
                });
            }
            if let Some(secret) = filter_secrets.into_iter().find(|s| !secrets.contains(s)) {
                return Err(SnapshotError::DanglingSecret {
                    filter: filter.name.clone(),
                    secret: secret.to_string(),
                });
            }
        }

        let routers = self
            .listener
            .http_connection_manager
            .http_filters
            .iter()
            .filter(|f| matches!(f.config, FilterConfig::Router))
            .count();
        let router_last = self
            .listener
            .http_connection_manager
            .http_filters
            .last()
            .is_some_and(|f| matches!(f.config, FilterConfig::Router));
        if routers != 1 || !router_last {
            return Err(SnapshotError::Inconsistent(
                "exactly one router filter must terminate the filter chain".to_string(),
            ));
        }

        Ok(())
    }
}

fn filter_references(config: &FilterConfig) -> (Vec<&str>, Vec<&str>) {
    match config {
        FilterConfig::ExtAuthz(authz) => (vec![authz.cluster.as_str()], vec![]),
        FilterConfig::OAuth2(oauth2) => (
            vec![oauth2.token_endpoint.cluster.as_str()],
            vec![oauth2.token_secret.as_str(), oauth2.hmac_secret.as_str()],
        ),
        FilterConfig::JwtAuthn(jwt) => (
            jwt.providers
                .values()
                .map(|p| p.remote_jwks.cluster.as_str())
                .collect(),
            vec![],
        ),
        FilterConfig::Cors | FilterConfig::LocalRateLimit { .. } | FilterConfig::Router => {
            (vec![], vec![])
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::core::envoy::resources::{ForwardAction, PathMatcher, RouteAction, RouteMatch};

    fn route(name: &str, path: PathMatcher, cluster: &str) -> Route {
        Route {
            name: name.to_string(),
            route_match: RouteMatch {
                path,
                headers: vec![],
            },
            action: RouteAction::Route(ForwardAction::to_cluster(cluster)),
            request_headers_to_add: vec![],
            response_headers_to_add: vec![],
            typed_per_filter_config: BTreeMap::new(),
        }
    }

    #[test]
    fn test_cluster_dedup() {
        let mut config = EnvoyConfiguration::new();
        config.add_cluster("a-80", "a", 80);
        assert!(config.cluster_exist("a-80"));
        config.add_cluster("a-80", "b", 81);
        assert_eq!(config.clusters().count(), 1);
        assert_eq!(config.clusters().next().unwrap().endpoint.address, "a");
    }

    #[test]
    fn test_route_requires_vhost_and_unique_name() {
        let mut config = EnvoyConfiguration::new();
        let r = route("/a-GET", PathMatcher::Path("/a".into()), "c-80");
        assert!(matches!(
            config.add_route_to_vhost("*", r.clone()),
            Err(BuildError::VirtualHostNotFound(_))
        ));

        config.add_virtual_host("*");
        config.add_virtual_host("*");
        config.add_route_to_vhost("*", r.clone()).unwrap();
        let err = config.add_route_to_vhost("*", r).unwrap_err();
        assert_eq!(err.to_string(), "route /a-GET already exists for vhost *");
    }

    #[test]
    fn test_dangling_cluster_fails_the_snapshot() {
        let mut config = EnvoyConfiguration::new();
        config.add_virtual_host("*");
        config
            .add_route_to_vhost("*", route("/a-GET", PathMatcher::Path("/a".into()), "missing-80"))
            .unwrap();
        let err = config.generate_snapshot().unwrap_err();
        assert!(matches!(
            err,
            BuildError::Snapshot(SnapshotError::DanglingCluster { .. })
        ));

        config.add_cluster("missing-80", "missing", 80);
        let snapshot = config.generate_snapshot().unwrap();
        assert_eq!(snapshot.payload.clusters.len(), 1);
    }

    #[test]
    fn test_sort_routes() {
        let mut routes = vec![
            route("p2", PathMatcher::Prefix("/a".into()), "c"),
            route("r12", PathMatcher::SafeRegex("^/x/([0-9]+)".into()), "c"),
            route("e1", PathMatcher::Path("/z".into()), "c"),
            route("p3", PathMatcher::Prefix("/ab".into()), "c"),
            route("r20", PathMatcher::SafeRegex("^/xyz/abc/([0-9]+)$".into()), "c"),
            route("e2", PathMatcher::Path("/a".into()), "c"),
        ];
        sort_routes(&mut routes);
        let names: Vec<_> = routes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["e1", "e2", "r20", "r12", "p3", "p2"]);
    }
}
