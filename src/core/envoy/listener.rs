//! The single listener and its HTTP filter chain.
use super::BuildError;
use super::rate_limit::LOCAL_RATE_LIMIT_FILTER;
use super::resources::{
    FilterConfig, HttpConnectionManager, HttpFilter, LISTENER_ADDRESS, LISTENER_NAME,
    LISTENER_PORT, Listener, ROUTE_CONFIG_NAME, SocketAddress,
};

pub const CORS_FILTER: &str = "envoy.filters.http.cors";
pub const ROUTER_FILTER: &str = "envoy.filters.http.router";

/// Builds the connection manager filter chain. The router filter is always last and unique.
#[derive(Debug, Clone)]
pub struct HcmBuilder {
    filters: Vec<HttpFilter>,
}

impl Default for HcmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HcmBuilder {
    pub fn new() -> Self {
        Self {
            filters: vec![
                HttpFilter {
                    name: CORS_FILTER.to_string(),
                    disabled: false,
                    config: FilterConfig::Cors,
                },
                HttpFilter {
                    name: LOCAL_RATE_LIMIT_FILTER.to_string(),
                    disabled: false,
                    config: FilterConfig::LocalRateLimit {
                        stat_prefix: "http_local_rate_limiter".to_string(),
                    },
                },
                HttpFilter {
                    name: ROUTER_FILTER.to_string(),
                    disabled: false,
                    config: FilterConfig::Router,
                },
            ],
        }
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f.name == name)
    }

    pub fn filter(&self, name: &str) -> Option<&HttpFilter> {
        self.filters.iter().find(|f| f.name == name)
    }

    /// Adds a filter ahead of the router.
    ///
    /// Re-adding an identical filter is a no-op; a different filter under a taken name is an
    /// error, so two scopes can never silently overwrite each other's filter.
    pub fn add_filter(&mut self, filter: HttpFilter) -> Result<(), BuildError> {
        if let Some(existing) = self.filter(&filter.name) {
            if *existing == filter {
                return Ok(());
            }
            return Err(BuildError::filter(
                filter.name,
                "conflicting configuration for an already registered filter",
            ));
        }

        if matches!(filter.config, FilterConfig::Router) {
            return Err(BuildError::filter(
                filter.name,
                "only one router filter is allowed",
            ));
        }

        let router = self
            .filters
            .iter()
            .position(|f| matches!(f.config, FilterConfig::Router))
            .unwrap_or(self.filters.len());
        self.filters.insert(router, filter);
        Ok(())
    }

    pub fn filters(&self) -> &[HttpFilter] {
        &self.filters
    }

    pub fn build(&self) -> HttpConnectionManager {
        HttpConnectionManager {
            stat_prefix: "http".to_string(),
            route_config_name: ROUTE_CONFIG_NAME.to_string(),
            http_filters: self.filters.clone(),
        }
    }
}

pub fn listener(connection_manager: HttpConnectionManager) -> Listener {
    Listener {
        name: LISTENER_NAME.to_string(),
        address: SocketAddress {
            address: LISTENER_ADDRESS.to_string(),
            port: LISTENER_PORT,
        },
        http_connection_manager: connection_manager,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::envoy::resources::ExtAuthz;

    fn ext_authz(name: &str, prefix: &str) -> HttpFilter {
        HttpFilter {
            name: name.to_string(),
            disabled: true,
            config: FilterConfig::ExtAuthz(ExtAuthz {
                cluster: "auth-9000".into(),
                uri: "http://auth:9000".into(),
                path_prefix: prefix.into(),
                timeout_secs: 60,
                headers_to_add: vec![],
            }),
        }
    }

    #[test]
    fn test_router_stays_last() {
        let mut hcm = HcmBuilder::new();
        hcm.add_filter(ext_authz("authz", "")).unwrap();
        let names: Vec<_> = hcm.filters().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![CORS_FILTER, LOCAL_RATE_LIMIT_FILTER, "authz", ROUTER_FILTER]
        );
    }

    #[test]
    fn test_second_router_is_rejected() {
        let mut hcm = HcmBuilder::new();
        let err = hcm
            .add_filter(HttpFilter {
                name: "another-router".into(),
                disabled: false,
                config: FilterConfig::Router,
            })
            .unwrap_err();
        assert!(err.to_string().contains("only one router"));
    }

    #[test]
    fn test_identical_filter_is_idempotent_and_conflict_errors() {
        let mut hcm = HcmBuilder::new();
        hcm.add_filter(ext_authz("authz", "/a")).unwrap();
        hcm.add_filter(ext_authz("authz", "/a")).unwrap();
        assert_eq!(hcm.filters().len(), 4);
        assert!(hcm.add_filter(ext_authz("authz", "/b")).is_err());
    }

    #[test]
    fn test_listener_defaults() {
        let listener = listener(HcmBuilder::new().build());
        assert_eq!(listener.name, "listener_0");
        assert_eq!(listener.address.port, 8080);
        assert_eq!(listener.http_connection_manager.route_config_name, "local_route");
    }
}
