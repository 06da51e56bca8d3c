//! Applying a fleet's configuration: compile, check, publish.
use std::sync::Arc;

use scc::HashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::distribution::DistributionService;
use crate::core::envoy::{
    BuildError, EnvoyConfiguration, ProxyConfig, update_config_from_api, update_config_from_static,
};
use crate::core::mocking::MockConfig;
use crate::core::options::{Options, StaticOptions};
use crate::core::snapshot::Snapshot;
use crate::core::spec::{OpenApiDocument, SpecError, parse_annotated};
use crate::metrics::increment_fleet_apply;

/// One annotated OpenAPI document of a fleet.
#[derive(Debug, Clone)]
pub struct ApiSource {
    pub name: String,
    pub document: OpenApiDocument,
    pub options: Options,
}

impl ApiSource {
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, SpecError> {
        let (document, options) = parse_annotated(source)?;
        Ok(Self {
            name: name.into(),
            document,
            options,
        })
    }
}

/// One static route document of a fleet.
#[derive(Debug, Clone)]
pub struct StaticRouteSource {
    pub name: String,
    pub options: StaticOptions,
}

impl StaticRouteSource {
    pub fn parse(name: impl Into<String>, source: &str) -> Result<Self, SpecError> {
        let mut options: StaticOptions =
            serde_yaml::from_str(source).map_err(|e| SpecError::Parse(e.to_string()))?;
        options.fill_defaults_and_validate()?;
        Ok(Self {
            name: name.into(),
            options,
        })
    }
}

/// Everything compiled into one fleet's snapshots.
#[derive(Debug, Clone, Default)]
pub struct FleetConfig {
    pub apis: Vec<ApiSource>,
    pub static_routes: Vec<StaticRouteSource>,
}

/// Versions published by a successful apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedFleet {
    pub proxy_version: String,
    pub mock_version: String,
    /// Nodes that accepted the new proxy snapshot during fan-out.
    pub proxy_nodes: usize,
    pub mock_nodes: usize,
}

/// Builds both snapshots of a fleet from its sources without publishing anything.
pub fn build_snapshots(
    config: &FleetConfig,
) -> Result<(Snapshot<ProxyConfig>, Snapshot<MockConfig>), BuildError> {
    let mut envoy = EnvoyConfiguration::new();
    let mut mocks = MockConfig::new();

    for api in &config.apis {
        update_config_from_api(&mut envoy, &mut mocks, &api.name, &api.options, &api.document)?;
    }
    for routes in &config.static_routes {
        update_config_from_static(&mut envoy, &routes.name, &routes.options)?;
    }

    let proxy = envoy.generate_snapshot()?;
    let mocks = Snapshot::new(mocks)?;
    Ok((proxy, mocks))
}

/// Owns the proxy and mock distribution services of every fleet.
pub struct FleetManager {
    proxy: Arc<DistributionService<ProxyConfig>>,
    mocks: Arc<DistributionService<MockConfig>>,
    /// Held from build to the last publish, so a fleet's proxy and mock snapshots always come
    /// from the same apply.
    apply_locks: HashMap<String, Arc<Mutex<()>>>,
}

impl FleetManager {
    pub fn new(
        proxy: Arc<DistributionService<ProxyConfig>>,
        mocks: Arc<DistributionService<MockConfig>>,
    ) -> Self {
        Self {
            proxy,
            mocks,
            apply_locks: HashMap::new(),
        }
    }

    pub fn proxy(&self) -> &Arc<DistributionService<ProxyConfig>> {
        &self.proxy
    }

    pub fn mocks(&self) -> &Arc<DistributionService<MockConfig>> {
        &self.mocks
    }

    /// Rebuilds the fleet's configuration from scratch and publishes it.
    ///
    /// Nothing is published unless both snapshots build and pass their consistency checks;
    /// on error the fleet keeps serving its previous snapshots.
    pub async fn apply_new_fleet_config(
        &self,
        fleet_id: &str,
        config: &FleetConfig,
    ) -> Result<AppliedFleet, BuildError> {
        let apply_lock = self
            .apply_locks
            .entry_async(fleet_id.to_string())
            .await
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .get()
            .clone();
        let _serialized = apply_lock.lock().await;

        // Versions are stamped under the lock, so they grow in apply order.
        let (proxy, mocks) = match build_snapshots(config) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(fleet = fleet_id, error = %e, "rejected fleet configuration");
                increment_fleet_apply(fleet_id, "rejected");
                return Err(e);
            }
        };

        let proxy_version = proxy.version.clone();
        let mock_version = mocks.version.clone();
        let routes: usize = proxy
            .payload
            .route_configuration
            .virtual_hosts
            .iter()
            .map(|vh| vh.routes.len())
            .sum();
        let mock_count = mocks.payload.len();

        let mock_nodes = self.mocks.publish(fleet_id, mocks).await?;
        let proxy_nodes = self.proxy.publish(fleet_id, proxy).await?;
        increment_fleet_apply(fleet_id, "applied");
        info!(
            fleet = fleet_id,
            version = %proxy_version,
            routes,
            mocks = mock_count,
            proxy_nodes,
            mock_nodes,
            "applied fleet configuration"
        );

        Ok(AppliedFleet {
            proxy_version,
            mock_version,
            proxy_nodes,
            mock_nodes,
        })
    }

    pub fn shutdown(&self) {
        self.proxy.shutdown();
        self.mocks.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TODOS: &str = r#"
openapi: 3.0.0
x-kusk:
  upstream: {service: {name: todos, namespace: apps, port: 8080}}
paths:
  /todos:
    get:
      responses: {}
"#;

    fn manager() -> FleetManager {
        FleetManager::new(
            Arc::new(DistributionService::new("proxy", None)),
            Arc::new(DistributionService::new("mocks", None)),
        )
    }

    #[tokio::test]
    async fn test_apply_publishes_both_snapshots() {
        let manager = manager();
        let config = FleetConfig {
            apis: vec![ApiSource::parse("todos", TODOS).unwrap()],
            static_routes: vec![],
        };
        let applied = manager.apply_new_fleet_config("default", &config).await.unwrap();

        let proxy = manager.proxy().snapshot("default").await.unwrap();
        assert_eq!(proxy.version, applied.proxy_version);
        assert_eq!(proxy.payload.clusters.len(), 1);
        let mocks = manager.mocks().snapshot("default").await.unwrap();
        assert!(mocks.payload.is_empty());
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_previous_snapshot() {
        let manager = manager();
        let good = FleetConfig {
            apis: vec![ApiSource::parse("todos", TODOS).unwrap()],
            static_routes: vec![],
        };
        let applied = manager.apply_new_fleet_config("default", &good).await.unwrap();

        let duplicate = FleetConfig {
            apis: vec![
                ApiSource::parse("one", TODOS).unwrap(),
                ApiSource::parse("two", TODOS).unwrap(),
            ],
            static_routes: vec![],
        };
        let err = manager
            .apply_new_fleet_config("default", &duplicate)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateRoute { .. }));

        let current = manager.proxy().snapshot("default").await.unwrap();
        assert_eq!(current.version, applied.proxy_version);
    }

    fn mocked_config(prefix: usize) -> FleetConfig {
        let document = format!(
            r#"
openapi: 3.0.0
x-kusk:
  mocking: {{enabled: true}}
  path: {{prefix: /v{prefix}}}
paths:
  /todos:
    get:
      operationId: listTodos
      responses:
        "200":
          content:
            application/json:
              example: {{v: {prefix}}}
"#
        );
        FleetConfig {
            apis: vec![ApiSource::parse("todos", &document).unwrap()],
            static_routes: vec![],
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_applies_publish_matching_snapshots() {
        let manager = Arc::new(manager());

        let applies: Vec<_> = (0..16)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .apply_new_fleet_config("default", &mocked_config(i))
                        .await
                        .unwrap()
                })
            })
            .collect();
        let mut newest: Option<AppliedFleet> = None;
        for apply in applies {
            let applied = apply.await.unwrap();
            if newest
                .as_ref()
                .is_none_or(|n| applied.proxy_version > n.proxy_version)
            {
                newest = Some(applied);
            }
        }
        let newest = newest.unwrap();

        let proxy = manager.proxy().snapshot("default").await.unwrap();
        let mocks = manager.mocks().snapshot("default").await.unwrap();
        assert_eq!(proxy.version, newest.proxy_version);
        assert_eq!(mocks.version, newest.mock_version);

        let route = &proxy.payload.route_configuration.virtual_hosts[0].routes[0];
        let mock_id = &route.request_headers_to_add[0].value;
        assert!(mocks.payload.get(mock_id).is_some());
        assert_eq!(mocks.payload.len(), 1);
    }

    #[test]
    fn test_static_route_source_validates() {
        let err = StaticRouteSource::parse("bad", "paths:\n  nope:\n    get: {}\n").unwrap_err();
        assert!(matches!(err, SpecError::Options(_)));
    }
}
