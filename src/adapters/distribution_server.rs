//! HTTP surface of the distribution service.
//!
//! Nodes open a long-lived `GET /v1/snapshots/{proxy,mocks}?fleet_id=..&node_name=..` request
//! and receive Server-Sent Events: one `snapshot` event per version, the event id set to the
//! snapshot version and the data holding the JSON encoded snapshot. A fleet without a snapshot
//! answers `503` with `Retry-After`, after which the node is expected to reconnect.
use std::{future::Future, sync::Arc};

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header},
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use eyre::{Result, WrapErr};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    adapters::middleware::{request_id_middleware, request_timing_middleware},
    core::{DistributionError, DistributionService, FleetManager},
    metrics,
};

pub const SNAPSHOT_EVENT: &str = "snapshot";
pub const RETRY_AFTER_SECS: &str = "5";

#[derive(Debug, Deserialize)]
pub struct NodeParams {
    pub fleet_id: String,
    pub node_name: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetStatus {
    pub id: String,
    pub proxy_version: Option<String>,
    pub mock_version: Option<String>,
    pub proxy_nodes: usize,
    pub mock_nodes: usize,
}

pub fn router(manager: Arc<FleetManager>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/fleets", get(list_fleets))
        .route("/v1/snapshots/proxy", get(stream_proxy))
        .route("/v1/snapshots/mocks", get(stream_mocks))
        .layer(middleware::from_fn(request_timing_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Serve the distribution API on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    manager: Arc<FleetManager>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().wrap_err("listener has no local address")?;
    info!(%addr, "distribution service listening");
    axum::serve(listener, router(manager))
        .with_graceful_shutdown(shutdown)
        .await
        .wrap_err("distribution server failed")
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "connected_nodes": metrics::get_current_metrics(),
    }))
}

async fn list_fleets(State(manager): State<Arc<FleetManager>>) -> Json<Vec<FleetStatus>> {
    let mut ids = manager.proxy().fleets();
    ids.extend(manager.mocks().fleets());
    ids.sort();
    ids.dedup();

    let mut fleets = Vec::with_capacity(ids.len());
    for id in ids {
        fleets.push(FleetStatus {
            proxy_version: manager.proxy().snapshot(&id).await.map(|s| s.version.clone()),
            mock_version: manager.mocks().snapshot(&id).await.map(|s| s.version.clone()),
            proxy_nodes: manager.proxy().connected_nodes(&id).await,
            mock_nodes: manager.mocks().connected_nodes(&id).await,
            id,
        });
    }
    Json(fleets)
}

async fn stream_proxy(
    State(manager): State<Arc<FleetManager>>,
    Query(params): Query<NodeParams>,
) -> Response {
    stream_snapshots(manager.proxy(), params).await
}

async fn stream_mocks(
    State(manager): State<Arc<FleetManager>>,
    Query(params): Query<NodeParams>,
) -> Response {
    stream_snapshots(manager.mocks(), params).await
}

async fn stream_snapshots<P>(service: &Arc<DistributionService<P>>, params: NodeParams) -> Response
where
    P: Serialize + Send + Sync + 'static,
{
    match service.subscribe(&params.fleet_id, &params.node_name).await {
        Ok(subscription) => {
            info!(
                kind = service.kind(),
                fleet = %params.fleet_id,
                node = %params.node_name,
                stream_id = subscription.stream_id(),
                "node stream opened"
            );
            let events = subscription.map(|snapshot| {
                Event::default()
                    .event(SNAPSHOT_EVENT)
                    .id(snapshot.version.clone())
                    .json_data(&*snapshot)
            });
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e @ DistributionError::NoSnapshot(_)) => {
            warn!(
                kind = service.kind(),
                fleet = %params.fleet_id,
                node = %params.node_name,
                "node connected before any snapshot was applied"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, RETRY_AFTER_SECS)],
                e.to_string(),
            )
                .into_response()
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, extract::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::core::{ApiSource, FleetConfig};

    const TODOS: &str = r#"
openapi: 3.0.0
x-kusk:
  upstream: {service: {name: todos, namespace: apps, port: 8080}}
paths:
  /todos:
    get:
      responses: {}
"#;

    fn manager() -> Arc<FleetManager> {
        Arc::new(FleetManager::new(
            Arc::new(DistributionService::new("proxy", None)),
            Arc::new(DistributionService::new("mocks", None)),
        ))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_no_snapshot_is_retryable() {
        let response = router(manager())
            .oneshot(get("/v1/snapshots/proxy?fleet_id=default&node_name=envoy-0"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "5");
    }

    #[tokio::test]
    async fn test_missing_node_params_are_rejected() {
        let response = router(manager())
            .oneshot(get("/v1/snapshots/proxy?fleet_id=default"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stream_starts_with_current_snapshot() {
        let manager = manager();
        let config = FleetConfig {
            apis: vec![ApiSource::parse("todos", TODOS).unwrap()],
            static_routes: vec![],
        };
        let applied = manager.apply_new_fleet_config("default", &config).await.unwrap();

        let response = router(manager.clone())
            .oneshot(get("/v1/snapshots/proxy?fleet_id=default&node_name=envoy-0"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: snapshot"));
        assert!(text.contains(&format!("id: {}", applied.proxy_version)));
        assert!(text.contains("todos.apps.svc.cluster.local"));
        assert_eq!(manager.proxy().connected_nodes("default").await, 1);

        manager.shutdown();
        while let Some(frame) = body.frame().await {
            frame.unwrap();
        }
    }

    #[tokio::test]
    async fn test_list_fleets() {
        let manager = manager();
        let config = FleetConfig::default();
        let applied = manager.apply_new_fleet_config("edge", &config).await.unwrap();

        let response = router(manager).oneshot(get("/v1/fleets")).await.unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let fleets: Vec<FleetStatus> = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(fleets.len(), 1);
        assert_eq!(fleets[0].id, "edge");
        assert_eq!(fleets[0].proxy_version, Some(applied.proxy_version));
        assert_eq!(fleets[0].proxy_nodes, 0);
    }
}
