// Mocks compiled from a document are served by the agent's HTTP surface.
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Request,
    http::{StatusCode, header},
};
use http_body_util::BodyExt;
use kusk_gateway::{
    adapters::{mock_server, new_store},
    core::{
        ApiSource, DistributionService, FleetConfig, FleetManager,
        envoy::route_builder::HEADER_MOCK_ID,
    },
};
use tower::ServiceExt;

const TODOS: &str = r#"
openapi: 3.0.0
x-kusk:
  mocking: {enabled: true}
  path: {prefix: /api}
paths:
  /todos:
    get:
      operationId: listTodos
      responses:
        "200":
          content:
            application/json:
              example: {a: 1}
            text/plain:
              example: one todo
    delete:
      operationId: clearTodos
      responses:
        "204":
          description: cleared
"#;

async fn agent_router() -> axum::Router {
    let manager = FleetManager::new(
        Arc::new(DistributionService::new("proxy", None)),
        Arc::new(DistributionService::new("mocks", None)),
    );
    let config = FleetConfig {
        apis: vec![ApiSource::parse("todos", TODOS).unwrap()],
        static_routes: vec![],
    };
    manager
        .apply_new_fleet_config("default", &config)
        .await
        .unwrap();

    let snapshot = manager.mocks().snapshot("default").await.unwrap();
    let store = new_store();
    store.store(Arc::new(snapshot.payload.clone()));
    mock_server::router(store)
}

fn request(mock_id: &str, accept: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .uri("/api/todos")
        .header(HEADER_MOCK_ID, mock_id);
    if let Some(accept) = accept {
        builder = builder.header(header::ACCEPT, accept);
    }
    builder.body(Body::empty()).unwrap()
}

async fn body(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

#[tokio::test]
async fn test_example_is_served_byte_identical() {
    let app = agent_router().await;

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(request("/api/todos-GET-listTodos", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get(mock_server::HEADER_MOCKED).unwrap(),
            "true"
        );
        assert_eq!(body(response).await, br#"{"a":1}"#.to_vec());
    }
}

#[tokio::test]
async fn test_accept_picks_text_example() {
    let response = agent_router()
        .await
        .oneshot(request("/api/todos-GET-listTodos", Some("text/plain")))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    assert_eq!(body(response).await, b"one todo".to_vec());
}

#[tokio::test]
async fn test_bodyless_and_unknown_mocks() {
    let app = agent_router().await;

    let cleared = app
        .clone()
        .oneshot(request("/api/todos-DELETE-clearTodos", None))
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::NO_CONTENT);

    let unknown = app
        .oneshot(request("/api/todos-PUT-replaceTodos", None))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        unknown.headers().get(mock_server::HEADER_MOCKED).unwrap(),
        "false"
    );
}
