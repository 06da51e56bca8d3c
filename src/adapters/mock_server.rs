//! The mock agent: answers the requests the proxy routes to it with the stored mock response
//! named by the `X-Kusk-Mock-ID` header.
use std::{future::Future, sync::Arc};

use arc_swap::ArcSwap;
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
};
use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::{
    adapters::middleware::{request_id_middleware, request_timing_middleware},
    core::{
        envoy::route_builder::HEADER_MOCK_ID,
        mocking::{MockConfig, negotiate},
    },
    metrics::increment_mock_response,
};

pub const HEADER_MOCKED: HeaderName = HeaderName::from_static("x-kusk-mocked");

/// Mock table currently served; replaced wholesale on every snapshot.
pub type MockStore = Arc<ArcSwap<MockConfig>>;

pub fn new_store() -> MockStore {
    Arc::new(ArcSwap::from_pointee(MockConfig::new()))
}

pub fn router(store: MockStore) -> Router {
    Router::new()
        .fallback(serve_mock)
        .layer(middleware::from_fn(request_timing_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(store)
}

pub async fn serve(
    listener: TcpListener,
    store: MockStore,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr().wrap_err("listener has no local address")?;
    info!(%addr, "mock agent listening");
    axum::serve(listener, router(store))
        .with_graceful_shutdown(shutdown)
        .await
        .wrap_err("mock server failed")
}

fn not_mocked(reason: &'static str) -> Response {
    increment_mock_response(false);
    (StatusCode::NOT_FOUND, [(HEADER_MOCKED, "false")], reason).into_response()
}

async fn serve_mock(State(store): State<MockStore>, headers: HeaderMap) -> Response {
    let Some(mock_id) = headers.get(HEADER_MOCK_ID).and_then(|v| v.to_str().ok()) else {
        return not_mocked("missing mock id");
    };

    let mocks = store.load();
    let Some(mock) = mocks.get(mock_id) else {
        debug!(mock_id, "unknown mock id");
        return not_mocked("unknown mock id");
    };
    increment_mock_response(true);

    let status = StatusCode::from_u16(mock.status_code).unwrap_or(StatusCode::OK);
    let available: Vec<&str> = mock.media_type_data.keys().map(String::as_str).collect();
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());

    match negotiate(accept, &available) {
        Some(media_type) => {
            let body = mock
                .media_type_data
                .get(media_type)
                .cloned()
                .unwrap_or_default();
            (
                status,
                [(header::CONTENT_TYPE, media_type), (HEADER_MOCKED, "true")],
                body,
            )
                .into_response()
        }
        None => (status, [(HEADER_MOCKED, "true")]).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, extract::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::core::mocking::MockResponse;

    fn store() -> MockStore {
        let mut config = MockConfig::new();

        let mut todos = MockResponse::new(200);
        todos
            .media_type_data
            .insert("application/json".to_string(), br#"[{"title":"walk"}]"#.to_vec());
        todos
            .media_type_data
            .insert("text/plain".to_string(), b"walk".to_vec());
        config.add("/todos-GET-listTodos", todos).unwrap();
        config
            .add("/todos-DELETE-clearTodos", MockResponse::new(204))
            .unwrap();

        Arc::new(ArcSwap::from_pointee(config))
    }

    fn request(mock_id: Option<&str>, accept: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri("/todos");
        if let Some(id) = mock_id {
            builder = builder.header(HEADER_MOCK_ID, id);
        }
        if let Some(accept) = accept {
            builder = builder.header(header::ACCEPT, accept);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_json_is_the_default() {
        let response = router(store())
            .oneshot(request(Some("/todos-GET-listTodos"), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(HEADER_MOCKED).unwrap(), "true");
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(body_text(response).await, r#"[{"title":"walk"}]"#);
    }

    #[tokio::test]
    async fn test_accept_selects_the_body() {
        let response = router(store())
            .oneshot(request(Some("/todos-GET-listTodos"), Some("text/*;q=0.9")))
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        assert_eq!(body_text(response).await, "walk");
    }

    #[tokio::test]
    async fn test_bodyless_mock() {
        let response = router(store())
            .oneshot(request(Some("/todos-DELETE-clearTodos"), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers().get(HEADER_MOCKED).unwrap(), "true");
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[tokio::test]
    async fn test_unknown_or_missing_mock_id() {
        let unknown = router(store())
            .oneshot(request(Some("/nope-GET-nope"), None))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        assert_eq!(unknown.headers().get(HEADER_MOCKED).unwrap(), "false");

        let missing = router(store()).oneshot(request(None, None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_swapped_store_is_served() {
        let store = new_store();
        let app = router(store.clone());

        let before = app
            .clone()
            .oneshot(request(Some("/todos-DELETE-clearTodos"), None))
            .await
            .unwrap();
        assert_eq!(before.status(), StatusCode::NOT_FOUND);

        let mut config = MockConfig::new();
        config
            .add("/todos-DELETE-clearTodos", MockResponse::new(202))
            .unwrap();
        store.store(Arc::new(config));

        let after = app
            .oneshot(request(Some("/todos-DELETE-clearTodos"), None))
            .await
            .unwrap();
        assert_eq!(after.status(), StatusCode::ACCEPTED);
    }
}
