//! Keeps a mock agent's [`MockStore`] in sync with its fleet's mock snapshots.
//!
//! The client follows the distribution service's event stream and swaps in every snapshot it
//! receives. When the stream fails or ends it reconnects with exponential backoff; the service
//! then starts it again from the newest snapshot.
use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use reqwest::{StatusCode, header};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    adapters::{distribution_server::SNAPSHOT_EVENT, mock_server::MockStore},
    core::{Snapshot, mocking::MockConfig},
};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid manager url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("request to manager failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fleet has no snapshot yet")]
    NotReady,

    #[error("manager answered with status {0}")]
    Status(StatusCode),

    #[error("malformed snapshot: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One dispatched Server-Sent Event.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no line break.
    scanned: usize,
    current: SseEvent,
    has_data: bool,
}

impl SseParser {
    /// Feeds a chunk and returns every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        let mut consumed = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            let line = String::from_utf8_lossy(&self.buffer[consumed..end]).into_owned();
            consumed = end + 1;
            self.scanned = consumed;
            self.line(line.strip_suffix('\r').unwrap_or(&line), &mut events);
        }

        self.buffer.drain(..consumed);
        self.scanned = self.buffer.len();
        events
    }

    fn line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            if self.has_data {
                events.push(std::mem::take(&mut self.current));
            } else {
                self.current = SseEvent::default();
            }
            self.has_data = false;
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.current.event = Some(value.to_string()),
            "id" => self.current.id = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            _ => {}
        }
    }
}

/// Mock snapshot stream endpoint below `manager_url`, keeping any base path it carries.
fn snapshots_url(manager_url: &str) -> Result<Url, AgentError> {
    let mut base = Url::parse(manager_url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join("v1/snapshots/mocks")?)
}

#[derive(Debug)]
pub struct MockAgentClient {
    client: reqwest::Client,
    url: Url,
    fleet_id: String,
    node_name: String,
    store: MockStore,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl MockAgentClient {
    pub fn new(
        manager_url: &str,
        fleet_id: impl Into<String>,
        node_name: impl Into<String>,
        store: MockStore,
    ) -> Result<Self, AgentError> {
        let url = snapshots_url(manager_url)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url,
            fleet_id: fleet_id.into(),
            node_name: node_name.into(),
            store,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        })
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Follows the stream until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut backoff = self.initial_backoff;
        loop {
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => return,
                outcome = self.follow() => outcome,
            };
            match outcome {
                Ok(received) => {
                    info!(fleet = %self.fleet_id, received, "snapshot stream ended, reconnecting");
                    if received > 0 {
                        backoff = self.initial_backoff;
                    }
                }
                Err(AgentError::NotReady) => {
                    debug!(fleet = %self.fleet_id, "fleet not ready, retrying");
                }
                Err(e) => {
                    warn!(fleet = %self.fleet_id, error = %e, "snapshot stream failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.max_backoff);
        }
    }

    /// One connection: returns how many snapshots were applied before the stream ended.
    async fn follow(&self) -> Result<usize, AgentError> {
        let response = self
            .client
            .get(self.url.clone())
            .query(&[
                ("fleet_id", self.fleet_id.as_str()),
                ("node_name", self.node_name.as_str()),
            ])
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        match response.status() {
            StatusCode::SERVICE_UNAVAILABLE => return Err(AgentError::NotReady),
            status if !status.is_success() => return Err(AgentError::Status(status)),
            _ => {}
        }

        let mut received = 0;
        let mut parser = SseParser::default();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            for event in parser.push(&chunk?) {
                if self.apply(&event)? {
                    received += 1;
                }
            }
        }
        Ok(received)
    }

    fn apply(&self, event: &SseEvent) -> Result<bool, AgentError> {
        if event.event.as_deref() != Some(SNAPSHOT_EVENT) {
            return Ok(false);
        }
        let snapshot: Snapshot<MockConfig> = serde_json::from_str(&event.data)?;
        info!(
            fleet = %self.fleet_id,
            version = %snapshot.version,
            mocks = snapshot.payload.len(),
            "mock snapshot applied"
        );
        self.store.store(Arc::new(snapshot.payload));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock_server::new_store;
    use crate::core::mocking::MockResponse;

    #[test]
    fn test_parser_handles_split_chunks() {
        let mut parser = SseParser::default();
        assert!(parser.push(b"event: snap").is_empty());
        assert!(parser.push(b"shot\r\nid: 1\ndata: {\"a\":").is_empty());

        let events = parser.push(b"1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: Some("snapshot".to_string()),
                id: Some("1".to_string()),
                data: "{\"a\":1}".to_string(),
            }]
        );
    }

    #[test]
    fn test_parser_skips_comments_and_empty_events() {
        let mut parser = SseParser::default();
        let events = parser.push(b":\n\nevent: ping\n\ndata: a\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(events[0].event, None);
    }

    #[test]
    fn test_parser_byte_at_a_time() {
        let data = format!("{{\"mocks\":\"{}\"}}", "x".repeat(4096));
        let stream = format!("event: snapshot\nid: 7\ndata: {data}\n\n");

        let mut parser = SseParser::default();
        let mut events = Vec::new();
        for (i, byte) in stream.as_bytes().iter().enumerate() {
            events.extend(parser.push(std::slice::from_ref(byte)));
            assert_eq!(parser.scanned, parser.buffer.len(), "after byte {i}");
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].data, data);
        assert!(parser.buffer.is_empty());
    }

    #[test]
    fn test_snapshots_url_keeps_base_path() {
        assert_eq!(
            snapshots_url("http://gw/kusk/").unwrap().as_str(),
            "http://gw/kusk/v1/snapshots/mocks"
        );
        assert_eq!(
            snapshots_url("http://gw/kusk").unwrap().as_str(),
            "http://gw/kusk/v1/snapshots/mocks"
        );
        assert_eq!(
            snapshots_url("http://127.0.0.1:18010").unwrap().as_str(),
            "http://127.0.0.1:18010/v1/snapshots/mocks"
        );
    }

    #[test]
    fn test_apply_swaps_the_store() {
        let store = new_store();
        let client =
            MockAgentClient::new("http://127.0.0.1:18010", "default", "agent", store.clone())
                .unwrap();

        let mut mocks = MockConfig::new();
        mocks.add("/todos-GET-list", MockResponse::new(200)).unwrap();
        let snapshot = Snapshot::new(mocks).unwrap();
        let event = SseEvent {
            event: Some(SNAPSHOT_EVENT.to_string()),
            id: Some(snapshot.version.clone()),
            data: serde_json::to_string(&snapshot).unwrap(),
        };

        assert!(client.apply(&event).unwrap());
        assert!(store.load().get("/todos-GET-list").is_some());
    }

    #[test]
    fn test_invalid_manager_url() {
        let err = MockAgentClient::new("not a url", "default", "agent", new_store()).unwrap_err();
        assert!(matches!(err, AgentError::InvalidUrl(_)));
    }
}
