//! Snapshot cache and fan-out to connected fleet nodes.
//!
//! Each fleet owns at most one current snapshot, replaced on every apply. Every node stream
//! is a session task that owns a single-slot delivery channel registered under the fleet:
//! * the session first hands out the snapshot current at registration time,
//! * then forwards every snapshot the fan-out pushes into its channel,
//! * and unregisters itself on every exit path.
//!
//! Registration and fan-out are serialized by the connections lock, so a node registered
//! before a fan-out starts always receives that snapshot. Applies to one fleet are
//! serialized so nodes observe snapshots in apply order; sessions skip versions they already
//! delivered. A node that does not accept a snapshot within the send timeout is evicted and
//! its stream ends, which makes it reconnect and start again from the newest snapshot.
use std::{
    collections::HashMap as StdHashMap,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use futures_util::stream::Stream;
use scc::HashMap;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::core::snapshot::Snapshot;
use crate::metrics::{increment_fanout_eviction, increment_snapshot_delivered, set_connected_nodes};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DistributionError {
    /// Retryable: the node should connect again once a configuration was applied.
    #[error("no snapshot found for fleet {0}")]
    NoSnapshot(String),

    #[error("distribution service is shutting down")]
    ShuttingDown,

    /// The fleet already holds this version or a newer one; nothing was replaced.
    #[error("snapshot {version} for fleet {fleet} is not newer than current {current}")]
    Stale {
        fleet: String,
        version: String,
        current: String,
    },
}

pub type StreamId = u64;

struct NodeConnection<P> {
    node_name: String,
    sender: mpsc::Sender<Arc<Snapshot<P>>>,
}

/// Snapshot cache plus node registry for one payload kind.
pub struct DistributionService<P> {
    kind: &'static str,
    snapshots: HashMap<String, Arc<Snapshot<P>>>,
    connections: RwLock<StdHashMap<String, StdHashMap<StreamId, NodeConnection<P>>>>,
    apply_locks: HashMap<String, Arc<Mutex<()>>>,
    send_timeout: Option<Duration>,
    next_stream_id: AtomicU64,
    shutdown: CancellationToken,
}

/// The receiving end of one node stream.
///
/// Dropping it cancels the session, which unregisters the node.
pub struct Subscription<P> {
    stream_id: StreamId,
    receiver: mpsc::Receiver<Arc<Snapshot<P>>>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl<P> Subscription<P> {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Next snapshot; `None` once the session ended (cancelled, evicted or shut down).
    pub async fn recv(&mut self) -> Option<Arc<Snapshot<P>>> {
        self.receiver.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl<P> Stream for Subscription<P> {
    type Item = Arc<Snapshot<P>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<P: Send + Sync + 'static> DistributionService<P> {
    /// `kind` labels logs and metrics (`proxy`, `mocks`). `send_timeout` bounds how long the
    /// fan-out waits on one node; `None` waits indefinitely.
    pub fn new(kind: &'static str, send_timeout: Option<Duration>) -> Self {
        Self {
            kind,
            snapshots: HashMap::new(),
            connections: RwLock::new(StdHashMap::new()),
            apply_locks: HashMap::new(),
            send_timeout,
            next_stream_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Current snapshot of a fleet.
    pub async fn snapshot(&self, fleet_id: &str) -> Option<Arc<Snapshot<P>>> {
        self.snapshots
            .read_async(fleet_id, |_, snapshot| snapshot.clone())
            .await
    }

    pub fn fleets(&self) -> Vec<String> {
        let mut fleets = Vec::new();
        self.snapshots.iter_sync(|fleet, _| {
            fleets.push(fleet.clone());
            true
        });
        fleets.sort();
        fleets
    }

    pub async fn connected_nodes(&self, fleet_id: &str) -> usize {
        self.connections
            .read()
            .await
            .get(fleet_id)
            .map_or(0, StdHashMap::len)
    }

    /// Replaces the fleet's snapshot and pushes it to every registered node.
    ///
    /// A snapshot that is not newer than the fleet's current one is rejected with
    /// [`DistributionError::Stale`], so the cache never moves back to an older version.
    /// Returns the number of nodes that accepted it.
    pub async fn publish(
        &self,
        fleet_id: &str,
        snapshot: Snapshot<P>,
    ) -> Result<usize, DistributionError> {
        let apply_lock = self
            .apply_locks
            .entry_async(fleet_id.to_string())
            .await
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .get()
            .clone();
        let _serialized = apply_lock.lock().await;

        if let Some(current) = self.snapshot(fleet_id).await
            && snapshot.version <= current.version
        {
            warn!(
                kind = self.kind,
                fleet = fleet_id,
                version = %snapshot.version,
                current = %current.version,
                "stale snapshot rejected"
            );
            return Err(DistributionError::Stale {
                fleet: fleet_id.to_string(),
                version: snapshot.version,
                current: current.version.clone(),
            });
        }

        let snapshot = Arc::new(snapshot);
        self.snapshots
            .entry_async(fleet_id.to_string())
            .await
            .and_modify(|current| *current = snapshot.clone())
            .or_insert_with(|| snapshot.clone());
        info!(
            kind = self.kind,
            fleet = fleet_id,
            version = %snapshot.version,
            "snapshot replaced"
        );

        Ok(self.fan_out(fleet_id, snapshot).await)
    }

    async fn fan_out(&self, fleet_id: &str, snapshot: Arc<Snapshot<P>>) -> usize {
        let mut delivered = 0;
        let mut evicted = Vec::new();
        {
            let connections = self.connections.read().await;
            let Some(nodes) = connections.get(fleet_id) else {
                return 0;
            };
            for (stream_id, node) in nodes {
                let sent = match self.send_timeout {
                    Some(timeout) => node
                        .sender
                        .send_timeout(snapshot.clone(), timeout)
                        .await
                        .is_ok(),
                    None => node.sender.send(snapshot.clone()).await.is_ok(),
                };
                if sent {
                    delivered += 1;
                } else {
                    warn!(
                        kind = self.kind,
                        fleet = fleet_id,
                        node = %node.node_name,
                        stream_id,
                        version = %snapshot.version,
                        "node did not accept snapshot, evicting"
                    );
                    evicted.push(*stream_id);
                }
            }
        }

        if !evicted.is_empty() {
            let mut connections = self.connections.write().await;
            if let Some(nodes) = connections.get_mut(fleet_id) {
                for stream_id in &evicted {
                    // Dropping the sender ends the node's session.
                    if nodes.remove(stream_id).is_some() {
                        increment_fanout_eviction(fleet_id);
                    }
                }
                set_connected_nodes(self.kind, fleet_id, nodes.len());
            }
        }
        delivered
    }

    /// Opens a node stream for `fleet_id`.
    ///
    /// Fails right away when the fleet has no snapshot yet; the node is expected to retry.
    pub async fn subscribe(
        self: &Arc<Self>,
        fleet_id: &str,
        node_name: &str,
    ) -> Result<Subscription<P>, DistributionError> {
        if self.shutdown.is_cancelled() {
            return Err(DistributionError::ShuttingDown);
        }

        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let (updates_tx, updates_rx) = mpsc::channel(1);
        let initial = {
            let mut connections = self.connections.write().await;
            let initial = self
                .snapshot(fleet_id)
                .await
                .ok_or_else(|| DistributionError::NoSnapshot(fleet_id.to_string()))?;
            let nodes = connections.entry(fleet_id.to_string()).or_default();
            nodes.insert(
                stream_id,
                NodeConnection {
                    node_name: node_name.to_string(),
                    sender: updates_tx,
                },
            );
            set_connected_nodes(self.kind, fleet_id, nodes.len());
            initial
        };
        debug!(kind = self.kind, fleet = fleet_id, node = node_name, stream_id, "node registered");

        let (out_tx, out_rx) = mpsc::channel(1);
        let delivered = initial.version.clone();
        if out_tx.try_send(initial).is_ok() {
            increment_snapshot_delivered(fleet_id);
        }

        let cancel = self.shutdown.child_token();
        let span = info_span!(
            "node_session",
            kind = self.kind,
            fleet = fleet_id,
            node = node_name,
            stream_id
        );
        tokio::spawn(
            Arc::clone(self)
                .run_session(
                    fleet_id.to_string(),
                    stream_id,
                    updates_rx,
                    out_tx,
                    delivered,
                    cancel.clone(),
                )
                .instrument(span),
        );

        Ok(Subscription {
            stream_id,
            receiver: out_rx,
            _guard: cancel.clone().drop_guard(),
            cancel,
        })
    }

    async fn run_session(
        self: Arc<Self>,
        fleet_id: String,
        stream_id: StreamId,
        mut updates: mpsc::Receiver<Arc<Snapshot<P>>>,
        out: mpsc::Sender<Arc<Snapshot<P>>>,
        mut delivered: String,
        cancel: CancellationToken,
    ) {
        info!("session opened");
        loop {
            let update = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = out.closed() => break,
                update = updates.recv() => update,
            };
            let Some(snapshot) = update else {
                debug!("delivery channel closed");
                break;
            };
            if snapshot.version <= delivered {
                continue;
            }
            delivered = snapshot.version.clone();
            tokio::select! {
                _ = cancel.cancelled() => break,
                sent = out.send(snapshot) => {
                    if sent.is_err() {
                        break;
                    }
                    increment_snapshot_delivered(&fleet_id);
                }
            }
        }

        // Closed before taking the lock so a fan-out blocked on this channel fails fast.
        updates.close();
        drop(updates);
        self.unregister(&fleet_id, stream_id).await;
        info!("session closed");
    }

    async fn unregister(&self, fleet_id: &str, stream_id: StreamId) {
        let mut connections = self.connections.write().await;
        let Some(nodes) = connections.get_mut(fleet_id) else {
            return;
        };
        if nodes.remove(&stream_id).is_some() {
            debug!(kind = self.kind, fleet = fleet_id, stream_id, "node unregistered");
        }
        set_connected_nodes(self.kind, fleet_id, nodes.len());
        if nodes.is_empty() {
            connections.remove(fleet_id);
        }
    }

    /// Ends every session; new subscriptions are refused from now on.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::core::snapshot::{ConsistencyCheck, SnapshotError};

    #[derive(Debug, Clone, PartialEq)]
    struct Payload(&'static str);

    impl ConsistencyCheck for Payload {
        fn check_consistency(&self) -> Result<(), SnapshotError> {
            Ok(())
        }
    }

    fn service(timeout: Option<Duration>) -> Arc<DistributionService<Payload>> {
        Arc::new(DistributionService::new("test", timeout))
    }

    async fn wait_for_nodes(service: &DistributionService<Payload>, fleet: &str, expected: usize) {
        for _ in 0..100 {
            if service.connected_nodes(fleet).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {expected} nodes on {fleet}");
    }

    #[tokio::test]
    async fn test_subscribe_without_snapshot_fails() {
        let service = service(None);
        let err = service.subscribe("fleet", "node").await.err().unwrap();
        assert_eq!(err, DistributionError::NoSnapshot("fleet".into()));
        assert_eq!(service.connected_nodes("fleet").await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_initial_then_updates_in_order() {
        let service = service(Some(Duration::from_secs(1)));
        service
            .publish("fleet", Snapshot::new(Payload("one")).unwrap())
            .await
            .unwrap();

        let mut sub = service.subscribe("fleet", "node").await.unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, Payload("one"));

        service
            .publish("fleet", Snapshot::new(Payload("two")).unwrap())
            .await
            .unwrap();
        service
            .publish("fleet", Snapshot::new(Payload("three")).unwrap())
            .await
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, Payload("two"));
        assert_eq!(sub.recv().await.unwrap().payload, Payload("three"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_older_snapshot_never_replaces_newer() {
        let service = service(Some(Duration::from_secs(1)));
        let older = Snapshot::new(Payload("older")).unwrap();
        let newer = Snapshot::new(Payload("newer")).unwrap();
        let newer_version = newer.version.clone();

        service.publish("fleet", newer.clone()).await.unwrap();
        let mut open = service.subscribe("fleet", "node").await.unwrap();
        assert_eq!(open.recv().await.unwrap().version, newer_version);

        let err = service.publish("fleet", older).await.unwrap_err();
        assert!(matches!(err, DistributionError::Stale { .. }));
        let err = service.publish("fleet", newer).await.unwrap_err();
        assert!(matches!(err, DistributionError::Stale { .. }));
        assert_eq!(
            service.snapshot("fleet").await.unwrap().version,
            newer_version
        );

        let mut late = service.subscribe("fleet", "late").await.unwrap();
        assert_eq!(late.recv().await.unwrap().version, newer_version);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), open.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_version_already_delivered_is_skipped() {
        let service = service(None);
        service
            .publish("fleet", Snapshot::new(Payload("one")).unwrap())
            .await
            .unwrap();
        let mut sub = service.subscribe("fleet", "node").await.unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, Payload("one"));

        // A fan-out racing the registration delivers the initial snapshot a second time.
        let current = service.snapshot("fleet").await.unwrap();
        let sender = service.connections.read().await["fleet"][&sub.stream_id()]
            .sender
            .clone();
        sender.send(current).await.unwrap();

        service
            .publish("fleet", Snapshot::new(Payload("two")).unwrap())
            .await
            .unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, Payload("two"));
        assert!(
            tokio::time::timeout(Duration::from_millis(100), sub.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_unregisters_and_later_apply_succeeds() {
        let service = service(None);
        service
            .publish("fleet", Snapshot::new(Payload("one")).unwrap())
            .await
            .unwrap();

        let sub = service.subscribe("fleet", "node").await.unwrap();
        assert_eq!(service.connected_nodes("fleet").await, 1);
        drop(sub);
        wait_for_nodes(&service, "fleet", 0).await;

        let delivered = service
            .publish("fleet", Snapshot::new(Payload("two")).unwrap())
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_node_is_evicted() {
        let service = service(Some(Duration::from_millis(50)));
        service
            .publish("fleet", Snapshot::new(Payload("one")).unwrap())
            .await
            .unwrap();

        // Never reads: the output slot holds "one", the session parks on "two" and the
        // delivery channel fills with "three".
        let mut slow = service.subscribe("fleet", "slow").await.unwrap();
        for payload in ["two", "three", "four"] {
            service
                .publish("fleet", Snapshot::new(Payload(payload)).unwrap())
                .await
                .unwrap();
        }
        wait_for_nodes(&service, "fleet", 0).await;

        let mut received = Vec::new();
        while let Some(snapshot) = slow.recv().await {
            received.push(snapshot.payload.0);
        }
        assert_eq!(received.first(), Some(&"one"));

        let mut fresh = service.subscribe("fleet", "slow").await.unwrap();
        assert_eq!(fresh.recv().await.unwrap().payload, Payload("four"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_ends_sessions() {
        let service = service(None);
        service
            .publish("fleet", Snapshot::new(Payload("one")).unwrap())
            .await
            .unwrap();
        let mut sub = service.subscribe("fleet", "node").await.unwrap();
        assert!(sub.recv().await.is_some());

        service.shutdown();
        assert!(sub.recv().await.is_none());
        assert_eq!(
            service.subscribe("fleet", "node").await.err(),
            Some(DistributionError::ShuttingDown)
        );
    }
}
