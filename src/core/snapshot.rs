//! Immutable, versioned configuration bundles.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    #[error("route {route} in vhost {vhost} references unknown cluster {cluster}")]
    DanglingCluster {
        vhost: String,
        route: String,
        cluster: String,
    },

    #[error("filter {filter} references unknown cluster {cluster}")]
    DanglingFilterCluster { filter: String, cluster: String },

    #[error("filter {filter} references unknown secret {secret}")]
    DanglingSecret { filter: String, secret: String },

    #[error("route {route} already exists for vhost {vhost}")]
    DuplicateRoute { vhost: String, route: String },

    #[error("inconsistent snapshot: {0}")]
    Inconsistent(String),
}

/// Internal consistency of a payload, checked before it may be published.
pub trait ConsistencyCheck {
    fn check_consistency(&self) -> Result<(), SnapshotError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<P> {
    /// Time ordered: a later snapshot always sorts after an earlier one.
    pub version: String,
    pub payload: P,
}

impl<P: ConsistencyCheck> Snapshot<P> {
    /// Stamps a new version on `payload` once it passes its consistency check.
    pub fn new(payload: P) -> Result<Self, SnapshotError> {
        payload.check_consistency()?;
        Ok(Self {
            version: Uuid::now_v7().to_string(),
            payload,
        })
    }
}
