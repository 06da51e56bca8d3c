use thiserror::Error;

use crate::core::distribution::DistributionError;
use crate::core::mocking::MockError;
use crate::core::options::OptionsError;
use crate::core::snapshot::SnapshotError;

/// Any of these aborts the whole configuration build.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("invalid CORS policy: {0}")]
    InvalidCors(String),

    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    #[error("virtual host {0} does not exist")]
    VirtualHostNotFound(String),

    #[error("route {route} already exists for vhost {vhost}")]
    DuplicateRoute { route: String, vhost: String },

    #[error("http filter {name}: {message}")]
    InvalidFilter { name: String, message: String },

    #[error("client secret {namespace}/{name} must be resolved before the build")]
    UnresolvedSecretRef { name: String, namespace: String },

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Mock(#[from] MockError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("publish failed: {0}")]
    Publish(#[from] DistributionError),
}

impl BuildError {
    pub(crate) fn filter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            name: name.into(),
            message: message.into(),
        }
    }
}
