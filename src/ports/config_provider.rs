use async_trait::async_trait;
use eyre::Result;
use tokio::sync::mpsc;

use crate::config::models::ControlPlaneConfig;

/// Trait for configuration providers that can load and watch for configuration changes.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Load the current configuration.
    async fn load_config(&self) -> Result<ControlPlaneConfig>;

    /// Also report changes of the documents `config` references.
    fn track_documents(&self, config: &ControlPlaneConfig) -> Result<()>;

    /// Return a channel that signals when the configuration or a tracked document changed.
    ///
    /// The receiver can be taken once; later calls fail.
    fn watch(&self) -> Result<mpsc::Receiver<()>>;
}
