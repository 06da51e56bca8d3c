//! Turning process configuration into applied fleets, at startup and on every change.
use std::{sync::Arc, time::Duration};

use eyre::Result;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

use crate::config::{ControlPlaneConfig, ControlPlaneConfigValidator, FleetEntry};
use crate::core::envoy::BuildError;
use crate::core::fleet::{ApiSource, AppliedFleet, FleetConfig, FleetManager, StaticRouteSource};
use crate::core::spec::SpecError;
use crate::metrics::increment_fleet_apply;
use crate::ports::{
    config_provider::ConfigProvider,
    document_source::{DocumentError, DocumentSource},
};
use crate::tracing_setup::create_apply_span;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("document {path} is invalid: {source}")]
    Spec {
        path: String,
        #[source]
        source: SpecError,
    },

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Outcome of applying every fleet of a configuration.
#[derive(Debug, Default)]
pub struct ApplySummary {
    pub applied: Vec<(String, AppliedFleet)>,
    pub failed: Vec<(String, ReconcileError)>,
}

impl ApplySummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Reads and parses every document of a fleet.
pub async fn load_fleet_config(
    source: &dyn DocumentSource,
    fleet: &FleetEntry,
) -> Result<FleetConfig, ReconcileError> {
    let mut config = FleetConfig::default();

    for api in &fleet.apis {
        let text = source.read_document(&api.spec_path).await?;
        let api_source =
            ApiSource::parse(api.name.clone(), &text).map_err(|source| ReconcileError::Spec {
                path: api.spec_path.clone(),
                source,
            })?;
        config.apis.push(api_source);
    }

    for path in &fleet.static_routes {
        let text = source.read_document(path).await?;
        let static_source =
            StaticRouteSource::parse(path.clone(), &text).map_err(|source| ReconcileError::Spec {
                path: path.clone(),
                source,
            })?;
        config.static_routes.push(static_source);
    }

    Ok(config)
}

/// Loads and applies one fleet. The fleet keeps its previous snapshots on any error.
pub async fn apply_fleet(
    manager: &FleetManager,
    source: &dyn DocumentSource,
    fleet: &FleetEntry,
    trigger: &str,
) -> Result<AppliedFleet, ReconcileError> {
    let span = create_apply_span(&fleet.id, trigger);
    async {
        let config = match load_fleet_config(source, fleet).await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "fleet documents rejected");
                increment_fleet_apply(&fleet.id, "rejected");
                return Err(e);
            }
        };
        let applied = manager.apply_new_fleet_config(&fleet.id, &config).await?;
        tracing::Span::current().record("version", applied.proxy_version.as_str());
        Ok(applied)
    }
    .instrument(span)
    .await
}

pub async fn apply_all(
    manager: &FleetManager,
    source: &dyn DocumentSource,
    config: &ControlPlaneConfig,
    trigger: &str,
) -> ApplySummary {
    let mut summary = ApplySummary::default();
    for fleet in &config.fleets {
        match apply_fleet(manager, source, fleet, trigger).await {
            Ok(applied) => summary.applied.push((fleet.id.clone(), applied)),
            Err(e) => summary.failed.push((fleet.id.clone(), e)),
        }
    }
    summary
}

/// Re-applies every fleet whenever the configuration or one of its documents changes.
///
/// Bursts of change events within `debounce` collapse into one reload. A configuration that
/// fails to load or validate is ignored and the running fleets stay untouched.
pub async fn watch_and_reconcile(
    provider: Arc<dyn ConfigProvider>,
    source: Arc<dyn DocumentSource>,
    manager: Arc<FleetManager>,
    debounce: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut changes = provider.watch()?;
    info!("configuration watcher started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(debounce) => {}
        }
        while changes.try_recv().is_ok() {}

        let config = match provider.load_config().await {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to reload configuration: {e:#}. Keeping old configuration.");
                continue;
            }
        };
        if let Err(e) = ControlPlaneConfigValidator::validate(&config) {
            error!("Reloaded configuration is invalid: {e}. Keeping old configuration.");
            continue;
        }
        if let Err(e) = provider.track_documents(&config) {
            warn!("Failed to watch referenced documents: {e:#}");
        }

        let summary = apply_all(&manager, source.as_ref(), &config, "reload").await;
        info!(
            applied = summary.applied.len(),
            failed = summary.failed.len(),
            "configuration reloaded"
        );
    }

    info!("configuration watcher stopped");
    Ok(())
}
