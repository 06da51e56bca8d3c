pub mod distribution;
pub mod envoy;
pub mod fleet;
pub mod mocking;
pub mod options;
pub mod reconciler;
pub mod snapshot;
pub mod spec;

pub use distribution::{DistributionError, DistributionService, Subscription};
pub use fleet::{ApiSource, AppliedFleet, FleetConfig, FleetManager, StaticRouteSource};
pub use reconciler::{ApplySummary, ReconcileError, apply_all, apply_fleet, watch_and_reconcile};
pub use snapshot::{ConsistencyCheck, Snapshot, SnapshotError};
