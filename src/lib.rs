//! kusk-gateway - a control plane for Envoy-style proxy fleets driven by OpenAPI documents.
//!
//! Annotated OpenAPI 3 documents (`x-kusk` extensions) and static route documents are compiled
//! into a fleet's proxy configuration (listener, virtual hosts, routes, clusters, secrets) plus a
//! mock table. Every successful compilation becomes an immutable, versioned snapshot that is
//! streamed to all nodes of the fleet.
//!
//! # Features
//! - Option inheritance from document to path to operation, with validation
//! - Route building: upstream proxying, redirects, mocking, request validation, CORS, timeouts,
//!   retries, rate limiting, caching headers and authentication
//! - Mock responses generated from examples, served with content negotiation by the mock agent
//! - Snapshot distribution over Server-Sent Events with ordered, deduplicated delivery and
//!   eviction of slow nodes
//! - Live reload of the configuration and every referenced document
//! - Metrics through the `metrics` facade & structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use kusk_gateway::core::{ApiSource, DistributionService, FleetConfig, FleetManager};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let manager = FleetManager::new(
//!     Arc::new(DistributionService::new("proxy", None)),
//!     Arc::new(DistributionService::new("mocks", None)),
//! );
//! let document = std::fs::read_to_string("todos.yaml")?;
//! let config = FleetConfig {
//!     apis: vec![ApiSource::parse("todos", &document)?],
//!     static_routes: vec![],
//! };
//! let applied = manager.apply_new_fleet_config("default", &config).await?;
//! println!("published {}", applied.proxy_version);
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! compilation and distribution inside `core`.
//!
//! # Error Handling
//! Domain operations return their own `thiserror` error types; process level code returns
//! `eyre::Result<T>` with context attached using `WrapErr`.
//!
//! # Concurrency & Data Structures
//! Snapshot caches use `scc::HashMap`; the mock agent swaps its table through `arc_swap`.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{FileConfigProvider, FileSystemAdapter, MockAgentClient},
    core::{DistributionService, FleetConfig, FleetManager, Snapshot},
    utils::GracefulShutdown,
};
