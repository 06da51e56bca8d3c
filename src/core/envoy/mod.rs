//! Proxy configuration: resources, their builders and the per-apply registry.
pub mod auth;
pub mod cluster;
pub mod configuration;
pub mod cors;
mod error;
pub mod listener;
pub mod matcher;
pub mod rate_limit;
pub mod redirect;
pub mod resources;
pub mod route_builder;

pub use configuration::{EnvoyConfiguration, sort_routes};
pub use error::BuildError;
pub use resources::ProxyConfig;
pub use route_builder::{RouteSpec, update_config_from_api, update_config_from_static};
