pub mod agent_client;
pub mod config_providers;
pub mod distribution_server;
pub mod file_system;
pub mod middleware;
pub mod mock_server;

/// Re-export commonly used types from adapters
pub use agent_client::{AgentError, MockAgentClient};
pub use config_providers::FileConfigProvider;
pub use file_system::FileSystemAdapter;
pub use middleware::*;
pub use mock_server::{MockStore, new_store};
