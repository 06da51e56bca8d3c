use std::{path::Path, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use kusk_gateway::{
    adapters::{
        FileConfigProvider, FileSystemAdapter, MockAgentClient, distribution_server, mock_server,
        new_store,
    },
    config::{ControlPlaneConfig, ControlPlaneConfigValidator, loader::load_config},
    core::{
        DistributionService, FleetManager, apply_all, fleet::build_snapshots,
        reconciler::load_fleet_config, watch_and_reconcile,
    },
    metrics,
    ports::{config_provider::ConfigProvider, document_source::DocumentSource},
    tracing_setup,
    utils::GracefulShutdown,
};
use tokio::net::TcpListener;

/// Quiet period collapsing bursts of file events into one reload.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "kusk.yaml")]
    config: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file and compile every fleet without publishing
    Validate {
        #[clap(short, long, default_value = "kusk.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        #[clap(short, long, default_value = "kusk.yaml")]
        config: String,
    },
    /// Print the proxy and mock snapshots a fleet compiles to
    Render {
        #[clap(short, long, default_value = "kusk.yaml")]
        config: String,
        /// Fleet to render; the first fleet when omitted
        #[clap(short, long)]
        fleet: Option<String>,
    },
    /// Run the control plane (default)
    Serve {
        #[clap(short, long, default_value = "kusk.yaml")]
        config: String,
    },
    /// Run a mock agent following its fleet's mock snapshots
    Agent {
        #[clap(short, long, default_value = "kusk.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Render { config, fleet }) => render_command(&config, fleet.as_deref()).await,
        Some(Commands::Serve { config }) => serve_command(&config).await,
        Some(Commands::Agent { config }) => agent_command(&config).await,
        None => serve_command(&args.config).await,
    }
}

async fn load_checked(config_path: &str) -> Result<ControlPlaneConfig> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    ControlPlaneConfigValidator::validate(&config).context("Invalid configuration")?;
    Ok(config)
}

fn fleet_manager(config: &ControlPlaneConfig) -> Result<Arc<FleetManager>> {
    let send_timeout = config
        .send_timeout()
        .context("Invalid fanout_send_timeout")?;
    Ok(Arc::new(FleetManager::new(
        Arc::new(DistributionService::new("proxy", send_timeout)),
        Arc::new(DistributionService::new("mocks", send_timeout)),
    )))
}

async fn serve_command(config_path: &str) -> Result<()> {
    let provider: Arc<dyn ConfigProvider> = Arc::new(
        FileConfigProvider::new(config_path).context("Failed to create config provider")?,
    );
    let config = provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load initial config from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)?;
    ControlPlaneConfigValidator::validate(&config).context("Invalid configuration")?;
    metrics::init_metrics()?;

    let manager = fleet_manager(&config)?;
    let source: Arc<dyn DocumentSource> = Arc::new(FileSystemAdapter::new());

    if let Err(e) = provider.track_documents(&config) {
        tracing::warn!("Failed to watch referenced documents: {e:#}");
    }
    let summary = apply_all(&manager, source.as_ref(), &config, "startup").await;
    for (fleet, e) in &summary.failed {
        tracing::error!(fleet = %fleet, error = %e, "initial fleet apply failed");
    }
    tracing::info!(
        fleets = config.fleets.len(),
        applied = summary.applied.len(),
        "initial configuration applied"
    );

    let shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = shutdown.clone();
    tokio::spawn(async move { signal_handler.run_signal_handler().await });

    let watcher = tokio::spawn(watch_and_reconcile(
        provider.clone(),
        source.clone(),
        manager.clone(),
        RELOAD_DEBOUNCE,
        shutdown.token(),
    ));

    let listener = TcpListener::bind(&config.distribution_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.distribution_addr))?;
    println!(
        "kusk-gateway control plane listening on {}",
        config.distribution_addr
    );

    let token = shutdown.token();
    let draining = manager.clone();
    distribution_server::serve(listener, manager.clone(), async move {
        token.cancelled().await;
        // Ends every node stream so the server can drain.
        draining.shutdown();
    })
    .await?;

    match shutdown.drain(watcher).await {
        kusk_gateway::utils::ShutdownReason::Graceful => {
            tracing::info!("Graceful shutdown completed")
        }
        reason => tracing::warn!(?reason, "Shutdown did not complete cleanly"),
    }
    Ok(())
}

async fn agent_command(config_path: &str) -> Result<()> {
    let config = load_checked(config_path).await?;
    tracing_setup::init_tracing(&config.logging)?;
    metrics::init_metrics()?;

    let agent = config
        .agent
        .ok_or_else(|| eyre!("Configuration {config_path} has no agent section"))?;

    let store = new_store();
    let client = MockAgentClient::new(
        &agent.manager_url,
        agent.fleet_id.clone(),
        agent.node_name.clone(),
        store.clone(),
    )?;

    let shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler = shutdown.clone();
    tokio::spawn(async move { signal_handler.run_signal_handler().await });

    let token = shutdown.token();
    let follower = tokio::spawn(async move { client.run(token).await });

    let listener = TcpListener::bind(&agent.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", agent.listen_addr))?;
    tracing::info!(
        fleet = %agent.fleet_id,
        manager = %agent.manager_url,
        "mock agent started"
    );
    mock_server::serve(listener, store, shutdown.token().cancelled_owned()).await?;

    shutdown.drain(follower).await;
    Ok(())
}

/// Compile one fleet of the configuration and print both snapshots as JSON.
async fn render_command(config_path: &str, fleet_id: Option<&str>) -> Result<()> {
    let config = load_checked(config_path).await?;
    let fleet = match fleet_id {
        Some(id) => config
            .fleet(id)
            .ok_or_else(|| eyre!("Fleet '{id}' is not configured"))?,
        None => config
            .fleets
            .first()
            .ok_or_else(|| eyre!("Configuration has no fleets"))?,
    };

    let fleet_config = load_fleet_config(&FileSystemAdapter::new(), fleet).await?;
    let (proxy, mocks) = build_snapshots(&fleet_config)?;
    let rendered = serde_json::json!({
        "fleet": fleet.id,
        "proxy": serde_json::to_value(&proxy)?,
        "mocks": serde_json::to_value(&mocks)?,
    });
    println!("{}", serde_json::to_string_pretty(&rendered)?);
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = ControlPlaneConfigValidator::validate(&config) {
        eprintln!("❌ Configuration validation failed:");
        eprintln!("{e}");
        std::process::exit(1);
    }
    println!("✅ Configuration validation: OK");

    let source = FileSystemAdapter::new();
    let mut failed = 0;
    for fleet in &config.fleets {
        let compiled = match load_fleet_config(&source, fleet).await {
            Ok(fleet_config) => build_snapshots(&fleet_config).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match compiled {
            Ok((proxy, mocks)) => {
                let routes: usize = proxy
                    .payload
                    .route_configuration
                    .virtual_hosts
                    .iter()
                    .map(|vh| vh.routes.len())
                    .sum();
                println!(
                    "✅ Fleet '{}': {} routes, {} clusters, {} mocks",
                    fleet.id,
                    routes,
                    proxy.payload.clusters.len(),
                    mocks.payload.len()
                );
            }
            Err(e) => {
                failed += 1;
                eprintln!("❌ Fleet '{}': {e}", fleet.id);
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    println!();
    println!("📋 Configuration Summary:");
    println!("   • Distribution Address: {}", config.distribution_addr);
    println!("   • Fleets: {}", config.fleets.len());
    println!("   • Agent: {}", config.agent.is_some());
    println!();
    println!("🎉 Configuration is valid and ready to use!");
    Ok(())
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# kusk-gateway control plane configuration

# Address nodes stream their snapshots from
distribution_addr: "0.0.0.0:18010"

# How long one node may take to accept a snapshot before it is disconnected ("0s" waits forever)
fanout_send_timeout: 5s

logging:
  level: info
  json: false

fleets:
  - id: default
    apis:
      # Paths are relative to this file
      - name: todos
        spec_path: todos.yaml
    static_routes: []

# Mock agent mode (kusk-gateway agent)
# agent:
#   listen_addr: "127.0.0.1:8090"
#   manager_url: "http://127.0.0.1:18010"
#   fleet_id: default
#   node_name: mock-agent
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'kusk-gateway serve --config {config_path}' to start the control plane");
    Ok(())
}
