//! Signal orchestrator - main entry point
//!
//! Wires the agent client, pipeline executor, event bus, broadcast gateway and
//! signal store together and serves them over HTTP.

use clap::{Parser, Subcommand};
use signal_orchestrator::agent::{AgentClient, HttpAgentClient};
use signal_orchestrator::api::{self, AppContext};
use signal_orchestrator::config::OrchestratorConfig;
use signal_orchestrator::events::EventBus;
use signal_orchestrator::gateway::{BroadcastGateway, GatewayForwarder};
use signal_orchestrator::observability::{init_default_logging, init_logging, LogFormat};
use signal_orchestrator::orchestrator::Orchestrator;
use signal_orchestrator::persistence::InMemorySignalStore;
use signal_orchestrator::pipeline::PipelineExecutor;
use signal_orchestrator::transport::MqttBridge;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

/// Multi-agent trading signal orchestrator
#[derive(Parser)]
#[command(name = "signal-orchestrator")]
#[command(about = "Runs the agent signal pipeline and streams results to live clients")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ORCHESTRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Override the HTTP port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and event bus
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default());
    let _ = match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, format, false),
        _ => init_logging(Level::TRACE, format, true),
    };

    info!("Starting signal orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let result = match cli.command {
        Commands::Run => run_orchestrator(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<OrchestratorConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(OrchestratorConfig::load_from_file(path)?);
    }

    for path_str in ["orchestrator.toml", "config/orchestrator.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(OrchestratorConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass --config or create orchestrator.toml".into())
}

async fn run_orchestrator(config: OrchestratorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(config);
    let addr: SocketAddr = config.bind_address().parse()?;

    let agent_client: Arc<dyn AgentClient> = Arc::new(HttpAgentClient::from_config(&config));
    let executor = Arc::new(PipelineExecutor::from_config(agent_client.clone(), &config));

    let bus = Arc::new(match &config.broker {
        Some(broker) => {
            info!(broker = %broker.url, "Event bus bridged to broker");
            EventBus::with_bridge(Arc::new(MqttBridge::new(broker.clone())))
        }
        None => {
            info!("No broker configured, event bus is in-process only");
            EventBus::new()
        }
    });

    let store = Arc::new(InMemorySignalStore::new(config.events.signal_history));
    let gateway = Arc::new(BroadcastGateway::new());

    let orchestrator = Arc::new(
        Orchestrator::new(executor, bus.clone())
            .with_sink(store.clone())
            .with_results_channel(config.events.results_channel.clone()),
    );

    bus.subscribe(
        &config.events.results_channel,
        Arc::new(GatewayForwarder::new(gateway.clone())),
    );

    // Local delivery keeps working while the broker is down
    if let Err(e) = bus.connect().await {
        warn!(error = %e, "Broker connection failed, continuing with local delivery");
    }

    let ctx = Arc::new(AppContext {
        orchestrator,
        gateway,
        store,
        agent_client,
        config: config.clone(),
    });

    let served = api::serve(ctx, addr, shutdown_signal()).await;

    info!("Application shutdown initiated");
    if let Err(e) = bus.disconnect().await {
        warn!(error = %e, "Error disconnecting from broker");
    }

    served.map_err(|e| e as Box<dyn std::error::Error>)
}

fn handle_config_command(
    config: &OrchestratorConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
