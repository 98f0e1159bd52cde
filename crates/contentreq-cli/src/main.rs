//! contentreq CLI - content request bridge for Azure DevOps.

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use contentreq_api::{ApiState, EnvironmentInfo};
use contentreq_azure_devops::AdoClient;
use contentreq_core::Config;
use contentreq_mcp::tools::catalog;
use contentreq_mcp::{HandlerSettings, McpServer, ToolHandler};
use contentreq_supervisor::{ProcessLauncher, Supervisor, SupervisorSettings, ToolInvoker};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "contentreq")]
#[command(author, version, about = "Content request bridge for Azure DevOps", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP facade and supervise a worker
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run the MCP worker on stdin/stdout
    Worker,

    /// List the tool catalog
    Tools,

    /// Call one tool through a supervised worker and print the result
    Call {
        /// Tool name, e.g. get_area_paths
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Print one value, e.g. `server.port`
    Get { key: String },

    /// Set one value, e.g. `azure_devops.project Content`
    Set { key: String, value: String },

    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the protocol in worker mode, so logs always go to stderr.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "Failed to load .env");
        }
    }

    match cli.command {
        Some(Commands::Serve { host, port }) => serve(host, port).await,
        Some(Commands::Worker) => worker().await,
        Some(Commands::Tools) => {
            for tool in catalog() {
                println!("{:<26} {}", tool.name, tool.description);
            }
            Ok(())
        }
        Some(Commands::Call { tool, args }) => call(&tool, &args).await,
        Some(Commands::Config { command }) => config(command),
        None => {
            println!("contentreq - content request bridge for Azure DevOps");
            println!("Run with --help for usage information");
            Ok(())
        }
    }
}

fn load_config() -> anyhow::Result<Config> {
    let mut config = Config::load().context("Failed to load configuration")?;
    config.apply_env()?;
    Ok(config)
}

fn supervisor(config: &Config) -> anyhow::Result<Supervisor> {
    let token = Config::access_token().ok();
    if token.is_none() {
        warn!("No access token in the environment; the worker will refuse to start");
    }
    let launcher = ProcessLauncher::from_config(&config.supervisor, token)?;
    Ok(Supervisor::new(
        Arc::new(launcher),
        SupervisorSettings::from(&config.supervisor),
    ))
}

async fn serve(host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let config = load_config()?;
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);

    let supervisor = supervisor(&config)?;
    supervisor.start();

    let state = ApiState {
        invoker: Arc::new(supervisor.clone()),
        environment: EnvironmentInfo::new(&config.azure_devops, Config::access_token().is_ok()),
    };
    let listener = TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", host, port))?;

    let served = contentreq_api::serve(listener, state, shutdown_signal()).await;
    supervisor.shutdown().await;
    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

async fn worker() -> anyhow::Result<()> {
    let config = load_config()?;
    let token = Config::access_token().context("The worker needs an access token")?;
    let client = AdoClient::from_config(&config.azure_devops, &token)?;
    let handler = ToolHandler::new(
        Arc::new(client),
        HandlerSettings::from(&config.azure_devops),
    );
    McpServer::new(handler).run().await?;
    info!("Worker input closed");
    Ok(())
}

async fn call(tool: &str, args: &str) -> anyhow::Result<()> {
    let arguments: Value = serde_json::from_str(args).context("--args must be valid JSON")?;
    if !arguments.is_object() {
        bail!("--args must be a JSON object");
    }

    let config = load_config()?;
    let supervisor = supervisor(&config)?;
    let outcome = supervisor.call_tool(tool, arguments).await;
    supervisor.shutdown().await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result.payload())?);
    if result.is_error() {
        bail!("{} reported an error", tool);
    }
    Ok(())
}

fn config(command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = Config::load()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Get { key } => match Config::load()?.get(&key)? {
            Some(value) => println!("{}", value),
            None => println!("(not set)"),
        },
        ConfigCommands::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            info!(key = %key, "Configuration updated");
        }
        ConfigCommands::Path => println!("{}", Config::config_path()?.display()),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
