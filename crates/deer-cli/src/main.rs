//! # deer-cli
//!
//! Command-line interface for Deer.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use deer_core::Config;
use deer_mcp::{ClientOptions, ServerRegistry};

mod commands;

/// Application context containing shared state.
pub struct AppContext {
    pub config: Config,
    pub registry: Arc<ServerRegistry>,
}

/// Deer - talk to MCP tool servers from the command line
#[derive(Parser)]
#[command(name = "deer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read configuration from this file instead of the default locations
    #[arg(short, long, global = true, value_name = "PATH", env = "DEER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// MCP server management
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Check the configuration for errors and warnings
    Validate,
}

#[derive(Subcommand)]
enum McpAction {
    /// List configured MCP servers
    List,
    /// Connect to every enabled server and report its state
    Status,
    /// List the tools of every enabled server
    Tools,
    /// Call one tool on one server
    Call {
        /// Server name
        server: String,
        /// Tool name as reported by the server
        tool: String,
        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Commands::Version = cli.command {
        println!("deer {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration
    let config = match &cli.config {
        Some(path) => {
            Config::load_from_file(path).map_err(|e| deer_core::Error::Config(e.to_string()))?
        }
        None => Config::load().unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }),
    };

    // Servers are only started from a configuration without errors
    let config = match &cli.command {
        Commands::Mcp { .. } => config.into_validated()?,
        _ => config,
    };

    let registry = deer_mcp::init_global_registry(ClientOptions::from_config(&config));
    let ctx = AppContext { config, registry };

    let result = match cli.command {
        Commands::Config { action } => commands::config::handle(action, &ctx).await,
        Commands::Mcp { action } => commands::mcp::handle(action, &ctx).await,
        Commands::Version => Ok(()),
    };

    // Child processes must not outlive the command
    ctx.registry.disconnect_all().await;

    if let Err(e) = &result {
        if let Some(suggestion) = e
            .downcast_ref::<deer_core::Error>()
            .and_then(deer_core::Error::recovery_suggestion)
        {
            eprintln!("  Suggestion: {}", suggestion);
        }
    }
    result
}
