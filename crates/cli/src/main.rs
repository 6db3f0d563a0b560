mod bridge_commands;
mod config_commands;
mod serve_commands;

use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    clap::{Parser, Subcommand},
    composer_config::{LogFormat, McpComposerConfig, discover_and_load, load_config},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "mcp-composer", about = "Compose MCP servers into one", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the config value.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (TOML, YAML or JSON). Discovered in ./ and the user config dir when unset.
    #[arg(long, short, global = true, env = "MCP_COMPOSER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose the configured servers and serve the result.
    Serve(serve_commands::ServeArgs),
    /// Compose once and print what was composed as JSON.
    Summary(serve_commands::ComposeArgs),
    /// Forward line-framed JSON-RPC on stdin/stdout to a remote HTTP endpoint.
    Bridge(bridge_commands::BridgeArgs),
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Load the explicit config file, or discover one.
pub(crate) fn load(path: Option<&Path>) -> Result<McpComposerConfig> {
    match path {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(discover_and_load()),
    }
}

/// Logs always go to stderr; stdout may be carrying JSON-RPC.
fn init_telemetry(cli: &Cli, config: &McpComposerConfig) {
    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.monitoring.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs || config.monitoring.logging.format == LogFormat::Json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the same file that is about to be composed;
    // a broken file is reported by the command itself.
    let logging_config = load(cli.config.as_deref()).unwrap_or_default();
    init_telemetry(&cli, &logging_config);

    info!(version = env!("CARGO_PKG_VERSION"), "mcp-composer starting");

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve(args) => serve_commands::handle_serve(config_path, args).await,
        Commands::Summary(args) => serve_commands::handle_summary(config_path, args).await,
        Commands::Bridge(args) => bridge_commands::handle_bridge(args).await,
        Commands::Config { action } => config_commands::handle_config(action, config_path),
    }
}
