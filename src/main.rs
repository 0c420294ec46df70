/// Weather data MCP server over stdio

use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use wxready_service::config::{ServiceConfig, SourceKind};
use wxready_service::ingest::{self, retry::RetryPolicy};
use wxready_service::logging::{self, DataSource};
use wxready_service::mcp::McpServer;
use wxready_service::service::WeatherService;
use wxready_service::tools::{ToolRegistry, register_weather_tools};

#[derive(Debug, Parser)]
#[command(name = "wxready-mcp", version, about = "GHCN-Daily weather tools served over MCP stdio")]
struct Cli {
    /// TOML configuration file; defaults apply if it does not exist
    #[arg(long, env = "WXREADY_CONFIG", default_value = "wxready.toml")]
    config: PathBuf,

    /// Override the configured observation source
    #[arg(long, value_enum)]
    source: Option<SourceKind>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(source) = cli.source {
        config.source = source;
    }

    logging::init_logging(&config.logging).context("initializing logging")?;
    logging::info(
        DataSource::System,
        None,
        &format!("starting with {:?} source", config.source),
    );

    let source = ingest::connect(&config).context("connecting to observation source")?;
    let service = Arc::new(WeatherService::new(source, RetryPolicy::new(&config.retry)));

    let mut registry = ToolRegistry::new();
    register_weather_tools(&mut registry, service);

    // stdout carries protocol frames only; logs go to stderr.
    let server = McpServer::new(registry);
    server
        .serve(io::stdin().lock(), io::stdout().lock())
        .context("stdio transport failed")?;
    Ok(())
}
