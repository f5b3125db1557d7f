//! Runs untrusted code submissions in disposable containers behind an HTTP API.

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use runbox_core::{
    sink_from_config, ConfigLoader, DockerRuntime, ExecutionEngine, TemplateRegistry,
};
use runbox_server::{shutdown_signal, RunboxServer};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Runbox Server - sandboxed code execution over HTTP")]
struct Cli {
    #[clap(
        long,
        short,
        default_value = "runbox.yaml",
        help = "Configuration file (defaults apply when it does not exist)"
    )]
    config: String,

    #[clap(long, help = "Override the configured bind address")]
    bind_addr: Option<String>,

    #[clap(long, short, help = "Override the configured log level")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::from_file_or_default(&cli.config).await?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(addr) = cli.bind_addr {
        config.server.bind_addr = addr;
    }

    let log_level_filter = config.logging.level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();
    log::info!("Configuration loaded from {}", cli.config);

    let runtime = DockerRuntime::connect()?;
    if !runtime.is_available().await {
        log::warn!("Docker daemon is not answering; executions will fail until it is");
    }

    let registry = TemplateRegistry::from_config(&config.languages);
    log::info!("Registered languages: {}", registry.languages().join(", "));

    let engine = ExecutionEngine::new(Arc::new(runtime), Arc::new(registry), config.engine);
    let sink = sink_from_config(&config.sink)?;

    RunboxServer::new(engine, sink, config.server)
        .serve_with_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
