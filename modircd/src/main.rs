use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use modircd_core::{builtin_modules, register_core_commands, ServerRegistry, ServerState};
use modircd_server::{run_server, SessionConfig, TCPListener};

mod config;

use crate::config::Config;

/// IRC server whose features come from loadable modules
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = "modircd.yml")]
    config: PathBuf,

    /// overrides the port of the configuration file
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(path: &std::path::Path) -> anyhow::Result<Config> {
    if !path.exists() {
        log::warn!("{path:?} not found, starting with the default configuration");
        return Ok(Config::default());
    }
    Config::load_from_path(path)
}

async fn serve(
    listener: TCPListener,
    registry: ServerRegistry,
    server_state: ServerState,
    session_config: SessionConfig,
) -> anyhow::Result<()> {
    run_server(listener, registry, server_state, session_config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let registry = ServerRegistry::new(builtin_modules());
    register_core_commands(&registry).context("registering the core commands")?;
    for name in &config.modules {
        registry
            .load_module_by_name(name)
            .with_context(|| format!("loading module {name}"))?;
    }
    log::info!(
        "available modules: {}",
        registry.available_modules().join(", ")
    );

    let server_state = ServerState::new(config.server_config());
    let listener = TCPListener::try_new(&config.address, config.port)?;

    tokio::select! {
        result = serve(listener, registry.clone(), server_state, config.session_config()) => {
            result?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            log::info!("shutting down");
        }
    }

    registry.unload_all();
    Ok(())
}
