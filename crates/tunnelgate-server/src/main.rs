mod config;
mod dispatcher;
mod error;
mod head;
mod injector;
mod management;
mod response;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::ServerConfig;
use dispatcher::Dispatcher;
use tunnelgate_core::registry::ClientRegistry;

/// tunnelgate-server: reverse tunneling server exposing client-local HTTP
/// services under subdomains of an apex domain.
#[derive(Debug, Parser)]
#[command(name = "tunnelgate-server", version, about)]
struct Cli {
    /// Path to a TOML config file. Missing values fall back to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Public-facing bind address, overrides the config file.
    #[arg(long)]
    bind: Option<String>,

    /// Public-facing port, overrides the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Apex domain tunnels are served under, overrides the config file.
    #[arg(long)]
    domain: Option<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tunnelgate_server=info,tunnelgate_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = Cli::parse();
    let mut cfg = ServerConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        cfg.public_bind = bind;
    }
    if let Some(port) = cli.port {
        cfg.public_port = port;
    }
    if let Some(domain) = cli.domain {
        cfg.domain = domain;
    }

    let registry = ClientRegistry::with_idle_timeout(
        cfg.core.max_sockets,
        std::time::Duration::from_secs(cfg.core.idle_timeout_secs),
    );
    let dispatcher = Dispatcher::new(registry, cfg);

    // A fatal listener error exits the process nonzero; a supervising
    // script is expected to restart it (spec §6).
    dispatcher.serve().await?;

    Ok(())
}
