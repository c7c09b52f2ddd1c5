use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use dbgp_proxy::config::{init_tracing, ProxyConfig};
use dbgp_proxy::server::ProxyServer;

#[derive(Debug, Parser)]
#[command(
    name = "dbgp-proxy",
    version,
    about = "Intercepting DBGp proxy that maps filenames between a project tree and its rewritten-code cache"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Resolves the config path from the CLI flag or `DBGP_PROXY_CONFIG`, falling
/// back to built-in defaults when neither is set or the file does not load.
fn load_config(cli_path: Option<PathBuf>) -> ProxyConfig {
    let path = cli_path.or_else(|| std::env::var_os("DBGP_PROXY_CONFIG").map(PathBuf::from));
    let Some(path) = path else {
        return ProxyConfig::default();
    };
    match ProxyConfig::load_from_path(&path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!(
                "dbgp-proxy: failed to load {}: {error}; using defaults",
                path.display()
            );
            ProxyConfig::default()
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config);
    init_tracing(&config.logging);

    let server = ProxyServer::spawn(config)
        .await
        .context("failed to start the proxy")?;
    info!(
        target: "dbgp.proxy",
        registration = %server.registration_addr(),
        debug = %server.debug_addr(),
        "dbgp proxy started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    info!(target: "dbgp.proxy", "shutting down");
    server.shutdown();
    Ok(())
}
