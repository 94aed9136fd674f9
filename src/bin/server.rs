use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay::{Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = ServerConfig::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let addr = cfg.socket_addr();
    let listener = Server::bind(addr).context("server cannot start")?;

    let server = Server::new(cfg.handshake_policy());
    tokio::select! {
        _ = server.serve(listener) => {}
        res = tokio::signal::ctrl_c() => {
            res.context("waiting for ctrl-c")?;
            info!("shutting down");
        }
    }
    Ok(())
}
