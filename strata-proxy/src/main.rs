//! Strata proxy binary.
//!
//! Loads the configuration, starts one forwarding worker per backend and
//! serves the InfluxDB-compatible HTTP surface until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use strata_proxy::config::{self, ProxyConfig};
use strata_proxy::{server, tls, HttpTransport, Proxy};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "strata-proxy", version, rename_all = "kebab-case")]
struct Args {
    #[arg(
        long,
        short,
        default_value = "./config.yaml",
        help = "Specify the config file path to use"
    )]
    config: PathBuf,
    #[arg(long, default_value = "info", help = "Log filter used when RUST_LOG is unset")]
    log_level: String,
}

/// The primary entrypoint for the Strata proxy.
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config: ProxyConfig = config::load(&args.config)?;
    let tls_acceptor = config
        .tls
        .as_ref()
        .map(tls::acceptor)
        .transpose()
        .context("loading TLS material")?;
    let proxy = Arc::new(
        Proxy::new(&config, Arc::new(HttpTransport::new())).context("invalid configuration")?,
    );

    let address = config.listen_address()?;
    let listener = TcpListener::bind(address)
        .await
        .with_context(|| format!("cannot bind {address}"))?;

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(server::start_server(
        listener,
        Arc::clone(&proxy),
        tls_acceptor,
        shutdown.clone(),
    ));

    wait_for_signal().await?;
    info!("Shutting down InfluxDB proxy");
    shutdown.cancel();
    server.await??;

    proxy.shutdown(config.shutdown_timeout).await;
    info!("InfluxDB proxy stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
