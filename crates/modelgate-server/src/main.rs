//! Modelgate Server
//!
//! Gateway server binary: parses the endpoint configuration, initializes
//! tracing, and serves the gateway until interrupted.

use anyhow::Result;
use clap::Parser;
use modelgate_gateway::{Gateway, GatewayConfig};
use modelgate_transact::TransactionConfig;
use modelgate_upstream::UpstreamConfig;
use tracing::info;

#[derive(Parser)]
#[command(name = "modelgate")]
#[command(about = "Transactional gateway in front of an upstream model server", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "MODELGATE_PORT", default_value = "8082")]
    port: u16,

    /// Bind address
    #[arg(long, env = "MODELGATE_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// Upstream model server hostname
    #[arg(long, env = "MODELGATE_UPSTREAM_HOST", default_value = "localhost")]
    upstream_host: String,

    /// Upstream model server port
    #[arg(long, env = "MODELGATE_UPSTREAM_PORT", default_value = "8081")]
    upstream_port: u16,

    /// API base path shared with upstream
    #[arg(long, env = "MODELGATE_API_BASE", default_value = "/api/v2")]
    api_base: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "modelgate_server=debug,modelgate_gateway=debug,modelgate_transact=debug,\
         modelgate_upstream=debug,tower_http=debug"
    } else {
        "modelgate_server=info,modelgate_gateway=info,modelgate_transact=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let gateway_config = GatewayConfig {
        bind_addr: cli.bind,
        port: cli.port,
        api_base: cli.api_base.clone(),
    };
    let upstream_config = UpstreamConfig {
        host: cli.upstream_host,
        port: cli.upstream_port,
        base_path: cli.api_base,
        ..UpstreamConfig::default()
    };

    info!(
        listen = %gateway_config.listen_addr(),
        upstream = %upstream_config.authority(),
        "Starting modelgate"
    );

    let gateway = Gateway::new(gateway_config, upstream_config, TransactionConfig::default())?;
    gateway
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
