//! Rates service binary: REST ingress and binary RPC on separate ports, with
//! the harvester running in the background.

use std::net::SocketAddr;

use anyhow::Context;
use cantor_rates::{api, config::AppConfig, metrics::Metrics, stream, Services};
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cantor_rates=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env().context("reading configuration")?;
    let metrics = Metrics::init(cfg.read.cache_ttl.as_secs()).context("installing metrics")?;
    let services = Services::from_config(&cfg).await?;

    if cfg.harvest_enabled {
        services.harvester(cfg.harvest.clone()).spawn();
    } else {
        tracing::info!("harvester disabled");
    }

    let rest = api::router(services.app_state()).merge(metrics.router());
    let rpc = stream::router(services.rpc_state());

    let rest_addr = SocketAddr::from(([0, 0, 0, 0], cfg.rest_port));
    let rpc_addr = SocketAddr::from(([0, 0, 0, 0], cfg.rpc_port));
    let rest_listener = TcpListener::bind(rest_addr)
        .await
        .with_context(|| format!("binding REST port {rest_addr}"))?;
    let rpc_listener = TcpListener::bind(rpc_addr)
        .await
        .with_context(|| format!("binding RPC port {rpc_addr}"))?;
    tracing::info!(%rest_addr, %rpc_addr, "listening");

    let rest_server = axum::serve(rest_listener, rest).with_graceful_shutdown(shutdown_signal());
    let rpc_server = axum::serve(rpc_listener, rpc).with_graceful_shutdown(shutdown_signal());
    let (rest_res, rpc_res) = tokio::join!(rest_server, rpc_server);
    rest_res.context("REST server")?;
    rpc_res.context("RPC server")?;
    Ok(())
}
