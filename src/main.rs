use anyhow::Context;
use axum::Router;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};
mod app;
mod broker;
mod config;
mod models;
mod routes;

use broker::{amqp::AmqpSink, Publisher, QUEUES};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Load configuration
    dotenvy::dotenv().ok();
    let cfg = config::Config::from_env()?;
    info!(port = cfg.port, "Starting IoT ingest relay");

    // Broker must be reachable and queues declared before we take traffic
    let sink = AmqpSink::connect(&cfg.amqp_url, &QUEUES)
        .await
        .context("broker startup failed")?;
    let (publisher, worker) = Publisher::spawn(sink, cfg.publish_buffer);

    let app: Router = app::build_router(publisher);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    info!(%addr, "Listening on");

    let server = axum::serve(
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        error!(error = %e, "Server error");
    }

    // Router is gone, so the worker drains and hands the connection back
    match worker.await {
        Ok(sink) => {
            if let Err(e) = sink.close().await {
                error!(error = %e, "Broker close failed");
            }
        }
        Err(e) => error!(error = %e, "Publisher worker failed"),
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
