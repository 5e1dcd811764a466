use anyhow::Context;
use beacon_daemon::{
    args::Args,
    assemble,
    config::{import, SqliteConfigStore},
    http, logging,
};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing(&args.log_level, args.log_json);

    let db_path = args.config_db_path();
    info!(path = %db_path.display(), "using config database");
    let store = Arc::new(
        SqliteConfigStore::open(&db_path)
            .with_context(|| format!("failed to open config database {}", db_path.display()))?,
    );

    if let Some(dir) = &args.config_dir {
        let report = import::import_dir(store.as_ref(), dir)
            .with_context(|| format!("failed to import config from {}", dir.display()))?;
        info!(
            dir = %dir.display(),
            published = report.published,
            unchanged = report.unchanged,
            "config import finished"
        );
    }

    let components = assemble(
        args.registry_config(),
        args.lease_config(),
        store,
        args.config_service_config(),
    );

    let sweeper = Arc::clone(&components.lease).spawn();
    info!(
        lease_seconds = args.lease_seconds,
        sweep_interval_seconds = args.sweep_interval_seconds,
        eviction_grace_seconds = args.eviction_grace_seconds,
        "lease sweeper started"
    );

    let app = http::router(components.state, args.request_timeout());

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    info!(addr = %args.listen, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
