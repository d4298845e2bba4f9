use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use db_exporter::http_router::ExporterHttpRouter;
use db_exporter::options::Options;
use db_exporter::{load_catalog, DatabaseConnector, Exporter};
use database_utils::redacted::redact_target;
use query_catalog::default_catalog;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

async fn shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(error) => {
            warn!(%error, "Failed to install SIGTERM handler, only handling SIGINT");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let options = Options::parse();
    options.logging.init()?;

    let (catalog, query_files) = load_catalog(
        default_catalog(),
        options.config.as_deref(),
        options.validation_policy(),
    )
    .context("Failed to load query config")?;
    info!(
        instances = catalog.len(),
        files = query_files.len(),
        "Built metric catalog"
    );

    let config = options.exporter_config();
    info!(
        targets = ?config.targets.iter().map(|t| redact_target(t)).collect::<Vec<_>>(),
        auto_discover_databases = config.auto_discover_databases,
        "Starting exporter"
    );
    let exporter = Arc::new(Exporter::new(
        config,
        catalog,
        query_files,
        Arc::new(DatabaseConnector::new(options.tls())),
    )?);

    let router = ExporterHttpRouter {
        listen_addr: options.listen_address,
        telemetry_path: options.telemetry_path.clone(),
        exporter: Arc::clone(&exporter),
    };
    let served = router.route_requests(shutdown_signal()).await;

    exporter.close().await;
    info!("Exporter stopped");
    served
}
