//! Checkup launcher
//!
//! Runs one checkup described by a ConfigMap record: provisions its
//! workspace, runs the checkup Job, tears everything down and writes the
//! outcome back into the record. The exit code is non-zero whenever any
//! step failed.

use anyhow::{Context, Result};
use checkup_lib::{
    shutdown_channel, Checkup, ConfigLoader, KubeStore, Launcher, RecordReporter, ResourceStore,
    ShutdownTrigger, StructuredLogger, WorkspaceNames,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const LAUNCHER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fire `trigger` on SIGINT or SIGTERM
async fn forward_signals(trigger: ShutdownTrigger, logger: StructuredLogger) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let reason = tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT received",
        _ = terminate => "SIGTERM received",
    };
    logger.log_shutdown(reason);
    trigger.fire();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let settings = config::LauncherSettings::load()?;
    let record = settings.record_key();

    let logger = StructuredLogger::new(record.to_string());
    logger.log_startup(LAUNCHER_VERSION);

    let store: Arc<dyn ResourceStore> = Arc::new(
        KubeStore::try_default()
            .await
            .context("failed to connect to the cluster")?,
    );

    let loaded = match ConfigLoader::new(store.clone()).load(&record).await {
        Ok(loaded) => loaded,
        Err(e) => {
            logger.log_config_rejected(&e.to_string());
            return Err(e).context("failed to load checkup configuration");
        }
    };
    logger.log_config_loaded(&loaded.spec);

    // Shutdown only interrupts the wait for the Job; teardown always runs
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(forward_signals(trigger, logger.clone()));

    let checkup = Checkup::new(
        store.clone(),
        loaded,
        WorkspaceNames::default(),
        settings.checkup_settings(),
    )
    .with_shutdown(shutdown);
    let reporter = RecordReporter::new(store, record);

    let mut launcher = Launcher::new(checkup, reporter).with_logger(logger);
    launcher.run().await.context("checkup failed")?;

    info!("Checkup launcher finished");
    Ok(())
}
