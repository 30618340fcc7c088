//! Copy an environment's arcology and certificates between backends.
//!
//! The source backend is configured with the usual `ARCOLOGY_*` variables,
//! the destination with the same names under `MIGRATE_TARGET_*`.

use dp_tracker::{Error, Result, TrackerConfig, build_stores, migrate_arcology};
use tracing_subscriber::EnvFilter;

async fn run() -> Result<()> {
    let source = TrackerConfig::from_env()?;
    let target =
        TrackerConfig::from_prefixed_lookup("MIGRATE_TARGET", |name| std::env::var(name).ok())?;
    if source.environment != target.environment {
        return Err(Error::UnsupportedConfiguration(format!(
            "cannot migrate {} into {}",
            source.environment, target.environment
        )));
    }

    let (source_store, source_certificates) = build_stores(&source).await?;
    let (target_store, target_certificates) = build_stores(&target).await?;

    let report = migrate_arcology(
        &source.environment,
        source_store.as_ref(),
        source_certificates.as_ref(),
        target_store.as_ref(),
        target_certificates.as_ref(),
    )
    .await?;

    tracing::info!(
        environment = %source.environment,
        instances = report.instances,
        containers = report.containers,
        certificates = report.certificates,
        "migration complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "migration failed");
        std::process::exit(1);
    }
}
