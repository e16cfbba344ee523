//! `key-manager`: standalone key refresh daemon.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (OTEL + tracing).
//! 3. Open the redb key store.
//! 4. Build the HTTPS fetcher, parser registry, and [`EncryptionKeyManager`].
//! 5. Run a startup refresh pass to warm the store.
//! 6. Spawn the periodic refresh task.
//! 7. Wait for Ctrl-C, then stop the refresh task and flush telemetry.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use key_manager::clock::SystemClock;
use key_manager::config::Config;
use key_manager::fetch::HttpsKeyFetcher;
use key_manager::metrics::OtelStatusSink;
use key_manager::parser::ParserRegistry;
use key_manager::refresh::{self, BackgroundRefresher};
use key_manager::store::RedbStore;
use key_manager::EncryptionKeyManager;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    let telemetry = key_manager::telemetry::init_telemetry(
        cfg.otel_exporter_otlp_endpoint.as_deref(),
        &cfg.log_level,
    )?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        multi_coordinator = cfg.multi_coordinator_enabled,
        store = %cfg.store_path.display(),
        "key-manager starting"
    );

    // -----------------------------------------------------------------------
    // 3. Store
    // -----------------------------------------------------------------------
    let store = Arc::new(RedbStore::open(&cfg.store_path).context("failed to open key store")?);

    // -----------------------------------------------------------------------
    // 4. Manager
    // -----------------------------------------------------------------------
    let key_max_age = chrono::Duration::from_std(cfg.key_max_age())
        .context("ENCRYPTION_KEY_MAX_AGE_SECS is out of range")?;
    let fetcher = HttpsKeyFetcher::new(cfg.key_fetch_max_response_bytes)
        .context("failed to build HTTPS key fetcher")?;
    let clock = Arc::new(SystemClock);
    let status = Arc::new(OtelStatusSink::new());

    let manager = Arc::new(EncryptionKeyManager::new(
        cfg.manager_settings(),
        ParserRegistry::new(key_max_age),
        store,
        Arc::new(fetcher),
        clock.clone(),
        status.clone(),
    ));

    // -----------------------------------------------------------------------
    // 5. Startup refresh
    // -----------------------------------------------------------------------
    let refresher = BackgroundRefresher::new(manager, cfg.refresh_settings(), clock, status);
    if let Err(e) = refresher.run().await {
        warn!(error = %e, "startup key refresh failed; continuing with stored keys");
    }

    // -----------------------------------------------------------------------
    // 6. Background tasks
    // -----------------------------------------------------------------------
    let shutdown = CancellationToken::new();
    let refresh_handle =
        refresh::refresh_task(refresher.clone(), cfg.refresh_interval(), shutdown.clone());

    // -----------------------------------------------------------------------
    // 7. Shutdown
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    shutdown.cancel();
    if let Err(e) = refresh_handle.await {
        warn!(error = %e, "refresh task ended abnormally");
    }

    telemetry.shutdown();
    Ok(())
}
