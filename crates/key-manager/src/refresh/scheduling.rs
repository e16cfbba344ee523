//! Periodic scheduling of refresh passes.

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::BackgroundRefresher;

/// Spawn a task that runs a refresh pass every `interval` until `shutdown`
/// is cancelled, then stops any pass still in flight.
///
/// The first pass fires after one full interval; the startup pass is
/// assumed to have run already. Pass failures are logged by the refresher
/// and the loop carries on.
pub fn refresh_task(
    refresher: BackgroundRefresher,
    interval: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // First tick fires immediately; skip it so we don't double-fetch.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("scheduled key refresh starting");
                    let pass = refresher.run();
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = pass => {}
                    }
                }
            }
        }
        refresher.stop().await;
        info!("key refresh task stopped");
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use common::{KeyError, KeyType, StoredKey};

    use super::*;
    use crate::clock::SystemClock;
    use crate::manager::KeyManager;
    use crate::metrics::NoopStatusSink;
    use crate::ohttp::KeyConfig;
    use crate::refresh::RefreshSettings;

    #[derive(Default)]
    struct PassCounter {
        passes: AtomicUsize,
    }

    #[async_trait]
    impl KeyManager for PassCounter {
        async fn get_active_key(
            &self,
            key_type: KeyType,
            _coordinator_url: Option<&str>,
            _timeout: Duration,
        ) -> Result<KeyConfig, KeyError> {
            Err(KeyError::NoFetchUriConfigured(key_type))
        }

        async fn get_latest_key(
            &self,
            key_type: KeyType,
            _coordinator_url: Option<&str>,
            _timeout: Duration,
        ) -> Result<KeyConfig, KeyError> {
            Err(KeyError::NoFetchUriConfigured(key_type))
        }

        async fn fetch_and_persist(
            &self,
            _key_type: KeyType,
            _coordinator_url: Option<&str>,
            _expiry_reference: DateTime<Utc>,
            _timeout: Duration,
        ) -> Result<Vec<StoredKey>, KeyError> {
            Ok(Vec::new())
        }

        async fn absent_or_expiring_key_types(
            &self,
            _as_of: DateTime<Utc>,
        ) -> Result<BTreeSet<KeyType>, KeyError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(BTreeSet::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let manager = Arc::new(PassCounter::default());
        let refresher = BackgroundRefresher::new(
            manager.clone(),
            RefreshSettings {
                enabled: true,
                auction_enabled: true,
                join_enabled: true,
                max_runtime: Duration::from_secs(1),
                fetch_timeout: Duration::from_secs(1),
                fetch_in_advance: None,
                multi_coordinator_enabled: false,
                coordinator_allowlist: Vec::new(),
            },
            Arc::new(SystemClock),
            Arc::new(NoopStatusSink),
        );
        let shutdown = CancellationToken::new();
        let handle = refresh_task(refresher, Duration::from_secs(60), shutdown.clone());

        time::sleep(Duration::from_secs(150)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(manager.passes.load(Ordering::SeqCst), 2);
    }
}
