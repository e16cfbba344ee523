//! [`BackgroundRefresher`]: single-flight, cancellable refresh passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwapOption;
use common::KeyType;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{RefreshError, RefreshReport, RefreshSettings, RefreshStatus};
use crate::clock::Clock;
use crate::manager::KeyManager;
use crate::metrics::StatusSink;

/// Completion of one pass, shared by every caller that asked for it.
pub type RefreshFuture = Shared<BoxFuture<'static, Result<RefreshReport, RefreshError>>>;

struct InFlight {
    token: CancellationToken,
    finished: Arc<AtomicBool>,
    result: RefreshFuture,
}

struct Inner {
    manager: Arc<dyn KeyManager>,
    settings: RefreshSettings,
    clock: Arc<dyn Clock>,
    status: Arc<dyn StatusSink>,
    slot: Mutex<Option<InFlight>>,
    last_report: ArcSwapOption<RefreshReport>,
}

/// Runs refresh passes on the Tokio runtime, at most one at a time.
///
/// Cloning shares the task slot.
#[derive(Clone)]
pub struct BackgroundRefresher {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Tally {
    auction_urls: usize,
    join_urls: usize,
    keys_fetched: usize,
    failed: usize,
    first_error: Option<String>,
}

impl BackgroundRefresher {
    pub fn new(
        manager: Arc<dyn KeyManager>,
        settings: RefreshSettings,
        clock: Arc<dyn Clock>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                manager,
                settings,
                clock,
                status,
                slot: Mutex::new(None),
                last_report: ArcSwapOption::empty(),
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.inner.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a pass, or attach to the one already running.
    ///
    /// The pass runs on a spawned task, so dropping the returned future does
    /// not cancel it. Must be called within a Tokio runtime.
    pub fn run(&self) -> RefreshFuture {
        let mut slot = self.slot();
        if let Some(in_flight) = slot.as_ref() {
            if !in_flight.finished.load(Ordering::Acquire) {
                return in_flight.result.clone();
            }
        }

        let token = CancellationToken::new();
        let finished = Arc::new(AtomicBool::new(false));
        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let task_finished = Arc::clone(&finished);
        let handle = tokio::spawn(async move {
            let result = inner.pass(&task_token).await;
            task_finished.store(true, Ordering::Release);
            result
        });

        let result: RefreshFuture = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())))
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            token,
            finished,
            result: result.clone(),
        });
        result
    }

    /// Cancel the running pass, if any, and wait for it to unwind.
    ///
    /// The pass stays in the slot until it finishes, so a [`run`](Self::run)
    /// issued meanwhile attaches to it instead of starting a second one.
    pub async fn stop(&self) {
        let pending = self.slot().as_ref().map(|in_flight| {
            in_flight.token.cancel();
            in_flight.result.clone()
        });
        if let Some(result) = pending {
            if let Err(e) = result.await {
                info!(error = %e, "refresh pass stopped");
            }
        }
    }

    /// Report of the most recently completed pass.
    pub fn last_report(&self) -> Option<Arc<RefreshReport>> {
        self.inner.last_report.load_full()
    }
}

impl Inner {
    async fn pass(&self, token: &CancellationToken) -> Result<RefreshReport, RefreshError> {
        let started = Instant::now();
        let mut tally = Tally::default();

        let outcome = if self.settings.enabled {
            tokio::time::timeout(self.settings.max_runtime, self.fetch_all(token, &mut tally))
                .await
                .unwrap_or(Err(RefreshError::Timeout(self.settings.max_runtime)))
        } else {
            info!("background key refresh disabled; skipping pass");
            Ok(false)
        };

        let outcome = outcome.and_then(|fetched_any| match tally.first_error.take() {
            Some(first) => Err(RefreshError::Fetch {
                failed: tally.failed,
                first,
            }),
            None => Ok(fetched_any),
        });

        let status = match &outcome {
            Ok(true) => RefreshStatus::Success,
            Ok(false) => RefreshStatus::NoOp,
            Err(_) => RefreshStatus::Failure,
        };
        let report = RefreshReport {
            status,
            auction_urls: tally.auction_urls,
            join_urls: tally.join_urls,
            keys_fetched: tally.keys_fetched,
            elapsed: started.elapsed(),
        };

        self.status.refresh_completed(&report);
        self.last_report.store(Some(Arc::new(report.clone())));

        match outcome {
            Ok(_) => {
                info!(
                    status = ?report.status,
                    auction_urls = report.auction_urls,
                    join_urls = report.join_urls,
                    keys = report.keys_fetched,
                    "background key refresh finished"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    auction_urls = report.auction_urls,
                    join_urls = report.join_urls,
                    "background key refresh failed"
                );
                Err(e)
            }
        }
    }

    /// Returns whether anything needed fetching.
    async fn fetch_all(
        &self,
        token: &CancellationToken,
        tally: &mut Tally,
    ) -> Result<bool, RefreshError> {
        let now = self.clock.now();
        let as_of = match self.settings.fetch_in_advance {
            Some(window) => {
                now + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
            }
            None => now,
        };

        let types: Vec<KeyType> = self
            .manager
            .absent_or_expiring_key_types(as_of)
            .await
            .map_err(|e| RefreshError::KeyTypes(e.to_string()))?
            .into_iter()
            .filter(|kt| self.settings.type_enabled(*kt))
            .collect();

        if types.is_empty() {
            info!("no absent or expiring keys to refresh");
            return Ok(false);
        }

        for key_type in types {
            for coordinator in self.settings.coordinators(key_type) {
                if token.is_cancelled() {
                    return Err(RefreshError::Cancelled);
                }
                match key_type {
                    KeyType::Auction => tally.auction_urls += 1,
                    KeyType::Join => tally.join_urls += 1,
                }
                match self
                    .manager
                    .fetch_and_persist(key_type, coordinator.as_deref(), now, self.settings.fetch_timeout)
                    .await
                {
                    Ok(keys) => tally.keys_fetched += keys.len(),
                    Err(e) => {
                        warn!(
                            key_type = %key_type,
                            transient = e.is_transient(),
                            error = %e,
                            "background key fetch failed"
                        );
                        tally.failed += 1;
                        tally.first_error.get_or_insert_with(|| e.to_string());
                    }
                }
            }
        }
        Ok(true)
    }
}
