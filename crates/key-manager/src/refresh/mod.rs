//! Proactive background key refresh.
//!
//! # Pass
//!
//! 1. Ask the manager which key types are absent or expire by `now` (or by
//!    `now + fetch_in_advance` when fetching in advance).
//! 2. Drop types whose refresh switch is off.
//! 3. Fetch each remaining type from each of its coordinators, one target at
//!    a time, checking for cancellation between targets.
//! 4. Report the outcome to the status sink.
//!
//! The whole pass is bounded by `max_runtime`. Failures never reach
//! foreground lookups; the next scheduled pass is the retry.

pub mod scheduling;
pub mod worker;

pub use scheduling::refresh_task;
pub use worker::{BackgroundRefresher, RefreshFuture};

use std::time::Duration;

use common::KeyType;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSettings {
    /// Master switch; when off every pass is a logged no-op.
    pub enabled: bool,
    pub auction_enabled: bool,
    pub join_enabled: bool,
    pub max_runtime: Duration,
    /// Timeout applied to each individual fetch.
    pub fetch_timeout: Duration,
    /// Also refresh keys expiring within this window.
    pub fetch_in_advance: Option<Duration>,
    pub multi_coordinator_enabled: bool,
    pub coordinator_allowlist: Vec<String>,
}

impl RefreshSettings {
    pub fn type_enabled(&self, key_type: KeyType) -> bool {
        match key_type {
            KeyType::Auction => self.auction_enabled,
            KeyType::Join => self.join_enabled,
        }
    }

    /// Coordinators a pass fetches `key_type` from; `None` is the default URI.
    pub fn coordinators(&self, key_type: KeyType) -> Vec<Option<String>> {
        if self.multi_coordinator_enabled
            && key_type == KeyType::Auction
            && !self.coordinator_allowlist.is_empty()
        {
            self.coordinator_allowlist.iter().cloned().map(Some).collect()
        } else {
            vec![None]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    /// Every target was fetched.
    Success,
    /// Refresh disabled, or nothing was absent or expiring.
    NoOp,
    Failure,
}

/// Outcome of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub status: RefreshStatus,
    /// Auction key URLs fetched (attempted) during the pass.
    pub auction_urls: usize,
    pub join_urls: usize,
    pub keys_fetched: usize,
    pub elapsed: Duration,
}

/// Why a pass failed. Cloneable so it can be shared by every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("refresh pass exceeded {0:?}")]
    Timeout(Duration),

    #[error("refresh pass cancelled")]
    Cancelled,

    /// The key types to refresh could not be determined.
    #[error("failed to list expiring key types: {0}")]
    KeyTypes(String),

    #[error("{failed} key fetch(es) failed; first error: {first}")]
    Fetch { failed: usize, first: String },

    /// The pass task panicked or was aborted.
    #[error("refresh task aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RefreshSettings {
        RefreshSettings {
            enabled: true,
            auction_enabled: true,
            join_enabled: false,
            max_runtime: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(5),
            fetch_in_advance: None,
            multi_coordinator_enabled: true,
            coordinator_allowlist: vec!["https://a.test/keys".into(), "https://b.test/keys".into()],
        }
    }

    #[test]
    fn auction_fans_out_over_allowlist() {
        let s = settings();
        assert_eq!(
            s.coordinators(KeyType::Auction),
            vec![
                Some("https://a.test/keys".to_string()),
                Some("https://b.test/keys".to_string())
            ]
        );
        assert_eq!(s.coordinators(KeyType::Join), vec![None]);
    }

    #[test]
    fn single_coordinator_uses_default() {
        let mut s = settings();
        s.multi_coordinator_enabled = false;
        assert_eq!(s.coordinators(KeyType::Auction), vec![None]);
    }

    #[test]
    fn per_type_switches() {
        let s = settings();
        assert!(s.type_enabled(KeyType::Auction));
        assert!(!s.type_enabled(KeyType::Join));
    }
}
