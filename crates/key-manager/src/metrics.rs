//! Status reporting for key fetches and background refresh passes.
//!
//! Sinks are fire-and-forget: they never block the caller and never fail.
//! Attributes carry key types, sources, and outcomes only. Key material and
//! coordinator URLs are never recorded.

use std::time::Duration;

use common::KeyType;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};

use crate::refresh::{RefreshReport, RefreshStatus};

const METER_NAME: &str = "ohttp-key-manager";

/// What triggered a key fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    /// A caller needed a key and none was cached.
    OnDemand,
    /// The background refresh.
    Background,
}

impl FetchSource {
    fn as_str(self) -> &'static str {
        match self {
            FetchSource::OnDemand => "on_demand",
            FetchSource::Background => "background",
        }
    }
}

/// Where the fetch URI came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorSource {
    Default,
    AllowList,
}

impl CoordinatorSource {
    fn as_str(self) -> &'static str {
        match self {
            CoordinatorSource::Default => "default",
            CoordinatorSource::AllowList => "allowlist",
        }
    }
}

/// One completed (or failed) key fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFetchEvent {
    pub key_type: KeyType,
    pub source: FetchSource,
    pub coordinator_source: CoordinatorSource,
    /// `None` on success, otherwise the error code.
    pub error_code: Option<&'static str>,
    pub keys: usize,
    pub latency: Duration,
}

pub trait StatusSink: Send + Sync {
    fn key_fetched(&self, event: &KeyFetchEvent);
    fn refresh_completed(&self, report: &RefreshReport);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatusSink;

impl StatusSink for NoopStatusSink {
    fn key_fetched(&self, _event: &KeyFetchEvent) {}
    fn refresh_completed(&self, _report: &RefreshReport) {}
}

/// Records events through the global OpenTelemetry meter provider.
#[derive(Clone)]
pub struct OtelStatusSink {
    fetches: Counter<u64>,
    fetch_latency: Histogram<f64>,
    refreshes: Counter<u64>,
    refresh_urls: Counter<u64>,
}

impl OtelStatusSink {
    pub fn new() -> Self {
        let meter = global::meter(METER_NAME);
        Self {
            fetches: meter
                .u64_counter("ohttp_key_fetch_total")
                .with_description("Key fetches by key type, source, and outcome")
                .init(),
            fetch_latency: meter
                .f64_histogram("ohttp_key_fetch_duration_seconds")
                .with_description("Key fetch latency in seconds")
                .init(),
            refreshes: meter
                .u64_counter("ohttp_key_refresh_total")
                .with_description("Background refresh passes by status")
                .init(),
            refresh_urls: meter
                .u64_counter("ohttp_key_refresh_urls_total")
                .with_description("Key URLs fetched by background refresh")
                .init(),
        }
    }
}

impl Default for OtelStatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for OtelStatusSink {
    fn key_fetched(&self, event: &KeyFetchEvent) {
        let attrs = [
            KeyValue::new("key_type", event.key_type.as_str()),
            KeyValue::new("source", event.source.as_str()),
            KeyValue::new("coordinator_source", event.coordinator_source.as_str()),
            KeyValue::new("outcome", event.error_code.unwrap_or("success")),
        ];
        self.fetches.add(1, &attrs);
        self.fetch_latency.record(event.latency.as_secs_f64(), &attrs);
    }

    fn refresh_completed(&self, report: &RefreshReport) {
        let status = match report.status {
            RefreshStatus::Success => "success",
            RefreshStatus::NoOp => "no_op",
            RefreshStatus::Failure => "failure",
        };
        self.refreshes.add(1, &[KeyValue::new("status", status)]);
        self.refresh_urls.add(
            report.auction_urls as u64,
            &[KeyValue::new("key_type", KeyType::Auction.as_str())],
        );
        self.refresh_urls.add(
            report.join_urls as u64,
            &[KeyValue::new("key_type", KeyType::Join.as_str())],
        );
    }
}
