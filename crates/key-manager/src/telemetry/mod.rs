//! OpenTelemetry setup: structured JSON logs, plus traces and metrics over
//! OTLP when an endpoint is configured.
//!
//! # Telemetry invariants
//!
//! - **No key material, plaintext, or request secrets** in any span
//!   attribute, metric label, or log field.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`).

pub mod init;

pub use init::{init_telemetry, TelemetryGuard};
