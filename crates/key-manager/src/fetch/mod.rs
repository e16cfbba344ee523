//! Network retrieval of published keys.
//!
//! The manager only depends on the [`KeyFetcher`] trait; [`HttpsKeyFetcher`]
//! is the production implementation on hyper + rustls. Timeouts are applied by
//! the caller around the returned future.

pub mod https;

pub use https::HttpsKeyFetcher;

use async_trait::async_trait;
use common::protocol::FetchResponse;
use common::KeyError;
use thiserror::Error;

/// Errors produced by the fetch layer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetch URI could not be parsed.
    #[error("invalid fetch URI {0}")]
    InvalidUri(String),

    /// The TLS connector could not be built.
    #[error("tls setup failed: {0}")]
    Tls(String),

    /// Connecting or sending the request failed.
    #[error("request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("server returned HTTP {0}")]
    Status(u16),

    /// The response body exceeded the configured limit.
    #[error("response body exceeds {0} bytes")]
    BodyTooLarge(usize),

    /// Reading the response body failed.
    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<FetchError> for KeyError {
    fn from(e: FetchError) -> Self {
        KeyError::FetchFailed(e.to_string())
    }
}

/// A GET request for a key endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub uri: String,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Retrieves the raw body and headers served at a key endpoint.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
