//! [`HttpsKeyFetcher`]: hyper client with a rustls connector.

use async_trait::async_trait;
use bytes::Bytes;
use common::protocol::FetchResponse;
use http_body_util::{BodyExt, Empty, LengthLimitError, Limited};
use hyper::{Method, Request, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use super::{FetchError, FetchRequest, KeyFetcher};

type HttpsClient = Client<HttpsConnector<HttpConnector>, Empty<Bytes>>;

/// Fetches key endpoints over HTTPS (plain HTTP is accepted for local endpoints).
///
/// Bodies larger than `max_response_bytes` are rejected rather than truncated.
#[derive(Clone)]
pub struct HttpsKeyFetcher {
    client: HttpsClient,
    max_response_bytes: usize,
}

impl HttpsKeyFetcher {
    /// Build a fetcher trusting the webpki root set.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Tls`] if the rustls provider rejects its defaults.
    pub fn new(max_response_bytes: usize) -> Result<Self, FetchError> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(rustls::crypto::ring::default_provider())
            .map_err(|e| FetchError::Tls(e.to_string()))?
            .https_or_http()
            .enable_http1()
            .build();

        let client = Client::builder(TokioExecutor::new()).build(https);
        Ok(Self {
            client,
            max_response_bytes,
        })
    }
}

#[async_trait]
impl KeyFetcher for HttpsKeyFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let uri: Uri = request
            .uri
            .parse()
            .map_err(|_| FetchError::InvalidUri(request.uri.clone()))?;

        let mut builder = Request::builder().method(Method::GET).uri(uri);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let req = builder
            .body(Empty::<Bytes>::new())
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let mut out = FetchResponse::default();
        for (name, value) in resp.headers() {
            // Non-visible-ASCII header values are never key metadata.
            if let Ok(v) = value.to_str() {
                out.push_header(name.as_str(), v);
            }
        }

        let limit = self.max_response_bytes;
        out.body = Limited::new(resp.into_body(), limit)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    FetchError::BodyTooLarge(limit)
                } else {
                    FetchError::Body(e.to_string())
                }
            })?
            .to_bytes();

        debug!(uri = %request.uri, bytes = out.body.len(), "key endpoint fetched");
        Ok(out)
    }
}
