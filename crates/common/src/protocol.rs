//! Wire formats exchanged with key-publishing servers.
//!
//! Auction coordinators publish JSON key sets; the join server publishes a
//! raw OHTTP key config with a dedicated media type.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Headers and media types
// ---------------------------------------------------------------------------

/// Media type of a join key fetch response.
pub const OHTTP_KEYS_CONTENT_TYPE: &str = "application/ohttp-keys";

pub const CONTENT_TYPE_HEADER: &str = "content-type";
pub const CACHE_CONTROL_HEADER: &str = "cache-control";
pub const AGE_HEADER: &str = "age";
pub const ACCEPT_HEADER: &str = "accept";

// ---------------------------------------------------------------------------
// Auction key set
// ---------------------------------------------------------------------------

/// Body of an auction key fetch response.
///
/// ```json
/// { "keys": [ { "id": "4b", "key": "QUJD" } ] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionKeySet {
    pub keys: Vec<AuctionKeyEntry>,
}

/// One published auction key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionKeyEntry {
    /// Short hex identifier; the first two characters become the OHTTP key id.
    pub id: String,
    /// Base64 public key.
    pub key: String,
}

// ---------------------------------------------------------------------------
// Raw fetch response
// ---------------------------------------------------------------------------

/// A completed key fetch: body bytes plus response headers.
///
/// Header names are stored lower-cased; a header may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub body: Bytes,
    headers: HashMap<String, Vec<String>>,
}

impl FetchResponse {
    /// Construct a response from a body and no headers.
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    /// Append a header value, normalising the name to lower case.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push_header(name, value);
        self
    }

    pub fn push_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// All values of a header, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The first value of a header, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).first().map(String::as_str)
    }
}
