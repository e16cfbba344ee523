//! Seam to the HPKE-based OHTTP implementation.
//!
//! The cipher suite lives outside this crate; [`ObliviousHttpClient`] is the
//! capability the encryptor needs from it.

use thiserror::Error;

use super::KeyConfig;

/// Labels bound into the HPKE context of a request and its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// `message/bhttp request` / `message/bhttp response`.
    Bhttp,
    /// `message/auction request` / `message/auction response`.
    Auction,
}

impl MediaType {
    pub fn request_label(self) -> &'static str {
        match self {
            MediaType::Bhttp => "message/bhttp request",
            MediaType::Auction => "message/auction request",
        }
    }

    pub fn response_label(self) -> &'static str {
        match self {
            MediaType::Bhttp => "message/bhttp response",
            MediaType::Auction => "message/auction response",
        }
    }
}

/// State the client hands back with a sealed request; required to open the
/// matching response.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestSecrets {
    pub encapsulated_shared_secret: Vec<u8>,
    pub seed: Vec<u8>,
}

impl std::fmt::Debug for RequestSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RequestSecrets([REDACTED])")
    }
}

/// A sealed request ready for the wire.
#[derive(Debug, Clone)]
pub struct EncapsulatedRequest {
    pub ciphertext: Vec<u8>,
    pub secrets: RequestSecrets,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OhttpError {
    #[error("failed to seal request: {0}")]
    Seal(String),

    #[error("failed to open response: {0}")]
    Open(String),
}

/// HPKE sealing of requests and opening of responses.
pub trait ObliviousHttpClient: Send + Sync {
    fn encrypt_request(
        &self,
        config: &KeyConfig,
        plaintext: &[u8],
        media_type: MediaType,
    ) -> Result<EncapsulatedRequest, OhttpError>;

    fn decrypt_response(
        &self,
        config: &KeyConfig,
        ciphertext: &[u8],
        secrets: &RequestSecrets,
        media_type: MediaType,
    ) -> Result<Vec<u8>, OhttpError>;
}
