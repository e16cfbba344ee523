//! Common error types shared across crates.

use std::time::Duration;

use thiserror::Error;

use crate::model::KeyType;

/// Top-level error type for key lookup, fetch, and OHTTP operations.
///
/// Each variant maps to a short machine-readable code (see [`KeyError::code`])
/// so callers can branch on the failure class without inspecting messages:
/// - [`KeyError::NoKeyAvailable`] → `no_key_available`
/// - [`KeyError::FetchFailed`] → `fetch_failed`
/// - [`KeyError::InvalidKeyFormat`] → `invalid_key_format`
/// - [`KeyError::ContextNotFound`] → `context_not_found`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Neither an allow-listed coordinator nor a default URI is configured for the type.
    #[error("no key fetch URI configured for {0} keys")]
    NoFetchUriConfigured(KeyType),

    /// No valid key is cached and none could be fetched.
    #[error("no {key_type} key available: {reason}")]
    NoKeyAvailable { key_type: KeyType, reason: String },

    /// The network fetch failed (connection error, non-2xx status, oversized body).
    #[error("key fetch failed: {0}")]
    FetchFailed(String),

    /// The server response could not be parsed into keys.
    #[error("malformed key fetch response: {0}")]
    MalformedResponse(String),

    /// Stored key material cannot be turned into a usable OHTTP key config.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The operation did not complete within the caller-supplied timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// No request context was ever persisted under this id.
    #[error("no request context found for id {0}")]
    ContextNotFound(i64),

    /// The OHTTP client failed to build the encrypted request.
    #[error("encryption failure: {0}")]
    EncryptionFailed(String),

    /// The OHTTP client failed to decrypt the response.
    #[error("decryption failure: {0}")]
    DecryptionFailed(String),

    /// The backing store failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A key type code of zero (unassigned) or an unknown code was decoded.
    #[error("unassigned or unknown key type code {0}")]
    UnassignedKeyType(i32),
}

impl KeyError {
    /// Returns the machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            KeyError::NoFetchUriConfigured(_) => "no_fetch_uri_configured",
            KeyError::NoKeyAvailable { .. } => "no_key_available",
            KeyError::FetchFailed(_) => "fetch_failed",
            KeyError::MalformedResponse(_) => "malformed_response",
            KeyError::InvalidKeyFormat(_) => "invalid_key_format",
            KeyError::Timeout(_) => "timeout",
            KeyError::ContextNotFound(_) => "context_not_found",
            KeyError::EncryptionFailed(_) => "encryption_failed",
            KeyError::DecryptionFailed(_) => "decryption_failed",
            KeyError::Storage(_) => "storage",
            KeyError::UnassignedKeyType(_) => "unassigned_key_type",
        }
    }

    /// Returns `true` for failures a later attempt may not hit again
    /// (network trouble, timeouts, empty fetch results).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            KeyError::FetchFailed(_)
                | KeyError::Timeout(_)
                | KeyError::NoKeyAvailable { .. }
                | KeyError::MalformedResponse(_)
        )
    }
}
