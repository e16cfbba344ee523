//! Oblivious HTTP: key-config codec, client seam, and the request encryptor.

pub mod client;
pub mod encryptor;
pub mod key_config;

pub use client::{EncapsulatedRequest, MediaType, ObliviousHttpClient, OhttpError, RequestSecrets};
pub use encryptor::{EncryptorSettings, ObliviousHttpEncryptor};
pub use key_config::{pack_key_id, KeyConfig, KeyConfigError};
