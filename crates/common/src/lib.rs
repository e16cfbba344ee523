//! Key model, wire formats, and errors shared across the OHTTP key manager crates.

pub mod error;
pub mod model;
pub mod protocol;

pub use error::KeyError;
pub use model::{EncryptionKey, KeyType, RequestContext, StoredKey};
