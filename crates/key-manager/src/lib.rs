//! OHTTP encryption-key lifecycle management.
//!
//! Fetches published auction and join keys, caches them in a [`store`],
//! selects among redundant keys, refreshes them in the background, and seals
//! requests whose decryption context is persisted until the response arrives.
//!
//! The HPKE cipher suite itself is supplied by the embedder through
//! [`ohttp::ObliviousHttpClient`].

pub mod clock;
pub mod config;
pub mod fetch;
pub mod manager;
pub mod metrics;
pub mod ohttp;
pub mod parser;
pub mod refresh;
pub mod store;
pub mod telemetry;

pub use manager::{EncryptionKeyManager, KeyManager, ManagerSettings};
pub use ohttp::{EncryptorSettings, KeyConfig, ObliviousHttpEncryptor};
pub use refresh::{BackgroundRefresher, RefreshReport, RefreshSettings};
