//! OHTTP key configuration encoding (RFC 9458, section 3).
//!
//! # Wire format
//!
//! ```text
//! key_id (8) | kem_id (16) | public_key (Npk * 8) |
//! symmetric_len (16) | ( kdf_id (16) | aead_id (16) ) ...
//! ```
//!
//! Only DHKEM(X25519, HKDF-SHA256) is accepted, paired with HKDF-SHA256 and
//! one of the three registered AEADs.

use thiserror::Error;

/// DHKEM(X25519, HKDF-SHA256).
pub const KEM_X25519_HKDF_SHA256: u16 = 0x0020;
pub const KDF_HKDF_SHA256: u16 = 0x0001;
pub const AEAD_AES_128_GCM: u16 = 0x0001;
pub const AEAD_AES_256_GCM: u16 = 0x0002;
pub const AEAD_CHACHA20_POLY1305: u16 = 0x0003;

/// Public key length for X25519.
pub const X25519_PUBLIC_KEY_LEN: usize = 32;

/// Errors produced while decoding or building a key config.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyConfigError {
    /// The input ended before the structure was complete.
    #[error("key config truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unsupported KEM 0x{0:04x}")]
    UnsupportedKem(u16),

    #[error("unsupported KDF 0x{0:04x}")]
    UnsupportedKdf(u16),

    #[error("unsupported AEAD 0x{0:04x}")]
    UnsupportedAead(u16),

    /// The symmetric algorithm list is empty or not a multiple of four bytes.
    #[error("invalid symmetric algorithm list length {0}")]
    InvalidSymmetricLength(usize),

    #[error("public key must be {X25519_PUBLIC_KEY_LEN} bytes, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("{0} trailing bytes after key config")]
    TrailingBytes(usize),

    /// The key identifier is not at least two hex characters.
    #[error("key identifier {0:?} does not start with two hex characters")]
    InvalidKeyIdentifier(String),
}

impl From<KeyConfigError> for common::KeyError {
    fn from(e: KeyConfigError) -> Self {
        common::KeyError::InvalidKeyFormat(e.to_string())
    }
}

/// One `(kdf, aead)` pair offered by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymmetricSuite {
    pub kdf_id: u16,
    pub aead_id: u16,
}

/// A parsed OHTTP key config.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyConfig {
    key_id: u8,
    kem_id: u16,
    public_key: Vec<u8>,
    suites: Vec<SymmetricSuite>,
}

impl std::fmt::Debug for KeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyConfig")
            .field("key_id", &self.key_id)
            .field("kem_id", &format_args!("0x{:04x}", self.kem_id))
            .field("suites", &self.suites)
            .finish_non_exhaustive()
    }
}

impl KeyConfig {
    /// Build the config used for auction keys: X25519 with HKDF-SHA256 and
    /// AES-256-GCM.
    ///
    /// # Errors
    ///
    /// Returns [`KeyConfigError::InvalidPublicKeyLength`] if `public_key` is
    /// not an X25519 public key.
    pub fn x25519(key_id: u8, public_key: &[u8]) -> Result<Self, KeyConfigError> {
        if public_key.len() != X25519_PUBLIC_KEY_LEN {
            return Err(KeyConfigError::InvalidPublicKeyLength(public_key.len()));
        }
        Ok(Self {
            key_id,
            kem_id: KEM_X25519_HKDF_SHA256,
            public_key: public_key.to_vec(),
            suites: vec![SymmetricSuite {
                kdf_id: KDF_HKDF_SHA256,
                aead_id: AEAD_AES_256_GCM,
            }],
        })
    }

    /// Decode a serialized key config.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyConfigError`] for truncated input, unsupported
    /// algorithms, or trailing bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, KeyConfigError> {
        let mut r = Reader::new(bytes);
        let key_id = r.u8()?;
        let kem_id = r.u16()?;
        if kem_id != KEM_X25519_HKDF_SHA256 {
            return Err(KeyConfigError::UnsupportedKem(kem_id));
        }
        let public_key = r.take(X25519_PUBLIC_KEY_LEN)?.to_vec();

        let sym_len = usize::from(r.u16()?);
        if sym_len == 0 || sym_len % 4 != 0 {
            return Err(KeyConfigError::InvalidSymmetricLength(sym_len));
        }
        let mut suites = Vec::with_capacity(sym_len / 4);
        for _ in 0..sym_len / 4 {
            let kdf_id = r.u16()?;
            let aead_id = r.u16()?;
            if kdf_id != KDF_HKDF_SHA256 {
                return Err(KeyConfigError::UnsupportedKdf(kdf_id));
            }
            if !matches!(
                aead_id,
                AEAD_AES_128_GCM | AEAD_AES_256_GCM | AEAD_CHACHA20_POLY1305
            ) {
                return Err(KeyConfigError::UnsupportedAead(aead_id));
            }
            suites.push(SymmetricSuite { kdf_id, aead_id });
        }

        if r.remaining() != 0 {
            return Err(KeyConfigError::TrailingBytes(r.remaining()));
        }

        Ok(Self {
            key_id,
            kem_id,
            public_key,
            suites,
        })
    }

    /// Encode to the RFC 9458 wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + self.public_key.len() + 2 + 4 * self.suites.len());
        out.push(self.key_id);
        out.extend_from_slice(&self.kem_id.to_be_bytes());
        out.extend_from_slice(&self.public_key);
        // At most a handful of suites; the length always fits.
        out.extend_from_slice(&((self.suites.len() * 4) as u16).to_be_bytes());
        for suite in &self.suites {
            out.extend_from_slice(&suite.kdf_id.to_be_bytes());
            out.extend_from_slice(&suite.aead_id.to_be_bytes());
        }
        out
    }

    pub fn key_id(&self) -> u8 {
        self.key_id
    }

    pub fn kem_id(&self) -> u16 {
        self.kem_id
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn suites(&self) -> &[SymmetricSuite] {
        &self.suites
    }
}

/// Pack the first two hex characters of a key identifier into a key id:
/// `(hex[0] << 4) | hex[1]`.
///
/// # Errors
///
/// Returns [`KeyConfigError::InvalidKeyIdentifier`] if the identifier is
/// shorter than two characters or they are not hex digits.
pub fn pack_key_id(identifier: &str) -> Result<u8, KeyConfigError> {
    let invalid = || KeyConfigError::InvalidKeyIdentifier(identifier.to_owned());
    let mut chars = identifier.chars();
    let hi = chars.next().and_then(|c| c.to_digit(16)).ok_or_else(invalid)?;
    let lo = chars.next().and_then(|c| c.to_digit(16)).ok_or_else(invalid)?;
    // Both nibbles are < 16.
    Ok(((hi << 4) | lo) as u8)
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], KeyConfigError> {
        if self.remaining() < n {
            return Err(KeyConfigError::Truncated {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, KeyConfigError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, KeyConfigError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}
