//! Auction coordinator key sets.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use common::protocol::{AuctionKeySet, FetchResponse, AGE_HEADER, CACHE_CONTROL_HEADER};
use common::{EncryptionKey, KeyError, KeyType, StoredKey};
use tracing::warn;

use super::KeyParser;
use crate::ohttp::{pack_key_id, KeyConfig};

const MAX_AGE_DIRECTIVE: &str = "max-age";

/// Parses `{"keys":[{"id":..,"key":..}]}` bodies.
///
/// Every key in one response shares the same expiry, derived from the
/// response's caching headers.
#[derive(Debug, Clone)]
pub struct AuctionKeyParser {
    default_max_age: Duration,
}

impl AuctionKeyParser {
    pub fn new(default_max_age: Duration) -> Self {
        Self { default_max_age }
    }

    /// `max-age` from `Cache-Control` minus `Age`, or the default when the
    /// header is missing or unparsable, or the result is not positive or out
    /// of range.
    pub fn effective_max_age(&self, response: &FetchResponse) -> Duration {
        let Some(max_age) = response
            .header_values(CACHE_CONTROL_HEADER)
            .iter()
            .find_map(|v| parse_max_age(v))
        else {
            return self.default_max_age;
        };

        let age = response
            .header(AGE_HEADER)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);

        max_age
            .checked_sub(age)
            .filter(|remaining| *remaining > 0)
            .and_then(Duration::try_seconds)
            .unwrap_or(self.default_max_age)
    }

    /// `now` plus the effective max age. A lifetime past the representable
    /// range falls back to the default.
    fn expiry(&self, response: &FetchResponse, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.effective_max_age(response))
            .or_else(|| now.checked_add_signed(self.default_max_age))
            .unwrap_or(now)
    }
}

fn parse_max_age(cache_control: &str) -> Option<i64> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case(MAX_AGE_DIRECTIVE) {
            return None;
        }
        value.trim().trim_matches('"').parse().ok()
    })
}

impl KeyParser for AuctionKeyParser {
    fn key_type(&self) -> KeyType {
        KeyType::Auction
    }

    fn parse_fetch_response(
        &self,
        response: &FetchResponse,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredKey>, KeyError> {
        let set: AuctionKeySet = match serde_json::from_slice(&response.body) {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "auction key response is not a key set; ignoring");
                return Ok(Vec::new());
            }
        };

        // One undecodable key discards the whole set.
        if let Some(bad) = set
            .keys
            .iter()
            .find(|k| STANDARD.decode(&k.key).map_or(true, |b| b.is_empty()))
        {
            warn!(key_id = %bad.id, "auction key is not valid base64; ignoring response");
            return Ok(Vec::new());
        }

        let expiry = self.expiry(response, now);
        Ok(set
            .keys
            .into_iter()
            .map(|k| StoredKey {
                key_type: KeyType::Auction,
                key_identifier: k.id,
                public_key: k.key,
                coordinator_url: None,
                expiry,
            })
            .collect())
    }

    fn to_encryption_key(&self, stored: &StoredKey) -> Result<EncryptionKey, KeyError> {
        let bytes = STANDARD.decode(&stored.public_key).map_err(|e| {
            KeyError::InvalidKeyFormat(format!(
                "auction key {} is not base64: {e}",
                stored.key_identifier
            ))
        })?;
        EncryptionKey::new(KeyType::Auction, stored.key_identifier.clone(), bytes)
    }

    fn to_key_config(&self, key: &EncryptionKey) -> Result<KeyConfig, KeyError> {
        let key_id = pack_key_id(key.key_identifier())?;
        Ok(KeyConfig::x25519(key_id, key.public_key())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> AuctionKeyParser {
        AuctionKeyParser::new(Duration::days(14))
    }

    #[test]
    fn parses_key_set_with_cache_headers() {
        let now = Utc::now();
        let resp = FetchResponse::new(r#"{"keys":[{"id":"4b","key":"QUJD"}]}"#)
            .with_header("Cache-Control", "max-age=100")
            .with_header("Age", "10");

        assert_eq!(parser().effective_max_age(&resp), Duration::seconds(90));

        let keys = parser().parse_fetch_response(&resp, now).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_identifier, "4b");
        assert_eq!(keys[0].expiry, now + Duration::seconds(90));
        assert!(keys[0].coordinator_url.is_none());

        let key = parser().to_encryption_key(&keys[0]).unwrap();
        assert_eq!(key.public_key(), b"ABC");
    }

    #[test]
    fn max_age_falls_back_to_default() {
        let p = parser();
        let none = FetchResponse::new("");
        assert_eq!(p.effective_max_age(&none), Duration::days(14));

        let garbage = FetchResponse::new("").with_header("cache-control", "max-age=soon");
        assert_eq!(p.effective_max_age(&garbage), Duration::days(14));

        let stale = FetchResponse::new("")
            .with_header("cache-control", "max-age=10")
            .with_header("age", "10");
        assert_eq!(p.effective_max_age(&stale), Duration::days(14));
    }

    #[test]
    fn max_age_found_among_other_directives() {
        let resp = FetchResponse::new("").with_header("cache-control", "public, MAX-AGE=600");
        assert_eq!(parser().effective_max_age(&resp), Duration::seconds(600));
    }

    #[test]
    fn unparsable_age_counts_as_zero() {
        let resp = FetchResponse::new("")
            .with_header("cache-control", "max-age=60")
            .with_header("age", "yesterday");
        assert_eq!(parser().effective_max_age(&resp), Duration::seconds(60));
    }

    #[test]
    fn out_of_range_cache_headers_use_default() {
        let p = parser();
        let huge =
            FetchResponse::new("").with_header("cache-control", "max-age=100000000000000000");
        assert_eq!(p.effective_max_age(&huge), Duration::days(14));

        let negative_age = FetchResponse::new("")
            .with_header("cache-control", "max-age=60")
            .with_header("age", i64::MIN.to_string());
        assert_eq!(p.effective_max_age(&negative_age), Duration::days(14));
    }

    #[test]
    fn expiry_past_calendar_range_uses_default() {
        let now = Utc::now();
        let resp = FetchResponse::new(r#"{"keys":[{"id":"4b","key":"QUJD"}]}"#)
            .with_header("cache-control", "max-age=10000000000000");

        let keys = parser().parse_fetch_response(&resp, now).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].expiry, now + Duration::days(14));
    }

    #[test]
    fn malformed_bodies_yield_no_keys() {
        let now = Utc::now();
        for body in [
            "not json",
            r#"{"nope":[]}"#,
            r#"{"keys":[{"id":"4b","key":"%%%"}]}"#,
            r#"{"keys":[{"id":"4b","key":""}]}"#,
        ] {
            let keys = parser()
                .parse_fetch_response(&FetchResponse::new(body), now)
                .unwrap();
            assert!(keys.is_empty(), "body {body} produced keys");
        }
    }

    #[test]
    fn key_config_uses_packed_id() {
        let pk = STANDARD.encode([7u8; 32]);
        let stored = StoredKey {
            key_type: KeyType::Auction,
            key_identifier: "4b0f".into(),
            public_key: pk,
            coordinator_url: None,
            expiry: Utc::now(),
        };
        let config = parser().stored_to_key_config(&stored).unwrap();
        assert_eq!(config.key_id(), 75);
        assert_eq!(config.public_key(), &[7u8; 32]);
    }

    #[test]
    fn short_public_key_is_invalid_format() {
        let stored = StoredKey {
            key_type: KeyType::Auction,
            key_identifier: "4b".into(),
            public_key: "QUJD".into(),
            coordinator_url: None,
            expiry: Utc::now(),
        };
        let err = parser().stored_to_key_config(&stored).unwrap_err();
        assert_eq!(err.code(), "invalid_key_format");
    }
}
