//! Join server key config.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use common::protocol::{FetchResponse, ACCEPT_HEADER, CONTENT_TYPE_HEADER, OHTTP_KEYS_CONTENT_TYPE};
use common::{EncryptionKey, KeyError, KeyType, StoredKey};

use super::KeyParser;
use crate::ohttp::KeyConfig;

/// Parses base64 bodies of `[key id][key config remainder]`.
///
/// The response must carry exactly one `Content-Type: application/ohttp-keys`.
/// Join keys always live for the configured max age.
#[derive(Debug, Clone)]
pub struct JoinKeyParser {
    max_age: Duration,
}

impl JoinKeyParser {
    pub fn new(max_age: Duration) -> Self {
        Self { max_age }
    }
}

impl KeyParser for JoinKeyParser {
    fn key_type(&self) -> KeyType {
        KeyType::Join
    }

    fn request_headers(&self) -> Vec<(String, String)> {
        vec![(ACCEPT_HEADER.to_owned(), OHTTP_KEYS_CONTENT_TYPE.to_owned())]
    }

    fn parse_fetch_response(
        &self,
        response: &FetchResponse,
        now: DateTime<Utc>,
    ) -> Result<Vec<StoredKey>, KeyError> {
        match response.header_values(CONTENT_TYPE_HEADER) {
            [ct] if ct.trim().eq_ignore_ascii_case(OHTTP_KEYS_CONTENT_TYPE) => {}
            [] => {
                return Err(KeyError::MalformedResponse(
                    "join key response has no content type".into(),
                ))
            }
            [ct] => {
                return Err(KeyError::MalformedResponse(format!(
                    "join key response has content type {ct}"
                )))
            }
            many => {
                return Err(KeyError::MalformedResponse(format!(
                    "join key response has {} content types",
                    many.len()
                )))
            }
        }

        let body = std::str::from_utf8(&response.body)
            .map_err(|e| KeyError::MalformedResponse(format!("join key body is not text: {e}")))?;
        let decoded = STANDARD
            .decode(body.trim())
            .map_err(|e| KeyError::MalformedResponse(format!("join key body is not base64: {e}")))?;

        let Some((&key_id, config)) = decoded.split_first() else {
            return Err(KeyError::MalformedResponse("join key body is empty".into()));
        };
        if config.is_empty() {
            return Err(KeyError::MalformedResponse(
                "join key body has no key config".into(),
            ));
        }

        Ok(vec![StoredKey {
            key_type: KeyType::Join,
            key_identifier: hex::encode([key_id]),
            public_key: hex::encode(config),
            coordinator_url: None,
            expiry: now + self.max_age,
        }])
    }

    fn to_encryption_key(&self, stored: &StoredKey) -> Result<EncryptionKey, KeyError> {
        let config = hex::decode(&stored.public_key).map_err(|e| {
            KeyError::InvalidKeyFormat(format!(
                "join key {} is not hex: {e}",
                stored.key_identifier
            ))
        })?;
        EncryptionKey::new(KeyType::Join, stored.key_identifier.clone(), config)
    }

    fn to_key_config(&self, key: &EncryptionKey) -> Result<KeyConfig, KeyError> {
        let id = match hex::decode(key.key_identifier()).as_deref() {
            Ok([id]) => *id,
            _ => {
                return Err(KeyError::InvalidKeyFormat(format!(
                    "join key identifier {:?} is not one hex byte",
                    key.key_identifier()
                )))
            }
        };
        let mut bytes = Vec::with_capacity(1 + key.public_key().len());
        bytes.push(id);
        bytes.extend_from_slice(key.public_key());
        Ok(KeyConfig::parse(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_remainder() -> Vec<u8> {
        let mut c = vec![0x00, 0x20];
        c.extend([0x11u8; 32]);
        c.extend([0x00, 0x04, 0x00, 0x01, 0x00, 0x01]);
        c
    }

    fn response(body: &[u8]) -> FetchResponse {
        FetchResponse::new(STANDARD.encode(body))
            .with_header("Content-Type", OHTTP_KEYS_CONTENT_TYPE)
    }

    fn parser() -> JoinKeyParser {
        JoinKeyParser::new(Duration::days(14))
    }

    #[test]
    fn parses_single_key_with_fixed_lifetime() {
        let now = Utc::now();
        let mut body = vec![0x04];
        body.extend(config_remainder());

        let keys = parser().parse_fetch_response(&response(&body), now).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_identifier, "04");
        assert_eq!(hex::decode(&keys[0].public_key).unwrap(), config_remainder());
        assert_eq!(keys[0].expiry, now + Duration::days(14));

        let config = parser().stored_to_key_config(&keys[0]).unwrap();
        assert_eq!(config.key_id(), 0x04);
        assert_eq!(config.public_key(), &[0x11u8; 32]);
    }

    #[test]
    fn requires_exactly_one_ohttp_content_type() {
        let mut body = vec![0x04];
        body.extend(config_remainder());
        let now = Utc::now();

        let missing = FetchResponse::new(STANDARD.encode(&body));
        assert_eq!(
            parser().parse_fetch_response(&missing, now).unwrap_err().code(),
            "malformed_response"
        );

        let doubled = response(&body).with_header("content-type", OHTTP_KEYS_CONTENT_TYPE);
        assert!(parser().parse_fetch_response(&doubled, now).is_err());

        let wrong = FetchResponse::new(STANDARD.encode(&body))
            .with_header("content-type", "application/json");
        assert!(parser().parse_fetch_response(&wrong, now).is_err());
    }

    #[test]
    fn undecodable_body_is_malformed() {
        let resp = FetchResponse::new("***").with_header("content-type", OHTTP_KEYS_CONTENT_TYPE);
        let err = parser().parse_fetch_response(&resp, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "malformed_response");

        let id_only = response(&[0x04]);
        assert!(parser().parse_fetch_response(&id_only, Utc::now()).is_err());
    }

    #[test]
    fn corrupt_config_is_invalid_key_format() {
        let stored = StoredKey {
            key_type: KeyType::Join,
            key_identifier: "04".into(),
            public_key: "0020ff".into(),
            coordinator_url: None,
            expiry: Utc::now(),
        };
        let err = parser().stored_to_key_config(&stored).unwrap_err();
        assert_eq!(err.code(), "invalid_key_format");
    }

    #[test]
    fn sends_ohttp_accept_header() {
        assert_eq!(
            parser().request_headers(),
            vec![("accept".to_string(), OHTTP_KEYS_CONTENT_TYPE.to_string())]
        );
    }
}
