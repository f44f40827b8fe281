//! Tamper-evident tokens.
//!
//! A token has the shape `payload:timestamp:signature` where `payload` is the
//! url-safe base64 of the JSON value, `timestamp` is the base62 unix time of
//! issue and `signature` is the url-safe base64 HMAC-SHA256 of
//! `payload:timestamp`. The HMAC key is derived from the secret and a salt so
//! tokens minted for one purpose never verify for another.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SALT: &str = "autocomplete.signing";

const SEPARATOR: char = ':';
const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, PartialEq)]
pub enum Error {
    BadSignature,
    SignatureExpired,
    Serialization,
}

#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    pub fn new(secret: &str, salt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(b"signer");
        hasher.update(secret.as_bytes());

        Self {
            key: hasher.finalize().to_vec(),
        }
    }

    pub fn dumps<T: Serialize>(&self, value: &T) -> Result<String, Error> {
        self.dumps_at(value, Utc::now().timestamp())
    }

    fn dumps_at<T: Serialize>(&self, value: &T, timestamp: i64) -> Result<String, Error> {
        let json = serde_json::to_vec(value).map_err(|err| {
            tracing::error!("Failed to serialize value for signing: {}", err);
            Error::Serialization
        })?;

        let unsigned = format!(
            "{}{SEPARATOR}{}",
            URL_SAFE_NO_PAD.encode(json),
            encode_base62(timestamp.max(0) as u64)
        );
        let signature = self.signature(&unsigned)?;

        Ok(format!("{unsigned}{SEPARATOR}{signature}"))
    }

    /// Verifies `token` and decodes its payload. With `max_age` set, tokens
    /// issued longer ago than that are rejected as expired.
    pub fn loads<T: DeserializeOwned>(
        &self,
        token: &str,
        max_age: Option<Duration>,
    ) -> Result<T, Error> {
        let (unsigned, signature) = token
            .rsplit_once(SEPARATOR)
            .ok_or(Error::BadSignature)?;

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| Error::BadSignature)?;

        let mut mac = self.mac()?;
        mac.update(unsigned.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::BadSignature)?;

        let (payload, timestamp) = unsigned
            .rsplit_once(SEPARATOR)
            .ok_or(Error::BadSignature)?;

        if let Some(max_age) = max_age {
            let issued_at = decode_base62(timestamp).ok_or(Error::BadSignature)? as i64;
            let age = Utc::now().timestamp() - issued_at;

            if age > max_age.as_secs() as i64 {
                return Err(Error::SignatureExpired);
            }
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| Error::BadSignature)?;

        serde_json::from_slice(&json).map_err(|err| {
            tracing::warn!("Signed payload is not valid for the expected type: {}", err);
            Error::BadSignature
        })
    }

    /// Compares two secrets without leaking where they first differ.
    pub fn secrets_match(&self, given: &str, expected: &str) -> bool {
        let (Ok(mut expected_mac), Ok(mut given_mac)) = (self.mac(), self.mac()) else {
            return false;
        };
        expected_mac.update(expected.as_bytes());
        given_mac.update(given.as_bytes());

        given_mac
            .verify_slice(&expected_mac.finalize().into_bytes())
            .is_ok()
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(&self.key).map_err(|err| {
            tracing::error!("Failed to generate mac: {:?}", err);
            Error::BadSignature
        })
    }

    fn signature(&self, value: &str) -> Result<String, Error> {
        let mut mac = self.mac()?;
        mac.update(value.as_bytes());

        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }
}

fn encode_base62(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE62_ALPHABET[(value % 62) as usize]);
        value /= 62;
    }
    digits.reverse();

    String::from_utf8_lossy(&digits).into_owned()
}

fn decode_base62(value: &str) -> Option<u64> {
    if value.is_empty() {
        return None;
    }

    value.bytes().try_fold(0u64, |acc, byte| {
        let digit = BASE62_ALPHABET.iter().position(|&c| c == byte)? as u64;
        acc.checked_mul(62)?.checked_add(digit)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new("123456", DEFAULT_SALT)
    }

    #[test]
    fn round_trips_a_value() {
        let token = signer().dumps(&"01J9Z6K3T4").unwrap();
        let value: String = signer().loads(&token, None).unwrap();

        assert_eq!(value, "01J9Z6K3T4");
        assert_eq!(token.matches(SEPARATOR).count(), 2);
    }

    #[test]
    fn rejects_a_tampered_payload() {
        let token = signer().dumps(&"original").unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(b"\"forged\"");
        let mut parts: Vec<&str> = token.split(SEPARATOR).collect();
        parts[0] = forged_payload.as_str();

        let result = signer().loads::<String>(&parts.join(":"), None);

        assert_eq!(result, Err(Error::BadSignature));
    }

    #[test]
    fn rejects_tokens_from_another_key_or_salt() {
        let token = signer().dumps(&"key").unwrap();

        assert_eq!(
            Signer::new("654321", DEFAULT_SALT).loads::<String>(&token, None),
            Err(Error::BadSignature)
        );
        assert_eq!(
            Signer::new("123456", "other.salt").loads::<String>(&token, None),
            Err(Error::BadSignature)
        );
    }

    #[test]
    fn rejects_garbage() {
        for token in ["", "abc", "a:b", "a:b:c", "::"] {
            assert_eq!(
                signer().loads::<String>(token, None),
                Err(Error::BadSignature),
                "token {token:?}"
            );
        }
    }

    #[test]
    fn enforces_max_age() {
        let an_hour_ago = Utc::now().timestamp() - 3600;
        let token = signer().dumps_at(&"key", an_hour_ago).unwrap();

        assert_eq!(
            signer().loads::<String>(&token, Some(Duration::from_secs(60))),
            Err(Error::SignatureExpired)
        );
        assert_eq!(
            signer().loads::<String>(&token, Some(Duration::from_secs(7200))),
            Ok("key".to_string())
        );
        assert_eq!(signer().loads::<String>(&token, None), Ok("key".to_string()));
    }

    #[test]
    fn compares_secrets() {
        let signer = signer();

        assert!(signer.secrets_match("renderer-key", "renderer-key"));
        assert!(!signer.secrets_match("renderer-kez", "renderer-key"));
        assert!(!signer.secrets_match("renderer", "renderer-key"));
        assert!(!signer.secrets_match("", "renderer-key"));
    }

    #[test]
    fn base62_round_trips() {
        for value in [0, 1, 61, 62, 1_728_000_000] {
            assert_eq!(decode_base62(&encode_base62(value)), Some(value));
        }
        assert_eq!(decode_base62("not-base62!"), None);
    }
}
