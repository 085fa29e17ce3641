//! Compact HS256 JSON Web Tokens

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::hmac;
use serde_json::{Map, Value};
use thiserror::Error;

pub type Claims = Map<String, Value>;

const HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JwtError {
    #[error("malformed token")]
    Malformed,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("signature mismatch")]
    BadSignature,

    #[error("token expired")]
    Expired,
}

/// Signing key shared by issuance and verification.
pub struct HsKey {
    key: hmac::Key,
}

impl HsKey {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    pub fn sign(&self, claims: &Claims) -> String {
        let header = URL_SAFE_NO_PAD.encode(HEADER);
        let payload = URL_SAFE_NO_PAD.encode(Value::Object(claims.clone()).to_string());
        let signing_input = format!("{}.{}", header, payload);
        let tag = hmac::sign(&self.key, signing_input.as_bytes());
        format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(tag.as_ref()))
    }

    /// Check signature and `exp` (unix seconds) against `now`.
    pub fn verify(&self, token: &str, now: i64) -> Result<Claims, JwtError> {
        let mut parts = token.trim().split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(JwtError::Malformed),
        };

        let signing_input = format!("{}.{}", header, payload);
        let header: Value = decode_json(header)?;
        match header.get("alg").and_then(Value::as_str) {
            Some("HS256") => {}
            Some(other) => return Err(JwtError::UnsupportedAlgorithm(other.to_string())),
            None => return Err(JwtError::Malformed),
        }

        let signature = URL_SAFE_NO_PAD.decode(signature).map_err(|_| JwtError::Malformed)?;
        hmac::verify(&self.key, signing_input.as_bytes(), &signature).map_err(|_| JwtError::BadSignature)?;

        let claims = match decode_json(payload)? {
            Value::Object(claims) => claims,
            _ => return Err(JwtError::Malformed),
        };
        if let Some(exp) = claims.get("exp").and_then(Value::as_i64) {
            if exp <= now {
                return Err(JwtError::Expired);
            }
        }
        Ok(claims)
    }
}

fn decode_json(segment: &str) -> Result<Value, JwtError> {
    let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|_| JwtError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| JwtError::Malformed)
}
