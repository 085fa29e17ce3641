//! Login proxy and token refresh
//!
//! `/auth/login` forwards credentials to the identity service and keeps the
//! last successful login per employee code. `/auth/login-by-token` re-issues
//! a verified token with a fresh expiry.

use crate::jwt::{Claims, HsKey};
use chrono::{DateTime, Duration, Utc};
use mostrador_core::config::AuthConfig;
use mostrador_core::{Error, Result};
use mostrador_memory::AuthRecordStore;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

const IDENTITY: &str = "identity";

#[derive(Clone, Deserialize, Serialize)]
pub struct LoginRequest {
    pub usuario: String,
    pub contrasenia: String,
}

/// Lowercased, trimmed user name.
pub fn normalize_user(usuario: &str) -> String {
    usuario.trim().to_lowercase()
}

/// Claims for a re-issued token: `iat`/`exp` dropped, `usuario` lowercased
/// (and copied to `nombreUsuario`), empty or null `bodegas` removed, new
/// `exp` at `now + ttl`.
pub fn refresh_claims(mut claims: Claims, now: DateTime<Utc>, ttl: Duration) -> Claims {
    claims.remove("iat");
    claims.remove("exp");

    if let Some(usuario) = claims.get("usuario").and_then(Value::as_str).map(normalize_user) {
        claims.insert("usuario".into(), Value::String(usuario.clone()));
        claims.insert("nombreUsuario".into(), Value::String(usuario));
    }
    if let Some(Value::Array(bodegas)) = claims.get_mut("bodegas") {
        bodegas.retain(|b| match b {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        });
    }

    claims.insert("exp".into(), Value::from((now + ttl).timestamp()));
    claims
}

fn employee_code(payload: &Value) -> Option<String> {
    match payload.get("codEmpleado")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// HTTP client for the upstream identity service.
pub struct IdentityClient {
    http: reqwest::Client,
    url: String,
}

impl IdentityClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub async fn login(&self, credentials: &LoginRequest) -> Result<Value> {
        let response = self
            .http
            .post(&self.url)
            .json(credentials)
            .send()
            .await
            .map_err(|e| Error::upstream_transient(IDENTITY, e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::auth_failed("identity service rejected the credentials"));
        }
        if status.is_server_error() {
            return Err(Error::upstream_transient(IDENTITY, format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(Error::upstream_fatal(IDENTITY, format!("status {}", status)));
        }
        response
            .json()
            .await
            .map_err(|e| Error::upstream_fatal(IDENTITY, e.to_string()))
    }
}

pub struct AuthService {
    identity: Option<IdentityClient>,
    records: Arc<dyn AuthRecordStore>,
    key: Option<HsKey>,
    ttl: Duration,
}

impl AuthService {
    pub fn new(config: &AuthConfig, records: Arc<dyn AuthRecordStore>) -> Self {
        Self {
            identity: config.identity_url.as_deref().map(IdentityClient::new),
            records,
            key: config.jwt_secret.as_deref().map(|s| HsKey::new(s.as_bytes())),
            ttl: Duration::hours(config.token_ttl_hours),
        }
    }

    pub async fn login(&self, credentials: &LoginRequest) -> Result<Value> {
        if credentials.usuario.trim().is_empty() || credentials.contrasenia.is_empty() {
            return Err(Error::Input("usuario and contrasenia are required".into()));
        }
        let identity = self
            .identity
            .as_ref()
            .ok_or_else(|| Error::ConfigError("auth.identity_url is not set".into()))?;

        let mut payload = identity.login(credentials).await?;
        let usuario = payload
            .get("usuario")
            .and_then(Value::as_str)
            .unwrap_or(&credentials.usuario)
            .to_string();
        let body = payload
            .as_object_mut()
            .ok_or_else(|| Error::upstream_fatal(IDENTITY, "login payload is not an object"))?;
        body.insert("nombreUsuario".into(), Value::String(normalize_user(&usuario)));

        match employee_code(&payload) {
            Some(code) => {
                let mut record = payload.clone();
                if let Some(fields) = record.as_object_mut() {
                    fields.remove("token");
                    fields.insert("lastLogin".into(), Value::String(Utc::now().to_rfc3339()));
                }
                self.records.put_auth_record(&code, record).await?;
                info!(employee_code = %code, "login recorded");
            }
            None => warn!("login payload has no codEmpleado; record not kept"),
        }
        Ok(payload)
    }

    /// Verify `token` and answer with refreshed claims plus the new token.
    pub fn login_by_token(&self, token: &str, now: DateTime<Utc>) -> Result<Value> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| Error::ConfigError("auth.jwt_secret is not set".into()))?;
        let claims = key
            .verify(token, now.timestamp())
            .map_err(|e| Error::auth_failed(e.to_string()))?;

        let claims = refresh_claims(claims, now, self.ttl);
        let token = key.sign(&claims);
        let mut body = claims;
        body.insert("token".into(), Value::String(token));
        Ok(Value::Object(body))
    }
}
