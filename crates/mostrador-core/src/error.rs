//! Error types for Mostrador

use serde::Serialize;
use thiserror::Error;

/// Coarse classification used for propagation and HTTP mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Auth,
    Forbidden,
    UpstreamTransient,
    UpstreamFatal,
    Persistence,
    Policy,
    SessionBusy,
    NotFound,
    Timeout,
    Config,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input_error",
            Self::Auth => "auth_error",
            Self::Forbidden => "forbidden",
            Self::UpstreamTransient => "upstream_transient",
            Self::UpstreamFatal => "upstream_fatal",
            Self::Persistence => "persistence_error",
            Self::Policy => "policy_error",
            Self::SessionBusy => "session_busy",
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::Config => "config_error",
            Self::Internal => "internal_error",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("upstream unavailable: {upstream} - {message}")]
    UpstreamTransient { upstream: String, message: String },

    #[error("upstream error: {upstream} - {message}")]
    UpstreamFatal { upstream: String, message: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("rejected by policy: {0}")]
    Policy(String),

    #[error("session busy: {0}")]
    SessionBusy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        Self::AuthFailed {
            reason: reason.into(),
        }
    }

    pub fn upstream_transient(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamTransient {
            upstream: upstream.into(),
            message: message.into(),
        }
    }

    pub fn upstream_fatal(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamFatal {
            upstream: upstream.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) | Self::JsonError(_) => ErrorKind::Input,
            Self::AuthFailed { .. } => ErrorKind::Auth,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::UpstreamTransient { .. } => ErrorKind::UpstreamTransient,
            Self::UpstreamFatal { .. } => ErrorKind::UpstreamFatal,
            Self::Persistence(_) | Self::IoError(_) => ErrorKind::Persistence,
            Self::Policy(_) => ErrorKind::Policy,
            Self::SessionBusy(_) => ErrorKind::SessionBusy,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ConfigError(_) => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show an end user. Never includes SQL, upstream
    /// bodies or internal detail.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Input => "La solicitud no es válida. Revisa los datos enviados.",
            ErrorKind::Auth => "Credenciales inválidas o sesión expirada.",
            ErrorKind::Forbidden => "No tienes acceso a esta conversación.",
            ErrorKind::UpstreamTransient => {
                "Un servicio externo no está disponible en este momento. Intenta nuevamente."
            }
            ErrorKind::UpstreamFatal => "Un servicio externo no pudo procesar la solicitud.",
            ErrorKind::Persistence => "No se pudo guardar la conversación. Intenta nuevamente.",
            ErrorKind::Policy => "La operación no está permitida.",
            ErrorKind::SessionBusy => {
                "La sesión está procesando otro mensaje. Espera la respuesta anterior."
            }
            ErrorKind::NotFound => "El recurso solicitado no existe.",
            ErrorKind::Timeout => "La respuesta tardó demasiado. Intenta nuevamente.",
            ErrorKind::Config | ErrorKind::Internal => "Ocurrió un error inesperado.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_from_variants() {
        assert_eq!(Error::Input("x".into()).kind(), ErrorKind::Input);
        assert_eq!(Error::auth_failed("bad").kind(), ErrorKind::Auth);
        assert_eq!(Error::SessionBusy("s1".into()).kind(), ErrorKind::SessionBusy);
        assert_eq!(
            Error::upstream_transient("warehouse", "503").kind(),
            ErrorKind::UpstreamTransient
        );
    }

    #[test]
    fn user_message_does_not_leak_detail() {
        let err = Error::upstream_fatal("warehouse", "Code: 62. Syntax error near SELEC");
        assert!(!err.user_message().contains("SELEC"));
        assert!(err.to_string().contains("SELEC"));
    }
}
