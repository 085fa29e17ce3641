//! Tool error taxonomy

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ToolError {
    /// Arguments failed schema validation.
    #[error("invalid arguments: {0}")]
    Input(String),

    /// Rejected by a runtime guard (non-SELECT, oversized result).
    #[error("rejected: {0}")]
    Policy(String),

    /// Worth retrying: timeouts, 5xx, connection blips.
    #[error("upstream unavailable ({}): {message}", status_label(.status))]
    Transient { status: Option<u16>, message: String },

    /// Not worth retrying: 4xx, malformed upstream data.
    #[error("upstream error ({}): {message}", status_label(.status))]
    Fatal { status: Option<u16>, message: String },

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Never dispatched; its turn ended first.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

fn status_label(status: &Option<u16>) -> String {
    status.map_or_else(|| "no status".to_string(), |s| s.to_string())
}

impl ToolError {
    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient { status, message: message.into() }
    }

    pub fn fatal(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Fatal { status, message: message.into() }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transient { status, .. } | Self::Fatal { status, .. } => *status,
            _ => None,
        }
    }

    /// Classify an HTTP status returned by a back-end.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status >= 500 || status == 429 || status == 408 {
            Self::transient(Some(status), message)
        } else {
            Self::fatal(Some(status), message)
        }
    }

    /// Text shown to the model in the tool turn. Never includes upstream bodies.
    pub fn model_message(&self) -> String {
        match self {
            Self::Input(m) | Self::Policy(m) | Self::UnknownOperation(m) => format!("Error: {}", m),
            Self::Transient { .. } => "Error: the service is temporarily unavailable".to_string(),
            Self::Fatal { message, .. } => format!("Error: {}", message),
            Self::Timeout(_) => "Error: the operation timed out".to_string(),
            Self::Cancelled(_) => "Error: the call was cancelled before it ran".to_string(),
        }
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        let status = e.status().map(|s| s.as_u16());
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            Self::transient(status, e.to_string())
        } else if let Some(code) = status {
            Self::from_status(code, e.to_string())
        } else {
            Self::fatal(None, e.to_string())
        }
    }
}

impl From<ToolError> for mostrador_core::Error {
    fn from(e: ToolError) -> Self {
        use mostrador_core::Error;
        match e {
            ToolError::Input(m) => Error::Input(m),
            ToolError::Policy(m) => Error::Policy(m),
            ToolError::Transient { message, .. } => Error::upstream_transient("tool", message),
            ToolError::Fatal { message, .. } => Error::upstream_fatal("tool", message),
            ToolError::Timeout(m) => Error::Timeout(m),
            ToolError::UnknownOperation(m) => Error::NotFound(m),
            ToolError::Cancelled(m) => Error::Internal(format!("tool call cancelled: {}", m)),
        }
    }
}
