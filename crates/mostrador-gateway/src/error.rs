//! API error responses

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mostrador_core::{Error, ErrorKind};
use serde_json::json;
use tracing::{error, warn};

/// Wraps a core error so handlers can use `?`. The body never carries the
/// internal error text.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        status_for(self.0.kind())
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Input => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::SessionBusy => StatusCode::CONFLICT,
        ErrorKind::Policy => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::UpstreamTransient | ErrorKind::UpstreamFatal => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Persistence | ErrorKind::Config | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Input(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.0.kind();
        if status.is_server_error() {
            error!(error = %self.0, kind = kind.as_str(), "request failed");
        } else if kind != ErrorKind::Auth {
            warn!(error = %self.0, kind = kind.as_str(), "request rejected");
        } else {
            warn!(kind = kind.as_str(), "request rejected");
        }
        let body = json!({
            "error": kind.as_str(),
            "message": self.0.user_message(),
        });
        (status, Json(body)).into_response()
    }
}
