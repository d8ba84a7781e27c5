//! Unified error type for the multiview service.
//!
//! All failure modes funnel into [`Error`], which knows its wire-level `kind`
//! tag and HTTP status so route handlers can return `Result<T, Error>`
//! directly. Non-2xx responses carry a `{ "error": <kind>, "detail": ... }`
//! JSON envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::fmt;

/// Unified error type covering all failure modes in multiview.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "channel", "layout").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A layout request violated the schema or a kind invariant.
    #[error("invalid layout: {0}")]
    BadLayout(String),

    /// A custom slot violated the geometry bounds or aspect constraint.
    #[error("invalid slot geometry: {0}")]
    BadGeometry(String),

    /// An upstream fetch (M3U playlist, proxied image) failed.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// The encoder child failed to start or exited during startup.
    #[error("encoder failed: {0}")]
    EncoderFailed(String),

    /// Cold start produced no stream bytes before the deadline.
    #[error("no stream bytes before the startup deadline")]
    StartupTimeout,

    /// A conflicting state transition was in flight.
    #[error("conflicting transition in flight: {0}")]
    Busy(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The stable wire tag for this error, drawn from the closed taxonomy.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not-found",
            Error::BadLayout(_) => "bad-layout",
            Error::BadGeometry(_) => "bad-geometry",
            Error::SourceUnavailable(_) => "source-unavailable",
            Error::EncoderFailed(_) => "encoder-failed",
            Error::StartupTimeout => "startup-timeout",
            Error::Busy(_) => "busy",
            Error::Io { .. } => "internal",
            Error::Internal(_) => "internal",
        }
    }

    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::BadLayout(_) => StatusCode::BAD_REQUEST,
            Error::BadGeometry(_) => StatusCode::BAD_REQUEST,
            Error::SourceUnavailable(_) => StatusCode::BAD_GATEWAY,
            Error::EncoderFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::StartupTimeout => StatusCode::GATEWAY_TIMEOUT,
            Error::Busy(_) => StatusCode::CONFLICT,
            Error::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::BadLayout`].
    pub fn bad_layout(message: impl Into<String>) -> Self {
        Error::BadLayout(message.into())
    }

    /// Convenience constructor for [`Error::BadGeometry`].
    pub fn bad_geometry(message: impl Into<String>) -> Self {
        Error::BadGeometry(message.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Server error in API handler");
        }

        let body = json!({
            "error": self.kind(),
            "detail": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
