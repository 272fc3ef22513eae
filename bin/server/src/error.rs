//! Error types for the proxy server.
//!
//! - `ProxyError`: request-time failures, rendered as HTTP responses.
//! - `StartupError`: invalid configuration; fatal before the listener binds.
//!   Returned as the context of a rootcause `Report` whose children carry
//!   the library error that caused it.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use portcullis_provider::ProviderError;
use portcullis_session::CodecError;
use rootcause::prelude::Report;
use std::fmt;

use crate::pages;
use crate::upstream::UpstreamError;

/// Request-time failures.
#[derive(Debug)]
pub enum ProxyError {
    /// The callback state did not match the transient state cookie.
    CsrfStateMismatch { details: String },
    /// The identity is not allowed by local policy or the provider.
    AuthorizationDenied { details: String },
    /// The provider could not complete a sign-in step.
    Provider(Report<ProviderError>),
    /// A cookie could not be produced.
    Internal(Report<CodecError>),
    /// The upstream could not be reached or did not answer in time.
    UpstreamUnavailable { details: String },
    /// No upstream serves the requested path.
    NotFound,
    /// The request is missing something the endpoint needs.
    BadRequest { details: String },
}

impl ProxyError {
    pub(crate) fn csrf(details: impl fmt::Display) -> Self {
        Self::CsrfStateMismatch {
            details: details.to_string(),
        }
    }

    pub(crate) fn denied(details: impl fmt::Display) -> Self {
        Self::AuthorizationDenied {
            details: details.to_string(),
        }
    }

    pub(crate) fn bad_request(details: impl fmt::Display) -> Self {
        Self::BadRequest {
            details: details.to_string(),
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CsrfStateMismatch { details } => write!(f, "CSRF state mismatch: {details}"),
            Self::AuthorizationDenied { details } => write!(f, "authorization denied: {details}"),
            Self::Provider(err) => write!(f, "provider error: {err}"),
            Self::Internal(err) => write!(f, "internal error: {err}"),
            Self::UpstreamUnavailable { details } => write!(f, "upstream unavailable: {details}"),
            Self::NotFound => write!(f, "no upstream for path"),
            Self::BadRequest { details } => write!(f, "bad request: {details}"),
        }
    }
}

impl std::error::Error for ProxyError {}

impl From<Report<ProviderError>> for ProxyError {
    fn from(err: Report<ProviderError>) -> Self {
        Self::Provider(err)
    }
}

impl From<Report<CodecError>> for ProxyError {
    fn from(err: Report<CodecError>) -> Self {
        Self::Internal(err)
    }
}

impl From<UpstreamError> for ProxyError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NoRoute { .. } => Self::NotFound,
            other => Self::UpstreamUnavailable {
                details: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            Self::CsrfStateMismatch { details } => {
                tracing::warn!(%details, "Rejected OAuth callback with mismatched state");
                html_error(StatusCode::FORBIDDEN, "Invalid sign-in state", "Please sign in again.")
            }
            Self::AuthorizationDenied { details } => {
                tracing::info!(%details, "Authorization denied");
                html_error(
                    StatusCode::FORBIDDEN,
                    "Permission denied",
                    "You are not authorized to access this resource.",
                )
            }
            Self::Provider(err) => {
                tracing::error!(error = %err, "Identity provider request failed");
                html_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Sign-in failed",
                    "The identity provider could not complete the sign-in.",
                )
            }
            Self::Internal(err) => {
                tracing::error!(error = %err, "Failed to issue cookie");
                html_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error",
                    "The request could not be completed.",
                )
            }
            Self::UpstreamUnavailable { details } => {
                tracing::error!(%details, "Upstream request failed");
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
            Self::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            Self::BadRequest { details } => {
                tracing::debug!(%details, "Bad request");
                (StatusCode::BAD_REQUEST, details).into_response()
            }
        }
    }
}

fn html_error(status: StatusCode, title: &str, message: &str) -> Response {
    (status, Html(pages::error_page(status, title, message))).into_response()
}

/// Fatal configuration errors found while building the application state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    /// A required setting is missing or inconsistent.
    Configuration { details: String },
    /// The htpasswd or authenticated-emails file could not be loaded.
    AccessFile,
    /// The provider could not be configured.
    Provider,
    /// An upstream spec, skip-auth pattern or signature key is invalid.
    Upstream,
    /// The cookie secret is missing or unreadable.
    CookieSecret { details: String },
    /// The cookie codec could not be built from the secret.
    Codec,
}

impl StartupError {
    pub(crate) fn configuration(details: impl fmt::Display) -> Self {
        Self::Configuration {
            details: details.to_string(),
        }
    }
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration { details } => write!(f, "invalid configuration: {details}"),
            Self::AccessFile => write!(f, "failed to load access list"),
            Self::Provider => write!(f, "failed to configure provider"),
            Self::Upstream => write!(f, "invalid routing"),
            Self::CookieSecret { details } => write!(f, "cookie secret unavailable: {details}"),
            Self::Codec => write!(f, "failed to build cookie codec"),
        }
    }
}

impl std::error::Error for StartupError {}
