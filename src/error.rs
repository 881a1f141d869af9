//! Typed failures produced by REST calls.
//!
//! Every operation in this crate fails with a single [`CallError`]. The
//! [`ErrorKind`] tells callers what went wrong without parsing the message,
//! the [`Cause`] keeps the lower-level diagnostic reachable through
//! [`std::error::Error::source`], and the `silent` flag marks outcomes that
//! should not be reported to users as errors.

use reqwest::header::HeaderMap;
use reqwest::{Response, StatusCode};
use std::fmt;
use thiserror::Error;

/// Classifies a [`CallError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Connection, timeout or request-building failure, or the session
    /// provider could not supply a session.
    Transport,
    /// The service rejected the credentials (HTTP 401).
    Authentication,
    /// The call does not apply to the target (HTTP 403). Silent.
    NotApplicable,
    /// Unknown endpoint or resource (HTTP 404).
    NotFound,
    /// The service rejected the request data (HTTP 400).
    MalformedRequest,
    /// A JSON payload could not be encoded or decoded.
    DecodeFailure,
    /// A `{name}` URL template could not be expanded.
    MalformedUrl,
    /// A required response header was absent or unusable.
    MissingHeader,
    /// Reading or writing a local file failed.
    Filesystem,
    /// Any other non-success status code.
    CallFailed,
}

impl ErrorKind {
    /// Whether failures of this kind are excluded from user-facing reporting.
    pub fn is_silent(self) -> bool {
        matches!(self, ErrorKind::NotApplicable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Transport => "transport error",
            ErrorKind::Authentication => "authentication error",
            ErrorKind::NotApplicable => "not applicable",
            ErrorKind::NotFound => "not found",
            ErrorKind::MalformedRequest => "malformed request",
            ErrorKind::DecodeFailure => "decode failure",
            ErrorKind::MalformedUrl => "malformed url",
            ErrorKind::MissingHeader => "missing header",
            ErrorKind::Filesystem => "filesystem error",
            ErrorKind::CallFailed => "call failed",
        };
        f.write_str(name)
    }
}

/// A response that completed with a non-success status, captured with its body.
#[derive(Debug, Clone)]
pub struct FailedResponse {
    pub status: StatusCode,
    pub url: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl FailedResponse {
    /// Consumes the response, keeping what is needed for diagnostics.
    ///
    /// An unreadable body is recorded as empty.
    pub async fn capture(response: Response) -> Self {
        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Self {
            status,
            url,
            headers,
            body,
        }
    }
}

/// The lower-level failure behind a [`CallError`].
#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("session provider failed: {0}")]
    Session(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("server responded with {} for {}", .0.status, .0.url)]
    Response(FailedResponse),
    #[error("{0}")]
    Detail(String),
}

/// The single failure type of every call in this crate.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CallError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Cause>,
    silent: bool,
}

impl CallError {
    /// Creates a failure of the given kind. The silent flag follows the kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
            silent: kind.is_silent(),
        }
    }

    /// Attaches the originating cause.
    pub fn with_cause(mut self, cause: impl Into<Cause>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub(crate) fn transport(error: reqwest::Error) -> Self {
        Self::new(
            ErrorKind::Transport,
            format!("A transport error occurred: {}", error),
        )
        .with_cause(error)
    }

    pub(crate) fn filesystem(error: std::io::Error) -> Self {
        Self::new(ErrorKind::Filesystem, error.to_string()).with_cause(error)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    /// True when callers may suppress user-facing reporting of this failure.
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// The failed response, when the failure came from a status code.
    pub fn response(&self) -> Option<&FailedResponse> {
        match &self.cause {
            Some(Cause::Response(failed)) => Some(failed),
            _ => None,
        }
    }

    /// The HTTP status, when the failure came from a status code.
    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(|failed| failed.status)
    }
}
