use std::borrow::Cow;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Envelope code the service uses for request body validation failures.
const VALIDATION_CODE: &str = "VALIDATION_ERROR";

/// One field-level problem reported by a validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

/// Closed classification of every failure the gateway can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// The request was sent but no response arrived.
    Network,
    /// The per-call timeout elapsed.
    Timeout,
    /// The request could not be built or sent at all.
    Request,
    /// The server answered with a non-success status.
    Http {
        status: u16,
        code: Option<String>,
        details: Option<Value>,
        retry_after: Option<Duration>,
    },
    /// The server rejected the request body field by field.
    Validation { status: u16, fields: Vec<FieldError> },
}

impl ErrorKind {
    /// Stable label used in logs and notifications (`HTTP_404`, `NETWORK_ERROR`, ...).
    pub fn code(&self) -> Cow<'static, str> {
        match self {
            ErrorKind::Network => Cow::Borrowed("NETWORK_ERROR"),
            ErrorKind::Timeout => Cow::Borrowed("TIMEOUT_ERROR"),
            ErrorKind::Request => Cow::Borrowed("REQUEST_ERROR"),
            ErrorKind::Http { status, .. } => Cow::Owned(format!("HTTP_{}", status)),
            ErrorKind::Validation { .. } => Cow::Borrowed(VALIDATION_CODE),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ErrorKind::Http { status, .. } | ErrorKind::Validation { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone)]
#[error("{}: {}", .kind.code(), .message)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<Value>,
    correlation_id: Option<String>,
    timestamp: Option<String>,
}

/// Bare `{"detail": "..."}` bodies produced by framework-level rejections.
#[derive(Debug, Deserialize)]
struct DetailBody {
    detail: String,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Request, message)
    }

    /// Error for a status with no usable body, mostly useful in tests and stubs.
    pub fn http(status: u16) -> Self {
        Self::from_response(status, None, None, "")
    }

    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Classify a non-success response.
    ///
    /// The service wraps failures as `{"error": {code, message, details,
    /// correlation_id, timestamp}}`. A `VALIDATION_ERROR` code becomes
    /// [`ErrorKind::Validation`]; every other code, known or not, keeps the
    /// transport status as [`ErrorKind::Http`].
    pub fn from_response(
        status: u16,
        correlation_header: Option<String>,
        retry_after: Option<Duration>,
        body: &str,
    ) -> Self {
        if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
            let ErrorBody {
                code,
                message,
                details,
                correlation_id,
                timestamp,
            } = envelope.error;

            let kind = if code.as_deref() == Some(VALIDATION_CODE) {
                let fields = details
                    .and_then(|d| serde_json::from_value::<Vec<FieldError>>(d).ok())
                    .unwrap_or_default();
                ErrorKind::Validation { status, fields }
            } else {
                ErrorKind::Http {
                    status,
                    code,
                    details,
                    retry_after,
                }
            };

            let timestamp = timestamp
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            return Self {
                kind,
                message: message.unwrap_or_else(|| default_message(status).to_string()),
                correlation_id: correlation_id.or(correlation_header),
                timestamp,
            };
        }

        let message = match serde_json::from_str::<DetailBody>(body) {
            Ok(detail) => detail.detail,
            Err(_) if body.trim().is_empty() => default_message(status).to_string(),
            Err(_) => Self::truncate_body(body),
        };

        Self {
            kind: ErrorKind::Http {
                status,
                code: None,
                details: None,
                retry_after,
            },
            message,
            correlation_id: correlation_header,
            timestamp: Utc::now(),
        }
    }

    pub fn code(&self) -> Cow<'static, str> {
        self.kind.code()
    }

    pub fn status(&self) -> Option<u16> {
        self.kind.status()
    }

    /// The credential itself was rejected (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(403)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(429)
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.kind, ErrorKind::Http { status: 500..=599, .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, ErrorKind::Validation { .. })
    }

    /// Failures that may succeed if the same call is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::Network | ErrorKind::Timeout) || self.is_server_error()
    }

    /// Field-level details of a validation failure, empty otherwise.
    pub fn field_errors(&self) -> &[FieldError] {
        match &self.kind {
            ErrorKind::Validation { fields, .. } => fields,
            _ => &[],
        }
    }

    /// Server hint for how long to wait after a 429.
    ///
    /// Only the delta-seconds form of `Retry-After` is understood (the
    /// service sends `60`); an HTTP-date value yields `None`.
    pub fn retry_after(&self) -> Option<Duration> {
        match &self.kind {
            ErrorKind::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match &self.kind {
            ErrorKind::Network => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            ErrorKind::Timeout => "The request timed out. Please try again.".to_string(),
            ErrorKind::Request => format!("The request could not be sent: {}", self.message),
            ErrorKind::Validation { .. } => "Some fields are invalid.".to_string(),
            ErrorKind::Http { status, .. } => match status {
                401 => "Your session has expired. Please sign in again.".to_string(),
                403 => "You do not have permission to perform this action.".to_string(),
                404 => "The requested resource was not found.".to_string(),
                429 => match self.retry_after() {
                    Some(wait) => format!(
                        "Too many requests. Please wait {} seconds before trying again.",
                        wait.as_secs()
                    ),
                    None => "Too many requests. Please wait before trying again.".to_string(),
                },
                500..=599 => "The server encountered an error. Please try again.".to_string(),
                _ => self.message.clone(),
            },
        }
    }
}

fn default_message(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Unauthorized - token may be expired",
        403 => "Access denied",
        404 => "Resource not found",
        409 => "Conflict",
        422 => "Invalid request data",
        429 => "Rate limited - please wait before retrying",
        500..=599 => "Server error",
        _ => "Unexpected response",
    }
}
