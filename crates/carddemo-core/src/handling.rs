//! Store-facing wrapper that retries a call and turns its terminal failure
//! into a notification.

use std::future::Future;

use tracing::debug;

use crate::api::{ApiError, ErrorKind, RetryPolicy};
use crate::notifications::{NotificationCenter, NotificationId, NotificationType};

/// How a terminal error is presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: NotificationType,
    pub title: &'static str,
    pub message: String,
    pub persistent: bool,
}

/// Map an error to the alert shown for it. Validation errors get none:
/// callers render them next to the offending fields.
pub fn alert_for(error: &ApiError) -> Option<Alert> {
    let (kind, title, persistent) = match &error.kind {
        ErrorKind::Validation { .. } => return None,
        ErrorKind::Network => (NotificationType::Error, "Connection problem", false),
        ErrorKind::Timeout => (NotificationType::Error, "Request timed out", false),
        ErrorKind::Request => (NotificationType::Error, "Request failed", false),
        ErrorKind::Http { status, .. } => match status {
            401 => (NotificationType::Error, "Session expired", true),
            403 => (NotificationType::Error, "Access denied", false),
            404 => (NotificationType::Error, "Not found", false),
            429 => (NotificationType::Warning, "Rate limited", false),
            500..=599 => (NotificationType::Error, "Server error", false),
            _ => (NotificationType::Error, "Request failed", false),
        },
    };

    let mut message = error.user_message();
    if let Some(ref id) = error.correlation_id {
        message = format!("{} (ref: {})", message, id);
    }

    Some(Alert {
        kind,
        title,
        message,
        persistent,
    })
}

#[derive(Clone)]
pub struct ErrorHandler {
    retry: RetryPolicy,
    notifications: NotificationCenter,
}

impl ErrorHandler {
    pub fn new(retry: RetryPolicy, notifications: NotificationCenter) -> Self {
        Self { retry, notifications }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run `op` under the retry policy; on terminal failure post a
    /// notification (unless it is a validation error) and return the error.
    pub async fn with_error_handling<T, F, Fut>(&self, op: F, context: &str) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        match self.retry.with_retry(op, context).await {
            Ok(value) => Ok(value),
            Err(error) => {
                self.notify(&error, context);
                Err(error)
            }
        }
    }

    /// Post the alert for `error`, returning its id.
    pub fn notify(&self, error: &ApiError, context: &str) -> Option<NotificationId> {
        let Some(alert) = alert_for(error) else {
            debug!(context, code = %error.code(), "Validation error left to caller");
            return None;
        };
        debug!(context, code = %error.code(), title = alert.title, "Posting error notification");
        Some(
            self.notifications
                .add(alert.kind, alert.title, alert.message, None, alert.persistent),
        )
    }
}
