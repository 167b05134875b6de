//! User-facing alert queue.
//!
//! `NotificationCenter` keeps at most `capacity` notifications, newest
//! first. Non-persistent entries dismiss themselves after their duration;
//! every removal path cancels the entry's pending timer.

pub mod center;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use center::NotificationCenter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum NotificationType {
    Success,
    Error,
    Warning,
    Info,
}

impl NotificationType {
    pub fn is_error(&self) -> bool {
        matches!(self, NotificationType::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NotificationId(pub u64);

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Auto-dismiss delay; `None` for persistent notifications.
    pub duration_ms: Option<u64>,
    pub persistent: bool,
}

/// How a notification left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum RemovalReason {
    /// Removed by `remove` or a bulk clear.
    Dismissed,
    /// Its dismiss timer fired.
    Expired,
    /// Pushed out by a newer notification at capacity.
    Evicted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum NotificationEvent {
    Added(Notification),
    Removed {
        id: NotificationId,
        reason: RemovalReason,
    },
}
