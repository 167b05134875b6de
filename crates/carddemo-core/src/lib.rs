//! Resilience and session layer for the CardDemo client.
//!
//! All backend traffic goes through [`ApiGateway`], which attaches the bearer
//! token, classifies failures into [`ApiError`] and publishes
//! [`Signal::CredentialRejected`] on a 401. [`SessionManager`] listens for that
//! signal, drops the session and announces [`Signal::SessionCleared`].
//! [`ErrorHandler::with_error_handling`] retries transient failures through
//! [`RetryPolicy`] and surfaces terminal ones on the [`NotificationCenter`].
//!
//! [`ClientContext`] wires these together from a [`ClientConfig`].

pub mod api;
pub mod auth;
pub mod clock;
pub mod config;
pub mod context;
pub mod handling;
pub mod notifications;
pub mod signals;

pub use api::{ApiError, ApiGateway, ApiRequest, ApiResponse, ErrorKind, FieldError, RetryPolicy};
pub use auth::{AuthState, Credential, Session, SessionManager, UserInfo};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ClientConfig;
pub use context::ClientContext;
pub use handling::ErrorHandler;
pub use notifications::{Notification, NotificationCenter, NotificationId, NotificationType};
pub use signals::{ClearReason, Signal, SignalBus, SignalKind};
