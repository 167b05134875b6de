//! Authentication module for managing the user session.
//!
//! This module provides:
//! - `SessionManager`: login/logout, expiry checks and silent revalidation
//! - `Session`: the token, user and expiry, persisted through a `KeyValueStore`
//! - `Credential`: transient login input, never persisted
//! - `KeyValueStore` implementations (memory, JSON file, OS keychain)
//!
//! Sessions are revalidated when they come within 5 minutes of expiry.

pub mod credentials;
pub mod manager;
pub mod session;
pub mod storage;

pub use credentials::Credential;
pub use manager::{AuthState, SessionManager};
pub use session::{Session, UserInfo};
pub use storage::{FileStore, KeyValueStore, KeyringStore, MemoryStore};
