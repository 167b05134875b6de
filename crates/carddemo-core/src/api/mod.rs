//! Transport layer for the CardDemo REST API.
//!
//! This module provides the `ApiGateway` through which every backend call
//! flows, the `ApiError` taxonomy it classifies failures into, and the
//! `RetryPolicy` that decides which of those failures are worth repeating.
//!
//! The API uses JWT bearer token authentication obtained through
//! `POST /auth/login`.

pub mod error;
pub mod gateway;
pub mod retry;

pub use error::{ApiError, ErrorKind, FieldError};
pub use gateway::{ApiGateway, ApiRequest, ApiResponse};
pub use retry::{RetryAttempt, RetryPolicy};
