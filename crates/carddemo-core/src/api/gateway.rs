//! Single egress point for calls to the CardDemo REST API.
//!
//! Every request goes through [`ApiGateway::call`], which attaches the stored
//! bearer token, enforces the per-call timeout, and classifies any failure
//! into an [`ApiError`]. A 401 additionally drops the stored token and
//! publishes [`Signal::CredentialRejected`] before the error is returned.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::ApiError;
use crate::auth::storage::{KeyValueStore, TOKEN_KEY};
use crate::config::ClientConfig;
use crate::signals::{Signal, SignalBus};

/// Response header carrying the server-side correlation id.
const CORRELATION_HEADER: &str = "x-correlation-id";

/// An outgoing call, relative to the gateway's base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful response, passed through as received.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub correlation_id: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            let mut error = ApiError::request(format!("Invalid response body: {}", e));
            error.correlation_id = self.correlation_id.clone();
            error
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiGateway {
    client: Client,
    base_url: String,
    timeout: Duration,
    store: Arc<dyn KeyValueStore>,
    signals: SignalBus,
}

impl ApiGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        store: Arc<dyn KeyValueStore>,
        signals: SignalBus,
    ) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
            store,
            signals,
        })
    }

    pub fn from_config(config: &ClientConfig, store: Arc<dyn KeyValueStore>, signals: SignalBus) -> Result<Self> {
        Self::new(config.api_base_url.clone(), config.request_timeout(), store, signals)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `request` and return the response or a classified error.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let method = request.method.clone();
        let path = request.path.clone();

        let result = match tokio::time::timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::timeout(format!(
                "No response within {}ms",
                self.timeout.as_millis()
            ))),
        };

        match result {
            Ok(response) => Ok(response),
            Err(error) => {
                warn!(
                    method = %method,
                    path = %path,
                    code = %error.code(),
                    correlation_id = ?error.correlation_id,
                    error = %error.message,
                    "API call failed"
                );
                if error.is_unauthorized() {
                    self.reject_credential(&error);
                }
                Err(error)
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.call(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let body = serde_json::to_value(body)
            .map_err(|e| ApiError::request(format!("Failed to serialize request body: {}", e)))?;
        self.call(ApiRequest::post(path).json(body)).await?.json()
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read stored token, sending unauthenticated");
                None
            }
        }
    }

    /// One round trip without timeout or side effects.
    async fn exchange(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url(&request.path);
        debug!(method = %request.method, url = %url, "Sending request");

        let mut builder = self
            .client
            .request(request.method, &url)
            .header(header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = self.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| Self::classify_transport(&e))?;

        let status = response.status();
        let correlation_id = response
            .headers()
            .get(CORRELATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status.is_success() {
            let body = response.bytes().await.map_err(|e| Self::classify_transport(&e))?;
            return Ok(ApiResponse {
                status: status.as_u16(),
                correlation_id,
                body: body.to_vec(),
            });
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();

        Err(ApiError::from_response(status.as_u16(), correlation_id, retry_after, &body))
    }

    /// Map a transport failure where no HTTP status was received.
    fn classify_transport(err: &reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::timeout(err.to_string())
        } else if err.is_builder() {
            ApiError::request(err.to_string())
        } else if err.is_decode() {
            ApiError::request(format!("Invalid response body: {}", err))
        } else {
            ApiError::network(err.to_string())
        }
    }

    fn reject_credential(&self, error: &ApiError) {
        if let Err(e) = self.store.remove(TOKEN_KEY) {
            warn!(error = %e, "Failed to remove rejected token");
        }
        info!(correlation_id = ?error.correlation_id, "Credential rejected by server");
        self.signals.publish(Signal::CredentialRejected {
            correlation_id: error.correlation_id.clone(),
        });
    }
}
