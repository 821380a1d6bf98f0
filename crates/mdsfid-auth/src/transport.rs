//! HTTP transport used by the identity-service client.
//!
//! The client never talks to `reqwest` directly; it hands a
//! [`TransportRequest`] to an injected [`HttpTransport`], which makes the
//! client testable by substitution.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;

/// HTTP method of an identity-backend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
}

/// A single outbound request to the identity backend.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method.
    pub method: TransportMethod,
    /// Endpoint URL without query string.
    pub url: Url,
    /// Service token sent as `Authorization: Bearer`.
    pub bearer_token: String,
    /// Query parameters appended to `url`.
    pub query: Vec<(String, String)>,
    /// JSON request body.
    pub json: Option<Value>,
}

impl TransportRequest {
    /// Creates a `GET` request.
    #[must_use]
    pub fn get(url: Url, bearer_token: impl Into<String>) -> Self {
        Self {
            method: TransportMethod::Get,
            url,
            bearer_token: bearer_token.into(),
            query: Vec::new(),
            json: None,
        }
    }

    /// Creates a `POST` request with a JSON body.
    #[must_use]
    pub fn post_json(url: Url, bearer_token: impl Into<String>, body: Value) -> Self {
        Self {
            method: TransportMethod::Post,
            url,
            bearer_token: bearer_token.into(),
            query: Vec::new(),
            json: Some(body),
        }
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Raw response from the identity backend.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
    /// Parsed body, present only for a JSON content type that parsed.
    pub json: Option<Value>,
}

impl TransportResponse {
    /// Returns `true` for a status in `[200, 300)`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the identity backend.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` for network failures, timeouts and
    /// cancellations.
    async fn send(&self, request: TransportRequest) -> AuthResult<TransportResponse>;
}

/// [`HttpTransport`] backed by a `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Transport` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Wraps an existing client (for connection pool reuse).
    #[must_use]
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> AuthResult<TransportResponse> {
        let builder = match request.method {
            TransportMethod::Get => self.http_client.get(request.url.clone()),
            TransportMethod::Post => self.http_client.post(request.url.clone()),
        };

        let mut builder = builder
            .bearer_auth(&request.bearer_token)
            .header(ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json {
            // Sets Content-Type: application/json
            builder = builder.json(body);
        }

        tracing::debug!(method = ?request.method, url = %request.url, "Sending identity backend request");

        let response = builder.send().await.map_err(AuthError::from)?;
        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));
        let body = response.text().await?;
        let json = if is_json {
            serde_json::from_str(&body).ok()
        } else {
            None
        };

        Ok(TransportResponse { status, body, json })
    }
}
