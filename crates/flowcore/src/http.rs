//! Outbound HTTP client handed to integration code.
//!
//! The client is bound to the app's API base URL and to the connection's
//! credentials. Before every request the app's `BeforeRequest` hooks run in
//! declared order, so an integration can add auth headers or rewrite query
//! strings in one place instead of in every trigger and action.

use crate::{AuthHandle, IntegrationError, JsonObject};
use reqwest::Method;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Request description that hooks can inspect and rewrite
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub method: Method,
    /// Absolute URL or a path relative to the client's base URL
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<JsonValue>,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }
}

/// Request transformer applied before every outbound call
pub trait BeforeRequest: Send + Sync {
    fn apply(&self, auth: &JsonObject, request: RequestConfig) -> RequestConfig;
}

impl<F> BeforeRequest for F
where
    F: Fn(&JsonObject, RequestConfig) -> RequestConfig + Send + Sync,
{
    fn apply(&self, auth: &JsonObject, request: RequestConfig) -> RequestConfig {
        self(auth, request)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HttpError {
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success status
    #[error("HTTP {status}")]
    Status { status: u16, body: JsonValue },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<HttpError> for IntegrationError {
    fn from(err: HttpError) -> Self {
        let message = err.to_string();
        match err {
            HttpError::Status { status, body } => {
                let mut payload = JsonObject::new();
                payload.insert("status".to_string(), JsonValue::from(status));
                payload.insert("body".to_string(), body);
                IntegrationError::new(message).with_detail("http_error", JsonValue::Object(payload))
            }
            _ => IntegrationError::new(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    /// Parsed JSON when the body is JSON, otherwise the raw text as a string
    pub body: JsonValue,
}

#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: Option<String>,
    hooks: Arc<Vec<Arc<dyn BeforeRequest>>>,
    auth: AuthHandle,
}

impl HttpClient {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        hooks: Vec<Arc<dyn BeforeRequest>>,
        auth: AuthHandle,
    ) -> Self {
        Self {
            client,
            base_url: base_url.filter(|b| !b.is_empty()),
            hooks: Arc::new(hooks),
            auth,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    /// Apply hooks in declared order and resolve the final URL
    pub fn prepare(&self, request: RequestConfig, auth: &JsonObject) -> Result<RequestConfig, HttpError> {
        let mut request = self
            .hooks
            .iter()
            .fold(request, |req, hook| hook.apply(auth, req));
        request.url = self.resolve_url(&request.url)?;
        Ok(request)
    }

    fn resolve_url(&self, url: &str) -> Result<String, HttpError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        match &self.base_url {
            Some(base) => Ok(format!(
                "{}/{}",
                base.trim_end_matches('/'),
                url.trim_start_matches('/')
            )),
            None => Err(HttpError::InvalidUrl(url.to_string())),
        }
    }

    pub async fn send(&self, request: RequestConfig) -> Result<HttpResponse, HttpError> {
        let auth = self.auth.data().await;
        let request = self.prepare(request, &auth)?;

        tracing::debug!(method = %request.method, url = %request.url, "outbound request");

        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(JsonValue::String(text));

        if !status.is_success() {
            return Err(HttpError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<HttpResponse, HttpError> {
        self.send(RequestConfig::new(Method::GET, url)).await
    }

    pub async fn post(&self, url: impl Into<String>, body: JsonValue) -> Result<HttpResponse, HttpError> {
        self.send(RequestConfig::new(Method::POST, url).json(body)).await
    }

    pub async fn put(&self, url: impl Into<String>, body: JsonValue) -> Result<HttpResponse, HttpError> {
        self.send(RequestConfig::new(Method::PUT, url).json(body)).await
    }

    pub async fn delete(&self, url: impl Into<String>) -> Result<HttpResponse, HttpError> {
        self.send(RequestConfig::new(Method::DELETE, url)).await
    }
}
