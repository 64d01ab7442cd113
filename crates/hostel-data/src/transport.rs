//! Minimal HTTP abstraction over which every outbound call is made.
//!
//! Requests and responses are plain data so that the resilient fetcher and the
//! auth client can be exercised against in-memory transports.

use std::time::Duration;

use async_trait::async_trait;
use hostel_core::error::{HostelError, Result};
use serde_json::Value;

// ── Request / response ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// An outbound JSON request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, url).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a header, replacing any existing header of the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_header("Authorization", format!("Bearer {token}"))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A response whose body has already been decoded as JSON.
///
/// Empty bodies decode to `Value::Null`; non-JSON error bodies are kept as a
/// JSON string so the status-code path can still report them.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl HttpResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// The server-provided error text, if the body carries one.
    ///
    /// Looks at `error`, then `message`, then a bare string body.
    pub fn error_message(&self) -> Option<String> {
        match &self.body {
            Value::Object(map) => ["error", "message"]
                .iter()
                .find_map(|k| map.get(*k).and_then(Value::as_str))
                .map(str::to_string),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    /// Convert a non-2xx response into the matching error.
    pub fn into_error(self) -> HostelError {
        let message = self.error_message();
        HostelError::http(self.status, message)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Anything that can carry an [`HttpRequest`] to a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. Non-2xx statuses are *not* errors at this level.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Send `request` with a fixed time budget.
///
/// On expiry the in-flight call is dropped and a distinguishable
/// [`HostelError::Timeout`] is returned.
pub async fn send_within(
    transport: &dyn Transport,
    request: HttpRequest,
    budget: Duration,
) -> Result<HttpResponse> {
    match tokio::time::timeout(budget, transport.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(HostelError::Timeout {
            secs: budget.as_secs(),
        }),
    }
}

/// [`Transport`] backed by a shared `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, &request.url)
            .header("Content-Type", "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        tracing::debug!(method = ?request.method, url = %request.url, "sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| HostelError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(n, v)| (n.as_str().to_string(), v.to_str().unwrap_or_default().to_string()))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| HostelError::Network(e.to_string()))?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(&text) {
                Ok(v) => v,
                Err(_) if !(200..300).contains(&status) => Value::String(text),
                Err(e) => return Err(e.into()),
            }
        };

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
