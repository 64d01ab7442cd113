//! The resilient data fetcher.
//!
//! Every call carries the session's bearer token (refreshed first when it is
//! near expiry) and a fixed time budget. A 401 triggers exactly one reactive
//! refresh and one retry; nothing else is retried here. Whole-list reads are
//! paginated with `Prefer: count=exact` and may be wrapped in the fixed-delay
//! retry helper.
//!
//! Public operations come in two flavours: `request`/`paginated_fetch`
//! return the uniform [`ApiResponse`] shape and never fail, while the
//! `fetch*` variants return `Result` for composition.

use std::sync::Arc;
use std::time::Duration;

use hostel_core::error::{HostelError, Result};
use hostel_core::models::ApiResponse;
use hostel_data::pagination::{fetch_all_pages, PageRequest};
use hostel_data::postgrest::{
    parse_base, parse_content_range, Page, Query, API_KEY_HEADER, PREFER_COUNT_EXACT,
};
use hostel_data::retry::retry;
use hostel_data::transport::{send_within, HttpRequest, HttpResponse, Method, Transport};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::policy::FetchPolicy;
use crate::session_manager::SessionManager;

// ── RequestOptions ────────────────────────────────────────────────────────────

/// Method, body and extra headers of one call.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get() -> Self {
        Self::new(Method::Get)
    }

    pub fn post(body: Value) -> Self {
        Self::new(Method::Post).with_body(body)
    }

    pub fn patch(body: Value) -> Self {
        Self::new(Method::Patch).with_body(body)
    }

    pub fn delete() -> Self {
        Self::new(Method::Delete)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// ── ApiClient ─────────────────────────────────────────────────────────────────

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
    base_url: String,
    anon_key: Option<String>,
    policy: FetchPolicy,
}

impl ApiClient {
    /// Client for the API rooted at `base_url`.
    ///
    /// Fails with a configuration error when `base_url` is not a URL.
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionManager>,
        base_url: &str,
        anon_key: Option<String>,
    ) -> Result<Self> {
        parse_base(base_url)?;
        Ok(Self {
            transport,
            session,
            base_url: base_url.to_string(),
            anon_key,
            policy: FetchPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: FetchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    // ── Single calls ──────────────────────────────────────────────────────

    /// Perform one call and report the outcome as `{success, data?, error?}`.
    ///
    /// `endpoint` is either an absolute URL or a path under the base URL.
    pub async fn request<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> ApiResponse<T> {
        self.fetch(endpoint, options).await.into()
    }

    /// [`request`](Self::request) returning a `Result`.
    pub async fn fetch<T: DeserializeOwned>(&self, endpoint: &str, options: RequestOptions) -> Result<T> {
        let url = self.resolve(endpoint)?;
        let result = async {
            let response = self
                .send_authorized(&url, &options, self.policy.request_timeout)
                .await?;
            decode_response(response)
        }
        .await;
        if let Err(e) = &result {
            tracing::warn!(method = ?options.method, url = %url, error = %e, "request failed");
        }
        result
    }

    /// Run `query` against the data API.
    pub async fn fetch_query<T: DeserializeOwned>(&self, query: &Query, options: RequestOptions) -> Result<T> {
        self.fetch(&query.url(&self.base_url)?, options).await
    }

    // ── Pagination ────────────────────────────────────────────────────────

    /// Read every row matching `query`, `page_size` rows at a time, as
    /// `{success, data?, error?}`. No partial result is ever returned.
    pub async fn paginated_fetch<T: DeserializeOwned>(&self, query: &Query, page_size: u64) -> ApiResponse<Vec<T>> {
        self.fetch_all(query, page_size).await.into()
    }

    /// [`paginated_fetch`](Self::paginated_fetch) returning a `Result`.
    pub async fn fetch_all<T: DeserializeOwned>(&self, query: &Query, page_size: u64) -> Result<Vec<T>> {
        let rows = fetch_all_pages(page_size, self.policy.page_timeout, move |req| {
            self.fetch_page(query, req)
        }).await;
        match &rows {
            Ok(rows) => tracing::debug!(table = query.table_name(), rows = rows.len(), "paginated fetch complete"),
            Err(e) => tracing::warn!(table = query.table_name(), error = %e, "paginated fetch failed"),
        }
        rows
    }

    /// [`fetch_all`](Self::fetch_all) under the fixed-delay retry policy.
    pub async fn fetch_all_with_retry<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<T>> {
        let page_size = self.policy.page_size;
        retry(self.policy.retry_attempts, self.policy.retry_delay, move || {
            self.fetch_all(query, page_size)
        })
        .await
    }

    /// One page of `query` with the total the server reports.
    pub async fn fetch_page<T: DeserializeOwned>(&self, query: &Query, window: PageRequest) -> Result<Page<T>> {
        let url = query
            .clone()
            .offset(window.offset)
            .limit(window.limit)
            .url(&self.base_url)?;
        let options = RequestOptions::get().with_header(PREFER_COUNT_EXACT.0, PREFER_COUNT_EXACT.1);

        let response = self
            .send_authorized(&url, &options, self.policy.page_timeout)
            .await?;
        if !response.is_success() {
            return Err(response.into_error());
        }
        let total = response.header("content-range").and_then(parse_content_range);
        let items = decode_body(response.body)?;
        Ok(Page { items, total })
    }

    // ── Plumbing ──────────────────────────────────────────────────────────

    fn resolve(&self, endpoint: &str) -> Result<String> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        parse_base(&self.base_url)?
            .join(endpoint.trim_start_matches('/'))
            .map(|u| u.to_string())
            .map_err(|e| HostelError::Config(format!("invalid endpoint {endpoint:?}: {e}")))
    }

    /// Send with the current token; on 401 refresh once and resend once.
    async fn send_authorized(&self, url: &str, options: &RequestOptions, budget: Duration) -> Result<HttpResponse> {
        let token = match self.session.access_token().await {
            Ok(token) => Some(token),
            Err(HostelError::NoSession) => None,
            Err(e) => return Err(e),
        };

        let response = self.send_once(url, options, token.as_deref(), budget).await?;
        let Some(rejected) = token.filter(|_| response.status == 401) else {
            return Ok(response);
        };

        tracing::info!(url, "request unauthorized; refreshing token and retrying once");
        let fresh = self.session.refresh_after_unauthorized(&rejected).await?;
        self.send_once(url, options, Some(&fresh), budget).await
    }

    async fn send_once(
        &self,
        url: &str,
        options: &RequestOptions,
        token: Option<&str>,
        budget: Duration,
    ) -> Result<HttpResponse> {
        let mut request = HttpRequest::new(options.method, url);
        if let Some(body) = &options.body {
            request = request.with_body(body.clone());
        }
        if let Some(key) = &self.anon_key {
            request = request.with_header(API_KEY_HEADER, key.as_str());
        }
        for (name, value) in &options.headers {
            request = request.with_header(name.as_str(), value.as_str());
        }
        if let Some(token) = token {
            request = request.with_bearer(token);
        }

        tracing::debug!(method = ?options.method, url, "sending request");
        send_within(self.transport.as_ref(), request, budget).await
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn decode_response<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    if !response.is_success() {
        return Err(response.into_error());
    }
    decode_body(response.body)
}

/// Decode a 2xx body that is either a bare document or a
/// `{success, data?, error?}` envelope.
fn decode_body<T: DeserializeOwned>(body: Value) -> Result<T> {
    let is_envelope = body
        .as_object()
        .is_some_and(|map| map.get("success").is_some_and(Value::is_boolean));
    if !is_envelope {
        return Ok(serde_json::from_value(body)?);
    }

    let envelope: ApiResponse<T> = serde_json::from_value(body)?;
    match envelope.into_result()? {
        Some(data) => Ok(data),
        None => serde_json::from_value(Value::Null)
            .map_err(|_| HostelError::InvalidResponse("response carried no data".to_string())),
    }
}
