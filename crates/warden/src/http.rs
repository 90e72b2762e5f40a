//! Transport boundary for all outbound HTTP I/O.
//!
//! Everything that talks to a platform API goes through [`HttpTransport`], so
//! decorators (see [`crate::platform::SecondaryRateLimitTransport`]) and test
//! doubles can be layered without touching the clients.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Minimal HTTP method enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// HTTP headers represented as key/value pairs.
///
/// Header names are treated case-insensitively by helper functions.
pub type HttpHeaders = Vec<(String, String)>;

/// A minimal HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Build a bodiless GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The provider-requested back-off, if the response carries one.
    ///
    /// Only the delay-seconds form of `Retry-After` is understood; GitHub
    /// never sends the HTTP-date form.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("retry-after")?
            .trim()
            .parse::<u64>()
            .ok()
            .map(Duration::from_secs)
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("no mock response registered for {method} {url}")]
    NoMockResponse { method: String, url: String },
}

/// Transport boundary for all HTTP I/O.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

#[async_trait]
impl<T: HttpTransport + ?Sized> HttpTransport for std::sync::Arc<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        (**self).send(request).await
    }
}

/// Get the first header value matching `name` (case-insensitive).
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(feature = "github")]
pub mod reqwest_transport {
    use super::*;

    /// A real HTTP transport backed by reqwest.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }

        pub fn with_timeout(timeout: Duration) -> Result<Self, HttpError> {
            let client = reqwest::Client::builder()
                .timeout(timeout)
                .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Post => reqwest::Method::POST,
            };

            let mut builder = self.client.request(method, &request.url);
            for (k, v) in request.headers {
                builder = builder.header(&k, &v);
            }
            if !request.body.is_empty() {
                builder = builder.body(request.body);
            }

            let resp = builder
                .send()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?;

            let status = resp.status().as_u16();
            let headers: HttpHeaders = resp
                .headers()
                .iter()
                .map(|(name, value)| {
                    (
                        name.as_str().to_string(),
                        value.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect();

            let body = resp
                .bytes()
                .await
                .map_err(|e| HttpError::Transport(e.to_string()))?
                .to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        }
    }
}

// ---------- Test-only mock transport ----------

#[cfg(test)]
use std::collections::{HashMap, VecDeque};
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// In-memory mock transport.
///
/// Responses are queued per method + URL and handed out in FIFO order. Every
/// request is recorded so tests can assert on what a client actually sent.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[cfg(test)]
#[derive(Default)]
struct MockTransportInner {
    routes: HashMap<(HttpMethod, String), VecDeque<HttpResponse>>,
    requests: Vec<HttpRequest>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, method: HttpMethod, url: impl Into<String>, response: HttpResponse) {
        let mut inner = self
            .inner
            .lock()
            .expect("mock transport lock should not be poisoned");
        inner
            .routes
            .entry((method, url.into()))
            .or_default()
            .push_back(response);
    }

    /// Queue a 200 GET response with a JSON body and extra headers.
    pub fn push_json(&self, url: impl Into<String>, body: serde_json::Value, headers: &[(&str, &str)]) {
        self.push_response(
            HttpMethod::Get,
            url,
            HttpResponse {
                status: 200,
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                body: serde_json::to_vec(&body).expect("serialize mock body"),
            },
        );
    }

    /// Queue a bodyless GET response with the given status.
    pub fn push_status(&self, url: impl Into<String>, status: u16, message: &str) {
        self.push_response(
            HttpMethod::Get,
            url,
            HttpResponse {
                status,
                headers: Vec::new(),
                body: serde_json::to_vec(&serde_json::json!({ "message": message }))
                    .expect("serialize mock body"),
            },
        );
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        let inner = self
            .inner
            .lock()
            .expect("mock transport lock should not be poisoned");
        inner.requests.clone()
    }

    #[must_use]
    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }
}

#[cfg(test)]
#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut inner = self
            .inner
            .lock()
            .expect("mock transport lock should not be poisoned");

        let key = (request.method, request.url.clone());
        inner.requests.push(request);

        match inner.routes.get_mut(&key).and_then(|q| q.pop_front()) {
            Some(resp) => Ok(resp),
            None => Err(HttpError::NoMockResponse {
                method: key.0.as_str().to_string(),
                url: key.1,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse {
            status: 403,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn header_lookup_ignores_case_and_prefers_first() {
        let headers: HttpHeaders = vec![
            ("X-OAuth-Scopes".to_string(), "repo".to_string()),
            ("x-oauth-scopes".to_string(), "gist".to_string()),
        ];
        assert_eq!(header_get(&headers, "x-oauth-scopes"), Some("repo"));
        assert_eq!(header_get(&headers, "link"), None);
    }

    #[test]
    fn retry_after_parses_delay_seconds() {
        let resp = response_with(&[("Retry-After", " 2 ")]);
        assert_eq!(resp.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn retry_after_ignores_http_dates_and_missing_header() {
        let dated = response_with(&[("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT")]);
        assert_eq!(dated.retry_after(), None);
        assert_eq!(response_with(&[]).retry_after(), None);
    }

    #[test]
    fn request_builder_appends_headers_in_order() {
        let req = HttpRequest::get("https://api.github.com/user")
            .with_header("Accept", "application/vnd.github+json")
            .with_header("Authorization", "Bearer t");
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.headers.len(), 2);
        assert_eq!(header_get(&req.headers, "authorization"), Some("Bearer t"));
    }

    #[tokio::test]
    async fn mock_transport_pops_queued_responses_in_order() {
        let transport = MockTransport::new();
        let url = "https://api.github.com/user/orgs";
        transport.push_status(url, 500, "first");
        transport.push_json(url, serde_json::json!([]), &[]);

        let first = transport.send(HttpRequest::get(url)).await.expect("first");
        let second = transport.send(HttpRequest::get(url)).await.expect("second");
        assert_eq!(first.status, 500);
        assert!(second.is_success());
        assert_eq!(transport.request_count(url), 2);

        let err = transport
            .send(HttpRequest::get(url))
            .await
            .expect_err("queue is drained");
        assert!(matches!(err, HttpError::NoMockResponse { .. }));
    }

    #[test]
    #[cfg(feature = "github")]
    fn reqwest_transport_builds_with_timeout() {
        reqwest_transport::ReqwestTransport::with_timeout(Duration::from_secs(1))
            .expect("reqwest transport should build");
    }

    #[tokio::test]
    #[cfg(feature = "github")]
    async fn reqwest_transport_reports_invalid_urls_as_transport_errors() {
        let transport = reqwest_transport::ReqwestTransport::new(reqwest::Client::new());
        let err = transport
            .send(HttpRequest::get("not a url"))
            .await
            .expect_err("expected error");
        assert!(matches!(err, HttpError::Transport(_)));
    }
}
