use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::http::{HttpError, HttpRequest, HttpResponse, HttpTransport};

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Default pacing for GitHub REST calls (requests per second).
///
/// The primary limit is 5000 requests/hour; bursts above ~10/s are what
/// trip the secondary limit in practice.
pub const GITHUB_DEFAULT_RPS: u32 = 10;

/// A proactive API rate limiter using the governor crate.
///
/// Clients call [`ApiRateLimiter::wait`] before each request so that a large
/// fan-out of concurrent collection tasks doesn't burst past provider limits.
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiRateLimiter {
    /// Create a new rate limiter with the specified requests per second.
    ///
    /// A value of zero is clamped to one request per second.
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(rps))),
        }
    }

    /// Wait until a request is allowed by the rate limiter.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

/// Transport decorator that honors provider-issued "retry later" signals.
///
/// A shared embargo timestamp is consulted before every request. While it
/// lies in the future, every caller sharing this transport sleeps until it
/// passes. When a response carries a secondary rate limit signal (403 or 429
/// with `Retry-After`), the embargo is overwritten with `now + retry_after`
/// and the same request is sent again once it lifts. Requests are delayed,
/// never dropped.
pub struct SecondaryRateLimitTransport<T> {
    inner: T,
    embargo: Arc<RwLock<Option<Instant>>>,
}

impl<T> SecondaryRateLimitTransport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            embargo: Arc::new(RwLock::new(None)),
        }
    }

    /// Current embargo deadline, if one is still in the future.
    pub async fn embargo_until(&self) -> Option<Instant> {
        let until = *self.embargo.read().await;
        until.filter(|deadline| *deadline > Instant::now())
    }

    async fn wait_for_embargo(&self) {
        // The embargo can be pushed back while we sleep, so re-check after waking.
        while let Some(deadline) = self.embargo_until().await {
            tokio::time::sleep_until(deadline).await;
        }
    }

    async fn impose_embargo(&self, delay: Duration, url: &str) {
        let deadline = Instant::now() + delay;
        *self.embargo.write().await = Some(deadline);
        tracing::warn!(
            url = %url,
            sleep_secs = delay.as_secs_f64(),
            "Secondary rate limit reached, pausing all requests"
        );
    }
}

impl<T: Clone> Clone for SecondaryRateLimitTransport<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            embargo: Arc::clone(&self.embargo),
        }
    }
}

/// The back-off a response asks for, when it is a secondary rate limit signal.
fn secondary_limit_delay(response: &HttpResponse) -> Option<Duration> {
    if !matches!(response.status, 403 | 429) {
        return None;
    }
    response.retry_after()
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for SecondaryRateLimitTransport<T> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        loop {
            self.wait_for_embargo().await;

            let response = self.inner.send(request.clone()).await?;
            match secondary_limit_delay(&response) {
                Some(delay) => self.impose_embargo(delay, &request.url).await,
                None => return Ok(response),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// Scripted transport that records the (virtual) time each request was sent.
    #[derive(Clone, Default)]
    struct ScriptedTransport {
        responses: Arc<Mutex<HashMap<String, VecDeque<HttpResponse>>>>,
        sent: Arc<Mutex<Vec<(String, Instant)>>>,
    }

    impl ScriptedTransport {
        fn push(&self, url: &str, status: u16, retry_after: Option<&str>) {
            let headers = retry_after
                .map(|v| vec![("Retry-After".to_string(), v.to_string())])
                .unwrap_or_default();
            self.responses
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(HttpResponse {
                    status,
                    headers,
                    body: Vec::new(),
                });
        }

        fn sent_at(&self, url: &str) -> Vec<Instant> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| u == url)
                .map(|(_, t)| *t)
                .collect()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
            self.sent
                .lock()
                .unwrap()
                .push((request.url.clone(), Instant::now()));
            self.responses
                .lock()
                .unwrap()
                .get_mut(&request.url)
                .and_then(|q| q.pop_front())
                .ok_or_else(|| HttpError::Transport(format!("unscripted {}", request.url)))
        }
    }

    #[test]
    fn zero_rps_is_clamped() {
        let _limiter = ApiRateLimiter::new(0);
    }

    #[test]
    fn only_forbidden_or_too_many_requests_with_retry_after_count() {
        let mk = |status, retry: Option<&str>| HttpResponse {
            status,
            headers: retry
                .map(|v| vec![("retry-after".to_string(), v.to_string())])
                .unwrap_or_default(),
            body: Vec::new(),
        };
        assert_eq!(
            secondary_limit_delay(&mk(403, Some("3"))),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            secondary_limit_delay(&mk(429, Some("1"))),
            Some(Duration::from_secs(1))
        );
        assert_eq!(secondary_limit_delay(&mk(403, None)), None);
        assert_eq!(secondary_limit_delay(&mk(200, Some("3"))), None);
        assert_eq!(secondary_limit_delay(&mk(503, Some("3"))), None);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_resends_the_same_request_after_the_embargo() {
        let scripted = ScriptedTransport::default();
        scripted.push("https://api/a", 403, Some("2"));
        scripted.push("https://api/a", 200, None);
        let transport = SecondaryRateLimitTransport::new(scripted.clone());

        let start = Instant::now();
        let resp = transport
            .send(HttpRequest::get("https://api/a"))
            .await
            .expect("request succeeds after waiting");

        assert_eq!(resp.status, 200);
        let sent = scripted.sent_at("https://api/a");
        assert_eq!(sent.len(), 2);
        assert!(sent[1] - start >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_request_waits_out_an_embargo_it_did_not_trigger() {
        let scripted = ScriptedTransport::default();
        scripted.push("https://api/a", 403, Some("2"));
        scripted.push("https://api/a", 200, None);
        scripted.push("https://api/b", 200, None);
        let transport = Arc::new(SecondaryRateLimitTransport::new(scripted.clone()));

        let start = Instant::now();
        let first = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.send(HttpRequest::get("https://api/a")).await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        let issued = Instant::now();
        let second = transport
            .send(HttpRequest::get("https://api/b"))
            .await
            .expect("second request");
        assert_eq!(second.status, 200);

        let b_sent = scripted.sent_at("https://api/b")[0];
        assert!(b_sent - issued >= Duration::from_secs(1));
        assert!(b_sent - start >= Duration::from_secs(2));

        let first = first.await.expect("join").expect("first request");
        assert_eq!(first.status, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_signal_overwrites_rather_than_stacks() {
        let scripted = ScriptedTransport::default();
        let transport = SecondaryRateLimitTransport::new(scripted);

        let start = Instant::now();
        transport.impose_embargo(Duration::from_secs(10), "x").await;
        transport.impose_embargo(Duration::from_secs(3), "y").await;

        let until = transport.embargo_until().await.expect("embargo active");
        assert_eq!(until - start, Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(transport.embargo_until().await.is_none());
    }
}
