use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{MinerError, Result};
use crate::models::RateLimitState;
use crate::shutdown::ShutdownToken;

/// Longest response body kept in an [`MinerError::Api`] for diagnostics.
const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    /// Header names are stored lower-cased.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn header_num<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.header(name).and_then(|v| v.trim().parse().ok())
    }

    pub fn rate_limit(&self) -> RateLimitState {
        RateLimitState {
            limit: self.header_num("x-ratelimit-limit"),
            remaining: self.header_num("x-ratelimit-remaining"),
            reset: self.header_num("x-ratelimit-reset"),
            retry_after: self.header_num("retry-after"),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Outcome of a successful exchange. A 404 is an expected answer for many
/// lookups (no manifest, no README), so it is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse {
    Found(HttpResponse),
    NotFound,
}

impl ApiResponse {
    pub fn found(self) -> Option<HttpResponse> {
        match self {
            ApiResponse::Found(response) => Some(response),
            ApiResponse::NotFound => None,
        }
    }
}

/// The single place HTTP I/O happens.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// Source of wall-clock time and sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A [`Transport`] backed by reqwest.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                MinerError::Timeout {
                    url: request.url.clone(),
                    seconds: 0,
                }
            } else {
                MinerError::Network(e)
            }
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(HttpResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

/// How the client reacts to quota headers.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    /// Added on top of the advertised reset time.
    pub safety_margin: Duration,
    /// Below this many remaining requests, spread the rest over the window.
    pub low_water_mark: u64,
    /// Upper bound of a single proactive throttle sleep.
    pub throttle_cap: Duration,
    pub proactive_throttle: bool,
    /// `None` retries rate-limit exhaustion forever.
    pub max_retries: Option<u32>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(5),
            low_water_mark: 1000,
            throttle_cap: Duration::from_secs(5),
            proactive_throttle: true,
            max_retries: None,
        }
    }
}

impl RateLimitPolicy {
    /// Wait before retrying an exhausted quota that resets at `reset_at`.
    pub fn backoff_wait(&self, reset_at: i64, now: i64) -> Duration {
        let until_reset = (reset_at - now).max(0) as u64;
        Duration::from_secs(until_reset) + self.safety_margin
    }

    /// Sleep that spreads the remaining quota over the time left in the window.
    pub fn throttle_delay(&self, state: &RateLimitState, now: i64) -> Option<Duration> {
        if !self.proactive_throttle {
            return None;
        }
        let remaining = state.remaining?;
        let reset = state.reset?;
        if remaining >= self.low_water_mark {
            return None;
        }
        let until_reset = (reset - now).max(0) as f64;
        if until_reset == 0.0 {
            return None;
        }
        let per_request = Duration::from_secs_f64(until_reset / remaining.max(1) as f64);
        Some(per_request.min(self.throttle_cap))
    }
}

fn is_rate_limited(response: &HttpResponse, state: &RateLimitState) -> bool {
    match response.status {
        429 => true,
        403 => state.is_exhausted() || state.retry_after.is_some(),
        200..=299 => is_graphql_rate_limited(&response.body),
        _ => false,
    }
}

/// GraphQL reports an exhausted quota as a 200 carrying a `RATE_LIMITED` error.
fn is_graphql_rate_limited(body: &str) -> bool {
    if !body.contains("RATE_LIMITED") {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .is_some_and(|v| {
            v["errors"]
                .as_array()
                .is_some_and(|errors| errors.iter().any(|e| e["type"] == "RATE_LIMITED"))
        })
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= ERROR_BODY_LIMIT {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        cut.push('…');
        cut
    }
}

/// HTTP client that sleeps through quota exhaustion and throttles ahead of it.
#[derive(Clone)]
pub struct RateLimitedClient {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: RateLimitPolicy,
    timeout: Duration,
    shutdown: ShutdownToken,
}

impl RateLimitedClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        policy: RateLimitPolicy,
        timeout: Duration,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            transport,
            clock,
            policy,
            timeout,
            shutdown,
        }
    }

    /// Send `request`, retrying the same request after each rate-limit reset.
    pub async fn request(&self, request: &HttpRequest) -> Result<ApiResponse> {
        let mut retries: u32 = 0;

        loop {
            let response = self.send_with_timeout(request).await?;
            let state = response.rate_limit();

            // Quota exhausted: wait for the window to reset, then resend as-is.
            if is_rate_limited(&response, &state) {
                let now = self.clock.now_unix();
                let Some(reset_at) = state.reset_at(now) else {
                    return Err(MinerError::RateLimited {
                        status: response.status,
                    });
                };
                if let Some(max) = self.policy.max_retries {
                    if retries >= max {
                        return Err(MinerError::RetriesExhausted {
                            status: response.status,
                            retries,
                        });
                    }
                }
                retries += 1;

                let wait = self.policy.backoff_wait(reset_at, now);
                warn!(
                    "Rate limit reached (HTTP {}). Waiting {} seconds before retrying {}",
                    response.status,
                    wait.as_secs(),
                    request.url
                );
                self.pause(wait).await?;
                continue;
            }

            // Missing resources are an answer, not a failure.
            if response.status == 404 {
                debug!("Not found: {}", request.url);
                return Ok(ApiResponse::NotFound);
            }

            if !(200..300).contains(&response.status) {
                return Err(MinerError::Api {
                    status: response.status,
                    status_text: response.status_text.clone(),
                    body: truncate_body(&response.body),
                });
            }

            // The response is already in hand, so a stop request only skips
            // or shortens the throttle and never discards the response.
            if !self.shutdown.is_requested() {
                if let Some(delay) = self.policy.throttle_delay(&state, self.clock.now_unix()) {
                    debug!(
                        "Quota low ({} remaining), throttling for {:?}",
                        state.remaining.unwrap_or_default(),
                        delay
                    );
                    self.pause(delay).await.ok();
                }
            }

            return Ok(ApiResponse::Found(response));
        }
    }

    async fn send_with_timeout(&self, request: &HttpRequest) -> Result<HttpResponse> {
        debug!("{:?} {}", request.method, request.url);
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(Err(MinerError::Timeout { url, .. })) => Err(MinerError::Timeout {
                url,
                seconds: self.timeout.as_secs(),
            }),
            Ok(result) => result,
            Err(_) => Err(MinerError::Timeout {
                url: request.url.clone(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    async fn pause(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.clock.sleep(duration) => Ok(()),
            _ = self.shutdown.requested() => Err(MinerError::Cancelled),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[tokio::test]
    async fn test_waits_until_reset_before_retrying() {
        let clock = FakeClock::at(NOW);
        let reset = (NOW + 120).to_string();
        let transport = FakeTransport::new(
            clock.clone(),
            vec![
                response(
                    403,
                    "rate limit exceeded",
                    &[("X-RateLimit-Remaining", "0"), ("X-RateLimit-Reset", &reset)],
                ),
                ok("{}"),
            ],
        );
        let client = client_with(clock.clone(), transport.clone(), RateLimitPolicy::default());

        let result = client.request(&HttpRequest::get("https://api.github.com/x")).await;

        assert!(matches!(result, Ok(ApiResponse::Found(_))));
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, sent[1].0);
        assert!(sent[1].1 >= NOW + 120);
        assert_eq!(
            clock.sleeps.lock().unwrap()[0],
            Duration::from_secs(120 + 5)
        );
    }

    #[tokio::test]
    async fn test_reset_in_the_past_waits_only_margin() {
        let clock = FakeClock::at(NOW);
        let reset = (NOW - 30).to_string();
        let transport = FakeTransport::new(
            clock.clone(),
            vec![
                response(429, "", &[("x-ratelimit-reset", &reset)]),
                ok("{}"),
            ],
        );
        let client = client_with(clock.clone(), transport, RateLimitPolicy::default());

        client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap();

        assert_eq!(clock.sleeps.lock().unwrap()[0], Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_after_header_counts_as_reset() {
        let clock = FakeClock::at(NOW);
        let transport = FakeTransport::new(
            clock.clone(),
            vec![response(429, "", &[("Retry-After", "60")]), ok("{}")],
        );
        let client = client_with(clock.clone(), transport.clone(), RateLimitPolicy::default());

        client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap();

        assert!(transport.sent.lock().unwrap()[1].1 >= NOW + 60);
    }

    #[tokio::test]
    async fn test_missing_reset_surfaces_error() {
        let clock = FakeClock::at(NOW);
        let transport = FakeTransport::new(
            clock.clone(),
            vec![response(403, "", &[("x-ratelimit-remaining", "0")])],
        );
        let client = client_with(clock, transport, RateLimitPolicy::default());

        let err = client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap_err();

        assert!(matches!(err, MinerError::RateLimited { status: 403 }));
    }

    #[tokio::test]
    async fn test_forbidden_with_quota_left_is_api_error() {
        let clock = FakeClock::at(NOW);
        let transport = FakeTransport::new(
            clock.clone(),
            vec![response(403, "Resource not accessible", &[("x-ratelimit-remaining", "10")])],
        );
        let client = client_with(clock, transport, RateLimitPolicy::default());

        let err = client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap_err();

        match err {
            MinerError::Api { status, body, .. } => {
                assert_eq!(status, 403);
                assert_eq!(body, "Resource not accessible");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_not_found_is_not_an_error() {
        let clock = FakeClock::at(NOW);
        let transport = FakeTransport::new(clock.clone(), vec![response(404, "", &[])]);
        let client = client_with(clock, transport, RateLimitPolicy::default());

        let result = client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap();

        assert_eq!(result, ApiResponse::NotFound);
    }

    #[tokio::test]
    async fn test_error_body_is_truncated() {
        let clock = FakeClock::at(NOW);
        let body = "x".repeat(1000);
        let transport = FakeTransport::new(clock.clone(), vec![response(500, &body, &[])]);
        let client = client_with(clock, transport, RateLimitPolicy::default());

        let err = client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap_err();

        match err {
            MinerError::Api { body, .. } => assert!(body.chars().count() <= ERROR_BODY_LIMIT + 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bounded_policy_gives_up() {
        let clock = FakeClock::at(NOW);
        let reset = (NOW + 10).to_string();
        let limited = response(
            403,
            "",
            &[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", &reset)],
        );
        let transport = FakeTransport::new(clock.clone(), vec![limited.clone(), limited]);
        let policy = RateLimitPolicy {
            max_retries: Some(1),
            ..Default::default()
        };
        let client = client_with(clock, transport.clone(), policy);

        let err = client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            MinerError::RetriesExhausted {
                status: 403,
                retries: 1
            }
        ));
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_proactive_throttle_spreads_remaining_quota() {
        let clock = FakeClock::at(NOW);
        let reset = (NOW + 100).to_string();
        let transport = FakeTransport::new(
            clock.clone(),
            vec![ok_with_quota("50", &reset), ok_with_quota("2", &reset)],
        );
        let client = client_with(clock.clone(), transport, RateLimitPolicy::default());

        let request = HttpRequest::get("https://api.github.com/x");
        client.request(&request).await.unwrap();
        client.request(&request).await.unwrap();

        let sleeps = clock.sleeps.lock().unwrap();
        assert_eq!(sleeps[0], Duration::from_secs(2));
        // 98s left over 2 requests is capped.
        assert_eq!(sleeps[1], Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_no_throttle_above_low_water_mark() {
        let clock = FakeClock::at(NOW);
        let reset = (NOW + 100).to_string();
        let transport = FakeTransport::new(clock.clone(), vec![ok_with_quota("4000", &reset)]);
        let client = client_with(clock.clone(), transport, RateLimitPolicy::default());

        client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap();

        assert!(clock.sleeps.lock().unwrap().is_empty());
    }

    /// Clock whose sleeps never finish.
    struct NeverClock;

    #[async_trait]
    impl Clock for NeverClock {
        fn now_unix(&self) -> i64 {
            NOW
        }
        async fn sleep(&self, _duration: Duration) {
            std::future::pending::<()>().await;
        }
    }

    /// Transport whose requests never complete.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        async fn send(&self, _request: &HttpRequest) -> Result<HttpResponse> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_backoff() {
        let fake_clock = FakeClock::at(NOW);
        let reset = (NOW + 3600).to_string();
        let transport = FakeTransport::new(
            fake_clock,
            vec![response(
                403,
                "",
                &[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", &reset)],
            )],
        );
        let shutdown = ShutdownToken::new();
        let client = RateLimitedClient::new(
            transport,
            Arc::new(NeverClock),
            RateLimitPolicy::default(),
            Duration::from_secs(30),
            shutdown.clone(),
        );
        shutdown.request();

        let err = client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap_err();

        assert!(matches!(err, MinerError::Cancelled));
    }

    fn ok_with_quota(remaining: &str, reset: &str) -> HttpResponse {
        response(
            200,
            "{}",
            &[("x-ratelimit-remaining", remaining), ("x-ratelimit-reset", reset)],
        )
    }

    #[test]
    fn test_throttle_disabled() {
        let policy = RateLimitPolicy {
            proactive_throttle: false,
            ..Default::default()
        };
        let state = RateLimitState {
            remaining: Some(1),
            reset: Some(NOW + 100),
            ..Default::default()
        };
        assert_eq!(policy.throttle_delay(&state, NOW), None);
    }

    #[tokio::test]
    async fn test_stop_request_keeps_successful_response() {
        let fake_clock = FakeClock::at(NOW);
        let reset = (NOW + 100).to_string();
        let transport = FakeTransport::new(
            fake_clock,
            vec![ok_with_quota("10", &reset)],
        );
        let shutdown = ShutdownToken::new();
        let client = RateLimitedClient::new(
            transport.clone(),
            Arc::new(NeverClock),
            RateLimitPolicy::default(),
            Duration::from_secs(30),
            shutdown.clone(),
        );
        shutdown.request();

        let result = client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap();

        assert!(matches!(result, ApiResponse::Found(r) if r.status == 200));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_graphql_rate_limit_error_waits_for_reset() {
        let clock = FakeClock::at(NOW);
        let reset = (NOW + 600).to_string();
        let limited = response(
            200,
            r#"{"errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded for user ID 1."}]}"#,
            &[("x-ratelimit-remaining", "0"), ("x-ratelimit-reset", &reset)],
        );
        let page = r#"{"data": {"search": {"repositoryCount": 0}}}"#;
        let transport = FakeTransport::new(clock.clone(), vec![limited, ok(page)]);
        let client = client_with(clock.clone(), transport.clone(), RateLimitPolicy::default());

        let result = client
            .request(&HttpRequest::post("https://api.github.com/graphql", "{}"))
            .await
            .unwrap();

        assert_eq!(result.found().map(|r| r.body), Some(page.to_string()));
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].1 >= NOW + 600);
        assert_eq!(clock.sleeps.lock().unwrap()[0], Duration::from_secs(605));
    }

    #[tokio::test]
    async fn test_graphql_field_errors_are_not_rate_limits() {
        let clock = FakeClock::at(NOW);
        let body = r#"{"errors": [{"type": "NOT_FOUND", "message": "RATE_LIMITED is not a repo"}]}"#;
        let transport = FakeTransport::new(clock.clone(), vec![ok(body)]);
        let client = client_with(clock.clone(), transport.clone(), RateLimitPolicy::default());

        let result = client
            .request(&HttpRequest::post("https://api.github.com/graphql", "{}"))
            .await
            .unwrap();

        assert!(matches!(result, ApiResponse::Found(_)));
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_forbidden_with_retry_after_is_retried() {
        let clock = FakeClock::at(NOW);
        let transport = FakeTransport::new(
            clock.clone(),
            vec![
                response(403, "secondary rate limit", &[("Retry-After", "30")]),
                ok("{}"),
            ],
        );
        let client = client_with(clock.clone(), transport.clone(), RateLimitPolicy::default());

        client
            .request(&HttpRequest::get("https://api.github.com/x"))
            .await
            .unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].1 >= NOW + 30);
        assert_eq!(clock.sleeps.lock().unwrap()[0], Duration::from_secs(35));
    }

    #[tokio::test]
    async fn test_hung_request_times_out() {
        let client = RateLimitedClient::new(
            Arc::new(HangingTransport),
            FakeClock::at(NOW),
            RateLimitPolicy::default(),
            Duration::from_millis(50),
            ShutdownToken::new(),
        );

        let err = client
            .request(&HttpRequest::get("https://api.github.com/slow"))
            .await
            .unwrap_err();

        match err {
            MinerError::Timeout { url, .. } => assert_eq!(url, "https://api.github.com/slow"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
