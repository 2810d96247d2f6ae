// Transport - pooled HTTP with retry/backoff shared by all adapters
//
// One `Transport` (and therefore one connection pool) is built per engine and shared by
// every adapter call, including concurrent batch items.

pub mod backend;
pub mod pacing;
pub mod retry;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::config::EngineConfig;
use super::credentials::Credentials;
use super::errors::{Error, Result, TransportErrorKind};
use super::models::Platform;
pub use backend::{HttpBackend, ReqwestBackend, SendError};
pub use pacing::Pacer;
pub use retry::{FailureKind, RetryDecision, RetryPolicy};

pub const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
pub const DESKTOP_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36";
pub const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Log context only
    pub platform: Option<Platform>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            platform: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn for_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Set a header, replacing any previous value of the same name
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn user_agent(self, ua: &str) -> Self {
        self.header("User-Agent", ua)
            .header("Accept-Language", ACCEPT_LANGUAGE)
    }

    /// Browser-like headers for a page or API call
    pub fn browser(self, mobile: bool) -> Self {
        self.user_agent(if mobile { MOBILE_UA } else { DESKTOP_UA })
    }

    pub fn referer(self, referer: &str) -> Self {
        self.header("Referer", referer)
    }

    /// Append cookies to the `Cookie` header
    pub fn cookie_pairs<'a, I>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let joined = pairs
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ");
        if joined.is_empty() {
            return self;
        }
        let value = match self.header_value("Cookie") {
            Some(existing) if !existing.is_empty() => format!("{}; {}", existing, joined),
            _ => joined,
        };
        self.header("Cookie", value)
    }

    /// Inject the platform's credentials (cookies and optional user agent)
    pub fn credentials(self, credentials: &Credentials) -> Self {
        let with_ua = match credentials.user_agent() {
            Some(ua) => self.header("User-Agent", ua),
            None => self,
        };
        with_ua.cookie_pairs(credentials.iter())
    }

    pub fn form(mut self, pairs: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish();
        self.body = Some(body.into_bytes());
        self.header("Content-Type", "application/x-www-form-urlencoded")
    }

    pub fn json(mut self, value: &Value) -> Self {
        self.body = Some(value.to_string().into_bytes());
        self.header("Content-Type", "application/json")
    }

    fn redirected(&self, url: String, status: u16) -> Self {
        let mut next = self.clone();
        next.url = url;
        if status == 303 || (self.method == Method::Post && matches!(status, 301 | 302)) {
            next.method = Method::Get;
            next.body = None;
            next.headers.retain(|(n, _)| !n.eq_ignore_ascii_case("Content-Type"));
        }
        next
    }

    fn log_platform(&self) -> &'static str {
        self.platform.map(|p| p.as_str()).unwrap_or("-")
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub url: String,
    /// Lowercased names; repeated headers keep every value
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            url: url.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_lowercase(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn json_value(&self) -> Result<Value> {
        self.json::<Value>()
    }

    /// `name=value` pairs from every `Set-Cookie` header
    pub fn set_cookies(&self) -> Vec<(String, String)> {
        self.headers
            .iter()
            .filter(|(n, _)| n == "set-cookie")
            .filter_map(|(_, v)| {
                let pair = v.split(';').next()?;
                let (name, value) = pair.split_once('=')?;
                let name = name.trim();
                (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
            })
            .collect()
    }
}

pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    policy: RetryPolicy,
    max_redirects: usize,
    pacer: Pacer,
}

impl Transport {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let backend = ReqwestBackend::new(config)?;
        Ok(Self::with_backend(
            Arc::new(backend),
            config.retry.clone(),
            config.max_redirects,
        )
        .with_pacing(config.request_interval))
    }

    pub fn with_backend(backend: Arc<dyn HttpBackend>, policy: RetryPolicy, max_redirects: usize) -> Self {
        Self {
            backend,
            policy,
            max_redirects,
            pacer: Pacer::new(Duration::ZERO),
        }
    }

    /// Space requests to one platform (or host) at least `interval` apart
    pub fn with_pacing(mut self, interval: Duration) -> Self {
        self.pacer = Pacer::new(interval);
        self
    }

    pub fn max_redirects(&self) -> usize {
        self.max_redirects
    }

    /// Send `request`, retrying transient failures.
    ///
    /// 2xx and 3xx come back as `Ok`; any other status becomes `Error::Status`.
    pub async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let platform = request.log_platform();
        let mut attempt: u32 = 1;

        loop {
            self.pacer.wait(request).await;
            let (kind, message) = match self.backend.send(request).await {
                Ok(response) if response.status < 400 => {
                    debug!(platform, url = %request.url, status = response.status, attempt, "response");
                    return Ok(response);
                }
                Ok(response) => (
                    FailureKind::Status(response.status),
                    format!("HTTP {}", response.status),
                ),
                Err(e) => (e.kind, e.message),
            };

            match self.policy.decide(attempt, kind) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        platform,
                        url = %request.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    warn!(
                        platform,
                        url = %request.url,
                        attempt,
                        error = %message,
                        "request failed"
                    );
                    return Err(Self::final_error(kind, &request.url, attempt, message));
                }
            }
        }
    }

    fn final_error(kind: FailureKind, url: &str, attempts: u32, message: String) -> Error {
        let transport = |kind| Error::Transport {
            kind,
            url: url.to_string(),
            attempts,
            message: message.clone(),
        };
        match kind {
            FailureKind::Status(status) if (500..=599).contains(&status) => {
                transport(TransportErrorKind::ServerError(status))
            }
            FailureKind::Status(status) => Error::Status {
                status,
                url: url.to_string(),
            },
            FailureKind::Timeout => transport(TransportErrorKind::Timeout),
            FailureKind::Connect | FailureKind::Dns | FailureKind::Other => {
                transport(TransportErrorKind::ConnectionFailed)
            }
        }
    }

    /// Execute and follow redirects, at most `max_redirects` hops
    pub async fn follow(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut current = request;
        for _ in 0..=self.max_redirects {
            let mut response = self.execute(&current).await?;
            response.url = current.url.clone();
            if !response.is_redirect() {
                return Ok(response);
            }
            let Some(location) = response.location() else {
                return Ok(response);
            };
            let next = join_location(&current.url, location)?;
            debug!(platform = current.log_platform(), from = %current.url, to = %next, "redirect");
            current = current.redirected(next, response.status);
        }
        warn!(platform = current.log_platform(), url = %current.url, hops = self.max_redirects, "redirect limit exceeded");
        Err(Error::RedirectLoop {
            url: current.url,
            hops: self.max_redirects,
        })
    }
}

/// Resolve a `Location` header against the URL that produced it
pub fn join_location(base: &str, location: &str) -> Result<String> {
    let invalid = |e: url::ParseError| Error::Transport {
        kind: TransportErrorKind::ConnectionFailed,
        url: base.to_string(),
        attempts: 1,
        message: format!("invalid redirect target {}: {}", location, e),
    };
    let base = Url::parse(base).map_err(invalid)?;
    let next = base.join(location).map_err(invalid)?;
    Ok(next.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeBackend;

    fn transport(backend: &Arc<FakeBackend>) -> Transport {
        Transport::with_backend(backend.clone(), RetryPolicy::immediate(3), 5)
    }

    #[tokio::test]
    async fn test_retries_503_twice_then_succeeds() {
        let backend = Arc::new(FakeBackend::new());
        let url = "https://api.bilibili.com/x/web-interface/view?bvid=BV1";
        backend.push(url, HttpResponse::new(503, url, ""));
        backend.push(url, HttpResponse::new(503, url, ""));
        backend.push(url, HttpResponse::new(200, url, "{}"));

        let response = transport(&backend)
            .execute(&HttpRequest::get(url))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(backend.calls(url), 3);
    }

    #[tokio::test]
    async fn test_pacing_spaces_same_platform() {
        let backend = Arc::new(FakeBackend::new());
        let url = "https://api.bilibili.com/x/web-interface/view?bvid=BV1";
        backend.always(url, HttpResponse::new(200, url, "{}"));
        let transport = transport(&backend).with_pacing(Duration::from_millis(150));
        let request = HttpRequest::get(url).for_platform(Platform::Bilibili);

        let started = std::time::Instant::now();
        transport.execute(&request).await.unwrap();
        transport.execute(&request).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(140));
        assert_eq!(backend.calls(url), 2);
    }

    #[tokio::test]
    async fn test_404_is_not_retried() {
        let backend = Arc::new(FakeBackend::new());
        let url = "https://www.zhihu.com/question/1";
        backend.always(url, HttpResponse::new(404, url, "gone"));

        let err = transport(&backend)
            .execute(&HttpRequest::get(url))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(backend.calls(url), 1);
    }

    #[tokio::test]
    async fn test_exhausted_503_is_transport_error() {
        let backend = Arc::new(FakeBackend::new());
        let url = "https://weibo.com/ajax/statuses/show?id=1";
        backend.always(url, HttpResponse::new(503, url, ""));

        let err = transport(&backend)
            .execute(&HttpRequest::get(url))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                kind: TransportErrorKind::ServerError(503),
                attempts: 3,
                ..
            }
        ));
        assert_eq!(backend.calls(url), 3);
    }

    #[tokio::test]
    async fn test_timeouts_retry_and_dns_does_not() {
        let backend = Arc::new(FakeBackend::new());
        let slow = "https://slow.example/";
        let dead = "https://no-such-host.example/";
        backend.push_error(slow, SendError::new(FailureKind::Timeout, "timed out"));
        backend.push(slow, HttpResponse::new(200, slow, "ok"));
        backend.push_error(dead, SendError::new(FailureKind::Dns, "dns error"));

        let t = transport(&backend);
        assert!(t.execute(&HttpRequest::get(slow)).await.is_ok());
        assert_eq!(backend.calls(slow), 2);

        let err = t.execute(&HttpRequest::get(dead)).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Transport {
                kind: TransportErrorKind::ConnectionFailed,
                attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_follow_caps_hops() {
        let backend = Arc::new(FakeBackend::new());
        for i in 0..10 {
            let from = format!("https://loop.example/{}", i);
            let to = format!("/{}", i + 1);
            backend.always(&from, HttpResponse::new(302, from.as_str(), "").with_header("Location", to));
        }
        let err = transport(&backend)
            .follow(HttpRequest::get("https://loop.example/0"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RedirectLoop { hops: 5, .. }));
        assert_eq!(backend.total_calls(), 6);
    }

    #[tokio::test]
    async fn test_follow_returns_final_url() {
        let backend = Arc::new(FakeBackend::new());
        backend.always(
            "https://b23.tv/abc",
            HttpResponse::new(302, "https://b23.tv/abc", "")
                .with_header("Location", "https://www.bilibili.com/video/BV1xx411c7mD"),
        );
        backend.always(
            "https://www.bilibili.com/video/BV1xx411c7mD",
            HttpResponse::new(200, "https://www.bilibili.com/video/BV1xx411c7mD", "<html></html>"),
        );
        let response = transport(&backend)
            .follow(HttpRequest::get("https://b23.tv/abc"))
            .await
            .unwrap();
        assert_eq!(response.url, "https://www.bilibili.com/video/BV1xx411c7mD");
    }

    #[test]
    fn test_cookie_header_merges() {
        let request = HttpRequest::get("https://x.example")
            .cookie_pairs([("a", "1")])
            .cookie_pairs([("b", "2"), ("c", "3")]);
        assert_eq!(request.header_value("cookie"), Some("a=1; b=2; c=3"));
    }

    #[test]
    fn test_set_cookie_parsing() {
        let response = HttpResponse::new(200, "https://passport.weibo.com", "")
            .with_header("Set-Cookie", "SUB=abc; Path=/; HttpOnly")
            .with_header("Set-Cookie", "SUBP=def; Domain=.weibo.com");
        assert_eq!(
            response.set_cookies(),
            vec![
                ("SUB".to_string(), "abc".to_string()),
                ("SUBP".to_string(), "def".to_string())
            ]
        );
    }
}
