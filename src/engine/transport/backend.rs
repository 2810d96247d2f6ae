// HTTP backends
//
// `HttpBackend` performs exactly one exchange. Retries, redirects and logging live in
// `Transport`, so a backend never follows redirects on its own.

use async_trait::async_trait;
use std::fmt;

use super::retry::FailureKind;
use super::{HttpRequest, HttpResponse, Method};
use crate::engine::config::EngineConfig;
use crate::engine::errors::{Error, Result};

/// Failure before a status line was received
#[derive(Debug, Clone)]
pub struct SendError {
    pub kind: FailureKind,
    pub message: String,
}

impl SendError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[async_trait]
pub trait HttpBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, SendError>;
}

/// reqwest client; one instance holds the per-host connection pool for the process
pub struct ReqwestBackend {
    client: reqwest::Client,
}

impl ReqwestBackend {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(8);

        if let Some(proxy_url) = config.proxy.as_deref() {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::config("proxy", format!("invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config("http client", e.to_string()))?;
        Ok(Self { client })
    }

    fn classify(err: reqwest::Error) -> SendError {
        let message = err.to_string();
        let detail = format!("{:?}", err).to_lowercase();
        let kind = if err.is_timeout() {
            FailureKind::Timeout
        } else if detail.contains("dns error")
            || detail.contains("failed to lookup address")
            || detail.contains("name or service not known")
        {
            FailureKind::Dns
        } else if err.is_connect() || err.is_request() || err.is_body() {
            FailureKind::Connect
        } else {
            FailureKind::Other
        };
        SendError::new(kind, message)
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, SendError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(Self::classify)?;
        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await.map_err(Self::classify)?.to_vec();

        Ok(HttpResponse {
            status,
            url,
            headers,
            body,
        })
    }
}
