// Engine configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::credentials::CredentialStore;
use super::transport::RetryPolicy;

/// How the external media resolver is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolverMode {
    /// `python3 -m yt_dlp`
    Python,
    /// `yt-dlp` binary
    Cli,
    /// Binary first, python module as fallback
    #[default]
    Auto,
}

impl fmt::Display for ResolverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::Cli => write!(f, "cli"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for ResolverMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" => Ok(Self::Python),
            "cli" => Ok(Self::Cli),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown resolver mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub mode: ResolverMode,
    /// Explicit yt-dlp binary
    pub binary: Option<String>,
    /// Explicit python interpreter
    pub python: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mode: ResolverMode::Auto,
            binary: None,
            python: None,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whole-request timeout (connect + read)
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub max_redirects: usize,
    /// Minimum spacing between requests to one platform
    pub request_interval: Duration,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    pub credentials_path: Option<PathBuf>,
    pub resolver: ResolverConfig,
    /// Concurrent items in a batch run
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            max_redirects: 5,
            request_interval: Duration::from_millis(500),
            proxy: None,
            credentials_path: CredentialStore::default_path(),
            resolver: ResolverConfig::default(),
            concurrency: 4,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `SHAREGRAB_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_parse::<u64>("SHAREGRAB_TIMEOUT").filter(|s| *s > 0) {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_parse::<u64>("SHAREGRAB_REQUEST_INTERVAL_MS") {
            config.request_interval = Duration::from_millis(ms);
        }
        if let Some(proxy) = env_string("SHAREGRAB_PROXY") {
            config.proxy = Some(proxy);
        }
        if let Some(path) = env_string("SHAREGRAB_COOKIES") {
            config.credentials_path = Some(PathBuf::from(path));
        }
        if let Some(mode) = env_parse::<ResolverMode>("SHAREGRAB_RESOLVER") {
            config.resolver.mode = mode;
        }
        if let Some(python) = env_string("YTDLP_PYTHON") {
            config.resolver.python = Some(python);
        }
        config
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_credentials_path(mut self, path: Option<PathBuf>) -> Self {
        self.credentials_path = path;
        self
    }

    pub fn with_resolver_mode(mut self, mode: ResolverMode) -> Self {
        self.resolver.mode = mode;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}
