// Error taxonomy for the extraction engine
//
// Callers see five families: unsupported input, redirect loops, extraction failures with a
// precise reason, transport failures after retries ran out, and configuration errors.
// `Status` and `Json` only live inside the engine and are normalized before they leave it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::models::Platform;

/// Why an adapter could not produce a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionReason {
    /// Login cookies are required (or were rejected)
    AuthRequired,
    /// The platform throttled us
    RateLimited,
    /// Deleted, private or never existed
    NotFound,
    /// The response did not have the expected shape
    ParseFailed,
    /// The link or capability is not supported
    Unsupported,
}

impl ExtractionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::RateLimited => "rate_limited",
            Self::NotFound => "not_found",
            Self::ParseFailed => "parse_failed",
            Self::Unsupported => "unsupported",
        }
    }

    /// Check if retrying with cookies might help
    pub fn cookies_might_help(&self) -> bool {
        matches!(self, Self::AuthRequired | Self::RateLimited)
    }

    /// Check if a later retry might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// Classify a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthRequired,
            404 | 410 => Self::NotFound,
            429 => Self::RateLimited,
            _ => Self::ParseFailed,
        }
    }
}

impl fmt::Display for ExtractionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport failure kinds that survive the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ConnectionFailed,
    /// 5xx still returned on the last attempt
    ServerError(u16),
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::ServerError(status) => write!(f, "server_error({})", status),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("redirect loop: {url} did not settle within {hops} hops")]
    RedirectLoop { url: String, hops: usize },

    #[error("{platform} extraction failed ({reason}): {detail}")]
    Extraction {
        platform: Platform,
        reason: ExtractionReason,
        detail: String,
    },

    #[error("transport {kind} for {url} after {attempts} attempt(s): {message}")]
    Transport {
        kind: TransportErrorKind,
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("invalid credentials file {path}: {message}")]
    Config { path: String, message: String },

    #[error("content analysis unavailable: {0}")]
    Analysis(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn extraction(
        platform: Platform,
        reason: ExtractionReason,
        detail: impl Into<String>,
    ) -> Self {
        Self::Extraction {
            platform,
            reason,
            detail: detail.into(),
        }
    }

    pub fn parse(platform: Platform, detail: impl Into<String>) -> Self {
        Self::extraction(platform, ExtractionReason::ParseFailed, detail)
    }

    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Extraction reason, when this error maps onto one
    pub fn reason(&self) -> Option<ExtractionReason> {
        match self {
            Self::Extraction { reason, .. } => Some(*reason),
            Self::Status { status, .. } => Some(ExtractionReason::from_status(*status)),
            Self::Json(_) => Some(ExtractionReason::ParseFailed),
            _ => None,
        }
    }

    /// HTTP status carried by this error
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.reason() == Some(ExtractionReason::NotFound)
    }

    /// Normalize engine-internal variants into `Extraction` for `platform`
    pub fn into_extraction(self, platform: Platform) -> Self {
        match self {
            Self::Status { status, url } => Self::extraction(
                platform,
                ExtractionReason::from_status(status),
                format!("HTTP {} from {}", status, url),
            ),
            Self::Json(e) => Self::parse(platform, format!("invalid JSON: {}", e)),
            Self::Io(e) => Self::parse(platform, e.to_string()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(ExtractionReason::from_status(403), ExtractionReason::AuthRequired);
        assert_eq!(ExtractionReason::from_status(404), ExtractionReason::NotFound);
        assert_eq!(ExtractionReason::from_status(429), ExtractionReason::RateLimited);
        assert_eq!(ExtractionReason::from_status(400), ExtractionReason::ParseFailed);
    }

    #[test]
    fn test_status_normalized_into_extraction() {
        let err = Error::Status {
            status: 404,
            url: "https://weibo.com/ajax/statuses/show?id=1".to_string(),
        }
        .into_extraction(Platform::Weibo);

        match err {
            Error::Extraction {
                platform, reason, ..
            } => {
                assert_eq!(platform, Platform::Weibo);
                assert_eq!(reason, ExtractionReason::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_transport_errors_pass_through() {
        let err = Error::Transport {
            kind: TransportErrorKind::Timeout,
            url: "https://example.com".to_string(),
            attempts: 3,
            message: "timed out".to_string(),
        }
        .into_extraction(Platform::Douyin);
        assert!(matches!(err, Error::Transport { attempts: 3, .. }));
    }

    #[test]
    fn test_cookie_hint() {
        assert!(ExtractionReason::AuthRequired.cookies_might_help());
        assert!(!ExtractionReason::NotFound.cookies_might_help());
    }
}
