// Resolver diagnostics - classifies yt-dlp stderr
//
// The resolver only reports free text; this maps it onto the engine's error taxonomy so a
// caller can tell whether cookies, a later retry or nothing at all would help.

use serde::{Deserialize, Serialize};

use crate::engine::errors::{Error, ExtractionReason, TransportErrorKind};
use crate::engine::models::Platform;

/// Why the resolver refused a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockingReason {
    /// HTTP 403 Forbidden
    Http403Forbidden,
    /// Login or cookies required (age gate, private post, sign-in wall)
    LoginRequired,
    /// Channel-membership or paid content
    MembersOnly,
    /// Bot detection / captcha / proof-of-origin token
    BotDetection,
    /// HTTP 429 or explicit rate limiting
    RateLimited,
    /// Deleted or never existed
    Unavailable,
    /// Not available in this region
    GeoBlocked,
    /// DRM-protected stream
    DrmProtected,
    /// URL the resolver does not know how to handle
    UnsupportedUrl,
    /// Network timeout
    NetworkTimeout,
    /// Network failure other than a timeout
    NetworkError,
    Unknown,
}

impl BlockingReason {
    /// Check if cookies might help
    pub fn cookies_might_help(&self) -> bool {
        matches!(
            self,
            Self::Http403Forbidden | Self::LoginRequired | Self::MembersOnly | Self::BotDetection
        )
    }

    /// Check if this is a permanent restriction (no workaround)
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::DrmProtected | Self::Unavailable | Self::UnsupportedUrl)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Http403Forbidden => "Access denied (HTTP 403)",
            Self::LoginRequired => "Login required",
            Self::MembersOnly => "Members-only content",
            Self::BotDetection => "Bot detection triggered",
            Self::RateLimited => "Rate limited",
            Self::Unavailable => "Content unavailable",
            Self::GeoBlocked => "Geographic restriction",
            Self::DrmProtected => "DRM-protected content",
            Self::UnsupportedUrl => "Unsupported URL",
            Self::NetworkTimeout => "Network timeout",
            Self::NetworkError => "Network error",
            Self::Unknown => "Unknown resolver failure",
        }
    }

    /// Extraction reason for the non-network cases
    pub fn extraction_reason(&self) -> Option<ExtractionReason> {
        match self {
            Self::Http403Forbidden | Self::LoginRequired | Self::MembersOnly | Self::BotDetection => {
                Some(ExtractionReason::AuthRequired)
            }
            Self::RateLimited => Some(ExtractionReason::RateLimited),
            Self::Unavailable => Some(ExtractionReason::NotFound),
            Self::GeoBlocked | Self::DrmProtected | Self::UnsupportedUrl => {
                Some(ExtractionReason::Unsupported)
            }
            Self::Unknown => Some(ExtractionReason::ParseFailed),
            Self::NetworkTimeout | Self::NetworkError => None,
        }
    }

    /// Engine error for a resolver failure on `url`
    pub fn into_error(self, platform: Platform, url: &str, detail: &str) -> Error {
        match self.extraction_reason() {
            Some(reason) if self.cookies_might_help() => Error::extraction(
                platform,
                reason,
                format!("{}: {} (logged-in cookies may help)", self.description(), detail),
            ),
            Some(reason) => Error::extraction(
                platform,
                reason,
                format!("{}: {}", self.description(), detail),
            ),
            None => Error::Transport {
                kind: if self == Self::NetworkTimeout {
                    TransportErrorKind::Timeout
                } else {
                    TransportErrorKind::ConnectionFailed
                },
                url: url.to_string(),
                attempts: 1,
                message: detail.to_string(),
            },
        }
    }
}

/// Analyze an error message and return the blocking reason
pub fn diagnose_error(error: &str) -> Option<BlockingReason> {
    let lower = error.to_lowercase();

    if lower.contains("drm")
        || lower.contains("widevine")
        || lower.contains("playready")
        || lower.contains("fairplay")
        || lower.contains("requires purchase")
    {
        return Some(BlockingReason::DrmProtected);
    }

    if lower.contains("members only")
        || lower.contains("members-only")
        || lower.contains("join this channel")
        || lower.contains("membership required")
    {
        return Some(BlockingReason::MembersOnly);
    }

    if lower.contains("unsupported url") || lower.contains("no suitable extractor") {
        return Some(BlockingReason::UnsupportedUrl);
    }

    if lower.contains("confirm you're not a bot")
        || lower.contains("confirm you’re not a bot")
        || lower.contains("captcha")
        || lower.contains("unusual traffic")
        || lower.contains("po token")
    {
        return Some(BlockingReason::BotDetection);
    }

    if lower.contains("sign in to confirm your age")
        || lower.contains("age-restricted")
        || lower.contains("private video")
        || lower.contains("video is private")
        || lower.contains("login required")
        || lower.contains("requires authentication")
        || lower.contains("use --cookies")
        || lower.contains("protected tweet")
    {
        return Some(BlockingReason::LoginRequired);
    }

    if lower.contains("video unavailable")
        || lower.contains("has been removed")
        || lower.contains("no longer available")
        || lower.contains("does not exist")
        || lower.contains("http error 404")
        || lower.contains("no video could be found")
    {
        return Some(BlockingReason::Unavailable);
    }

    if lower.contains("not available in your country")
        || lower.contains("blocked in your country")
        || lower.contains("geo restrict")
        || lower.contains("geo-restrict")
    {
        return Some(BlockingReason::GeoBlocked);
    }

    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        return Some(BlockingReason::RateLimited);
    }

    if lower.contains("403") || lower.contains("forbidden") {
        return Some(BlockingReason::Http403Forbidden);
    }

    if lower.contains("timed out") || lower.contains("timeout") {
        return Some(BlockingReason::NetworkTimeout);
    }

    if lower.contains("connection refused")
        || lower.contains("network is unreachable")
        || lower.contains("name or service not known")
        || lower.contains("getaddrinfo failed")
    {
        return Some(BlockingReason::NetworkError);
    }

    if !error.trim().is_empty() {
        return Some(BlockingReason::Unknown);
    }

    None
}

/// First line worth showing from a resolver's stderr
pub fn error_context(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| l.to_lowercase().starts_with("error:"))
        .or_else(|| stderr.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("resolver failed without output")
        .to_string()
}
