// Result model shared by every adapter

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

use super::errors::{Error, Result};
use super::watermark;

/// Supported platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Douyin,
    Xiaohongshu,
    Bilibili,
    Weibo,
    Kuaishou,
    Zhihu,
    Youtube,
    Twitter,
    Goofish,
}

impl Platform {
    pub const ALL: [Platform; 9] = [
        Platform::Douyin,
        Platform::Xiaohongshu,
        Platform::Bilibili,
        Platform::Weibo,
        Platform::Kuaishou,
        Platform::Zhihu,
        Platform::Youtube,
        Platform::Twitter,
        Platform::Goofish,
    ];

    /// Key used in the credentials file and JSON output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Douyin => "douyin",
            Self::Xiaohongshu => "xiaohongshu",
            Self::Bilibili => "bilibili",
            Self::Weibo => "weibo",
            Self::Kuaishou => "kuaishou",
            Self::Zhihu => "zhihu",
            Self::Youtube => "youtube",
            Self::Twitter => "twitter",
            Self::Goofish => "goofish",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Douyin => "Douyin",
            Self::Xiaohongshu => "Xiaohongshu",
            Self::Bilibili => "Bilibili",
            Self::Weibo => "Weibo",
            Self::Kuaishou => "Kuaishou",
            Self::Zhihu => "Zhihu",
            Self::Youtube => "YouTube",
            Self::Twitter => "X/Twitter",
            Self::Goofish => "Goofish",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        let platform = match lower.as_str() {
            "douyin" => Self::Douyin,
            "xiaohongshu" | "xhs" => Self::Xiaohongshu,
            "bilibili" => Self::Bilibili,
            "weibo" => Self::Weibo,
            "kuaishou" => Self::Kuaishou,
            "zhihu" => Self::Zhihu,
            "youtube" => Self::Youtube,
            "twitter" | "x" => Self::Twitter,
            "goofish" | "xianyu" => Self::Goofish,
            _ => return Err(Error::UnsupportedPlatform(s.to_string())),
        };
        Ok(platform)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    /// Platform user id; empty when the source page does not expose one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub nickname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Platform-specific handle (unique_id, screen_name, url token)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
}

impl Author {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            avatar_url: None,
            handle: None,
        }
    }

    pub fn with_avatar(mut self, avatar_url: Option<String>) -> Self {
        self.avatar_url = avatar_url;
        self
    }

    pub fn with_handle(mut self, handle: Option<String>) -> Self {
        self.handle = handle;
        self
    }
}

/// Engagement counters. `None` means the platform did not say.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collects: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reposts: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coins: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub danmaku: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

impl MediaKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Video => "mp4",
            Self::Image => "jpg",
            Self::Audio => "m4a",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub is_watermarked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl MediaItem {
    /// Build a media entry, removing the platform's watermark markers from `url`
    pub fn new(platform: Platform, url: &str, kind: MediaKind) -> Self {
        Self {
            url: watermark::strip(platform, url),
            kind,
            is_watermarked: false,
            width: None,
            height: None,
        }
    }

    pub fn video(platform: Platform, url: &str) -> Self {
        Self::new(platform, url, MediaKind::Video)
    }

    pub fn image(platform: Platform, url: &str) -> Self {
        Self::new(platform, url, MediaKind::Image)
    }

    pub fn with_size(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Music {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub author: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub create_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    /// Total replies reported by the platform, which may exceed `replies.len()`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn new(id: impl Into<String>, author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            content: content.into(),
            ip_location: None,
            avatar: None,
            create_time: None,
            like_count: None,
            reply_count: None,
            replies: Vec::new(),
        }
    }

    /// Keep the tree at two levels: this comment and one tier of replies
    pub fn clamp_depth(&mut self) {
        for reply in &mut self.replies {
            reply.replies.clear();
        }
    }

    /// Replies the platform reports but did not inline
    pub fn has_more_replies(&self) -> bool {
        self.reply_count
            .map(|total| total as usize > self.replies.len())
            .unwrap_or(false)
    }
}

/// Output of the optional OCR/LLM analysis step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Text recognized in the post's images, merged with its description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Analysis {
    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.summary.is_none()
            && self.content_type.is_none()
            && self.key_points.is_empty()
            && self.tags.is_empty()
    }
}

/// One part of a multi-part video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// 1-based
    pub page: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Canonical extraction result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractResult {
    pub platform: Platform,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub create_time: Option<OffsetDateTime>,
    /// Seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub music: Option<Music>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ad: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<Part>,
    pub author: Author,
    #[serde(default)]
    pub stats: Stats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Analysis>,
}

impl ExtractResult {
    pub fn new(platform: Platform, url: impl Into<String>, title: impl Into<String>, author: Author) -> Self {
        Self {
            platform,
            url: url.into(),
            content_id: None,
            title: title.into(),
            description: None,
            create_time: None,
            duration: None,
            cover_url: None,
            media: Vec::new(),
            music: None,
            location: None,
            is_ad: None,
            tags: Vec::new(),
            parts: Vec::new(),
            author,
            stats: Stats::default(),
            comments: Vec::new(),
            analysis: None,
        }
    }

    pub fn has_video(&self) -> bool {
        self.media.iter().any(|m| m.kind == MediaKind::Video)
    }

    /// Enforce the success contract before a result leaves the engine
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::parse(self.platform, "title is empty"));
        }
        if self.author.nickname.trim().is_empty() {
            return Err(Error::parse(self.platform, "author nickname is empty"));
        }
        if let Some(item) = self
            .media
            .iter()
            .find(|m| m.is_watermarked || watermark::has_marker(self.platform, &m.url))
        {
            return Err(Error::parse(
                self.platform,
                format!("watermarked media slipped through: {}", item.url),
            ));
        }
        Ok(())
    }
}
