// External media resolver (yt-dlp) used by video platforms without a native
// unwatermarked API

pub mod diagnostics;
pub mod ytdlp;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::credentials::Credentials;
use super::errors::Result;
use super::models::Platform;
pub use ytdlp::YtDlpResolver;

/// One format from the resolver's format list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFormat {
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// Total bitrate in kbps
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub protocol: Option<String>,
}

impl ResolvedFormat {
    pub fn has_video(&self) -> bool {
        self.vcodec.as_deref().map_or(false, |v| v != "none")
    }

    pub fn has_audio(&self) -> bool {
        self.acodec.as_deref().map_or(false, |a| a != "none")
    }

    /// Direct HTTP download (not a manifest)
    pub fn is_direct(&self) -> bool {
        self.url.is_some()
            && self
                .protocol
                .as_deref()
                .map_or(true, |p| p == "https" || p == "http")
    }

    fn rank(&self) -> (u32, u64) {
        (
            self.height.unwrap_or(0),
            self.tbr.map(|t| (t * 1000.0) as u64).unwrap_or(0),
        )
    }
}

/// Subset of the resolver's JSON dump the adapters use
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMedia {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub uploader_id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    /// Direct URL when the resolver picked a single format
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub comment_count: Option<u64>,
    #[serde(default)]
    pub repost_count: Option<u64>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub formats: Option<Vec<ResolvedFormat>>,
}

impl ResolvedMedia {
    pub fn formats(&self) -> &[ResolvedFormat] {
        self.formats.as_deref().unwrap_or(&[])
    }

    /// Best format carrying both audio and video
    pub fn best_progressive(&self) -> Option<&ResolvedFormat> {
        self.formats()
            .iter()
            .filter(|f| f.is_direct() && f.has_video() && f.has_audio())
            .max_by_key(|f| f.rank())
    }

    pub fn best_video_only(&self) -> Option<&ResolvedFormat> {
        self.formats()
            .iter()
            .filter(|f| f.is_direct() && f.has_video() && !f.has_audio())
            .max_by_key(|f| f.rank())
    }

    pub fn best_audio_only(&self) -> Option<&ResolvedFormat> {
        self.formats()
            .iter()
            .filter(|f| f.is_direct() && f.has_audio() && !f.has_video())
            .max_by_key(|f| f.rank().1)
    }
}

#[async_trait]
pub trait MediaResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Resolve a page URL into metadata and direct media URLs
    async fn resolve(
        &self,
        platform: Platform,
        page_url: &str,
        credentials: &Credentials,
    ) -> Result<ResolvedMedia>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(id: &str, v: &str, a: &str, height: u32, tbr: f64) -> ResolvedFormat {
        ResolvedFormat {
            format_id: Some(id.to_string()),
            url: Some(format!("https://media.example/{}", id)),
            vcodec: Some(v.to_string()),
            acodec: Some(a.to_string()),
            height: Some(height),
            tbr: Some(tbr),
            protocol: Some("https".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_format_selection() {
        let media = ResolvedMedia {
            formats: Some(vec![
                format("18", "avc1", "mp4a", 360, 500.0),
                format("22", "avc1", "mp4a", 720, 1500.0),
                format("137", "avc1", "none", 1080, 4000.0),
                format("140", "none", "mp4a", 0, 128.0),
                format("251", "none", "opus", 0, 160.0),
            ]),
            ..Default::default()
        };
        assert_eq!(media.best_progressive().unwrap().format_id.as_deref(), Some("22"));
        assert_eq!(media.best_video_only().unwrap().format_id.as_deref(), Some("137"));
        assert_eq!(media.best_audio_only().unwrap().format_id.as_deref(), Some("251"));
    }

    #[test]
    fn test_manifest_formats_skipped() {
        let mut hls = format("hls", "avc1", "mp4a", 1080, 3000.0);
        hls.protocol = Some("m3u8_native".to_string());
        let media = ResolvedMedia {
            formats: Some(vec![hls, format("18", "avc1", "mp4a", 360, 500.0)]),
            ..Default::default()
        };
        assert_eq!(media.best_progressive().unwrap().format_id.as_deref(), Some("18"));
    }

    #[test]
    fn test_parses_null_fields() {
        let media: ResolvedMedia = serde_json::from_str(
            r#"{"id": "abc", "title": "t", "like_count": null, "tags": null, "formats": null, "duration": 12.5}"#,
        )
        .unwrap();
        assert_eq!(media.like_count, None);
        assert!(media.formats().is_empty());
        assert_eq!(media.duration, Some(12.5));
    }
}
