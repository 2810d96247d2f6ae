// YouTube - media resolved through yt-dlp and reshaped into a result

use async_trait::async_trait;
use tracing::debug;

use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, ExtractResult, MediaItem, MediaKind, Platform, Stats};
use crate::engine::resolver::ResolvedMedia;
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::utils;

const PLATFORM: Platform = Platform::Youtube;
const MAX_TAGS: usize = 20;

/// Resolver output → result for any resolver-backed platform
pub(crate) fn from_resolved(platform: Platform, url: &str, media: &ResolvedMedia) -> Result<ExtractResult> {
    let description = media.description.clone().filter(|d| !d.trim().is_empty());
    let title = media
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| description.as_deref().map(utils::title_from_text))
        .ok_or_else(|| Error::parse(platform, "resolver returned no title"))?;

    let nickname = media
        .channel
        .clone()
        .or_else(|| media.uploader.clone())
        .unwrap_or_default();
    let id = media
        .channel_id
        .clone()
        .or_else(|| media.uploader_id.clone())
        .unwrap_or_default();
    let author = Author::new(id, nickname).with_handle(media.uploader_id.clone());

    let mut result = ExtractResult::new(platform, url, title, author);
    result.content_id = media.id.clone();
    result.description = description;
    result.create_time = media
        .timestamp
        .and_then(utils::from_unix)
        .or_else(|| media.upload_date.as_deref().and_then(utils::parse_compact_date));
    result.duration = media.duration.map(|d| d.round() as u64).filter(|d| *d > 0);
    result.cover_url = media.thumbnail.clone();
    result.tags = media.tags.clone().unwrap_or_default().into_iter().take(MAX_TAGS).collect();
    result.stats = Stats {
        likes: media.like_count,
        comments_count: media.comment_count,
        views: media.view_count,
        reposts: media.repost_count,
        ..Stats::default()
    };

    if let Some(best) = media.best_progressive() {
        if let Some(src) = &best.url {
            result.media.push(MediaItem::video(platform, src).with_size(best.width, best.height));
        }
    } else {
        // split streams: best video plus best audio, muxed by the downloader's user
        if let Some(video) = media.best_video_only() {
            if let Some(src) = &video.url {
                result.media.push(MediaItem::video(platform, src).with_size(video.width, video.height));
            }
        }
        if let Some(src) = media.best_audio_only().and_then(|f| f.url.clone()) {
            result.media.push(MediaItem::new(platform, &src, MediaKind::Audio));
        }
    }
    if result.media.is_empty() {
        if let Some(src) = &media.url {
            result.media.push(MediaItem::video(platform, src));
        }
    }
    Ok(result)
}

#[derive(Debug, Default)]
pub struct Youtube;

impl Youtube {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for Youtube {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let resolved = ctx.resolver.resolve(PLATFORM, url, ctx.credentials).await?;
        debug!(
            platform = "youtube",
            url,
            resolver = ctx.resolver.name(),
            formats = resolved.formats().len(),
            "resolved"
        );
        let result = from_resolved(PLATFORM, url, &resolved)?;
        if result.media.is_empty() {
            return Err(Error::extraction(
                PLATFORM,
                ExtractionReason::Unsupported,
                "no direct downloadable format (manifest-only stream)",
            ));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::credentials::Credentials;
    use crate::engine::resolver::ResolvedFormat;
    use crate::engine::testing::{transport, FakeBackend, FakeResolver};
    use crate::engine::watermark;
    use std::sync::Arc;

    const WATCH_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    fn format(id: &str, v: &str, a: &str, height: u32) -> ResolvedFormat {
        ResolvedFormat {
            format_id: Some(id.to_string()),
            url: Some(format!("https://rr1.googlevideo.com/videoplayback?itag={}", id)),
            vcodec: Some(v.to_string()),
            acodec: Some(a.to_string()),
            height: Some(height),
            width: Some(height * 16 / 9),
            protocol: Some("https".to_string()),
            ..Default::default()
        }
    }

    fn resolved() -> ResolvedMedia {
        ResolvedMedia {
            id: Some("dQw4w9WgXcQ".into()),
            title: Some("Never Gonna Give You Up".into()),
            channel: Some("Rick Astley".into()),
            channel_id: Some("UCuAXFkgsw1L7xaCfnd5JJOw".into()),
            duration: Some(212.4),
            view_count: Some(1_500_000_000),
            upload_date: Some("20091025".into()),
            formats: Some(vec![format("18", "avc1", "mp4a", 360), format("137", "avc1", "none", 1080)]),
            ..Default::default()
        }
    }

    #[test]
    fn test_reshape_progressive() {
        let result = from_resolved(PLATFORM, WATCH_URL, &resolved()).unwrap();
        assert_eq!(result.author.nickname, "Rick Astley");
        assert_eq!(result.duration, Some(212));
        assert_eq!(result.stats.likes, None);
        assert_eq!(result.stats.views, Some(1_500_000_000));
        assert_eq!(result.media.len(), 1);
        assert_eq!(result.media[0].height, Some(360));
        assert!(result.create_time.is_some());
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_reshape_split_streams() {
        let mut media = resolved();
        media.formats = Some(vec![format("137", "avc1", "none", 1080), format("140", "none", "mp4a", 0)]);
        let result = from_resolved(PLATFORM, WATCH_URL, &media).unwrap();
        assert_eq!(result.media.len(), 2);
        assert_eq!(result.media[0].kind, MediaKind::Video);
        assert_eq!(result.media[1].kind, MediaKind::Audio);
    }

    #[tokio::test]
    async fn test_extract_via_resolver() {
        let backend = Arc::new(FakeBackend::new());
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        resolver.answer(WATCH_URL, resolved());
        let creds = Credentials::default();
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let result = Youtube::new().extract(ctx, WATCH_URL).await.unwrap();
        assert_eq!(result.title, "Never Gonna Give You Up");
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_manifest_only_is_unsupported() {
        let backend = Arc::new(FakeBackend::new());
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let mut media = resolved();
        media.formats = Some(vec![]);
        resolver.answer(WATCH_URL, media);
        let creds = Credentials::default();
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let err = Youtube::new().extract(ctx, WATCH_URL).await.unwrap_err();
        assert_eq!(err.reason(), Some(ExtractionReason::Unsupported));
    }

    #[test]
    fn test_format_watermark_param_is_stripped() {
        let mut media = resolved();
        let mut marked = format("18", "avc1", "mp4a", 360);
        marked.url = Some("https://rr1.googlevideo.com/videoplayback?itag=18&watermark=1".into());
        media.formats = Some(vec![marked]);
        let result = from_resolved(PLATFORM, WATCH_URL, &media).unwrap();
        assert_eq!(result.media[0].url, "https://rr1.googlevideo.com/videoplayback?itag=18");
        assert!(result.media.iter().all(|m| !watermark::has_marker(PLATFORM, &m.url)));
        assert!(result.validate().is_ok());
    }
}
