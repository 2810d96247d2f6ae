// Media download to a local directory

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::errors::Result;
use super::models::{ExtractResult, MediaItem, Platform};
use super::transport::{HttpRequest, Transport};

const NAME_CHARS: usize = 40;

/// Referer some CDNs insist on (Bilibili answers 403 without it)
pub fn media_referer(platform: Platform) -> Option<&'static str> {
    match platform {
        Platform::Douyin => Some("https://www.douyin.com/"),
        Platform::Xiaohongshu => Some("https://www.xiaohongshu.com/"),
        Platform::Bilibili => Some("https://www.bilibili.com/"),
        Platform::Weibo => Some("https://weibo.com/"),
        Platform::Kuaishou => Some("https://www.kuaishou.com/"),
        Platform::Zhihu => Some("https://www.zhihu.com/"),
        Platform::Goofish => Some("https://www.goofish.com/"),
        Platform::Youtube | Platform::Twitter => None,
    }
}

/// GET for a media URL with the platform's referer
pub fn media_request(platform: Platform, url: &str) -> HttpRequest {
    let request = HttpRequest::get(url).for_platform(platform).browser(false);
    match media_referer(platform) {
        Some(referer) => request.referer(referer),
        None => request,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDownload {
    pub url: String,
    pub error: String,
}

/// Outcome of one download run; failures never touch the extraction result
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub saved: Vec<PathBuf>,
    pub failed: Vec<FailedDownload>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Filesystem-safe stem: content id when known, else a shortened title
fn file_stem(result: &ExtractResult) -> String {
    let base = result.content_id.clone().unwrap_or_else(|| result.title.clone());
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .take(NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim_matches('_');
    let cleaned = if cleaned.is_empty() { "media" } else { cleaned };
    format!("{}_{}", result.platform.as_str(), cleaned)
}

pub fn file_name(result: &ExtractResult, index: usize, item: &MediaItem) -> String {
    format!("{}_{}.{}", file_stem(result), index + 1, item.kind.extension())
}

async fn fetch_one(transport: &Transport, platform: Platform, item: &MediaItem, path: &Path) -> Result<()> {
    let response = transport.follow(media_request(platform, &item.url)).await?;
    tokio::fs::write(path, &response.body).await?;
    Ok(())
}

/// Save every media item of `result` under `dir`
pub async fn download_media(transport: &Transport, result: &ExtractResult, dir: &Path) -> Result<DownloadReport> {
    tokio::fs::create_dir_all(dir).await?;
    let mut report = DownloadReport::default();

    for (index, item) in result.media.iter().enumerate() {
        let path = dir.join(file_name(result, index, item));
        debug!(platform = result.platform.as_str(), url = %item.url, path = %path.display(), "downloading");
        match fetch_one(transport, result.platform, item, &path).await {
            Ok(()) => report.saved.push(path),
            Err(e) => {
                warn!(platform = result.platform.as_str(), url = %item.url, stage = "download", error = %e, "media download failed");
                report.failed.push(FailedDownload {
                    url: item.url.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        platform = result.platform.as_str(),
        saved = report.saved.len(),
        failed = report.failed.len(),
        "download finished"
    );
    Ok(report)
}
