// Link router - share text / URL -> (platform, canonical URL)
//
// Classification looks at host and path shape only. The network is touched only to
// resolve short links, one hop at a time.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;
use url::Url;

use super::errors::{Error, Result};
use super::models::Platform;
use super::transport::{join_location, HttpRequest, Transport};

lazy_static! {
    static ref URL_IN_TEXT: Regex =
        Regex::new(r#"https?://[^\s<>"'，。！？、；）】」]+"#).unwrap();
    static ref BARE_LINK: Regex =
        Regex::new(r#"(?:[A-Za-z0-9-]+\.)+[A-Za-z]{2,}/[^\s<>"'，。！？、；）】」]*"#).unwrap();
    static ref RULES: Vec<Rule> = vec![
        Rule::new(
            Platform::Douyin,
            &["douyin.com", "iesdouyin.com"],
            &["v.douyin.com"],
            &[r"^/(?:video|note|share/video|share/note|share/slides)/\d+", r"[?&](?:modal_id|vid)=\d+"],
        ),
        Rule::new(
            Platform::Xiaohongshu,
            &["xiaohongshu.com"],
            &["xhslink.com", "xhs.cn"],
            &[r"^/(?:explore|discovery/item|note)/[0-9A-Za-z]+"],
        ),
        Rule::new(
            Platform::Bilibili,
            &["bilibili.com"],
            &["b23.tv", "bili2233.cn"],
            &[r"^/video/(?:BV[0-9A-Za-z]{10}|av\d+)"],
        ),
        Rule::new(
            Platform::Weibo,
            &["weibo.com", "weibo.cn"],
            &["t.cn"],
            &[r"^/(?:detail|status)/[0-9A-Za-z]+", r"^/\d+/[0-9A-Za-z]+", r"^/\d{16,}"],
        ),
        Rule::new(
            Platform::Kuaishou,
            &["kuaishou.com", "gifshow.com", "chenzhongtech.com"],
            &["v.kuaishou.com"],
            &[r"^/(?:short-video|fw/photo|photo)/[0-9A-Za-z_-]+"],
        ),
        Rule::new(
            Platform::Zhihu,
            &["zhihu.com"],
            &[],
            &[r"^/question/\d+", r"^/p/\d+", r"^/answer/\d+"],
        ),
        Rule::new(
            Platform::Youtube,
            &["youtube.com", "youtu.be"],
            &[],
            &[
                r"^/watch\?(?:.*&)?v=[\w-]{11}",
                r"^/(?:shorts|live|embed)/[\w-]{11}",
                r"^/[\w-]{11}(?:$|\?)",
            ],
        ),
        Rule::new(
            Platform::Twitter,
            &["twitter.com", "x.com", "fxtwitter.com", "vxtwitter.com", "fixupx.com"],
            &["t.co"],
            &[r"^/(?:\w+|i(?:/web)?)/status(?:es)?/\d+"],
        ),
        Rule::new(
            Platform::Goofish,
            &["goofish.com", "2.taobao.com"],
            &["m.tb.cn"],
            &[r"^/item(?:/|\.htm|\?)(?:.*[?&])?(?:id|itemId)=\d+"],
        ),
    ];
}

struct Rule {
    platform: Platform,
    hosts: &'static [&'static str],
    short_hosts: &'static [&'static str],
    paths: Vec<Regex>,
}

impl Rule {
    fn new(
        platform: Platform,
        hosts: &'static [&'static str],
        short_hosts: &'static [&'static str],
        paths: &[&str],
    ) -> Self {
        Self {
            platform,
            hosts,
            short_hosts,
            paths: paths.iter().map(|p| Regex::new(p).unwrap()).collect(),
        }
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    host == domain || host.ends_with(&format!(".{}", domain))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Canonical,
    Short,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub platform: Platform,
    pub canonical_url: String,
}

/// First URL embedded in share text
pub fn extract_url(input: &str) -> Option<String> {
    let trim = |s: &str| {
        s.trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | ']' | '!' | '?' | ';' | ':'))
            .to_string()
    };
    if let Some(m) = URL_IN_TEXT.find(input) {
        return Some(trim(m.as_str()));
    }
    BARE_LINK
        .find(input)
        .map(|m| format!("https://{}", trim(m.as_str())))
}

/// Pattern-only classification of a URL
pub fn classify(raw: &str) -> Result<(Platform, LinkKind)> {
    let url = Url::parse(raw).map_err(|_| Error::UnsupportedPlatform(raw.to_string()))?;
    let host = url
        .host_str()
        .map(|h| h.to_lowercase())
        .ok_or_else(|| Error::UnsupportedPlatform(raw.to_string()))?;
    let target = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };

    let mut known_host = None;
    for rule in RULES.iter() {
        if rule.short_hosts.iter().any(|d| host_matches(&host, d)) {
            return Ok((rule.platform, LinkKind::Short));
        }
        if rule.hosts.iter().any(|d| host_matches(&host, d)) {
            if rule.paths.iter().any(|re| re.is_match(&target)) {
                return Ok((rule.platform, LinkKind::Canonical));
            }
            known_host = Some(rule.platform);
        }
    }

    match known_host {
        Some(platform) => Err(Error::UnsupportedPlatform(format!(
            "{} link is not a post: {}",
            platform.display_name(),
            raw
        ))),
        None => Err(Error::UnsupportedPlatform(raw.to_string())),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinkRouter;

impl LinkRouter {
    pub fn new() -> Self {
        Self
    }

    pub async fn route(&self, input: &str, transport: &Transport) -> Result<Route> {
        let url = extract_url(input).ok_or_else(|| {
            Error::UnsupportedPlatform(format!("no link found in '{}'", input.trim()))
        })?;
        match classify(&url)? {
            (platform, LinkKind::Canonical) => Ok(Route {
                platform,
                canonical_url: url,
            }),
            (platform, LinkKind::Short) => self.resolve_short(platform, &url, transport).await,
        }
    }

    /// Follow redirects until a canonical link appears
    async fn resolve_short(&self, platform: Platform, short_url: &str, transport: &Transport) -> Result<Route> {
        let max_hops = transport.max_redirects();
        let mut current = short_url.to_string();
        let mut hops = 0usize;

        loop {
            let request = HttpRequest::get(current.as_str())
                .browser(true)
                .for_platform(platform);
            let response = transport
                .execute(&request)
                .await
                .map_err(|e| e.into_extraction(platform))?;

            let Some(location) = response.location().filter(|_| response.is_redirect()) else {
                // Some short links answer 200 with the final URL after internal redirects
                return match classify(&response.url) {
                    Ok((p, LinkKind::Canonical)) => Ok(Route {
                        platform: p,
                        canonical_url: response.url.clone(),
                    }),
                    _ => Err(Error::UnsupportedPlatform(format!(
                        "short link {} did not resolve to a post",
                        short_url
                    ))),
                };
            };

            hops += 1;
            if hops > max_hops {
                return Err(Error::RedirectLoop {
                    url: short_url.to_string(),
                    hops: max_hops,
                });
            }

            let next = join_location(&current, location)?;
            debug!(platform = platform.as_str(), hop = hops, from = %current, to = %next, "short link hop");
            if let Ok((p, LinkKind::Canonical)) = classify(&next) {
                return Ok(Route {
                    platform: p,
                    canonical_url: next,
                });
            }
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::errors::ExtractionReason;
    use crate::engine::testing::{transport, FakeBackend};
    use crate::engine::transport::HttpResponse;
    use std::sync::Arc;

    const CANONICAL: [(&str, Platform); 14] = [
        ("https://www.douyin.com/video/7300000000000000001", Platform::Douyin),
        ("https://www.iesdouyin.com/share/video/7300000000000000001/?region=CN", Platform::Douyin),
        ("https://www.xiaohongshu.com/explore/65a1b2c3d4e5f60718293a4b?xsec_token=AB", Platform::Xiaohongshu),
        ("https://www.bilibili.com/video/BV1xx411c7mD", Platform::Bilibili),
        ("https://m.weibo.cn/detail/4950000000000001", Platform::Weibo),
        ("https://weibo.com/1234567890/NxAbCdEfG", Platform::Weibo),
        ("https://www.kuaishou.com/short-video/3xabcdefg", Platform::Kuaishou),
        ("https://www.zhihu.com/question/123/answer/456", Platform::Zhihu),
        ("https://zhuanlan.zhihu.com/p/654321", Platform::Zhihu),
        ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Platform::Youtube),
        ("https://youtu.be/dQw4w9WgXcQ", Platform::Youtube),
        ("https://x.com/jack/status/20", Platform::Twitter),
        ("https://twitter.com/i/web/status/1700000000000000000", Platform::Twitter),
        ("https://www.goofish.com/item?id=712345678901", Platform::Goofish),
    ];

    #[tokio::test]
    async fn test_canonical_urls_route_without_network() {
        let backend = Arc::new(FakeBackend::new());
        let t = transport(&backend);
        let router = LinkRouter::new();
        for (url, platform) in CANONICAL {
            let route = router.route(url, &t).await.unwrap();
            assert_eq!(route.platform, platform, "{}", url);
            assert_eq!(route.canonical_url, url);
        }
        assert_eq!(backend.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_unrelated_url_is_unsupported() {
        let backend = Arc::new(FakeBackend::new());
        let t = transport(&backend);
        let router = LinkRouter::new();
        for input in [
            "https://example.com/video/123",
            "https://notx.com/jack/status/20",
            "just some words",
        ] {
            let err = router.route(input, &t).await.unwrap_err();
            assert!(matches!(err, Error::UnsupportedPlatform(_)), "{}", input);
        }
        assert_eq!(backend.total_calls(), 0);
    }

    #[test]
    fn test_platform_host_without_post_path() {
        assert!(matches!(
            classify("https://www.bilibili.com/anime/"),
            Err(Error::UnsupportedPlatform(msg)) if msg.contains("not a post")
        ));
    }

    #[test]
    fn test_share_text_extraction() {
        let text = "7.43 复制打开抖音，看看【某人的作品】今天天气不错 https://v.douyin.com/ABC123/ 8@5.com :2pm";
        assert_eq!(extract_url(text).as_deref(), Some("https://v.douyin.com/ABC123/"));

        let xhs = "【小红书】好看的笔记 http://xhslink.com/a/Bcd123，复制本条信息";
        assert_eq!(extract_url(xhs).as_deref(), Some("http://xhslink.com/a/Bcd123"));

        assert_eq!(
            extract_url("look b23.tv/AbCdEf").as_deref(),
            Some("https://b23.tv/AbCdEf")
        );
    }

    #[tokio::test]
    async fn test_short_link_resolution() {
        let backend = Arc::new(FakeBackend::new());
        backend.redirect(
            "https://b23.tv/AbCdEf",
            "https://www.bilibili.com/video/BV1xx411c7mD?share_source=copy",
        );
        let route = LinkRouter::new()
            .route("check this https://b23.tv/AbCdEf", &transport(&backend))
            .await
            .unwrap();
        assert_eq!(route.platform, Platform::Bilibili);
        assert_eq!(
            route.canonical_url,
            "https://www.bilibili.com/video/BV1xx411c7mD?share_source=copy"
        );
        assert_eq!(backend.total_calls(), 1);
    }

    #[tokio::test]
    async fn test_short_link_loop() {
        let backend = Arc::new(FakeBackend::new());
        backend.redirect("https://t.cn/A1", "https://t.cn/A2");
        backend.redirect("https://t.cn/A2", "https://t.cn/A1");
        let err = LinkRouter::new()
            .route("https://t.cn/A1", &transport(&backend))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RedirectLoop { hops: 5, .. }));
        assert_eq!(backend.total_calls(), 6);
    }

    #[tokio::test]
    async fn test_dead_short_link_is_not_found() {
        let backend = Arc::new(FakeBackend::new());
        let url = "https://b23.tv/Gone12";
        backend.always(url, HttpResponse::new(404, url, "gone"));
        let err = LinkRouter::new()
            .route(url, &transport(&backend))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::Extraction { platform: Platform::Bilibili, reason: ExtractionReason::NotFound, .. }),
            "{:?}",
            err
        );
        assert_eq!(backend.calls(url), 1);
    }

    #[tokio::test]
    async fn test_throttled_short_link_is_rate_limited() {
        let backend = Arc::new(FakeBackend::new());
        let url = "https://v.douyin.com/Busy99/";
        backend.always(url, HttpResponse::new(429, url, "slow down"));
        let err = LinkRouter::new()
            .route(url, &transport(&backend))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), Some(ExtractionReason::RateLimited));
        assert!(matches!(err, Error::Extraction { platform: Platform::Douyin, .. }));
        assert_eq!(backend.calls(url), 3);
    }
}
