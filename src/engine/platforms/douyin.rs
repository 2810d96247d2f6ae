// Douyin - share page router data, signed web detail API as fallback

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::form_urlencoded;

use super::{browser_get, fetch_json};
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, Comment, ExtractResult, MediaItem, Music, Platform, Stats};
use crate::engine::paginator::{self, CommentPage, CommentSource, Cursor};
use crate::engine::signing::ABogus;
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::transport::{HttpRequest, DESKTOP_UA};
use crate::engine::utils;

const PLATFORM: Platform = Platform::Douyin;
const SHARE_PAGE: &str = "https://www.iesdouyin.com/share/video";
const DETAIL_API: &str = "https://www.douyin.com/aweme/v1/web/aweme/detail/";
const COMMENT_API: &str = "https://www.iesdouyin.com/web/api/v2/comment/list/";
const REPLY_API: &str = "https://www.douyin.com/aweme/v1/web/comment/list/reply/";

lazy_static! {
    static ref ROUTER_DATA: Regex =
        Regex::new(r"(?s)window\._ROUTER_DATA\s*=\s*(.*?)</script>").unwrap();
    static ref PATH_ID: Regex = Regex::new(r"/(?:video|note|slides)/(\d+)").unwrap();
    static ref QUERY_ID: Regex = Regex::new(r"[?&](?:modal_id|vid)=(\d+)").unwrap();
}

/// aweme id from a canonical link
pub fn video_id(url: &str) -> Option<String> {
    QUERY_ID
        .captures(url)
        .or_else(|| PATH_ID.captures(url))
        .map(|c| c[1].to_string())
}

/// `videoInfoRes.item_list[0]` from the share page
pub(crate) fn item_from_share_page(page: &str) -> Option<Value> {
    let router = utils::capture_json(page, &ROUTER_DATA)?;
    let loader = router.get("loaderData")?.as_object()?;
    let page_data = loader
        .iter()
        .find(|(key, value)| key.contains("page") && value.is_object())
        .map(|(_, v)| v)?;
    let item = &page_data["videoInfoRes"]["item_list"][0];
    item.is_object().then(|| item.clone())
}

fn signed_query(pairs: &[(&str, &str)], user_agent: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();
    let signature = ABogus::new(user_agent).sign(&query, "GET");
    let encoded: String = form_urlencoded::byte_serialize(signature.as_bytes()).collect();
    format!("{}&a_bogus={}", query, encoded)
}

fn author(value: &Value) -> Author {
    let id = utils::id(&value["uid"])
        .or_else(|| utils::id(&value["short_id"]))
        .or_else(|| utils::id(&value["id"]))
        .unwrap_or_default();
    Author::new(id, utils::text(&value["nickname"]).unwrap_or_default())
        .with_avatar(utils::first_url(&value["avatar_thumb"]).or_else(|| utils::first_url(&value["avatar_larger"])))
        .with_handle(utils::text(&value["unique_id"]).or_else(|| utils::text(&value["sec_uid"])))
}

/// Aweme item (share page or detail API) → result
pub(crate) fn parse_item(item: &Value, url: &str, aweme_id: &str) -> Result<ExtractResult> {
    let desc = utils::text(&item["desc"]).unwrap_or_default();
    let title = utils::text(&item["preview_title"])
        .map(|t| utils::title_from_text(&t))
        .unwrap_or_else(|| utils::title_from_text(&desc));

    let mut result = ExtractResult::new(PLATFORM, url, title, author(&item["author"]));
    result.content_id = utils::id(&item["aweme_id"]).or_else(|| Some(aweme_id.to_string()));
    result.description = (!desc.is_empty()).then_some(desc.clone());
    result.create_time = utils::timestamp(&item["create_time"]);

    let video = &item["video"];
    result.duration = utils::count(&video["duration"])
        .or_else(|| utils::count(&item["duration"]))
        .map(|ms| ms / 1000)
        .filter(|s| *s > 0);
    result.cover_url = utils::first_url(&video["cover"]).or_else(|| utils::first_url(&video["origin_cover"]));

    let images = item["images"].as_array().filter(|a| !a.is_empty());
    if let Some(images) = images {
        for image in images {
            if let Some(src) = utils::first_url(image) {
                let width = utils::count(&image["width"]).and_then(|v| u32::try_from(v).ok());
                let height = utils::count(&image["height"]).and_then(|v| u32::try_from(v).ok());
                result.media.push(MediaItem::image(PLATFORM, &src).with_size(width, height));
            }
        }
    } else if let Some(play) = utils::first_url(&video["play_addr"]) {
        let width = utils::count(&video["width"]).and_then(|v| u32::try_from(v).ok());
        let height = utils::count(&video["height"]).and_then(|v| u32::try_from(v).ok());
        result.media.push(MediaItem::video(PLATFORM, &play).with_size(width, height));
    }

    let stats = &item["statistics"];
    result.stats = Stats {
        likes: utils::count(&stats["digg_count"]),
        comments_count: utils::count(&stats["comment_count"]),
        shares: utils::count(&stats["share_count"]),
        collects: utils::count(&stats["collect_count"]),
        // hidden play counts come back as 0
        views: utils::count(&stats["play_count"]).filter(|v| *v > 0),
        ..Stats::default()
    };

    let music = &item["music"];
    if let Some(music_title) = utils::text(&music["title"]) {
        result.music = Some(Music {
            title: music_title,
            author: utils::text(&music["author"]),
            url: utils::first_url(&music["play_url"]),
        });
    }
    result.location = utils::text(&item["poi_info"]["poi_name"]);
    result.is_ad = utils::flag(&item["is_ads"]);

    let mut tags: Vec<String> = item["text_extra"]
        .as_array()
        .map(|extras| extras.iter().filter_map(|e| utils::text(&e["hashtag_name"])).collect())
        .unwrap_or_default();
    if tags.is_empty() {
        tags = utils::hashtags(&desc);
    }
    result.tags = tags;

    Ok(result)
}

pub(crate) fn parse_comment(value: &Value) -> Option<Comment> {
    let id = utils::id(&value["cid"]).unwrap_or_default();
    let content = utils::text(&value["text"]).unwrap_or_default();
    if id.is_empty() && content.is_empty() {
        return None;
    }
    let user = &value["user"];
    let mut comment = Comment::new(id, utils::text(&user["nickname"]).unwrap_or_default(), content);
    comment.avatar = utils::first_url(&user["avatar_thumb"]);
    comment.create_time = utils::timestamp(&value["create_time"]);
    comment.like_count = utils::count(&value["digg_count"]);
    comment.ip_location = utils::text(&value["ip_label"]);
    comment.reply_count = utils::count(&value["reply_comment_total"]);
    if let Some(inline) = value["reply_comment"].as_array() {
        comment.replies = inline.iter().filter_map(parse_comment).collect();
    }
    Some(comment)
}

fn comment_page(data: &Value, current: &Cursor) -> CommentPage {
    let comments: Vec<Comment> = data["comments"]
        .as_array()
        .map(|list| list.iter().filter_map(parse_comment).collect())
        .unwrap_or_default();
    let has_more = utils::flag(&data["has_more"]).unwrap_or(false);
    let next = match utils::count(&data["cursor"]) {
        Some(c) if has_more && c > 0 && Cursor::Offset(c) != *current => Some(Cursor::Offset(c)),
        _ => None,
    };
    CommentPage::new(comments, next)
}

fn offset(cursor: &Cursor) -> u64 {
    match cursor {
        Cursor::Offset(o) => *o,
        _ => 0,
    }
}

struct Comments<'a> {
    ctx: AdapterContext<'a>,
    aweme_id: String,
    referer: String,
}

#[async_trait]
impl CommentSource for Comments<'_> {
    async fn page(&self, cursor: &Cursor) -> Result<CommentPage> {
        let url = format!(
            "{}?aweme_id={}&cursor={}&count=20",
            COMMENT_API,
            self.aweme_id,
            offset(cursor)
        );
        let request = browser_get(&self.ctx, PLATFORM, &url, true).referer(&self.referer);
        let data = fetch_json(&self.ctx, request).await?;
        Ok(comment_page(&data, cursor))
    }

    async fn replies(&self, parent: &Comment, cursor: &Cursor) -> Result<CommentPage> {
        let ua = self.ctx.credentials.user_agent().unwrap_or(DESKTOP_UA);
        let position = offset(cursor).to_string();
        let query = signed_query(
            &[
                ("device_platform", "webapp"),
                ("aid", "6383"),
                ("item_id", self.aweme_id.as_str()),
                ("comment_id", parent.id.as_str()),
                ("cursor", position.as_str()),
                ("count", "10"),
            ],
            ua,
        );
        let request = browser_get(&self.ctx, PLATFORM, &format!("{}?{}", REPLY_API, query), false)
            .referer("https://www.douyin.com/");
        let data = fetch_json(&self.ctx, request).await?;
        Ok(comment_page(&data, cursor))
    }
}

#[derive(Debug, Default)]
pub struct Douyin;

impl Douyin {
    pub fn new() -> Self {
        Self
    }

    async fn from_share_page(&self, ctx: &AdapterContext<'_>, aweme_id: &str) -> Result<Option<Value>> {
        let share_url = format!("{}/{}/", SHARE_PAGE, aweme_id);
        let response = ctx.transport.follow(browser_get(ctx, PLATFORM, &share_url, true)).await?;
        Ok(item_from_share_page(&response.text()))
    }

    async fn from_detail_api(&self, ctx: &AdapterContext<'_>, aweme_id: &str) -> Result<Value> {
        let ua = ctx.credentials.user_agent().unwrap_or(DESKTOP_UA);
        let query = signed_query(
            &[
                ("device_platform", "webapp"),
                ("aid", "6383"),
                ("channel", "channel_pc_web"),
                ("aweme_id", aweme_id),
                ("pc_client_type", "1"),
                ("version_code", "190500"),
                ("version_name", "19.5.0"),
                ("cookie_enabled", "true"),
            ],
            ua,
        );
        let request = HttpRequest::get(format!("{}?{}", DETAIL_API, query))
            .for_platform(PLATFORM)
            .user_agent(ua)
            .referer(&format!("https://www.douyin.com/video/{}", aweme_id))
            .credentials(ctx.credentials);
        let response = ctx.transport.execute(&request).await?;
        if response.body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(Error::extraction(
                PLATFORM,
                ExtractionReason::AuthRequired,
                "detail API answered with an empty body",
            ));
        }
        let data = response.json_value().map_err(|e| e.into_extraction(PLATFORM))?;
        let detail = &data["aweme_detail"];
        if detail.is_object() {
            return Ok(detail.clone());
        }
        let reason = utils::text(&data["filter_detail"]["filter_reason"])
            .or_else(|| utils::text(&data["status_msg"]))
            .unwrap_or_else(|| "aweme_detail missing".to_string());
        Err(Error::extraction(PLATFORM, ExtractionReason::NotFound, reason))
    }
}

#[async_trait]
impl Extractor for Douyin {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn supports_comments(&self) -> bool {
        true
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let aweme_id = video_id(url).ok_or_else(|| Error::parse(PLATFORM, format!("no aweme id in {}", url)))?;

        let item = match self.from_share_page(&ctx, &aweme_id).await {
            Ok(Some(item)) => {
                debug!(platform = "douyin", aweme_id = %aweme_id, "share page data");
                item
            }
            Ok(None) => {
                info!(platform = "douyin", url, stage = "share_page", "no router data, trying detail API");
                self.from_detail_api(&ctx, &aweme_id).await?
            }
            Err(e) if e.is_not_found() => return Err(e.into_extraction(PLATFORM)),
            Err(e) => {
                warn!(platform = "douyin", url, stage = "share_page", error = %e, "share page failed, trying detail API");
                self.from_detail_api(&ctx, &aweme_id).await?
            }
        };
        parse_item(&item, url, &aweme_id)
    }

    async fn fetch_comments(&self, ctx: AdapterContext<'_>, url: &str, max_count: usize) -> Result<Vec<Comment>> {
        let aweme_id = video_id(url).ok_or_else(|| Error::parse(PLATFORM, format!("no aweme id in {}", url)))?;
        let source = Comments {
            referer: format!("{}/{}/", SHARE_PAGE, aweme_id),
            ctx,
            aweme_id,
        };
        paginator::collect(&source, PLATFORM, url, max_count).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::credentials::Credentials;
    use crate::engine::testing::{transport, FakeBackend, FakeResolver};
    use crate::engine::watermark;
    use serde_json::json;
    use std::sync::Arc;

    pub(crate) fn share_page(item: Value) -> String {
        let router = json!({
            "loaderData": {
                "video_layout": null,
                "video_(id)/page": {"videoInfoRes": {"item_list": [item]}}
            }
        });
        format!(
            "<html><head></head><body><script>window._ROUTER_DATA = {}</script></body></html>",
            router
        )
    }

    pub(crate) fn video_item() -> Value {
        json!({
            "aweme_id": "7300000000000000001",
            "desc": "Sunset over the bay #travel #sea",
            "create_time": 1700000000,
            "author": {
                "uid": "110",
                "nickname": "Harbor Cam",
                "unique_id": "harborcam",
                "avatar_thumb": {"url_list": ["https://p3.douyinpic.com/avatar.jpeg"]}
            },
            "video": {
                "play_addr": {"url_list": ["https://aweme.snssdk.com/aweme/v1/playwm/?video_id=v0200&ratio=720p&line=0"]},
                "cover": {"url_list": ["https://p3.douyinpic.com/cover.jpeg"]},
                "duration": 15300,
                "width": 720,
                "height": 1280
            },
            "statistics": {"digg_count": 1200, "comment_count": 0, "share_count": 8, "collect_count": 30, "play_count": 0},
            "music": {"title": "original sound", "author": "Harbor Cam"},
            "text_extra": [{"hashtag_name": "travel"}, {"hashtag_name": "sea"}]
        })
    }

    #[test]
    fn test_video_id_forms() {
        assert_eq!(video_id("https://www.douyin.com/video/7300000000000000001").as_deref(), Some("7300000000000000001"));
        assert_eq!(
            video_id("https://www.douyin.com/discover?modal_id=7300000000000000002").as_deref(),
            Some("7300000000000000002")
        );
        assert_eq!(
            video_id("https://www.iesdouyin.com/share/note/7300000000000000003/").as_deref(),
            Some("7300000000000000003")
        );
    }

    #[test]
    fn test_parse_video_item() {
        let page = share_page(video_item());
        let item = item_from_share_page(&page).unwrap();
        let result = parse_item(&item, "https://www.douyin.com/video/7300000000000000001", "7300000000000000001").unwrap();

        assert_eq!(result.title, "Sunset over the bay #travel #sea");
        assert_eq!(result.author.nickname, "Harbor Cam");
        assert_eq!(result.author.handle.as_deref(), Some("harborcam"));
        assert_eq!(result.duration, Some(15));
        assert_eq!(result.stats.likes, Some(1200));
        assert_eq!(result.stats.comments_count, Some(0));
        assert_eq!(result.stats.views, None);
        assert_eq!(result.tags, vec!["travel".to_string(), "sea".to_string()]);
        assert_eq!(result.music.as_ref().map(|m| m.title.as_str()), Some("original sound"));
        assert!(result.is_ad.is_none());
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_media_is_unwatermarked() {
        let result = parse_item(&video_item(), "u", "1").unwrap();
        assert_eq!(result.media.len(), 1);
        let video = &result.media[0];
        assert!(video.url.contains("/aweme/v1/play/"));
        assert!(!watermark::has_marker(Platform::Douyin, &video.url));
        assert!(!video.is_watermarked);
    }

    #[test]
    fn test_missing_like_count_is_absent() {
        let mut item = video_item();
        item["statistics"] = json!({"comment_count": 3});
        let result = parse_item(&item, "u", "1").unwrap();
        assert_eq!(result.stats.likes, None);
        assert_eq!(result.stats.comments_count, Some(3));
    }

    #[test]
    fn test_image_post() {
        let mut item = video_item();
        item["images"] = json!([
            {"url_list": ["https://p3.douyinpic.com/img1.jpeg"], "width": 1080, "height": 1440},
            {"url_list": ["https://p3.douyinpic.com/img2.jpeg"]}
        ]);
        let result = parse_item(&item, "u", "1").unwrap();
        assert_eq!(result.media.len(), 2);
        assert!(!result.has_video());
        assert_eq!(result.media[0].width, Some(1080));
    }

    #[test]
    fn test_oversized_dimensions_are_dropped() {
        let mut item = video_item();
        item["video"]["width"] = json!(5_000_000_000u64);
        let result = parse_item(&item, "u", "1").unwrap();
        assert_eq!(result.media[0].width, None);
        assert_eq!(result.media[0].height, Some(1280));
    }

    #[test]
    fn test_comment_page_parsing() {
        let data = json!({
            "comments": [
                {"cid": "c1", "text": "nice", "user": {"nickname": "a"}, "digg_count": 5, "ip_label": "Shanghai",
                 "reply_comment_total": 3, "reply_comment": [{"cid": "r1", "text": "thanks", "user": {"nickname": "b"}}]},
                {"cid": "c2", "text": "wow", "user": {"nickname": "c"}}
            ],
            "cursor": 20,
            "has_more": 1
        });
        let page = comment_page(&data, &Cursor::Start);
        assert_eq!(page.comments.len(), 2);
        assert_eq!(page.next, Some(Cursor::Offset(20)));
        let first = &page.comments[0];
        assert_eq!(first.ip_location.as_deref(), Some("Shanghai"));
        assert_eq!(first.replies.len(), 1);
        assert!(first.has_more_replies());
        assert_eq!(page.comments[1].like_count, None);

        let last = comment_page(&json!({"comments": [], "cursor": 40, "has_more": 0}), &Cursor::Offset(20));
        assert_eq!(last.next, None);
    }

    #[tokio::test]
    async fn test_detail_api_fallback() {
        let backend = Arc::new(FakeBackend::new());
        backend.html(
            "https://www.iesdouyin.com/share/video/7300000000000000001/",
            "<html><body>captcha</body></html>",
        );
        backend.json(
            "https://www.douyin.com/aweme/v1/web/aweme/detail/*",
            json!({"aweme_detail": video_item(), "status_code": 0}),
        );
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::default();
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let result = Douyin::new()
            .extract(ctx, "https://www.douyin.com/video/7300000000000000001")
            .await
            .unwrap();
        assert_eq!(result.author.nickname, "Harbor Cam");
        let api_call = backend
            .requests()
            .into_iter()
            .find(|r| r.url.starts_with(DETAIL_API))
            .unwrap();
        assert!(api_call.url.contains("&a_bogus="));
        assert!(api_call.url.contains("aweme_id=7300000000000000001"));
    }

    #[tokio::test]
    async fn test_deleted_video_is_not_found() {
        let backend = Arc::new(FakeBackend::new());
        backend.html("https://www.iesdouyin.com/share/video/1/", "<html></html>");
        backend.json(
            "https://www.douyin.com/aweme/v1/web/aweme/detail/*",
            json!({"aweme_detail": null, "filter_detail": {"filter_reason": "status_deleted"}}),
        );
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::default();
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let err = Douyin::new().extract(ctx, "https://www.douyin.com/video/1").await.unwrap_err();
        assert_eq!(err.reason(), Some(ExtractionReason::NotFound));
    }
}
