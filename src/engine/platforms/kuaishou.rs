// Kuaishou - Apollo page state (mobile, then desktop), og meta fallback, GraphQL comments

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{fetch_json, fetch_page};
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, Comment, ExtractResult, MediaItem, Platform, Stats};
use crate::engine::paginator::{self, CommentPage, CommentSource, Cursor};
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::transport::HttpRequest;
use crate::engine::utils;

const PLATFORM: Platform = Platform::Kuaishou;
const GRAPHQL: &str = "https://www.kuaishou.com/graphql";
/// Characters dropped from the tail while salvaging a truncated state blob
const SALVAGE_WINDOW: usize = 200;
const END_CURSOR: &str = "no_more";

const COMMENT_QUERY: &str = "query commentListQuery($photoId: String, $pcursor: String) { visionCommentList(photoId: $photoId, pcursor: $pcursor) { commentCount pcursor rootComments { commentId authorId authorName content headurl timestamp likedCount realLikedCount subCommentCount subCommentsPcursor subComments { commentId authorId authorName content headurl timestamp likedCount realLikedCount replyToUserName } } } }";
const SUB_COMMENT_QUERY: &str = "query visionSubCommentList($photoId: String, $rootCommentId: String, $pcursor: String) { visionSubCommentList(photoId: $photoId, rootCommentId: $rootCommentId, pcursor: $pcursor) { pcursor subComments { commentId authorId authorName content headurl timestamp likedCount realLikedCount replyToUserName } } }";

lazy_static! {
    static ref APOLLO_STATE: Regex =
        Regex::new(r"(?s)window\.__APOLLO_STATE__\s*=\s*(.*?);?\s*</script>").unwrap();
    static ref PHOTO_ID: Regex =
        Regex::new(r"/(?:short-video|fw/photo|photo)/([0-9A-Za-z_-]+)").unwrap();
    static ref AUTHOR_TITLE: Regex = Regex::new(r"^(.*?)的作品").unwrap();
}

pub fn photo_id(url: &str) -> Option<String> {
    PHOTO_ID.captures(url).map(|c| c[1].to_string())
}

/// Parse a state blob, trimming a corrupted tail and closing braces when needed
pub(crate) fn salvage_json(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    // state is usually followed by inline script on the same line
    if let Some(Ok(value)) = serde_json::Deserializer::from_str(raw).into_iter::<Value>().next() {
        return Some(value);
    }
    let boundaries: Vec<usize> = raw.char_indices().map(|(i, _)| i).rev().take(SALVAGE_WINDOW).collect();
    for end in boundaries.into_iter().skip(1) {
        let head = &raw[..end];
        for closing in ["}", "}}"] {
            if let Ok(value) = serde_json::from_str(&format!("{}{}", head, closing)) {
                return Some(value);
            }
        }
    }
    None
}

pub(crate) fn apollo_state(page: &str) -> Option<Value> {
    let raw = APOLLO_STATE.captures(page)?.get(1)?.as_str();
    let state = salvage_json(raw);
    if state.is_none() {
        warn!(platform = "kuaishou", stage = "apollo", "state blob is corrupted beyond repair");
    }
    state
}

/// First state entry whose key contains `marker`
fn entry<'a>(state: &'a Value, marker: &str) -> Option<&'a Value> {
    state
        .as_object()?
        .iter()
        .find(|(key, value)| key.contains(marker) && value.is_object())
        .map(|(_, v)| v)
}

/// Apollo state → result; `None` when the photo entry is missing
pub(crate) fn parse_state(state: &Value, url: &str) -> Option<ExtractResult> {
    let photo = entry(state, "VisionVideoDetailPhoto")?;
    let author = entry(state, "VisionVideoDetailAuthor").map_or_else(
        || Author::new("", ""),
        |a| {
            Author::new(
                utils::id(&a["id"]).unwrap_or_default(),
                utils::text(&a["name"]).unwrap_or_default(),
            )
            .with_avatar(utils::text(&a["headerUrl"]))
        },
    );

    let caption = utils::text(&photo["caption"])
        .or_else(|| utils::text(&photo["title"]))
        .unwrap_or_default();
    let mut result = ExtractResult::new(PLATFORM, url, utils::title_from_text(&caption), author);
    result.content_id = utils::id(&photo["id"]).or_else(|| photo_id(url));
    result.description = (!caption.is_empty()).then(|| caption.clone());
    result.create_time = utils::timestamp(&photo["timestamp"]);
    result.duration = utils::count(&photo["duration"]).map(|ms| ms / 1000).filter(|s| *s > 0);
    result.cover_url = utils::text(&photo["coverUrl"]);
    result.stats = Stats {
        likes: utils::count(&photo["realLikeCount"]).or_else(|| utils::count(&photo["likeCount"])),
        comments_count: utils::count(&photo["commentCount"]),
        views: utils::count(&photo["viewCount"]),
        shares: utils::count(&photo["shareCount"]),
        ..Stats::default()
    };
    if let Some(src) = utils::text(&photo["photoUrl"]) {
        result.media.push(MediaItem::video(PLATFORM, &utils::https(&src)));
    }
    result.tags = utils::hashtags(&caption);
    Some(result)
}

/// og/meta fallback for pages without state
pub(crate) fn parse_meta(page: &str, url: &str) -> Option<ExtractResult> {
    let title = utils::meta_content(page, "og:title").or_else(|| utils::meta_content(page, "title"));
    let video = utils::meta_content(page, "og:video:url").or_else(|| utils::meta_content(page, "og:video"));
    if title.is_none() && video.is_none() {
        return None;
    }
    let nickname = utils::page_title(page)
        .and_then(|t| AUTHOR_TITLE.captures(&t).map(|c| c[1].trim().to_string()))
        .unwrap_or_default();
    let description = utils::meta_content(page, "og:description").or_else(|| utils::meta_content(page, "description"));

    let title = title
        .or_else(|| description.as_deref().map(utils::title_from_text))
        .unwrap_or_default();
    let mut result = ExtractResult::new(PLATFORM, url, title, Author::new("", nickname));
    result.content_id = photo_id(url);
    result.description = description;
    result.cover_url = utils::meta_content(page, "og:image");
    if let Some(src) = video {
        result.media.push(MediaItem::video(PLATFORM, &utils::https(&src)));
    }
    Some(result)
}

pub(crate) fn parse_comment(value: &Value) -> Option<Comment> {
    let id = utils::id(&value["commentId"]).unwrap_or_default();
    let content = utils::text(&value["content"]).unwrap_or_default();
    if id.is_empty() && content.is_empty() {
        return None;
    }
    let mut comment = Comment::new(id, utils::text(&value["authorName"]).unwrap_or_default(), content);
    comment.avatar = utils::text(&value["headurl"]);
    comment.create_time = utils::timestamp(&value["timestamp"]);
    comment.like_count = utils::count(&value["realLikedCount"]).or_else(|| utils::count(&value["likedCount"]));
    comment.reply_count = utils::count(&value["subCommentCount"]);
    if let Some(subs) = value["subComments"].as_array() {
        comment.replies = subs.iter().filter_map(parse_comment).collect();
    }
    Some(comment)
}

fn next_cursor(pcursor: &Value) -> Option<Cursor> {
    utils::text(pcursor)
        .filter(|c| c != END_CURSOR)
        .map(Cursor::Token)
}

fn pcursor(cursor: &Cursor) -> &str {
    match cursor {
        Cursor::Token(t) => t,
        _ => "",
    }
}

struct Comments<'a> {
    ctx: AdapterContext<'a>,
    photo_id: String,
    referer: String,
}

impl Comments<'_> {
    async fn query(&self, body: Value) -> Result<Value> {
        let request = HttpRequest::post(GRAPHQL)
            .for_platform(PLATFORM)
            .browser(false)
            .credentials(self.ctx.credentials)
            .referer(&self.referer)
            .header("Origin", "https://www.kuaishou.com")
            .json(&body);
        let data = fetch_json(&self.ctx, request).await?;
        if data["data"].is_null() || data.get("errors").is_some() {
            return Err(Error::extraction(
                PLATFORM,
                ExtractionReason::AuthRequired,
                "GraphQL refused the query (did cookie missing?)",
            ));
        }
        Ok(data)
    }
}

#[async_trait]
impl CommentSource for Comments<'_> {
    async fn page(&self, cursor: &Cursor) -> Result<CommentPage> {
        let body = json!({
            "operationName": "commentListQuery",
            "variables": {"photoId": self.photo_id, "pcursor": pcursor(cursor)},
            "query": COMMENT_QUERY,
        });
        let data = self.query(body).await?;
        let list = &data["data"]["visionCommentList"];
        if list.is_null() {
            return Err(Error::extraction(PLATFORM, ExtractionReason::AuthRequired, "empty comment list"));
        }
        let comments = list["rootComments"]
            .as_array()
            .map(|items| items.iter().filter_map(parse_comment).collect())
            .unwrap_or_default();
        Ok(CommentPage::new(comments, next_cursor(&list["pcursor"])))
    }

    async fn replies(&self, parent: &Comment, cursor: &Cursor) -> Result<CommentPage> {
        let body = json!({
            "operationName": "visionSubCommentList",
            "variables": {"photoId": self.photo_id, "rootCommentId": parent.id, "pcursor": pcursor(cursor)},
            "query": SUB_COMMENT_QUERY,
        });
        let data = self.query(body).await?;
        let list = &data["data"]["visionSubCommentList"];
        let comments = list["subComments"]
            .as_array()
            .map(|items| items.iter().filter_map(parse_comment).collect())
            .unwrap_or_default();
        Ok(CommentPage::new(comments, next_cursor(&list["pcursor"])))
    }
}

#[derive(Debug, Default)]
pub struct Kuaishou;

impl Kuaishou {
    pub fn new() -> Self {
        Self
    }

    fn parse_page(page: &str, url: &str) -> Option<ExtractResult> {
        apollo_state(page)
            .and_then(|state| parse_state(&state, url))
            .or_else(|| parse_meta(page, url))
    }
}

#[async_trait]
impl Extractor for Kuaishou {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn supports_comments(&self) -> bool {
        true
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let mut partial: Option<ExtractResult> = None;

        for (stage, mobile) in [("mobile", true), ("desktop", false)] {
            let page = match fetch_page(&ctx, PLATFORM, url, mobile).await {
                Ok(response) => response.text(),
                Err(e) if e.is_not_found() => return Err(e.into_extraction(PLATFORM)),
                Err(e) => {
                    warn!(platform = "kuaishou", url, stage, error = %e, "page fetch failed");
                    continue;
                }
            };
            match Self::parse_page(&page, url) {
                Some(result) if result.validate().is_ok() => {
                    info!(platform = "kuaishou", url, stage, "parsed page");
                    return Ok(result);
                }
                Some(result) => {
                    debug!(platform = "kuaishou", url, stage, "incomplete page data");
                    partial.get_or_insert(result);
                }
                None => debug!(platform = "kuaishou", url, stage, "no state or meta"),
            }
        }

        let detail = match partial {
            Some(_) => "page data is incomplete; configure kuaishou did/didv cookies",
            None => "anti-crawl page served; configure kuaishou did/didv cookies",
        };
        Err(Error::extraction(PLATFORM, ExtractionReason::AuthRequired, detail))
    }

    async fn fetch_comments(&self, ctx: AdapterContext<'_>, url: &str, max_count: usize) -> Result<Vec<Comment>> {
        let id = photo_id(url).ok_or_else(|| Error::parse(PLATFORM, format!("no photo id in {}", url)))?;
        let source = Comments {
            referer: format!("https://www.kuaishou.com/short-video/{}", id),
            ctx,
            photo_id: id,
        };
        paginator::collect(&source, PLATFORM, url, max_count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::credentials::Credentials;
    use crate::engine::testing::{transport, FakeBackend, FakeResolver};
    use crate::engine::transport::HttpResponse;
    use crate::engine::watermark;
    use std::sync::Arc;

    const VIDEO_URL: &str = "https://www.kuaishou.com/short-video/3xabc123";

    fn state() -> Value {
        json!({
            "VisionVideoDetailPhoto:3xabc123": {
                "id": "3xabc123", "caption": "Street food tour #food", "timestamp": 1700000000000u64,
                "duration": 42000, "likeCount": "1.5w", "viewCount": "20.1w", "commentCount": 88,
                "photoUrl": "https://v2.kwaicdn.com/upic/2023/video.mp4?tag=1",
                "coverUrl": "https://p2.a.yximgs.com/cover.jpg"
            },
            "VisionVideoDetailAuthor:3xuser": {"id": "3xuser", "name": "Chef Li", "headerUrl": "https://p2.a.yximgs.com/h.jpg"}
        })
    }

    fn page(state_text: &str) -> String {
        format!("<html><script>window.__APOLLO_STATE__={};(function(){{}})()</script></html>", state_text)
    }

    #[test]
    fn test_parse_state() {
        let result = parse_state(&state(), VIDEO_URL).unwrap();
        assert_eq!(result.title, "Street food tour #food");
        assert_eq!(result.author.nickname, "Chef Li");
        assert_eq!(result.stats.likes, Some(15_000));
        assert_eq!(result.stats.views, Some(201_000));
        assert_eq!(result.stats.shares, None);
        assert_eq!(result.duration, Some(42));
        assert!(result.has_video());
        assert!(!watermark::has_marker(PLATFORM, &result.media[0].url));
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_missing_likes_absent() {
        let mut s = state();
        s["VisionVideoDetailPhoto:3xabc123"].as_object_mut().unwrap().remove("likeCount");
        let result = parse_state(&s, VIDEO_URL).unwrap();
        assert_eq!(result.stats.likes, None);
    }

    #[test]
    fn test_salvage_truncated_state() {
        let full = json!({"a": {"caption": "x"}, "b": {"name": "y"}}).to_string();
        let truncated = format!("{}, \"c\": {{\"broken", &full[..full.len() - 1]);
        let value = salvage_json(&truncated).unwrap();
        assert_eq!(value["a"]["caption"], "x");
        assert!(salvage_json("not json at all").is_none());
    }

    #[test]
    fn test_meta_fallback() {
        let html = r#"<html><head><title>Chef Li的作品 - 快手</title>
            <meta property="og:title" content="Dumplings">
            <meta property="og:video:url" content="https://v2.kwaicdn.com/upic/d.mp4">
            <meta property="og:image" content="https://p2.a.yximgs.com/c.jpg"></head></html>"#;
        let result = parse_meta(html, VIDEO_URL).unwrap();
        assert_eq!(result.title, "Dumplings");
        assert_eq!(result.author.nickname, "Chef Li");
        assert!(result.has_video());
    }

    #[tokio::test]
    async fn test_desktop_after_mobile_fails() {
        let backend = Arc::new(FakeBackend::new());
        // mobile gets an empty shell, desktop the real state
        backend.push(VIDEO_URL, HttpResponse::new(200, VIDEO_URL, "<html></html>"));
        backend.push(VIDEO_URL, HttpResponse::new(200, VIDEO_URL, page(&state().to_string())));
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::default();
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let result = Kuaishou::new().extract(ctx, VIDEO_URL).await.unwrap();
        assert_eq!(result.author.nickname, "Chef Li");
        assert_eq!(backend.calls(VIDEO_URL), 2);
        let desktop = &backend.requests()[1];
        assert!(!desktop.header_value("User-Agent").unwrap().contains("iPhone"));
    }

    #[tokio::test]
    async fn test_graphql_comments() {
        let backend = Arc::new(FakeBackend::new());
        backend.json(
            GRAPHQL,
            json!({"data": {"visionCommentList": {"commentCount": 1, "pcursor": "no_more", "rootComments": [
                {"commentId": "1", "authorName": "fan", "content": "yum", "likedCount": "12", "subCommentCount": 0}
            ]}}}),
        );
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::from_pairs([("did", "web_1")]);
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let comments = Kuaishou::new().fetch_comments(ctx, VIDEO_URL, 20).await.unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].like_count, Some(12));
        let request = &backend.requests()[0];
        let body: Value = serde_json::from_slice(request.body.as_ref().unwrap()).unwrap();
        assert_eq!(body["variables"]["photoId"], "3xabc123");
    }
}
