// Xiaohongshu - note page state plus the signed web comment API

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::fetch_page;
use crate::engine::credentials::Credentials;
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, Comment, ExtractResult, MediaItem, Platform, Stats};
use crate::engine::paginator::{self, CommentPage, CommentSource, Cursor};
use crate::engine::signing::xhs;
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::transport::{HttpRequest, DESKTOP_UA};
use crate::engine::utils;

const PLATFORM: Platform = Platform::Xiaohongshu;
const API_HOST: &str = "https://edith.xiaohongshu.com";
const COMMENT_PATH: &str = "/api/sns/web/v2/comment/page";
const SUB_COMMENT_PATH: &str = "/api/sns/web/v2/comment/sub/page";
const VIDEO_CDN: &str = "https://sns-video-bd.xhscdn.com";

lazy_static! {
    static ref INITIAL_STATE: Regex =
        Regex::new(r"(?s)window\.__INITIAL_STATE__\s*=\s*(.*?)</script>").unwrap();
    static ref UNDEFINED: Regex = Regex::new(r"([:\[,])\s*undefined\b").unwrap();
    static ref NOTE_ID: Regex =
        Regex::new(r"/(?:explore|discovery/item|note)/([0-9A-Za-z]+)").unwrap();
}

pub fn note_id(url: &str) -> Option<String> {
    NOTE_ID.captures(url).map(|c| c[1].to_string())
}

fn xsec_token(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == "xsec_token")
        .map(|(_, v)| v.into_owned())
}

/// `__INITIAL_STATE__` as JSON (`undefined` values become `null`)
pub(crate) fn page_state(page: &str) -> Option<Value> {
    let raw = INITIAL_STATE.captures(page)?.get(1)?.as_str().trim();
    let raw = raw.trim_end_matches(';');
    let cleaned = UNDEFINED.replace_all(raw, "${1}null");
    serde_json::from_str(&cleaned).ok()
}

/// Note object from the mobile or desktop state shape
pub(crate) fn note_from_state(state: &Value) -> Option<&Value> {
    let mobile = &state["noteData"]["data"]["noteData"];
    if mobile.is_object() && !mobile.as_object().map_or(true, |m| m.is_empty()) {
        return Some(mobile);
    }
    state["note"]["noteDetailMap"]
        .as_object()?
        .values()
        .map(|entry| &entry["note"])
        .find(|note| note.as_object().map_or(false, |m| !m.is_empty()))
}

fn best_image(image: &Value) -> Option<String> {
    let from_info = image["infoList"].as_array().and_then(|list| {
        list.iter()
            .max_by_key(|info| utils::count(&info["width"]).unwrap_or(0))
            .and_then(|info| utils::text(&info["url"]))
    });
    from_info
        .or_else(|| utils::text(&image["urlDefault"]))
        .or_else(|| utils::text(&image["url"]))
        .map(|u| utils::https(&u))
}

fn video_url(video: &Value) -> Option<String> {
    if let Some(key) = utils::text(&video["consumer"]["originVideoKey"]) {
        return Some(format!("{}/{}", VIDEO_CDN, key));
    }
    let stream = &video["media"]["stream"];
    ["h264", "h265", "av1"]
        .iter()
        .find_map(|codec| {
            stream[*codec]
                .as_array()
                .and_then(|list| list.iter().find_map(|s| utils::text(&s["masterUrl"])))
        })
        .or_else(|| utils::text(&video["url"]))
        .map(|u| utils::https(&u))
}

pub(crate) fn parse_note(note: &Value, url: &str) -> Result<ExtractResult> {
    let desc = utils::text(&note["desc"]).unwrap_or_default();
    let title = utils::text(&note["title"]).unwrap_or_else(|| utils::title_from_text(&desc));

    let user = &note["user"];
    let author = Author::new(
        utils::id(&user["userId"]).unwrap_or_default(),
        utils::text(&user["nickname"])
            .or_else(|| utils::text(&user["nickName"]))
            .unwrap_or_default(),
    )
    .with_avatar(utils::text(&user["avatar"]).map(|a| utils::https(&a)));

    let mut result = ExtractResult::new(PLATFORM, url, title, author);
    result.content_id = utils::id(&note["noteId"]).or_else(|| note_id(url));
    result.description = (!desc.is_empty()).then_some(desc.clone());
    result.create_time = ["time", "noteTime", "createTime"]
        .iter()
        .find_map(|k| utils::timestamp(&note[*k]));
    result.location = utils::text(&note["ipLocation"]);

    let interact = &note["interactInfo"];
    result.stats = Stats {
        likes: utils::count(&interact["likedCount"]),
        comments_count: utils::count(&interact["commentCount"]),
        shares: utils::count(&interact["shareCount"]),
        collects: utils::count(&interact["collectedCount"]),
        ..Stats::default()
    };

    let images = note["imageList"].as_array().cloned().unwrap_or_default();
    for image in &images {
        if let Some(src) = best_image(image) {
            let width = utils::count(&image["width"]).map(|v| v as u32);
            let height = utils::count(&image["height"]).map(|v| v as u32);
            result.media.push(MediaItem::image(PLATFORM, &src).with_size(width, height));
        }
    }

    let video = &note["video"];
    if video.is_object() {
        if let Some(src) = video_url(video) {
            result.media.push(MediaItem::video(PLATFORM, &src));
        }
        result.duration = utils::count(&video["capa"]["duration"])
            .or_else(|| utils::count(&video["duration"]))
            .filter(|d| *d > 0);
    }
    result.cover_url = utils::text(&video["thumbnail"]["url"])
        .or_else(|| utils::text(&video["cover"]["url"]))
        .or_else(|| images.first().and_then(best_image))
        .map(|u| crate::engine::watermark::strip(PLATFORM, &utils::https(&u)));

    let tags: Vec<String> = note["tagList"]
        .as_array()
        .map(|list| list.iter().filter_map(|t| utils::text(&t["name"])).collect())
        .unwrap_or_default();
    result.tags = if tags.is_empty() {
        utils::hashtags(&format!("{}\n{}", result.title, desc))
    } else {
        tags
    };

    Ok(result)
}

/// Comment in either the page-state (camelCase) or API (snake_case) shape
pub(crate) fn parse_comment(value: &Value) -> Option<Comment> {
    let id = utils::id(&value["id"]).unwrap_or_default();
    let content = utils::text(&value["content"]).unwrap_or_default();
    if id.is_empty() && content.is_empty() {
        return None;
    }
    let user = if value["user_info"].is_object() { &value["user_info"] } else { &value["userInfo"] };
    let nickname = utils::text(&user["nickname"])
        .or_else(|| utils::text(&user["nickName"]))
        .unwrap_or_default();

    let mut comment = Comment::new(id, nickname, content);
    comment.avatar = utils::text(&user["image"]).or_else(|| utils::text(&user["avatar"]));
    comment.like_count = utils::count(&value["like_count"]).or_else(|| utils::count(&value["likeCount"]));
    comment.create_time = utils::timestamp(&value["create_time"]).or_else(|| utils::timestamp(&value["createTime"]));
    comment.ip_location = utils::text(&value["ip_location"]).or_else(|| utils::text(&value["ipLocation"]));
    comment.reply_count = utils::count(&value["sub_comment_count"]).or_else(|| utils::count(&value["subCommentCount"]));

    let subs = ["sub_comments", "subComments", "subCommentList"]
        .iter()
        .find_map(|k| value[*k].as_array());
    if let Some(subs) = subs {
        comment.replies = subs.iter().filter_map(parse_comment).collect();
    }
    Some(comment)
}

fn comment_list(value: &Value) -> Option<&Vec<Value>> {
    value.as_array().or_else(|| value["list"].as_array())
}

/// Comments embedded in the page state
pub(crate) fn page_comments(state: &Value) -> Vec<Comment> {
    let from_map = state["note"]["noteDetailMap"]
        .as_object()
        .and_then(|map| map.values().find_map(|entry| comment_list(&entry["comments"])));
    comment_list(&state["comment"]["comments"])
        .or_else(|| comment_list(&state["noteData"]["data"]["comments"]))
        .or(from_map)
        .map(|list| list.iter().filter_map(parse_comment).collect())
        .unwrap_or_default()
}

/// Map an API error code
fn api_error(data: &Value) -> Error {
    let code = data["code"].as_i64().unwrap_or(0);
    let message = utils::text(&data["msg"]).unwrap_or_else(|| format!("code {}", code));
    let reason = match code {
        -100 | -101 | -104 => ExtractionReason::AuthRequired,
        300012 | 300013 => ExtractionReason::RateLimited,
        -510001 | -510000 => ExtractionReason::NotFound,
        _ => ExtractionReason::ParseFailed,
    };
    Error::extraction(PLATFORM, reason, message)
}

struct Comments<'a> {
    ctx: AdapterContext<'a>,
    note_id: String,
    xsec_token: Option<String>,
    cookies: Credentials,
    referer: String,
}

impl Comments<'_> {
    async fn signed_get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter())
            .finish();
        let uri = format!("{}?{}", path, query);
        let a1 = self.cookies.get("a1").unwrap_or_default();
        let signature = xhs::sign(&uri, None, a1, "");

        let mut request = HttpRequest::get(format!("{}{}", API_HOST, uri))
            .for_platform(PLATFORM)
            .user_agent(self.cookies.user_agent().unwrap_or(DESKTOP_UA))
            .referer(&self.referer)
            .header("Origin", "https://www.xiaohongshu.com")
            .header("Accept", "application/json, text/plain, */*")
            .cookie_pairs(self.cookies.iter());
        for (name, value) in signature.headers() {
            request = request.header(name, value);
        }

        let response = self.ctx.transport.execute(&request).await?;
        let data = response.json_value().map_err(|e| e.into_extraction(PLATFORM))?;
        if utils::flag(&data["success"]) == Some(false) || data["code"].as_i64().map_or(false, |c| c != 0) {
            return Err(api_error(&data));
        }
        Ok(data)
    }

    fn page_from(data: &Value) -> CommentPage {
        let inner = &data["data"];
        let comments = inner["comments"]
            .as_array()
            .map(|list| list.iter().filter_map(parse_comment).collect())
            .unwrap_or_default();
        let next = match utils::text(&inner["cursor"]) {
            Some(cursor) if utils::flag(&inner["has_more"]).unwrap_or(false) => Some(Cursor::Token(cursor)),
            _ => None,
        };
        CommentPage::new(comments, next)
    }
}

fn token(cursor: &Cursor) -> &str {
    match cursor {
        Cursor::Token(t) => t.as_str(),
        _ => "",
    }
}

#[async_trait]
impl CommentSource for Comments<'_> {
    async fn page(&self, cursor: &Cursor) -> Result<CommentPage> {
        let mut params = vec![
            ("note_id", self.note_id.as_str()),
            ("cursor", token(cursor)),
            ("top_comment_id", ""),
            ("image_formats", "jpg,webp,avif"),
        ];
        if let Some(xsec) = &self.xsec_token {
            params.push(("xsec_token", xsec.as_str()));
        }
        let data = self.signed_get(COMMENT_PATH, &params).await?;
        Ok(Self::page_from(&data))
    }

    async fn replies(&self, parent: &Comment, cursor: &Cursor) -> Result<CommentPage> {
        let mut params = vec![
            ("note_id", self.note_id.as_str()),
            ("root_comment_id", parent.id.as_str()),
            ("num", "10"),
            ("cursor", token(cursor)),
            ("image_formats", "jpg,webp,avif"),
        ];
        if let Some(xsec) = &self.xsec_token {
            params.push(("xsec_token", xsec.as_str()));
        }
        let data = self.signed_get(SUB_COMMENT_PATH, &params).await?;
        Ok(Self::page_from(&data))
    }
}

#[derive(Debug, Default)]
pub struct Xiaohongshu;

impl Xiaohongshu {
    pub fn new() -> Self {
        Self
    }

    /// Credentials with an anonymous a1/webId pair when the user has none
    fn api_cookies(credentials: &Credentials) -> Credentials {
        if credentials.get("a1").is_some() {
            return credentials.clone();
        }
        let (a1, web_id) = xhs::generate_a1();
        credentials.merged([("a1", a1.as_str()), ("webId", web_id.as_str())])
    }
}

#[async_trait]
impl Extractor for Xiaohongshu {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn supports_comments(&self) -> bool {
        true
    }

    fn requires_credentials(&self) -> bool {
        true
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let response = fetch_page(&ctx, PLATFORM, url, true).await?;
        if response.url.contains("/404") {
            return Err(Error::extraction(PLATFORM, ExtractionReason::NotFound, "note removed or private"));
        }
        if response.url.contains("website-login") || response.url.contains("/login") {
            return Err(Error::extraction(PLATFORM, ExtractionReason::AuthRequired, "redirected to login"));
        }

        let page = response.text();
        let state = page_state(&page).ok_or_else(|| {
            Error::parse(PLATFORM, "__INITIAL_STATE__ not found (page may be a captcha)")
        })?;
        let note = note_from_state(&state).ok_or_else(|| Error::parse(PLATFORM, "note data not found in page state"))?;

        let mut result = parse_note(note, url)?;
        result.comments = page_comments(&state);
        debug!(platform = "xiaohongshu", url, page_comments = result.comments.len(), "parsed note");
        Ok(result)
    }

    async fn fetch_comments(&self, ctx: AdapterContext<'_>, url: &str, max_count: usize) -> Result<Vec<Comment>> {
        let id = note_id(url).ok_or_else(|| Error::parse(PLATFORM, format!("no note id in {}", url)))?;
        let cookies = Self::api_cookies(ctx.credentials);
        if cookies.get("web_session").is_none() {
            warn!(platform = "xiaohongshu", url, stage = "comments", "no web_session cookie, comment API may refuse");
        }
        let source = Comments {
            referer: format!("https://www.xiaohongshu.com/explore/{}", id),
            xsec_token: xsec_token(url),
            ctx,
            note_id: id,
            cookies,
        };
        paginator::collect(&source, PLATFORM, url, max_count).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{transport, FakeBackend, FakeResolver};
    use crate::engine::watermark;
    use serde_json::json;
    use std::sync::Arc;

    const NOTE_URL: &str = "https://www.xiaohongshu.com/explore/65a1b2c3d4e5f60718293a4b?xsec_token=ABtok";

    fn desktop_page() -> String {
        let state = r#"{"note":{"noteDetailMap":{"65a1b2c3d4e5f60718293a4b":{"comments":{"list":[
            {"id":"c1","content":"so pretty","userInfo":{"nickname":"fan"},"likeCount":"12","subCommentCount":"4",
             "subComments":[{"id":"s1","content":"agree","userInfo":{"nickname":"fan2"}}]}]},
          "note":{"noteId":"65a1b2c3d4e5f60718293a4b","title":"Autumn in Kyoto","desc":"Leaves #travel[话题]# #kyoto",
            "type":"normal","time":1700000000000,"ipLocation":"Japan",
            "user":{"userId":"u1","nickname":"Mika","avatar":"https://sns-avatar-qc.xhscdn.com/avatar/1.jpg"},
            "interactInfo":{"likedCount":"1.2万","collectedCount":"300","commentCount":"45","shareCount":"10"},
            "imageList":[{"width":1080,"height":1440,"infoList":[
              {"imageScene":"WB_PRV","url":"http://sns-webpic-qc.xhscdn.com/202401/abc/1040g2sg!nc_n_webp_prv_1","width":540},
              {"imageScene":"WB_DFT","url":"http://sns-webpic-qc.xhscdn.com/202401/abc/1040g2sg!nd_dft_wlteh_webp_3","width":1080}]}],
            "video":undefined,"tagList":[{"name":"travel"}]}}}}}"#;
        format!("<html><script>window.__INITIAL_STATE__={}</script></html>", state)
    }

    #[test]
    fn test_note_id() {
        assert_eq!(note_id(NOTE_URL).as_deref(), Some("65a1b2c3d4e5f60718293a4b"));
        assert_eq!(xsec_token(NOTE_URL).as_deref(), Some("ABtok"));
    }

    #[test]
    fn test_desktop_state() {
        let state = page_state(&desktop_page()).unwrap();
        let note = note_from_state(&state).unwrap();
        let result = parse_note(note, NOTE_URL).unwrap();
        assert_eq!(result.title, "Autumn in Kyoto");
        assert_eq!(result.author.nickname, "Mika");
        assert_eq!(result.stats.likes, Some(12_000));
        assert_eq!(result.location.as_deref(), Some("Japan"));
        assert_eq!(result.tags, vec!["travel".to_string()]);
        assert!(result.create_time.is_some());
        assert_eq!(result.duration, None);

        let comments = page_comments(&state);
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].like_count, Some(12));
        assert_eq!(comments[0].replies[0].author, "fan2");
    }

    #[test]
    fn test_images_drop_style_suffix() {
        let state = page_state(&desktop_page()).unwrap();
        let result = parse_note(note_from_state(&state).unwrap(), NOTE_URL).unwrap();
        assert_eq!(result.media.len(), 1);
        let image = &result.media[0];
        assert_eq!(image.url, "https://sns-webpic-qc.xhscdn.com/202401/abc/1040g2sg");
        assert!(!watermark::has_marker(PLATFORM, &image.url));
        assert!(result.validate().is_ok());
    }

    #[test]
    fn test_mobile_video_note() {
        let state = json!({"noteData": {"data": {"noteData": {
            "noteId": "n1", "desc": "Morning run\nday 3", "type": "video",
            "user": {"userId": "u2", "nickName": "Runner"},
            "interactInfo": {"commentCount": "2"},
            "video": {"consumer": {"originVideoKey": "pre_post/1040g0cg"}, "capa": {"duration": 31}}
        }}}});
        let result = parse_note(note_from_state(&state).unwrap(), "https://www.xiaohongshu.com/explore/n1").unwrap();
        assert_eq!(result.title, "Morning run");
        assert_eq!(result.media[0].url, "https://sns-video-bd.xhscdn.com/pre_post/1040g0cg");
        assert!(result.has_video());
        assert_eq!(result.duration, Some(31));
        assert_eq!(result.stats.likes, None);
    }

    #[tokio::test]
    async fn test_comment_api_is_signed() {
        let backend = Arc::new(FakeBackend::new());
        backend.json(
            "https://edith.xiaohongshu.com/api/sns/web/v2/comment/page*",
            json!({"code": 0, "success": true, "data": {"cursor": "c2", "has_more": false, "comments": [
                {"id": "c1", "content": "hi", "user_info": {"nickname": "a"}, "like_count": "3", "sub_comment_count": "0"}
            ]}}),
        );
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::from_pairs([("web_session", "s")]);
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let comments = Xiaohongshu::new().fetch_comments(ctx, NOTE_URL, 20).await.unwrap();
        assert_eq!(comments.len(), 1);
        let request = &backend.requests()[0];
        assert!(request.header_value("x-s").is_some());
        assert!(request.header_value("x-s-common").is_some());
        let cookie = request.header_value("Cookie").unwrap();
        assert!(cookie.contains("a1=") && cookie.contains("web_session=s"));
        assert!(request.url.contains("xsec_token=ABtok"));
    }

    #[tokio::test]
    async fn test_expired_session_is_auth_required() {
        let backend = Arc::new(FakeBackend::new());
        backend.json(
            "https://edith.xiaohongshu.com/api/sns/web/v2/comment/page*",
            json!({"code": -100, "success": false, "msg": "login expired"}),
        );
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::default();
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let err = Xiaohongshu::new().fetch_comments(ctx, NOTE_URL, 20).await.unwrap_err();
        assert_eq!(err.reason(), Some(ExtractionReason::AuthRequired));
    }
}
