// Weibo - AJAX show API, m.weibo.cn fallbacks, hot-flow comments
//
// Anonymous access is gated by the "Sina Visitor System"; a visitor SUB/SUBP pair is
// minted through passport.weibo.com when a strategy is refused.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::credentials::Credentials;
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, Comment, ExtractResult, MediaItem, Platform, Stats};
use crate::engine::paginator::{self, CommentPage, CommentSource, Cursor};
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::transport::HttpRequest;
use crate::engine::utils;

const PLATFORM: Platform = Platform::Weibo;
const BASE62: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const VISITOR_FP: &str = r#"{"os":"1","browser":"Chrome125,0,0,0","fonts":"undefined","screenInfo":"2560*1440*30","plugins":""}"#;
const VISITOR_WALL: &str = "Sina Visitor System";

lazy_static! {
    static ref ID_PATTERNS: Vec<Regex> = [
        r"/detail/(\d+)",
        r"/status/(\d+)",
        r"/(\d{16,})",
        r"weibo\.com/\d+/([0-9A-Za-z]+)",
        r"weibo\.cn/status/([0-9A-Za-z]+)",
        r"weibo\.cn/\w+/([0-9A-Za-z]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
    static ref RENDER_DATA: Regex =
        Regex::new(r"(?s)var \$render_data\s*=\s*(\[.*?\])\[0\]").unwrap();
    static ref GEN_CALLBACK: Regex = Regex::new(r"(?s)gen_callback\((.*?)\)").unwrap();
    static ref CROSS_DOMAIN: Regex = Regex::new(r"(?s)cross_domain\((.*?)\)").unwrap();
}

/// Status id as written in the link (numeric or base62 bid)
pub fn status_id(url: &str) -> Option<String> {
    ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .map(|c| c[1].to_string())
}

/// Numeric mid for a base62 bid (`N1abcD...`), unchanged when already numeric.
///
/// The bid is read in 4-character groups from the end; every group but the leading one
/// expands to exactly 7 decimal digits.
pub fn to_mid(id: &str) -> Option<String> {
    if id.bytes().all(|b| b.is_ascii_digit()) {
        return Some(id.to_string());
    }
    let chars: Vec<u8> = id.bytes().collect();
    let mut groups: Vec<String> = Vec::new();
    let mut end = chars.len();
    while end > 0 {
        let start = end.saturating_sub(4);
        let mut value: u64 = 0;
        for &c in &chars[start..end] {
            let digit = BASE62.iter().position(|&b| b == c)? as u64;
            value = value * 62 + digit;
        }
        groups.push(if start > 0 { format!("{:07}", value) } else { value.to_string() });
        end = start;
    }
    groups.reverse();
    Some(groups.concat())
}

/// Post payload from an AJAX show, mobile show or render_data response
fn status_object(value: &Value) -> Option<&Value> {
    let has_text = |v: &Value| v.get("text_raw").is_some() || v.get("text").is_some();
    if has_text(value) {
        return Some(value);
    }
    let nested = &value["data"];
    has_text(nested).then_some(nested)
}

fn image_urls(status: &Value) -> Vec<String> {
    if let Some(pics) = status["pics"].as_array() {
        return pics
            .iter()
            .filter_map(|p| utils::text(&p["large"]["url"]).or_else(|| utils::text(&p["url"])))
            .collect();
    }
    let infos = &status["pic_infos"];
    let ordered: Vec<String> = status["pic_ids"]
        .as_array()
        .map(|ids| ids.iter().filter_map(utils::text).collect())
        .unwrap_or_else(|| {
            infos
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default()
        });
    ordered
        .iter()
        .filter_map(|pid| {
            let info = &infos[pid.as_str()];
            utils::text(&info["largest"]["url"]).or_else(|| utils::text(&info["large"]["url"]))
        })
        .collect()
}

fn video_url(info: &Value) -> Option<String> {
    ["mp4_720p_mp4", "mp4_hd_url", "mp4_sd_url", "stream_url"]
        .iter()
        .find_map(|k| utils::text(&info[*k]))
}

pub(crate) fn parse_status(status: &Value, url: &str, id: &str) -> Result<ExtractResult> {
    let raw = utils::text(&status["text_raw"])
        .or_else(|| utils::text(&status["text"]))
        .unwrap_or_default();
    let text = utils::strip_html(&raw);
    let title = utils::title_from_text(&text);

    let user = &status["user"];
    let author = Author::new(
        utils::id(&user["idstr"]).or_else(|| utils::id(&user["id"])).unwrap_or_default(),
        utils::text(&user["screen_name"])
            .or_else(|| utils::text(&user["name"]))
            .unwrap_or_default(),
    )
    .with_avatar(utils::text(&user["avatar_hd"]).or_else(|| utils::text(&user["profile_image_url"])));

    let mut result = ExtractResult::new(PLATFORM, url, title, author);
    result.content_id = utils::id(&status["mid"]).or_else(|| Some(id.to_string()));
    result.description = (!text.is_empty()).then(|| text.clone());
    result.create_time = utils::text(&status["created_at"]).and_then(|t| utils::parse_legacy_time(&t));
    result.location = utils::text(&status["region_name"])
        .map(|r| r.trim_start_matches("发布于").trim().to_string())
        .filter(|r| !r.is_empty());
    result.stats = Stats {
        likes: utils::count(&status["attitudes_count"]),
        comments_count: utils::count(&status["comments_count"]),
        reposts: utils::count(&status["reposts_count"]),
        ..Stats::default()
    };

    for src in image_urls(status) {
        result.media.push(MediaItem::image(PLATFORM, &utils::https(&src)));
    }

    let page_info = &status["page_info"];
    let is_video = utils::text(&page_info["type"]).as_deref() == Some("video")
        || utils::text(&page_info["object_type"]).as_deref() == Some("video");
    if is_video {
        let found = video_url(&page_info["urls"]).or_else(|| video_url(&page_info["media_info"]));
        if let Some(src) = found {
            result.media.push(MediaItem::video(PLATFORM, &utils::https(&src)));
        }
        result.duration = utils::count(&page_info["media_info"]["duration"]).filter(|d| *d > 0);
        result.cover_url = utils::text(&page_info["page_pic"]["url"])
            .or_else(|| utils::text(&page_info["page_pic"]))
            .map(|u| utils::https(&u));
    }

    if let Some(items) = status["mix_media_info"]["items"].as_array() {
        for item in items {
            let data = &item["data"];
            match utils::text(&item["type"]).as_deref() {
                Some("pic") => {
                    if let Some(src) = utils::text(&data["largest"]["url"]) {
                        result.media.push(MediaItem::image(PLATFORM, &utils::https(&src)));
                    }
                }
                Some("video") => {
                    if let Some(src) = video_url(&data["media_info"]) {
                        result.media.push(MediaItem::video(PLATFORM, &utils::https(&src)));
                    }
                }
                _ => {}
            }
        }
    }

    result.tags = utils::hashtags(&text);
    Ok(result)
}

pub(crate) fn parse_comment(value: &Value) -> Option<Comment> {
    let id = utils::id(&value["id"]).unwrap_or_default();
    let content = utils::strip_html(&utils::text(&value["text"]).unwrap_or_default());
    if id.is_empty() && content.is_empty() {
        return None;
    }
    let user = &value["user"];
    let mut comment = Comment::new(id, utils::text(&user["screen_name"]).unwrap_or_default(), content);
    comment.avatar = utils::text(&user["profile_image_url"]);
    comment.like_count = utils::count(&value["like_count"]).or_else(|| utils::count(&value["like_counts"]));
    comment.create_time = utils::text(&value["created_at"]).and_then(|t| utils::parse_legacy_time(&t));
    comment.ip_location = utils::text(&value["source"])
        .map(|s| s.trim_start_matches("来自").to_string())
        .filter(|s| !s.is_empty());
    comment.reply_count = utils::count(&value["total_number"]);
    if let Some(children) = value["comments"].as_array() {
        comment.replies = children.iter().filter_map(parse_comment).collect();
    }
    Some(comment)
}

/// `max_id:max_id_type` continuation; a zero max_id ends the listing
fn next_cursor(max_id: &Value, max_id_type: &Value) -> Option<Cursor> {
    let id = utils::id(max_id).filter(|m| m != "0")?;
    let kind = utils::id(max_id_type).unwrap_or_else(|| "0".to_string());
    Some(Cursor::Token(format!("{}:{}", id, kind)))
}

fn split_cursor(cursor: &Cursor) -> (String, String) {
    match cursor {
        Cursor::Token(t) => match t.split_once(':') {
            Some((id, kind)) => (id.to_string(), kind.to_string()),
            None => (t.clone(), "0".to_string()),
        },
        _ => ("0".to_string(), "0".to_string()),
    }
}

/// Error for a `{"ok": 0|-100, ...}` envelope
fn envelope_error(data: &Value) -> Error {
    let ok = data["ok"].as_i64().unwrap_or(0);
    let message = utils::text(&data["msg"]).unwrap_or_else(|| format!("ok={}", ok));
    let reason = if ok == -100 {
        ExtractionReason::AuthRequired
    } else if message.contains("删除") || message.contains("不存在") {
        ExtractionReason::NotFound
    } else {
        ExtractionReason::ParseFailed
    };
    Error::extraction(PLATFORM, reason, message)
}

fn mobile_get(url: &str, cookies: &Credentials) -> HttpRequest {
    HttpRequest::get(url)
        .for_platform(PLATFORM)
        .browser(true)
        .credentials(cookies)
        .referer("https://m.weibo.cn/")
        .header("X-Requested-With", "XMLHttpRequest")
}

struct Comments<'a> {
    ctx: AdapterContext<'a>,
    mid: String,
}

impl Comments<'_> {
    async fn get(&self, url: &str) -> Result<Value> {
        let response = self.ctx.transport.execute(&mobile_get(url, self.ctx.credentials)).await?;
        let data = response.json_value().map_err(|e| e.into_extraction(PLATFORM))?;
        if data["ok"].as_i64() == Some(1) {
            Ok(data)
        } else {
            Err(envelope_error(&data))
        }
    }
}

#[async_trait]
impl CommentSource for Comments<'_> {
    async fn page(&self, cursor: &Cursor) -> Result<CommentPage> {
        let (max_id, kind) = split_cursor(cursor);
        let mut url = format!("https://m.weibo.cn/comments/hotflow?id={0}&mid={0}&max_id_type={1}", self.mid, kind);
        if max_id != "0" {
            url.push_str(&format!("&max_id={}", max_id));
        }
        let data = self.get(&url).await?;
        let inner = &data["data"];
        let comments = inner["data"]
            .as_array()
            .map(|list| list.iter().filter_map(parse_comment).collect())
            .unwrap_or_default();
        Ok(CommentPage::new(comments, next_cursor(&inner["max_id"], &inner["max_id_type"])))
    }

    async fn replies(&self, parent: &Comment, cursor: &Cursor) -> Result<CommentPage> {
        let (max_id, kind) = split_cursor(cursor);
        let url = format!(
            "https://m.weibo.cn/comments/hotFlowChild?cid={}&max_id={}&max_id_type={}",
            parent.id, max_id, kind
        );
        let data = self.get(&url).await?;
        let comments = data["data"]
            .as_array()
            .map(|list| list.iter().filter_map(parse_comment).collect())
            .unwrap_or_default();
        Ok(CommentPage::new(comments, next_cursor(&data["max_id"], &data["max_id_type"])))
    }
}

#[derive(Debug, Default)]
pub struct Weibo;

impl Weibo {
    pub fn new() -> Self {
        Self
    }

    /// Mint anonymous SUB/SUBP cookies; `None` when passport refuses
    async fn visitor_cookies(&self, ctx: &AdapterContext<'_>) -> Option<Credentials> {
        match self.try_visitor_cookies(ctx).await {
            Ok(cookies) => cookies,
            Err(e) => {
                warn!(platform = "weibo", stage = "visitor", error = %e, "visitor cookie flow failed");
                None
            }
        }
    }

    async fn try_visitor_cookies(&self, ctx: &AdapterContext<'_>) -> Result<Option<Credentials>> {
        let gen = HttpRequest::post("https://passport.weibo.com/visitor/genvisitor")
            .for_platform(PLATFORM)
            .browser(false)
            .form(&[("cb", "gen_callback"), ("fp", VISITOR_FP)]);
        let body = ctx.transport.execute(&gen).await?.text();
        let Some(generated) = utils::capture_json(&body, &GEN_CALLBACK) else {
            return Ok(None);
        };
        let Some(tid) = utils::text(&generated["data"]["tid"]) else {
            return Ok(None);
        };

        let incarnate = format!(
            "https://passport.weibo.com/visitor/visitor?a=incarnate&t={}&w=2&cb=cross_domain&from=weibo",
            url::form_urlencoded::byte_serialize(tid.as_bytes()).collect::<String>()
        );
        let response = ctx
            .transport
            .execute(&HttpRequest::get(incarnate).for_platform(PLATFORM).browser(false))
            .await?;
        // the passport may set SUB/SUBP directly; the JSONP body is the fallback
        let issued: Vec<(String, String)> = response
            .set_cookies()
            .into_iter()
            .filter(|(name, _)| name == "SUB" || name == "SUBP")
            .collect();
        if issued.iter().any(|(name, _)| name == "SUB") {
            debug!(platform = "weibo", stage = "visitor", "visitor cookies issued via Set-Cookie");
            return Ok(Some(
                ctx.credentials
                    .merged(issued.iter().map(|(n, v)| (n.as_str(), v.as_str()))),
            ));
        }
        let body = response.text();
        let Some(visitor) = utils::capture_json(&body, &CROSS_DOMAIN) else {
            return Ok(None);
        };
        let Some(sub) = utils::text(&visitor["data"]["sub"]) else {
            return Ok(None);
        };
        let subp = utils::text(&visitor["data"]["subp"]).unwrap_or_default();
        debug!(platform = "weibo", stage = "visitor", "visitor cookies issued");
        Ok(Some(ctx.credentials.merged([("SUB", sub.as_str()), ("SUBP", subp.as_str())])))
    }

    /// `weibo.com/ajax/statuses/show`; 403 triggers one visitor-cookie retry
    async fn ajax_show(&self, ctx: &AdapterContext<'_>, id: &str, cookies: &mut Credentials) -> Result<Option<Value>> {
        let url = format!("https://weibo.com/ajax/statuses/show?id={}", id);
        let request = |cookies: &Credentials| {
            HttpRequest::get(url.as_str())
                .for_platform(PLATFORM)
                .browser(false)
                .credentials(cookies)
                .referer("https://weibo.com/")
                .header("X-Requested-With", "XMLHttpRequest")
        };
        let response = match ctx.transport.execute(&request(&*cookies)).await {
            Ok(response) => response,
            Err(e) if e.status() == Some(403) => {
                let Some(visitor) = self.visitor_cookies(ctx).await else {
                    return Err(e);
                };
                *cookies = visitor;
                ctx.transport.execute(&request(&*cookies)).await?
            }
            Err(e) => return Err(e),
        };
        let data = response.json_value().map_err(|e| e.into_extraction(PLATFORM))?;
        if let Some(status) = status_object(&data) {
            return Ok(Some(status.clone()));
        }
        if data.get("ok").is_some() {
            return Err(envelope_error(&data));
        }
        Ok(None)
    }

    async fn mobile_show(&self, ctx: &AdapterContext<'_>, id: &str, cookies: &Credentials) -> Result<Option<Value>> {
        let request = mobile_get(&format!("https://m.weibo.cn/statuses/show?id={}", id), cookies);
        let data = ctx.transport.execute(&request).await?.json_value().map_err(|e| e.into_extraction(PLATFORM))?;
        match status_object(&data["data"]).or_else(|| status_object(&data)) {
            Some(status) => Ok(Some(status.clone())),
            None if data["ok"].as_i64() == Some(1) => Ok(None),
            None => Err(envelope_error(&data)),
        }
    }

    async fn render_data(&self, ctx: &AdapterContext<'_>, id: &str, cookies: &mut Credentials) -> Result<Option<Value>> {
        let url = format!("https://m.weibo.cn/detail/{}", id);
        let mut page = ctx.transport.follow(mobile_get(&url, cookies)).await?.text();
        if page.contains(VISITOR_WALL) {
            debug!(platform = "weibo", stage = "render_data", "visitor wall, requesting visitor cookies");
            if let Some(visitor) = self.visitor_cookies(ctx).await {
                *cookies = visitor;
                page = ctx.transport.follow(mobile_get(&url, cookies)).await?.text();
            }
        }
        Ok(utils::capture_json(&page, &RENDER_DATA).and_then(|data| {
            let status = &data[0]["status"];
            status.is_object().then(|| status.clone())
        }))
    }
}

#[async_trait]
impl Extractor for Weibo {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn supports_comments(&self) -> bool {
        true
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let id = status_id(url).ok_or_else(|| Error::parse(PLATFORM, format!("no status id in {}", url)))?;
        let mut cookies = ctx.credentials.clone();
        let mut failures: Vec<Error> = Vec::new();

        match self.ajax_show(&ctx, &id, &mut cookies).await {
            Ok(Some(status)) => {
                info!(platform = "weibo", url, stage = "ajax", "status via AJAX API");
                return parse_status(&status, url, &id);
            }
            Ok(None) => debug!(platform = "weibo", url, stage = "ajax", "no status in AJAX response"),
            Err(e) => {
                warn!(platform = "weibo", url, stage = "ajax", error = %e, "AJAX API failed");
                failures.push(e);
            }
        }

        // m.weibo.cn only understands numeric ids
        let mid = to_mid(&id).unwrap_or_else(|| id.clone());
        match self.mobile_show(&ctx, &mid, &cookies).await {
            Ok(Some(status)) => {
                info!(platform = "weibo", url, stage = "mobile_api", "status via mobile API");
                return parse_status(&status, url, &id);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(platform = "weibo", url, stage = "mobile_api", error = %e, "mobile API failed");
                failures.push(e);
            }
        }

        match self.render_data(&ctx, &mid, &mut cookies).await {
            Ok(Some(status)) => {
                info!(platform = "weibo", url, stage = "render_data", "status via detail page");
                return parse_status(&status, url, &id);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(platform = "weibo", url, stage = "render_data", error = %e, "detail page failed");
                failures.push(e);
            }
        }

        if let Some(gone) = failures.into_iter().find(|e| e.is_not_found()) {
            return Err(gone.into_extraction(PLATFORM));
        }
        Err(Error::extraction(
            PLATFORM,
            ExtractionReason::AuthRequired,
            "every strategy was refused; configure weibo SUB/SUBP cookies",
        ))
    }

    async fn fetch_comments(&self, ctx: AdapterContext<'_>, url: &str, max_count: usize) -> Result<Vec<Comment>> {
        let id = status_id(url).ok_or_else(|| Error::parse(PLATFORM, format!("no status id in {}", url)))?;
        let mid = to_mid(&id).ok_or_else(|| Error::parse(PLATFORM, format!("malformed status id {}", id)))?;
        let source = Comments { ctx, mid };
        paginator::collect(&source, PLATFORM, url, max_count).await
    }
}
