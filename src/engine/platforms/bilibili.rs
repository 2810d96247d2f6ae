// Bilibili - web-interface view API, progressive play URL, reply API

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{browser_get, fetch_json};
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, Comment, ExtractResult, MediaItem, Part, Platform, Stats};
use crate::engine::paginator::{self, CommentPage, CommentSource, Cursor};
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::utils;

const PLATFORM: Platform = Platform::Bilibili;
const API: &str = "https://api.bilibili.com";
const REFERER: &str = "https://www.bilibili.com/";
const PAGE_SIZE: u64 = 20;

lazy_static! {
    static ref BVID: Regex = Regex::new(r"(BV[0-9A-Za-z]{10})").unwrap();
    static ref AID: Regex = Regex::new(r"/video/av(\d+)").unwrap();
}

/// Video key in a canonical link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoKey {
    Bvid(String),
    Aid(u64),
}

impl VideoKey {
    pub fn from_url(url: &str) -> Option<Self> {
        if let Some(c) = BVID.captures(url) {
            return Some(Self::Bvid(c[1].to_string()));
        }
        AID.captures(url)
            .and_then(|c| c[1].parse().ok())
            .map(Self::Aid)
    }

    fn query(&self) -> String {
        match self {
            Self::Bvid(bvid) => format!("bvid={}", bvid),
            Self::Aid(aid) => format!("aid={}", aid),
        }
    }
}

/// 1-based part number from `?p=`
fn part_number(url: &str) -> usize {
    Url::parse(url)
        .ok()
        .and_then(|u| u.query_pairs().find(|(k, _)| k == "p").and_then(|(_, v)| v.parse().ok()))
        .filter(|p: &usize| *p > 0)
        .unwrap_or(1)
}

/// Map a non-zero API `code`
fn api_error(data: &Value) -> Error {
    let code = data["code"].as_i64().unwrap_or(-1);
    let message = utils::text(&data["message"]).unwrap_or_else(|| format!("code {}", code));
    let reason = match code {
        -404 | 62002 | 62004 | 62012 => ExtractionReason::NotFound,
        -101 | -403 | 87008 => ExtractionReason::AuthRequired,
        -412 | -509 | -799 => ExtractionReason::RateLimited,
        _ => ExtractionReason::ParseFailed,
    };
    Error::extraction(PLATFORM, reason, format!("API code {}: {}", code, message))
}

/// `data` of a successful response
fn api_data(data: Value) -> Result<Value> {
    match data["code"].as_i64() {
        Some(0) => Ok(data["data"].clone()),
        _ => Err(api_error(&data)),
    }
}

/// view API `data` → result (media is added by the caller)
pub(crate) fn parse_view(data: &Value, url: &str) -> Result<ExtractResult> {
    let title = utils::text(&data["title"]).ok_or_else(|| Error::parse(PLATFORM, "view data has no title"))?;
    let owner = &data["owner"];
    let author = Author::new(
        utils::id(&owner["mid"]).unwrap_or_default(),
        utils::text(&owner["name"]).unwrap_or_default(),
    )
    .with_avatar(utils::text(&owner["face"]).map(|f| utils::https(&f)));

    let mut result = ExtractResult::new(PLATFORM, url, title, author);
    result.content_id = utils::text(&data["bvid"]).or_else(|| utils::id(&data["aid"]));
    result.description = utils::text(&data["desc"]).filter(|d| d != "-");
    result.create_time = utils::timestamp(&data["pubdate"]);
    result.duration = utils::count(&data["duration"]).filter(|d| *d > 0);
    result.cover_url = utils::text(&data["pic"]).map(|p| utils::https(&p));

    let stat = &data["stat"];
    result.stats = Stats {
        likes: utils::count(&stat["like"]),
        comments_count: utils::count(&stat["reply"]),
        shares: utils::count(&stat["share"]),
        collects: utils::count(&stat["favorite"]),
        views: utils::count(&stat["view"]),
        coins: utils::count(&stat["coin"]),
        danmaku: utils::count(&stat["danmaku"]),
        ..Stats::default()
    };
    // single-part videos list themselves as part 1; only real anthologies are kept
    let parts = parse_parts(data);
    if parts.len() > 1 {
        result.parts = parts;
    }
    Ok(result)
}

fn parse_parts(data: &Value) -> Vec<Part> {
    data["pages"]
        .as_array()
        .map(|pages| {
            (1u32..)
                .zip(pages)
                .map(|(n, p)| Part {
                    page: utils::count(&p["page"])
                        .and_then(|v| u32::try_from(v).ok())
                        .unwrap_or(n),
                    title: utils::text(&p["part"]).unwrap_or_default(),
                    duration: utils::count(&p["duration"]).filter(|d| *d > 0),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// cid of the requested part; `None` when `pages` does not have it
fn part_cid(data: &Value, part: usize) -> Option<u64> {
    match data["pages"].as_array() {
        Some(pages) if !pages.is_empty() => pages.get(part - 1).and_then(|p| utils::count(&p["cid"])),
        _ if part == 1 => utils::count(&data["cid"]),
        _ => None,
    }
}

fn part_count(data: &Value) -> usize {
    data["pages"].as_array().map(Vec::len).unwrap_or(0).max(1)
}

pub(crate) fn parse_reply(value: &Value) -> Option<Comment> {
    let id = utils::id(&value["rpid"]).unwrap_or_default();
    let content = utils::text(&value["content"]["message"]).unwrap_or_default();
    if id.is_empty() && content.is_empty() {
        return None;
    }
    let member = &value["member"];
    let mut comment = Comment::new(id, utils::text(&member["uname"]).unwrap_or_default(), content);
    comment.avatar = utils::text(&member["avatar"]);
    comment.like_count = utils::count(&value["like"]);
    comment.create_time = utils::timestamp(&value["ctime"]);
    comment.reply_count = utils::count(&value["rcount"]);
    comment.ip_location = utils::text(&value["reply_control"]["location"])
        .map(|l| l.trim_start_matches("IP属地：").to_string());
    if let Some(inline) = value["replies"].as_array() {
        comment.replies = inline.iter().filter_map(parse_reply).collect();
    }
    Some(comment)
}

/// One reply page; `next` stays `None` once `page.count` is covered
fn reply_page(data: &Value, pn: u32, size: u64) -> CommentPage {
    let comments: Vec<Comment> = data["replies"]
        .as_array()
        .map(|list| list.iter().filter_map(parse_reply).collect())
        .unwrap_or_default();
    let total = utils::count(&data["page"]["count"]);
    let more = match total {
        Some(total) => u64::from(pn) * size < total,
        None => !comments.is_empty(),
    };
    let next = (more && !comments.is_empty()).then(|| Cursor::Page(pn + 1));
    CommentPage::new(comments, next)
}

fn page_number(cursor: &Cursor) -> u32 {
    match cursor {
        Cursor::Page(n) => *n,
        _ => 1,
    }
}

struct Comments<'a> {
    ctx: AdapterContext<'a>,
    aid: u64,
}

impl Comments<'_> {
    async fn get(&self, url: String) -> Result<Value> {
        let request = browser_get(&self.ctx, PLATFORM, &url, false).referer(REFERER);
        api_data(fetch_json(&self.ctx, request).await?)
    }
}

#[async_trait]
impl CommentSource for Comments<'_> {
    async fn page(&self, cursor: &Cursor) -> Result<CommentPage> {
        let pn = page_number(cursor);
        let data = self
            .get(format!(
                "{}/x/v2/reply?type=1&oid={}&sort=1&pn={}&ps={}",
                API, self.aid, pn, PAGE_SIZE
            ))
            .await?;
        Ok(reply_page(&data, pn, PAGE_SIZE))
    }

    async fn replies(&self, parent: &Comment, cursor: &Cursor) -> Result<CommentPage> {
        let pn = page_number(cursor);
        let data = self
            .get(format!(
                "{}/x/v2/reply/reply?type=1&oid={}&root={}&ps=10&pn={}",
                API, self.aid, parent.id, pn
            ))
            .await?;
        Ok(reply_page(&data, pn, 10))
    }
}

#[derive(Debug, Default)]
pub struct Bilibili;

impl Bilibili {
    pub fn new() -> Self {
        Self
    }

    async fn view(&self, ctx: &AdapterContext<'_>, key: &VideoKey) -> Result<Value> {
        let url = format!("{}/x/web-interface/view?{}", API, key.query());
        let request = browser_get(ctx, PLATFORM, &url, false).referer(REFERER);
        api_data(fetch_json(ctx, request).await?)
    }

    /// Progressive (durl) stream of one part; `fnval=1` asks for a single muxed file
    async fn play_url(&self, ctx: &AdapterContext<'_>, key: &VideoKey, cid: u64) -> Result<Option<String>> {
        let url = format!("{}/x/player/playurl?{}&cid={}&qn=80&fnval=1", API, key.query(), cid);
        let request = browser_get(ctx, PLATFORM, &url, false).referer(REFERER);
        let data = api_data(fetch_json(ctx, request).await?)?;
        Ok(utils::text(&data["durl"][0]["url"]).map(|u| utils::https(&u)))
    }

    async fn tags(&self, ctx: &AdapterContext<'_>, key: &VideoKey) -> Result<Vec<String>> {
        let url = format!("{}/x/tag/archive/tags?{}", API, key.query());
        let request = browser_get(ctx, PLATFORM, &url, false).referer(REFERER);
        let data = api_data(fetch_json(ctx, request).await?)?;
        Ok(data
            .as_array()
            .map(|list| list.iter().filter_map(|t| utils::text(&t["tag_name"])).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Extractor for Bilibili {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn supports_comments(&self) -> bool {
        true
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let key = VideoKey::from_url(url).ok_or_else(|| Error::parse(PLATFORM, format!("no BV/av id in {}", url)))?;
        let data = self.view(&ctx, &key).await?;
        let mut result = parse_view(&data, url)?;

        let part = part_number(url);
        if part > part_count(&data) {
            return Err(Error::extraction(
                PLATFORM,
                ExtractionReason::NotFound,
                format!("part {} out of range, video has {}", part, part_count(&data)),
            ));
        }
        match part_cid(&data, part) {
            Some(cid) => match self.play_url(&ctx, &key, cid).await {
                Ok(Some(play)) => {
                    let dimension = &data["dimension"];
                    let width = utils::count(&dimension["width"]).and_then(|v| u32::try_from(v).ok());
                    let height = utils::count(&dimension["height"]).and_then(|v| u32::try_from(v).ok());
                    result.media.push(MediaItem::video(PLATFORM, &play).with_size(width, height));
                }
                Ok(None) => warn!(platform = "bilibili", url, stage = "playurl", "no durl in play data"),
                Err(e) => warn!(platform = "bilibili", url, stage = "playurl", error = %e, "play URL unavailable"),
            },
            None => warn!(platform = "bilibili", url, stage = "playurl", "no cid in view data"),
        }

        match self.tags(&ctx, &key).await {
            Ok(tags) => result.tags = tags,
            Err(e) => debug!(platform = "bilibili", url, stage = "tags", error = %e, "tags unavailable"),
        }
        if result.tags.is_empty() {
            result.tags = utils::text(&data["tname"]).into_iter().collect();
        }
        Ok(result)
    }

    async fn fetch_comments(&self, ctx: AdapterContext<'_>, url: &str, max_count: usize) -> Result<Vec<Comment>> {
        let key = VideoKey::from_url(url).ok_or_else(|| Error::parse(PLATFORM, format!("no BV/av id in {}", url)))?;
        let aid = match key {
            VideoKey::Aid(aid) => aid,
            VideoKey::Bvid(_) => {
                let data = self.view(&ctx, &key).await?;
                utils::count(&data["aid"]).ok_or_else(|| Error::parse(PLATFORM, "view data has no aid"))?
            }
        };
        let source = Comments { ctx, aid };
        paginator::collect(&source, PLATFORM, url, max_count).await
    }
}
