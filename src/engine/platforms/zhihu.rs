// Zhihu - js-initialData entities, v4 API fallback, comment_v5 listings

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::fetch_json;
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, Comment, ExtractResult, MediaItem, Platform, Stats};
use crate::engine::paginator::{self, CommentPage, CommentSource, Cursor};
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::transport::HttpRequest;
use crate::engine::utils;

const PLATFORM: Platform = Platform::Zhihu;
const API: &str = "https://www.zhihu.com/api/v4";
const DESCRIPTION_CHARS: usize = 500;

lazy_static! {
    static ref ARTICLE: Regex = Regex::new(r"zhuanlan\.zhihu\.com/p/(\d+)").unwrap();
    static ref ANSWER: Regex = Regex::new(r"(?:question/(\d+)/)?answer/(\d+)").unwrap();
    static ref QUESTION: Regex = Regex::new(r"question/(\d+)").unwrap();
}

/// What a link points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Article(String),
    Answer { question: Option<String>, answer: String },
    Question(String),
}

impl Target {
    pub fn from_url(url: &str) -> Option<Self> {
        if let Some(c) = ARTICLE.captures(url) {
            return Some(Self::Article(c[1].to_string()));
        }
        if let Some(c) = ANSWER.captures(url) {
            return Some(Self::Answer {
                question: c.get(1).map(|m| m.as_str().to_string()),
                answer: c[2].to_string(),
            });
        }
        QUESTION.captures(url).map(|c| Self::Question(c[1].to_string()))
    }

    fn id(&self) -> &str {
        match self {
            Self::Article(id) | Self::Question(id) => id,
            Self::Answer { answer, .. } => answer,
        }
    }

    /// `initialState.entities` collection holding this target
    fn entity_kind(&self) -> &'static str {
        match self {
            Self::Article(_) => "articles",
            Self::Answer { .. } => "answers",
            Self::Question(_) => "questions",
        }
    }

    fn api_url(&self) -> String {
        match self {
            Self::Article(id) => format!("{}/articles/{}", API, id),
            Self::Answer { answer, .. } => format!(
                "{}/answers/{}?include=content,voteup_count,comment_count,created_time,question",
                API, answer
            ),
            Self::Question(id) => format!(
                "{}/questions/{}?include=detail,answer_count,comment_count,follower_count,visit_count,topics,author",
                API, id
            ),
        }
    }

    fn comment_url(&self) -> String {
        format!(
            "{}/comment_v5/{}/{}/root_comment?order_by=score&limit=20&offset=",
            API,
            self.entity_kind(),
            self.id()
        )
    }
}

/// Anti-bot challenge page instead of content
pub(crate) fn is_challenge(page: &str) -> bool {
    page.contains("zse-ck") && page.len() < 2000
}

/// Reads camelCase page entities and snake_case API objects alike
fn field<'a>(value: &'a Value, camel: &str, snake: &str) -> &'a Value {
    match value.get(camel) {
        Some(v) if !v.is_null() => v,
        _ => &value[snake],
    }
}

fn author(value: &Value) -> Author {
    Author::new(
        utils::text(field(value, "urlToken", "url_token"))
            .or_else(|| utils::id(&value["id"]))
            .unwrap_or_default(),
        utils::text(&value["name"]).unwrap_or_default(),
    )
    .with_avatar(utils::text(field(value, "avatarUrl", "avatar_url")))
    .with_handle(utils::text(field(value, "urlToken", "url_token")))
}

/// Entity (page) or API object → result
pub(crate) fn parse_entity(entity: &Value, target: &Target, url: &str) -> Result<ExtractResult> {
    let html = match target {
        Target::Question(_) => utils::text(&entity["detail"]),
        _ => utils::text(&entity["content"]),
    }
    .unwrap_or_default();
    let body = utils::strip_html(&html);

    let title = match target {
        Target::Answer { .. } => utils::text(&entity["question"]["title"]),
        _ => utils::text(&entity["title"]),
    }
    .unwrap_or_else(|| utils::title_from_text(&body));

    let mut result = ExtractResult::new(PLATFORM, url, title, author(&entity["author"]));
    result.content_id = Some(target.id().to_string());
    result.description = (!body.is_empty()).then(|| utils::truncate_chars(&body, DESCRIPTION_CHARS));

    let created = match target {
        Target::Article(_) => field(entity, "created", "created"),
        Target::Answer { .. } => field(entity, "createdTime", "created_time"),
        Target::Question(_) => field(entity, "created", "created"),
    };
    result.create_time = utils::timestamp(created);

    result.stats = match target {
        Target::Question(_) => Stats {
            views: utils::count(field(entity, "visitCount", "visit_count")),
            comments_count: utils::count(field(entity, "commentCount", "comment_count")),
            ..Stats::default()
        },
        _ => Stats {
            likes: utils::count(field(entity, "voteupCount", "voteup_count")),
            comments_count: utils::count(field(entity, "commentCount", "comment_count")),
            ..Stats::default()
        },
    };

    result.cover_url = utils::text(field(entity, "titleImage", "image_url"))
        .filter(|u| u.starts_with("http"));
    for src in utils::image_sources(&html) {
        result.media.push(MediaItem::image(PLATFORM, &src));
    }

    result.tags = entity["topics"]
        .as_array()
        .map(|topics| topics.iter().filter_map(|t| utils::text(&t["name"])).collect())
        .unwrap_or_default();
    Ok(result)
}

/// Target entity from `js-initialData`
pub(crate) fn entity_from_page(page: &str, target: &Target) -> Option<Value> {
    let raw = utils::script_by_id(page, "js-initialData")?;
    let data: Value = serde_json::from_str(&raw).ok()?;
    let entity = &data["initialState"]["entities"][target.entity_kind()][target.id()];
    entity.is_object().then(|| entity.clone())
}

pub(crate) fn parse_comment(value: &Value) -> Option<Comment> {
    let id = utils::id(&value["id"]).unwrap_or_default();
    let content = utils::strip_html(&utils::text(&value["content"]).unwrap_or_default());
    if id.is_empty() && content.is_empty() {
        return None;
    }
    let member = &value["author"];
    let mut comment = Comment::new(id, utils::text(&member["name"]).unwrap_or_default(), content);
    comment.avatar = utils::text(&member["avatar_url"]);
    comment.like_count = utils::count(&value["like_count"]);
    comment.create_time = utils::timestamp(&value["created_time"]);
    comment.reply_count = utils::count(&value["child_comment_count"]);
    comment.ip_location = value["comment_tag"].as_array().and_then(|tags| {
        tags.iter()
            .find(|t| utils::text(&t["type"]).as_deref() == Some("ip_info"))
            .and_then(|t| utils::text(&t["text"]))
            .map(|t| t.trim_start_matches("IP 属地").trim().to_string())
    });
    if let Some(children) = value["child_comments"].as_array() {
        comment.replies = children.iter().filter_map(parse_comment).collect();
    }
    Some(comment)
}

/// Listing page; `paging.next` is the continuation URL
pub(crate) fn comment_page(data: &Value) -> CommentPage {
    let comments = data["data"]
        .as_array()
        .map(|list| list.iter().filter_map(parse_comment).collect())
        .unwrap_or_default();
    let paging = &data["paging"];
    let next = match utils::text(&paging["next"]) {
        Some(next) if !utils::flag(&paging["is_end"]).unwrap_or(false) => Some(Cursor::Token(next)),
        _ => None,
    };
    CommentPage::new(comments, next)
}

fn api_request(ctx: &AdapterContext<'_>, url: &str) -> HttpRequest {
    HttpRequest::get(url)
        .for_platform(PLATFORM)
        .browser(false)
        .credentials(ctx.credentials)
        .referer("https://www.zhihu.com/")
        .header("x-requested-with", "fetch")
}

struct Comments<'a> {
    ctx: AdapterContext<'a>,
    first: String,
}

impl Comments<'_> {
    async fn listing(&self, url: &str) -> Result<CommentPage> {
        let data = fetch_json(&self.ctx, api_request(&self.ctx, url)).await?;
        Ok(comment_page(&data))
    }
}

#[async_trait]
impl CommentSource for Comments<'_> {
    async fn page(&self, cursor: &Cursor) -> Result<CommentPage> {
        match cursor {
            Cursor::Token(next) => self.listing(next).await,
            _ => self.listing(&self.first).await,
        }
    }

    async fn replies(&self, parent: &Comment, cursor: &Cursor) -> Result<CommentPage> {
        match cursor {
            Cursor::Token(next) => self.listing(next).await,
            _ => {
                let url = format!(
                    "{}/comment_v5/comment/{}/child_comment?order_by=ts&limit=20&offset=",
                    API, parent.id
                );
                self.listing(&url).await
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Zhihu;

impl Zhihu {
    pub fn new() -> Self {
        Self
    }

    /// Page fetch with the navigation headers Zhihu checks
    async fn page(&self, ctx: &AdapterContext<'_>, url: &str) -> Result<String> {
        let request = HttpRequest::get(url)
            .for_platform(PLATFORM)
            .browser(false)
            .credentials(ctx.credentials)
            .referer("https://www.zhihu.com/")
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("sec-fetch-dest", "document")
            .header("sec-fetch-mode", "navigate")
            .header("sec-fetch-site", "same-origin");
        Ok(ctx.transport.follow(request).await?.text())
    }

    async fn from_api(&self, ctx: &AdapterContext<'_>, target: &Target) -> Result<Value> {
        let data = fetch_json(ctx, api_request(ctx, &target.api_url())).await?;
        if let Some(error) = data.get("error") {
            let message = utils::text(&error["message"]).unwrap_or_else(|| error.to_string());
            let reason = match error["code"].as_i64() {
                Some(4041) | Some(404) => ExtractionReason::NotFound,
                Some(10003) | Some(100) | Some(401) => ExtractionReason::AuthRequired,
                _ => ExtractionReason::ParseFailed,
            };
            return Err(Error::extraction(PLATFORM, reason, message));
        }
        Ok(data)
    }
}

#[async_trait]
impl Extractor for Zhihu {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    fn supports_comments(&self) -> bool {
        true
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let target = Target::from_url(url).ok_or_else(|| Error::parse(PLATFORM, format!("unrecognized link {}", url)))?;

        match self.page(&ctx, url).await {
            Ok(page) if is_challenge(&page) => {
                warn!(platform = "zhihu", url, stage = "page", "challenge page, trying v4 API");
            }
            Ok(page) => match entity_from_page(&page, &target) {
                Some(entity) => return parse_entity(&entity, &target, url),
                None => debug!(platform = "zhihu", url, stage = "page", "entity not in initialData"),
            },
            Err(e) if e.is_not_found() => return Err(e.into_extraction(PLATFORM)),
            Err(e) => warn!(platform = "zhihu", url, stage = "page", error = %e, "page fetch failed, trying v4 API"),
        }

        match self.from_api(&ctx, &target).await {
            Ok(data) => parse_entity(&data, &target, url),
            Err(e) if e.is_not_found() => Err(e.into_extraction(PLATFORM)),
            Err(e) => {
                warn!(platform = "zhihu", url, stage = "api", error = %e, "v4 API failed");
                Err(Error::extraction(
                    PLATFORM,
                    ExtractionReason::AuthRequired,
                    format!("blocked without a z_c0 cookie ({})", e),
                ))
            }
        }
    }

    async fn fetch_comments(&self, ctx: AdapterContext<'_>, url: &str, max_count: usize) -> Result<Vec<Comment>> {
        let target = Target::from_url(url).ok_or_else(|| Error::parse(PLATFORM, format!("unrecognized link {}", url)))?;
        let source = Comments {
            ctx,
            first: target.comment_url(),
        };
        paginator::collect(&source, PLATFORM, url, max_count).await
    }
}
