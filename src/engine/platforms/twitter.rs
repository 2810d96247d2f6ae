// X/Twitter - FxTwitter mirror, syndication embed API, resolver fallback

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::fetch_json;
use super::youtube::from_resolved;
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, ExtractResult, MediaItem, Platform, Stats};
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::transport::{HttpRequest, DESKTOP_UA};
use crate::engine::utils;

const PLATFORM: Platform = Platform::Twitter;
const FXTWITTER_API: &str = "https://api.fxtwitter.com";
const SYNDICATION_API: &str = "https://cdn.syndication.twimg.com/tweet-result";

lazy_static! {
    static ref TWEET_ID: Regex = Regex::new(r"/status(?:es)?/(\d+)").unwrap();
    static ref SCREEN_NAME: Regex = Regex::new(r"^https?://(?:[\w-]+\.)*[\w-]+\.com/(\w+)/status").unwrap();
}

pub fn tweet_id(url: &str) -> Option<String> {
    TWEET_ID.captures(url).map(|c| c[1].to_string())
}

/// Screen name from a status link; `i/web/status/...` carries none
pub fn screen_name(url: &str) -> Option<String> {
    SCREEN_NAME
        .captures(url)
        .map(|c| c[1].to_string())
        .filter(|name| name != "i")
}

fn title_of(text: &str) -> String {
    utils::truncate_chars(text.trim(), 100)
}

/// `{"code":200,"tweet":{...}}` from api.fxtwitter.com
pub(crate) fn parse_fxtwitter(data: &Value, url: &str, id: &str) -> Result<ExtractResult> {
    let tweet = &data["tweet"];
    if !tweet.is_object() {
        let code = data["code"].as_i64().unwrap_or_default();
        let reason = if code == 404 { ExtractionReason::NotFound } else { ExtractionReason::ParseFailed };
        return Err(Error::extraction(
            PLATFORM,
            reason,
            format!("fxtwitter code {}: {}", code, utils::text(&data["message"]).unwrap_or_default()),
        ));
    }

    let user = &tweet["author"];
    let author = Author::new(
        utils::id(&user["id"]).unwrap_or_default(),
        utils::text(&user["name"]).unwrap_or_default(),
    )
    .with_handle(utils::text(&user["screen_name"]))
    .with_avatar(utils::text(&user["avatar_url"]));

    let text = utils::text(&tweet["text"]).unwrap_or_default();
    let mut result = ExtractResult::new(PLATFORM, url, title_of(&text), author);
    result.content_id = Some(id.to_string());
    result.tags = utils::hashtags(&text);
    result.description = Some(text).filter(|t| !t.is_empty());
    result.create_time = utils::timestamp(&tweet["created_timestamp"])
        .or_else(|| tweet["created_at"].as_str().and_then(utils::parse_legacy_time));
    result.stats = Stats {
        likes: utils::count(&tweet["likes"]),
        comments_count: utils::count(&tweet["replies"]),
        shares: utils::count(&tweet["quotes"]),
        collects: utils::count(&tweet["bookmarks"]),
        views: utils::count(&tweet["views"]),
        reposts: utils::count(&tweet["retweets"]),
        ..Stats::default()
    };

    let videos = tweet["media"]["videos"].as_array().cloned().unwrap_or_default();
    let photos = tweet["media"]["photos"].as_array().cloned().unwrap_or_default();
    for video in &videos {
        if let Some(src) = utils::text(&video["url"]) {
            result.media.push(MediaItem::video(PLATFORM, &src).with_size(dimension(&video["width"]), dimension(&video["height"])));
        }
    }
    for photo in &photos {
        if let Some(src) = utils::text(&photo["url"]) {
            result.media.push(MediaItem::image(PLATFORM, &src).with_size(dimension(&photo["width"]), dimension(&photo["height"])));
        }
    }
    if let Some(first) = videos.first() {
        result.duration = first["duration"].as_f64().map(|d| d.round() as u64).filter(|d| *d > 0);
        result.cover_url = utils::text(&first["thumbnail_url"]);
    }
    if result.cover_url.is_none() {
        result.cover_url = photos.first().and_then(|p| utils::text(&p["url"]));
    }
    Ok(result)
}

fn dimension(value: &Value) -> Option<u32> {
    value.as_u64().map(|v| v as u32).filter(|v| *v > 0)
}

/// Highest-bitrate mp4 among `variants`, which use either `src`/`type`
/// (syndication `video`) or `url`/`content_type` (`mediaDetails`)
fn best_mp4(variants: &Value) -> Option<String> {
    variants
        .as_array()?
        .iter()
        .filter(|v| {
            let kind = v["type"].as_str().or_else(|| v["content_type"].as_str());
            kind == Some("video/mp4")
        })
        .max_by_key(|v| {
            let src = v["src"].as_str().or_else(|| v["url"].as_str()).unwrap_or_default();
            (v["bitrate"].as_u64().unwrap_or(0), src.contains("1080"))
        })
        .and_then(|v| utils::text(&v["src"]).or_else(|| utils::text(&v["url"])))
}

/// Syndication embed JSON; no auth, fewer stats
pub(crate) fn parse_syndication(data: &Value, url: &str, id: &str) -> Result<ExtractResult> {
    if data["__typename"].as_str() == Some("TweetTombstone") {
        return Err(Error::extraction(PLATFORM, ExtractionReason::NotFound, "tweet is unavailable"));
    }
    let user = &data["user"];
    if !user.is_object() {
        return Err(Error::parse(PLATFORM, "syndication payload without user"));
    }
    let avatar = utils::text(&user["profile_image_url_https"]).map(|a| a.replace("_normal", ""));
    let author = Author::new(
        utils::id(&user["id_str"]).unwrap_or_default(),
        utils::text(&user["name"]).unwrap_or_default(),
    )
    .with_handle(utils::text(&user["screen_name"]))
    .with_avatar(avatar);

    let text = utils::text(&data["text"]).unwrap_or_default();
    let mut result = ExtractResult::new(PLATFORM, url, title_of(&text), author);
    result.content_id = Some(id.to_string());
    result.tags = utils::hashtags(&text);
    result.description = Some(text).filter(|t| !t.is_empty());
    result.create_time = data["created_at"].as_str().and_then(utils::parse_rfc3339);
    result.stats = Stats {
        likes: utils::count(&data["favorite_count"]),
        comments_count: utils::count(&data["conversation_count"]),
        ..Stats::default()
    };

    let video = &data["video"];
    if video.is_object() {
        if let Some(src) = best_mp4(&video["variants"]) {
            result.media.push(MediaItem::video(PLATFORM, &src));
        }
        result.cover_url = utils::text(&video["poster"]);
        result.duration = video["durationMs"].as_u64().map(|ms| ms / 1000).filter(|d| *d > 0);
    }
    for photo in data["photos"].as_array().into_iter().flatten() {
        if let Some(src) = utils::text(&photo["url"]) {
            result.media.push(MediaItem::image(PLATFORM, &src).with_size(dimension(&photo["width"]), dimension(&photo["height"])));
        }
    }
    if result.media.is_empty() {
        for detail in data["mediaDetails"].as_array().into_iter().flatten() {
            match detail["type"].as_str() {
                Some("video") | Some("animated_gif") => {
                    if let Some(src) = best_mp4(&detail["video_info"]["variants"]) {
                        result.media.push(MediaItem::video(PLATFORM, &src));
                    }
                }
                Some("photo") => {
                    if let Some(src) = utils::text(&detail["media_url_https"]) {
                        result.media.push(MediaItem::image(PLATFORM, &src));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(result)
}

#[derive(Debug, Default)]
pub struct Twitter;

impl Twitter {
    pub fn new() -> Self {
        Self
    }

    async fn fxtwitter(&self, ctx: &AdapterContext<'_>, url: &str, id: &str) -> Result<ExtractResult> {
        let path = match screen_name(url) {
            Some(name) => format!("{}/status/{}", name, id),
            None => format!("i/status/{}", id),
        };
        let request = HttpRequest::get(format!("{}/{}", FXTWITTER_API, path))
            .for_platform(PLATFORM)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        let data = fetch_json(ctx, request).await?;
        parse_fxtwitter(&data, url, id)
    }

    async fn syndication(&self, ctx: &AdapterContext<'_>, url: &str, id: &str) -> Result<ExtractResult> {
        let request = HttpRequest::get(format!("{}?id={}&token=x", SYNDICATION_API, id))
            .for_platform(PLATFORM)
            .user_agent(DESKTOP_UA);
        let data = fetch_json(ctx, request).await?;
        parse_syndication(&data, url, id)
    }
}

#[async_trait]
impl Extractor for Twitter {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let id = tweet_id(url).ok_or_else(|| Error::parse(PLATFORM, format!("no status id in {}", url)))?;
        let mut not_found = None;

        match self.fxtwitter(&ctx, url, &id).await {
            Ok(result) if result.validate().is_ok() => return Ok(result),
            Ok(_) => debug!(platform = "twitter", url, stage = "fxtwitter", "result without content"),
            Err(e) if e.is_not_found() => {
                not_found = Some(e.into_extraction(PLATFORM));
            }
            Err(e) => warn!(platform = "twitter", url, stage = "fxtwitter", error = %e, "fxtwitter failed"),
        }

        match self.syndication(&ctx, url, &id).await {
            Ok(result) if result.validate().is_ok() => return Ok(result),
            Ok(_) => debug!(platform = "twitter", url, stage = "syndication", "result without content"),
            Err(e) if e.is_not_found() => {
                not_found.get_or_insert(e.into_extraction(PLATFORM));
            }
            Err(e) => warn!(platform = "twitter", url, stage = "syndication", error = %e, "syndication failed"),
        }

        match ctx.resolver.resolve(PLATFORM, url, ctx.credentials).await {
            Ok(media) => {
                let mut result = from_resolved(PLATFORM, url, &media)?;
                result.content_id.get_or_insert(id);
                if result.validate().is_ok() {
                    return Ok(result);
                }
            }
            Err(e) => warn!(platform = "twitter", url, stage = "resolver", error = %e, "resolver failed"),
        }

        Err(not_found.unwrap_or_else(|| {
            Error::extraction(PLATFORM, ExtractionReason::ParseFailed, "every strategy failed for this tweet")
        }))
    }
}
