// Goofish (Xianyu) - signed mtop item detail, page state and og meta fallbacks

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use super::{fetch_json, fetch_page};
use crate::engine::errors::{Error, ExtractionReason, Result};
use crate::engine::models::{Author, ExtractResult, MediaItem, Platform, Stats};
use crate::engine::signing::{self, mtop};
use crate::engine::traits::{AdapterContext, Extractor};
use crate::engine::transport::HttpRequest;
use crate::engine::utils;

const PLATFORM: Platform = Platform::Goofish;
const DETAIL_API: &str = "mtop.taobao.idle.pc.detail";
const ORIGIN: &str = "https://www.goofish.com";

lazy_static! {
    static ref INITIAL_STATE: Regex =
        Regex::new(r"(?s)window\.__INITIAL_STATE__\s*=\s*(\{.*?\})\s*;?\s*</script>").unwrap();
    static ref UNDEFINED: Regex = Regex::new(r"([:\[,])\s*undefined\b").unwrap();
    static ref ITEM_PATH: Regex = Regex::new(r"/item/(\d+)").unwrap();
}

/// Item id from `?id=` / `?itemId=` or an `/item/<id>` path
pub fn item_id(url: &str) -> Option<String> {
    if let Ok(parsed) = Url::parse(url) {
        let id = parsed
            .query_pairs()
            .find(|(k, _)| k == "id" || k == "itemId")
            .map(|(_, v)| v.into_owned())
            .filter(|v| v.chars().all(|c| c.is_ascii_digit()) && !v.is_empty());
        if id.is_some() {
            return id;
        }
    }
    ITEM_PATH.captures(url).map(|c| c[1].to_string())
}

fn first_text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| utils::text(&value[*k]))
}

fn first_id(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| utils::id(&value[*k]))
}

fn image_url(entry: &Value) -> Option<String> {
    let raw = entry.as_str().map(str::to_string).or_else(|| utils::text(&entry["url"]))?;
    Some(utils::https(&raw))
}

/// Item object (mtop `itemDO` or page `itemInfo`) plus optional seller object → result
pub(crate) fn item_to_result(item: &Value, seller: &Value, url: &str) -> Result<ExtractResult> {
    let raw_title = first_text(item, &["title", "itemTitle", "name"]);
    let desc = first_text(item, &["desc", "description"]);
    let title = raw_title
        .map(|t| utils::strip_html(&t))
        .or_else(|| desc.as_deref().map(utils::title_from_text))
        .ok_or_else(|| Error::parse(PLATFORM, "item without title"))?;

    let seller = if seller.is_object() {
        seller
    } else if item["sellerInfo"].is_object() {
        &item["sellerInfo"]
    } else {
        &item["userInfo"]
    };
    let nickname = first_text(seller, &["nick", "nickName", "userNick"])
        .or_else(|| first_text(item, &["sellerNick", "userName"]))
        .unwrap_or_default();
    let author = Author::new(first_id(seller, &["sellerId", "userId"]).unwrap_or_default(), nickname)
        .with_avatar(first_text(seller, &["portraitUrl", "avatar", "headUrl"]).as_deref().map(utils::https));

    let price = first_text(item, &["soldPrice", "price", "itemPrice"])
        .or_else(|| item["price"].as_f64().map(|p| format!("{:.0}", p)));
    let body = desc.unwrap_or_else(|| title.clone());

    let mut result = ExtractResult::new(PLATFORM, url, title, author);
    result.content_id = first_id(item, &["itemId", "id"]);
    result.description = Some(match price {
        Some(price) => format!("¥{} - {}", price, body),
        None => body,
    });
    result.location = first_text(item, &["area", "location", "cityName", "publishCity"])
        .or_else(|| first_text(seller, &["city", "publishCity"]));
    result.create_time = utils::timestamp(&item["gmtCreate"]);
    result.stats = Stats {
        collects: utils::count(&item["wantCnt"]).or_else(|| utils::count(&item["wantCount"])),
        views: utils::count(&item["browseCnt"]),
        ..Stats::default()
    };

    for key in ["imageInfos", "picList", "images", "imageList"] {
        if let Some(list) = item[key].as_array().filter(|l| !l.is_empty()) {
            for entry in list {
                if let Some(src) = image_url(entry) {
                    let width = entry["widthSize"].as_u64().map(|w| w as u32);
                    let height = entry["heightSize"].as_u64().map(|h| h as u32);
                    result.media.push(MediaItem::image(PLATFORM, &src).with_size(width, height));
                }
            }
            break;
        }
    }
    result.cover_url = result.media.first().map(|m| m.url.clone());
    Ok(result)
}

/// mtop `ret` array: `["SUCCESS::调用成功"]` or `["FAIL_SYS_TOKEN_EXOIRED::..."]`
fn ret_error(data: &Value) -> Option<Error> {
    let rets: Vec<&str> = data["ret"].as_array()?.iter().filter_map(Value::as_str).collect();
    if rets.iter().any(|r| r.starts_with("SUCCESS")) {
        return None;
    }
    let joined = rets.join("; ");
    let reason = if joined.contains("TOKEN") || joined.contains("SESSION") {
        ExtractionReason::AuthRequired
    } else if joined.contains("USER_VALIDATE") || joined.contains("FLOW_LIMIT") || joined.contains("哎哟喂") {
        ExtractionReason::RateLimited
    } else if joined.contains("NOT_EXIST") || joined.contains("不存在") || joined.contains("删除") {
        ExtractionReason::NotFound
    } else {
        ExtractionReason::ParseFailed
    };
    Some(Error::extraction(PLATFORM, reason, format!("mtop: {}", joined)))
}

pub(crate) fn parse_detail(data: &Value, url: &str) -> Result<ExtractResult> {
    if let Some(err) = ret_error(data) {
        return Err(err);
    }
    let payload = &data["data"];
    if !payload["itemDO"].is_object() {
        return Err(Error::parse(PLATFORM, "mtop detail without itemDO"));
    }
    item_to_result(&payload["itemDO"], &payload["sellerDO"], url)
}

/// Item object embedded in a server-rendered page
fn item_from_page(page: &str) -> Option<Value> {
    if let Some(raw) = utils::script_by_id(page, "__NEXT_DATA__") {
        if let Ok(next) = serde_json::from_str::<Value>(&raw) {
            let props = &next["props"]["pageProps"];
            for candidate in [&props["itemInfo"], &props["data"]["itemInfo"], &props["itemDO"]] {
                if candidate.is_object() {
                    return Some(candidate.clone());
                }
            }
        }
    }
    let raw = INITIAL_STATE.captures(page)?.get(1)?.as_str();
    let state: Value = serde_json::from_str(&UNDEFINED.replace_all(raw, "${1}null")).ok()?;
    let found = [&state["itemInfo"], &state["item"]["itemInfo"], &state["itemDO"]]
        .into_iter()
        .find(|v| v.is_object())
        .cloned();
    found
}

/// og meta only; usually lacks the seller
fn result_from_meta(page: &str, url: &str) -> Option<ExtractResult> {
    let title = utils::meta_content(page, "og:title").or_else(|| utils::page_title(page))?;
    let mut result = ExtractResult::new(PLATFORM, url, title, Author::new("", ""));
    result.description = utils::meta_content(page, "og:description").or_else(|| utils::meta_content(page, "description"));
    if let Some(cover) = utils::meta_content(page, "og:image") {
        result.media.push(MediaItem::image(PLATFORM, &utils::https(&cover)));
        result.cover_url = Some(utils::https(&cover));
    }
    Some(result)
}

#[derive(Debug, Default)]
pub struct Goofish;

impl Goofish {
    pub fn new() -> Self {
        Self
    }

    async fn detail(&self, ctx: &AdapterContext<'_>, url: &str, id: &str, token: &str) -> Result<ExtractResult> {
        let data = json!({ "itemId": id }).to_string();
        let timestamp = signing::now_millis().to_string();
        let api_url = mtop::request_url(DETAIL_API, "1.0", &data, token, &timestamp)?;
        let request = HttpRequest::get(api_url)
            .for_platform(PLATFORM)
            .browser(false)
            .header("Origin", ORIGIN)
            .referer(&format!("{}/", ORIGIN))
            .credentials(ctx.credentials);
        let response = fetch_json(ctx, request).await?;
        parse_detail(&response, url)
    }

    async fn from_page(&self, ctx: &AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let response = fetch_page(ctx, PLATFORM, url, false).await?;
        let page = response.text();
        if let Some(item) = item_from_page(&page) {
            return item_to_result(&item, &Value::Null, url);
        }
        debug!(platform = "goofish", url, stage = "page", "no embedded item state, reading og meta");
        result_from_meta(&page, url).ok_or_else(|| Error::parse(PLATFORM, "page carries no item data"))
    }
}

#[async_trait]
impl Extractor for Goofish {
    fn platform(&self) -> Platform {
        PLATFORM
    }

    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult> {
        let id = item_id(url).ok_or_else(|| Error::parse(PLATFORM, format!("no item id in {}", url)))?;

        if let Some(token) = ctx.credentials.get(mtop::TOKEN_COOKIE).and_then(mtop::token_from_cookie) {
            match self.detail(&ctx, url, &id, token).await {
                Ok(result) if result.validate().is_ok() => return Ok(result),
                Ok(_) => debug!(platform = "goofish", url, stage = "mtop", "detail without seller"),
                Err(e) if e.is_not_found() => return Err(e.into_extraction(PLATFORM)),
                Err(e) => warn!(platform = "goofish", url, stage = "mtop", error = %e, "signed detail failed"),
            }
        } else {
            debug!(platform = "goofish", url, "no {} cookie, skipping signed detail", mtop::TOKEN_COOKIE);
        }

        let mut result = self.from_page(&ctx, url).await.map_err(|e| e.into_extraction(PLATFORM))?;
        result.content_id.get_or_insert(id);
        if result.validate().is_err() {
            return Err(Error::extraction(
                PLATFORM,
                ExtractionReason::AuthRequired,
                format!("item page is incomplete without a login; configure the {} cookie", mtop::TOKEN_COOKIE),
            ));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::credentials::Credentials;
    use crate::engine::testing::{transport, FakeBackend, FakeResolver};
    use crate::engine::watermark;
    use std::sync::Arc;

    const ITEM_URL: &str = "https://www.goofish.com/item?spm=a21ybx.home&id=712345678901";

    fn detail_payload() -> Value {
        json!({
            "ret": ["SUCCESS::调用成功"],
            "data": {
                "itemDO": {
                    "itemId": 712345678901u64,
                    "title": "九成新 机械键盘",
                    "desc": "用了三个月，无划痕",
                    "soldPrice": "199",
                    "wantCnt": 12,
                    "browseCnt": 340,
                    "gmtCreate": 1700000000000u64,
                    "imageInfos": [
                        {"url": "//img.alicdn.com/bao/uploaded/a.jpg", "widthSize": 800, "heightSize": 800},
                        {"url": "https://img.alicdn.com/bao/uploaded/b.jpg"}
                    ]
                },
                "sellerDO": {"sellerId": 2200, "nick": "键盘侠", "city": "杭州", "portraitUrl": "//img.alicdn.com/p.jpg"}
            }
        })
    }

    #[test]
    fn test_item_id() {
        assert_eq!(item_id(ITEM_URL).as_deref(), Some("712345678901"));
        assert_eq!(item_id("https://2.taobao.com/item/55501").as_deref(), Some("55501"));
        assert_eq!(item_id("https://www.goofish.com/"), None);
    }

    #[test]
    fn test_parse_detail() {
        let result = parse_detail(&detail_payload(), ITEM_URL).unwrap();
        assert_eq!(result.author.nickname, "键盘侠");
        assert_eq!(result.author.id, "2200");
        assert_eq!(result.description.as_deref(), Some("¥199 - 用了三个月，无划痕"));
        assert_eq!(result.location.as_deref(), Some("杭州"));
        assert_eq!(result.stats.collects, Some(12));
        assert_eq!(result.media.len(), 2);
        assert_eq!(result.media[0].url, "https://img.alicdn.com/bao/uploaded/a.jpg");
        assert_eq!(result.media[0].width, Some(800));
        assert!(result.create_time.is_some());
    }

    #[test]
    fn test_ret_errors() {
        let expired = json!({"ret": ["FAIL_SYS_TOKEN_EXOIRED::令牌过期"], "data": {}});
        assert_eq!(parse_detail(&expired, ITEM_URL).unwrap_err().reason(), Some(ExtractionReason::AuthRequired));
        let captcha = json!({"ret": ["FAIL_SYS_USER_VALIDATE::哎哟喂,被挤爆啦"], "data": {}});
        assert_eq!(parse_detail(&captcha, ITEM_URL).unwrap_err().reason(), Some(ExtractionReason::RateLimited));
    }

    #[tokio::test]
    async fn test_signed_detail_with_token() {
        let backend = Arc::new(FakeBackend::new());
        backend.json("https://h5api.m.goofish.com/h5/mtop.taobao.idle.pc.detail/1.0/*", detail_payload());
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::from_pairs([("_m_h5_tk", "tok123_1700000000000"), ("cookie2", "abc")]);
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let result = Goofish::new().extract(ctx, ITEM_URL).await.unwrap();
        assert_eq!(result.title, "九成新 机械键盘");

        let request = &backend.requests()[0];
        assert!(request.url.contains("appKey=12574478"));
        assert!(request.url.contains("sign="));
        assert!(request.header_value("Cookie").unwrap_or_default().contains("_m_h5_tk=tok123_1700000000000"));
        assert_eq!(backend.calls(ITEM_URL), 0);
    }

    #[tokio::test]
    async fn test_page_state_without_token() {
        let next = json!({"props": {"pageProps": {"itemInfo": {
            "itemId": "712345678901",
            "title": "二手相机",
            "price": 1500,
            "picList": ["//img.alicdn.com/c.jpg"],
            "sellerInfo": {"nickName": "摄影爱好者", "userId": "99"}
        }}}});
        let page = format!(
            r#"<html><head><script id="__NEXT_DATA__" type="application/json">{}</script></head></html>"#,
            next
        );
        let backend = Arc::new(FakeBackend::new());
        backend.html(ITEM_URL, &page);
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::default();
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let result = Goofish::new().extract(ctx, ITEM_URL).await.unwrap();
        assert_eq!(result.author.nickname, "摄影爱好者");
        assert_eq!(result.description.as_deref(), Some("¥1500 - 二手相机"));
        assert_eq!(result.cover_url.as_deref(), Some("https://img.alicdn.com/c.jpg"));
        assert_eq!(backend.calls_with_prefix("https://h5api.m.goofish.com"), 0);
    }

    #[tokio::test]
    async fn test_meta_only_page_needs_login() {
        let page = r#"<html><head><meta property="og:title" content="闲鱼商品"/><meta property="og:image" content="https://img.alicdn.com/x.jpg"/></head></html>"#;
        let backend = Arc::new(FakeBackend::new());
        backend.html(ITEM_URL, page);
        let transport = transport(&backend);
        let resolver = FakeResolver::new();
        let creds = Credentials::default();
        let ctx = AdapterContext::new(&transport, &creds, &resolver);

        let err = Goofish::new().extract(ctx, ITEM_URL).await.unwrap_err();
        assert_eq!(err.reason(), Some(ExtractionReason::AuthRequired));
    }

    #[test]
    fn test_initial_state_with_undefined() {
        let page = r#"<script>window.__INITIAL_STATE__ = {"itemInfo": {"title": "自行车", "desc": undefined, "sellerNick": "骑手"}};</script>"#;
        let item = item_from_page(page).unwrap();
        let result = item_to_result(&item, &Value::Null, ITEM_URL).unwrap();
        assert_eq!(result.author.nickname, "骑手");
        assert_eq!(result.description.as_deref(), Some("自行车"));
    }

    #[test]
    fn test_image_watermark_param_is_stripped() {
        let mut payload = detail_payload();
        payload["data"]["itemDO"]["imageInfos"][1]["url"] =
            json!("https://img.alicdn.com/bao/uploaded/b.jpg?watermark=1&spm=x");
        let result = parse_detail(&payload, ITEM_URL).unwrap();
        assert_eq!(result.media[1].url, "https://img.alicdn.com/bao/uploaded/b.jpg?spm=x");
        assert!(result.media.iter().all(|m| !watermark::has_marker(Platform::Goofish, &m.url)));
        assert!(result.validate().is_ok());
    }
}
