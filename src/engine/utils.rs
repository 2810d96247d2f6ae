// Helper functions shared by adapters

use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime, UtcOffset};

lazy_static! {
    static ref HASHTAG: Regex = Regex::new(r"#([^#\s]+?)#|#([^#\s]+)").unwrap();
}

/// Non-empty string field
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Id-like field that may be a number or a string
pub fn id(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        other => text(other),
    }
}

/// Boolean-ish flag (`true`, `1`, `"1"`, `"true"`)
pub fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a counter; unknown or malformed input is `None`, never 0.
///
/// Accepts numbers and display strings such as `"1,234"`, `"1.2万"`, `"3亿"` or `"10万+"`.
pub fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_i64().filter(|v| *v >= 0).map(|v| v as u64))
            .or_else(|| n.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(s) => parse_count(s),
        _ => None,
    }
}

pub fn parse_count(raw: &str) -> Option<u64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '+' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    let (number, multiplier) = if let Some(n) = cleaned.strip_suffix('万') {
        (n, 10_000.0)
    } else if let Some(n) = cleaned.strip_suffix('亿') {
        (n, 100_000_000.0)
    } else if let Some(n) = cleaned.strip_suffix(&['w', 'W'][..]) {
        (n, 10_000.0)
    } else if let Some(n) = cleaned.strip_suffix(&['k', 'K'][..]) {
        (n, 1_000.0)
    } else {
        (cleaned.as_str(), 1.0)
    };
    let parsed: f64 = number.parse().ok()?;
    if parsed < 0.0 || !parsed.is_finite() {
        return None;
    }
    Some((parsed * multiplier).round() as u64)
}

/// First entry of a `url_list` array
pub fn first_url(value: &Value) -> Option<String> {
    value["url_list"].as_array()?.iter().find_map(text)
}

/// Normalize protocol-relative and plain-http URLs
pub fn https(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{}", rest)
    } else {
        url.to_string()
    }
}

/// Unix timestamp in seconds or milliseconds
pub fn from_unix(ts: i64) -> Option<OffsetDateTime> {
    if ts <= 0 {
        return None;
    }
    let seconds = if ts > 1_000_000_000_000 { ts / 1000 } else { ts };
    OffsetDateTime::from_unix_timestamp(seconds).ok()
}

pub fn timestamp(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::Number(n) => n.as_i64().and_then(from_unix),
        Value::String(s) => s.trim().parse::<i64>().ok().and_then(from_unix),
        _ => None,
    }
}

/// `Wed Oct 10 20:19:24 +0800 2018` (Weibo and Twitter), normalized to UTC
pub fn parse_legacy_time(raw: &str) -> Option<OffsetDateTime> {
    let format = format_description!(
        "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute] [year]"
    );
    OffsetDateTime::parse(raw.trim(), format)
        .ok()
        .map(|t| t.to_offset(UtcOffset::UTC))
}

/// RFC 3339 timestamp normalized to UTC
pub fn parse_rfc3339(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw.trim(), &time::format_description::well_known::Rfc3339)
        .ok()
        .map(|t| t.to_offset(UtcOffset::UTC))
}

/// `YYYYMMDD` as midnight UTC
pub fn parse_compact_date(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = raw[0..4].parse().ok()?;
    let month: u8 = raw[4..6].parse().ok()?;
    let day: u8 = raw[6..8].parse().ok()?;
    let month = Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day)
        .ok()
        .map(|d| d.midnight().assume_utc())
}

/// Text content of an HTML fragment, entities decoded
pub fn strip_html(fragment: &str) -> String {
    if !fragment.contains('<') && !fragment.contains('&') {
        return fragment.trim().to_string();
    }
    let with_breaks = fragment
        .replace("<br />", "\n")
        .replace("<br/>", "\n")
        .replace("<br>", "\n")
        .replace("</p>", "</p>\n");
    let html = Html::parse_fragment(&with_breaks);
    let text: String = html.root_element().text().collect();
    text.trim().to_string()
}

/// `src`/`data-original` of every `<img>` in an HTML fragment
pub fn image_sources(fragment: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("img") else {
        return Vec::new();
    };
    let html = Html::parse_fragment(fragment);
    let mut out: Vec<String> = Vec::new();
    for img in html.select(&selector) {
        let attrs = img.value();
        let src = attrs
            .attr("data-original")
            .or_else(|| attrs.attr("data-actualsrc"))
            .or_else(|| attrs.attr("src"));
        if let Some(src) = src {
            if src.starts_with("http") || src.starts_with("//") {
                let src = https(src);
                if !out.contains(&src) {
                    out.push(src);
                }
            }
        }
    }
    out
}

/// Text of the `<script id="...">` element
pub fn script_by_id(page: &str, id: &str) -> Option<String> {
    let selector = Selector::parse(&format!("script#{}", id)).ok()?;
    let html = Html::parse_document(page);
    let text: String = html.select(&selector).next()?.text().collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// `<meta property|name="...">` content
pub fn meta_content(page: &str, key: &str) -> Option<String> {
    let selector = Selector::parse(&format!(
        r#"meta[property="{key}"], meta[name="{key}"]"#
    ))
    .ok()?;
    let html = Html::parse_document(page);
    let content = html
        .select(&selector)
        .find_map(|el| el.value().attr("content"))?;
    let content = content.trim();
    (!content.is_empty()).then(|| content.to_string())
}

/// Text of the document `<title>`
pub fn page_title(page: &str) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    let html = Html::parse_document(page);
    let text: String = html.select(&selector).next()?.text().collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// `#topic#` and `#topic` hashtags in order of appearance
pub fn hashtags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for cap in HASHTAG.captures_iter(text) {
        let tag = cap
            .get(1)
            .or_else(|| cap.get(2))
            .map(|m| m.as_str().trim().trim_end_matches("[话题]").to_string());
        if let Some(tag) = tag {
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
    }
    tags
}

/// First `max` characters of `text`
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Title for platforms whose posts only carry body text
pub fn title_from_text(text: &str) -> String {
    let first_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    truncate_chars(first_line.trim(), 100)
}

/// Capture group 1 of `re`, parsed as JSON
pub fn capture_json(page: &str, re: &Regex) -> Option<Value> {
    let raw = re.captures(page)?.get(1)?.as_str().trim();
    let raw = raw.trim_end_matches(';').trim();
    serde_json::from_str(raw).ok()
}
