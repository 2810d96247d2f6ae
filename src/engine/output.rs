// Human-readable and JSON renderings of results

use serde_json::{json, Value};
use time::macros::format_description;
use time::OffsetDateTime;

use super::batch::{BatchReport, ItemOutcome};
use super::download::DownloadReport;
use super::errors::{Error, Result};
use super::models::{ExtractResult, MediaKind, Stats};
use super::utils::truncate_chars;

const RULE_WIDTH: usize = 60;
const DESCRIPTION_CHARS: usize = 200;
const URL_CHARS: usize = 100;
const SHOWN_COMMENTS: usize = 5;
const SHOWN_REPLIES: usize = 2;
const MARKDOWN_COMMENTS: usize = 10;
const MARKDOWN_DESCRIPTION_CHARS: usize = 300;

/// 1234 -> "1.2K", 56_000_000 -> "56M"
pub fn compact_count(n: u64) -> String {
    fn scaled(n: u64, unit: u64, suffix: &str) -> String {
        let value = n as f64 / unit as f64;
        let digits = if value < 100.0 {
            format!("{:.1}", value)
        } else {
            format!("{:.0}", value.floor())
        };
        format!("{}{}", digits.trim_end_matches(".0"), suffix)
    }
    match n {
        0..=9_999 => n.to_string(),
        10_000..=999_999 => scaled(n, 1_000, "K"),
        1_000_000..=999_999_999 => scaled(n, 1_000_000, "M"),
        _ => scaled(n, 1_000_000_000, "B"),
    }
}

fn ellipsize(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", truncate_chars(text, max))
    } else {
        text.to_string()
    }
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn format_time(ts: &OffsetDateTime) -> String {
    ts.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| ts.unix_timestamp().to_string())
}

fn format_duration(secs: u64) -> String {
    if secs >= 3600 {
        format!("{}:{:02}:{:02}", secs / 3600, secs % 3600 / 60, secs % 60)
    } else {
        format!("{}:{:02}", secs / 60, secs % 60)
    }
}

fn stat_parts(stats: &Stats) -> Vec<String> {
    [
        ("views", stats.views),
        ("likes", stats.likes),
        ("comments", stats.comments_count),
        ("collects", stats.collects),
        ("shares", stats.shares),
        ("reposts", stats.reposts),
        ("coins", stats.coins),
        ("danmaku", stats.danmaku),
    ]
    .into_iter()
    .filter_map(|(label, value)| value.map(|v| format!("{} {}", label, compact_count(v))))
    .collect()
}

/// Multi-line summary for terminals
pub fn text_summary(result: &ExtractResult) -> String {
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let mut lines = vec![heavy.clone()];

    lines.push(format!("  Platform: {}", result.platform.display_name()));
    if let Some(id) = &result.content_id {
        lines.push(format!("  ID:       {}", id));
    }
    if let Some(ts) = &result.create_time {
        lines.push(format!("  Posted:   {}", format_time(ts)));
    }
    lines.push(light.clone());

    lines.push(format!("  Title:    {}", result.title));
    if let Some(desc) = result.description.as_deref().filter(|d| *d != result.title) {
        lines.push(format!("  Text:     {}", ellipsize(&one_line(desc), DESCRIPTION_CHARS)));
    }
    let mut author = format!("  Author:   {}", result.author.nickname);
    if let Some(handle) = &result.author.handle {
        author.push_str(&format!(" (@{})", handle));
    }
    if !result.author.id.is_empty() {
        author.push_str(&format!(" [uid {}]", result.author.id));
    }
    lines.push(author);
    if let Some(secs) = result.duration {
        lines.push(format!("  Duration: {}", format_duration(secs)));
    }
    if let Some(music) = &result.music {
        match &music.author {
            Some(by) => lines.push(format!("  Music:    {} - {}", music.title, by)),
            None => lines.push(format!("  Music:    {}", music.title)),
        }
    }
    if let Some(location) = &result.location {
        lines.push(format!("  Location: {}", location));
    }
    if result.is_ad == Some(true) {
        lines.push("  Sponsored".to_string());
    }

    let stats = stat_parts(&result.stats);
    if !stats.is_empty() {
        lines.push(format!("  Stats:    {}", stats.join(" | ")));
    }
    if !result.tags.is_empty() {
        let tags: Vec<String> = result.tags.iter().map(|t| format!("#{}", t)).collect();
        lines.push(format!("  Tags:     {}", tags.join(" ")));
    }

    if !result.parts.is_empty() {
        lines.push(format!("  Parts:    {}", result.parts.len()));
        for part in &result.parts {
            let duration = part.duration.map(|d| format!(" ({})", format_duration(d))).unwrap_or_default();
            lines.push(format!("    P{} {}{}", part.page, part.title, duration));
        }
    }

    if !result.media.is_empty() || result.cover_url.is_some() {
        lines.push(light.clone());
    }
    for (i, item) in result.media.iter().enumerate() {
        let label = match item.kind {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
            MediaKind::Audio => "audio",
        };
        lines.push(format!("  [{}] {}: {}", i, label, ellipsize(&item.url, URL_CHARS)));
    }
    if let Some(cover) = &result.cover_url {
        lines.push(format!("  cover: {}", ellipsize(cover, URL_CHARS)));
    }

    if !result.comments.is_empty() {
        lines.push(light.clone());
        lines.push(format!("  Comments ({} fetched):", result.comments.len()));
        for comment in result.comments.iter().take(SHOWN_COMMENTS) {
            let location = comment
                .ip_location
                .as_deref()
                .map(|l| format!(" [{}]", l))
                .unwrap_or_default();
            let likes = comment
                .like_count
                .filter(|n| *n > 0)
                .map(|n| format!(" +{}", compact_count(n)))
                .unwrap_or_default();
            lines.push(format!(
                "    {}{}: {}{}",
                comment.author,
                location,
                ellipsize(&one_line(&comment.content), 80),
                likes
            ));
            for reply in comment.replies.iter().take(SHOWN_REPLIES) {
                lines.push(format!("      > {}: {}", reply.author, ellipsize(&one_line(&reply.content), 60)));
            }
        }
    }

    if let Some(analysis) = &result.analysis {
        lines.push(light);
        lines.push("  Analysis".to_string());
        if let Some(kind) = &analysis.content_type {
            lines.push(format!("  Type:     {}", kind));
        }
        if !analysis.key_points.is_empty() {
            lines.push("  Key points:".to_string());
            for point in analysis.key_points.iter().take(5) {
                lines.push(format!("    - {}", point));
            }
        }
        if let Some(summary) = &analysis.summary {
            lines.push(format!("  Summary:  {}", summary));
        }
    }

    lines.push(heavy);
    lines.join("\n")
}

/// Single line: `[Platform] | @author | "title" | stats`
pub fn brief(result: &ExtractResult) -> String {
    let title = truncate_chars(&one_line(&result.title), 60);
    let mut parts = vec![
        format!("[{}]", result.platform.display_name()),
        format!("@{}", result.author.nickname),
        format!("\"{}\"", title),
    ];
    let stats = stat_parts(&result.stats);
    if !stats.is_empty() {
        parts.push(stats.into_iter().take(3).collect::<Vec<_>>().join(" "));
    }
    parts.join(" | ")
}

/// Markdown note: heading, facts list, stats quote, parts, media links, top comments
pub fn markdown(result: &ExtractResult) -> String {
    let mut lines = Vec::new();
    let heading = if result.title.trim().is_empty() {
        result.description.as_deref().map(|d| truncate_chars(&one_line(d), 80)).unwrap_or_default()
    } else {
        one_line(&result.title)
    };
    lines.push(format!("## [{}] {}", result.platform.display_name(), heading));
    lines.push(String::new());

    lines.push(format!("- **Author**: {}", result.author.nickname));
    if let Some(ts) = &result.create_time {
        lines.push(format!("- **Posted**: {}", format_time(ts)));
    }
    if let Some(secs) = result.duration {
        lines.push(format!("- **Duration**: {}", format_duration(secs)));
    }
    lines.push(String::new());

    let stats = stat_parts(&result.stats);
    if !stats.is_empty() {
        lines.push(format!("> {}", stats.join(" · ")));
        lines.push(String::new());
    }
    if let Some(desc) = result.description.as_deref().filter(|d| *d != result.title) {
        lines.push(ellipsize(desc.trim(), MARKDOWN_DESCRIPTION_CHARS));
        lines.push(String::new());
    }
    if !result.tags.is_empty() {
        let tags: Vec<String> = result.tags.iter().map(|t| format!("#{}", t)).collect();
        lines.push(format!("**Tags**: {}", tags.join(" ")));
        lines.push(String::new());
    }

    if !result.parts.is_empty() {
        lines.push("### Parts".to_string());
        for part in &result.parts {
            match part.duration {
                Some(d) => lines.push(format!("- P{}: {} ({})", part.page, part.title, format_duration(d))),
                None => lines.push(format!("- P{}: {}", part.page, part.title)),
            }
        }
        lines.push(String::new());
    }

    if !result.media.is_empty() {
        lines.push("### Media".to_string());
        for (i, item) in result.media.iter().enumerate() {
            let label = match item.kind {
                MediaKind::Video => "video",
                MediaKind::Image => "image",
                MediaKind::Audio => "audio",
            };
            lines.push(format!("- [{} {}]({})", label, i, item.url));
        }
        lines.push(String::new());
    }

    if !result.comments.is_empty() {
        lines.push(format!("### Top comments ({})", result.comments.len()));
        for comment in result.comments.iter().take(MARKDOWN_COMMENTS) {
            let location = comment
                .ip_location
                .as_deref()
                .map(|l| format!(" [{}]", l))
                .unwrap_or_default();
            let likes = comment
                .like_count
                .filter(|n| *n > 0)
                .map(|n| format!(" +{}", compact_count(n)))
                .unwrap_or_default();
            lines.push(format!(
                "- **{}**{}: {}{}",
                comment.author,
                location,
                ellipsize(&one_line(&comment.content), 100),
                likes
            ));
            for reply in comment.replies.iter().take(SHOWN_REPLIES) {
                lines.push(format!("  - **{}**: {}", reply.author, ellipsize(&one_line(&reply.content), 80)));
            }
        }
        lines.push(String::new());
    }

    lines.push(format!("[Source]({})", result.url));
    lines.join("\n")
}

/// Pretty JSON with the result's field names; absent optionals are left out
pub fn to_json_pretty(result: &ExtractResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

fn error_json(error: &Error) -> Value {
    let mut value = json!({ "message": error.to_string() });
    if let Some(reason) = error.reason() {
        value["reason"] = json!(reason.as_str());
        value["retryable"] = json!(reason.is_retryable());
    }
    value
}

/// One entry per input, in input order
pub fn batch_json(report: &BatchReport) -> Result<String> {
    let items = report
        .items
        .iter()
        .map(|item| -> Result<Value> {
            let mut entry = json!({ "index": item.index, "input": item.input });
            match &item.outcome {
                ItemOutcome::Extracted(result) => {
                    entry["status"] = json!("ok");
                    entry["result"] = serde_json::to_value(result.as_ref())?;
                }
                ItemOutcome::Failed(e) => {
                    entry["status"] = json!("error");
                    entry["error"] = error_json(e);
                }
                ItemOutcome::Skipped => entry["status"] = json!("skipped"),
            }
            Ok(entry)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(serde_json::to_string_pretty(&Value::Array(items))?)
}

/// One brief line per input followed by totals
pub fn batch_summary(report: &BatchReport) -> String {
    let mut lines: Vec<String> = report
        .items
        .iter()
        .map(|item| match &item.outcome {
            ItemOutcome::Extracted(result) => format!("{:>3}. {}", item.index + 1, brief(result)),
            ItemOutcome::Failed(e) => format!("{:>3}. FAILED {}: {}", item.index + 1, item.input, e),
            ItemOutcome::Skipped => format!("{:>3}. skipped {}", item.index + 1, item.input),
        })
        .collect();
    lines.push(batch_totals(report));
    lines.join("\n")
}

/// Every extracted item rendered in full, failures inline, totals last
pub fn batch_detail<F>(report: &BatchReport, render: F) -> String
where
    F: Fn(&ExtractResult) -> String,
{
    let mut blocks: Vec<String> = report
        .items
        .iter()
        .map(|item| match &item.outcome {
            ItemOutcome::Extracted(result) => render(result.as_ref()),
            ItemOutcome::Failed(e) => format!("FAILED {}: {}", item.input, e),
            ItemOutcome::Skipped => format!("skipped {}", item.input),
        })
        .collect();
    blocks.push(batch_totals(report));
    blocks.join("\n\n")
}

fn batch_totals(report: &BatchReport) -> String {
    format!(
        "{} ok, {} failed, {} skipped",
        report.succeeded(),
        report.failed(),
        report.skipped()
    )
}

pub fn download_summary(report: &DownloadReport) -> String {
    let mut lines: Vec<String> = report.saved.iter().map(|p| format!("saved  {}", p.display())).collect();
    lines.extend(report.failed.iter().map(|f| format!("failed {}: {}", f.url, f.error)));
    lines.join("\n")
}
