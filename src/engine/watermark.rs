// Watermark markers per platform
//
// Media URLs are rewritten to their unwatermarked variant at construction time
// (`MediaItem::new`), and `ExtractResult::validate` re-checks with `has_marker`.

use url::Url;

use super::models::Platform;

/// Query parameters that switch a watermark overlay on
const WATERMARK_PARAMS: [&str; 2] = ["watermark", "wm"];

/// Rewrite `url` to the platform's unwatermarked variant
pub fn strip(platform: Platform, url: &str) -> String {
    let mut out = match platform {
        // aweme play endpoints: /playwm/ serves the overlay, /play/ the original
        Platform::Douyin => url.replace("playwm", "play"),
        Platform::Xiaohongshu => strip_xhs_style(url),
        _ => url.to_string(),
    };

    if let Ok(mut parsed) = Url::parse(&out) {
        let had_marker = parsed
            .query_pairs()
            .any(|(k, v)| is_watermark_param(&k, &v));
        if had_marker {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(k, v)| !is_watermark_param(k, v))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            if kept.is_empty() {
                parsed.set_query(None);
            } else {
                parsed.query_pairs_mut().clear().extend_pairs(kept);
            }
            out = parsed.to_string();
        }
    }
    out
}

/// Check for known watermark markers
pub fn has_marker(platform: Platform, url: &str) -> bool {
    let platform_marker = match platform {
        Platform::Douyin => url.contains("playwm"),
        Platform::Xiaohongshu => xhs_style_suffix(url).is_some(),
        _ => false,
    };
    if platform_marker {
        return true;
    }
    Url::parse(url)
        .map(|u| u.query_pairs().any(|(k, v)| is_watermark_param(&k, &v)))
        .unwrap_or(false)
}

fn is_watermark_param(key: &str, value: &str) -> bool {
    WATERMARK_PARAMS.contains(&key) && value != "0"
}

/// Position of an xhscdn image-style directive (`...jpg!nd_dft_wlteh_webp_3`)
fn xhs_style_suffix(url: &str) -> Option<usize> {
    if !url.contains("xhscdn.com") {
        return None;
    }
    let path_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    let path = &url[path_start..];
    let end = path.find('?').unwrap_or(path.len());
    path[..end].find('!').map(|i| path_start + i)
}

fn strip_xhs_style(url: &str) -> String {
    match xhs_style_suffix(url) {
        Some(pos) => {
            let query = url[pos..].find('?').map(|q| &url[pos + q..]).unwrap_or("");
            format!("{}{}", &url[..pos], query)
        }
        None => url.to_string(),
    }
}
