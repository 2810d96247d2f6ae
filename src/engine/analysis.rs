// Optional OCR + LLM reading of a result through the Gemini REST API

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::download::media_request;
use super::errors::{Error, Result};
use super::models::{Analysis, ExtractResult, MediaKind};
use super::transport::{HttpRequest, Transport};

const GEMINI_API: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const MAX_IMAGES: usize = 4;

const OCR_PROMPT: &str = "Extract all text visible in this image. Keep the original wording, \
language and paragraph structure. Output only the text, no explanation.";

const ANALYSIS_PROMPT: &str = "You analyze social media posts. Read the post below and judge its \
value rather than compressing it. Answer in the post's own language with a single JSON object \
of the form {\"content_type\": \"tutorial/opinion/promotion/news/story, combinable\", \
\"key_points\": [\"...\"], \"summary\": \"one sentence\"}.";

lazy_static! {
    static ref JSON_OBJECT: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
    static ref TYPE_SEPARATORS: Regex = Regex::new(r"[/,，、|+]").unwrap();
}

/// Produces an `Analysis` for a finished extraction
#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(&self, transport: &Transport, result: &ExtractResult) -> Result<Analysis>;
}

/// API key from `GEMINI_API_KEY`, then `GOOGLE_API_KEY`
pub fn api_key_from_env() -> Option<String> {
    ["GEMINI_API_KEY", "GOOGLE_API_KEY"].iter().find_map(|key| {
        std::env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

pub struct GeminiAnalyzer {
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiAnalyzer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: GEMINI_API.to_string(),
        }
    }

    /// `None` when no API key is configured
    pub fn from_env() -> Option<Self> {
        api_key_from_env().map(Self::new)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn generate_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    async fn generate(&self, transport: &Transport, parts: Vec<Value>, as_json: bool) -> Result<String> {
        let mut body = json!({ "contents": [{ "parts": parts }] });
        if as_json {
            body["generationConfig"] = json!({ "responseMimeType": "application/json" });
        }
        let request = HttpRequest::post(self.generate_url())
            .header("x-goog-api-key", self.api_key.as_str())
            .json(&body);
        let response = transport
            .execute(&request)
            .await
            .map_err(|e| Error::Analysis(format!("gemini request failed: {}", e)))?;
        let data = response.json_value()?;
        response_text(&data).ok_or_else(|| Error::Analysis("gemini returned no text".to_string()))
    }

    async fn ocr_image(&self, transport: &Transport, result: &ExtractResult, url: &str) -> Result<String> {
        let image = transport.follow(media_request(result.platform, url)).await?;
        let mime = image
            .header("Content-Type")
            .and_then(|ct| ct.split(';').next())
            .map(str::trim)
            .filter(|ct| ct.starts_with("image/"))
            .unwrap_or("image/jpeg")
            .to_string();
        let parts = vec![
            json!({ "text": OCR_PROMPT }),
            json!({ "inline_data": { "mime_type": mime, "data": STANDARD.encode(&image.body) } }),
        ];
        self.generate(transport, parts, false).await
    }
}

/// Concatenated text parts of the first candidate
fn response_text(data: &Value) -> Option<String> {
    let text: String = data["candidates"][0]["content"]["parts"]
        .as_array()?
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// First JSON object in a model reply, tolerating code fences and chatter
fn reply_json(reply: &str) -> Option<Value> {
    serde_json::from_str::<Value>(reply.trim())
        .ok()
        .filter(Value::is_object)
        .or_else(|| serde_json::from_str(JSON_OBJECT.find(reply)?.as_str()).ok())
}

fn merge_blocks(blocks: Vec<String>) -> Option<String> {
    let mut seen: Vec<String> = Vec::new();
    for block in blocks {
        let block = block.trim().to_string();
        if !block.is_empty() && !seen.contains(&block) {
            seen.push(block);
        }
    }
    (!seen.is_empty()).then(|| seen.join("\n\n"))
}

fn apply_reply(analysis: &mut Analysis, reply: &Value) {
    analysis.summary = reply["summary"].as_str().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
    analysis.content_type = reply["content_type"]
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);
    analysis.key_points = reply["key_points"]
        .as_array()
        .map(|points| {
            points
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    analysis.tags = analysis
        .content_type
        .as_deref()
        .map(|ct| {
            TYPE_SEPARATORS
                .split(ct)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
}

#[async_trait]
impl ContentAnalyzer for GeminiAnalyzer {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn analyze(&self, transport: &Transport, result: &ExtractResult) -> Result<Analysis> {
        let mut blocks: Vec<String> = result.description.iter().cloned().collect();
        let images = result
            .media
            .iter()
            .filter(|m| m.kind == MediaKind::Image)
            .take(MAX_IMAGES);
        for item in images {
            match self.ocr_image(transport, result, &item.url).await {
                Ok(text) => blocks.push(text),
                Err(e) => warn!(platform = result.platform.as_str(), url = %item.url, stage = "ocr", error = %e, "image OCR failed"),
            }
        }

        let mut analysis = Analysis {
            text: merge_blocks(blocks),
            ..Analysis::default()
        };
        let Some(full_text) = analysis.text.clone() else {
            debug!(platform = result.platform.as_str(), url = %result.url, "nothing to analyze");
            return Ok(analysis);
        };

        let stats = serde_json::to_string(&result.stats)?;
        let prompt = format!(
            "{}\n\nPlatform: {}\nEngagement: {}\nTitle: {}\n\nFull text:\n{}",
            ANALYSIS_PROMPT,
            result.platform.display_name(),
            stats,
            result.title,
            full_text
        );
        match self.generate(transport, vec![json!({ "text": prompt })], true).await {
            Ok(reply) => match reply_json(&reply) {
                Some(value) => apply_reply(&mut analysis, &value),
                None => warn!(platform = result.platform.as_str(), url = %result.url, stage = "analysis", "reply was not JSON"),
            },
            Err(e) => warn!(platform = result.platform.as_str(), url = %result.url, stage = "analysis", error = %e, "content analysis failed"),
        }
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::{Author, MediaItem, Platform};
    use crate::engine::testing::{transport, FakeBackend};
    use crate::engine::transport::HttpResponse;
    use std::sync::Arc;

    const GENERATE_URL: &str =
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

    fn gemini_reply(text: &str) -> HttpResponse {
        let body = json!({"candidates": [{"content": {"parts": [{"text": text}]}}]});
        HttpResponse::new(200, GENERATE_URL, body.to_string())
    }

    fn note() -> ExtractResult {
        let mut result = ExtractResult::new(
            Platform::Xiaohongshu,
            "https://www.xiaohongshu.com/explore/1",
            "Tokyo in three days",
            Author::new("1", "traveler"),
        );
        result.description = Some("Day one: Asakusa".into());
        result.media.push(MediaItem::image(Platform::Xiaohongshu, "https://sns-img-bd.xhscdn.com/a"));
        result
    }

    #[test]
    fn test_reply_json_inside_code_fence() {
        let reply = "```json\n{\"summary\": \"ok\", \"key_points\": [\"a\"]}\n```";
        assert_eq!(reply_json(reply).unwrap()["summary"], "ok");
        assert!(reply_json("no json here").is_none());
    }

    #[tokio::test]
    async fn test_ocr_then_analysis() {
        let backend = Arc::new(FakeBackend::new());
        backend.always(
            "https://sns-img-bd.xhscdn.com/a",
            HttpResponse::new(200, "https://sns-img-bd.xhscdn.com/a", vec![0xFF, 0xD8, 0xFF])
                .with_header("Content-Type", "image/webp"),
        );
        backend.push(GENERATE_URL, gemini_reply("Senso-ji opens at 6am"));
        backend.push(
            GENERATE_URL,
            gemini_reply(r#"{"content_type": "tutorial/story", "key_points": ["go early"], "summary": "A compact Tokyo plan"}"#),
        );
        let transport = transport(&backend);

        let analysis = GeminiAnalyzer::new("key").analyze(&transport, &note()).await.unwrap();
        assert_eq!(analysis.text.as_deref(), Some("Day one: Asakusa\n\nSenso-ji opens at 6am"));
        assert_eq!(analysis.summary.as_deref(), Some("A compact Tokyo plan"));
        assert_eq!(analysis.tags, vec!["tutorial", "story"]);
        assert_eq!(analysis.key_points, vec!["go early"]);

        let ocr = backend.requests().into_iter().find(|r| r.url == GENERATE_URL).unwrap();
        assert_eq!(ocr.header_value("x-goog-api-key"), Some("key"));
        let body: Value = serde_json::from_slice(ocr.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/webp");
        assert_eq!(body["contents"][0]["parts"][1]["inline_data"]["data"], "/9j/");
    }

    #[tokio::test]
    async fn test_service_failure_keeps_text() {
        let backend = Arc::new(FakeBackend::new());
        let transport = transport(&backend);
        let mut result = note();
        result.media.clear();

        let analysis = GeminiAnalyzer::new("key").analyze(&transport, &result).await.unwrap();
        assert_eq!(analysis.text.as_deref(), Some("Day one: Asakusa"));
        assert!(analysis.summary.is_none());
    }
}
