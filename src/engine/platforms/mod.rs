// Platform adapters and the registry that maps a platform to its adapter

pub mod bilibili;
pub mod douyin;
pub mod goofish;
pub mod kuaishou;
pub mod twitter;
pub mod weibo;
pub mod xiaohongshu;
pub mod youtube;
pub mod zhihu;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::errors::{Error, Result};
use super::models::Platform;
use super::traits::{AdapterContext, Extractor};
use super::transport::{HttpRequest, HttpResponse};

pub use bilibili::Bilibili;
pub use douyin::Douyin;
pub use goofish::Goofish;
pub use kuaishou::Kuaishou;
pub use twitter::Twitter;
pub use weibo::Weibo;
pub use xiaohongshu::Xiaohongshu;
pub use youtube::Youtube;
pub use zhihu::Zhihu;

/// Platform → adapter
#[derive(Clone, Default)]
pub struct Registry {
    adapters: HashMap<Platform, Arc<dyn Extractor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in adapter
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Arc::new(Douyin::new()))
            .register(Arc::new(Xiaohongshu::new()))
            .register(Arc::new(Bilibili::new()))
            .register(Arc::new(Weibo::new()))
            .register(Arc::new(Kuaishou::new()))
            .register(Arc::new(Zhihu::new()))
            .register(Arc::new(Youtube::new()))
            .register(Arc::new(Twitter::new()))
            .register(Arc::new(Goofish::new()))
    }

    pub fn register(mut self, adapter: Arc<dyn Extractor>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Result<Arc<dyn Extractor>> {
        self.adapters
            .get(&platform)
            .cloned()
            .ok_or_else(|| Error::UnsupportedPlatform(format!("no adapter for {}", platform)))
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.adapters.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }
}

/// GET with browser headers and the platform's credentials
pub(crate) fn browser_get(ctx: &AdapterContext<'_>, platform: Platform, url: &str, mobile: bool) -> HttpRequest {
    HttpRequest::get(url)
        .for_platform(platform)
        .browser(mobile)
        .credentials(ctx.credentials)
}

/// Fetch a page, following redirects
pub(crate) async fn fetch_page(
    ctx: &AdapterContext<'_>,
    platform: Platform,
    url: &str,
    mobile: bool,
) -> Result<HttpResponse> {
    ctx.transport.follow(browser_get(ctx, platform, url, mobile)).await
}

/// Execute and decode a JSON body
pub(crate) async fn fetch_json(ctx: &AdapterContext<'_>, request: HttpRequest) -> Result<Value> {
    let platform = request.platform;
    let response = ctx.transport.execute(&request).await?;
    response.json_value().map_err(|e| match platform {
        Some(p) => e.into_extraction(p),
        None => e,
    })
}
