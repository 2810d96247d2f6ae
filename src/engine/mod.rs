// Extraction engine: link routing, platform adapters and their shared plumbing

pub mod analysis;
pub mod batch;
pub mod config;
pub mod credentials;
pub mod download;
pub mod errors;
pub mod models;
pub mod output;
pub mod paginator;
pub mod platforms;
pub mod resolver;
pub mod router;
pub mod signing;
pub mod traits;
pub mod transport;
pub mod utils;
pub mod watermark;

#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use analysis::{ContentAnalyzer, GeminiAnalyzer};
use config::EngineConfig;
use credentials::CredentialStore;
use download::DownloadReport;
use errors::{Error, ExtractionReason, Result};
use models::{Comment, ExtractResult, Platform};
use platforms::Registry;
use resolver::{MediaResolver, YtDlpResolver};
use router::{LinkRouter, Route};
use traits::AdapterContext;
use transport::Transport;

/// Per-call switches
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractOptions {
    /// Attach up to this many top-level comments
    pub comments: Option<usize>,
    /// Run the content analyzer, when one is configured
    pub analyze: bool,
}

impl ExtractOptions {
    pub fn with_comments(mut self, max_count: usize) -> Self {
        self.comments = Some(max_count);
        self
    }

    pub fn with_analysis(mut self, analyze: bool) -> Self {
        self.analyze = analyze;
        self
    }
}

/// One process-wide engine; share it behind an `Arc` for concurrent use
pub struct Engine {
    transport: Transport,
    credentials: CredentialStore,
    resolver: Arc<dyn MediaResolver>,
    registry: Registry,
    router: LinkRouter,
    analyzer: Option<Arc<dyn ContentAnalyzer>>,
}

impl Engine {
    /// Build from `config`: HTTP pool, credentials file, yt-dlp resolver, and a
    /// Gemini analyzer when an API key is present in the environment
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let credentials = match &config.credentials_path {
            Some(path) => CredentialStore::load(path)?,
            None => CredentialStore::empty(),
        };
        let transport = Transport::new(config)?;
        let resolver = Arc::new(YtDlpResolver::new(&config.resolver, config.proxy.clone()));
        let mut engine = Self::with_parts(transport, credentials, resolver);
        if let Some(gemini) = GeminiAnalyzer::from_env() {
            engine = engine.with_analyzer(Arc::new(gemini));
        }
        Ok(engine)
    }

    pub fn with_parts(transport: Transport, credentials: CredentialStore, resolver: Arc<dyn MediaResolver>) -> Self {
        Self {
            transport,
            credentials,
            resolver,
            registry: Registry::with_defaults(),
            router: LinkRouter::new(),
            analyzer: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ContentAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn has_analyzer(&self) -> bool {
        self.analyzer.is_some()
    }

    fn context(&self, platform: Platform) -> AdapterContext<'_> {
        AdapterContext::new(&self.transport, self.credentials.get(platform), self.resolver.as_ref())
    }

    /// Classify `input` and resolve short links
    pub async fn route(&self, input: &str) -> Result<Route> {
        self.router.route(input, &self.transport).await
    }

    /// Share link or share text → validated result
    pub async fn extract(&self, input: &str, options: &ExtractOptions) -> Result<ExtractResult> {
        let route = self.route(input).await?;
        let platform = route.platform;
        let url = route.canonical_url.as_str();
        let adapter = self.registry.get(platform)?;
        debug!(platform = platform.as_str(), url, stage = "route", "routed");

        let mut result = adapter
            .extract(self.context(platform), url)
            .await
            .map_err(|e| {
                let error = e.into_extraction(platform);
                self.explain(platform, adapter.requires_credentials(), error)
            })?;
        result.validate()?;
        info!(platform = platform.as_str(), url, media = result.media.len(), "extracted");

        match options.comments {
            Some(max_count) if max_count > 0 && adapter.supports_comments() => {
                match adapter.fetch_comments(self.context(platform), url, max_count).await {
                    Ok(comments) if !comments.is_empty() => result.comments = comments,
                    Ok(_) => debug!(platform = platform.as_str(), url, stage = "comments", "no comments from the comment API"),
                    Err(e) => warn!(platform = platform.as_str(), url, stage = "comments", error = %e, "comments unavailable"),
                }
                result.comments.truncate(max_count);
                result.comments.iter_mut().for_each(Comment::clamp_depth);
            }
            Some(max_count) if max_count > 0 => {
                debug!(platform = platform.as_str(), url, stage = "comments", "platform has no comment support");
                result.comments.clear();
            }
            _ => result.comments.clear(),
        }

        if options.analyze {
            result.analysis = self.analyze(&result).await;
        }
        Ok(result)
    }

    /// Comments for a link without a full extraction
    pub async fn fetch_comments(&self, input: &str, max_count: usize) -> Result<Vec<Comment>> {
        let route = self.route(input).await?;
        let adapter = self.registry.get(route.platform)?;
        let mut comments = adapter
            .fetch_comments(self.context(route.platform), &route.canonical_url, max_count)
            .await
            .map_err(|e| e.into_extraction(route.platform))?;
        comments.truncate(max_count);
        comments.iter_mut().for_each(Comment::clamp_depth);
        Ok(comments)
    }

    async fn analyze(&self, result: &ExtractResult) -> Option<models::Analysis> {
        let Some(analyzer) = &self.analyzer else {
            warn!(platform = result.platform.as_str(), url = %result.url, stage = "analysis", "no analyzer configured (set GEMINI_API_KEY)");
            return None;
        };
        match analyzer.analyze(&self.transport, result).await {
            Ok(analysis) if !analysis.is_empty() => Some(analysis),
            Ok(_) => None,
            Err(e) => {
                warn!(platform = result.platform.as_str(), url = %result.url, stage = "analysis", analyzer = analyzer.name(), error = %e, "analysis failed");
                None
            }
        }
    }

    /// Write `result.media` under `dir`
    pub async fn download(&self, result: &ExtractResult, dir: &Path) -> Result<DownloadReport> {
        let adapter = self.registry.get(result.platform)?;
        if !adapter.supports_download() {
            return Err(Error::extraction(
                result.platform,
                ExtractionReason::Unsupported,
                "media download is not supported for this platform",
            ));
        }
        download::download_media(&self.transport, result, dir).await
    }

    /// Point cookie-related failures at the credentials file. Platforms that gate
    /// content behind a login get the hint for any failure without a session.
    fn explain(&self, platform: Platform, requires_credentials: bool, error: Error) -> Error {
        match error {
            Error::Extraction {
                platform: p,
                reason,
                detail,
            } if (reason.cookies_might_help() || requires_credentials)
                && !self.credentials.is_authenticated(platform) =>
            {
                let hint = match self.credentials.source() {
                    Some(path) => format!("add {} cookies to {}", platform.as_str(), path.display()),
                    None => format!("configure {} cookies", platform.as_str()),
                };
                Error::extraction(p, reason, format!("{}; {}", detail, hint))
            }
            other => other,
        }
    }
}
