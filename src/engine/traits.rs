// Extractor trait and the context adapters run in

use async_trait::async_trait;

use super::credentials::Credentials;
use super::errors::{Error, ExtractionReason, Result};
use super::models::{Comment, ExtractResult, Platform};
use super::resolver::MediaResolver;
use super::transport::Transport;

/// Shared collaborators handed to an adapter for one call
#[derive(Clone, Copy)]
pub struct AdapterContext<'a> {
    pub transport: &'a Transport,
    /// This platform's credentials only
    pub credentials: &'a Credentials,
    pub resolver: &'a dyn MediaResolver,
}

impl<'a> AdapterContext<'a> {
    pub fn new(
        transport: &'a Transport,
        credentials: &'a Credentials,
        resolver: &'a dyn MediaResolver,
    ) -> Self {
        Self {
            transport,
            credentials,
            resolver,
        }
    }
}

/// One platform adapter
#[async_trait]
pub trait Extractor: Send + Sync {
    fn platform(&self) -> Platform;

    fn supports_comments(&self) -> bool {
        false
    }

    fn supports_download(&self) -> bool {
        true
    }

    /// Extraction is expected to fail without cookies
    fn requires_credentials(&self) -> bool {
        false
    }

    /// Turn a canonical URL into a result; comments are left empty
    async fn extract(&self, ctx: AdapterContext<'_>, url: &str) -> Result<ExtractResult>;

    /// Up to `max_count` top-level comments with one tier of replies
    async fn fetch_comments(
        &self,
        _ctx: AdapterContext<'_>,
        _url: &str,
        _max_count: usize,
    ) -> Result<Vec<Comment>> {
        Err(Error::extraction(
            self.platform(),
            ExtractionReason::Unsupported,
            "comments are not available for this platform",
        ))
    }
}
