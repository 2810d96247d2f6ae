// Batch driver: many links, bounded concurrency, results keyed by input index

use futures::{stream, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use super::errors::{Error, Result};
use super::models::ExtractResult;
use super::{Engine, ExtractOptions};

/// Cooperative stop signal; items already running finish, the rest are skipped
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One link per line; blank lines and `#` comments are skipped
pub fn parse_links(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

pub fn read_links(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::config(path.display().to_string(), format!("cannot read links file: {}", e)))?;
    Ok(parse_links(&text))
}

#[derive(Debug)]
pub enum ItemOutcome {
    Extracted(Box<ExtractResult>),
    Failed(Error),
    /// Not started because the run was cancelled
    Skipped,
}

#[derive(Debug)]
pub struct BatchItem {
    pub index: usize,
    pub input: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// In input order
    pub items: Vec<BatchItem>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Extracted(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Skipped))
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| pred(&item.outcome)).count()
    }
}

async fn run_item(engine: &Engine, index: usize, input: String, options: &ExtractOptions, cancel: &CancelFlag) -> BatchItem {
    if cancel.is_cancelled() {
        return BatchItem {
            index,
            input,
            outcome: ItemOutcome::Skipped,
        };
    }
    let outcome = match engine.extract(&input, options).await {
        Ok(result) => ItemOutcome::Extracted(Box::new(result)),
        Err(e) => {
            warn!(index, url = %input, stage = "batch", error = %e, "batch item failed");
            ItemOutcome::Failed(e)
        }
    };
    BatchItem { index, input, outcome }
}

/// Extract every link with at most `concurrency` in flight. Per-item failures never
/// abort the run.
pub async fn run_batch(
    engine: &Engine,
    links: Vec<String>,
    options: &ExtractOptions,
    concurrency: usize,
    cancel: &CancelFlag,
) -> BatchReport {
    let total = links.len();
    let mut items: Vec<BatchItem> = stream::iter(links.into_iter().enumerate())
        .map(|(index, input)| run_item(engine, index, input, options, cancel))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    items.sort_by_key(|item| item.index);

    let report = BatchReport { items };
    info!(
        total,
        succeeded = report.succeeded(),
        failed = report.failed(),
        skipped = report.skipped(),
        "batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{no_credentials, transport, FakeBackend, FakeResolver};
    use serde_json::json;

    fn engine(backend: &Arc<FakeBackend>) -> Engine {
        Engine::with_parts(transport(backend), no_credentials(), Arc::new(FakeResolver::new()))
    }

    fn bilibili_backend() -> Arc<FakeBackend> {
        let backend = Arc::new(FakeBackend::new());
        backend.json(
            "https://api.bilibili.com/x/web-interface/view?bvid=BV1aa411c7mA*",
            json!({"code": 0, "data": {"title": "First", "owner": {"mid": 1, "name": "up"}}}),
        );
        backend.json(
            "https://api.bilibili.com/x/web-interface/view?bvid=BV1bb411c7mB*",
            json!({"code": -404, "message": "啥都木有"}),
        );
        backend.json(
            "https://api.bilibili.com/x/web-interface/view?bvid=BV1cc411c7mC*",
            json!({"code": 0, "data": {"title": "Third", "owner": {"mid": 3, "name": "up3"}}}),
        );
        backend
    }

    #[test]
    fn test_parse_links() {
        let text = "# saved links\nhttps://b23.tv/abc\n\n  https://x.com/a/status/1  \n#https://skip.me\n";
        assert_eq!(parse_links(text), vec!["https://b23.tv/abc", "https://x.com/a/status/1"]);
    }

    #[test]
    fn test_read_links_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(read_links(&dir.path().join("nope.txt")), Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let backend = bilibili_backend();
        let engine = engine(&backend);
        let links = vec![
            "https://www.bilibili.com/video/BV1aa411c7mA".to_string(),
            "https://www.bilibili.com/video/BV1bb411c7mB".to_string(),
            "not a link".to_string(),
            "https://www.bilibili.com/video/BV1cc411c7mC".to_string(),
        ];

        let report = run_batch(&engine, links, &ExtractOptions::default(), 3, &CancelFlag::new()).await;
        assert_eq!(report.items.iter().map(|i| i.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 2);
        match &report.items[3].outcome {
            ItemOutcome::Extracted(result) => assert_eq!(result.title, "Third"),
            other => panic!("unexpected outcome {:?}", other),
        }
        match &report.items[1].outcome {
            ItemOutcome::Failed(e) => assert!(e.is_not_found()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_items() {
        let backend = bilibili_backend();
        let engine = engine(&backend);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let links = vec!["https://www.bilibili.com/video/BV1aa411c7mA".to_string(); 3];
        let report = run_batch(&engine, links, &ExtractOptions::default(), 2, &cancel).await;
        assert_eq!(report.skipped(), 3);
        assert_eq!(backend.total_calls(), 0);
    }
}
