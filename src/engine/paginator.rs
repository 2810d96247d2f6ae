// Comment pagination
//
// Start -> Fetching(cursor) -> Fetching(next) ... -> Exhausted. Adapters only describe how
// to fetch one page; walking, bounding and degrading to partial results happen here.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::errors::Result;
use super::models::{Comment, Platform};

/// Replies fetched per top-level comment, including inlined ones
pub const MAX_REPLIES_PER_COMMENT: usize = 10;

/// Position in a platform's comment listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cursor {
    Start,
    /// Item offset (Douyin `cursor`)
    Offset(u64),
    /// 1-based page number (Bilibili `pn`)
    Page(u32),
    /// Opaque continuation token or URL
    Token(String),
}

#[derive(Debug, Clone, Default)]
pub struct CommentPage {
    pub comments: Vec<Comment>,
    /// `None` once the platform signals the end
    pub next: Option<Cursor>,
}

impl CommentPage {
    pub fn new(comments: Vec<Comment>, next: Option<Cursor>) -> Self {
        Self { comments, next }
    }

    pub fn last(comments: Vec<Comment>) -> Self {
        Self { comments, next: None }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// One platform's comment API
#[async_trait]
pub trait CommentSource: Send + Sync {
    async fn page(&self, cursor: &Cursor) -> Result<CommentPage>;

    /// Secondary listing of replies under `parent`
    async fn replies(&self, _parent: &Comment, _cursor: &Cursor) -> Result<CommentPage> {
        Ok(CommentPage::empty())
    }

    fn wants_replies(&self, parent: &Comment) -> bool {
        parent.has_more_replies()
    }
}

enum State {
    Fetching(Cursor),
    Exhausted,
}

/// Walk `source` until `max_count` top-level comments are collected or the listing ends.
///
/// A failing first page is an error; any later failure returns what was collected.
pub async fn collect<S>(source: &S, platform: Platform, url: &str, max_count: usize) -> Result<Vec<Comment>>
where
    S: CommentSource + ?Sized,
{
    let mut collected: Vec<Comment> = Vec::new();
    if max_count == 0 {
        return Ok(collected);
    }

    let mut state = State::Fetching(Cursor::Start);
    let mut pages = 0usize;

    while let State::Fetching(cursor) = state {
        let page = match source.page(&cursor).await {
            Ok(page) => page,
            Err(e) if pages == 0 => return Err(e),
            Err(e) => {
                warn!(
                    platform = platform.as_str(),
                    url,
                    stage = "comments",
                    collected = collected.len(),
                    error = %e,
                    "comment page failed, returning partial result"
                );
                break;
            }
        };
        pages += 1;

        let received = page.comments.len();
        let room = max_count - collected.len();
        let mut batch: Vec<Comment> = page.comments.into_iter().take(room).collect();
        for comment in &mut batch {
            if source.wants_replies(comment) {
                expand_replies(source, platform, url, comment).await;
            }
            comment.clamp_depth();
        }
        collected.extend(batch);
        debug!(platform = platform.as_str(), page = pages, received, total = collected.len(), "comment page");

        state = match page.next {
            _ if received == 0 => State::Exhausted,
            _ if collected.len() >= max_count => State::Exhausted,
            None => State::Exhausted,
            Some(next) if next == cursor => {
                warn!(platform = platform.as_str(), url, stage = "comments", cursor = ?next, "cursor did not advance");
                State::Exhausted
            }
            Some(next) => State::Fetching(next),
        };
    }

    Ok(collected)
}

async fn expand_replies<S>(source: &S, platform: Platform, url: &str, parent: &mut Comment)
where
    S: CommentSource + ?Sized,
{
    let mut seen: HashSet<String> = parent
        .replies
        .iter()
        .filter(|r| !r.id.is_empty())
        .map(|r| r.id.clone())
        .collect();
    let mut cursor = Cursor::Start;

    while parent.replies.len() < MAX_REPLIES_PER_COMMENT {
        let page = match source.replies(parent, &cursor).await {
            Ok(page) => page,
            Err(e) => {
                warn!(
                    platform = platform.as_str(),
                    url,
                    stage = "replies",
                    parent = %parent.id,
                    error = %e,
                    "reply page failed"
                );
                return;
            }
        };
        if page.comments.is_empty() {
            return;
        }
        for reply in page.comments {
            if parent.replies.len() >= MAX_REPLIES_PER_COMMENT {
                break;
            }
            if !reply.id.is_empty() && !seen.insert(reply.id.clone()) {
                continue;
            }
            parent.replies.push(reply);
        }
        match page.next {
            Some(next) if next != cursor => cursor = next,
            _ => return,
        }
    }
}
