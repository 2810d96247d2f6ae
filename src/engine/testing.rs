// Scripted collaborators for tests

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::credentials::{CredentialStore, Credentials};
use super::errors::{Error, ExtractionReason, Result};
use super::models::Platform;
use super::resolver::{MediaResolver, ResolvedMedia};
use super::transport::{HttpBackend, HttpRequest, HttpResponse, RetryPolicy, SendError, Transport};

type Scripted = std::result::Result<HttpResponse, SendError>;

/// Answers requests from per-URL scripts; unknown URLs get a 404.
///
/// A key ending in `*` matches any URL with that prefix.
#[derive(Default)]
pub struct FakeBackend {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    sticky: Mutex<HashMap<String, HttpResponse>>,
    log: Mutex<Vec<HttpRequest>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next request to `url` once
    pub fn push(&self, url: &str, response: HttpResponse) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    pub fn push_error(&self, url: &str, error: SendError) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Answer every request to `url` (after queued answers run out)
    pub fn always(&self, url: &str, response: HttpResponse) {
        self.sticky.lock().unwrap().insert(url.to_string(), response);
    }

    pub fn json(&self, url: &str, body: serde_json::Value) {
        self.always(url, HttpResponse::new(200, url, body.to_string()));
    }

    pub fn html(&self, url: &str, body: &str) {
        self.always(url, HttpResponse::new(200, url, body));
    }

    pub fn redirect(&self, url: &str, location: &str) {
        self.always(url, HttpResponse::new(302, url, "").with_header("Location", location));
    }

    pub fn calls(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|r| r.url == url).count()
    }

    pub fn calls_with_prefix(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.starts_with(prefix))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().unwrap().clone()
    }

    fn lookup<T: Clone>(map: &HashMap<String, T>, url: &str) -> Option<T> {
        if let Some(hit) = map.get(url) {
            return Some(hit.clone());
        }
        map.iter()
            .filter_map(|(k, v)| k.strip_suffix('*').map(|prefix| (prefix, v)))
            .filter(|(prefix, _)| url.starts_with(prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, v)| v.clone())
    }
}

#[async_trait]
impl HttpBackend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn send(&self, request: &HttpRequest) -> Scripted {
        self.log.lock().unwrap().push(request.clone());

        if let Some(queue) = self.queued.lock().unwrap().get_mut(&request.url) {
            if let Some(next) = queue.pop_front() {
                return next;
            }
        }
        let sticky = self.sticky.lock().unwrap();
        match Self::lookup(&sticky, &request.url) {
            Some(mut response) => {
                response.url = request.url.clone();
                Ok(response)
            }
            None => Ok(HttpResponse::new(404, request.url.as_str(), "not scripted")),
        }
    }
}

pub fn transport(backend: &Arc<FakeBackend>) -> Transport {
    Transport::with_backend(backend.clone(), RetryPolicy::immediate(3), 5)
}

/// Resolver answering from a fixed table
#[derive(Default)]
pub struct FakeResolver {
    answers: Mutex<HashMap<String, ResolvedMedia>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(&self, url: &str, media: ResolvedMedia) {
        self.answers.lock().unwrap().insert(url.to_string(), media);
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    fn name(&self) -> &'static str {
        "fake-resolver"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn resolve(
        &self,
        platform: Platform,
        page_url: &str,
        _credentials: &Credentials,
    ) -> Result<ResolvedMedia> {
        self.answers
            .lock()
            .unwrap()
            .get(page_url)
            .cloned()
            .ok_or_else(|| Error::extraction(platform, ExtractionReason::NotFound, "no scripted answer"))
    }
}

pub fn no_credentials() -> CredentialStore {
    CredentialStore::empty()
}
