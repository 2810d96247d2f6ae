// Request pacing - minimum spacing between requests to the same platform or host

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::HttpRequest;

pub struct Pacer {
    interval: Duration,
    /// Earliest start of the next request per key
    slots: Mutex<HashMap<String, Instant>>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Claim the next slot for `key` and return how long to wait for it
    async fn reserve(&self, key: &str) -> Duration {
        if self.interval.is_zero() {
            return Duration::ZERO;
        }
        let now = Instant::now();
        let mut slots = self.slots.lock().await;
        let start = slots.get(key).copied().filter(|t| *t > now).unwrap_or(now);
        slots.insert(key.to_string(), start + self.interval);
        start - now
    }

    pub async fn wait(&self, request: &HttpRequest) {
        let key = pace_key(request);
        let delay = self.reserve(&key).await;
        if !delay.is_zero() {
            debug!(key = %key, delay_ms = delay.as_millis() as u64, "pacing");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Platform name when the request carries one, else the host
pub fn pace_key(request: &HttpRequest) -> String {
    match request.platform {
        Some(platform) => platform.as_str().to_string(),
        None => Url::parse(&request.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::Platform;

    #[tokio::test]
    async fn test_same_key_waits_one_interval() {
        let pacer = Pacer::new(Duration::from_millis(500));
        assert_eq!(pacer.reserve("bilibili").await, Duration::ZERO);
        let second = pacer.reserve("bilibili").await;
        assert!(second > Duration::from_millis(400), "{:?}", second);
        let third = pacer.reserve("bilibili").await;
        assert!(third > Duration::from_millis(900), "{:?}", third);
        assert_eq!(pacer.reserve("weibo").await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_zero_interval_never_waits() {
        let pacer = Pacer::new(Duration::ZERO);
        for _ in 0..3 {
            assert_eq!(pacer.reserve("douyin").await, Duration::ZERO);
        }
    }

    #[test]
    fn test_key_prefers_platform() {
        let tagged = HttpRequest::get("https://api.bilibili.com/x/web-interface/view").for_platform(Platform::Bilibili);
        assert_eq!(pace_key(&tagged), "bilibili");
        let bare = HttpRequest::get("https://publish.twitter.com/oembed?url=x");
        assert_eq!(pace_key(&bare), "publish.twitter.com");
    }
}
