use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::domain::identity::bare_host;

/// Minimum spacing between two fetches to the same host.
///
/// Each call reserves the next free slot for its host before sleeping, so
/// callers on different hosts never wait on each other.
#[derive(Debug, Clone)]
pub struct HostThrottle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    min_delay: Duration,
    // next instant at which each host may be fetched again
    slots: Mutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                min_delay,
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wait until `url`'s host may be fetched. Unparseable URLs share one bucket.
    pub async fn acquire(&self, url: &str) {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| bare_host(&u))
            .unwrap_or_default();

        let ready_at = {
            let mut slots = self.inner.slots.lock().await;
            let now = Instant::now();
            let ready_at = match slots.get(&host) {
                Some(next) if *next > now => *next,
                _ => now,
            };
            slots.insert(host, ready_at + self.inner.min_delay);
            ready_at
        };

        if ready_at > Instant::now() {
            tokio::time::sleep_until(ready_at).await;
        }
    }
}
