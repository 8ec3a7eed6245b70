//! Fetch, classify and extract one URL. Shared by link processing, parent
//! resolution and `inspect`.

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use super::classify::{classify, classify_fetched, ClassificationResult};
use super::extract::{extract, Extraction};
use super::follow::follow_child_links;
use super::page::PageFacts;
use crate::app::ports::{FetchedPage, Fetcher};
use crate::config::RendererConfig;
use crate::domain::identity::source_name_from_url;
use crate::domain::{Confidence, ExtractionConfig, FetchMode, NormalizedEvent, PageKind, StrategyKind};
use crate::error::{DiscoveryError, Result};
use crate::pipeline::ingestion::rate_limiter::HostThrottle;
use crate::pipeline::storage::DiscoveryStore;

/// What probing one URL found.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub url: String,
    pub mode: FetchMode,
    pub facts: PageFacts,
    pub classification: ClassificationResult,
    pub extraction: Extraction,
    /// Strategy that worked on child pages when `extraction.strategy` is `FollowLinks`.
    pub sub_strategy: Option<StrategyKind>,
    /// Set when the events came from a linked calendar feed rather than the page.
    pub feed_url: Option<String>,
}

impl ProbeResult {
    pub fn kind(&self) -> PageKind {
        self.classification.kind
    }

    pub fn events(&self) -> &[NormalizedEvent] {
        &self.extraction.events
    }
}

/// Compact view for printing.
#[derive(Debug, Serialize)]
pub struct ProbeSummary<'a> {
    pub url: &'a str,
    pub mode: FetchMode,
    pub kind: PageKind,
    pub rule: &'a str,
    pub strategy: Option<StrategyKind>,
    pub sub_strategy: Option<StrategyKind>,
    pub feed_url: Option<&'a str>,
    pub events: &'a [NormalizedEvent],
}

impl<'a> From<&'a ProbeResult> for ProbeSummary<'a> {
    fn from(probe: &'a ProbeResult) -> Self {
        Self {
            url: &probe.url,
            mode: probe.mode,
            kind: probe.kind(),
            rule: &probe.classification.evidence.rule,
            strategy: probe.extraction.strategy,
            sub_strategy: probe.sub_strategy,
            feed_url: probe.feed_url.as_deref(),
            events: probe.events(),
        }
    }
}

/// How to fetch and extract a URL: its registered source's method and
/// extraction config when it has one, plain fetch and the full cascade otherwise.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub mode: FetchMode,
    pub config: ExtractionConfig,
    pub source_id: String,
}

impl ProbePlan {
    pub fn lookup(store: &dyn DiscoveryStore, url: &str) -> Result<Self> {
        Ok(match store.source_by_url(url)? {
            Some(source) => {
                debug!(url, source = %source.name, mode = %source.method, "using registered source config");
                Self {
                    mode: source.method,
                    config: source.extraction,
                    source_id: source.name,
                }
            }
            None => Self {
                mode: FetchMode::Plain,
                config: ExtractionConfig::default(),
                source_id: source_name_from_url(url),
            },
        })
    }
}

/// Whether a listing produced anything reliable enough to register as a source.
pub fn passes_validation(events: &[NormalizedEvent]) -> bool {
    events.iter().any(|e| e.confidence >= Confidence::Medium)
}

pub struct PageProber<'a> {
    fetcher: &'a dyn Fetcher,
    throttle: &'a HostThrottle,
    renderer: &'a RendererConfig,
    max_follow_pages: usize,
    reference: NaiveDate,
}

impl<'a> PageProber<'a> {
    pub fn new(
        fetcher: &'a dyn Fetcher,
        throttle: &'a HostThrottle,
        renderer: &'a RendererConfig,
        max_follow_pages: usize,
        reference: NaiveDate,
    ) -> Self {
        Self {
            fetcher,
            throttle,
            renderer,
            max_follow_pages,
            reference,
        }
    }

    pub fn reference(&self) -> NaiveDate {
        self.reference
    }

    pub fn max_follow_pages(&self) -> usize {
        self.max_follow_pages
    }

    /// Throttled fetch; non-2xx statuses are errors.
    pub async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedPage> {
        self.throttle.acquire(url).await;
        let page = self.fetcher.fetch(url, mode).await?;
        if !page.is_success() {
            return Err(DiscoveryError::HttpStatus {
                url: url.to_string(),
                status: page.status,
            });
        }
        Ok(page)
    }

    fn should_render(&self, facts: &PageFacts) -> bool {
        self.fetcher.supports(FetchMode::Rendered)
            && facts
                .host()
                .map(|h| self.renderer.is_script_heavy(&h))
                .unwrap_or(false)
    }

    /// Probe `url` as `plan` describes.
    pub async fn probe_with(&self, url: &str, plan: &ProbePlan) -> Result<ProbeResult> {
        self.probe(url, plan.mode, &plan.config, &plan.source_id).await
    }

    pub async fn probe(
        &self,
        url: &str,
        mode: FetchMode,
        config: &ExtractionConfig,
        source_id: &str,
    ) -> Result<ProbeResult> {
        let requested = Url::parse(url)?;
        let mut mode = mode;
        if mode == FetchMode::Rendered && !self.fetcher.supports(FetchMode::Rendered) {
            warn!(url, "rendering requested but no renderer is configured; fetching plain");
            mode = FetchMode::Plain;
        }
        let page = self.fetch(url, mode).await?;
        let (mut facts, mut classification) = classify_fetched(&requested, &page);

        if classification.kind == PageKind::Unclear && mode == FetchMode::Plain && self.should_render(&facts) {
            debug!(url, "unclear plain fetch on script-heavy host; retrying rendered");
            match self.fetch(url, FetchMode::Rendered).await {
                Ok(rendered) => {
                    (facts, classification) = classify_fetched(&requested, &rendered);
                    mode = FetchMode::Rendered;
                }
                Err(e) => warn!(url, error = %e, "rendered fetch failed"),
            }
        }

        info!(
            url,
            kind = %classification.kind,
            rule = %classification.evidence.rule,
            "Classified page"
        );

        let mut result = ProbeResult {
            url: url.to_string(),
            mode,
            facts,
            classification,
            extraction: Extraction::default(),
            sub_strategy: None,
            feed_url: None,
        };
        if result.kind() == PageKind::Unclear {
            return Ok(result);
        }

        if let Some(feed_url) = self.linked_feed(&result, config) {
            let feed_config = ExtractionConfig {
                default_venue: config
                    .default_venue
                    .clone()
                    .or_else(|| Some(result.classification.evidence.site_name.clone())),
                ..config.clone()
            };
            match self.extract_feed(&feed_url, &feed_config, source_id).await {
                Ok(extraction) if !extraction.is_empty() => {
                    result.extraction = extraction;
                    result.feed_url = Some(feed_url);
                    return Ok(result);
                }
                Ok(_) => debug!(feed = %feed_url, "linked feed had no events"),
                Err(e) => warn!(feed = %feed_url, error = %e, "linked feed fetch failed"),
            }
        }

        if config.strategy != Some(StrategyKind::FollowLinks) {
            result.extraction = extract(
                &result.classification,
                &result.facts,
                config,
                source_id,
                self.reference,
            );
        }

        let wants_follow = config.strategy == Some(StrategyKind::FollowLinks)
            || (result.extraction.is_empty() && result.kind() == PageKind::Calendar);
        if wants_follow && !result.classification.evidence.child_links.is_empty() {
            let followed = follow_child_links(self, &result, config, source_id).await;
            if !followed.events.is_empty() {
                result.extraction = Extraction {
                    events: followed.events,
                    strategy: Some(StrategyKind::FollowLinks),
                };
                result.sub_strategy = followed.sub_strategy;
            }
        }

        Ok(result)
    }

    /// An HTML page that advertises a feed, or a pinned feed URL.
    fn linked_feed(&self, result: &ProbeResult, config: &ExtractionConfig) -> Option<String> {
        if let Some(ref pinned) = config.feed_url {
            return Some(pinned.clone());
        }
        if result.kind() == PageKind::Feed && !result.facts.is_calendar_feed {
            return result.classification.evidence.feed_url.clone();
        }
        None
    }

    async fn extract_feed(&self, feed_url: &str, config: &ExtractionConfig, source_id: &str) -> Result<Extraction> {
        let feed_page = self.fetch(feed_url, FetchMode::Plain).await?;
        let facts = PageFacts::parse(&Url::parse(feed_url)?, &feed_page);
        let classification = classify(&facts);
        Ok(extract(&classification, &facts, config, source_id, self.reference))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::app::ports::{FetchedPage, Fetcher};
    use crate::domain::FetchMode;
    use crate::error::{DiscoveryError, Result};

    /// Serves canned bodies by URL and records every request.
    #[derive(Default)]
    pub struct CannedFetcher {
        pages: HashMap<(String, FetchMode), (u16, String)>,
        pub requests: Mutex<Vec<(String, FetchMode)>>,
        pub rendering: bool,
    }

    impl CannedFetcher {
        pub fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert((url.to_string(), FetchMode::Plain), (200, body.to_string()));
            self
        }

        pub fn rendered(mut self, url: &str, body: &str) -> Self {
            self.pages.insert((url.to_string(), FetchMode::Rendered), (200, body.to_string()));
            self.rendering = true;
            self
        }

        pub fn status(mut self, url: &str, status: u16) -> Self {
            self.pages.insert((url.to_string(), FetchMode::Plain), (status, String::new()));
            self
        }

        pub fn requested(&self, url: &str) -> bool {
            self.requests.lock().unwrap().iter().any(|(u, _)| u == url)
        }
    }

    #[async_trait]
    impl Fetcher for CannedFetcher {
        async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedPage> {
            self.requests.lock().unwrap().push((url.to_string(), mode));
            let (status, body) = self
                .pages
                .get(&(url.to_string(), mode))
                .cloned()
                .ok_or_else(|| DiscoveryError::Fetch {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                })?;
            let content_type = if body.starts_with("BEGIN:VCALENDAR") {
                "text/calendar"
            } else {
                "text/html"
            };
            Ok(FetchedPage {
                status,
                final_url: url.to_string(),
                body,
                content_type: content_type.to_string(),
                mode,
            })
        }

        fn supports(&self, mode: FetchMode) -> bool {
            mode == FetchMode::Plain || self.rendering
        }
    }
}
