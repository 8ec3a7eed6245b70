//! Extractor cascade: a fixed, closed set of strategies tried in order of
//! decreasing confidence until one yields events.

pub mod feed;
pub mod heuristic;
pub mod metadata;
pub mod selectors;
pub mod structured;

use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::debug;

use crate::constants::{DEFAULT_VENUE_NAME, TICKETING_PLATFORMS};
use crate::domain::{ExtractionConfig, NormalizedEvent, PageKind, StrategyKind};
use crate::observability::metrics::DiscoveryMetrics;
use crate::pipeline::processing::classify::ClassificationResult;
use crate::pipeline::processing::page::PageFacts;

/// Strategies tried when no strategy is pinned, highest confidence first.
pub const CASCADE: [StrategyKind; 5] = [
    StrategyKind::StructuredMarkup,
    StrategyKind::CalendarFeed,
    StrategyKind::PageMetadata,
    StrategyKind::Selectors,
    StrategyKind::Heuristic,
];

/// Everything a strategy may look at. Strategies never fetch.
pub struct ExtractContext<'a> {
    pub facts: &'a PageFacts,
    pub classification: &'a ClassificationResult,
    pub config: &'a ExtractionConfig,
    /// Anchors year inference for dates printed without one.
    pub reference: NaiveDate,
}

pub trait ExtractionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether the cascade may try this strategy for a page of `page_kind`.
    fn applies_to(&self, _page_kind: PageKind) -> bool {
        true
    }

    fn try_extract(&self, ctx: &ExtractContext<'_>) -> Vec<NormalizedEvent>;
}

/// `FollowLinks` has no in-page implementation; it needs fetches.
pub fn strategy_for(kind: StrategyKind) -> Option<Box<dyn ExtractionStrategy>> {
    match kind {
        StrategyKind::StructuredMarkup => Some(Box::new(structured::StructuredMarkup)),
        StrategyKind::CalendarFeed => Some(Box::new(feed::CalendarFeed)),
        StrategyKind::PageMetadata => Some(Box::new(metadata::PageMetadata)),
        StrategyKind::Selectors => Some(Box::new(selectors::ConfiguredSelectors)),
        StrategyKind::Heuristic => Some(Box::new(heuristic::HeuristicPatterns)),
        StrategyKind::FollowLinks => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub events: Vec<NormalizedEvent>,
    /// The strategy that produced `events`; `None` when the cascade came up empty.
    pub strategy: Option<StrategyKind>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Run the cascade (or the pinned strategy) over one page.
///
/// Every returned event has its venue defaulted, its `source_id` set and its
/// dedup key computed; duplicates within the page are dropped.
pub fn extract(
    classification: &ClassificationResult,
    facts: &PageFacts,
    config: &ExtractionConfig,
    source_id: &str,
    reference: NaiveDate,
) -> Extraction {
    if classification.kind == PageKind::Unclear {
        return Extraction::default();
    }

    let ctx = ExtractContext {
        facts,
        classification,
        config,
        reference,
    };

    let pinned = match config.strategy {
        Some(StrategyKind::FollowLinks) => config.sub_strategy,
        other => other,
    };

    let order: Vec<StrategyKind> = match pinned {
        Some(kind) => vec![kind],
        None => CASCADE.to_vec(),
    };

    for kind in order {
        let Some(strategy) = strategy_for(kind) else {
            continue;
        };
        if pinned.is_none() && !strategy.applies_to(classification.kind) {
            continue;
        }
        let raw = strategy.try_extract(&ctx);
        debug!(strategy = %kind, events = raw.len(), url = %facts.url, "strategy attempted");
        if raw.is_empty() {
            continue;
        }
        let events = finalize(raw, &ctx, source_id);
        if events.is_empty() {
            continue;
        }
        DiscoveryMetrics::record_strategy_hit(kind, events.len());
        return Extraction {
            events,
            strategy: Some(kind),
        };
    }

    Extraction::default()
}

/// Venue fallback for events that name none: the configured default, the
/// site's own name, or the placeholder on ticketing platforms.
pub fn default_venue(ctx: &ExtractContext<'_>) -> String {
    if let Some(ref venue) = ctx.config.default_venue {
        return venue.clone();
    }
    let host = ctx.facts.host().unwrap_or_default();
    if TICKETING_PLATFORMS
        .iter()
        .any(|p| host == *p || host.ends_with(&format!(".{}", p)))
    {
        return DEFAULT_VENUE_NAME.to_string();
    }
    let name = ctx.classification.evidence.site_name.trim();
    if name.is_empty() {
        DEFAULT_VENUE_NAME.to_string()
    } else {
        name.to_string()
    }
}

fn finalize(raw: Vec<NormalizedEvent>, ctx: &ExtractContext<'_>, source_id: &str) -> Vec<NormalizedEvent> {
    let fallback_venue = default_venue(ctx);
    let fallback_category = ctx
        .config
        .event_type
        .as_deref()
        .map(crate::constants::category_for_event_type)
        .unwrap_or_default();

    let mut seen = HashSet::new();
    raw.into_iter()
        .filter(|e| !e.title.trim().is_empty())
        .filter_map(|mut event| {
            event.title = event.title.trim().to_string();
            if event.venue_name.trim().is_empty() {
                event.venue_name = fallback_venue.clone();
            }
            if event.category.is_empty() {
                event.category = fallback_category.to_string();
            }
            event.source_id = source_id.to_string();
            event.refresh_dedup_key();
            seen.insert(event.dedup_key.clone()).then_some(event)
        })
        .collect()
}

/// Shared by the strategies: a confidence level, downgraded when the date
/// could not be established.
pub(crate) fn dated_confidence(
    base: crate::domain::Confidence,
    start: Option<chrono::NaiveDateTime>,
) -> crate::domain::Confidence {
    if start.is_some() {
        base
    } else {
        base.downgrade()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use url::Url;

    use crate::app::ports::FetchedPage;
    use crate::domain::FetchMode;
    use crate::pipeline::processing::classify::{classify, ClassificationResult};
    use crate::pipeline::processing::page::PageFacts;

    pub fn page(url: &str, body: &str) -> (PageFacts, ClassificationResult) {
        let fetched = FetchedPage {
            status: 200,
            final_url: url.to_string(),
            body: body.to_string(),
            content_type: "text/html".to_string(),
            mode: FetchMode::Plain,
        };
        let facts = PageFacts::parse(&Url::parse(url).unwrap(), &fetched);
        let classification = classify(&facts);
        (facts, classification)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::page;
    use super::*;
    use crate::domain::Confidence;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    const TWO_EVENTS: &str = r#"<html><head>
        <script type="application/ld+json">[
          {"@type":"MusicEvent","name":"Trio","startDate":"2026-03-10T20:00",
           "location":{"@type":"Place","name":"Blue Room"}},
          {"@type":"MusicEvent","name":"Quartet","startDate":"2026-03-11T20:00",
           "location":{"@type":"Place","name":"Blue Room"}}
        ]</script></head><body><p>March 12 at 8pm Sextet</p></body></html>"#;

    #[test]
    fn cascade_stops_at_first_productive_strategy() {
        let (facts, classification) = page("https://blueroom.example/calendar", TWO_EVENTS);
        let out = extract(&classification, &facts, &ExtractionConfig::default(), "blueroom", reference());
        assert_eq!(out.strategy, Some(StrategyKind::StructuredMarkup));
        assert_eq!(out.events.len(), 2);
        assert!(out.events.iter().all(|e| e.confidence == Confidence::High));
        assert!(out.events.iter().all(|e| e.source_id == "blueroom"));
    }

    #[test]
    fn pinned_strategy_runs_alone() {
        let (facts, classification) = page("https://blueroom.example/calendar", TWO_EVENTS);
        let config = ExtractionConfig::pinned(StrategyKind::Heuristic);
        let out = extract(&classification, &facts, &config, "blueroom", reference());
        assert_eq!(out.strategy, Some(StrategyKind::Heuristic));
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].confidence, Confidence::Low);
    }

    #[test]
    fn unclear_pages_extract_nothing() {
        let (facts, classification) = page(
            "https://blueroom.example/about",
            "<html><body><p>March 12 at 8pm Sextet</p></body></html>",
        );
        assert_eq!(classification.kind, PageKind::Unclear);
        let out = extract(&classification, &facts, &ExtractionConfig::default(), "x", reference());
        assert!(out.is_empty());
        assert!(out.strategy.is_none());
    }

    #[test]
    fn duplicates_within_a_page_collapse() {
        let html = r#"<script type="application/ld+json">{"@graph":[
            {"@type":"Event","name":"Jam","startDate":"2026-03-10T20:00"},
            {"@type":"Event","name":"Jam","startDate":"2026-03-10T20:00"}]}</script>"#;
        let (facts, classification) = page("https://blueroom.example/events/jam", html);
        let out = extract(&classification, &facts, &ExtractionConfig::default(), "x", reference());
        assert_eq!(out.events.len(), 1);
        assert_eq!(out.events[0].venue_name, "Blueroom");
    }
}
