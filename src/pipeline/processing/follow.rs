//! Listing follow-up: a calendar page that only links to its events is
//! expanded by extracting each child page in turn.

use tracing::{debug, warn};
use url::Url;

use super::classify::classify_fetched;
use super::extract::extract;
use super::probe::{PageProber, ProbeResult};
use crate::domain::{ExtractionConfig, NormalizedEvent, StrategyKind};

#[derive(Debug, Default)]
pub struct Followed {
    pub events: Vec<NormalizedEvent>,
    /// The strategy that produced events on the first productive child page.
    pub sub_strategy: Option<StrategyKind>,
}

/// Fetch up to `max_follow_pages` child links of `listing` and extract each.
/// Failing children are logged and skipped.
pub async fn follow_child_links(
    prober: &PageProber<'_>,
    listing: &ProbeResult,
    config: &ExtractionConfig,
    source_id: &str,
) -> Followed {
    let child_config = ExtractionConfig {
        strategy: match config.strategy {
            Some(StrategyKind::FollowLinks) => config.sub_strategy,
            other => other,
        },
        sub_strategy: None,
        feed_url: None,
        default_venue: config
            .default_venue
            .clone()
            .or_else(|| Some(listing.classification.evidence.site_name.clone())),
        ..config.clone()
    };

    let mut followed = Followed::default();
    let children = &listing.classification.evidence.child_links;
    for child in children.iter().take(prober.max_follow_pages()) {
        let page = match prober.fetch(child, listing.mode).await {
            Ok(page) => page,
            Err(e) => {
                warn!(url = %child, error = %e, "child page fetch failed");
                continue;
            }
        };
        let Ok(child_url) = Url::parse(child) else {
            continue;
        };
        let (facts, classification) = classify_fetched(&child_url, &page);
        let extraction = extract(&classification, &facts, &child_config, source_id, prober.reference());
        debug!(url = %child, kind = %classification.kind, events = extraction.events.len(), "followed child page");

        if followed.sub_strategy.is_none() {
            followed.sub_strategy = extraction.strategy;
        }
        for mut event in extraction.events {
            if event.ticket_url.is_none() {
                event.ticket_url = Some(child.clone());
            }
            if !followed.events.iter().any(|e| e.dedup_key == event.dedup_key) {
                followed.events.push(event);
            }
        }
    }
    followed
}
