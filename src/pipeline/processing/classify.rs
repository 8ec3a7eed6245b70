//! Page classification. Total over any input: malformed markup simply
//! produces fewer signals and, at worst, `unclear`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::app::ports::FetchedPage;
use crate::constants::{ARTIST_AGGREGATORS, CALENDAR_PATH_SEGMENTS};
use crate::domain::PageKind;
use crate::pipeline::processing::extract::structured::event_objects;
use crate::pipeline::processing::page::PageFacts;

static SINGLE_EVENT_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(?:e|event|show|performance|ticket|gig)/[^/]+/?$").expect("valid regex")
});

/// What the classifier saw; reused downstream so nothing is parsed twice.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Evidence {
    /// Human-readable name of the rule that matched.
    pub rule: String,
    pub event_blocks: usize,
    pub feed_url: Option<String>,
    pub child_links: Vec<String>,
    pub site_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub kind: PageKind,
    pub evidence: Evidence,
}

/// Parse and classify a fetched page in one go.
pub fn classify_fetched(url: &Url, page: &FetchedPage) -> (PageFacts, ClassificationResult) {
    let facts = PageFacts::parse(url, page);
    let result = classify(&facts);
    (facts, result)
}

/// First match wins:
/// 1. structured event markup: one block is a single event, several a calendar
/// 2. a calendar feed body or link
/// 3. event page metadata (`og:type` event, `event:start_time`)
/// 4. a listing path segment or same-site child event links
/// 5. a tour-date aggregator artist path
/// 6. a single-event URL path
pub fn classify(facts: &PageFacts) -> ClassificationResult {
    let mut evidence = Evidence {
        event_blocks: event_objects(&facts.json_ld).len(),
        feed_url: if facts.is_calendar_feed {
            Some(facts.url.to_string())
        } else {
            facts.feed_links.first().cloned()
        },
        child_links: facts.child_event_links(),
        site_name: facts.site_name(),
        ..Evidence::default()
    };

    let (kind, rule) = decide(facts, &evidence);
    evidence.rule = rule.to_string();
    ClassificationResult { kind, evidence }
}

fn decide(facts: &PageFacts, evidence: &Evidence) -> (PageKind, &'static str) {
    match evidence.event_blocks {
        1 => return (PageKind::SingleEvent, "one structured event block"),
        n if n > 1 => return (PageKind::Calendar, "multiple structured event blocks"),
        _ => {}
    }
    if evidence.feed_url.is_some() {
        return (PageKind::Feed, "calendar feed");
    }
    if has_event_metadata(facts) {
        return (PageKind::SingleEvent, "event page metadata");
    }
    if is_calendar_path(&facts.url) {
        return (PageKind::Calendar, "calendar path");
    }
    if !evidence.child_links.is_empty() {
        return (PageKind::Calendar, "child event links");
    }
    if is_artist_aggregator(&facts.url) {
        return (PageKind::ArtistPage, "artist aggregator path");
    }
    if SINGLE_EVENT_PATH.is_match(facts.url.path()) {
        return (PageKind::SingleEvent, "single event path");
    }
    (PageKind::Unclear, "no signal")
}

fn has_event_metadata(facts: &PageFacts) -> bool {
    facts
        .meta("og:type")
        .map(|t| t.to_ascii_lowercase().contains("event"))
        .unwrap_or(false)
        || facts.meta("event:start_time").is_some()
}

pub fn is_calendar_path(url: &Url) -> bool {
    url.path_segments()
        .map(|mut segs| segs.any(|s| CALENDAR_PATH_SEGMENTS.contains(&s.to_ascii_lowercase().as_str())))
        .unwrap_or(false)
}

pub fn is_artist_aggregator(url: &Url) -> bool {
    let Some(host) = url.host_str().map(|h| h.trim_start_matches("www.").to_ascii_lowercase()) else {
        return false;
    };
    let path = url.path();
    ARTIST_AGGREGATORS.iter().any(|(agg_host, prefix)| {
        (host == *agg_host || host.ends_with(&format!(".{}", agg_host))) && path.starts_with(prefix) && path.len() > prefix.len()
    })
}
