//! Parent-source resolution: from a single event page, find the calendar
//! that lists it.

use tracing::{debug, info};
use url::Url;

use super::catalog::CandidateSource;
use super::probe::{passes_validation, PageProber, ProbePlan, ProbeResult};
use crate::constants::{
    CALENDAR_LINK_KEYWORDS, CALENDAR_PATH_SEGMENTS, HOSTED_CALENDAR_SUFFIXES, ORGANIZER_LINK_KEYWORDS,
    TICKETING_PLATFORMS,
};
use crate::domain::identity::{bare_host, normalize_url};
use crate::domain::{NormalizedEvent, PageKind};
use crate::error::Result;
use crate::pipeline::processing::page::{PageFacts, PageLink};
use crate::pipeline::storage::DiscoveryStore;

/// A validated parent calendar and the events it lists.
#[derive(Debug, Clone)]
pub struct ResolvedParent {
    pub candidate: CandidateSource,
    pub events: Vec<NormalizedEvent>,
}

/// Candidate calendar URL for an event page, in order of preference:
/// 1. an explicit venue or organizer link
/// 2. a same-site link labelled as the calendar
/// 3. the fixed calendar path of a known hosting platform
/// 4. the event URL truncated to its listing segment, else the site root
///
/// Candidates equal to the event URL or on a ticketing platform are skipped.
pub fn derive_calendar_url(facts: &PageFacts, original: &Url) -> Option<String> {
    let original_key = normalize_url(original.as_str()).ok();
    let acceptable = |candidate: &str| -> Option<String> {
        let normalized = normalize_url(candidate).ok()?;
        if Some(&normalized) == original_key.as_ref() {
            return None;
        }
        let url = Url::parse(&normalized).ok()?;
        if is_ticketing_host(&url) {
            return None;
        }
        Some(normalized)
    };

    let organizer = facts.links.iter().filter(|l| is_organizer_link(l));
    let calendar = facts.links.iter().filter(|l| is_calendar_link(l, original));
    let from_links = organizer.chain(calendar).find_map(|l| acceptable(&l.url));

    from_links
        .or_else(|| hosted_calendar(original).and_then(|c| acceptable(&c)))
        .or_else(|| acceptable(&truncated(original)))
}

/// Probe the derived calendar and keep it only if it is a listing with at
/// least one reliable event. A calendar that is already registered is probed
/// with its own config. Only store errors are returned.
pub async fn resolve_parent(
    prober: &PageProber<'_>,
    store: &dyn DiscoveryStore,
    event_page: &ProbeResult,
) -> Result<Option<ResolvedParent>> {
    let Ok(original) = Url::parse(&event_page.url) else {
        return Ok(None);
    };
    let Some(calendar_url) = derive_calendar_url(&event_page.facts, &original) else {
        debug!(url = %event_page.url, "no parent calendar candidate");
        return Ok(None);
    };

    let plan = ProbePlan::lookup(store, &calendar_url)?;
    let parent = match prober.probe_with(&calendar_url, &plan).await {
        Ok(parent) => parent,
        Err(e) => {
            info!(calendar = %calendar_url, error = %e, "parent calendar probe failed");
            return Ok(None);
        }
    };

    if !matches!(parent.kind(), PageKind::Calendar | PageKind::Feed | PageKind::ArtistPage) {
        info!(calendar = %calendar_url, kind = %parent.kind(), "parent candidate is not a listing");
        return Ok(None);
    }
    if !passes_validation(parent.events()) {
        info!(calendar = %calendar_url, events = parent.events().len(), "parent candidate failed validation");
        return Ok(None);
    }

    info!(event = %event_page.url, calendar = %calendar_url, "Resolved parent calendar");
    Ok(Some(ResolvedParent {
        candidate: CandidateSource::from_probe(&parent, Some(event_page.url.clone())),
        events: parent.extraction.events,
    }))
}

fn is_ticketing_host(url: &Url) -> bool {
    let host = bare_host(url).unwrap_or_default();
    TICKETING_PLATFORMS
        .iter()
        .any(|p| host == *p || host.ends_with(&format!(".{}", p)))
}

fn is_organizer_link(link: &PageLink) -> bool {
    let attrs = format!("{} {}", link.rel, link.class).to_ascii_lowercase();
    let text = link.text.to_ascii_lowercase();
    ORGANIZER_LINK_KEYWORDS
        .iter()
        .any(|k| attrs.contains(k) || text.starts_with(k))
}

fn is_calendar_link(link: &PageLink, original: &Url) -> bool {
    let Ok(target) = Url::parse(&link.url) else {
        return false;
    };
    if bare_host(&target) != bare_host(original) {
        return false;
    }
    let last_segment = target
        .path_segments()
        .and_then(|s| s.filter(|seg| !seg.is_empty()).last())
        .map(|s| s.to_ascii_lowercase());
    if let Some(seg) = last_segment {
        if CALENDAR_PATH_SEGMENTS.contains(&seg.as_str()) || CALENDAR_LINK_KEYWORDS.contains(&seg.as_str()) {
            return true;
        }
    }
    let text = link.text.to_ascii_lowercase();
    text.split_whitespace().count() <= 3 && CALENDAR_LINK_KEYWORDS.iter().any(|k| text.contains(k))
}

fn hosted_calendar(original: &Url) -> Option<String> {
    let host = original.host_str()?.to_ascii_lowercase();
    HOSTED_CALENDAR_SUFFIXES
        .iter()
        .find(|(suffix, _)| host.ends_with(suffix))
        .map(|(_, path)| format!("{}://{}{}", original.scheme(), host, path))
}

fn truncated(original: &Url) -> String {
    let segments: Vec<&str> = original
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    let listing_at = segments
        .iter()
        .position(|s| CALENDAR_PATH_SEGMENTS.contains(&s.to_ascii_lowercase().as_str()));

    let mut url = original.clone();
    url.set_query(None);
    url.set_fragment(None);
    match listing_at {
        Some(i) if i + 1 < segments.len() => url.set_path(&format!("/{}", segments[..=i].join("/"))),
        _ => url.set_path("/"),
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::extract::test_support::page;

    fn derive(url: &str, body: &str) -> Option<String> {
        let (facts, _) = page(url, body);
        derive_calendar_url(&facts, &Url::parse(url).unwrap())
    }

    #[test]
    fn prefers_organizer_links() {
        let body = r#"<html><body>
            <a href="/calendar">Calendar</a>
            <a class="event-venue" href="https://blueroom.example/">The Blue Room</a>
        </body></html>"#;
        assert_eq!(
            derive("https://tickets.example/show/123", body).as_deref(),
            Some("https://blueroom.example/")
        );
    }

    #[test]
    fn falls_back_to_calendar_link_then_truncation() {
        let body = r#"<html><body><a href="/calendar">Full calendar</a></body></html>"#;
        assert_eq!(
            derive("https://blueroom.example/shows/trio-night", body).as_deref(),
            Some("https://blueroom.example/calendar")
        );
        assert_eq!(
            derive("https://blueroom.example/shows/trio-night", "<html></html>").as_deref(),
            Some("https://blueroom.example/shows")
        );
        assert_eq!(
            derive("https://blueroom.example/trio-night", "<html></html>").as_deref(),
            Some("https://blueroom.example/")
        );
    }

    #[test]
    fn hosted_platforms_use_their_calendar_path() {
        assert_eq!(
            derive("https://blueroom.squarespace.com/2026/trio", "<html></html>").as_deref(),
            Some("https://blueroom.squarespace.com/events")
        );
    }

    #[test]
    fn ticketing_platforms_have_no_parent() {
        assert_eq!(derive("https://www.eventbrite.com/e/late-set-123", "<html></html>"), None);
    }

    #[test]
    fn never_returns_the_original_url() {
        assert_eq!(derive("https://blueroom.example/", "<html></html>"), None);
    }
}
