//! Open Graph style page metadata, for single event pages without markup.

use super::{dated_confidence, ExtractContext, ExtractionStrategy};
use crate::domain::{Confidence, NormalizedEvent, PageKind, StrategyKind};
use crate::pipeline::processing::datetime::parse_datetime;

const START_KEYS: &[&str] = &["event:start_time", "og:event:start_time", "event:start_date", "startdate"];
const END_KEYS: &[&str] = &["event:end_time", "og:event:end_time"];

pub struct PageMetadata;

impl ExtractionStrategy for PageMetadata {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PageMetadata
    }

    fn applies_to(&self, page_kind: PageKind) -> bool {
        page_kind == PageKind::SingleEvent
    }

    fn try_extract(&self, ctx: &ExtractContext<'_>) -> Vec<NormalizedEvent> {
        let facts = ctx.facts;
        let title = facts
            .meta("og:title")
            .or_else(|| facts.meta("twitter:title"))
            .map(str::to_string)
            .or_else(|| facts.title.clone())
            .or_else(|| facts.heading.clone());
        let Some(title) = title else {
            return Vec::new();
        };

        let start = START_KEYS
            .iter()
            .filter_map(|k| facts.meta(k))
            .chain(facts.time_values.iter().map(String::as_str))
            .find_map(|raw| parse_datetime(raw, ctx.reference));
        let end = END_KEYS
            .iter()
            .filter_map(|k| facts.meta(k))
            .find_map(|raw| parse_datetime(raw, ctx.reference));

        // Medium at best; without a date it drops to low.
        let mut event = NormalizedEvent::new(title, start, "", dated_confidence(Confidence::Medium, start));
        event.end_datetime = end;
        event.description = facts
            .meta("og:description")
            .or_else(|| facts.meta("description"))
            .map(str::to_string);
        event.ticket_url = Some(
            facts
                .meta("og:url")
                .map(str::to_string)
                .unwrap_or_else(|| facts.url.to_string()),
        );
        vec![event]
    }
}
