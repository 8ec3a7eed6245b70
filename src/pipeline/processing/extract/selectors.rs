//! CSS selectors configured per source, for listings with no markup.
//!
//! Recognized keys: `event` (repeating container), `title`, `date`, `time`,
//! `venue`, `price`, `link`, `performers`. Without `event` the whole
//! document is one event.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use super::{dated_confidence, ExtractContext, ExtractionStrategy};
use crate::domain::{Confidence, NormalizedEvent, Price, StrategyKind};
use crate::pipeline::processing::datetime::{parse_datetime, parse_time_phrase};
use crate::pipeline::processing::page::{element_text, resolve_href};

pub struct ConfiguredSelectors;

impl ExtractionStrategy for ConfiguredSelectors {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Selectors
    }

    fn try_extract(&self, ctx: &ExtractContext<'_>) -> Vec<NormalizedEvent> {
        let Some(ref raw) = ctx.config.selectors else {
            return Vec::new();
        };
        let Some(compiled) = compile(raw) else {
            return Vec::new();
        };
        if !compiled.contains_key("title") || ctx.facts.is_calendar_feed {
            return Vec::new();
        }

        let doc = Html::parse_document(&ctx.facts.body);
        let containers: Vec<ElementRef<'_>> = match compiled.get("event") {
            Some(sel) => doc.select(sel).collect(),
            None => vec![doc.root_element()],
        };
        containers
            .into_iter()
            .filter_map(|scope| extract_one(scope, &compiled, ctx))
            .collect()
    }
}

fn compile(raw: &BTreeMap<String, String>) -> Option<BTreeMap<String, Selector>> {
    let mut out = BTreeMap::new();
    for (key, css) in raw {
        match Selector::parse(css) {
            Ok(sel) => {
                out.insert(key.to_ascii_lowercase(), sel);
            }
            Err(e) => {
                warn!(key = key.as_str(), selector = css.as_str(), error = ?e, "invalid configured selector");
                return None;
            }
        }
    }
    Some(out)
}

fn field<'a>(scope: ElementRef<'a>, sels: &BTreeMap<String, Selector>, key: &str) -> Option<ElementRef<'a>> {
    scope.select(sels.get(key)?).next()
}

fn field_text(scope: ElementRef<'_>, sels: &BTreeMap<String, Selector>, key: &str) -> Option<String> {
    field(scope, sels, key)
        .map(|el| element_text(&el))
        .filter(|t| !t.is_empty())
}

fn extract_one(
    scope: ElementRef<'_>,
    sels: &BTreeMap<String, Selector>,
    ctx: &ExtractContext<'_>,
) -> Option<NormalizedEvent> {
    let title = field_text(scope, sels, "title")?;

    // Prefer a machine-readable attribute on the date element.
    let date_raw = field(scope, sels, "date").map(|el| {
        el.value()
            .attr("datetime")
            .or_else(|| el.value().attr("content"))
            .map(str::to_string)
            .unwrap_or_else(|| element_text(&el))
    });
    let mut start = date_raw.as_deref().and_then(|d| parse_datetime(d, ctx.reference));
    if let Some(time) = field_text(scope, sels, "time").and_then(|t| parse_time_phrase(&t)) {
        start = start.map(|s| s.date().and_time(time));
    }

    let venue = field_text(scope, sels, "venue").unwrap_or_default();
    let mut event = NormalizedEvent::new(title, start, venue, dated_confidence(Confidence::Medium, start));
    event.price = field_text(scope, sels, "price").map(|text| Price::Text { text });
    event.ticket_url = field(scope, sels, "link")
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| resolve_href(&ctx.facts.url, href));
    if let Some(sel) = sels.get("performers") {
        event.performers = scope
            .select(sel)
            .map(|el| element_text(&el))
            .filter(|t| !t.is_empty())
            .collect();
    }
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::page;
    use super::*;
    use crate::domain::ExtractionConfig;
    use chrono::NaiveDate;

    const LISTING: &str = r#"<div class="show">
          <h3 class="name">Trio</h3><span class="when">March 10, 2026</span><span class="at">8:00 PM</span>
          <a class="buy" href="/tix/1">Tickets</a><span class="price">$20</span>
          <ul><li class="artist">Ann</li><li class="artist">Bo</li></ul>
        </div>
        <div class="show">
          <h3 class="name">Quartet</h3><span class="when">TBA</span>
        </div>
        <div class="show"><span class="when">March 12, 2026</span></div>"#;

    fn config(pairs: &[(&str, &str)]) -> ExtractionConfig {
        ExtractionConfig {
            selectors: Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
            ..ExtractionConfig::default()
        }
    }

    fn run(html: &str, config: &ExtractionConfig) -> Vec<NormalizedEvent> {
        let (facts, classification) = page("https://venue.example/calendar", html);
        let ctx = ExtractContext {
            facts: &facts,
            classification: &classification,
            config,
            reference: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        };
        ConfiguredSelectors.try_extract(&ctx)
    }

    #[test]
    fn repeating_containers() {
        let config = config(&[
            ("event", "div.show"),
            ("title", ".name"),
            ("date", ".when"),
            ("time", ".at"),
            ("link", "a.buy"),
            ("price", ".price"),
            ("performers", ".artist"),
        ]);
        let events = run(LISTING, &config);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].title, "Trio");
        assert_eq!(
            events[0].start_datetime,
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap().and_hms_opt(20, 0, 0)
        );
        assert_eq!(events[0].confidence, Confidence::Medium);
        assert_eq!(events[0].ticket_url.as_deref(), Some("https://venue.example/tix/1"));
        assert_eq!(events[0].performers, vec!["Ann", "Bo"]);
        assert_eq!(events[1].start_datetime, None);
        assert_eq!(events[1].confidence, Confidence::Low);
    }

    #[test]
    fn invalid_selector_yields_nothing() {
        let config = config(&[("title", "h3[[[")]);
        assert!(run(LISTING, &config).is_empty());
    }

    #[test]
    fn no_selectors_configured() {
        assert!(run(LISTING, &ExtractionConfig::default()).is_empty());
    }
}
