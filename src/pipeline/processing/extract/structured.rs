//! schema.org Event family embedded as JSON-LD.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::{dated_confidence, ExtractContext, ExtractionStrategy};
use crate::constants::{category_for_event_type, EVENT_TYPES};
use crate::domain::{Confidence, NormalizedEvent, Price, StrategyKind};
use crate::pipeline::processing::datetime::parse_datetime;

pub struct StructuredMarkup;

impl ExtractionStrategy for StructuredMarkup {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StructuredMarkup
    }

    fn try_extract(&self, ctx: &ExtractContext<'_>) -> Vec<NormalizedEvent> {
        let wanted = ctx.config.event_type.as_deref();
        event_objects(&ctx.facts.json_ld)
            .into_iter()
            .filter(|obj| wanted.map_or(true, |t| event_type(obj).as_deref() == Some(t)))
            .filter_map(|obj| to_event(obj, ctx))
            .collect()
    }
}

/// Distinct event objects across all JSON-LD blocks. Looks through top-level
/// arrays, `@graph`, `ItemList` elements and a place's `event` list.
pub fn event_objects(blocks: &[Value]) -> Vec<&Map<String, Value>> {
    let mut found = Vec::new();
    for block in blocks {
        collect(block, &mut found, 0);
    }
    let mut seen = HashSet::new();
    found.retain(|obj| {
        let key = (
            obj.get("name").map(Value::to_string).unwrap_or_default(),
            obj.get("startDate").map(Value::to_string).unwrap_or_default(),
        );
        seen.insert(key)
    });
    found
}

fn collect<'a>(value: &'a Value, out: &mut Vec<&'a Map<String, Value>>, depth: usize) {
    if depth > 6 {
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, out, depth + 1);
            }
        }
        Value::Object(obj) => {
            if event_type(obj).is_some() {
                out.push(obj);
                return;
            }
            for key in ["@graph", "itemListElement", "item", "event", "events"] {
                if let Some(inner) = obj.get(key) {
                    collect(inner, out, depth + 1);
                }
            }
        }
        _ => {}
    }
}

/// The first `@type` naming an event type, with any vocabulary prefix removed.
fn event_type(obj: &Map<String, Value>) -> Option<String> {
    let types: Vec<&str> = match obj.get("@type")? {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => return None,
    };
    types
        .into_iter()
        .map(|t| t.rsplit(['/', ':']).next().unwrap_or(t))
        .find(|t| EVENT_TYPES.contains(t))
        .map(str::to_string)
}

fn to_event(obj: &Map<String, Value>, ctx: &ExtractContext<'_>) -> Option<NormalizedEvent> {
    let title = text(obj.get("name")?)?;
    let start = obj
        .get("startDate")
        .and_then(Value::as_str)
        .and_then(|s| parse_datetime(s, ctx.reference));
    let end = obj
        .get("endDate")
        .and_then(Value::as_str)
        .and_then(|s| parse_datetime(s, ctx.reference));

    let venue = obj.get("location").and_then(location_name).unwrap_or_default();
    let mut event = NormalizedEvent::new(title, start, venue, dated_confidence(Confidence::High, start));
    event.end_datetime = end;
    event.performers = obj.get("performer").map(names).unwrap_or_default();
    event.description = obj.get("description").and_then(text);
    event.category = event_type(obj)
        .map(|t| category_for_event_type(&t).to_string())
        .unwrap_or_default();

    let offer = obj.get("offers").and_then(|o| match o {
        Value::Array(items) => items.first(),
        other => Some(other),
    });
    if let Some(Value::Object(offer)) = offer {
        event.price = price(offer);
        event.ticket_url = offer.get("url").and_then(text);
    }
    if let Some(url) = obj.get("url").and_then(text) {
        event.ticket_url = ctx
            .facts
            .url
            .join(&url)
            .map(|u| u.to_string())
            .ok()
            .or(event.ticket_url);
    }
    Some(event)
}

fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn location_name(value: &Value) -> Option<String> {
    match value {
        Value::String(_) => text(value),
        Value::Object(obj) => obj.get("name").and_then(text),
        Value::Array(items) => items.iter().find_map(location_name),
        _ => None,
    }
}

fn names(value: &Value) -> Vec<String> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let name = match item {
            Value::Object(obj) => obj.get("name").and_then(text),
            other => text(other),
        };
        if let Some(name) = name {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    out
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok(),
        _ => None,
    }
}

fn price(offer: &Map<String, Value>) -> Option<Price> {
    let min = offer.get("price").or_else(|| offer.get("lowPrice"));
    let max = offer.get("highPrice");
    let currency = offer.get("priceCurrency").and_then(text);

    match (min.and_then(number), max.and_then(number)) {
        (None, None) => min.and_then(text).map(|text| Price::Text { text }),
        (lo, hi) => Some(Price::Range { min: lo, max: hi, currency }),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::page;
    use super::*;
    use crate::domain::ExtractionConfig;
    use chrono::NaiveDate;

    fn run(url: &str, html: &str, config: &ExtractionConfig) -> Vec<NormalizedEvent> {
        let (facts, classification) = page(url, html);
        let ctx = ExtractContext {
            facts: &facts,
            classification: &classification,
            config,
            reference: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        };
        StructuredMarkup.try_extract(&ctx)
    }

    #[test]
    fn extracts_full_music_event() {
        let html = r#"<script type="application/ld+json">{
            "@context":"https://schema.org","@type":"MusicEvent",
            "name":"Brad Mehldau Trio","startDate":"2026-03-15T20:00:00.000-05:00",
            "endDate":"2026-03-15T22:00:00-05:00",
            "location":{"@type":"Place","name":"Village Vanguard","address":"178 7th Ave S"},
            "performer":[{"@type":"MusicGroup","name":"Brad Mehldau"},"Larry Grenadier"],
            "offers":{"@type":"Offer","lowPrice":"40","highPrice":55,"priceCurrency":"USD",
                      "url":"https://tix.example/1"},
            "url":"/events/mehldau","description":"Three nights only."}</script>"#;
        let events = run("https://villagevanguard.example/events/mehldau", html, &ExtractionConfig::default());
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.title, "Brad Mehldau Trio");
        assert_eq!(
            e.start_datetime,
            NaiveDate::from_ymd_opt(2026, 3, 15).unwrap().and_hms_opt(20, 0, 0)
        );
        assert!(e.end_datetime.is_some());
        assert_eq!(e.venue_name, "Village Vanguard");
        assert_eq!(e.performers, vec!["Brad Mehldau", "Larry Grenadier"]);
        assert_eq!(
            e.price,
            Some(Price::Range {
                min: Some(40.0),
                max: Some(55.0),
                currency: Some("USD".to_string())
            })
        );
        assert_eq!(
            e.ticket_url.as_deref(),
            Some("https://villagevanguard.example/events/mehldau")
        );
        assert_eq!(e.category, "concert");
        assert_eq!(e.confidence, Confidence::High);
    }

    #[test]
    fn reads_item_list_and_prefixed_types() {
        let html = r#"<script type="application/ld+json">{"@type":"ItemList","itemListElement":[
            {"@type":"ListItem","item":{"@type":"schema:TheaterEvent","name":"Hamlet","startDate":"2026-04-01T19:30"}},
            {"@type":"ListItem","item":{"@type":["Thing","ExhibitionEvent"],"name":"Prints","startDate":"2026-04-02"}}
        ]}</script>"#;
        let events = run("https://stage.example/", html, &ExtractionConfig::default());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].category, "theatre");
        assert_eq!(events[1].category, "exhibition");
    }

    #[test]
    fn bad_date_downgrades_instead_of_dropping() {
        let html = r#"<script type="application/ld+json">[
            {"@type":"Event","name":"Mystery Show","startDate":"sometime soon"},
            {"@type":"Event","name":"Real Show","startDate":"2026-05-01T20:00"},
            {"@type":"Event","startDate":"2026-05-02T20:00"}]</script>"#;
        let events = run("https://venue.example/calendar", html, &ExtractionConfig::default());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start_datetime, None);
        assert_eq!(events[0].confidence, Confidence::Medium);
        assert_eq!(events[1].confidence, Confidence::High);
    }

    #[test]
    fn free_text_price_and_type_filter() {
        let html = r#"<script type="application/ld+json">[
            {"@type":"MusicEvent","name":"Free Jam","startDate":"2026-05-01T20:00","offers":{"price":"Free"}},
            {"@type":"ComedyEvent","name":"Standup","startDate":"2026-05-02T20:00"}]</script>"#;
        let config = ExtractionConfig {
            event_type: Some("MusicEvent".to_string()),
            ..ExtractionConfig::default()
        };
        let events = run("https://venue.example/calendar", html, &config);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].price,
            Some(Price::Text {
                text: "Free".to_string()
            })
        );
    }
}
