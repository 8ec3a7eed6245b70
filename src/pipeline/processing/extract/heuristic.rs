//! Last resort: date and price patterns in the page's visible text.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use super::{ExtractContext, ExtractionStrategy};
use crate::domain::{Confidence, NormalizedEvent, PageKind, Price, StrategyKind};
use crate::pipeline::processing::datetime::{find_datetimes, DateMatch};
use crate::pipeline::processing::page::collapse_whitespace;

static PRICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\s?(\d+(?:\.\d{2})?)(?:\s*(?:-|–|to)\s*\$?\s?(\d+(?:\.\d{2})?))?").expect("valid regex")
});

static NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:doors|tickets?|buy|more info|details|rsvp|sold out|free|\W)*$").expect("valid regex")
});

pub struct HeuristicPatterns;

impl ExtractionStrategy for HeuristicPatterns {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Heuristic
    }

    fn applies_to(&self, page_kind: PageKind) -> bool {
        matches!(page_kind, PageKind::Calendar | PageKind::SingleEvent)
    }

    fn try_extract(&self, ctx: &ExtractContext<'_>) -> Vec<NormalizedEvent> {
        let lines: Vec<&str> = ctx.facts.text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        match ctx.classification.kind {
            PageKind::SingleEvent => single(ctx, &lines).into_iter().collect(),
            _ => listing(ctx, &lines),
        }
    }
}

/// The page's own heading plus the first date in its text.
fn single(ctx: &ExtractContext<'_>, lines: &[&str]) -> Option<NormalizedEvent> {
    let title = ctx
        .facts
        .meta("og:title")
        .map(str::to_string)
        .or_else(|| ctx.facts.heading.clone())
        .or_else(|| ctx.facts.title.clone())?;
    let (idx, found) = lines
        .iter()
        .enumerate()
        .find_map(|(i, l)| find_datetimes(l, ctx.reference).into_iter().next().map(|m| (i, m)))?;
    let mut event = NormalizedEvent::new(title, Some(found.value), "", Confidence::Low);
    event.price = price_near(lines, idx, ctx.reference);
    Some(event)
}

/// One event per dated line; the title is what remains of the line, else the
/// nearest meaningful neighbour.
fn listing(ctx: &ExtractContext<'_>, lines: &[&str]) -> Vec<NormalizedEvent> {
    let mut events = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let Some(found) = find_datetimes(line, ctx.reference).into_iter().next() else {
            continue;
        };
        let Some(title) = title_for(lines, idx, &found, ctx.reference) else {
            continue;
        };
        let mut event = NormalizedEvent::new(title, Some(found.value), "", Confidence::Low);
        event.price = price_near(lines, idx, ctx.reference);
        events.push(event);
    }
    events
}

fn title_for(lines: &[&str], idx: usize, found: &DateMatch, reference: NaiveDate) -> Option<String> {
    let line = lines[idx];
    let rest = format!("{} {}", &line[..found.start], &line[found.end..]);
    let rest = PRICE.replace_all(&rest, "");
    let rest = collapse_whitespace(rest.trim_matches(|c: char| !c.is_alphanumeric()));
    if is_meaningful(&rest) {
        return Some(rest);
    }
    [idx + 1, idx.wrapping_sub(1)]
        .into_iter()
        .filter_map(|i| lines.get(i))
        .map(|l| collapse_whitespace(l))
        .find(|l| is_meaningful(l) && PRICE.find(l).is_none() && !has_date(l, reference))
}

fn has_date(line: &str, reference: NaiveDate) -> bool {
    !find_datetimes(line, reference).is_empty()
}

fn is_meaningful(s: &str) -> bool {
    s.chars().filter(|c| c.is_alphabetic()).count() >= 3 && !NOISE.is_match(s)
}

/// A price on the dated line or the two after it, stopping at the next date.
fn price_near(lines: &[&str], idx: usize, reference: NaiveDate) -> Option<Price> {
    for (i, line) in lines.iter().enumerate().skip(idx).take(3) {
        if i > idx && has_date(line, reference) {
            break;
        }
        if let Some(caps) = PRICE.captures(line) {
            let min = caps.get(1).and_then(|m| m.as_str().parse().ok());
            let max = caps.get(2).and_then(|m| m.as_str().parse().ok());
            return Some(Price::Range {
                min,
                max: max.or(min),
                currency: Some("USD".to_string()),
            });
        }
    }
    None
}
