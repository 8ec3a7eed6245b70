//! iCalendar (`.ics`) feeds: one event per VEVENT occurrence.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use rrule::{RRuleSet, Tz};
use tracing::debug;

use super::{dated_confidence, ExtractContext, ExtractionStrategy};
use crate::constants::{MAX_RECURRENCES, RECURRENCE_HORIZON_DAYS};
use crate::domain::{Confidence, NormalizedEvent, StrategyKind};

pub struct CalendarFeed;

impl ExtractionStrategy for CalendarFeed {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CalendarFeed
    }

    fn try_extract(&self, ctx: &ExtractContext<'_>) -> Vec<NormalizedEvent> {
        if !ctx.facts.is_calendar_feed {
            return Vec::new();
        }
        parse_calendar(&ctx.facts.body)
            .iter()
            .flat_map(|vevent| vevent.occurrences(ctx.reference))
            .collect()
    }
}

/// A property value plus its `;KEY=VALUE` parameters.
#[derive(Debug, Clone, Default)]
struct Property {
    params: HashMap<String, String>,
    value: String,
}

#[derive(Debug, Clone, Default)]
pub struct VEvent {
    props: HashMap<String, Property>,
    exdates: Vec<NaiveDateTime>,
}

impl VEvent {
    fn text(&self, name: &str) -> Option<String> {
        self.props
            .get(name)
            .map(|p| unescape(&p.value))
            .filter(|s| !s.trim().is_empty())
    }

    fn datetime(&self, name: &str) -> Option<NaiveDateTime> {
        self.props.get(name).and_then(parse_ics_datetime)
    }

    /// Expanded into one event per occurrence from `reference` on; a broken
    /// RRULE degrades to the first occurrence only.
    pub fn occurrences(&self, reference: NaiveDate) -> Vec<NormalizedEvent> {
        let Some(title) = self.text("SUMMARY") else {
            return Vec::new();
        };
        let start = self.datetime("DTSTART");
        let duration = match (start, self.datetime("DTEND")) {
            (Some(s), Some(e)) if e > s => Some(e - s),
            _ => None,
        };

        let starts: Vec<Option<NaiveDateTime>> = match (start, self.props.get("RRULE")) {
            (Some(s), Some(rule)) => match expand(s, &rule.value, reference) {
                Some(dates) => dates
                    .into_iter()
                    .filter(|d| !self.exdates.contains(d))
                    .map(Some)
                    .collect(),
                None => vec![Some(s)],
            },
            _ => vec![start],
        };

        let venue = self
            .text("LOCATION")
            .map(|l| l.split(',').next().unwrap_or_default().trim().to_string())
            .unwrap_or_default();
        let url = self.text("URL");
        let description = self.text("DESCRIPTION");

        starts
            .into_iter()
            .map(|occurrence| {
                let mut event = NormalizedEvent::new(
                    title.clone(),
                    occurrence,
                    venue.clone(),
                    dated_confidence(Confidence::High, occurrence),
                );
                event.end_datetime = occurrence.zip(duration).map(|(s, d)| s + d);
                event.ticket_url = url.clone();
                event.description = description.clone();
                event
            })
            .collect()
    }
}

/// Parse every VEVENT in an iCalendar body. Unknown lines are ignored.
pub fn parse_calendar(body: &str) -> Vec<VEvent> {
    let mut events = Vec::new();
    let mut current: Option<VEvent> = None;

    for line in unfold(body) {
        let Some((name, prop)) = parse_line(&line) else {
            continue;
        };
        match (name.as_str(), prop.value.as_str()) {
            ("BEGIN", "VEVENT") => current = Some(VEvent::default()),
            ("END", "VEVENT") => {
                if let Some(ev) = current.take() {
                    events.push(ev);
                }
            }
            ("EXDATE", _) => {
                if let Some(ev) = current.as_mut() {
                    for raw in prop.value.split(',') {
                        let single = Property {
                            params: prop.params.clone(),
                            value: raw.to_string(),
                        };
                        if let Some(dt) = parse_ics_datetime(&single) {
                            ev.exdates.push(dt);
                        }
                    }
                }
            }
            _ => {
                if let Some(ev) = current.as_mut() {
                    ev.props.entry(name).or_insert(prop);
                }
            }
        }
    }
    events
}

/// RFC 5545 line unfolding: a line starting with a space or tab continues the previous one.
fn unfold(body: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in body.split('\n') {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(rest) = raw.strip_prefix([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push_str(rest);
                continue;
            }
        }
        if !raw.is_empty() {
            lines.push(raw.to_string());
        }
    }
    lines
}

fn parse_line(line: &str) -> Option<(String, Property)> {
    // The value starts at the first colon outside a quoted parameter.
    let mut in_quotes = false;
    let split = line.char_indices().find(|&(_, c)| {
        if c == '"' {
            in_quotes = !in_quotes;
        }
        c == ':' && !in_quotes
    })?;
    let (head, value) = (&line[..split.0], &line[split.0 + 1..]);

    let mut parts = head.split(';');
    let name = parts.next()?.trim().to_ascii_uppercase();
    let params = parts
        .filter_map(|p| p.split_once('='))
        .map(|(k, v)| (k.trim().to_ascii_uppercase(), v.trim_matches('"').to_string()))
        .collect();
    Some((
        name,
        Property {
            params,
            value: value.to_string(),
        },
    ))
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out.trim().to_string()
}

/// `VALUE=DATE` / `YYYYMMDD` is an all-day start at midnight. UTC (`Z`) and
/// `TZID` forms both keep their printed wall-clock time.
fn parse_ics_datetime(prop: &Property) -> Option<NaiveDateTime> {
    let value = prop.value.trim().trim_end_matches('Z');
    let all_day = prop.params.get("VALUE").map(|v| v.eq_ignore_ascii_case("DATE")).unwrap_or(false);
    if all_day || value.len() == 8 {
        return NaiveDate::parse_from_str(value, "%Y%m%d")
            .ok()
            .map(|d| d.and_time(NaiveTime::MIN));
    }
    NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M"))
        .ok()
}

/// Occurrences of `rule` inside `[reference, reference + horizon]`, capped by
/// count. `None` when rrule rejects the rule; an empty window is `Some([])`.
fn expand(start: NaiveDateTime, rule: &str, reference: NaiveDate) -> Option<Vec<NaiveDateTime>> {
    let spec = format!(
        "DTSTART:{}Z\nRRULE:{}",
        start.format("%Y%m%dT%H%M%S"),
        utc_until(rule.trim())
    );
    let set: RRuleSet = match spec.parse() {
        Ok(set) => set,
        Err(e) => {
            debug!(rule, error = %e, "unusable RRULE, keeping first occurrence");
            return None;
        }
    };
    let window_start = start.max(reference.and_time(NaiveTime::MIN));
    let window_end = window_start + Duration::days(RECURRENCE_HORIZON_DAYS);
    let dates = set
        .after(Tz::UTC.from_utc_datetime(&(window_start - Duration::seconds(1))))
        .before(Tz::UTC.from_utc_datetime(&window_end))
        .all(MAX_RECURRENCES)
        .dates
        .into_iter()
        .map(|d| d.naive_utc())
        .collect();
    Some(dates)
}

/// DTSTART is always sent as UTC, so UNTIL must be UTC too: a date-only
/// `UNTIL=YYYYMMDD` covers the whole day and a floating time gains a `Z`.
fn utc_until(rule: &str) -> String {
    rule.split(';')
        .map(|part| match part.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("UNTIL") => {
                let value = value.trim();
                if value.len() == 8 && value.chars().all(|c| c.is_ascii_digit()) {
                    format!("UNTIL={}T235959Z", value)
                } else if value.ends_with(['Z', 'z']) {
                    format!("UNTIL={}", value)
                } else {
                    format!("UNTIL={}Z", value)
                }
            }
            _ => part.to_string(),
        })
        .collect::<Vec<_>>()
        .join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn occurrences(feed: &str) -> Vec<NormalizedEvent> {
        parse_calendar(feed)
            .iter()
            .flat_map(|v| v.occurrences(reference()))
            .collect()
    }

    const FEED: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
BEGIN:VEVENT\r\n\
UID:1@venue.example\r\n\
SUMMARY:Late Set with the\r\n  House Band\r\n\
DTSTART;TZID=America/New_York:20260315T220000\r\n\
DTEND;TZID=America/New_York:20260316T000000\r\n\
LOCATION:Smalls Jazz Club\\, 183 W 10th St\r\n\
URL:https://venue.example/late-set\r\n\
DESCRIPTION:Two sets.\\nNo cover.\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
SUMMARY:Gallery Day\r\n\
DTSTART;VALUE=DATE:20260320\r\n\
END:VEVENT\r\n\
BEGIN:VEVENT\r\n\
DTSTART:20260321T200000Z\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn parses_unfolded_events() {
        let events = occurrences(FEED);
        assert_eq!(events.len(), 2);

        let late = &events[0];
        assert_eq!(late.title, "Late Set with the House Band");
        assert_eq!(late.start_datetime, Some(at(2026, 3, 15, 22, 0)));
        assert_eq!(late.end_datetime, Some(at(2026, 3, 16, 0, 0)));
        assert_eq!(late.venue_name, "Smalls Jazz Club");
        assert_eq!(late.ticket_url.as_deref(), Some("https://venue.example/late-set"));
        assert_eq!(late.description.as_deref(), Some("Two sets.\nNo cover."));
        assert_eq!(late.confidence, Confidence::High);

        assert_eq!(events[1].start_datetime, Some(at(2026, 3, 20, 0, 0)));
    }

    #[test]
    fn weekly_rule_expands_to_distinct_occurrences() {
        let feed = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nSUMMARY:Tuesday Jam\n\
DTSTART:20260303T200000\nRRULE:FREQ=WEEKLY;COUNT=4\n\
EXDATE:20260310T200000\nEND:VEVENT\nEND:VCALENDAR\n";
        let events = occurrences(feed);
        let starts: Vec<_> = events.iter().filter_map(|e| e.start_datetime).collect();
        assert_eq!(
            starts,
            vec![at(2026, 3, 3, 20, 0), at(2026, 3, 17, 20, 0), at(2026, 3, 24, 20, 0)]
        );
        let mut keys: Vec<_> = events.iter().map(|e| e.dedup_key.clone()).collect();
        keys.dedup();
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn open_ended_rule_is_capped() {
        let feed = "BEGIN:VEVENT\nSUMMARY:Daily Thing\nDTSTART:20260101T120000\nRRULE:FREQ=DAILY\nEND:VEVENT\n";
        let events = occurrences(feed);
        assert_eq!(events.len(), MAX_RECURRENCES as usize);
    }

    #[test]
    fn broken_rule_keeps_first_occurrence() {
        let feed = "BEGIN:VEVENT\nSUMMARY:Odd\nDTSTART:20260101T120000\nRRULE:NOT_A_RULE\nEND:VEVENT\n";
        let events = occurrences(feed);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_datetime, Some(at(2026, 1, 1, 12, 0)));
    }

    #[test]
    fn missing_start_downgrades() {
        let feed = "BEGIN:VEVENT\nSUMMARY:Someday\nDTSTART:soon\nEND:VEVENT\n";
        let events = occurrences(feed);
        assert_eq!(events[0].start_datetime, None);
        assert_eq!(events[0].confidence, Confidence::Medium);
    }

    #[test]
    fn long_running_series_yields_upcoming_dates() {
        let feed = "BEGIN:VEVENT\nSUMMARY:Monday Session\nDTSTART:20190107T200000\nRRULE:FREQ=WEEKLY\nEND:VEVENT\n";
        let events = occurrences(feed);
        assert_eq!(events.len(), MAX_RECURRENCES as usize);
        assert_eq!(events[0].start_datetime, Some(at(2026, 3, 2, 20, 0)));
        let floor = reference().and_time(NaiveTime::MIN);
        assert!(events.iter().all(|e| e.start_datetime.unwrap() >= floor));
    }

    #[test]
    fn finished_series_yields_nothing() {
        let feed = "BEGIN:VEVENT\nSUMMARY:Old Run\nDTSTART:20190107T200000\nRRULE:FREQ=WEEKLY;COUNT=3\nEND:VEVENT\n";
        assert!(occurrences(feed).is_empty());
    }

    #[test]
    fn all_day_series_with_date_until_expands() {
        let feed = "BEGIN:VEVENT\nSUMMARY:Monday Market\nDTSTART;VALUE=DATE:20260302\n\
RRULE:FREQ=WEEKLY;UNTIL=20260330\nEND:VEVENT\n";
        let starts: Vec<_> = occurrences(feed).iter().filter_map(|e| e.start_datetime).collect();
        assert_eq!(
            starts,
            vec![
                at(2026, 3, 2, 0, 0),
                at(2026, 3, 9, 0, 0),
                at(2026, 3, 16, 0, 0),
                at(2026, 3, 23, 0, 0),
                at(2026, 3, 30, 0, 0),
            ]
        );
    }

    #[test]
    fn until_is_sent_as_utc() {
        assert_eq!(utc_until("FREQ=WEEKLY;UNTIL=20260330"), "FREQ=WEEKLY;UNTIL=20260330T235959Z");
        assert_eq!(utc_until("FREQ=DAILY;UNTIL=20260330T120000"), "FREQ=DAILY;UNTIL=20260330T120000Z");
        assert_eq!(utc_until("FREQ=DAILY;UNTIL=20260330T120000Z"), "FREQ=DAILY;UNTIL=20260330T120000Z");
        assert_eq!(utc_until("FREQ=DAILY;COUNT=3"), "FREQ=DAILY;COUNT=3");
    }
}
