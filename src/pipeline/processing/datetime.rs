//! Datetime parsing for scraped values: ISO-8601 / RFC 3339 forms and the
//! human phrases venues print ("Fri, March 15 at 8pm", "3/15/2026 8:00 PM").
//!
//! Offsets are dropped after parsing: every stored datetime is the venue's
//! local wall-clock time.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// A phrase without a year that falls this far before the reference date is
/// taken to mean next year.
const YEAR_ROLLOVER_DAYS: i64 = 60;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y %I:%M %p",
    "%A, %B %d, %Y %I:%M %p",
];

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M%z"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y", "%Y%m%d"];

static HUMAN_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b
        (?:(?:mon|tues?|wed(?:nes)?|thu(?:rs)?|fri|sat(?:ur)?|sun)(?:day)?\.?,?\s+)?
        (?P<month>jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?
            |aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)
        \.?\s+
        (?P<day>\d{1,2})(?:st|nd|rd|th)?\b
        (?:,?\s+(?P<year>\d{4})\b)?
        (?:\s*(?:,|\bat\b|@|-|\||/)?\s*
            (?P<time>\d{1,2}(?::\d{2})?\s*[ap]\.?m\.?|\d{1,2}:\d{2}))?
        ",
    )
    .expect("valid regex")
});

static NUMERIC_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?P<month>\d{1,2})/(?P<day>\d{1,2})/(?P<year>\d{4}|\d{2})\b
        (?:\s*(?:,|\bat\b|@|-)?\s*
            (?P<time>\d{1,2}(?::\d{2})?\s*[ap]\.?m\.?|\d{1,2}:\d{2}))?
        ",
    )
    .expect("valid regex")
});

static TIME_PHRASE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<hour>\d{1,2})(?::(?P<minute>\d{2}))?\s*(?P<ampm>[ap])?\.?(?:m\.?)?$")
        .expect("valid regex")
});

/// A datetime phrase located inside a larger text.
#[derive(Debug, Clone, PartialEq)]
pub struct DateMatch {
    pub start: usize,
    pub end: usize,
    pub value: NaiveDateTime,
}

/// Parse a single scraped datetime value. `reference` supplies the year for
/// phrases that omit it.
pub fn parse_datetime(raw: &str, reference: NaiveDate) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_local());
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }

    find_datetimes(s, reference).into_iter().next().map(|m| m.value)
}

/// Every human datetime phrase in `text`, in order of appearance.
pub fn find_datetimes(text: &str, reference: NaiveDate) -> Vec<DateMatch> {
    let mut found: Vec<DateMatch> = HUMAN_DATE
        .captures_iter(text)
        .chain(NUMERIC_DATE.captures_iter(text))
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let value = datetime_from_captures(&caps, reference)?;
            Some(DateMatch {
                start: whole.start(),
                end: whole.end(),
                value,
            })
        })
        .collect();
    found.sort_by_key(|m| m.start);
    found
}

/// "8pm", "8:30 PM", "20:00", "7 p.m."
pub fn parse_time_phrase(raw: &str) -> Option<NaiveTime> {
    let cleaned = raw
        .trim()
        .trim_start_matches(|c: char| c.is_alphabetic() || c == ':' || c.is_whitespace())
        .trim();
    let caps = TIME_PHRASE.captures(cleaned)?;
    let mut hour: u32 = caps.name("hour")?.as_str().parse().ok()?;
    let minute: u32 = caps
        .name("minute")
        .map(|m| m.as_str().parse().ok())
        .unwrap_or(Some(0))?;
    match caps.name("ampm").map(|m| m.as_str().to_ascii_lowercase()) {
        Some(ref p) if p == "p" && hour < 12 => hour += 12,
        Some(ref p) if p == "a" && hour == 12 => hour = 0,
        Some(_) => {}
        // bare "8" is not a time
        None if caps.name("minute").is_none() => return None,
        None => {}
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn datetime_from_captures(caps: &Captures<'_>, reference: NaiveDate) -> Option<NaiveDateTime> {
    let month_raw = caps.name("month")?.as_str();
    let month = month_raw
        .parse::<u32>()
        .ok()
        .or_else(|| month_from_name(month_raw))?;
    let day: u32 = caps.name("day")?.as_str().parse().ok()?;

    let date = match caps.name("year") {
        Some(y) => {
            let mut year: i32 = y.as_str().parse().ok()?;
            if year < 100 {
                year += 2000;
            }
            NaiveDate::from_ymd_opt(year, month, day)?
        }
        None => infer_year(month, day, reference)?,
    };

    let time = match caps.name("time") {
        Some(t) => parse_time_phrase(t.as_str())?,
        None => NaiveTime::MIN,
    };
    Some(date.and_time(time))
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.chars().take(3).collect::<String>().to_ascii_lowercase();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn infer_year(month: u32, day: u32, reference: NaiveDate) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(reference.year(), month, day);
    match this_year {
        Some(d) if d >= reference - Duration::days(YEAR_ROLLOVER_DAYS) => Some(d),
        _ => NaiveDate::from_ymd_opt(reference.year() + 1, month, day),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn iso_forms() {
        let r = reference();
        assert_eq!(parse_datetime("2026-03-15T20:00:00", r), Some(at(2026, 3, 15, 20, 0)));
        assert_eq!(parse_datetime("2026-03-15T20:00", r), Some(at(2026, 3, 15, 20, 0)));
        assert_eq!(
            parse_datetime("2026-03-15T20:00:00.000-05:00", r),
            Some(at(2026, 3, 15, 20, 0))
        );
        assert_eq!(parse_datetime("2026-03-15T20:00:00Z", r), Some(at(2026, 3, 15, 20, 0)));
        assert_eq!(parse_datetime("2026-03-15T20:00:00-0500", r), Some(at(2026, 3, 15, 20, 0)));
        assert_eq!(parse_datetime("2026-03-15", r), Some(at(2026, 3, 15, 0, 0)));
    }

    #[test]
    fn formatted_forms() {
        let r = reference();
        assert_eq!(parse_datetime("03/15/2026 08:00 PM", r), Some(at(2026, 3, 15, 20, 0)));
        assert_eq!(parse_datetime("March 15, 2026 8:00 PM", r), Some(at(2026, 3, 15, 20, 0)));
        assert_eq!(parse_datetime("Mar 15, 2026", r), Some(at(2026, 3, 15, 0, 0)));
    }

    #[test]
    fn human_phrases() {
        let r = reference();
        assert_eq!(parse_datetime("Friday, March 20 at 8pm", r), Some(at(2026, 3, 20, 20, 0)));
        assert_eq!(parse_datetime("Sat Mar 21 @ 7:30 PM", r), Some(at(2026, 3, 21, 19, 30)));
        assert_eq!(parse_datetime("April 3rd, 9 p.m.", r), Some(at(2026, 4, 3, 21, 0)));
        assert_eq!(parse_datetime("Dec 31 - 22:00", r), Some(at(2026, 12, 31, 22, 0)));
    }

    #[test]
    fn missing_year_rolls_forward_for_past_months() {
        let r = NaiveDate::from_ymd_opt(2026, 11, 20).unwrap();
        assert_eq!(parse_datetime("Jan 10 8pm", r), Some(at(2027, 1, 10, 20, 0)));
        assert_eq!(parse_datetime("Nov 1 8pm", r), Some(at(2026, 11, 1, 20, 0)));
    }

    #[test]
    fn garbage_is_none() {
        let r = reference();
        assert_eq!(parse_datetime("", r), None);
        assert_eq!(parse_datetime("TBA", r), None);
        assert_eq!(parse_datetime("doors at some point", r), None);
        assert_eq!(parse_datetime("February 30, 2026", r), None);
    }

    #[test]
    fn time_phrases() {
        assert_eq!(parse_time_phrase("8pm"), NaiveTime::from_hms_opt(20, 0, 0));
        assert_eq!(parse_time_phrase("Doors: 7:00 PM"), NaiveTime::from_hms_opt(19, 0, 0));
        assert_eq!(parse_time_phrase("12 am"), NaiveTime::from_hms_opt(0, 0, 0));
        assert_eq!(parse_time_phrase("20:15"), NaiveTime::from_hms_opt(20, 15, 0));
        assert_eq!(parse_time_phrase("8"), None);
    }

    #[test]
    fn finds_every_phrase_in_text() {
        let text = "Upcoming: March 14 at 8pm - Trio. Also 3/20/2026 9:00 PM quartet.";
        let found = find_datetimes(text, reference());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].value, at(2026, 3, 14, 20, 0));
        assert_eq!(found[1].value, at(2026, 3, 20, 21, 0));
        assert!(found[0].start < found[1].start);
    }
}
