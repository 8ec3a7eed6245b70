//! Owned facts pulled out of a fetched page in one parse: JSON-LD blocks,
//! meta tags, links, `<time>` values and visible text.
//!
//! The DOM itself is dropped before returning, so a `PageFacts` can be held
//! across fetches in async code.

use std::collections::{BTreeMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::app::ports::FetchedPage;
use crate::domain::identity::bare_host;

static CHILD_EVENT_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(?:events?|shows?|performances?|concerts?|tickets?|calendar)/[^/?#]+/?$")
        .expect("valid regex")
});

static SEL_JSON_LD: Lazy<Selector> = Lazy::new(|| sel(r#"script[type="application/ld+json"]"#));
static SEL_META: Lazy<Selector> = Lazy::new(|| sel("meta[content]"));
static SEL_TITLE: Lazy<Selector> = Lazy::new(|| sel("title"));
static SEL_H1: Lazy<Selector> = Lazy::new(|| sel("h1"));
static SEL_TIME: Lazy<Selector> = Lazy::new(|| sel("time[datetime]"));
static SEL_ANCHOR: Lazy<Selector> = Lazy::new(|| sel("a[href]"));
static SEL_FEED_LINK: Lazy<Selector> = Lazy::new(|| sel(r#"link[type="text/calendar"][href]"#));

fn sel(s: &str) -> Selector {
    Selector::parse(s).expect("valid selector")
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageLink {
    pub url: String,
    pub text: String,
    pub rel: String,
    pub class: String,
}

#[derive(Debug, Clone)]
pub struct PageFacts {
    pub url: Url,
    pub body: String,
    pub is_calendar_feed: bool,
    pub json_ld: Vec<serde_json::Value>,
    /// `property`/`name` → `content`, keys lowercased; first occurrence wins.
    pub meta: BTreeMap<String, String>,
    pub title: Option<String>,
    pub heading: Option<String>,
    pub time_values: Vec<String>,
    pub links: Vec<PageLink>,
    pub feed_links: Vec<String>,
    pub text: String,
}

impl PageFacts {
    /// Parse a fetched page. `final_url` falls back to `requested` when the
    /// fetcher reports something unparseable.
    pub fn parse(requested: &Url, page: &FetchedPage) -> Self {
        let url = Url::parse(&page.final_url).unwrap_or_else(|_| requested.clone());
        let is_calendar_feed = page.content_type.to_ascii_lowercase().contains("text/calendar")
            || page.body.trim_start().starts_with("BEGIN:VCALENDAR");

        let mut facts = PageFacts {
            url,
            body: page.body.clone(),
            is_calendar_feed,
            json_ld: Vec::new(),
            meta: BTreeMap::new(),
            title: None,
            heading: None,
            time_values: Vec::new(),
            links: Vec::new(),
            feed_links: Vec::new(),
            text: String::new(),
        };
        if is_calendar_feed {
            return facts;
        }

        let doc = Html::parse_document(&page.body);
        facts.json_ld = json_ld_blocks(&doc);
        facts.meta = meta_tags(&doc);
        facts.title = first_text(&doc, &SEL_TITLE);
        facts.heading = first_text(&doc, &SEL_H1);
        facts.time_values = doc
            .select(&SEL_TIME)
            .filter_map(|el| el.value().attr("datetime"))
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        facts.links = anchors(&doc, &facts.url);
        facts.feed_links = feed_links(&doc, &facts.url, &facts.links);
        facts.text = visible_text(&doc);
        facts
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str).filter(|s| !s.trim().is_empty())
    }

    pub fn host(&self) -> Option<String> {
        bare_host(&self.url)
    }

    /// `og:site_name`, else the first domain label title-cased.
    pub fn site_name(&self) -> String {
        if let Some(name) = self.meta("og:site_name") {
            return name.trim().to_string();
        }
        let host = self.host().unwrap_or_default();
        let label = host.split('.').next().unwrap_or_default();
        title_case(&label.replace(['-', '_'], " "))
    }

    /// Same-site links that look like individual event pages under this listing.
    pub fn child_event_links(&self) -> Vec<String> {
        let host = self.host();
        let base_path = self.url.path().trim_end_matches('/').to_string();
        let own = strip_fragment(&self.url);

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for link in &self.links {
            let Ok(target) = Url::parse(&link.url) else {
                continue;
            };
            if bare_host(&target) != host {
                continue;
            }
            let path = target.path();
            let under_listing = !base_path.is_empty()
                && path.len() > base_path.len() + 1
                && path.starts_with(&format!("{}/", base_path));
            if !under_listing && !CHILD_EVENT_PATH.is_match(path) {
                continue;
            }
            let clean = strip_fragment(&target);
            if clean == own || clean.contains("page=") {
                continue;
            }
            if seen.insert(clean.clone()) {
                out.push(clean);
            }
        }
        out
    }
}

fn strip_fragment(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    u.to_string().trim_end_matches('/').to_string()
}

pub fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn element_text(el: &ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .map(|el| element_text(&el))
        .find(|t| !t.is_empty())
}

fn json_ld_blocks(doc: &Html) -> Vec<serde_json::Value> {
    doc.select(&SEL_JSON_LD)
        .filter_map(|el| {
            let raw = el.text().collect::<String>();
            let raw = raw.trim().trim_start_matches("<!--").trim_end_matches("-->").trim();
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(v) => Some(v),
                Err(e) => {
                    debug!(error = %e, "skipping malformed JSON-LD block");
                    None
                }
            }
        })
        .collect()
}

fn meta_tags(doc: &Html) -> BTreeMap<String, String> {
    let mut meta = BTreeMap::new();
    for el in doc.select(&SEL_META) {
        let attrs = el.value();
        let Some(key) = attrs.attr("property").or_else(|| attrs.attr("name")) else {
            continue;
        };
        let content = attrs.attr("content").unwrap_or_default().trim().to_string();
        meta.entry(key.trim().to_ascii_lowercase()).or_insert(content);
    }
    meta
}

fn anchors(doc: &Html, base: &Url) -> Vec<PageLink> {
    doc.select(&SEL_ANCHOR)
        .filter_map(|el| {
            let href = el.value().attr("href")?.trim();
            let resolved = resolve_href(base, href)?;
            Some(PageLink {
                url: resolved,
                text: element_text(&el),
                rel: el.value().attr("rel").unwrap_or_default().to_ascii_lowercase(),
                class: el.value().attr("class").unwrap_or_default().to_ascii_lowercase(),
            })
        })
        .collect()
}

/// Absolute http(s) URL for an href; `webcal://` is rewritten to `https://`.
pub fn resolve_href(base: &Url, href: &str) -> Option<String> {
    if href.is_empty() || href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("tel:") {
        return None;
    }
    let href = match href.strip_prefix("webcal://") {
        Some(rest) => format!("https://{}", rest),
        None => href.to_string(),
    };
    let url = base.join(&href).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn feed_links(doc: &Html, base: &Url, links: &[PageLink]) -> Vec<String> {
    let mut out: Vec<String> = doc
        .select(&SEL_FEED_LINK)
        .filter_map(|el| resolve_href(base, el.value().attr("href")?))
        .collect();
    for link in links {
        let lower = link.url.to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or_default();
        if path.ends_with(".ics") || lower.contains("ical=") || lower.contains("/ical") {
            out.push(link.url.clone());
        }
    }
    let mut seen = HashSet::new();
    out.retain(|u| seen.insert(u.clone()));
    out
}

fn visible_text(doc: &Html) -> String {
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .map(|e| matches!(e.name(), "script" | "style" | "noscript" | "head" | "template"))
                .unwrap_or(false)
        });
        let t = collapse_whitespace(text);
        if !hidden && !t.is_empty() {
            out.push_str(&t);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FetchMode;

    fn facts(url: &str, body: &str) -> PageFacts {
        let page = FetchedPage {
            status: 200,
            final_url: url.to_string(),
            body: body.to_string(),
            content_type: "text/html".to_string(),
            mode: FetchMode::Plain,
        };
        PageFacts::parse(&Url::parse(url).unwrap(), &page)
    }

    #[test]
    fn collects_meta_links_and_text() {
        let html = r#"<html><head>
            <title> Jazz Night </title>
            <meta property="og:title" content="Jazz Night">
            <meta property="og:site_name" content="The Blue Room">
            <link rel="alternate" type="text/calendar" href="/events.ics">
            <script>var hidden = "not text";</script>
            </head><body>
            <h1>Jazz  Night</h1>
            <time datetime="2026-03-15T20:00">Mar 15</time>
            <a href="/events/jazz-night">details</a>
            <a href="webcal://blueroom.example/cal.ics">subscribe</a>
            <a href="mailto:x@y.z">mail</a>
            </body></html>"#;
        let f = facts("https://blueroom.example/", html);
        assert_eq!(f.title.as_deref(), Some("Jazz Night"));
        assert_eq!(f.heading.as_deref(), Some("Jazz Night"));
        assert_eq!(f.meta("og:title"), Some("Jazz Night"));
        assert_eq!(f.site_name(), "The Blue Room");
        assert_eq!(f.time_values, vec!["2026-03-15T20:00"]);
        assert_eq!(f.links.len(), 2);
        assert_eq!(
            f.feed_links,
            vec![
                "https://blueroom.example/events.ics".to_string(),
                "https://blueroom.example/cal.ics".to_string()
            ]
        );
        assert!(f.text.contains("details"));
        assert!(!f.text.contains("not text"));
    }

    #[test]
    fn site_name_falls_back_to_domain() {
        let f = facts("https://www.le-poisson-rouge.com/x", "<html></html>");
        assert_eq!(f.site_name(), "Le Poisson Rouge");
    }

    #[test]
    fn child_links_stay_on_site_and_under_listing() {
        let html = r#"<a href="/calendar/trio-night">a</a>
            <a href="/calendar/trio-night#tickets">dup</a>
            <a href="/shows/quartet">b</a>
            <a href="/about">no</a>
            <a href="/calendar?page=2">no</a>
            <a href="https://other.example/events/x">no</a>"#;
        let f = facts("https://venue.example/calendar", html);
        assert_eq!(
            f.child_event_links(),
            vec![
                "https://venue.example/calendar/trio-night".to_string(),
                "https://venue.example/shows/quartet".to_string()
            ]
        );
    }

    #[test]
    fn ics_body_skips_html_parsing() {
        let page = FetchedPage {
            status: 200,
            final_url: "https://venue.example/cal.ics".to_string(),
            body: "BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n".to_string(),
            content_type: "application/octet-stream".to_string(),
            mode: FetchMode::Plain,
        };
        let f = PageFacts::parse(&Url::parse(&page.final_url).unwrap(), &page);
        assert!(f.is_calendar_feed);
        assert!(f.links.is_empty());
    }

    #[test]
    fn malformed_markup_does_not_panic() {
        let f = facts(
            "https://venue.example/",
            r#"<div><script type="application/ld+json">{ not json </script><a href="::">x"#,
        );
        assert!(f.json_ld.is_empty());
    }
}
