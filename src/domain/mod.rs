//! Shared data shapes: links, normalized events, source definitions and taste entries.

pub mod identity;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::DiscoveryError;

/// Implements `as_str`/`Display`/`FromStr` for a unit-only enum from its snake_case names.
macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = DiscoveryError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(DiscoveryError::Parse(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Pending,
    Processed,
    Unclear,
    Failed,
}

string_enum!(LinkStatus {
    Pending => "pending",
    Processed => "processed",
    Unclear => "unclear",
    Failed => "failed",
});

/// What kind of page a fetched URL turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    SingleEvent,
    Calendar,
    Feed,
    ArtistPage,
    Unclear,
}

string_enum!(PageKind {
    SingleEvent => "single_event",
    Calendar => "calendar",
    Feed => "feed",
    ArtistPage => "artist_page",
    Unclear => "unclear",
});

/// A URL submitted by a user as a candidate seed. Identity is the normalized URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredLink {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub added: DateTime<Utc>,
    pub status: LinkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classified_as: Option<PageKind>,
    #[serde(default)]
    pub events_found: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_registered: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
}

impl DiscoveredLink {
    pub fn pending(url: String, note: Option<String>, added: DateTime<Utc>) -> Self {
        Self {
            url,
            note,
            added,
            status: LinkStatus::Pending,
            status_note: None,
            classified_as: None,
            events_found: 0,
            source_registered: None,
            calendar_url: None,
            processed_at: None,
        }
    }
}

/// Coarse reliability tag reflecting which strategy produced a record.
/// Ordered so that `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

string_enum!(Confidence {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl Confidence {
    /// One level lower, saturating at `Low`.
    pub fn downgrade(self) -> Self {
        match self {
            Confidence::High => Confidence::Medium,
            Confidence::Medium | Confidence::Low => Confidence::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Price {
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
    },
    Text { text: String },
}

/// Canonical event record consumed by the scoring engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub title: String,
    pub start_datetime: Option<NaiveDateTime>,
    pub end_datetime: Option<NaiveDateTime>,
    pub venue_name: String,
    pub venue_ref: Option<String>,
    pub performers: Vec<String>,
    pub price: Option<Price>,
    pub ticket_url: Option<String>,
    pub category: String,
    pub description: Option<String>,
    pub source_id: String,
    pub dedup_key: String,
    pub confidence: Confidence,
}

impl NormalizedEvent {
    /// A bare event with only the identity fields set; the dedup key is derived here.
    pub fn new(
        title: impl Into<String>,
        start_datetime: Option<NaiveDateTime>,
        venue_name: impl Into<String>,
        confidence: Confidence,
    ) -> Self {
        let mut event = Self {
            title: title.into(),
            start_datetime,
            end_datetime: None,
            venue_name: venue_name.into(),
            venue_ref: None,
            performers: Vec::new(),
            price: None,
            ticket_url: None,
            category: String::new(),
            description: None,
            source_id: String::new(),
            dedup_key: String::new(),
            confidence,
        };
        event.refresh_dedup_key();
        event
    }

    /// Recompute `dedup_key` after any identity field changed.
    pub fn refresh_dedup_key(&mut self) {
        self.dedup_key = identity::dedup_key(&self.title, self.start_datetime, &self.venue_name);
    }
}

/// An event as held by the event store: the record plus every source that reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event: NormalizedEvent,
    pub provenance: BTreeSet<String>,
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Curated,
    Discovered,
}

string_enum!(Origin {
    Curated => "curated",
    Discovered => "discovered",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Plain,
    Rendered,
}

string_enum!(FetchMode {
    Plain => "plain",
    Rendered => "rendered",
});

/// Closed set of extraction strategies, selected by name in an `ExtractionConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    StructuredMarkup,
    CalendarFeed,
    PageMetadata,
    Selectors,
    Heuristic,
    FollowLinks,
}

string_enum!(StrategyKind {
    StructuredMarkup => "structured_markup",
    CalendarFeed => "calendar_feed",
    PageMetadata => "page_metadata",
    Selectors => "selectors",
    Heuristic => "heuristic",
    FollowLinks => "follow_links",
});

/// Attached to a source so the generic extractor can be reused without per-source code.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Pins one strategy; `None` runs the full cascade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selectors: Option<BTreeMap<String, String>>,
    /// Strategy applied to each child page when `strategy = follow_links`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_strategy: Option<StrategyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_venue: Option<String>,
}

impl ExtractionConfig {
    pub fn pinned(strategy: StrategyKind) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::default()
        }
    }
}

fn default_cadence() -> String {
    "daily".to_string()
}

fn default_true() -> bool {
    true
}

fn default_origin() -> Origin {
    Origin::Curated
}

/// A recurring origin polled by the ingestion-cadence runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub method: FetchMode,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default = "default_cadence")]
    pub cadence: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_origin")]
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered_from: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TasteKind {
    Venue,
    Artist,
}

string_enum!(TasteKind {
    Venue => "venue",
    Artist => "artist",
});

/// Implicit-preference weight (venue boost or artist affinity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasteEntry {
    pub kind: TasteKind,
    pub key: String,
    pub weight: f64,
    /// Human-set; automated updates never touch it.
    #[serde(default)]
    pub manual: bool,
}

/// Counts surfaced to whatever invoked a discovery run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub links_processed: usize,
    pub sources_registered: usize,
    pub events_found: usize,
    pub links_unclear: usize,
    pub links_failed: usize,
}
