//! Keyword tables and defaults shared by the classifier, the extractors and the resolver.

/// schema.org types treated as events.
pub const EVENT_TYPES: &[&str] = &[
    "Event",
    "MusicEvent",
    "TheaterEvent",
    "DanceEvent",
    "ExhibitionEvent",
    "SocialEvent",
    "ComedyEvent",
    "Festival",
    "ScreeningEvent",
    "LiteraryEvent",
];

/// Category inferred from a schema.org event subtype.
pub fn category_for_event_type(event_type: &str) -> &'static str {
    match event_type {
        "MusicEvent" | "DanceEvent" | "Festival" => "concert",
        "TheaterEvent" | "ComedyEvent" => "theatre",
        "ExhibitionEvent" => "exhibition",
        "ScreeningEvent" => "film",
        "LiteraryEvent" => "talk",
        _ => "",
    }
}

/// URL path segments that mark a listing page.
pub const CALENDAR_PATH_SEGMENTS: &[&str] = &[
    "calendar", "events", "shows", "tickets", "schedule", "lineup", "concerts",
];

/// Link text/href keywords that point from an event page to its organizer's listing.
pub const CALENDAR_LINK_KEYWORDS: &[&str] = &[
    "calendar", "events", "schedule", "shows", "lineup", "upcoming",
];

/// Link text/href/rel keywords naming the venue or organizer of an event.
pub const ORGANIZER_LINK_KEYWORDS: &[&str] = &["venue", "organizer", "organiser", "presented by"];

/// Tour-date aggregators: `(host suffix, path prefix)` of an artist's listing.
pub const ARTIST_AGGREGATORS: &[(&str, &str)] = &[
    ("bandsintown.com", "/a/"),
    ("songkick.com", "/artists/"),
    ("seated.com", "/"),
    ("setlist.fm", "/setlists/"),
    ("residentadvisor.net", "/dj/"),
    ("ra.co", "/dj/"),
    ("dice.fm", "/artist/"),
];

/// Ticketing platforms whose site root is not any single venue's calendar.
pub const TICKETING_PLATFORMS: &[&str] = &[
    "eventbrite.com",
    "ticketmaster.com",
    "ticketweb.com",
    "axs.com",
    "dice.fm",
    "seetickets.us",
    "etix.com",
    "tixr.com",
    "bandsintown.com",
    "songkick.com",
    "facebook.com",
];

/// Hosting platforms with a fixed calendar path: `(host suffix, calendar path)`.
pub const HOSTED_CALENDAR_SUFFIXES: &[(&str, &str)] = &[
    ("squarespace.com", "/events"),
    ("wixsite.com", "/events"),
    ("venuepilot.co", "/events"),
    ("prekindle.com", "/events"),
];

pub const DEFAULT_VENUE_NAME: &str = "Unknown Venue";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Bounds on RRULE expansion for a single feed entry.
pub const MAX_RECURRENCES: u16 = 52;
pub const RECURRENCE_HORIZON_DAYS: i64 = 366;
