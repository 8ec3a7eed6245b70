//! Persistence port for the link log, source registry, event store and taste
//! profile, plus the per-link change set committed atomically.

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::domain::identity::{normalize_text, normalize_url};
use crate::domain::{DiscoveredLink, LinkStatus, SourceDefinition, StoredEvent, TasteEntry, TasteKind};
use crate::error::Result;

/// Everything one link's processing writes. Applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Inserted only if neither the name nor the URL is taken.
    pub sources: Vec<SourceDefinition>,
    /// Full rows, keyed by `dedup_key`; replace any existing row.
    pub events: Vec<StoredEvent>,
    /// Inserted if absent; a manual entry also replaces an automated one.
    pub taste: Vec<TasteEntry>,
    /// Replaces the link record with the same URL.
    pub link: Option<DiscoveredLink>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.events.is_empty() && self.taste.is_empty() && self.link.is_none()
    }

    pub fn staged_source_by_name(&self, name: &str) -> Option<&SourceDefinition> {
        let key = name_key(name);
        self.sources.iter().find(|s| name_key(&s.name) == key)
    }

    pub fn staged_source_by_url(&self, url: &str) -> Option<&SourceDefinition> {
        let key = url_key(url);
        self.sources.iter().find(|s| url_key(&s.url) == key)
    }

    pub fn staged_event(&self, dedup_key: &str) -> Option<&StoredEvent> {
        self.events.iter().find(|e| e.event.dedup_key == dedup_key)
    }

    /// Stage an event row, replacing an earlier staged row with the same key.
    pub fn put_event(&mut self, row: StoredEvent) {
        match self
            .events
            .iter_mut()
            .find(|e| e.event.dedup_key == row.event.dedup_key)
        {
            Some(existing) => *existing = row,
            None => self.events.push(row),
        }
    }

    pub fn staged_taste(&self, kind: TasteKind, key: &str) -> Option<&TasteEntry> {
        let key = taste_key(key);
        self.taste
            .iter()
            .find(|t| t.kind == kind && taste_key(&t.key) == key)
    }
}

/// Row counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub links: usize,
    pub sources: usize,
    pub events: usize,
    pub taste: usize,
}

pub trait DiscoveryStore: Send + Sync {
    /// Append a pending link unless its URL is already logged; returns the stored record.
    fn add_link(&self, link: DiscoveredLink) -> Result<DiscoveredLink>;
    /// All links in the order they were added.
    fn links(&self) -> Result<Vec<DiscoveredLink>>;
    fn link(&self, url: &str) -> Result<Option<DiscoveredLink>>;

    fn sources(&self) -> Result<Vec<SourceDefinition>>;
    /// Case-insensitive.
    fn source_by_name(&self, name: &str) -> Result<Option<SourceDefinition>>;
    /// Compared after URL normalization.
    fn source_by_url(&self, url: &str) -> Result<Option<SourceDefinition>>;

    fn events(&self) -> Result<Vec<StoredEvent>>;
    fn event(&self, dedup_key: &str) -> Result<Option<StoredEvent>>;

    fn taste_entries(&self) -> Result<Vec<TasteEntry>>;
    /// Case-insensitive on `key`.
    fn taste_entry(&self, kind: TasteKind, key: &str) -> Result<Option<TasteEntry>>;

    fn apply(&self, changes: &ChangeSet) -> Result<()>;

    fn links_with_status(&self, status: LinkStatus) -> Result<Vec<DiscoveredLink>> {
        Ok(self.links()?.into_iter().filter(|l| l.status == status).collect())
    }

    fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            links: self.links()?.len(),
            sources: self.sources()?.len(),
            events: self.events()?.len(),
            taste: self.taste_entries()?.len(),
        })
    }
}

pub(crate) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

pub(crate) fn url_key(url: &str) -> String {
    normalize_url(url).unwrap_or_else(|_| url.trim().to_lowercase())
}

pub(crate) fn taste_key(key: &str) -> String {
    normalize_text(key)
}

/// Insert configured curated sources and manual taste overrides that the store lacks.
pub fn seed_from_config(store: &dyn DiscoveryStore, config: &Config) -> Result<()> {
    let mut changes = ChangeSet::default();
    for source in &config.curated_sources {
        if store.source_by_name(&source.name)?.is_none() && store.source_by_url(&source.url)?.is_none() {
            changes.sources.push(source.clone());
        }
    }
    for entry in config.taste_overrides.iter().map(TasteEntry::from) {
        let existing = store.taste_entry(entry.kind, &entry.key)?;
        if existing.map_or(true, |e| !e.manual) {
            changes.taste.push(entry);
        }
    }
    if !changes.is_empty() {
        info!(
            sources = changes.sources.len(),
            taste = changes.taste.len(),
            "Seeding store from configuration"
        );
        store.apply(&changes)?;
    }
    Ok(())
}
