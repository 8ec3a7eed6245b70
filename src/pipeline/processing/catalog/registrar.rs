use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::merge::EventMerger;
use crate::domain::identity::{normalize_url, source_name_from_url};
use crate::domain::{
    DiscoveredLink, ExtractionConfig, FetchMode, NormalizedEvent, Origin, SourceDefinition, StoredEvent,
};
use crate::error::Result;
use crate::observability::metrics::DiscoveryMetrics;
use crate::pipeline::processing::probe::ProbeResult;
use crate::pipeline::storage::{url_key, ChangeSet, DiscoveryStore};

/// Suffixes tried before a discovered name is considered unavailable.
const MAX_NAME_SUFFIX: usize = 20;

/// A calendar worth registering, as found by probing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSource {
    pub name: String,
    pub url: String,
    pub category: String,
    pub method: FetchMode,
    pub extraction: ExtractionConfig,
    pub discovered_from: Option<String>,
}

impl CandidateSource {
    /// Describe a probed listing as a source: how it was fetched and which
    /// strategy worked, so later runs skip the cascade.
    pub fn from_probe(probe: &ProbeResult, discovered_from: Option<String>) -> Self {
        let url = normalize_url(&probe.url).unwrap_or_else(|_| probe.url.clone());
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for event in probe.events().iter().filter(|e| !e.category.is_empty()) {
            *counts.entry(event.category.as_str()).or_default() += 1;
        }
        let category = counts
            .into_iter()
            .max_by_key(|(_, n)| *n)
            .map(|(c, _)| c.to_string())
            .unwrap_or_default();

        Self {
            name: source_name_from_url(&url),
            category,
            method: probe.mode,
            extraction: ExtractionConfig {
                strategy: probe.extraction.strategy,
                sub_strategy: probe.sub_strategy,
                feed_url: probe.feed_url.clone(),
                default_venue: Some(probe.classification.evidence.site_name.clone())
                    .filter(|s| !s.is_empty()),
                ..ExtractionConfig::default()
            },
            url,
            discovered_from,
        }
    }

    fn to_definition(&self, name: &str) -> SourceDefinition {
        SourceDefinition {
            name: name.to_string(),
            url: self.url.clone(),
            category: self.category.clone(),
            method: self.method,
            extraction: self.extraction.clone(),
            cadence: "daily".to_string(),
            enabled: true,
            origin: Origin::Discovered,
            discovered_from: self.discovered_from.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SourceOutcome {
    Created { name: String },
    AlreadyExists { name: String },
    /// A curated definition owns the URL or name; the candidate was discarded.
    Conflict { existing: String },
}

impl SourceOutcome {
    /// The registry name events from this source are attributed to.
    pub fn source_name(&self) -> &str {
        match self {
            SourceOutcome::Created { name } | SourceOutcome::AlreadyExists { name } => name,
            SourceOutcome::Conflict { existing } => existing,
        }
    }

    pub fn counts_as_registered(&self) -> bool {
        !matches!(self, SourceOutcome::Conflict { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Inserted,
    Merged,
}

/// Stages one link's registry and event-store writes against a store
/// snapshot; nothing is written until [`Registrar::commit`].
pub struct Registrar<'a> {
    store: &'a dyn DiscoveryStore,
    changes: ChangeSet,
}

impl<'a> Registrar<'a> {
    pub fn new(store: &'a dyn DiscoveryStore) -> Self {
        Self {
            store,
            changes: ChangeSet::default(),
        }
    }

    fn source_with_url(&self, url: &str) -> Result<Option<SourceDefinition>> {
        match self.changes.staged_source_by_url(url) {
            Some(staged) => Ok(Some(staged.clone())),
            None => self.store.source_by_url(url),
        }
    }

    fn source_with_name(&self, name: &str) -> Result<Option<SourceDefinition>> {
        match self.changes.staged_source_by_name(name) {
            Some(staged) => Ok(Some(staged.clone())),
            None => self.store.source_by_name(name),
        }
    }

    pub fn register_source(&mut self, candidate: &CandidateSource) -> Result<SourceOutcome> {
        if let Some(existing) = self.source_with_url(&candidate.url)? {
            return Ok(self.found(existing, candidate));
        }

        let mut name = candidate.name.clone();
        for n in 2..=MAX_NAME_SUFFIX + 1 {
            match self.source_with_name(&name)? {
                None => break,
                Some(existing) if existing.origin == Origin::Curated => return Ok(self.found(existing, candidate)),
                Some(_) if n <= MAX_NAME_SUFFIX => name = format!("{}_{}", candidate.name, n),
                Some(existing) => return Ok(self.found(existing, candidate)),
            }
        }

        info!(name = %name, url = %candidate.url, strategy = ?candidate.extraction.strategy, "Registered new source");
        DiscoveryMetrics::record_source("created");
        self.changes.sources.push(candidate.to_definition(&name));
        Ok(SourceOutcome::Created { name })
    }

    fn found(&self, existing: SourceDefinition, candidate: &CandidateSource) -> SourceOutcome {
        if existing.origin == Origin::Discovered && url_key(&existing.url) == url_key(&candidate.url) {
            info!(name = %existing.name, url = %existing.url, "Source already registered");
            DiscoveryMetrics::record_source("already_exists");
            return SourceOutcome::AlreadyExists { name: existing.name };
        }
        warn!(
            existing = %existing.name,
            existing_origin = %existing.origin,
            candidate_url = %candidate.url,
            "Registration conflict; keeping the existing definition"
        );
        DiscoveryMetrics::record_source("conflict");
        SourceOutcome::Conflict { existing: existing.name }
    }

    /// Insert a new event row, or merge into the row with the same dedup key.
    pub fn upsert_event(&mut self, event: &NormalizedEvent, source_id: &str) -> Result<EventOutcome> {
        let key = &event.dedup_key;
        let existing = match self.changes.staged_event(key) {
            Some(staged) => Some(staged.clone()),
            None => self.store.event(key)?,
        };

        match existing {
            Some(existing) => {
                let merged = EventMerger::merge(&existing, event, source_id);
                if EventMerger::has_changes(&existing, &merged) {
                    self.changes.put_event(merged);
                }
                DiscoveryMetrics::record_event("merged");
                Ok(EventOutcome::Merged)
            }
            None => {
                let mut event = event.clone();
                event.source_id = source_id.to_string();
                self.changes.put_event(StoredEvent {
                    event,
                    provenance: BTreeSet::from([source_id.to_string()]),
                    first_seen: Utc::now(),
                });
                DiscoveryMetrics::record_event("inserted");
                Ok(EventOutcome::Inserted)
            }
        }
    }

    pub fn changes_mut(&mut self) -> &mut ChangeSet {
        &mut self.changes
    }

    pub fn set_link(&mut self, link: DiscoveredLink) {
        self.changes.link = Some(link);
    }

    /// Apply everything staged in one atomic write.
    pub fn commit(self) -> Result<ChangeSet> {
        self.store.apply(&self.changes)?;
        Ok(self.changes)
    }
}
