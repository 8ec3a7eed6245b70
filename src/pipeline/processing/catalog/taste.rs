use tracing::debug;

use crate::config::TasteConfig;
use crate::constants::DEFAULT_VENUE_NAME;
use crate::domain::{NormalizedEvent, TasteEntry, TasteKind};
use crate::error::Result;
use crate::observability::metrics::DiscoveryMetrics;
use crate::pipeline::storage::{ChangeSet, DiscoveryStore};

#[derive(Debug, Clone, PartialEq)]
pub enum TasteMutation {
    Created(TasteEntry),
    /// A human-set entry exists; left untouched.
    SkippedManual { kind: TasteKind, key: String },
}

/// Derives implicit venue and artist preferences from processed events.
/// Only ever creates missing entries, flagged `manual = false`.
pub struct TasteUpdater<'a> {
    store: &'a dyn DiscoveryStore,
    config: &'a TasteConfig,
}

impl<'a> TasteUpdater<'a> {
    pub fn new(store: &'a dyn DiscoveryStore, config: &'a TasteConfig) -> Self {
        Self { store, config }
    }

    /// Stage the entries `event` implies into `changes` and report what happened.
    pub fn update_signals(
        &self,
        event: &NormalizedEvent,
        link_context: &str,
        changes: &mut ChangeSet,
    ) -> Result<Vec<TasteMutation>> {
        let mut mutations = Vec::new();

        let venue = event.venue_name.trim();
        if !venue.is_empty() && venue != DEFAULT_VENUE_NAME {
            self.consider(TasteKind::Venue, venue, self.config.default_venue_boost, changes, &mut mutations)?;
        }
        for performer in event.performers.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
            self.consider(
                TasteKind::Artist,
                performer,
                self.config.default_artist_affinity,
                changes,
                &mut mutations,
            )?;
        }

        if !mutations.is_empty() {
            debug!(link = link_context, count = mutations.len(), "taste signals derived");
        }
        Ok(mutations)
    }

    fn consider(
        &self,
        kind: TasteKind,
        key: &str,
        weight: f64,
        changes: &mut ChangeSet,
        mutations: &mut Vec<TasteMutation>,
    ) -> Result<()> {
        if changes.staged_taste(kind, key).is_some() {
            return Ok(());
        }
        match self.store.taste_entry(kind, key)? {
            Some(existing) if existing.manual => {
                DiscoveryMetrics::record_taste("skipped_manual");
                mutations.push(TasteMutation::SkippedManual {
                    kind,
                    key: existing.key,
                });
            }
            Some(_) => {}
            None => {
                let entry = TasteEntry {
                    kind,
                    key: key.to_string(),
                    weight,
                    manual: false,
                };
                DiscoveryMetrics::record_taste("created");
                changes.taste.push(entry.clone());
                mutations.push(TasteMutation::Created(entry));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Confidence;
    use crate::pipeline::storage::InMemoryStore;

    fn event(venue: &str, performers: &[&str]) -> NormalizedEvent {
        let mut e = NormalizedEvent::new("Show", None, venue, Confidence::High);
        e.performers = performers.iter().map(|p| p.to_string()).collect();
        e
    }

    #[test]
    fn creates_missing_entries_with_defaults() {
        let store = InMemoryStore::new();
        let config = TasteConfig::default();
        let updater = TasteUpdater::new(&store, &config);
        let mut changes = ChangeSet::default();

        let mutations = updater
            .update_signals(&event("Blue Room", &["Ann", "Bo", "ann"]), "link", &mut changes)
            .unwrap();
        assert_eq!(mutations.len(), 3);
        assert_eq!(changes.taste.len(), 3);
        let venue = changes.taste.iter().find(|t| t.kind == TasteKind::Venue).unwrap();
        assert_eq!(venue.weight, 5.0);
        assert!(!venue.manual);
        let artist = changes.taste.iter().find(|t| t.kind == TasteKind::Artist).unwrap();
        assert_eq!(artist.weight, 0.6);
    }

    #[test]
    fn placeholder_venue_is_ignored() {
        let store = InMemoryStore::new();
        let config = TasteConfig::default();
        let mut changes = ChangeSet::default();
        TasteUpdater::new(&store, &config)
            .update_signals(&event(DEFAULT_VENUE_NAME, &[]), "link", &mut changes)
            .unwrap();
        assert!(changes.taste.is_empty());
    }

    #[test]
    fn manual_entries_are_never_touched() {
        let store = InMemoryStore::new();
        let manual = TasteEntry {
            kind: TasteKind::Artist,
            key: "Ann".into(),
            weight: 0.95,
            manual: true,
        };
        store
            .apply(&ChangeSet {
                taste: vec![manual.clone()],
                ..ChangeSet::default()
            })
            .unwrap();
        let config = TasteConfig::default();
        let updater = TasteUpdater::new(&store, &config);

        for _ in 0..5 {
            let mut changes = ChangeSet::default();
            let mutations = updater
                .update_signals(&event("Blue Room", &["ANN"]), "link", &mut changes)
                .unwrap();
            assert!(mutations.contains(&TasteMutation::SkippedManual {
                kind: TasteKind::Artist,
                key: "Ann".into()
            }));
            assert!(changes.taste.iter().all(|t| t.kind != TasteKind::Artist));
            store.apply(&changes).unwrap();
        }
        assert_eq!(store.taste_entry(TasteKind::Artist, "ann").unwrap(), Some(manual));
    }

    #[test]
    fn existing_automated_entries_are_left_alone() {
        let store = InMemoryStore::new();
        let config = TasteConfig::default();
        let updater = TasteUpdater::new(&store, &config);
        let mut first = ChangeSet::default();
        updater.update_signals(&event("Blue Room", &[]), "a", &mut first).unwrap();
        store.apply(&first).unwrap();

        let mut second = ChangeSet::default();
        let mutations = updater.update_signals(&event("blue room", &[]), "b", &mut second).unwrap();
        assert!(mutations.is_empty());
        assert!(second.taste.is_empty());
    }
}
