use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::{name_key, taste_key, url_key, ChangeSet, DiscoveryStore};
use crate::domain::{DiscoveredLink, SourceDefinition, StoredEvent, TasteEntry, TasteKind};
use crate::error::{DiscoveryError, Result};

#[derive(Debug, Default)]
struct State {
    links: Vec<DiscoveredLink>,
    sources: Vec<SourceDefinition>,
    events: HashMap<String, StoredEvent>,
    taste: HashMap<(TasteKind, String), TasteEntry>,
}

/// In-memory store for tests and dry runs. One lock guards everything, so
/// `apply` is trivially atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| DiscoveryError::Storage("in-memory store lock poisoned".to_string()))
    }
}

impl DiscoveryStore for InMemoryStore {
    fn add_link(&self, link: DiscoveredLink) -> Result<DiscoveredLink> {
        let mut state = self.state()?;
        if let Some(existing) = state.links.iter().find(|l| l.url == link.url) {
            return Ok(existing.clone());
        }
        state.links.push(link.clone());
        Ok(link)
    }

    fn links(&self) -> Result<Vec<DiscoveredLink>> {
        Ok(self.state()?.links.clone())
    }

    fn link(&self, url: &str) -> Result<Option<DiscoveredLink>> {
        Ok(self.state()?.links.iter().find(|l| l.url == url).cloned())
    }

    fn sources(&self) -> Result<Vec<SourceDefinition>> {
        Ok(self.state()?.sources.clone())
    }

    fn source_by_name(&self, name: &str) -> Result<Option<SourceDefinition>> {
        let key = name_key(name);
        Ok(self.state()?.sources.iter().find(|s| name_key(&s.name) == key).cloned())
    }

    fn source_by_url(&self, url: &str) -> Result<Option<SourceDefinition>> {
        let key = url_key(url);
        Ok(self.state()?.sources.iter().find(|s| url_key(&s.url) == key).cloned())
    }

    fn events(&self) -> Result<Vec<StoredEvent>> {
        let mut events: Vec<StoredEvent> = self.state()?.events.values().cloned().collect();
        events.sort_by(|a, b| {
            (a.event.start_datetime, &a.event.dedup_key).cmp(&(b.event.start_datetime, &b.event.dedup_key))
        });
        Ok(events)
    }

    fn event(&self, dedup_key: &str) -> Result<Option<StoredEvent>> {
        Ok(self.state()?.events.get(dedup_key).cloned())
    }

    fn taste_entries(&self) -> Result<Vec<TasteEntry>> {
        let mut entries: Vec<TasteEntry> = self.state()?.taste.values().cloned().collect();
        entries.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));
        Ok(entries)
    }

    fn taste_entry(&self, kind: TasteKind, key: &str) -> Result<Option<TasteEntry>> {
        Ok(self.state()?.taste.get(&(kind, taste_key(key))).cloned())
    }

    fn apply(&self, changes: &ChangeSet) -> Result<()> {
        let mut state = self.state()?;
        for source in &changes.sources {
            let taken = state
                .sources
                .iter()
                .any(|s| name_key(&s.name) == name_key(&source.name) || url_key(&s.url) == url_key(&source.url));
            if !taken {
                state.sources.push(source.clone());
            }
        }
        for row in &changes.events {
            state.events.insert(row.event.dedup_key.clone(), row.clone());
        }
        for entry in &changes.taste {
            let key = (entry.kind, taste_key(&entry.key));
            let replace = match state.taste.get(&key) {
                None => true,
                Some(existing) => !existing.manual && entry.manual,
            };
            if replace {
                state.taste.insert(key, entry.clone());
            }
        }
        if let Some(ref link) = changes.link {
            match state.links.iter_mut().find(|l| l.url == link.url) {
                Some(existing) => *existing = link.clone(),
                None => state.links.push(link.clone()),
            }
        }
        debug!(
            sources = changes.sources.len(),
            events = changes.events.len(),
            taste = changes.taste.len(),
            "applied change set"
        );
        Ok(())
    }
}
