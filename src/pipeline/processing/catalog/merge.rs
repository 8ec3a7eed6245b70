use crate::domain::{NormalizedEvent, StoredEvent};

/// Merge rules for events that share a dedup key.
pub struct EventMerger;

impl EventMerger {
    /// Fold `incoming` into `existing`: provenance is unioned, empty fields are
    /// filled, populated fields are kept, and confidence only ever goes up.
    pub fn merge(existing: &StoredEvent, incoming: &NormalizedEvent, source_id: &str) -> StoredEvent {
        let mut merged = existing.clone();
        merged.provenance.insert(source_id.to_string());

        let target = &mut merged.event;
        fill(&mut target.start_datetime, &incoming.start_datetime);
        fill(&mut target.end_datetime, &incoming.end_datetime);
        fill(&mut target.venue_ref, &incoming.venue_ref);
        fill(&mut target.price, &incoming.price);
        fill(&mut target.ticket_url, &incoming.ticket_url);
        fill(&mut target.description, &incoming.description);
        if target.performers.is_empty() {
            target.performers = incoming.performers.clone();
        }
        if target.category.is_empty() {
            target.category = incoming.category.clone();
        }
        if target.source_id.is_empty() {
            target.source_id = incoming.source_id.clone();
        }
        target.confidence = target.confidence.max(incoming.confidence);
        merged
    }

    /// Whether a merge changed anything; a re-run that changes nothing writes nothing.
    pub fn has_changes(before: &StoredEvent, after: &StoredEvent) -> bool {
        before != after
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}
