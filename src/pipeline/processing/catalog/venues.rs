use std::collections::HashMap;

use crate::config::VenueConfig;
use crate::domain::identity::normalize_text;
use crate::domain::NormalizedEvent;

/// Configured venues, looked up by case-folded name or alias.
#[derive(Debug, Clone, Default)]
pub struct VenueDirectory {
    by_name: HashMap<String, String>,
}

impl VenueDirectory {
    pub fn new(venues: &[VenueConfig]) -> Self {
        let mut by_name = HashMap::new();
        for venue in venues {
            for name in std::iter::once(&venue.name).chain(venue.aliases.iter()) {
                by_name.entry(normalize_text(name)).or_insert_with(|| venue.id.clone());
            }
        }
        Self { by_name }
    }

    pub fn resolve(&self, venue_name: &str) -> Option<&str> {
        self.by_name.get(&normalize_text(venue_name)).map(String::as_str)
    }

    /// Set `venue_ref` where it is missing and the venue is known.
    pub fn annotate(&self, events: &mut [NormalizedEvent]) {
        for event in events.iter_mut().filter(|e| e.venue_ref.is_none()) {
            event.venue_ref = self.resolve(&event.venue_name).map(str::to_string);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Confidence;

    #[test]
    fn resolves_names_and_aliases() {
        let dir = VenueDirectory::new(&[VenueConfig {
            id: "vanguard".into(),
            name: "Village Vanguard".into(),
            aliases: vec!["The  Village Vanguard".into()],
        }]);
        assert_eq!(dir.resolve("village vanguard"), Some("vanguard"));
        assert_eq!(dir.resolve("THE VILLAGE VANGUARD"), Some("vanguard"));
        assert_eq!(dir.resolve("Smalls"), None);

        let mut events = vec![NormalizedEvent::new("Trio", None, "Village Vanguard", Confidence::High)];
        dir.annotate(&mut events);
        assert_eq!(events[0].venue_ref.as_deref(), Some("vanguard"));
    }
}
