// Catalog: source registration, event merging, venue lookup and taste signals

pub mod merge;
pub mod registrar;
pub mod taste;
pub mod venues;

pub use merge::EventMerger;
pub use registrar::{CandidateSource, EventOutcome, Registrar, SourceOutcome};
pub use taste::{TasteMutation, TasteUpdater};
pub use venues::VenueDirectory;
