// Discovery pipeline: ingestion, processing, storage and the per-link orchestrator

pub mod ingestion;
pub mod orchestrator;
pub mod processing;
pub mod storage;

pub use orchestrator::{DiscoveryOrchestrator, LinkReport};
