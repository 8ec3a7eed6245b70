//! Link discovery and adaptive event extraction for a personal gig digest.
//!
//! A user drops arbitrary URLs into a link log; each run fetches and
//! classifies them, extracts events through a cascade of strategies,
//! registers listing pages as recurring sources and records implicit taste
//! signals.

pub mod app;
pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod infra;
pub mod logging;
pub mod observability;
pub mod pipeline;

pub use config::Config;
pub use error::{DiscoveryError, Result};
pub use pipeline::{DiscoveryOrchestrator, LinkReport};
