//! Discovery metrics, recorded through the `metrics` facade.
//!
//! The library only records; a recorder is installed by the binary (see [`init`]).

use std::fmt;
use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

use crate::domain::{FetchMode, LinkStatus, StrategyKind};

/// All metric names used by the discovery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    FetchTotal,
    FetchDuration,
    LinksTotal,
    StrategyHits,
    SourcesTotal,
    EventsTotal,
    TasteEntriesTotal,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::FetchTotal => "discovery_fetch_total",
            MetricName::FetchDuration => "discovery_fetch_duration_seconds",
            MetricName::LinksTotal => "discovery_links_total",
            MetricName::StrategyHits => "discovery_strategy_hits_total",
            MetricName::SourcesTotal => "discovery_sources_total",
            MetricName::EventsTotal => "discovery_events_total",
            MetricName::TasteEntriesTotal => "discovery_taste_entries_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct DiscoveryMetrics;

impl DiscoveryMetrics {
    pub fn record_fetch(mode: FetchMode, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "error" };
        metrics::counter!(MetricName::FetchTotal.as_str(), "mode" => mode.as_str(), "outcome" => outcome)
            .increment(1);
        metrics::histogram!(MetricName::FetchDuration.as_str(), "mode" => mode.as_str()).record(duration_secs);
    }

    pub fn record_link(status: LinkStatus) {
        metrics::counter!(MetricName::LinksTotal.as_str(), "status" => status.as_str()).increment(1);
    }

    pub fn record_strategy_hit(strategy: StrategyKind, events: usize) {
        metrics::counter!(MetricName::StrategyHits.as_str(), "strategy" => strategy.as_str())
            .increment(events as u64);
    }

    /// `outcome` is one of `created`, `already_exists`, `conflict`.
    pub fn record_source(outcome: &'static str) {
        metrics::counter!(MetricName::SourcesTotal.as_str(), "outcome" => outcome).increment(1);
    }

    /// `outcome` is one of `inserted`, `merged`.
    pub fn record_event(outcome: &'static str) {
        metrics::counter!(MetricName::EventsTotal.as_str(), "outcome" => outcome).increment(1);
    }

    /// `outcome` is one of `created`, `skipped_manual`.
    pub fn record_taste(outcome: &'static str) {
        metrics::counter!(MetricName::TasteEntriesTotal.as_str(), "outcome" => outcome).increment(1);
    }
}

/// Install a Prometheus recorder with an HTTP listener on `addr`.
pub fn init(addr: &str) {
    let sock_addr: SocketAddr = match addr.parse() {
        Ok(a) => a,
        Err(e) => {
            warn!("Invalid metrics address '{}': {}", addr, e);
            return;
        }
    };
    match PrometheusBuilder::new().with_http_listener(sock_addr).install() {
        Ok(()) => info!("Prometheus exporter listening at http://{}/metrics", sock_addr),
        Err(e) => warn!("Failed to install Prometheus recorder: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_prefixed() {
        for name in [
            MetricName::FetchTotal,
            MetricName::FetchDuration,
            MetricName::LinksTotal,
            MetricName::StrategyHits,
            MetricName::SourcesTotal,
            MetricName::EventsTotal,
            MetricName::TasteEntriesTotal,
        ] {
            assert!(name.to_string().starts_with("discovery_"));
        }
    }

    #[test]
    fn recording_without_recorder_is_a_noop() {
        DiscoveryMetrics::record_fetch(FetchMode::Plain, true, 0.1);
        DiscoveryMetrics::record_link(LinkStatus::Processed);
        DiscoveryMetrics::record_source("created");
    }
}
