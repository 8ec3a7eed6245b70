//! Drives pending links through fetch, classification, extraction, source
//! registration, event storage and taste updates.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::ingestion::rate_limiter::HostThrottle;
use super::processing::catalog::{
    CandidateSource, EventOutcome, Registrar, SourceOutcome, TasteMutation, TasteUpdater, VenueDirectory,
};
use super::processing::parent::resolve_parent;
use super::processing::probe::{passes_validation, PageProber, ProbePlan, ProbeResult};
use super::storage::{ChangeSet, DiscoveryStore};
use crate::app::ports::Fetcher;
use crate::config::Config;
use crate::domain::identity::normalize_url;
use crate::domain::{DiscoveredLink, LinkStatus, PageKind, RunSummary};
use crate::error::Result;
use crate::observability::metrics::DiscoveryMetrics;

/// What processing one link did.
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub link: DiscoveredLink,
    pub source_outcomes: Vec<SourceOutcome>,
    pub event_outcomes: Vec<EventOutcome>,
    #[serde(skip)]
    pub taste_mutations: Vec<TasteMutation>,
}

impl LinkReport {
    fn new(link: DiscoveredLink) -> Self {
        Self {
            link,
            source_outcomes: Vec::new(),
            event_outcomes: Vec::new(),
            taste_mutations: Vec::new(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.link.status
    }

    pub fn sources_registered(&self) -> usize {
        self.source_outcomes
            .iter()
            .filter(|o| o.counts_as_registered())
            .count()
    }
}

pub struct DiscoveryOrchestrator {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn DiscoveryStore>,
    throttle: HostThrottle,
    venues: VenueDirectory,
    config: Config,
}

impl DiscoveryOrchestrator {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<dyn DiscoveryStore>, config: Config) -> Self {
        Self {
            fetcher,
            store,
            throttle: HostThrottle::new(config.discovery.fetch_delay()),
            venues: VenueDirectory::new(&config.venues),
            config,
        }
    }

    pub fn store(&self) -> &dyn DiscoveryStore {
        &*self.store
    }

    fn prober(&self) -> PageProber<'_> {
        PageProber::new(
            &*self.fetcher,
            &self.throttle,
            &self.config.renderer,
            self.config.discovery.max_follow_pages,
            Utc::now().date_naive(),
        )
    }

    /// Log a URL as pending. Adding a URL that is already logged returns the
    /// existing record unchanged.
    pub fn add_link(&self, url: &str, note: Option<String>) -> Result<DiscoveredLink> {
        let url = normalize_url(url)?;
        let link = self
            .store
            .add_link(DiscoveredLink::pending(url, note, Utc::now()))?;
        info!(url = %link.url, status = %link.status, "Link logged");
        Ok(link)
    }

    /// Fetch, classify and extract a URL without writing anything.
    pub async fn inspect(&self, url: &str) -> Result<ProbeResult> {
        let url = normalize_url(url)?;
        let plan = ProbePlan::lookup(&*self.store, &url)?;
        self.prober().probe_with(&url, &plan).await
    }

    /// Process every pending link, plus `unclear`/`failed` ones when `rerun` is set.
    /// One link's failure never stops the others.
    #[instrument(skip(self))]
    pub async fn run(&self, rerun: bool) -> Result<RunSummary> {
        let queue: Vec<DiscoveredLink> = self
            .store
            .links()?
            .into_iter()
            .filter(|l| match l.status {
                LinkStatus::Pending => true,
                LinkStatus::Unclear | LinkStatus::Failed => rerun,
                LinkStatus::Processed => false,
            })
            .collect();
        let run_id = Uuid::new_v4();
        info!(%run_id, links = queue.len(), rerun, "Starting discovery run");

        let mut summary = RunSummary::default();
        for link in queue {
            let link = match self.process_link(&link).await {
                Ok(report) => {
                    summary.sources_registered += report.sources_registered();
                    report.link
                }
                Err(e) => {
                    error!(url = %link.url, error = %e, "Link processing failed");
                    self.mark_failed(&link, &e.to_string())
                }
            };
            match link.status {
                LinkStatus::Processed => {
                    summary.links_processed += 1;
                    summary.events_found += link.events_found;
                }
                LinkStatus::Unclear => summary.links_unclear += 1,
                LinkStatus::Failed | LinkStatus::Pending => summary.links_failed += 1,
            }
            DiscoveryMetrics::record_link(link.status);
        }

        info!(
            %run_id,
            processed = summary.links_processed,
            sources = summary.sources_registered,
            events = summary.events_found,
            unclear = summary.links_unclear,
            failed = summary.links_failed,
            "Discovery run finished"
        );
        Ok(summary)
    }

    /// Process one link and commit everything it produced atomically.
    /// Fetch and extraction failures become link statuses; only store errors
    /// are returned.
    #[instrument(skip(self, link), fields(url = %link.url))]
    pub async fn process_link(&self, link: &DiscoveredLink) -> Result<LinkReport> {
        let mut updated = link.clone();
        updated.processed_at = Some(Utc::now());
        updated.status_note = None;
        updated.source_registered = None;
        updated.calendar_url = None;
        updated.classified_as = None;
        updated.events_found = 0;

        let prober = self.prober();
        let plan = ProbePlan::lookup(&*self.store, &link.url)?;
        let probe = match prober.probe_with(&link.url, &plan).await {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Fetch failed");
                updated.status = LinkStatus::Failed;
                updated.status_note = Some(if e.is_fetch_error() {
                    format!("Fetch failed: {}", e)
                } else {
                    format!("Could not read page: {}", e)
                });
                return self.commit_link_only(updated);
            }
        };

        let kind = probe.kind();
        updated.classified_as = Some(kind);
        if kind == PageKind::Unclear {
            info!("Could not classify link");
            updated.status = LinkStatus::Unclear;
            updated.status_note = Some("Could not tell what this page lists; add a note or a better URL".to_string());
            return self.commit_link_only(updated);
        }

        let mut events = probe.extraction.events.clone();
        if events.is_empty() {
            warn!(kind = %kind, "No events extracted");
            updated.status = LinkStatus::Failed;
            updated.status_note = Some(format!("Classified as {} but no events could be extracted", kind));
            return self.commit_link_only(updated);
        }
        self.venues.annotate(&mut events);
        updated.events_found = events.len();

        let mut registrar = Registrar::new(&*self.store);
        let mut report = LinkReport::new(updated.clone());
        let mut events_source = plan.source_id;
        let mut parent_events = Vec::new();

        match kind {
            PageKind::Calendar | PageKind::Feed | PageKind::ArtistPage => {
                if passes_validation(&events) {
                    let candidate = CandidateSource::from_probe(&probe, Some(link.url.clone()));
                    let outcome = registrar.register_source(&candidate)?;
                    events_source = outcome.source_name().to_string();
                    if outcome.counts_as_registered() {
                        updated.source_registered = Some(events_source.clone());
                    }
                    report.source_outcomes.push(outcome);
                } else {
                    info!(events = events.len(), "Listing failed validation; storing events only");
                }
            }
            PageKind::SingleEvent => match resolve_parent(&prober, &*self.store, &probe).await? {
                Some(parent) => {
                    let outcome = registrar.register_source(&parent.candidate)?;
                    events_source = outcome.source_name().to_string();
                    updated.calendar_url = Some(parent.candidate.url.clone());
                    if outcome.counts_as_registered() {
                        updated.source_registered = Some(events_source.clone());
                    }
                    parent_events = parent.events;
                    self.venues.annotate(&mut parent_events);
                    report.source_outcomes.push(outcome);
                }
                None => info!("No parent calendar found; storing event only"),
            },
            PageKind::Unclear => {}
        }

        for event in events.iter().chain(parent_events.iter()) {
            report
                .event_outcomes
                .push(registrar.upsert_event(event, &events_source)?);
        }

        let taste = TasteUpdater::new(&*self.store, &self.config.taste);
        for event in &events {
            let mutations = taste.update_signals(event, &link.url, registrar.changes_mut())?;
            report.taste_mutations.extend(mutations);
        }

        updated.status = LinkStatus::Processed;
        updated.status_note = Some(status_note(&report, &updated));
        registrar.set_link(updated.clone());
        registrar.commit()?;

        info!(
            kind = %kind,
            events = updated.events_found,
            source = updated.source_registered.as_deref().unwrap_or("-"),
            "Link processed"
        );
        report.link = updated;
        Ok(report)
    }

    fn commit_link_only(&self, link: DiscoveredLink) -> Result<LinkReport> {
        self.store.apply(&ChangeSet {
            link: Some(link.clone()),
            ..ChangeSet::default()
        })?;
        Ok(LinkReport::new(link))
    }

    /// Best effort: record a failure the commit itself could not.
    fn mark_failed(&self, link: &DiscoveredLink, reason: &str) -> DiscoveredLink {
        let mut failed = link.clone();
        failed.status = LinkStatus::Failed;
        failed.status_note = Some(format!("Processing failed: {}", reason));
        failed.processed_at = Some(Utc::now());
        if let Err(e) = self.commit_link_only(failed.clone()) {
            error!(url = %link.url, error = %e, "Could not record link failure");
        }
        failed
    }
}

fn status_note(report: &LinkReport, link: &DiscoveredLink) -> String {
    let inserted = report
        .event_outcomes
        .iter()
        .filter(|o| **o == EventOutcome::Inserted)
        .count();
    let merged = report.event_outcomes.len() - inserted;
    let source = match report.source_outcomes.first() {
        Some(SourceOutcome::Created { name }) => format!("; registered source {}", name),
        Some(SourceOutcome::AlreadyExists { name }) => format!("; source {} already registered", name),
        Some(SourceOutcome::Conflict { existing }) => format!("; kept existing source {}", existing),
        None => String::new(),
    };
    format!(
        "{} events extracted ({} new, {} merged){}",
        link.events_found, inserted, merged, source
    )
}
